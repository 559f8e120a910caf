//! Length-prefixed, sequence-numbered framing for the control protocol.
//!
//! Wire shape: `u32_be data_len | u32_be seq_num | data[data_len]`. A
//! `data_len` of zero is a liveness NOOP with no payload. This mirrors the
//! peer-wire `Decoder`/`Encoder` split in [`crate::peer`] codecs, just with a
//! different header.

use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default ceiling on `data_len`, chosen far below the wire's theoretical
/// `u32::MAX` so that a single malicious frame can't force an unbounded
/// allocation. Connections may override this via [`FrameCodec::new`].
pub const DEFAULT_MAX_FRAME: u32 = 16 * 1024 * 1024;

/// One decoded frame: the server sequence number it carries, and its
/// (possibly empty) bencoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq_num: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn noop(seq_num: u32) -> Self {
        Frame { seq_num, data: Vec::new() }
    }

    pub fn is_noop(&self) -> bool {
        self.data.is_empty()
    }
}

/// Error returned by the frame codec. Oversize frames are fatal: the
/// connection is expected to close on receiving this from the decoder.
#[derive(Debug)]
pub enum FrameError {
    Io(io::Error),
    FrameTooLarge { len: u32, max: u32 },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Io(e) => write!(f, "I/O error: {}", e),
            FrameError::FrameTooLarge { len, max } => {
                write!(f, "frame of {} bytes exceeds max of {} bytes", len, max)
            }
        }
    }
}

impl std::error::Error for FrameError {}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        FrameError::Io(e)
    }
}

const HEADER_LEN: usize = 8;

/// Tokio codec implementing the frame layer. One instance per connection.
pub struct FrameCodec {
    max_frame: u32,
}

impl FrameCodec {
    pub fn new(max_frame: u32) -> Self {
        FrameCodec { max_frame }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &buf[..HEADER_LEN];
        let data_len = header.get_u32();
        let seq_num = header.get_u32();

        if data_len > self.max_frame {
            return Err(FrameError::FrameTooLarge { len: data_len, max: self.max_frame });
        }

        let total = HEADER_LEN + data_len as usize;
        if buf.len() < total {
            // Not enough data yet; reserve capacity for what we know is coming
            // so the connection doesn't need to re-grow the buffer piecemeal.
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(HEADER_LEN);
        let data = buf.split_to(data_len as usize).to_vec();
        Ok(Some(Frame { seq_num, data }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<(), FrameError> {
        let data_len = frame.data.len() as u32;
        buf.reserve(HEADER_LEN + frame.data.len());
        buf.put_u32(data_len);
        buf.put_u32(frame.seq_num);
        buf.extend_from_slice(&frame.data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_frame(f: &Frame) -> BytesMut {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(f.clone(), &mut buf).unwrap();
        buf
    }

    #[test]
    fn round_trips_a_frame() {
        let frame = Frame { seq_num: 7, data: b"hello".to_vec() };
        let mut buf = encode_frame(&frame);
        let mut codec = FrameCodec::default();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn noop_frame_has_no_payload() {
        let frame = Frame::noop(3);
        assert!(frame.is_noop());
        let mut buf = encode_frame(&frame);
        assert_eq!(buf.len(), HEADER_LEN);
        let mut codec = FrameCodec::default();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(decoded.is_noop());
    }

    #[test]
    fn accumulates_partial_reads() {
        let frame = Frame { seq_num: 1, data: b"0123456789".to_vec() };
        let full = encode_frame(&frame);
        let mut codec = FrameCodec::default();

        // feed byte by byte; only on the last byte should we get Some(_)
        let mut buf = BytesMut::new();
        let mut result = None;
        for (i, byte) in full.iter().enumerate() {
            buf.put_u8(*byte);
            result = codec.decode(&mut buf).unwrap();
            if i + 1 < full.len() {
                assert!(result.is_none(), "decoded early at byte {}", i);
            }
        }
        assert_eq!(result, Some(frame));
    }

    #[test]
    fn rejects_oversize_frames() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::new();
        buf.put_u32(5); // data_len
        buf.put_u32(0); // seq_num
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { len: 5, max: 4 }));
    }

    #[test]
    fn header_only_buffer_needs_more() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u16(0);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }
}
