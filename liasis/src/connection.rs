//! Per-connection I/O: drives a `Framed` transport, handing decoded frames
//! to [`crate::btm::Btm`] and writing back whatever it decides to send
//! (§4.3 connection state machine). All protocol logic — RC checks, the
//! dispatch table, the subscription bus — lives on the central actor; this
//! module only owns the socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::frame::{Frame, FrameCodec};
use crate::subscriptions::ConnId;

/// What a connection task reports to the central actor.
pub enum ConnEvent {
    /// The transport is up; here's how to reach it with outbound frames.
    Opened { id: ConnId, outbound: OutboundHandle },
    /// A non-NOOP frame arrived and was not yet bencode-decoded.
    Inbound { id: ConnId, seq_num: u32, payload: Vec<u8> },
    /// The transport closed or hit a fatal framing error.
    Closed { id: ConnId },
}

/// A handle the central actor uses to queue frames for one connection, and
/// the connection task uses to decide whether it's allowed to keep reading.
///
/// Resource ceilings (§5): `pending` tracks frames queued but not yet
/// written to the wire. Once it reaches `high_watermark` the connection
/// task stops polling for new inbound frames — reads resume once the
/// writer catches up. Nothing is ever dropped to relieve backpressure;
/// only further reads are paused.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<Frame>,
    pending: Arc<AtomicUsize>,
    high_watermark: usize,
}

impl OutboundHandle {
    pub fn send(&self, frame: Frame) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(frame).is_ok()
    }

    fn is_over_watermark(&self) -> bool {
        self.pending.load(Ordering::SeqCst) >= self.high_watermark
    }
}

/// Drives one connection until the transport closes or a fatal framing
/// error occurs. Runs as its own tokio task.
pub async fn run<T>(id: ConnId, transport: T, max_frame: u32, high_watermark: usize, events_tx: mpsc::UnboundedSender<ConnEvent>)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(transport, FrameCodec::new(max_frame));
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    let handle = OutboundHandle { tx: outbound_tx, pending: pending.clone(), high_watermark };

    if events_tx.send(ConnEvent::Opened { id, outbound: handle.clone() }).is_err() {
        return;
    }

    loop {
        let paused = handle.is_over_watermark();
        tokio::select! {
            incoming = framed.next(), if !paused => {
                match incoming {
                    Some(Ok(frame)) => {
                        if frame.is_noop() {
                            log::trace!("conn {id}: NOOP frame, dropping silently");
                            continue;
                        }
                        if events_tx.send(ConnEvent::Inbound { id, seq_num: frame.seq_num, payload: frame.data }).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("conn {id}: fatal frame error, closing: {e}");
                        break;
                    }
                    None => break,
                }
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if let Err(e) = framed.send(frame).await {
                            log::warn!("conn {id}: write error, closing: {e}");
                            break;
                        }
                        pending.fetch_sub(1, Ordering::SeqCst);
                    }
                    None => break,
                }
            }
        }
    }

    let _ = events_tx.send(ConnEvent::Closed { id });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn opens_reports_noop_and_echoes_one_inbound_frame() {
        let (client, server) = duplex(4096);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(7, server, 1024, 256, tx));

        let mut client_framed = Framed::new(client, FrameCodec::default());
        client_framed.send(Frame::noop(0)).await.unwrap();
        client_framed.send(Frame { seq_num: 0, data: b"hi".to_vec() }).await.unwrap();

        let opened = rx.recv().await.unwrap();
        let outbound = match opened {
            ConnEvent::Opened { id, outbound } => {
                assert_eq!(id, 7);
                outbound
            }
            _ => panic!("expected Opened"),
        };

        let inbound = rx.recv().await.unwrap();
        match inbound {
            ConnEvent::Inbound { id, payload, .. } => {
                assert_eq!(id, 7);
                assert_eq!(payload, b"hi");
            }
            _ => panic!("expected Inbound (NOOP should not surface as an event)"),
        }

        outbound.send(Frame { seq_num: 1, data: b"bye".to_vec() });
        let reply = client_framed.next().await.unwrap().unwrap();
        assert_eq!(reply.data, b"bye");

        drop(client_framed);
        let closed = rx.recv().await.unwrap();
        assert!(matches!(closed, ConnEvent::Closed { id: 7 }));
        task.await.unwrap();
    }
}
