//! Crate-wide error type.
//!
//! A `#[non_exhaustive]` enum with `Display` and `From` impls for the error
//! types we wrap. Wire-level conditions (bad bencode, unknown command,
//! stale view) are *not* represented here — those are ordinary protocol
//! responses, not Rust errors, since the connection that encounters them
//! stays alive. This type is for conditions the caller can't route to a
//! client: I/O failure, config failure, a poisoned internal channel.

use std::fmt;
use std::io;

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Transport-level I/O failure (bind, accept, read, write).
    Io(io::Error),
    /// The daemon's internal command channel was dropped.
    ChannelClosed,
    /// Config parsing or validation failed before the daemon could start.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::ChannelClosed => write!(f, "internal command channel closed"),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
