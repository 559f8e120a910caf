//! Liasis's control plane: the length-prefixed, sequence-numbered, bencoded
//! request/response protocol between the daemon ("server") and one or more
//! frontends ("clients"), plus the dispatcher, subscription bus and RC
//! guard that drive it.
//!
//! Leaf to root: [`bencode`] and [`frame`] are the wire codecs; [`message`]
//! decodes frames into [`message::Command`]s and encodes [`message::Response`]s;
//! [`rc`] and [`subscriptions`] hold the server-side bookkeeping the
//! [`dispatcher`] consults; [`connection`] drives one socket; [`btm`] is the
//! single actor that ties all of it together (§2 system overview).
//!
//! [`domain`] is the seam to the BT subsystem this crate doesn't implement
//! (§1 out of scope) — `liasisd` runs it against [`domain::MemoryDomain`], a
//! reference implementation good enough to host the daemon and its tests.

pub mod bencode;
pub mod btm;
pub mod conf;
pub mod connection;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod frame;
pub mod message;
pub mod rc;
pub mod subscriptions;

/// The types most callers embedding Liasis's control plane need.
pub mod prelude {
    pub use crate::btm::{spawn, BtmHandle};
    pub use crate::conf::{Conf, DaemonConf, Listen, SubscriptionConf};
    pub use crate::domain::{Domain, MemoryDomain};
    pub use crate::error::Error;
    pub use crate::message::{Command, Response};
}
