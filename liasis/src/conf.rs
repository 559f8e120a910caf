//! Daemon-wide and per-subscription configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Where the daemon listens for frontend connections.
#[derive(Clone, Debug)]
pub enum Listen {
    /// A filesystem-scoped local endpoint (the default, trust-boundary
    /// friendly transport per spec §6).
    Unix(PathBuf),
    /// A TCP socket. Carries no authentication; only for trusted networks.
    Tcp(std::net::SocketAddr),
}

/// Top-level daemon configuration.
#[derive(Clone, Debug)]
pub struct Conf {
    pub daemon: DaemonConf,
    pub subscription: SubscriptionConf,
}

impl Conf {
    pub fn new(listen: Listen) -> Self {
        Conf {
            daemon: DaemonConf { listen, ..DaemonConf::default() },
            subscription: SubscriptionConf::default(),
        }
    }
}

/// Daemon-wide settings: transport, framing ceilings, backpressure.
#[derive(Clone, Debug)]
pub struct DaemonConf {
    pub listen: Listen,
    /// Hard ceiling on a single frame's `data_len`. Frames larger than this
    /// are a fatal, connection-closing error (§4.2).
    pub max_frame: u32,
    /// Soft ceiling on an outbound queue's length before reads are paused
    /// on that connection (§5 resource ceilings).
    pub outbound_high_watermark: usize,
}

impl Default for DaemonConf {
    fn default() -> Self {
        DaemonConf {
            listen: Listen::Unix(PathBuf::from("/tmp/liasis.sock")),
            max_frame: crate::frame::DEFAULT_MAX_FRAME,
            outbound_high_watermark: 256,
        }
    }
}

/// Defaults governing the subscription & throughput-reporting facet.
#[derive(Clone, Debug)]
pub struct SubscriptionConf {
    /// How often the domain ticks a throughput sample for subscribed BTHs.
    pub throughput_cycle: Duration,
    /// Upper bound accepted for `GETBTHTHROUGHPUT`'s `max_history` argument,
    /// independent of whatever the caller asks for.
    pub max_history_ceiling: usize,
}

impl Default for SubscriptionConf {
    fn default() -> Self {
        SubscriptionConf {
            throughput_cycle: Duration::from_secs(1),
            max_history_ceiling: 1024,
        }
    }
}
