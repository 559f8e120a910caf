//! The Liasis daemon binary: wires the control-plane actor to a real
//! listener and a reference in-memory domain (§6 CLI / external
//! interfaces). Daemonisation, real peer engines, persistence and the
//! graphical frontend are all external collaborators (§1) this binary never
//! touches.

use std::net::SocketAddr;
use std::path::PathBuf;

use flexi_logger::FileSpec;
use structopt::StructOpt;

use liasis::conf::{Conf, Listen};
use liasis::domain::MemoryDomain;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(StructOpt, Debug)]
#[structopt(name = "liasisd", about = "Liasis BitTorrent daemon control plane")]
struct Args {
    /// Where to listen for frontend connections: a filesystem path for a
    /// Unix domain socket, or an `ip:port` pair for TCP. TCP carries no
    /// authentication — trusted networks only (§6).
    #[structopt(short, long, default_value = "/tmp/liasis.sock")]
    listen: String,

    /// Run in the foreground. Daemonisation is an external collaborator
    /// (§1); the core always runs in the foreground and only logs this flag
    /// for compatibility with wrapper scripts that otherwise fork it.
    #[structopt(long)]
    nodaemon: bool,

    /// Skip loading resume data on startup. Persistence/snapshotting is an
    /// external collaborator (§1); the core never branches on this beyond
    /// logging it.
    #[structopt(long)]
    forcenoresume: bool,

    /// Directory to write the daemon's log file under.
    #[structopt(long, default_value = "/tmp/liasis")]
    profile: PathBuf,

    /// Number of synthetic BT clients the reference in-memory domain
    /// exposes. A real deployment replaces `MemoryDomain` with something
    /// backed by actual peer engines, one per configured client.
    #[structopt(long, default_value = "1")]
    clients: u32,
}

fn parse_listen(s: &str) -> Listen {
    match s.parse::<SocketAddr>() {
        Ok(addr) => Listen::Tcp(addr),
        Err(_) => Listen::Unix(PathBuf::from(s)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::from_args();

    flexi_logger::Logger::try_with_env_or_str("info")?
        .log_to_file(FileSpec::default().directory(&args.profile))
        .start()?;

    log::info!(
        "liasisd starting: listen={} nodaemon={} forcenoresume={} clients={}",
        args.listen, args.nodaemon, args.forcenoresume, args.clients
    );

    let conf = Conf::new(parse_listen(&args.listen));
    let domain = MemoryDomain::new(args.clients, conf.subscription.max_history_ceiling);

    let handle = liasis::btm::spawn(conf, domain).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("received shutdown signal, draining connections");
    handle.shutdown().await;

    Ok(())
}
