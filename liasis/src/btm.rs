//! The BT manager: the single-threaded coordinator that owns the domain,
//! the RC facet table and the subscription bus, and serialises every
//! dispatch against them (§5). Connection I/O runs on its own task per
//! connection (see [`crate::connection`]); all of them funnel events
//! through this actor's `run` loop, which is the one place facet bumps and
//! replies are ordered relative to each other — the property the RC scheme
//! depends on (§9 design notes).
//!
//! Shaped after the teacher's [`EngineHandle`]/`Engine` split: a cheap
//! handle for callers, a task owning all the mutable state, commands in
//! over a channel.

use std::collections::{BTreeMap, HashMap};

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio::task;
use tokio::time;

use crate::bencode;
use crate::conf::{Conf, Listen};
use crate::connection::{self, ConnEvent, OutboundHandle};
use crate::dispatcher::{self, Effect};
use crate::domain::Domain;
use crate::error::Error;
use crate::frame::Frame;
use crate::message::{self, ClientIdx, ParseError, Response};
use crate::rc::Facets;
use crate::subscriptions::{ConnId, Subscriptions};

/// Administrative operations outside the wire protocol (§8 scenario 6:
/// "force removal of client 0, e.g. by config reload"). Nothing in §6's
/// client→server table reaches these; they model the BT subsystem's own
/// initiative, which the bus re-publishes to frontends same as any other
/// domain signal.
enum AdminCommand {
    RemoveClient { idx: ClientIdx },
    RevokeSubscription { client_idx: ClientIdx },
    Shutdown,
}

/// A cheap, cloneable-free handle to a running [`Btm`]. Dropping it without
/// calling [`BtmHandle::shutdown`] leaves the daemon running; that's
/// intentional; the daemon binary is expected to hold this for its whole
/// lifetime.
pub struct BtmHandle {
    admin_tx: mpsc::UnboundedSender<AdminCommand>,
    join_handle: Option<task::JoinHandle<()>>,
}

impl BtmHandle {
    /// Simulates an external removal of a client (§8 scenario 6).
    pub fn remove_client(&self, idx: ClientIdx) {
        let _ = self.admin_tx.send(AdminCommand::RemoveClient { idx });
    }

    /// Simulates the BT subsystem unilaterally revoking a throughput
    /// subscription without a client-count change (§4.5's "bt-subsystem
    /// revoked subscription" row).
    pub fn revoke_subscription(&self, client_idx: ClientIdx) {
        let _ = self.admin_tx.send(AdminCommand::RevokeSubscription { client_idx });
    }

    /// Puts every connection into `Draining`, flushes queued frames, and
    /// stops the actor (§5 cancellation: domain shutdown).
    pub async fn shutdown(mut self) {
        let _ = self.admin_tx.send(AdminCommand::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

struct ConnState {
    echoed_seq: u32,
    outbound: OutboundHandle,
}

enum BoundListener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl BoundListener {
    async fn bind(listen: &Listen) -> std::io::Result<Self> {
        match listen {
            Listen::Unix(path) => {
                let _ = std::fs::remove_file(path);
                Ok(BoundListener::Unix(UnixListener::bind(path)?))
            }
            Listen::Tcp(addr) => Ok(BoundListener::Tcp(TcpListener::bind(addr).await?)),
        }
    }

    async fn accept(&self) -> std::io::Result<Box<dyn AsyncReadWrite>> {
        match self {
            BoundListener::Unix(l) => {
                let (stream, _) = l.accept().await?;
                Ok(Box::new(stream))
            }
            BoundListener::Tcp(l) => {
                let (stream, _) = l.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }
}

trait AsyncReadWrite: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}
impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

struct Btm {
    conf: Conf,
    domain: Box<dyn Domain + Send>,
    facets: Facets,
    subs: Subscriptions,
    conns: HashMap<ConnId, ConnState>,
    next_conn_id: ConnId,
    conn_tx: mpsc::UnboundedSender<ConnEvent>,
}

/// Binds the configured listener and spawns the actor as a tokio task.
pub async fn spawn(conf: Conf, domain: impl Domain + Send + 'static) -> Result<BtmHandle, Error> {
    let listener = BoundListener::bind(&conf.daemon.listen).await?;
    let (admin_tx, admin_rx) = mpsc::unbounded_channel();
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();

    let btm = Btm {
        conf,
        domain: Box::new(domain),
        facets: Facets::new(),
        subs: Subscriptions::new(),
        conns: HashMap::new(),
        next_conn_id: 0,
        conn_tx,
    };

    let join_handle = task::spawn(btm.run(listener, conn_rx, admin_rx));
    Ok(BtmHandle { admin_tx, join_handle: Some(join_handle) })
}

impl Btm {
    async fn run(
        mut self,
        listener: BoundListener,
        mut conn_rx: mpsc::UnboundedReceiver<ConnEvent>,
        mut admin_rx: mpsc::UnboundedReceiver<AdminCommand>,
    ) {
        log::info!("control plane listening");
        let mut ticker = time::interval(self.conf.subscription.throughput_cycle);
        ticker.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok(stream) => self.spawn_connection(stream),
                        Err(e) => log::warn!("accept failed: {e}"),
                    }
                }
                Some(event) = conn_rx.recv() => self.handle_conn_event(event),
                _ = ticker.tick() => self.handle_throughput_tick(),
                Some(cmd) = admin_rx.recv() => {
                    if self.handle_admin_command(cmd) {
                        break;
                    }
                }
            }
        }

        log::info!("control plane draining {} connection(s)", self.conns.len());
        // Dropping every `ConnState` drops its `OutboundHandle`, so each
        // connection task's outbound channel drains whatever is already
        // queued and then observes the sender gone — "finish flushing
        // already-queued frames, accept no new inbound" (§4.3 Draining).
        self.conns.clear();
    }

    fn spawn_connection(&mut self, stream: Box<dyn AsyncReadWrite>) {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        let max_frame = self.conf.daemon.max_frame;
        let high_watermark = self.conf.daemon.outbound_high_watermark;
        let tx = self.conn_tx.clone();
        task::spawn(connection::run(id, stream, max_frame, high_watermark, tx));
    }

    fn handle_conn_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Opened { id, outbound } => {
                log::info!("conn {id}: opened");
                self.conns.insert(id, ConnState { echoed_seq: 0, outbound });
            }
            ConnEvent::Inbound { id, seq_num, payload } => self.handle_inbound(id, seq_num, payload),
            ConnEvent::Closed { id } => {
                log::info!("conn {id}: closed");
                self.subs.drop_connection(id);
                self.conns.remove(&id);
            }
        }
    }

    fn handle_inbound(&mut self, id: ConnId, seq_num: u32, payload: Vec<u8>) {
        let Some(conn) = self.conns.get_mut(&id) else { return };
        conn.echoed_seq = seq_num;
        let echoed_seq = conn.echoed_seq;

        let response = match bencode::decode(&payload) {
            Err(e) => {
                log::debug!("conn {id}: bencode decode error: {e}");
                Response::BencError { original_bytes: payload }
            }
            Ok(value) => match value.into_list() {
                Some(list) if !list.is_empty() && list[0].as_bytes().is_some() => {
                    match message::parse_command(&list) {
                        Ok(cmd) => {
                            log::debug!("conn {id}: dispatching {cmd:?}");
                            let max_history_ceiling = self.conf.subscription.max_history_ceiling as u32;
                            let dispatched = dispatcher::dispatch(
                                &list,
                                &cmd,
                                echoed_seq,
                                &self.facets,
                                self.domain.as_mut(),
                                &mut self.subs,
                                id,
                                max_history_ceiling,
                            );
                            self.apply_effect(dispatched.effect);
                            dispatched.response
                        }
                        Err(ParseError::UnknownTag) => Response::UnknownCmd { original: list },
                        Err(ParseError::MalformedEnvelope) => Response::BencError { original_bytes: payload },
                        Err(ParseError::BadArgs(message)) => Response::ArgError { original: list, message },
                    }
                }
                _ => Response::BencError { original_bytes: payload },
            },
        };

        self.send(id, response);
    }

    fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::None => {}
            Effect::TorrentSetChanged { client_idx } => {
                self.facets.bump_bth_set(client_idx);
                self.broadcast(Response::InvalidClientTorrents { client_idx });
            }
            Effect::ActiveChanged { client_idx, info_hash } => {
                self.facets.bump_bth_active(client_idx, info_hash);
            }
        }
    }

    /// Returns `true` if the actor should stop.
    fn handle_admin_command(&mut self, cmd: AdminCommand) -> bool {
        match cmd {
            AdminCommand::RemoveClient { idx } => {
                if self.domain.remove_client(idx) {
                    self.facets.bump_client_count();
                    self.broadcast(Response::InvalidClientCount);
                    for (conn, client_idx) in self.subs.drop_all() {
                        self.send(conn, Response::Unsubscribe { client_idx });
                    }
                }
                false
            }
            AdminCommand::RevokeSubscription { client_idx } => {
                for conn in self.subs.drop_client(client_idx) {
                    self.send(conn, Response::Unsubscribe { client_idx });
                }
                false
            }
            AdminCommand::Shutdown => true,
        }
    }

    fn handle_throughput_tick(&mut self) {
        let down_cycle_ms = self.conf.subscription.throughput_cycle.as_millis() as u32;
        let samples = self.domain.tick_throughput(down_cycle_ms, down_cycle_ms);
        if samples.is_empty() {
            return;
        }

        let mut by_client: BTreeMap<ClientIdx, (Vec<i64>, Vec<i64>)> = BTreeMap::new();
        for sample in samples {
            let entry = by_client.entry(sample.client_idx).or_default();
            entry.0.push(sample.down);
            entry.1.push(sample.up);
        }

        for (client_idx, (down_list, up_list)) in by_client {
            let subscribers: Vec<ConnId> = self.subs.subscribers(client_idx).collect();
            if subscribers.is_empty() {
                continue;
            }
            // No RC facet is declared against throughput ticks (§4.5); the
            // emission still advances `server_seq` like any other bus event.
            self.facets.bump_plain();
            for conn in subscribers {
                self.send(conn, Response::BthThroughputSlice {
                    client_idx,
                    down_list: down_list.clone(),
                    up_list: up_list.clone(),
                });
            }
        }
    }

    fn send(&self, id: ConnId, response: Response) {
        if let Some(conn) = self.conns.get(&id) {
            let frame = Frame { seq_num: self.facets.server_seq(), data: response.encode() };
            conn.outbound.send(frame);
        }
    }

    fn broadcast(&self, response: Response) {
        for id in self.conns.keys().copied().collect::<Vec<_>>() {
            self.send(id, response.clone());
        }
    }
}
