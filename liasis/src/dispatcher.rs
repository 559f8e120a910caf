//! Maps a decoded [`Command`] to a [`Response`]: arg validation already
//! happened in [`crate::message::parse_command`], so this module's job is
//! the RC check (§4.4) and the domain call behind each handler.

use crate::bencode::Value;
use crate::domain::{BuildOutcome, Domain, DropOutcome, SetActiveOutcome};
use crate::message::{ClientIdx, Command, InfoHash, Response};
use crate::rc::{Facet, Facets};
use crate::subscriptions::{ConnId, Subscriptions};

/// A facet bump the bus must perform after a handler completes
/// successfully, and the broadcast (if any) that goes with it (§4.5).
/// Dispatch itself never touches [`Facets`] or broadcasts anything — both
/// require reaching every connection, which only [`crate::btm`] can do —
/// it only reports what changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// `BUILDBTHFROMMETAINFO`/`DROPBTH` changed `client_idx`'s torrent set:
    /// bump `bth-set(client_idx)` and broadcast `INVALIDCLIENTTORRENTS`.
    TorrentSetChanged { client_idx: ClientIdx },
    /// `STARTBTH`/`STOPBTH` toggled a BTH's active flag: bump
    /// `bth-active(client_idx, info_hash)` for future `DROPBTH` RC checks.
    /// §4.5 defines no broadcast for this.
    ActiveChanged { client_idx: ClientIdx, info_hash: InfoHash },
}

/// The result of dispatching one command.
pub struct Dispatched {
    pub response: Response,
    pub effect: Effect,
}

fn ok(original: &[Value]) -> Dispatched {
    Dispatched { response: Response::CommandOk { original: original.to_vec() }, effect: Effect::None }
}

fn noop(original: &[Value]) -> Dispatched {
    Dispatched { response: Response::CommandNoop { original: original.to_vec() }, effect: Effect::None }
}

fn fail(original: &[Value], message: impl Into<String>) -> Dispatched {
    Dispatched {
        response: Response::CommandFail { original: original.to_vec(), message: message.into(), extra: None },
        effect: Effect::None,
    }
}

fn rc_rej(original: &[Value]) -> Dispatched {
    Dispatched { response: Response::RcRej { original: original.to_vec() }, effect: Effect::None }
}

/// The §4.4 RC rule, spelled out for the two shapes the spec gives worked
/// examples for: a command is only RC-rejected when the identifier it
/// names (`client_idx`, or `client_idx`+`info_hash` for `DROPBTH`) no
/// longer resolves to what it used to, *and* the facet that would explain
/// that no-longer-resolves postdates the client's echoed seq. A target that
/// still exists is never a violation, no matter how stale an unrelated
/// facet bump looks — "a client index that still exists and still refers
/// to the same client is not an RC violation even if the seq advanced."
fn is_rc_rejected(cmd: &Command, client_echoed_seq: u32, facets: &Facets, domain: &dyn Domain) -> bool {
    use Command::*;
    match cmd {
        GetClientCount => false,
        DropBth { client_idx, info_hash } => {
            if !domain.client_exists(*client_idx) {
                return facets.is_stale(Facet::ClientCount, client_echoed_seq);
            }
            if !domain.bth_exists(*client_idx, info_hash) {
                return facets.is_stale(Facet::BthSet(*client_idx), client_echoed_seq);
            }
            false
        }
        BuildBthFromMetainfo { client_idx, .. }
        | ForceBtcReannounce { client_idx }
        | GetBthData { client_idx, .. }
        | GetBthThroughput { client_idx, .. }
        | GetClientData { client_idx }
        | GetClientTorrents { client_idx }
        | StartBth { client_idx, .. }
        | StopBth { client_idx, .. }
        | SubscribeBthThroughput { client_idx }
        | UnsubscribeBthThroughput { client_idx } => {
            if domain.client_exists(*client_idx) {
                false
            } else {
                facets.is_stale(Facet::ClientCount, client_echoed_seq)
            }
        }
    }
}

/// Dispatches one already-parsed command (§4.4). `original` is the decoded
/// request list, embedded verbatim in every response that echoes it (§3).
#[allow(clippy::too_many_arguments)]
pub fn dispatch(
    original: &[Value],
    cmd: &Command,
    client_echoed_seq: u32,
    facets: &Facets,
    domain: &mut dyn Domain,
    subs: &mut Subscriptions,
    conn: ConnId,
    max_history_ceiling: u32,
) -> Dispatched {
    if is_rc_rejected(cmd, client_echoed_seq, facets, domain) {
        return rc_rej(original);
    }

    use Command::*;
    match cmd {
        GetClientCount => Dispatched {
            response: Response::ClientCount { count: domain.client_count() },
            effect: Effect::None,
        },

        GetClientData { client_idx } => match domain.client_data(*client_idx) {
            Some(data) => Dispatched {
                response: Response::ClientData { client_idx: *client_idx, data },
                effect: Effect::None,
            },
            None => fail(original, "no such client"),
        },

        GetClientTorrents { client_idx } => match domain.client_torrents(*client_idx) {
            Some(info_hashes) => Dispatched {
                response: Response::ClientTorrents { client_idx: *client_idx, info_hashes },
                effect: Effect::None,
            },
            None => fail(original, "no such client"),
        },

        GetBthData { client_idx, info_hash } => match domain.bth_data(*client_idx, info_hash) {
            Some(data) => Dispatched {
                response: Response::BthData { client_idx: *client_idx, info_hash: *info_hash, data },
                effect: Effect::None,
            },
            None => fail(original, "no such BTH"),
        },

        GetBthThroughput { client_idx, info_hash, max_history } => {
            let capped = (*max_history).min(max_history_ceiling);
            match domain.bth_throughput(*client_idx, info_hash, capped) {
                Some(hist) => Dispatched {
                    response: Response::BthThroughput {
                        client_idx: *client_idx,
                        info_hash: *info_hash,
                        down_cycle_ms: hist.down_cycle_ms,
                        down_list: hist.down,
                        up_cycle_ms: hist.up_cycle_ms,
                        up_list: hist.up,
                    },
                    effect: Effect::None,
                },
                None => fail(original, "no such BTH"),
            }
        }

        BuildBthFromMetainfo { client_idx, metainfo, initial_active } => {
            if !domain.client_exists(*client_idx) {
                return fail(original, "no such client");
            }
            match domain.build_bth_from_metainfo(*client_idx, metainfo, *initial_active) {
                Ok((_, BuildOutcome::Created)) => Dispatched {
                    response: Response::CommandOk { original: original.to_vec() },
                    effect: Effect::TorrentSetChanged { client_idx: *client_idx },
                },
                Ok((info_hash, BuildOutcome::AlreadyExists)) => {
                    match domain.bth_active(*client_idx, &info_hash) {
                        Some(active) if active == *initial_active => noop(original),
                        Some(_) => fail(original, "BTH already exists with a conflicting active state"),
                        None => fail(original, "BTH vanished mid-dispatch"),
                    }
                }
                Err(msg) => fail(original, msg),
            }
        }

        DropBth { client_idx, info_hash } => match domain.drop_bth(*client_idx, info_hash) {
            DropOutcome::NotFound => fail(original, "no such BTH"),
            DropOutcome::StillActive => fail(original, "BTH must be stopped before it can be dropped"),
            DropOutcome::Dropped => Dispatched {
                response: Response::CommandOk { original: original.to_vec() },
                effect: Effect::TorrentSetChanged { client_idx: *client_idx },
            },
        },

        ForceBtcReannounce { client_idx } => {
            if domain.force_reannounce(*client_idx) {
                ok(original)
            } else {
                fail(original, "no such client")
            }
        }

        StartBth { client_idx, info_hash } => match domain.set_bth_active(*client_idx, info_hash, true) {
            SetActiveOutcome::NotFound => fail(original, "no such BTH"),
            SetActiveOutcome::Noop => noop(original),
            SetActiveOutcome::Changed => Dispatched {
                response: Response::CommandOk { original: original.to_vec() },
                effect: Effect::ActiveChanged { client_idx: *client_idx, info_hash: *info_hash },
            },
        },

        StopBth { client_idx, info_hash } => match domain.set_bth_active(*client_idx, info_hash, false) {
            SetActiveOutcome::NotFound => fail(original, "no such BTH"),
            SetActiveOutcome::Noop => noop(original),
            SetActiveOutcome::Changed => Dispatched {
                response: Response::CommandOk { original: original.to_vec() },
                effect: Effect::ActiveChanged { client_idx: *client_idx, info_hash: *info_hash },
            },
        },

        SubscribeBthThroughput { client_idx } => {
            if !domain.client_exists(*client_idx) {
                return fail(original, "no such client");
            }
            if subs.subscribe(conn, *client_idx) {
                ok(original)
            } else {
                noop(original)
            }
        }

        UnsubscribeBthThroughput { client_idx } => {
            if !domain.client_exists(*client_idx) {
                return fail(original, "no such client");
            }
            if subs.unsubscribe(conn, *client_idx) {
                ok(original)
            } else {
                noop(original)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MemoryDomain;

    fn list(tag: &str) -> Vec<Value> {
        vec![Value::str(tag)]
    }

    #[test]
    fn get_client_count_is_never_rc_rejected() {
        let mut domain = MemoryDomain::new(2, 16);
        let facets = Facets::new();
        let mut subs = Subscriptions::new();
        let original = list("GETCLIENTCOUNT");
        let d = dispatch(&original, &Command::GetClientCount, 0, &facets, &mut domain, &mut subs, 1, 64);
        assert_eq!(d.response, Response::ClientCount { count: 2 });
    }

    #[test]
    fn stale_client_count_rc_rejects_an_out_of_range_index() {
        let mut domain = MemoryDomain::new(1, 16);
        let mut facets = Facets::new();
        facets.bump_client_count();
        let mut subs = Subscriptions::new();
        let cmd = Command::GetClientData { client_idx: 5 };
        let original = vec![Value::str("GETCLIENTDATA"), Value::Int(5)];
        let d = dispatch(&original, &cmd, 0, &facets, &mut domain, &mut subs, 1, 64);
        assert_eq!(d.response, Response::RcRej { original });
    }

    #[test]
    fn fresh_client_count_view_of_an_out_of_range_index_is_a_plain_failure() {
        let mut domain = MemoryDomain::new(1, 16);
        let facets = Facets::new();
        let mut subs = Subscriptions::new();
        let cmd = Command::GetClientData { client_idx: 5 };
        let original = vec![Value::str("GETCLIENTDATA"), Value::Int(5)];
        let d = dispatch(&original, &cmd, 0, &facets, &mut domain, &mut subs, 1, 64);
        assert!(matches!(d.response, Response::CommandFail { .. }));
    }

    #[test]
    fn valid_index_is_not_rc_rejected_despite_a_stale_client_count_view() {
        let mut domain = MemoryDomain::new(2, 16);
        let mut facets = Facets::new();
        facets.bump_client_count();
        let mut subs = Subscriptions::new();
        let cmd = Command::GetClientData { client_idx: 0 };
        let original = vec![Value::str("GETCLIENTDATA"), Value::Int(0)];
        let d = dispatch(&original, &cmd, 0, &facets, &mut domain, &mut subs, 1, 64);
        assert!(matches!(d.response, Response::ClientData { .. }));
    }

    #[test]
    fn building_a_bth_reports_torrent_set_changed() {
        let mut domain = MemoryDomain::new(1, 16);
        let facets = Facets::new();
        let mut subs = Subscriptions::new();
        let cmd = Command::BuildBthFromMetainfo { client_idx: 0, metainfo: b"abc".to_vec(), initial_active: false };
        let original = vec![Value::str("BUILDBTHFROMMETAINFO"), Value::Int(0), Value::bytes(*b"abc"), Value::Int(0)];
        let d = dispatch(&original, &cmd, 0, &facets, &mut domain, &mut subs, 1, 64);
        assert_eq!(d.response, Response::CommandOk { original });
        assert_eq!(d.effect, Effect::TorrentSetChanged { client_idx: 0 });
    }

    #[test]
    fn subscribing_twice_is_a_noop_the_second_time() {
        let mut domain = MemoryDomain::new(1, 16);
        let facets = Facets::new();
        let mut subs = Subscriptions::new();
        let cmd = Command::SubscribeBthThroughput { client_idx: 0 };
        let original = vec![Value::str("SUBSCRIBEBTHTHROUGHPUT"), Value::Int(0)];
        let first = dispatch(&original, &cmd, 0, &facets, &mut domain, &mut subs, 1, 64);
        assert_eq!(first.response, Response::CommandOk { original: original.clone() });
        let second = dispatch(&original, &cmd, 0, &facets, &mut domain, &mut subs, 1, 64);
        assert_eq!(second.response, Response::CommandNoop { original });
    }

    #[test]
    fn dropping_an_active_bth_fails() {
        let mut domain = MemoryDomain::new(1, 16);
        let (info_hash, _) = domain.build_bth_from_metainfo(0, b"abc", true).unwrap();
        let facets = Facets::new();
        let mut subs = Subscriptions::new();
        let cmd = Command::DropBth { client_idx: 0, info_hash };
        let original = vec![Value::str("DROPBTH"), Value::Int(0), Value::bytes(info_hash.to_vec())];
        let d = dispatch(&original, &cmd, 0, &facets, &mut domain, &mut subs, 1, 64);
        assert!(matches!(d.response, Response::CommandFail { .. }));
    }
}
