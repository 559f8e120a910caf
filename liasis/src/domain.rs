//! The state the control protocol exposes: local BT clients and the BTHs
//! (BitTorrent handles) built and managed under each one.
//!
//! [`Domain`] is the seam between the wire-facing dispatcher and whatever
//! actually drives local peer engines. [`MemoryDomain`] is a reference
//! implementation good enough to run the daemon and drive its tests end to
//! end; a real deployment would swap in an implementation backed by actual
//! `cratetorrent`-style engines, one per configured client.

use std::collections::{BTreeMap, VecDeque};

use crate::bencode::Value;
use crate::message::{ClientIdx, InfoHash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    NotFound,
    StillActive,
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetActiveOutcome {
    NotFound,
    Noop,
    Changed,
}

/// A bounded throughput history for one BTH, sliced to at most `max_history`
/// samples at read time (§4.4 `GETBTHTHROUGHPUT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThroughputHistory {
    pub down_cycle_ms: u32,
    pub down: Vec<i64>,
    pub up_cycle_ms: u32,
    pub up: Vec<i64>,
}

/// One throughput sample taken on a tick, identifying the BTH it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThroughputSample {
    pub client_idx: ClientIdx,
    pub info_hash: InfoHash,
    pub down: i64,
    pub up: i64,
}

/// The read and mutate surface a dispatcher needs from the local-client/BTH
/// state. Implementors own all interior mutability; the event loop is the
/// only caller, so no internal locking is required (§5).
pub trait Domain {
    fn client_count(&self) -> u32;
    fn client_exists(&self, idx: ClientIdx) -> bool;
    fn client_data(&self, idx: ClientIdx) -> Option<Value>;
    fn client_torrents(&self, idx: ClientIdx) -> Option<Vec<InfoHash>>;

    fn bth_exists(&self, idx: ClientIdx, info_hash: &InfoHash) -> bool;
    fn bth_active(&self, idx: ClientIdx, info_hash: &InfoHash) -> Option<bool>;
    fn bth_data(&self, idx: ClientIdx, info_hash: &InfoHash) -> Option<Value>;
    fn bth_throughput(&self, idx: ClientIdx, info_hash: &InfoHash, max_history: u32) -> Option<ThroughputHistory>;

    fn build_bth_from_metainfo(
        &mut self,
        idx: ClientIdx,
        metainfo: &[u8],
        initial_active: bool,
    ) -> Result<(InfoHash, BuildOutcome), String>;
    fn drop_bth(&mut self, idx: ClientIdx, info_hash: &InfoHash) -> DropOutcome;
    fn force_reannounce(&mut self, idx: ClientIdx) -> bool;
    fn set_bth_active(&mut self, idx: ClientIdx, info_hash: &InfoHash, active: bool) -> SetActiveOutcome;

    /// Removes a client from the roster entirely (e.g. a config reload).
    /// This has no wire-protocol command of its own — §8 scenario 6 drives
    /// it externally — but its effect (a `client-count` facet bump and the
    /// wholesale subscription drop in §4.5) is very much in scope. Returns
    /// `false` if `idx` didn't name a live client.
    fn remove_client(&mut self, idx: ClientIdx) -> bool;

    /// Advances every active BTH by one throughput-reporting cycle,
    /// returning the samples taken so the bus can fold them into history
    /// and notify subscribers (§4.5).
    fn tick_throughput(&mut self, down_cycle_ms: u32, up_cycle_ms: u32) -> Vec<ThroughputSample>;
}

#[derive(Debug, Clone)]
struct BthState {
    active: bool,
    metainfo_len: usize,
    down_history: VecDeque<i64>,
    up_history: VecDeque<i64>,
}

impl BthState {
    fn new(metainfo_len: usize, active: bool) -> Self {
        BthState { active, metainfo_len, down_history: VecDeque::new(), up_history: VecDeque::new() }
    }
}

#[derive(Debug, Clone)]
struct ClientState {
    bths: BTreeMap<InfoHash, BthState>,
}

/// A reference [`Domain`] with a fixed client roster (client add/remove is
/// an externally-managed concern per the control protocol's scope) and
/// synthetic throughput samples, useful for running the daemon without a
/// real peer engine behind it and for exercising the dispatcher in tests.
pub struct MemoryDomain {
    /// `None` marks a slot whose client was removed (§8 scenario 6):
    /// indices stay stable for the clients that remain, rather than
    /// shifting down, which would silently repoint every later index at a
    /// different client.
    clients: Vec<Option<ClientState>>,
    max_history_ceiling: usize,
    tick_count: u64,
}

impl MemoryDomain {
    pub fn new(client_count: u32, max_history_ceiling: usize) -> Self {
        MemoryDomain {
            clients: (0..client_count).map(|_| Some(ClientState { bths: BTreeMap::new() })).collect(),
            max_history_ceiling,
            tick_count: 0,
        }
    }

    fn client(&self, idx: ClientIdx) -> Option<&ClientState> {
        self.clients.get(idx as usize)?.as_ref()
    }

    fn client_mut(&mut self, idx: ClientIdx) -> Option<&mut ClientState> {
        self.clients.get_mut(idx as usize)?.as_mut()
    }

    fn info_hash_of(metainfo: &[u8]) -> InfoHash {
        // A real implementation SHA-1-hashes the metainfo `info` dict; the
        // reference domain only needs a stable, collision-resistant-enough
        // stand-in so tests can build and address BTHs deterministically.
        use sha1::{Digest, Sha1};
        let digest = Sha1::digest(metainfo);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        out
    }
}

impl Domain for MemoryDomain {
    fn client_count(&self) -> u32 {
        self.clients.iter().filter(|c| c.is_some()).count() as u32
    }

    fn client_exists(&self, idx: ClientIdx) -> bool {
        self.client(idx).is_some()
    }

    fn client_data(&self, idx: ClientIdx) -> Option<Value> {
        let client = self.client(idx)?;
        let mut dict = BTreeMap::new();
        dict.insert(b"bth_count".to_vec(), Value::Int(client.bths.len() as i64));
        dict.insert(
            b"active_count".to_vec(),
            Value::Int(client.bths.values().filter(|b| b.active).count() as i64),
        );
        Some(Value::Dict(dict))
    }

    fn client_torrents(&self, idx: ClientIdx) -> Option<Vec<InfoHash>> {
        Some(self.client(idx)?.bths.keys().copied().collect())
    }

    fn bth_exists(&self, idx: ClientIdx, info_hash: &InfoHash) -> bool {
        self.client(idx).map(|c| c.bths.contains_key(info_hash)).unwrap_or(false)
    }

    fn bth_active(&self, idx: ClientIdx, info_hash: &InfoHash) -> Option<bool> {
        self.client(idx)?.bths.get(info_hash).map(|b| b.active)
    }

    fn bth_data(&self, idx: ClientIdx, info_hash: &InfoHash) -> Option<Value> {
        let bth = self.client(idx)?.bths.get(info_hash)?;
        let mut dict = BTreeMap::new();
        dict.insert(b"active".to_vec(), Value::Int(bth.active as i64));
        dict.insert(b"metainfo_len".to_vec(), Value::Int(bth.metainfo_len as i64));
        Some(Value::Dict(dict))
    }

    fn bth_throughput(&self, idx: ClientIdx, info_hash: &InfoHash, max_history: u32) -> Option<ThroughputHistory> {
        let bth = self.client(idx)?.bths.get(info_hash)?;
        let take = max_history as usize;
        let slice = |hist: &VecDeque<i64>| -> Vec<i64> {
            let skip = hist.len().saturating_sub(take);
            hist.iter().skip(skip).copied().collect()
        };
        Some(ThroughputHistory {
            down_cycle_ms: 1000,
            down: slice(&bth.down_history),
            up_cycle_ms: 1000,
            up: slice(&bth.up_history),
        })
    }

    fn build_bth_from_metainfo(
        &mut self,
        idx: ClientIdx,
        metainfo: &[u8],
        initial_active: bool,
    ) -> Result<(InfoHash, BuildOutcome), String> {
        if metainfo.is_empty() {
            return Err("metainfo is empty".into());
        }
        let info_hash = Self::info_hash_of(metainfo);
        let metainfo_len = metainfo.len();
        let client = self.client_mut(idx).ok_or_else(|| "no such client".to_string())?;
        if client.bths.contains_key(&info_hash) {
            return Ok((info_hash, BuildOutcome::AlreadyExists));
        }
        client.bths.insert(info_hash, BthState::new(metainfo_len, initial_active));
        Ok((info_hash, BuildOutcome::Created))
    }

    fn drop_bth(&mut self, idx: ClientIdx, info_hash: &InfoHash) -> DropOutcome {
        let Some(client) = self.client_mut(idx) else {
            return DropOutcome::NotFound;
        };
        match client.bths.get(info_hash) {
            None => DropOutcome::NotFound,
            Some(bth) if bth.active => DropOutcome::StillActive,
            Some(_) => {
                client.bths.remove(info_hash);
                DropOutcome::Dropped
            }
        }
    }

    fn force_reannounce(&mut self, idx: ClientIdx) -> bool {
        self.client_exists(idx)
    }

    fn set_bth_active(&mut self, idx: ClientIdx, info_hash: &InfoHash, active: bool) -> SetActiveOutcome {
        let Some(client) = self.client_mut(idx) else {
            return SetActiveOutcome::NotFound;
        };
        let Some(bth) = client.bths.get_mut(info_hash) else {
            return SetActiveOutcome::NotFound;
        };
        if bth.active == active {
            SetActiveOutcome::Noop
        } else {
            bth.active = active;
            SetActiveOutcome::Changed
        }
    }

    fn remove_client(&mut self, idx: ClientIdx) -> bool {
        match self.clients.get_mut(idx as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    fn tick_throughput(&mut self, down_cycle_ms: u32, up_cycle_ms: u32) -> Vec<ThroughputSample> {
        let _ = (down_cycle_ms, up_cycle_ms);
        self.tick_count += 1;
        let mut samples = Vec::new();
        for (client_idx, client) in self.clients.iter_mut().enumerate().filter_map(|(i, c)| c.as_mut().map(|c| (i, c))) {
            for (info_hash, bth) in client.bths.iter_mut() {
                if !bth.active {
                    continue;
                }
                // Deterministic synthetic load so tests can assert on exact
                // values; a live engine would report real byte counters here.
                let down = 4096;
                let up = 1024;
                bth.down_history.push_back(down);
                bth.up_history.push_back(up);
                while bth.down_history.len() > self.max_history_ceiling {
                    bth.down_history.pop_front();
                }
                while bth.up_history.len() > self.max_history_ceiling {
                    bth.up_history.pop_front();
                }
                samples.push(ThroughputSample {
                    client_idx: client_idx as ClientIdx,
                    info_hash: *info_hash,
                    down,
                    up,
                });
            }
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_finds_a_bth() {
        let mut d = MemoryDomain::new(2, 16);
        let (ih, outcome) = d.build_bth_from_metainfo(0, b"d4:infod4:name3:fooee", false).unwrap();
        assert_eq!(outcome, BuildOutcome::Created);
        assert!(d.bth_exists(0, &ih));
        assert_eq!(d.bth_active(0, &ih), Some(false));
    }

    #[test]
    fn rebuilding_the_same_metainfo_is_a_noop() {
        let mut d = MemoryDomain::new(1, 16);
        let (ih1, first) = d.build_bth_from_metainfo(0, b"same", true).unwrap();
        let (ih2, second) = d.build_bth_from_metainfo(0, b"same", true).unwrap();
        assert_eq!(first, BuildOutcome::Created);
        assert_eq!(second, BuildOutcome::AlreadyExists);
        assert_eq!(ih1, ih2);
    }

    #[test]
    fn drop_requires_inactive() {
        let mut d = MemoryDomain::new(1, 16);
        let (ih, _) = d.build_bth_from_metainfo(0, b"payload", true).unwrap();
        assert_eq!(d.drop_bth(0, &ih), DropOutcome::StillActive);
        d.set_bth_active(0, &ih, false);
        assert_eq!(d.drop_bth(0, &ih), DropOutcome::Dropped);
        assert!(!d.bth_exists(0, &ih));
    }

    #[test]
    fn throughput_only_ticks_for_active_bths() {
        let mut d = MemoryDomain::new(1, 16);
        let (ih, _) = d.build_bth_from_metainfo(0, b"payload", false).unwrap();
        assert!(d.tick_throughput(1000, 1000).is_empty());
        d.set_bth_active(0, &ih, true);
        let samples = d.tick_throughput(1000, 1000);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].client_idx, 0);
        assert_eq!(samples[0].info_hash, ih);
    }

    #[test]
    fn removed_client_frees_its_index_without_reindexing_others() {
        let mut d = MemoryDomain::new(2, 16);
        d.build_bth_from_metainfo(1, b"payload", false).unwrap();
        assert!(d.remove_client(0));
        assert_eq!(d.client_count(), 1);
        assert!(!d.client_exists(0));
        assert!(d.client_exists(1));
        assert!(!d.remove_client(0));
    }

    #[test]
    fn throughput_history_is_bounded_by_ceiling() {
        let mut d = MemoryDomain::new(1, 3);
        let (ih, _) = d.build_bth_from_metainfo(0, b"payload", true).unwrap();
        for _ in 0..10 {
            d.tick_throughput(1000, 1000);
        }
        let hist = d.bth_throughput(0, &ih, 100).unwrap();
        assert_eq!(hist.down.len(), 3);
        assert_eq!(hist.up.len(), 3);
    }
}
