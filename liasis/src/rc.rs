//! RC facets: the monotone bump counters the optimistic-concurrency guard
//! checks a client's echoed sequence number against (§3 "RC risks", §9
//! design notes).
//!
//! A [`Facets`] table holds `server_seq` plus a `last_bumped_seq` per named
//! facet. It has no notion of what a command is or what "stale" means for
//! one — that judgement belongs to [`crate::dispatcher`], which knows which
//! facets a given command cares about and what else (domain existence
//! checks) the RC rule is conditioned on. This module only guarantees the
//! bookkeeping invariant: `server_seq` is non-decreasing, and a facet's
//! `last_bumped_seq` is always some `server_seq` value that was current
//! when that facet last changed.

use std::collections::HashMap;

use crate::message::{ClientIdx, InfoHash};

/// A named slice of server state a command may declare a dependency on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    ClientCount,
    BthSet(ClientIdx),
    BthActive(ClientIdx, InfoHash),
}

/// `server_seq` plus the per-facet `last_bumped_seq` table (§3).
#[derive(Debug, Default)]
pub struct Facets {
    server_seq: u32,
    client_count_seq: u32,
    bth_set_seq: HashMap<ClientIdx, u32>,
    bth_active_seq: HashMap<(ClientIdx, InfoHash), u32>,
}

impl Facets {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sequence number to stamp on the next outbound frame.
    pub fn server_seq(&self) -> u32 {
        self.server_seq
    }

    fn advance(&mut self) -> u32 {
        self.server_seq = self.server_seq.wrapping_add(1);
        self.server_seq
    }

    /// Bumps `server_seq` with no facet attached — used for state changes
    /// (a throughput tick) that no command's RC risk set names (§4.5).
    pub fn bump_plain(&mut self) -> u32 {
        self.advance()
    }

    pub fn bump_client_count(&mut self) -> u32 {
        let seq = self.advance();
        self.client_count_seq = seq;
        seq
    }

    pub fn bump_bth_set(&mut self, idx: ClientIdx) -> u32 {
        let seq = self.advance();
        self.bth_set_seq.insert(idx, seq);
        seq
    }

    pub fn bump_bth_active(&mut self, idx: ClientIdx, info_hash: InfoHash) -> u32 {
        let seq = self.advance();
        self.bth_active_seq.insert((idx, info_hash), seq);
        seq
    }

    pub fn last_bumped(&self, facet: Facet) -> u32 {
        match facet {
            Facet::ClientCount => self.client_count_seq,
            Facet::BthSet(idx) => self.bth_set_seq.get(&idx).copied().unwrap_or(0),
            Facet::BthActive(idx, ih) => self.bth_active_seq.get(&(idx, ih)).copied().unwrap_or(0),
        }
    }

    /// Whether `facet` has changed since `client_echoed_seq`. This alone is
    /// necessary but not sufficient for an RC rejection (§3) — see
    /// [`crate::dispatcher::evaluate_rc`] for the full rule.
    pub fn is_stale(&self, facet: Facet, client_echoed_seq: u32) -> bool {
        self.last_bumped(facet) > client_echoed_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_seq_is_monotone_across_mixed_bumps() {
        let mut f = Facets::new();
        assert_eq!(f.bump_client_count(), 1);
        assert_eq!(f.bump_bth_set(3), 2);
        assert_eq!(f.bump_plain(), 3);
        assert_eq!(f.server_seq(), 3);
    }

    #[test]
    fn unbumped_facets_read_as_seq_zero() {
        let f = Facets::new();
        assert_eq!(f.last_bumped(Facet::ClientCount), 0);
        assert!(!f.is_stale(Facet::ClientCount, 0));
    }

    #[test]
    fn staleness_compares_against_the_right_facet_only() {
        let mut f = Facets::new();
        f.bump_bth_set(1);
        // client-count never bumped; a view at seq 0 is still fresh for it.
        assert!(!f.is_stale(Facet::ClientCount, 0));
        assert!(f.is_stale(Facet::BthSet(1), 0));
        assert!(!f.is_stale(Facet::BthSet(1), 1));
    }
}
