//! The subscription bus's bookkeeping: which connections hold a live
//! throughput subscription for which client index (§4.5).
//!
//! This module only tracks the registry. Turning a registration change into
//! wire traffic — bumping facets, broadcasting `INVALIDCLIENTTORRENTS`,
//! sending `UNSUBSCRIBE` — is [`crate::btm`]'s job; keeping the two separate
//! is what lets this be tested without any I/O.

use std::collections::{HashMap, HashSet};

use crate::message::ClientIdx;

/// Identifies one open connection. Assigned by [`crate::btm`] on accept.
pub type ConnId = u64;

#[derive(Debug, Default)]
pub struct Subscriptions {
    by_conn: HashMap<ConnId, HashSet<ClientIdx>>,
    by_client: HashMap<ClientIdx, HashSet<ConnId>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn` for `client_idx`. Returns `false` if already
    /// subscribed — the dispatcher turns that into `COMMANDNOOP` (§4.4).
    pub fn subscribe(&mut self, conn: ConnId, client_idx: ClientIdx) -> bool {
        let fresh = self.by_conn.entry(conn).or_default().insert(client_idx);
        if fresh {
            self.by_client.entry(client_idx).or_default().insert(conn);
        }
        fresh
    }

    /// Returns `false` if `conn` wasn't subscribed to `client_idx`.
    pub fn unsubscribe(&mut self, conn: ConnId, client_idx: ClientIdx) -> bool {
        let removed = self.by_conn.get_mut(&conn).map(|s| s.remove(&client_idx)).unwrap_or(false);
        if removed {
            self.forget_pair(client_idx, conn);
        }
        removed
    }

    fn forget_pair(&mut self, client_idx: ClientIdx, conn: ConnId) {
        if let Some(set) = self.by_client.get_mut(&client_idx) {
            set.remove(&conn);
            if set.is_empty() {
                self.by_client.remove(&client_idx);
            }
        }
    }

    pub fn subscribers(&self, client_idx: ClientIdx) -> impl Iterator<Item = ConnId> + '_ {
        self.by_client.get(&client_idx).into_iter().flatten().copied()
    }

    /// Drops every subscription belonging to a closed connection. No
    /// `UNSUBSCRIBE` is produced for this — the peer is already gone
    /// (§5 cancellation).
    pub fn drop_connection(&mut self, conn: ConnId) {
        if let Some(client_idxs) = self.by_conn.remove(&conn) {
            for idx in client_idxs {
                self.forget_pair(idx, conn);
            }
        }
    }

    /// Drops every subscription for one client index across all
    /// connections — the domain revoking a subscription outright, distinct
    /// from a client-count change (§4.5's "bt-subsystem revoked
    /// subscription" row). Returns the connections that held it, each of
    /// which gets exactly one `UNSUBSCRIBE`.
    pub fn drop_client(&mut self, client_idx: ClientIdx) -> Vec<ConnId> {
        let Some(conns) = self.by_client.remove(&client_idx) else {
            return Vec::new();
        };
        for conn in &conns {
            if let Some(set) = self.by_conn.get_mut(conn) {
                set.remove(&client_idx);
            }
        }
        conns.into_iter().collect()
    }

    /// Drops every subscription on every connection — what a client-count
    /// change does (§4.5: "`INVALIDCLIENTCOUNT` drops all per-client
    /// subscriptions on all connections"). Returns `(conn, client_idx)`
    /// pairs; the caller sends one `UNSUBSCRIBE` per pair.
    pub fn drop_all(&mut self) -> Vec<(ConnId, ClientIdx)> {
        let by_conn = std::mem::take(&mut self.by_conn);
        self.by_client.clear();
        by_conn
            .into_iter()
            .flat_map(|(conn, idxs)| idxs.into_iter().map(move |idx| (conn, idx)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resubscribing_is_not_fresh() {
        let mut s = Subscriptions::new();
        assert!(s.subscribe(1, 0));
        assert!(!s.subscribe(1, 0));
    }

    #[test]
    fn drop_client_reports_only_its_own_subscribers() {
        let mut s = Subscriptions::new();
        s.subscribe(1, 0);
        s.subscribe(2, 0);
        s.subscribe(2, 1);
        let mut affected = s.drop_client(0);
        affected.sort();
        assert_eq!(affected, vec![1, 2]);
        assert_eq!(s.subscribers(0).count(), 0);
        assert_eq!(s.subscribers(1).count(), 1);
    }

    #[test]
    fn drop_all_clears_every_connection() {
        let mut s = Subscriptions::new();
        s.subscribe(1, 0);
        s.subscribe(2, 1);
        let mut pairs = s.drop_all();
        pairs.sort();
        assert_eq!(pairs, vec![(1, 0), (2, 1)]);
        assert_eq!(s.subscribers(0).count(), 0);
        assert_eq!(s.subscribers(1).count(), 0);
    }

    #[test]
    fn closing_a_connection_drops_its_subscriptions_without_reporting_them() {
        let mut s = Subscriptions::new();
        s.subscribe(1, 0);
        s.subscribe(1, 1);
        s.drop_connection(1);
        assert_eq!(s.subscribers(0).count(), 0);
        assert_eq!(s.subscribers(1).count(), 0);
    }
}
