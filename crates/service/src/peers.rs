use std::net::SocketAddr;

use ahash::{HashMap, HashSet};

/// A known member of the swarm.
///
/// The endpoint list is empty until the member has been resolved; order
/// follows the router's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Peer {
    pub id: String,
    pub endpoints: Vec<SocketAddr>,
}

/// The live membership view, reconciled against every membership list
/// the routers deliver.
#[derive(Default)]
pub struct PeerTable {
    entries: HashMap<String, Vec<SocketAddr>>,
    catch_log: Vec<String>,
    caught: HashSet<String>,
}

impl PeerTable {
    /// Apply an authoritative membership list.
    ///
    /// Identities not yet known are inserted unresolved, entries absent
    /// from the list are dropped. The diff is computed before anything
    /// is touched, so the outcome does not depend on iteration order.
    pub fn reconcile(&mut self, ids: &[&str]) {
        let keep: HashSet<&str> = ids.iter().copied().collect();
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|id| !keep.contains(id.as_str()))
            .cloned()
            .collect();

        for id in stale {
            self.entries.remove(&id);
        }

        for id in ids {
            if !self.entries.contains_key(*id) {
                self.entries.insert(id.to_string(), Vec::new());
            }
            if self.caught.insert(id.to_string()) {
                self.catch_log.push(id.to_string());
            }
        }
    }

    /// Replace the endpoint list of one member.
    ///
    /// Returns false when the identity is not in the table.
    pub fn set_endpoints(&mut self, id: &str, endpoints: Vec<SocketAddr>) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                *entry = endpoints;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the table, sorted by identity for stable consumption.
    pub fn snapshot(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self
            .entries
            .iter()
            .map(|(id, endpoints)| Peer {
                id: id.clone(),
                endpoints: endpoints.clone(),
            })
            .collect();

        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Every identity ever mentioned by any router, first seen first.
    pub fn catch_log(&self) -> &[String] {
        &self.catch_log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciliation() {
        let mut table = PeerTable::default();
        table.reconcile(&["a", "b"]);
        table.set_endpoints("a", vec!["1.2.3.4:5000".parse().unwrap()]);

        table.reconcile(&["b", "c", "d"]);
        let snapshot = table.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|peer| peer.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "d"]);

        // Same list again is a no-op.
        table.reconcile(&["b", "c", "d"]);
        assert_eq!(table.snapshot(), snapshot);

        // The catch log keeps everything in first-seen order.
        assert_eq!(table.catch_log(), ["a", "b", "c", "d"]);
    }

    #[test]
    fn reconciliation_keeps_resolved_endpoints() {
        let mut table = PeerTable::default();
        table.reconcile(&["a"]);
        assert!(table.set_endpoints("a", vec!["1.2.3.4:5000".parse().unwrap()]));

        table.reconcile(&["a", "b"]);
        assert_eq!(table.snapshot()[0].endpoints.len(), 1);
    }

    #[test]
    fn unknown_member_stays_unknown() {
        let mut table = PeerTable::default();
        table.reconcile(&["a"]);
        assert!(!table.set_endpoints("z", vec!["1.2.3.4:5000".parse().unwrap()]));
        assert!(!table.contains("z"));
    }
}
