use std::net::SocketAddr;

use ahash::HashSet;

/// A forwarder offer: the endpoint that proxies, and the peer it
/// proxies for.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Relay {
    pub endpoint: SocketAddr,
    pub peer: String,
}

/// Forwarder cache and its blacklist.
///
/// The two structures move together: evicting on blacklist and checking
/// on insert must be one step, so the directory lives behind a single
/// lock and exposes only combined operations.
#[derive(Default)]
pub struct RelayDirectory {
    relays: Vec<Relay>,
    blacklist: HashSet<SocketAddr>,
}

impl RelayDirectory {
    /// Take a forwarder offer into the cache.
    ///
    /// Returns true when the offer was inserted; duplicates of an
    /// already cached (endpoint, peer) pair and offers for blacklisted
    /// endpoints are left out.
    pub fn offer(&mut self, relay: Relay) -> bool {
        if self.blacklist.contains(&relay.endpoint) {
            return false;
        }

        if self.relays.contains(&relay) {
            return false;
        }

        self.relays.push(relay);
        true
    }

    /// Ban a forwarder endpoint, dropping every cached entry using it.
    ///
    /// Returns false when the endpoint was already banned.
    pub fn blacklist(&mut self, endpoint: SocketAddr) -> bool {
        self.relays.retain(|relay| relay.endpoint != endpoint);
        self.blacklist.insert(endpoint)
    }

    pub fn clear_blacklist(&mut self) {
        self.blacklist.clear();
    }

    pub fn is_blacklisted(&self, endpoint: SocketAddr) -> bool {
        self.blacklist.contains(&endpoint)
    }

    pub fn snapshot(&self) -> Vec<Relay> {
        self.relays.clone()
    }
}
