use codec::message::ServerError;
use service::{
    ClientHandler,
    peers::Peer,
    relays::Relay,
    session::OverlayAddress,
};
use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender},
    watch,
};

/// Channel endpoints shared with the enclosing engine.
///
/// All of them are unbounded: the control plane must never stall behind
/// a slow consumer, and the volume is bounded by router chatter anyway.
pub struct Outputs {
    /// Complete peer view after every membership reconciliation.
    pub peers: UnboundedSender<Vec<Peer>>,
    /// Every forwarder offer, in arrival order.
    pub relays: UnboundedSender<Relay>,
    /// Identities the routers asked to drop.
    pub removals: UnboundedSender<String>,
    /// Caller-supplied queue of identities the engine wants dropped.
    /// The client drains it and removes each named entry from its peer
    /// table; no router is told, the signal stays local.
    pub drop_requests: UnboundedReceiver<String>,
}

/// Bridges protocol callbacks onto the engine-facing channels.
///
/// Send errors are deliberately ignored: a consumer that went away must
/// not take the control plane down with it.
#[derive(Clone)]
pub struct Observer {
    peers: UnboundedSender<Vec<Peer>>,
    relays: UnboundedSender<Relay>,
    removals: UnboundedSender<String>,
    identity: watch::Sender<String>,
}

impl Observer {
    pub(crate) fn new(
        peers: UnboundedSender<Vec<Peer>>,
        relays: UnboundedSender<Relay>,
        removals: UnboundedSender<String>,
        identity: watch::Sender<String>,
    ) -> Self {
        Self {
            peers,
            relays,
            removals,
            identity,
        }
    }
}

impl ClientHandler for Observer {
    fn on_identity(&self, id: &str) {
        log::info!("session identity assigned: id={}", id);
        let _ = self.identity.send(id.to_string());
    }

    fn on_peers(&self, peers: &[Peer]) {
        log::debug!("swarm membership update: peers={}", peers.len());
        let _ = self.peers.send(peers.to_vec());
    }

    fn on_relay(&self, relay: &Relay) {
        log::info!(
            "forwarder offered: endpoint={}, peer={}",
            relay.endpoint,
            relay.peer
        );

        let _ = self.relays.send(relay.clone());
    }

    fn on_peer_removed(&self, id: &str) {
        log::info!("peer dropped by router: id={}", id);
        let _ = self.removals.send(id.to_string());
    }

    fn on_address(&self, address: OverlayAddress) {
        log::info!("overlay address assigned: address={}", address);
    }

    fn on_server_error(&self, code: &str) {
        match ServerError::from_tag(code) {
            Some(error) => log::error!("router error: {}", error),
            None => log::error!("router error: unrecognized code {:?}", code),
        }
    }
}
