//! ## Rendezvous protocol state
//!
//! Everything the client knows between datagrams lives here: the
//! session state machine, the peer table, the forwarder cache with its
//! blacklist, and the per-command routing that mutates them. The crate
//! is deliberately synchronous and socket-free: the async shell feeds
//! decoded frames into [`Service::route`] and carries out the
//! [`routing::Outbound`] effects it hands back, which keeps the whole
//! protocol testable without a network.

pub mod peers;
pub mod relays;
pub mod routing;
pub mod session;

use crate::{
    peers::{Peer, PeerTable},
    relays::{Relay, RelayDirectory},
    session::{ConnectionState, OverlayAddress, SessionState},
};

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use codec::message::{Command, Message};
use parking_lot::Mutex;

/// Version tag presented to the routers during the handshake.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Length of an assigned session identity.
pub const IDENTITY_LEN: usize = 36;

/// How this client participates in the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Role {
    /// Ordinary member: discovers peers and may consume forwarders.
    #[default]
    Client,
    /// Member that additionally registers itself as a forwarder and
    /// reports its load.
    ControlPeer,
}

/// Callbacks raised while routing inbound frames.
///
/// All methods default to no-ops so implementors only pick up what they
/// deliver onward.
pub trait ClientHandler: Send + Sync {
    /// The routers assigned a session identity.
    #[allow(unused_variables)]
    fn on_identity(&self, id: &str) {}

    /// The peer table was reconciled against a membership list; `peers`
    /// is the complete resulting view.
    #[allow(unused_variables)]
    fn on_peers(&self, peers: &[Peer]) {}

    /// A forwarder was offered. Raised for every offer, whether or not
    /// it entered the cache.
    #[allow(unused_variables)]
    fn on_relay(&self, relay: &Relay) {}

    /// A router asked for the named peer to be dropped. The peer table
    /// entry is already gone; the enclosing engine owns the rest.
    #[allow(unused_variables)]
    fn on_peer_removed(&self, id: &str) {}

    /// An overlay address was assigned.
    #[allow(unused_variables)]
    fn on_address(&self, address: OverlayAddress) {}

    /// A router reported a named error; `code` is the raw code tag.
    #[allow(unused_variables)]
    fn on_server_error(&self, code: &str) {}
}

pub struct ServiceOptions<T> {
    /// Swarm identifier shared by every member of the overlay.
    pub swarm: String,
    pub role: Role,
    /// Local data plane port, advertised during the handshake and in
    /// forwarder registrations.
    pub data_port: u16,
    /// Addresses this client publishes as directly reachable.
    pub advertised_ips: Vec<IpAddr>,
    pub handler: T,
}

/// Rendezvous protocol service.
#[derive(Clone)]
pub struct Service<T> {
    swarm: String,
    role: Role,
    data_port: u16,
    advertised_ips: Arc<Vec<IpAddr>>,
    session: Arc<Mutex<SessionState>>,
    peers: Arc<Mutex<PeerTable>>,
    relays: Arc<Mutex<RelayDirectory>>,
    handler: T,
}

impl<T> Service<T>
where
    T: ClientHandler + Clone + 'static,
{
    /// Create the protocol service in `Connecting` state with an
    /// unassigned identity.
    pub fn new(options: ServiceOptions<T>) -> Self {
        Self {
            swarm: options.swarm,
            role: options.role,
            data_port: options.data_port,
            advertised_ips: Arc::new(options.advertised_ips),
            session: Arc::new(Mutex::new(SessionState::default())),
            peers: Arc::new(Mutex::new(PeerTable::default())),
            relays: Arc::new(Mutex::new(RelayDirectory::default())),
            handler: options.handler,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn swarm(&self) -> &str {
        &self.swarm
    }

    pub fn identity(&self) -> String {
        self.session.lock().identity.clone()
    }

    /// Whether the routers have assigned an identity yet.
    pub fn assigned(&self) -> bool {
        self.session.lock().assigned()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.lock().state
    }

    pub fn last_ping(&self) -> Option<Instant> {
        self.session.lock().last_ping
    }

    pub fn address(&self) -> Option<OverlayAddress> {
        self.session.lock().address
    }

    pub fn registered(&self) -> bool {
        self.session.lock().registered
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.lock().snapshot()
    }

    pub fn relays(&self) -> Vec<Relay> {
        self.relays.lock().snapshot()
    }

    /// Every identity any router ever mentioned, first seen first.
    pub fn catch_log(&self) -> Vec<String> {
        self.peers.lock().catch_log().to_vec()
    }

    /// Drop one member at the engine's request.
    ///
    /// Only the local view is touched and nothing is echoed back: the
    /// engine already knows, and the routers are not told either, their
    /// next membership list is authoritative anyway.
    pub fn drop_peer(&self, id: &str) -> bool {
        self.peers.lock().remove(id)
    }

    /// Ban a forwarder endpoint, evicting it from the cache.
    pub fn blacklist(&self, endpoint: SocketAddr) -> bool {
        self.relays.lock().blacklist(endpoint)
    }

    pub fn clear_blacklist(&self) {
        self.relays.lock().clear_blacklist();
    }

    pub(crate) fn handler(&self) -> &T {
        &self.handler
    }

    pub(crate) fn session(&self) -> &Mutex<SessionState> {
        &self.session
    }

    pub(crate) fn peer_table(&self) -> &Mutex<PeerTable> {
        &self.peers
    }

    pub(crate) fn relay_directory(&self) -> &Mutex<RelayDirectory> {
        &self.relays
    }
}

/// Outbound request builders.
///
/// Each builder stamps the frame with the current identity, so a
/// request composed after assignment is attributable.
impl<T> Service<T>
where
    T: ClientHandler + Clone + 'static,
{
    /// Opening handshake: identity `"0"`, version tag in the query, the
    /// local data port and every advertised address pipe-joined in the
    /// arguments, the swarm identifier in the payload.
    pub fn handshake(&self) -> Message {
        let mut arguments = self.data_port.to_string();
        for ip in self.advertised_ips.iter() {
            arguments.push('|');
            arguments.push_str(&ip.to_string());
        }

        let mut message = Message::new(Command::Conn, "0");
        message.query = PROTOCOL_VERSION.to_string();
        message.arguments = arguments;
        message.payload = self.swarm.clone();
        message
    }

    /// Ask for the current membership of the swarm.
    pub fn find_request(&self) -> Message {
        let mut message = Message::new(Command::Find, self.identity());
        message.query = self.swarm.clone();
        message
    }

    /// Ask for the transport endpoints of one member.
    pub fn endpoints_request(&self, peer: &str) -> Message {
        let mut message = Message::new(Command::Node, self.identity());
        message.query = peer.to_string();
        message
    }

    /// Ask for a forwarder serving `peer`, excluding endpoints already
    /// known to be dead.
    pub fn relay_request(&self, peer: &str, omit: &[SocketAddr]) -> Message {
        let mut message = Message::new(Command::Cp, self.identity());
        message.arguments = peer.to_string();
        message.query = if omit.is_empty() {
            "0".to_string()
        } else {
            omit.iter()
                .map(|endpoint| endpoint.to_string())
                .collect::<Vec<_>>()
                .join("|")
        };
        message
    }

    /// Report how many sessions this forwarder is carrying.
    pub fn load_report(&self, count: u64) -> Message {
        let mut message = Message::new(Command::Load, self.identity());
        message.arguments = count.to_string();
        message
    }

    /// Ask the routers for an overlay address.
    pub fn address_request(&self) -> Message {
        Message::new(Command::Dhcp, self.identity())
    }

    /// Announce the overlay address this client already holds.
    pub fn address_announce(&self, address: OverlayAddress) -> Message {
        let mut message = Message::new(Command::Dhcp, self.identity());
        message.arguments = address.to_string();
        message
    }

    /// Register this client as a forwarder.
    pub fn register_request(&self) -> Message {
        let mut message = Message::new(Command::RegCp, self.identity());
        message.arguments = self.data_port.to_string();
        message
    }

    /// Closing frame sent to every router at shutdown.
    pub fn stop_request(&self) -> Message {
        let mut message = Message::new(Command::Stop, self.identity());
        message.arguments = "0".to_string();
        message
    }
}
