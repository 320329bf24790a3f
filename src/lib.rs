//! ## Rendezvous and peer discovery client
//!
//! Joins a logical overlay network ("swarm") through one or more
//! bootstrap routers, learns which other members share the same swarm
//! identifier, resolves their transport endpoints, and obtains
//! forwarder endpoints for members that cannot be reached directly.
//! Discovered peers and forwarders are handed to the enclosing engine
//! over channels; the data plane between peers is the engine's problem.
//!
//! The client speaks a small UDP request/response dialect with every
//! configured router at once: requests fan out over all live router
//! links, answers are routed per command, and periodic tasks keep the
//! membership view fresh. See [`Client`] for the operations.

pub mod config;

mod connection;
mod observer;

pub use codec::message::{Command, Message};
pub use observer::Outputs;
pub use service::{
    IDENTITY_LEN, PROTOCOL_VERSION, Role,
    peers::Peer,
    relays::Relay,
    session::{ConnectionState, OverlayAddress},
};

use crate::{
    config::Config,
    connection::{RouterLink, receive_loop},
    observer::Observer,
};

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::BytesMut;
use parking_lot::Mutex;
use service::{Service, ServiceOptions};
use tokio::sync::{Notify, watch};

/// Interval between unsolicited membership refreshes.
const REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// How long initialization waits for an identity before returning.
const IDENTITY_WAIT: Duration = Duration::from_secs(3);

/// Poll interval while a forwarder registration waits for an identity.
const REGISTER_POLL: Duration = Duration::from_secs(1);

pub(crate) struct ClientInner {
    pub service: Service<Observer>,
    /// Links currently being read. A link is in this set exactly while
    /// its receive loop runs; the loop removes it on exit.
    pub links: Mutex<Vec<Arc<RouterLink>>>,
    /// Routers that could not be connected or handshaked, append-only.
    pub failed: Mutex<Vec<String>>,
    pub shutdown: AtomicBool,
    pub closing: Notify,
}

impl ClientInner {
    /// Encode once and send to every live router link.
    ///
    /// Partial failure is fine: a router that misses a frame catches up
    /// through the periodic refresh traffic.
    pub async fn send_all(&self, message: &Message) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }

        let mut bytes = BytesMut::with_capacity(codec::MAX_DATAGRAM);
        message.encode(&mut bytes);

        let links: Vec<Arc<RouterLink>> = self.links.lock().clone();
        for link in links {
            link.send_frame(&bytes).await;
        }
    }

    pub fn remove_link(&self, link: &Arc<RouterLink>) {
        self.links.lock().retain(|entry| !Arc::ptr_eq(entry, link));
    }
}

/// Handle on a running rendezvous client.
///
/// Constructed with [`Client::connect`]; all discovery results arrive
/// on the [`Outputs`] channels supplied there.
pub struct Client {
    inner: Arc<ClientInner>,
    identity: watch::Receiver<String>,
}

impl Client {
    /// Connect and handshake every configured router.
    ///
    /// Routers that cannot be reached are recorded and skipped; the
    /// call fails only when not a single link could be established.
    /// After the handshakes are out this waits up to three seconds for
    /// an identity to be assigned, then returns either way. Operations
    /// invoked before assignment are simply attributed to `"0"` and
    /// will be answered once the routers accept the client.
    pub async fn connect(config: Config, outputs: Outputs) -> anyhow::Result<Client> {
        let (identity_tx, identity_rx) = watch::channel(String::new());
        let Outputs {
            peers,
            relays,
            removals,
            drop_requests,
        } = outputs;

        let service = Service::new(ServiceOptions {
            swarm: config.swarm.clone(),
            role: config.role,
            data_port: config.data_port,
            advertised_ips: config.advertised_ips.clone(),
            handler: Observer::new(peers, relays, removals, identity_tx),
        });

        let inner = Arc::new(ClientInner {
            service,
            links: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            closing: Notify::new(),
        });

        for router in config.router_list() {
            match RouterLink::connect(&router).await {
                Ok(link) => {
                    let link = Arc::new(link);
                    if !link.send(&inner.service.handshake()).await {
                        inner.failed.lock().push(router);
                        continue;
                    }

                    log::info!("bootstrap router connected: router={}", router);
                    inner.links.lock().push(link.clone());
                    tokio::spawn(receive_loop(link, inner.clone()));
                }
                Err(e) => {
                    log::warn!("bootstrap router unreachable: router={}, err={}", router, e);
                    inner.failed.lock().push(router);
                }
            }
        }

        if inner.links.lock().is_empty() {
            anyhow::bail!("no bootstrap router reachable: routers={}", config.routers);
        }

        // Refresh the membership view for as long as the client lives.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH_INTERVAL);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };

                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }

                log::debug!("periodic swarm refresh");
                inner.send_all(&inner.service.find_request()).await;
            }
        });

        // Drain the engine's removal queue. The signal is only
        // forwarded into the local peer table; the routers are not
        // involved.
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut drop_requests = drop_requests;
            while let Some(id) = drop_requests.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };

                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }

                log::info!("peer dropped by engine: id={}", id);
                inner.service.drop_peer(&id);
            }
        });

        let client = Client {
            inner,
            identity: identity_rx,
        };

        if !client.wait_for_identity(IDENTITY_WAIT).await {
            log::warn!("no identity assigned yet, continuing unassigned");
        }

        Ok(client)
    }

    /// Wait until the routers assign an identity, up to `wait`.
    pub async fn wait_for_identity(&self, wait: Duration) -> bool {
        let mut identity = self.identity.clone();
        let assigned = identity.wait_for(|id| id.len() == IDENTITY_LEN);
        match tokio::time::timeout(wait, assigned).await {
            Ok(result) => result.is_ok(),
            Err(_) => self.inner.service.assigned(),
        }
    }

    /// Ask every router for the transport endpoints of one member.
    pub async fn request_peer_endpoints(&self, peer: &str) {
        self.inner
            .send_all(&self.inner.service.endpoints_request(peer))
            .await;
    }

    /// Ask every router for the current swarm membership right now,
    /// ahead of the periodic refresh.
    pub async fn send_update_request(&self) {
        self.inner.send_all(&self.inner.service.find_request()).await;
    }

    /// Ask for a forwarder serving `peer`. Endpoints in `omit` are
    /// excluded, so known-dead forwarders are not offered again.
    pub async fn request_control_peer(&self, peer: &str, omit: &[SocketAddr]) {
        self.inner
            .send_all(&self.inner.service.relay_request(peer, omit))
            .await;
    }

    /// Report the number of sessions this forwarder carries (control
    /// peer role).
    pub async fn report_control_peer_load(&self, count: u64) {
        self.inner
            .send_all(&self.inner.service.load_report(count))
            .await;
    }

    /// Ask the routers to assign an overlay address.
    pub async fn request_address(&self) {
        self.inner.send_all(&self.inner.service.address_request()).await;
    }

    /// Announce the overlay address this client already holds.
    pub async fn announce_address(&self, ip: Ipv4Addr, prefix: u8) {
        let address = OverlayAddress {
            ip,
            prefix,
        };

        self.inner
            .send_all(&self.inner.service.address_announce(address))
            .await;
    }

    /// Register this client as a forwarder (control peer role).
    ///
    /// Registration is only meaningful once an identity is assigned, so
    /// this waits for one, checking once per second, before sending.
    pub async fn register_control_peer(&self) {
        loop {
            if self.inner.shutdown.load(Ordering::SeqCst) {
                return;
            }

            if self.inner.service.assigned() {
                break;
            }

            tokio::time::sleep(REGISTER_POLL).await;
        }

        self.inner
            .send_all(&self.inner.service.register_request())
            .await;
    }

    /// Ban a forwarder endpoint: evicted from the cache, refused on
    /// re-offer, until [`Client::clear_blacklist`].
    pub fn blacklist_relay(&self, endpoint: SocketAddr) -> bool {
        self.inner.service.blacklist(endpoint)
    }

    pub fn clear_blacklist(&self) {
        self.inner.service.clear_blacklist();
    }

    /// Shut the client down: one closing frame per router, then every
    /// receive loop exits on its next iteration. Idempotent.
    pub async fn stop(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        log::info!("client stopping");

        let mut bytes = BytesMut::with_capacity(codec::MAX_DATAGRAM);
        self.inner.service.stop_request().encode(&mut bytes);

        let links: Vec<Arc<RouterLink>> = self.inner.links.lock().clone();
        for link in links {
            link.send_frame(&bytes).await;
        }

        self.inner.closing.notify_waiters();
    }

    /// The assigned session identity, `"0"` before assignment.
    pub fn identity(&self) -> String {
        self.inner.service.identity()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.service.state()
    }

    /// Receive time of the latest router liveness probe. Staleness here
    /// is the engine's signal that the control plane went quiet.
    pub fn last_ping(&self) -> Option<Instant> {
        self.inner.service.last_ping()
    }

    /// The overlay address assigned through [`Client::request_address`],
    /// if any arrived yet.
    pub fn address(&self) -> Option<OverlayAddress> {
        self.inner.service.address()
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.inner.service.peers()
    }

    pub fn relays(&self) -> Vec<Relay> {
        self.inner.service.relays()
    }

    /// Every identity any router ever mentioned, first seen first.
    pub fn catch_log(&self) -> Vec<String> {
        self.inner.service.catch_log()
    }

    /// Routers that failed to connect or handshake during
    /// initialization.
    pub fn failed_routers(&self) -> Vec<String> {
        self.inner.failed.lock().clone()
    }

    /// Number of router links currently being read.
    pub fn live_links(&self) -> usize {
        self.inner.links.lock().len()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Last resort for a client dropped without stop(): no closing
        // frames, but the receive loops must not outlive the handle.
        if !self.inner.shutdown.swap(true, Ordering::SeqCst) {
            self.inner.closing.notify_waiters();
        }
    }
}
