use crate::ClientInner;

use std::{
    io,
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use bytes::BytesMut;
use codec::{MAX_DATAGRAM, message::Message};
use service::routing::Outbound;
use tokio::net::UdpSocket;

/// Consecutive read failures after which a router link is retired.
const MAX_READ_ERRORS: u32 = 1000;

/// Backoff before the handshake is replayed after an identity refusal.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// One UDP socket bound to one bootstrap router.
pub(crate) struct RouterLink {
    /// The configured router address, kept for logging and bookkeeping.
    pub router: String,
    socket: UdpSocket,
}

impl RouterLink {
    /// Bind an ephemeral local socket and connect it to the router.
    pub async fn connect(router: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(router).await?;

        Ok(Self {
            router: router.to_string(),
            socket,
        })
    }

    /// Encode and send one frame. Write failures are logged and
    /// reported but never retire the link; only read-side accounting
    /// does that.
    pub async fn send(&self, message: &Message) -> bool {
        let mut bytes = BytesMut::with_capacity(MAX_DATAGRAM);
        message.encode(&mut bytes);
        self.send_frame(&bytes).await
    }

    /// Send an already encoded frame.
    pub async fn send_frame(&self, bytes: &[u8]) -> bool {
        match self.socket.send(bytes).await {
            Ok(_) => {
                log::trace!("router send: size={}, router={}", bytes.len(), self.router);
                true
            }
            Err(e) => {
                log::warn!("router send error: router={}, err={}", self.router, e);
                false
            }
        }
    }
}

/// Receive loop of one router link.
///
/// Runs until shutdown, until the router closes the session, or until
/// the link accumulates [`MAX_READ_ERRORS`] consecutive read failures.
/// Whatever the exit path, the loop removes its own link from the live
/// set so the set only ever holds links that are being read.
pub(crate) async fn receive_loop(link: Arc<RouterLink>, client: Arc<ClientInner>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut read_errors: u32 = 0;

    loop {
        if client.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let size = tokio::select! {
            _ = client.closing.notified() => break,
            result = link.socket.recv(&mut buf) => match result {
                Ok(size) => {
                    read_errors = 0;
                    size
                }
                Err(e) => {
                    if client.shutdown.load(Ordering::SeqCst) {
                        break;
                    }

                    read_errors += 1;
                    if read_errors >= MAX_READ_ERRORS {
                        log::error!(
                            "router link retired after repeated read failures: router={}, err={}",
                            link.router,
                            e
                        );
                        break;
                    }

                    log::trace!("router recv error: router={}, err={}", link.router, e);
                    continue;
                }
            },
        };

        if client.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let message = match Message::decode(&buf[..size]) {
            Ok(message) => message,
            Err(e) => {
                log::warn!(
                    "discarding malformed datagram: router={}, size={}, err={}",
                    link.router,
                    size,
                    e
                );
                continue;
            }
        };

        log::trace!(
            "router recv: command={:?}, router={}",
            message.command,
            link.router
        );

        match client.service.route(message) {
            Some(Outbound::Reply(reply)) => {
                if !client.shutdown.load(Ordering::SeqCst) {
                    link.send(&reply).await;
                }
            }
            Some(Outbound::Broadcast(request)) => {
                client.send_all(&request).await;
            }
            Some(Outbound::Reconnect) => {
                log::warn!(
                    "identity refused, replaying handshake: router={}",
                    link.router
                );

                tokio::select! {
                    _ = client.closing.notified() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }

                if client.shutdown.load(Ordering::SeqCst) {
                    break;
                }

                link.send(&client.service.handshake()).await;
            }
            Some(Outbound::Disconnect) => {
                log::info!("router closed the session: router={}", link.router);
                break;
            }
            None => {}
        }
    }

    client.remove_link(&link);
    log::info!("router link closed: router={}", link.router);
}
