use crate::{ClientHandler, Role, Service, relays::Relay, session::ConnectionState};

use std::{net::SocketAddr, time::Instant};

use codec::message::{Command, Message};

/// Effect a routed frame asks the socket shell to carry out.
///
/// The shell owns the sockets and the clock; routing only decides what
/// should happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send on the connection the frame arrived on.
    Reply(Message),
    /// Send on every live connection.
    Broadcast(Message),
    /// Identity was refused: back off, then replay the handshake on the
    /// connection the refusal arrived on.
    Reconnect,
    /// The router ended the session; retire the connection.
    Disconnect,
}

impl<T> Service<T>
where
    T: ClientHandler + Clone + 'static,
{
    /// Route one decoded inbound frame.
    ///
    /// Dispatch is keyed on the command and the configured role; a
    /// command with no handler in the current role is dropped and
    /// `None` returned.
    pub fn route(&self, message: Message) -> Option<Outbound> {
        match (message.command, self.role()) {
            (Command::Conn, _) => self.on_conn(&message),
            (Command::Find, _) => self.on_find(&message),
            (Command::Ping, _) => self.on_ping(),
            (Command::Dhcp, _) => self.on_dhcp(&message),
            (Command::Unknown, _) => self.on_unknown(),
            (Command::Error, _) => self.on_error(&message),
            (Command::Node, Role::Client) => self.on_node(&message),
            (Command::Cp, Role::Client) => self.on_cp(&message),
            (Command::Notify, Role::Client) => self.on_notify(&message),
            (Command::Stop, Role::Client) => self.on_stop(&message),
            (Command::RegCp, Role::ControlPeer) => self.on_regcp(),
            (command, role) => {
                log::debug!(
                    "command without a handler in this role dropped: command={:?}, role={:?}",
                    command,
                    role
                );
                None
            }
        }
    }

    /// Handshake reply. The identity is taken only while the session is
    /// still negotiating; replies in `Operating` are ignored.
    fn on_conn(&self, message: &Message) -> Option<Outbound> {
        let accepted = self.session().lock().accept_identity(&message.id);
        if accepted {
            self.handler().on_identity(&message.id);
        }

        None
    }

    /// Membership list. A populated list is reconciled and the
    /// resulting view published; an empty list clears the table without
    /// publishing.
    fn on_find(&self, message: &Message) -> Option<Outbound> {
        let ids: Vec<&str> = message
            .arguments
            .split(',')
            .filter(|id| !id.is_empty())
            .collect();

        if ids.is_empty() {
            self.peer_table().lock().clear();
            return None;
        }

        let snapshot = {
            let mut peers = self.peer_table().lock();
            peers.reconcile(&ids);
            peers.snapshot()
        };

        self.handler().on_peers(&snapshot);
        None
    }

    /// Endpoint list for one member. Tokens that are empty or do not
    /// parse are skipped; an answer for an identity that is not in the
    /// table is dropped.
    fn on_node(&self, message: &Message) -> Option<Outbound> {
        let endpoints: Vec<SocketAddr> = message
            .arguments
            .split('|')
            .filter(|token| !token.is_empty())
            .filter_map(|token| token.parse().ok())
            .collect();

        self.peer_table().lock().set_endpoints(&message.id, endpoints);
        None
    }

    /// Liveness probe: record the receive time and answer in kind.
    fn on_ping(&self) -> Option<Outbound> {
        self.session().lock().last_ping = Some(Instant::now());
        Some(Outbound::Reply(Message::new(Command::Ping, self.identity())))
    }

    /// Forwarder offer. Offers without an endpoint are ignored; every
    /// other offer is published, and cached unless the pair is already
    /// present or the endpoint is banned.
    fn on_cp(&self, message: &Message) -> Option<Outbound> {
        if message.query.is_empty() || message.query == "0" {
            return None;
        }

        let endpoint: SocketAddr = message.query.parse().ok()?;
        let relay = Relay {
            endpoint,
            peer: message.arguments.clone(),
        };

        self.relay_directory().lock().offer(relay.clone());
        self.handler().on_relay(&relay);
        None
    }

    /// The peer named in `Id` cannot reach us directly: ask the routers
    /// for a forwarder on its behalf.
    fn on_notify(&self, message: &Message) -> Option<Outbound> {
        Some(Outbound::Broadcast(self.relay_request(&message.id, &[])))
    }

    /// Drop one peer, or end the session when no peer is named.
    fn on_stop(&self, message: &Message) -> Option<Outbound> {
        if message.arguments.is_empty() || message.arguments == "0" {
            return Some(Outbound::Disconnect);
        }

        self.peer_table().lock().remove(&message.arguments);
        self.handler().on_peer_removed(&message.arguments);
        None
    }

    /// Address traffic: `"ok"` confirms an announcement, anything that
    /// parses as `ip/prefix` is an assignment.
    fn on_dhcp(&self, message: &Message) -> Option<Outbound> {
        if message.arguments == "ok" {
            return None;
        }

        if let Ok(address) = message.arguments.parse() {
            self.session().lock().address = Some(address);
            self.handler().on_address(address);
        }

        None
    }

    /// Forwarder registration acknowledged.
    fn on_regcp(&self) -> Option<Outbound> {
        self.session().lock().registered = true;
        None
    }

    /// The router refused our identity: fall back to `Reconnecting` and
    /// have the shell replay the handshake after a backoff.
    fn on_unknown(&self) -> Option<Outbound> {
        self.session().lock().state = ConnectionState::Reconnecting;
        Some(Outbound::Reconnect)
    }

    /// Named error report.
    fn on_error(&self, message: &Message) -> Option<Outbound> {
        self.handler().on_server_error(&message.arguments);
        None
    }
}
