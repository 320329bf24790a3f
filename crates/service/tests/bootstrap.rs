use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use codec::message::{Command, Message};
use rendezvous_client_service::{
    ClientHandler, IDENTITY_LEN, PROTOCOL_VERSION, Role, Service, ServiceOptions,
    peers::Peer,
    relays::Relay,
    routing::Outbound,
    session::{ConnectionState, OverlayAddress},
};

const IDENTITY: &str = "550e8400-e29b-41d4-a716-446655440000";

#[derive(Default)]
struct Events {
    identities: Vec<String>,
    snapshots: Vec<Vec<Peer>>,
    relays: Vec<Relay>,
    removals: Vec<String>,
    addresses: Vec<OverlayAddress>,
    errors: Vec<String>,
}

#[derive(Default, Clone)]
struct Recorder(Arc<Mutex<Events>>);

impl Recorder {
    fn events(&self) -> std::sync::MutexGuard<'_, Events> {
        self.0.lock().unwrap()
    }
}

impl ClientHandler for Recorder {
    fn on_identity(&self, id: &str) {
        self.events().identities.push(id.to_string());
    }

    fn on_peers(&self, peers: &[Peer]) {
        self.events().snapshots.push(peers.to_vec());
    }

    fn on_relay(&self, relay: &Relay) {
        self.events().relays.push(relay.clone());
    }

    fn on_peer_removed(&self, id: &str) {
        self.events().removals.push(id.to_string());
    }

    fn on_address(&self, address: OverlayAddress) {
        self.events().addresses.push(address);
    }

    fn on_server_error(&self, code: &str) {
        self.events().errors.push(code.to_string());
    }
}

fn fixture(role: Role) -> (Service<Recorder>, Recorder) {
    let recorder = Recorder::default();
    let service = Service::new(ServiceOptions {
        swarm: "net-a".to_string(),
        role,
        data_port: 4242,
        advertised_ips: vec!["10.0.0.15".parse().unwrap(), "192.168.1.2".parse().unwrap()],
        handler: recorder.clone(),
    });

    (service, recorder)
}

fn inbound(command: Command, id: &str, query: &str, arguments: &str) -> Message {
    let mut message = Message::new(command, id);
    message.query = query.to_string();
    message.arguments = arguments.to_string();
    message
}

#[test]
fn test_handshake_acceptance() -> Result<()> {
    let (service, recorder) = fixture(Role::Client);
    assert_eq!(service.state(), ConnectionState::Connecting);
    assert_eq!(service.identity(), "0");

    // Unusable identities leave the session negotiating.
    for id in ["", "0", "not-a-uuid"] {
        assert!(service.route(inbound(Command::Conn, id, "", "")).is_none());
        assert_eq!(service.state(), ConnectionState::Connecting);
    }

    service.route(inbound(Command::Conn, IDENTITY, "", ""));
    assert_eq!(service.state(), ConnectionState::Operating);
    assert_eq!(service.identity(), IDENTITY);
    assert!(service.assigned());
    assert_eq!(recorder.events().identities, [IDENTITY]);

    // Once operating, later handshake replies change nothing.
    service.route(inbound(
        Command::Conn,
        "650e8400-e29b-41d4-a716-446655440000",
        "",
        "",
    ));
    assert_eq!(service.identity(), IDENTITY);
    assert_eq!(recorder.events().identities.len(), 1);

    Ok(())
}

#[test]
fn test_identity_refusal() -> Result<()> {
    let (service, _) = fixture(Role::Client);

    let effect = service.route(inbound(Command::Unknown, "", "", ""));
    assert_eq!(effect, Some(Outbound::Reconnect));
    assert_eq!(service.state(), ConnectionState::Reconnecting);

    // The replayed handshake is identical to the first one.
    let handshake = service.handshake();
    assert_eq!(handshake.id, "0");
    assert_eq!(handshake.query, PROTOCOL_VERSION);
    assert_eq!(handshake.arguments, "4242|10.0.0.15|192.168.1.2");
    assert_eq!(handshake.payload, "net-a");
    assert_eq!(handshake, service.handshake());

    // And its reply is accepted from the refused state.
    service.route(inbound(Command::Conn, IDENTITY, "", ""));
    assert_eq!(service.state(), ConnectionState::Operating);

    Ok(())
}

#[test]
fn test_membership_reconciliation() -> Result<()> {
    let (service, recorder) = fixture(Role::Client);

    service.route(inbound(Command::Find, IDENTITY, "", "a,b"));
    service.route(inbound(Command::Find, IDENTITY, "", "b,c,d"));

    let ids: Vec<String> = service.peers().into_iter().map(|peer| peer.id).collect();
    assert_eq!(ids, ["b", "c", "d"]);

    {
        let events = recorder.events();
        assert_eq!(events.snapshots.len(), 2);
        let published: Vec<&str> = events.snapshots[1]
            .iter()
            .map(|peer| peer.id.as_str())
            .collect();
        assert_eq!(published, ["b", "c", "d"]);
    }

    // The same list again leaves the table untouched.
    let before = service.peers();
    service.route(inbound(Command::Find, IDENTITY, "", "b,c,d"));
    assert_eq!(service.peers(), before);

    // An empty list clears the table and publishes nothing.
    service.route(inbound(Command::Find, IDENTITY, "", ""));
    assert!(service.peers().is_empty());
    assert_eq!(recorder.events().snapshots.len(), 3);

    assert_eq!(service.catch_log(), ["a", "b", "c", "d"]);
    Ok(())
}

#[test]
fn test_endpoint_learning() -> Result<()> {
    let (service, _) = fixture(Role::Client);
    service.route(inbound(Command::Find, IDENTITY, "", "b"));

    service.route(inbound(
        Command::Node,
        "b",
        "",
        "1.2.3.4:5000|5.6.7.8:5000",
    ));

    let peers = service.peers();
    let expected: Vec<SocketAddr> = vec![
        "1.2.3.4:5000".parse().unwrap(),
        "5.6.7.8:5000".parse().unwrap(),
    ];
    assert_eq!(peers[0].endpoints, expected);

    // Empty and unparsable tokens are skipped.
    service.route(inbound(Command::Node, "b", "", "|garbage|1.2.3.4:5000||"));
    assert_eq!(service.peers()[0].endpoints.len(), 1);

    // An answer for an unknown identity is dropped without effect.
    assert!(
        service
            .route(inbound(Command::Node, "z", "", "1.2.3.4:5000"))
            .is_none()
    );
    assert_eq!(service.peers().len(), 1);

    Ok(())
}

#[test]
fn test_relay_offers_and_blacklist() -> Result<()> {
    let endpoint: SocketAddr = "9.9.9.9:7000".parse()?;
    let (service, recorder) = fixture(Role::Client);

    // Offers without an endpoint are ignored outright.
    service.route(inbound(Command::Cp, "0", "", "b"));
    service.route(inbound(Command::Cp, "0", "0", "b"));
    assert!(recorder.events().relays.is_empty());

    service.route(inbound(Command::Cp, "0", "9.9.9.9:7000", "b"));
    assert_eq!(service.relays(), [Relay {
        endpoint,
        peer: "b".to_string()
    }]);
    assert_eq!(recorder.events().relays.len(), 1);

    // A duplicate pair is published again but cached once.
    service.route(inbound(Command::Cp, "0", "9.9.9.9:7000", "b"));
    assert_eq!(service.relays().len(), 1);
    assert_eq!(recorder.events().relays.len(), 2);

    // Banning empties the cache and keeps the offer out...
    assert!(service.blacklist(endpoint));
    assert!(service.relays().is_empty());
    service.route(inbound(Command::Cp, "0", "9.9.9.9:7000", "b"));
    assert!(service.relays().is_empty());

    // ...until the ban is lifted.
    service.clear_blacklist();
    service.route(inbound(Command::Cp, "0", "9.9.9.9:7000", "b"));
    assert_eq!(service.relays().len(), 1);

    Ok(())
}

#[test]
fn test_notify_requests_a_forwarder() -> Result<()> {
    let (service, _) = fixture(Role::Client);
    service.route(inbound(Command::Conn, IDENTITY, "", ""));

    let effect = service.route(inbound(Command::Notify, "b", "", ""));
    let Some(Outbound::Broadcast(request)) = effect else {
        anyhow::bail!("expected a broadcast effect, got {:?}", effect);
    };

    assert_eq!(request.command, Command::Cp);
    assert_eq!(request.id, IDENTITY);
    assert_eq!(request.arguments, "b");
    assert_eq!(request.query, "0");

    Ok(())
}

#[test]
fn test_ping_is_answered() -> Result<()> {
    let (service, _) = fixture(Role::Client);
    assert!(service.last_ping().is_none());

    let effect = service.route(inbound(Command::Ping, "", "", ""));
    let Some(Outbound::Reply(reply)) = effect else {
        anyhow::bail!("expected a reply effect, got {:?}", effect);
    };

    assert_eq!(reply.command, Command::Ping);
    assert!(service.last_ping().is_some());

    Ok(())
}

#[test]
fn test_stop_semantics() -> Result<()> {
    let (service, recorder) = fixture(Role::Client);
    service.route(inbound(Command::Find, IDENTITY, "", "b,c"));

    // A named identity is dropped and the removal forwarded.
    assert!(
        service
            .route(inbound(Command::Stop, "", "", "b"))
            .is_none()
    );
    assert_eq!(service.peers().len(), 1);
    assert_eq!(recorder.events().removals, ["b"]);

    // No identity means the router ended the session.
    assert_eq!(
        service.route(inbound(Command::Stop, "", "", "0")),
        Some(Outbound::Disconnect)
    );
    assert_eq!(
        service.route(inbound(Command::Stop, "", "", "")),
        Some(Outbound::Disconnect)
    );

    Ok(())
}

#[test]
fn test_engine_driven_removal() -> Result<()> {
    let (service, recorder) = fixture(Role::Client);
    service.route(inbound(Command::Find, IDENTITY, "", "b,c"));

    assert!(service.drop_peer("b"));
    assert!(!service.drop_peer("z"));

    let ids: Vec<String> = service.peers().into_iter().map(|peer| peer.id).collect();
    assert_eq!(ids, ["c"]);

    // The engine initiated this, so nothing is echoed back to it.
    assert!(recorder.events().removals.is_empty());
    assert_eq!(recorder.events().snapshots.len(), 1);

    Ok(())
}

#[test]
fn test_address_assignment() -> Result<()> {
    let (service, recorder) = fixture(Role::Client);

    service.route(inbound(Command::Dhcp, "", "", "ok"));
    assert!(service.address().is_none());

    service.route(inbound(Command::Dhcp, "", "", "10.11.12.13/24"));
    let address = service.address().unwrap();
    assert_eq!(address.to_string(), "10.11.12.13/24");
    assert_eq!(recorder.events().addresses, [address]);

    // Unparsable assignments are dropped.
    service.route(inbound(Command::Dhcp, "", "", "not-an-address"));
    assert_eq!(service.address(), Some(address));

    Ok(())
}

#[test]
fn test_role_dispatch() -> Result<()> {
    let (service, recorder) = fixture(Role::ControlPeer);

    // A control peer leaves the client-only commands unhandled.
    service.route(inbound(Command::Cp, "0", "9.9.9.9:7000", "b"));
    assert!(service.relays().is_empty());
    assert!(recorder.events().relays.is_empty());
    assert!(
        service
            .route(inbound(Command::Stop, "", "", "0"))
            .is_none()
    );
    assert!(
        service
            .route(inbound(Command::Notify, "b", "", ""))
            .is_none()
    );

    // But it does handle registration acknowledgements.
    assert!(!service.registered());
    service.route(inbound(Command::RegCp, "", "", ""));
    assert!(service.registered());

    // And a client never sees one.
    let (client, _) = fixture(Role::Client);
    client.route(inbound(Command::RegCp, "", "", ""));
    assert!(!client.registered());

    Ok(())
}

#[test]
fn test_server_errors_are_surfaced() -> Result<()> {
    let (service, recorder) = fixture(Role::Client);

    service.route(inbound(Command::Error, "", "", "access_denied"));
    service.route(inbound(Command::Error, "", "", "out_of_cheese"));
    assert_eq!(recorder.events().errors, ["access_denied", "out_of_cheese"]);

    Ok(())
}

#[test]
fn test_request_builders() -> Result<()> {
    let (service, _) = fixture(Role::ControlPeer);
    service.route(inbound(Command::Conn, IDENTITY, "", ""));
    assert_eq!(IDENTITY.len(), IDENTITY_LEN);

    let find = service.find_request();
    assert_eq!((find.command, find.query.as_str()), (Command::Find, "net-a"));
    assert_eq!(find.id, IDENTITY);

    let node = service.endpoints_request("b");
    assert_eq!((node.command, node.query.as_str()), (Command::Node, "b"));

    let omit: Vec<SocketAddr> =
        vec!["9.9.9.9:7000".parse().unwrap(), "8.8.8.8:7000".parse().unwrap()];
    let relay = service.relay_request("b", &omit);
    assert_eq!(relay.arguments, "b");
    assert_eq!(relay.query, "9.9.9.9:7000|8.8.8.8:7000");

    let load = service.load_report(17);
    assert_eq!((load.command, load.arguments.as_str()), (Command::Load, "17"));

    let register = service.register_request();
    assert_eq!(register.command, Command::RegCp);
    assert_eq!(register.arguments, "4242");

    let request = service.address_request();
    assert_eq!((request.command, request.arguments.as_str()), (Command::Dhcp, ""));

    let announce = service.address_announce("10.11.12.13/24".parse().unwrap());
    assert_eq!(announce.arguments, "10.11.12.13/24");

    let stop = service.stop_request();
    assert_eq!((stop.command, stop.arguments.as_str()), (Command::Stop, "0"));

    Ok(())
}
