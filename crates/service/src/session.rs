use crate::IDENTITY_LEN;

use std::{net::Ipv4Addr, str::FromStr, time::Instant};

/// Lifecycle of the conversation with the bootstrap routers.
///
/// Every fresh socket starts out `Connecting`. A valid handshake reply
/// moves the session to `Operating`; an identity refusal moves it to
/// `Reconnecting` until the replayed handshake is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Operating,
    Reconnecting,
}

/// An address inside the overlay, `ip/prefix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayAddress {
    pub ip: Ipv4Addr,
    pub prefix: u8,
}

impl FromStr for OverlayAddress {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (ip, prefix) = value.split_once('/').ok_or(())?;
        let prefix = prefix.parse().map_err(|_| ())?;
        if prefix > 32 {
            return Err(());
        }

        Ok(Self {
            ip: ip.parse().map_err(|_| ())?,
            prefix,
        })
    }
}

impl std::fmt::Display for OverlayAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix)
    }
}

/// Mutable session half of the client state.
#[derive(Debug)]
pub struct SessionState {
    pub state: ConnectionState,
    /// Assigned identity, `"0"` until the routers hand one out.
    pub identity: String,
    pub assigned_at: Option<Instant>,
    /// Overlay address learned through an address assignment.
    pub address: Option<OverlayAddress>,
    /// Receive time of the latest liveness probe.
    pub last_ping: Option<Instant>,
    /// Set once a forwarder registration has been acknowledged.
    pub registered: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            state: ConnectionState::default(),
            identity: "0".to_string(),
            assigned_at: None,
            address: None,
            last_ping: None,
            registered: false,
        }
    }
}

impl SessionState {
    /// Whether an identity has been assigned to this session.
    pub fn assigned(&self) -> bool {
        self.identity.len() == IDENTITY_LEN
    }

    /// Accept a handshake reply.
    ///
    /// An identity is only taken while `Connecting` or `Reconnecting`;
    /// a reply arriving in `Operating` never reassigns the session. The
    /// presented identity must have the canonical length, in particular
    /// the unassigned markers `""` and `"0"` are rejected.
    pub fn accept_identity(&mut self, id: &str) -> bool {
        if self.state == ConnectionState::Operating {
            return false;
        }

        if id.len() != IDENTITY_LEN {
            return false;
        }

        self.identity = id.to_string();
        self.assigned_at = Some(Instant::now());
        self.state = ConnectionState::Operating;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rules() {
        let uuid = "550e8400-e29b-41d4-a716-446655440000";

        let mut session = SessionState::default();
        assert!(!session.accept_identity(""));
        assert!(!session.accept_identity("0"));
        assert!(!session.accept_identity("short"));
        assert_eq!(session.state, ConnectionState::Connecting);
        assert!(!session.assigned());

        assert!(session.accept_identity(uuid));
        assert_eq!(session.state, ConnectionState::Operating);
        assert!(session.assigned());

        // Operating sessions keep their identity.
        assert!(!session.accept_identity("650e8400-e29b-41d4-a716-446655440000"));
        assert_eq!(session.identity, uuid);

        // After a refusal the replayed handshake may assign a new one.
        session.state = ConnectionState::Reconnecting;
        assert!(session.accept_identity("650e8400-e29b-41d4-a716-446655440000"));
    }

    #[test]
    fn overlay_address_parsing() {
        let address: OverlayAddress = "10.11.12.13/24".parse().unwrap();
        assert_eq!(address.ip, Ipv4Addr::new(10, 11, 12, 13));
        assert_eq!(address.prefix, 24);
        assert_eq!(address.to_string(), "10.11.12.13/24");

        assert!("10.11.12.13".parse::<OverlayAddress>().is_err());
        assert!("10.11.12.13/33".parse::<OverlayAddress>().is_err());
        assert!("ok".parse::<OverlayAddress>().is_err());
    }
}
