use std::net::IpAddr;

use serde::Deserialize;
use service::Role;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// bootstrap router list
    ///
    /// comma separated `host:port` entries. every router is connected
    /// and handshaked during initialization; routers that cannot be
    /// reached are recorded and skipped, the client operates over the
    /// remainder.
    #[serde(default = "Config::routers")]
    pub routers: String,

    /// swarm identifier
    ///
    /// opaque string shared by every member of one overlay network.
    /// the routers use it to select which peer set this client is told
    /// about, so two clients only see each other when they present the
    /// same identifier.
    #[serde(default)]
    pub swarm: String,

    /// local data plane port
    ///
    /// the UDP port the enclosing engine exchanges peer traffic on.
    /// advertised during the handshake and used when registering as a
    /// forwarder.
    #[serde(default = "Config::data_port")]
    pub data_port: u16,

    /// advertised addresses
    ///
    /// addresses published to the routers as directly reachable ways
    /// into this client. usually the local interface addresses; leave
    /// empty when only the router-observed source address should count.
    #[serde(default)]
    pub advertised_ips: Vec<IpAddr>,

    /// operating role
    ///
    /// an ordinary client discovers peers and consumes forwarders; a
    /// control peer additionally registers itself as a forwarder and
    /// reports its load.
    #[serde(default)]
    pub role: Role,
}

impl Config {
    fn routers() -> String {
        "dht1.subut.ai:6881".to_string()
    }

    fn data_port() -> u16 {
        6881
    }

    /// The configured router list, split and trimmed.
    pub fn router_list(&self) -> Vec<String> {
        self.routers
            .split(',')
            .map(str::trim)
            .filter(|router| !router.is_empty())
            .map(String::from)
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routers: Self::routers(),
            swarm: String::new(),
            data_port: Self::data_port(),
            advertised_ips: Vec::new(),
            role: Role::default(),
        }
    }
}
