//! Launch configuration for an overlay node.

use std::net::Ipv4Addr;

use crate::node::PortSpec;

/// Everything the overlay daemon needs to join (or found) a room's virtual
/// network.
#[derive(Clone, Debug)]
pub struct OverlayConfig {
    /// Network name derived from the room code (`scaffolding-mc-AAAA-BBBB`).
    pub network_name: String,
    /// Network secret derived from the room code (`CCCC-DDDD`).
    pub network_secret: String,
    /// This node's overlay hostname. For the host this doubles as the
    /// discovery beacon: `scaffolding-mc-server-<port>`.
    pub hostname: String,
    /// Fixed virtual address; `None` requests one via overlay DHCP.
    pub virtual_ipv4: Option<Ipv4Addr>,
    pub is_host: bool,
    /// Inbound whitelists, replace semantics. Empty means deny all inbound.
    pub tcp_whitelist: Vec<PortSpec>,
    pub udp_whitelist: Vec<PortSpec>,
    /// Relay URLs, already validated by [`crate::relay::validate_relays`].
    pub relays: Vec<String>,
}
