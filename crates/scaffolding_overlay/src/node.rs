//! The overlay seam.
//!
//! The controller never talks to the overlay directly; it holds a
//! `Box<dyn NetworkNode>` obtained from an [`OverlayLauncher`]. Production
//! uses the child-process adapter in [`crate::process`]; tests drive the
//! state machine with in-memory fakes.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use ipnet::Ipv4Net;
use serde::Deserialize;

use crate::config::OverlayConfig;

/// Identity of this node inside the overlay, as reported by its control
/// plane. A `Some` answer is the signal that the overlay is up.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct NodeInfo {
    /// Virtual address with prefix length, e.g. `10.144.144.1/24`.
    pub ipv4_addr: Ipv4Net,
    pub hostname: String,
    pub id: String,
}

impl NodeInfo {
    pub fn virtual_ip(&self) -> Ipv4Addr {
        self.ipv4_addr.addr()
    }
}

/// One overlay peer.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct PeerInfo {
    pub hostname: String,
    pub ipv4: Option<Ipv4Addr>,
    pub id: String,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ForwardProtocol {
    Tcp,
    Udp,
}

impl fmt::Display for ForwardProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        })
    }
}

/// A whitelist element: a single port or an inclusive range.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PortSpec {
    Port(u16),
    Range(u16, u16),
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(p) => write!(f, "{p}"),
            Self::Range(lo, hi) => write!(f, "{lo}-{hi}"),
        }
    }
}

/// A running overlay node.
///
/// All methods are transient-failure-tolerant at the call site: a single
/// failed query is retried on the controller's next tick, never escalated.
#[async_trait]
pub trait NetworkNode: Send + Sync {
    /// `None` while the daemon's control plane is not answering yet.
    async fn node_info(&self) -> anyhow::Result<Option<NodeInfo>>;

    /// The current peer list, or `None` while the control plane is down.
    async fn peers(&self) -> anyhow::Result<Option<Vec<PeerInfo>>>;

    /// Registers a listener on `local` forwarding into the overlay at
    /// `remote`. Returns whether the overlay accepted the forward.
    async fn add_port_forward(
        &self,
        proto: ForwardProtocol,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> anyhow::Result<bool>;

    /// Replaces the inbound TCP whitelist. Empty means deny all.
    async fn set_tcp_whitelist(&self, ports: &[PortSpec]) -> anyhow::Result<()>;

    /// Replaces the inbound UDP whitelist. Empty means deny all.
    async fn set_udp_whitelist(&self, ports: &[PortSpec]) -> anyhow::Result<()>;

    /// Whether the underlying daemon is still running. A node that returns
    /// `false` here is dead for good; the controller reacts by failing the
    /// room.
    fn is_alive(&self) -> bool;

    /// Tears the node down, including its whole process tree where one
    /// exists. Idempotent.
    async fn shutdown(&self);
}

/// Factory for overlay nodes, so the controller can be exercised without
/// ever spawning a subprocess.
#[async_trait]
pub trait OverlayLauncher: Send + Sync {
    /// Version string of the overlay distribution, for the vendor string.
    async fn version(&self) -> anyhow::Result<String>;

    /// Starts an overlay node for `config`.
    async fn launch(&self, config: OverlayConfig) -> anyhow::Result<Box<dyn NetworkNode>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_spec_display() {
        assert_eq!(PortSpec::Port(13448).to_string(), "13448");
        assert_eq!(PortSpec::Range(25560, 25570).to_string(), "25560-25570");
        assert_eq!(ForwardProtocol::Tcp.to_string(), "tcp");
        assert_eq!(ForwardProtocol::Udp.to_string(), "udp");
    }

    #[test]
    fn node_info_from_cli_json() {
        let info: NodeInfo = serde_json::from_str(
            r#"{"ipv4_addr":"10.144.144.1/24","hostname":"scaffolding-mc-server-13448","id":"n-1"}"#,
        )
        .unwrap();
        assert_eq!(info.virtual_ip(), Ipv4Addr::new(10, 144, 144, 1));
        assert_eq!(info.hostname, "scaffolding-mc-server-13448");
    }

    #[test]
    fn peer_info_tolerates_missing_ip() {
        let peer: PeerInfo =
            serde_json::from_str(r#"{"hostname":"relay-1","ipv4":null,"id":"n-2"}"#).unwrap();
        assert_eq!(peer.ipv4, None);
    }
}
