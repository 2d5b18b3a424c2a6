//! IPv4 interface enumeration for multicast joins and the "same LAN"
//! predicate.

use std::net::Ipv4Addr;

use get_if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use tracing::warn;

/// IPv4 addresses suitable for joining the discovery multicast group:
/// every up, non-loopback, non-link-local interface address.
pub fn multicast_interface_addrs() -> Vec<Ipv4Addr> {
    usable_ipv4_addrs(&[])
}

/// The /24 networks this machine is directly attached to, excluding
/// loopback, link-local 169.254/16, and any address inside `exclude`
/// (the overlay's virtual range must not count as "local LAN").
pub fn local_ipv4_networks(exclude: &[Ipv4Net]) -> Vec<Ipv4Addr> {
    usable_ipv4_addrs(exclude)
        .into_iter()
        .map(network_of)
        .collect()
}

/// Truncates an address to its /24 network address.
pub fn network_of(addr: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = addr.octets();
    Ipv4Addr::new(a, b, c, 0)
}

fn usable_ipv4_addrs(exclude: &[Ipv4Net]) -> Vec<Ipv4Addr> {
    let ifaces = match get_if_addrs() {
        Ok(ifaces) => ifaces,
        Err(e) => {
            warn!("failed to enumerate network interfaces: {e}");
            return Vec::new();
        }
    };

    ifaces
        .into_iter()
        .filter(|i| !i.is_loopback())
        .filter_map(|i| match i.addr {
            IfAddr::V4(v4) => Some(v4.ip),
            IfAddr::V6(_) => None,
        })
        .filter(|ip| !ip.is_link_local())
        .filter(|ip| !exclude.iter().any(|net| net.contains(ip)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_truncates_to_slash_24() {
        assert_eq!(
            network_of(Ipv4Addr::new(192, 168, 1, 50)),
            Ipv4Addr::new(192, 168, 1, 0)
        );
        assert_eq!(
            network_of(Ipv4Addr::new(10, 144, 144, 1)),
            Ipv4Addr::new(10, 144, 144, 0)
        );
    }

    #[test]
    fn overlay_range_is_excluded() {
        let overlay: Ipv4Net = "10.144.0.0/16".parse().unwrap();
        let nets = local_ipv4_networks(&[overlay]);
        assert!(nets.iter().all(|n| !overlay.contains(n)));
    }
}
