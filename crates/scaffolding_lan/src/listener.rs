//! Multicast listener feeding LAN announcements into the registry.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::beacon::{LanBeacon, MULTICAST_GROUP, MULTICAST_PORT};
use crate::interfaces::multicast_interface_addrs;
use crate::registry::ServerRegistry;

/// Binds `0.0.0.0:4445`, joins the discovery group on every usable IPv4
/// interface, and upserts each parseable announcement into `registry` until
/// cancelled. Returns early only if the socket cannot be set up.
pub async fn run_listener(
    registry: ServerRegistry,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let socket = bind_multicast().context("setting up LAN discovery socket")?;
    info!("listening for LAN announcements on {MULTICAST_GROUP}:{MULTICAST_PORT}");

    let mut buf = vec![0u8; 1500];
    loop {
        let (len, src) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            recv = socket.recv_from(&mut buf) => match recv {
                Ok(recv) => recv,
                Err(e) => {
                    debug!("LAN listener recv error: {e}");
                    continue;
                }
            }
        };

        let SocketAddr::V4(src) = src else {
            continue;
        };

        let payload = String::from_utf8_lossy(&buf[..len]);
        match LanBeacon::parse(&payload) {
            Some(beacon) => {
                trace!("LAN announcement from {src}: {payload}");
                registry.observe(
                    SocketAddrV4::new(*src.ip(), beacon.port),
                    &beacon.motd,
                    &payload,
                );
            }
            None => trace!("dropping malformed datagram from {src}"),
        }
    }
}

/// Reuse-addr bind so we can share port 4445 with a running Minecraft
/// client, plus one group membership per interface. Multicast loopback stays
/// on so the host sees announcements from its own machine.
fn bind_multicast() -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, MULTICAST_PORT)).into())?;

    let socket = UdpSocket::from_std(socket.into())?;

    let interfaces = multicast_interface_addrs();
    if interfaces.is_empty() {
        // No usable interface found; let the OS pick one.
        socket.join_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED)?;
    } else {
        for addr in interfaces {
            if let Err(e) = socket.join_multicast_v4(MULTICAST_GROUP, addr) {
                warn!("failed to join {MULTICAST_GROUP} on {addr}: {e}");
            }
        }
    }

    socket.set_multicast_loop_v4(true)?;

    Ok(socket)
}
