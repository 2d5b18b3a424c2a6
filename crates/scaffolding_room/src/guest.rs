//! Guest-track steps.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, ensure, Context};
use once_cell::sync::Lazy;
use regex::Regex;
use scaffolding_lan::{FakeServer, LanBeacon};
use scaffolding_net::ScaffoldingClient;
use scaffolding_overlay::{ForwardProtocol, OverlayConfig, PeerInfo};
use scaffolding_protocol::{PlayerPing, ProfileKind, CENTER_HOSTNAME_PREFIX, GUEST_HOSTNAME_PREFIX};
use tracing::{debug, info, warn};

use crate::boot;
use crate::controller::Inner;
use crate::runtime::RoomRuntime;
use crate::state::RoomState;
use crate::vendor;

/// Matches `scaffolding-mc-server-<port>`, the overlay hostname a host
/// announces.
static CENTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^{}(\d{{1,5}})$", regex::escape(CENTER_HOSTNAME_PREFIX))).unwrap()
});

/// Rendezvous ports at or below the well-known range are junk.
const MIN_CENTER_PORT: u16 = 1024;

pub(crate) async fn step(inner: &Arc<Inner>, runtime: &mut RoomRuntime) -> anyhow::Result<()> {
    match inner.state() {
        RoomState::GuestPrepare => {
            info!("preparing guest runtime for room {}", runtime.room_code);
            inner.set_state(RoomState::GuestOverlayStarting);
        }

        RoomState::GuestOverlayStarting => {
            let hostname = format!("{GUEST_HOSTNAME_PREFIX}{}", inner.machine_id.short());
            let network_name = runtime.room_code.network_name();
            let network_secret = runtime.room_code.network_secret();

            let ready = boot::step_overlay_starting(inner, runtime, |relays| OverlayConfig {
                network_name,
                network_secret,
                hostname,
                // Guests take whatever address the overlay hands out.
                virtual_ipv4: None,
                is_host: false,
                tcp_whitelist: Vec::new(),
                udp_whitelist: Vec::new(),
                relays,
            })
            .await?;

            if ready.is_some() {
                runtime.phase_deadline = Some(Instant::now() + inner.options.discovery_timeout);
                runtime.next_poll = Some(Instant::now());
                inner.set_state(RoomState::GuestDiscoveringCenter);
            }
        }

        RoomState::GuestDiscoveringCenter => {
            discover_center(inner, runtime).await?;
        }

        RoomState::GuestConnectingScaffolding => {
            connect_scaffolding(inner, runtime).await?;
        }

        RoomState::GuestRunning => {
            let now = Instant::now();
            if !runtime.next_health.is_some_and(|t| now < t) {
                runtime.next_health = Some(now + inner.options.health_interval);

                if let Some(node) = &runtime.node {
                    if !node.is_alive() {
                        bail!("overlay process exited unexpectedly");
                    }
                }

                heartbeat(inner, runtime).await?;
                inner.publish_snapshot();
            }
        }

        _ => {}
    }

    Ok(())
}

/// Scans the peer list for hosts announcing `scaffolding-mc-server-<port>`.
/// Exactly one may exist; two hosts in one room is a misconfiguration we
/// refuse to guess our way out of.
async fn discover_center(inner: &Arc<Inner>, runtime: &mut RoomRuntime) -> anyhow::Result<()> {
    let now = Instant::now();
    if runtime.next_poll.is_some_and(|t| now < t) {
        return Ok(());
    }
    runtime.next_poll = Some(now + inner.options.discovery_poll_interval);

    let Some(node) = runtime.node.clone() else {
        return Ok(());
    };

    match node.peers().await {
        Ok(Some(peers)) => {
            let centers = find_centers(&peers);
            match centers.as_slice() {
                [] => {}
                [(ip, port)] => {
                    info!("found center {ip} announcing port {port}");

                    let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, *port));
                    let remote = SocketAddr::from((*ip, *port));
                    match node
                        .add_port_forward(ForwardProtocol::Tcp, local, remote)
                        .await
                    {
                        Ok(true) => {
                            runtime.center = Some((*ip, *port));
                            runtime.scaffolding_port = Some(*port);
                            runtime.connect_attempts = 0;
                            runtime.next_poll = Some(now);
                            runtime.phase_deadline = None;
                            inner.set_state(RoomState::GuestConnectingScaffolding);
                        }
                        Ok(false) => warn!("overlay rejected the rendezvous forward"),
                        Err(e) => debug!("adding the rendezvous forward failed: {e:#}"),
                    }
                }
                centers => bail!("multiple centers in this room ({} hosts announcing)", centers.len()),
            }
        }
        Ok(None) => debug!("overlay control plane not answering"),
        Err(e) => debug!("peer query failed: {e:#}"),
    }

    if runtime.center.is_none() && runtime.phase_deadline.is_some_and(|d| now >= d) {
        bail!("host discovery timeout: no center appeared");
    }

    Ok(())
}

fn find_centers(peers: &[PeerInfo]) -> Vec<(Ipv4Addr, u16)> {
    peers
        .iter()
        .filter_map(|peer| {
            let caps = CENTER_RE.captures(&peer.hostname)?;
            let port: u16 = caps[1].parse().ok()?;
            if port <= MIN_CENTER_PORT {
                return None;
            }
            Some((peer.ipv4?, port))
        })
        .collect()
}

/// One rendezvous attempt per backoff period: connect through the forwarded
/// loopback port, verify the fingerprint, log the protocol list, introduce
/// ourselves. Gives up for good after the retry budget.
async fn connect_scaffolding(inner: &Arc<Inner>, runtime: &mut RoomRuntime) -> anyhow::Result<()> {
    let now = Instant::now();
    if runtime.next_poll.is_some_and(|t| now < t) {
        return Ok(());
    }

    let Some((_, port)) = runtime.center else {
        return Ok(());
    };
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let hello = player_ping(inner, runtime);

    match establish(addr, &hello).await {
        Ok(client) => {
            runtime.scaffolding_client = Some(client);
            runtime.heartbeat_failures = 0;
            runtime.next_health = Some(now + inner.options.health_interval);
            inner.set_state(RoomState::GuestRunning);
        }
        Err(e) => {
            runtime.connect_attempts += 1;
            if runtime.connect_attempts >= inner.options.connect_retry_limit {
                return Err(e).with_context(|| {
                    format!(
                        "rendezvous with the host failed after {} attempts",
                        runtime.connect_attempts
                    )
                });
            }
            debug!(
                "rendezvous attempt {}/{} failed: {e:#}",
                runtime.connect_attempts, inner.options.connect_retry_limit
            );
            runtime.next_poll = Some(now + inner.options.connect_retry_backoff);
        }
    }

    Ok(())
}

async fn establish(addr: SocketAddr, hello: &PlayerPing) -> anyhow::Result<ScaffoldingClient> {
    let mut client = ScaffoldingClient::connect(addr).await?;

    ensure!(
        client.ping().await?,
        "the endpoint did not echo the scaffolding fingerprint"
    );

    let protocols = client.protocols().await?;
    debug!("center speaks {protocols:?}");

    client.player_ping(hello).await?;
    Ok(client)
}

/// The periodic beat while running: refresh our roster entry, learn the
/// Minecraft port if still unknown, otherwise keep the player list fresh. A
/// broken connection is retried on the next beat and becomes fatal after
/// the failure threshold.
async fn heartbeat(inner: &Arc<Inner>, runtime: &mut RoomRuntime) -> anyhow::Result<()> {
    let hello = player_ping(inner, runtime);

    if runtime.scaffolding_client.is_none() {
        let Some((_, port)) = runtime.center else {
            return Ok(());
        };
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        match ScaffoldingClient::connect(addr).await {
            Ok(client) => runtime.scaffolding_client = Some(client),
            Err(e) => return heartbeat_failure(inner, runtime, e),
        }
    }

    let Some(client) = runtime.scaffolding_client.as_mut() else {
        return Ok(());
    };

    if let Err(e) = client.player_ping(&hello).await {
        runtime.scaffolding_client = None;
        return heartbeat_failure(inner, runtime, e);
    }
    runtime.heartbeat_failures = 0;

    if runtime.minecraft_port.is_none() {
        match client.server_port().await {
            Ok(Some(port)) => go_live(inner, runtime, port).await?,
            Ok(None) => debug!("host has not detected a Minecraft world yet"),
            Err(e) => debug!("server port query failed: {e:#}"),
        }
    } else {
        match client.player_profiles_list().await {
            Ok(players) => inner.update_players(players),
            Err(e) => debug!("player list refresh failed: {e:#}"),
        }
    }

    Ok(())
}

fn heartbeat_failure(
    inner: &Arc<Inner>,
    runtime: &mut RoomRuntime,
    error: anyhow::Error,
) -> anyhow::Result<()> {
    runtime.heartbeat_failures += 1;
    warn!(
        "scaffolding heartbeat failure ({}/{}): {error:#}",
        runtime.heartbeat_failures, inner.options.heartbeat_failure_threshold
    );

    if runtime.heartbeat_failures >= inner.options.heartbeat_failure_threshold {
        bail!("scaffolding heartbeat lost: {error:#}");
    }
    Ok(())
}

/// The moment the Minecraft port is known: forward it over the overlay and
/// make the remote world visible on the local LAN.
async fn go_live(inner: &Arc<Inner>, runtime: &mut RoomRuntime, port: u16) -> anyhow::Result<()> {
    let Some((center_ip, _)) = runtime.center else {
        return Ok(());
    };
    let Some(node) = runtime.node.clone() else {
        return Ok(());
    };

    info!("host's Minecraft world is on port {port}");

    let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let remote = SocketAddr::from((center_ip, port));
    for proto in [ForwardProtocol::Tcp, ForwardProtocol::Udp] {
        match node.add_port_forward(proto, local, remote).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("overlay rejected the {proto} forward for the world, retrying next beat");
                return Ok(());
            }
            Err(e) => {
                debug!("adding the {proto} forward failed, retrying next beat: {e:#}");
                return Ok(());
            }
        }
    }

    // The rebroadcast MOTD leads with the host's name.
    let host_name = match runtime.scaffolding_client.as_mut() {
        Some(client) => match client.player_profiles_list().await {
            Ok(players) => {
                let name = players
                    .iter()
                    .find(|p| p.kind == ProfileKind::Host)
                    .map(|p| p.name.clone());
                inner.update_players(players);
                name
            }
            Err(e) => {
                debug!("player list fetch failed: {e:#}");
                None
            }
        },
        None => None,
    };
    let host_name = host_name.unwrap_or_else(|| "Host".to_owned());

    let motd = format!(
        "{host_name}'s World [{}]",
        vendor::truncate_for_motd(&runtime.vendor)
    );
    let fake = FakeServer::spawn(LanBeacon::new(motd, port))
        .await
        .context("starting the LAN rebroadcast")?;
    runtime.fake_server = Some(fake);

    runtime.minecraft_port = Some(port);
    inner.set_minecraft_port(Some(port));
    Ok(())
}

fn player_ping(inner: &Arc<Inner>, runtime: &RoomRuntime) -> PlayerPing {
    PlayerPing {
        name: runtime.player_name.clone(),
        machine_id: inner.machine_id.to_string(),
        vendor: runtime.vendor.clone(),
        easytier_id: runtime.overlay_node_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(hostname: &str, ip: Option<Ipv4Addr>) -> PeerInfo {
        PeerInfo {
            hostname: hostname.to_owned(),
            ipv4: ip,
            id: "peer".to_owned(),
        }
    }

    #[test]
    fn center_hostname_matching() {
        let ip = Ipv4Addr::new(10, 144, 144, 1);
        let peers = vec![
            peer("scaffolding-mc-server-13448", Some(ip)),
            peer("scaffolding-mc-guest-12ab34cd", Some(Ipv4Addr::new(10, 144, 144, 2))),
            peer("relay-eu", None),
        ];
        assert_eq!(find_centers(&peers), vec![(ip, 13448)]);
    }

    #[test]
    fn low_ports_and_junk_are_ignored() {
        let ip = Ipv4Addr::new(10, 144, 144, 1);
        let peers = vec![
            peer("scaffolding-mc-server-80", Some(ip)),
            peer("scaffolding-mc-server-1024", Some(ip)),
            peer("scaffolding-mc-server-99999", Some(ip)),
            peer("scaffolding-mc-server-", Some(ip)),
            peer("scaffolding-mc-server-13448x", Some(ip)),
            peer("scaffolding-mc-server-13448", None),
        ];
        assert!(find_centers(&peers).is_empty());
    }

    #[test]
    fn two_centers_are_both_reported() {
        let peers = vec![
            peer("scaffolding-mc-server-13448", Some(Ipv4Addr::new(10, 144, 144, 1))),
            peer("scaffolding-mc-server-13448", Some(Ipv4Addr::new(10, 144, 144, 7))),
        ];
        assert_eq!(find_centers(&peers).len(), 2);
    }
}
