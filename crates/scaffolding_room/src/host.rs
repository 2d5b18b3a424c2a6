//! Host-track steps.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use scaffolding_lan::ping::probe_liveness;
use scaffolding_net::ScaffoldingServer;
use scaffolding_overlay::{OverlayConfig, PortSpec};
use scaffolding_protocol::CENTER_HOSTNAME_PREFIX;
use tracing::{info, warn};

use crate::boot;
use crate::controller::Inner;
use crate::runtime::RoomRuntime;
use crate::state::RoomState;

pub(crate) async fn step(inner: &Arc<Inner>, runtime: &mut RoomRuntime) -> anyhow::Result<()> {
    match inner.state() {
        RoomState::HostPrepare => {
            info!("preparing host runtime for room {}", runtime.room_code);
            inner.set_state(RoomState::HostScaffoldingStarting);
        }

        RoomState::HostScaffoldingStarting => {
            let server =
                ScaffoldingServer::bind(runtime.requested_port, inner.options.heartbeat_timeout)
                    .await
                    .context("starting scaffolding server")?;
            server.set_host(
                &runtime.player_name,
                inner.machine_id.as_str(),
                &runtime.vendor,
            );

            runtime.scaffolding_port = Some(server.local_port());
            runtime.scaffolding_server = Some(server);
            inner.set_state(RoomState::HostOverlayStarting);
        }

        RoomState::HostOverlayStarting => {
            let scaffolding_port = runtime.scaffolding_port.unwrap_or(runtime.requested_port);
            let network_name = runtime.room_code.network_name();
            let network_secret = runtime.room_code.network_secret();
            let virtual_ipv4 = inner.options.host_virtual_ip;

            let ready = boot::step_overlay_starting(inner, runtime, |relays| OverlayConfig {
                network_name,
                network_secret,
                hostname: format!("{CENTER_HOSTNAME_PREFIX}{scaffolding_port}"),
                virtual_ipv4,
                is_host: true,
                tcp_whitelist: vec![PortSpec::Port(scaffolding_port)],
                udp_whitelist: Vec::new(),
                relays,
            })
            .await?;

            if ready.is_some() {
                inner.set_state(RoomState::HostMinecraftDetecting);
            }
        }

        RoomState::HostMinecraftDetecting => {
            let local_nets = inner.local_networks();
            if let Some(found) = inner.registry.find_local_network(&local_nets) {
                let port = found.endpoint.port();
                info!("detected Minecraft world {:?} on port {port}", found.motd);
                apply_minecraft_port(inner, runtime, port).await;

                runtime.probe_failures = 0;
                runtime.next_health = Some(Instant::now() + inner.options.health_interval);
                inner.set_state(RoomState::HostRunning);
            } else if !inner.options.compat_mode {
                // Eager mode goes live right away; the health pass picks the
                // port up whenever a world shows.
                runtime.next_health = Some(Instant::now());
                inner.set_state(RoomState::HostRunning);
            }
        }

        RoomState::HostRunning => {
            let now = Instant::now();
            if !runtime.next_health.is_some_and(|t| now < t) {
                runtime.next_health = Some(now + inner.options.health_interval);
                health_pass(inner, runtime).await?;
                inner.publish_snapshot();
            }
        }

        _ => {}
    }

    // Roster changes become status updates on every pass.
    if let Some(server) = &runtime.scaffolding_server {
        inner.update_players(server.players());
    }

    Ok(())
}

/// The steady-state checks: overlay child alive, Minecraft port still
/// current, and (in compat mode) the world still answering its probe.
async fn health_pass(inner: &Arc<Inner>, runtime: &mut RoomRuntime) -> anyhow::Result<()> {
    if let Some(node) = &runtime.node {
        if !node.is_alive() {
            bail!("overlay process exited unexpectedly");
        }
    }

    let local_nets = inner.local_networks();
    if let Some(found) = inner.registry.find_local_network(&local_nets) {
        let port = found.endpoint.port();
        if runtime.minecraft_port != Some(port) {
            info!("Minecraft world moved to port {port}");
            apply_minecraft_port(inner, runtime, port).await;
        }
    }

    if inner.options.compat_mode {
        if let Some(port) = runtime.minecraft_port {
            if probe_liveness(port).await {
                runtime.probe_failures = 0;
            } else {
                runtime.probe_failures += 1;
                warn!(
                    "Minecraft liveness probe failed ({}/{})",
                    runtime.probe_failures, inner.options.probe_failure_threshold
                );
                if runtime.probe_failures >= inner.options.probe_failure_threshold {
                    bail!(
                        "minecraft server offline ({} consecutive failed probes)",
                        runtime.probe_failures
                    );
                }
            }
        }
    }

    Ok(())
}

/// Pushes a (new) Minecraft port everywhere it matters: the scaffolding
/// server's `c:server_port` answer, the status snapshot, and the overlay
/// whitelists. Whitelist hiccups are transient and only logged.
async fn apply_minecraft_port(inner: &Arc<Inner>, runtime: &mut RoomRuntime, port: u16) {
    if let Some(server) = &runtime.scaffolding_server {
        server.set_minecraft_port(Some(port));
    }
    runtime.minecraft_port = Some(port);
    inner.set_minecraft_port(Some(port));

    let scaffolding_port = runtime.scaffolding_port.unwrap_or(runtime.requested_port);
    if let Some(node) = &runtime.node {
        if let Err(e) = node
            .set_tcp_whitelist(&[PortSpec::Port(scaffolding_port), PortSpec::Port(port)])
            .await
        {
            warn!("TCP whitelist update failed: {e:#}");
        }
        if let Err(e) = node.set_udp_whitelist(&[PortSpec::Port(port)]).await {
            warn!("UDP whitelist update failed: {e:#}");
        }
    }
}
