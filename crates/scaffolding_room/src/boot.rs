//! The overlay-starting step shared by both tracks.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use scaffolding_overlay::{relay::validate_relays, NodeInfo, OverlayConfig};
use tracing::{debug, info};

use crate::controller::Inner;
use crate::runtime::RoomRuntime;

/// Launches the overlay child on first entry (after relay validation), then
/// polls `node_info` once per poll interval. `Some` means the overlay is up;
/// the caller transitions. Fatal outcomes: no valid relays, launch failure,
/// or the startup deadline passing without an answer.
pub(crate) async fn step_overlay_starting<F>(
    inner: &Inner,
    runtime: &mut RoomRuntime,
    build_config: F,
) -> anyhow::Result<Option<NodeInfo>>
where
    F: FnOnce(Vec<String>) -> OverlayConfig,
{
    let now = Instant::now();

    if runtime.node.is_none() {
        let relays = validate_relays(&inner.options.relays, inner.options.probe_relays).await;
        if relays.is_empty() {
            bail!("no valid relays to start the overlay with");
        }

        let config = build_config(relays);
        debug!(
            "launching overlay: network {}, hostname {}",
            config.network_name, config.hostname
        );
        let node = inner
            .launcher
            .launch(config)
            .await
            .context("starting overlay")?;

        runtime.node = Some(Arc::from(node));
        runtime.phase_deadline = Some(now + inner.options.overlay_start_timeout);
        runtime.next_poll = Some(now);
        return Ok(None);
    }

    if runtime.next_poll.is_some_and(|t| now < t) {
        return Ok(None);
    }
    runtime.next_poll = Some(now + inner.options.overlay_poll_interval);

    let Some(node) = runtime.node.clone() else {
        return Ok(None);
    };

    match node.node_info().await {
        Ok(Some(info)) => {
            info!("overlay up: {} at {}", info.hostname, info.virtual_ip());
            runtime.overlay_node_id = Some(info.id.clone());
            runtime.phase_deadline = None;
            runtime.next_poll = None;
            return Ok(Some(info));
        }
        Ok(None) => debug!("overlay control plane not answering yet"),
        Err(e) => debug!("overlay info query failed: {e:#}"),
    }

    if runtime.phase_deadline.is_some_and(|deadline| now >= deadline) {
        bail!("overlay startup timeout");
    }

    Ok(None)
}
