//! Relay-list validation.
//!
//! Before an overlay child is started, its relay list is filtered down to
//! entries that at least resolve in DNS, optionally also answering a TCP
//! probe. Starting the overlay with nothing but dead relays wastes the
//! whole startup timeout, so an empty validated list aborts early instead.

use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

pub const RELAY_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Returns the subset of `relays` that resolve (and, with `probe`, accept a
/// TCP connection within [`RELAY_PROBE_TIMEOUT`]). Order is preserved.
pub async fn validate_relays(relays: &[String], probe: bool) -> Vec<String> {
    let mut valid = Vec::with_capacity(relays.len());

    for relay in relays {
        match validate_relay(relay, probe).await {
            Ok(()) => valid.push(relay.clone()),
            Err(e) => warn!("dropping relay {relay}: {e:#}"),
        }
    }

    valid
}

async fn validate_relay(relay: &str, probe: bool) -> anyhow::Result<()> {
    let (host, port) = host_port(relay)?;

    let Some(first) = lookup_host((host.as_str(), port)).await?.next() else {
        anyhow::bail!("no addresses resolved");
    };

    if probe {
        timeout(RELAY_PROBE_TIMEOUT, TcpStream::connect(first))
            .await
            .map_err(|_| anyhow::anyhow!("TCP probe timed out"))??;
        debug!("relay {relay} answered a TCP probe at {first}");
    }

    Ok(())
}

/// Accepts `scheme://host:port` relay URLs as well as bare `host:port`.
fn host_port(relay: &str) -> anyhow::Result<(String, u16)> {
    if let Ok(url) = Url::parse(relay) {
        if let (Some(host), Some(port)) = (url.host_str(), url.port()) {
            return Ok((host.to_owned(), port));
        }
    }

    let (host, port) = relay
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("relay has no port"))?;
    Ok((host.to_owned(), port.parse()?))
}
