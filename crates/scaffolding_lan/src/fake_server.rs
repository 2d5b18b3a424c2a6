//! Rebroadcasts a remote Minecraft session on the local LAN.
//!
//! To a vanilla client a `FakeServer` is indistinguishable from a neighbor's
//! "Open to LAN" world: the same multicast payload on the same cadence,
//! pointing at the locally forwarded port.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::beacon::{multicast_target, LanBeacon};

/// Vanilla announces every 1.5 seconds; matching it keeps the entry from
/// flickering in the client's server list.
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(1500);

const BEACON_TTL: u32 = 4;

/// Periodic LAN-beacon emitter. Broadcasting stops when the handle is
/// stopped or dropped.
pub struct FakeServer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl FakeServer {
    /// Binds an emitter socket and starts announcing `beacon`.
    pub async fn spawn(beacon: LanBeacon) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        socket.set_multicast_ttl_v4(BEACON_TTL)?;
        socket.set_multicast_loop_v4(true)?;

        let payload = beacon.payload();
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                debug!("start announcing: {payload}");
                loop {
                    if let Err(e) = socket.send_to(payload.as_bytes(), multicast_target()).await {
                        warn!("failed to send LAN announcement: {e}");
                    }

                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(BROADCAST_INTERVAL) => {}
                    }
                }
            }
        });

        Ok(Self { cancel, task })
    }

    /// Stops the emitter. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_and_stop() {
        let server = FakeServer::spawn(LanBeacon::new("Bob's World [scaffolding]", 25565))
            .await
            .unwrap();
        server.stop();
        server.stop(); // idempotent
    }
}
