//! Registry of Minecraft servers seen on the local network.
//!
//! Fed by the multicast listener, refined by the status pinger, pruned by
//! the sweeper. The controller only ever reads snapshots.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::interfaces::network_of;
use crate::ping::{probe_status, ServerStatus};

/// Unverified entries older than this are dropped by the sweeper.
pub const BROADCAST_STALE_AFTER: Duration = Duration::from_secs(30);
/// Verified entries whose last successful ping is older than this are dropped.
pub const VERIFIED_STALE_AFTER: Duration = Duration::from_secs(120);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const PING_INTERVAL: Duration = Duration::from_secs(10);

/// A Minecraft server observed via LAN broadcast, possibly verified by a
/// Server-List-Ping.
#[derive(Clone, Debug)]
pub struct MinecraftServer {
    pub endpoint: SocketAddrV4,
    pub motd: String,
    /// The announcement payload exactly as received.
    pub raw_motd: String,
    pub broadcast_seen_at: Instant,
    pub last_ping_at: Option<Instant>,
    pub ping_result: Option<ServerStatus>,
}

impl MinecraftServer {
    /// A server counts as verified once a status ping has succeeded.
    pub fn is_verified(&self) -> bool {
        self.last_ping_at.is_some()
    }

    pub fn is_local_host(&self) -> bool {
        self.endpoint.ip().is_loopback()
    }

    /// True if the announcement came from one of the given /24 networks.
    pub fn is_local_network(&self, local_nets: &[Ipv4Addr]) -> bool {
        local_nets.contains(&network_of(*self.endpoint.ip()))
    }
}

/// Cloneable, thread-safe handle to the server map. Keyed by source IPv4:
/// one world per machine, last announcement wins.
#[derive(Clone, Default)]
pub struct ServerRegistry {
    inner: Arc<Mutex<HashMap<Ipv4Addr, MinecraftServer>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-refresh an entry from a LAN announcement.
    pub fn observe(&self, endpoint: SocketAddrV4, motd: &str, raw_motd: &str) {
        let now = Instant::now();
        let mut map = self.inner.lock();
        map.entry(*endpoint.ip())
            .and_modify(|s| {
                s.endpoint = endpoint;
                s.motd = motd.to_owned();
                s.raw_motd = raw_motd.to_owned();
                s.broadcast_seen_at = now;
            })
            .or_insert_with(|| MinecraftServer {
                endpoint,
                motd: motd.to_owned(),
                raw_motd: raw_motd.to_owned(),
                broadcast_seen_at: now,
                last_ping_at: None,
                ping_result: None,
            });
    }

    /// Records a successful status ping.
    pub fn set_ping(&self, addr: Ipv4Addr, status: ServerStatus) {
        let mut map = self.inner.lock();
        if let Some(server) = map.get_mut(&addr) {
            server.last_ping_at = Some(Instant::now());
            server.ping_result = Some(status);
        }
    }

    /// Drops entries that went quiet: unverified ones not announced for
    /// [`BROADCAST_STALE_AFTER`], verified ones not pinged successfully for
    /// [`VERIFIED_STALE_AFTER`].
    pub fn sweep(&self) {
        let now = Instant::now();
        self.inner.lock().retain(|addr, s| {
            let keep = match s.last_ping_at {
                None => now.duration_since(s.broadcast_seen_at) <= BROADCAST_STALE_AFTER,
                Some(pinged) => now.duration_since(pinged) <= VERIFIED_STALE_AFTER,
            };
            if !keep {
                debug!("expiring stale LAN server {addr}");
            }
            keep
        });
    }

    pub fn all(&self) -> Vec<MinecraftServer> {
        self.inner.lock().values().cloned().collect()
    }

    pub fn verified(&self) -> Vec<MinecraftServer> {
        self.inner
            .lock()
            .values()
            .filter(|s| s.is_verified())
            .cloned()
            .collect()
    }

    pub fn get(&self, addr: Ipv4Addr) -> Option<MinecraftServer> {
        self.inner.lock().get(&addr).cloned()
    }

    pub fn find_by_motd_substring(&self, needle: &str) -> Option<MinecraftServer> {
        self.inner
            .lock()
            .values()
            .find(|s| s.motd.contains(needle))
            .cloned()
    }

    /// First server announced from this machine or one of the given local
    /// /24 networks. Loopback sources qualify: a world opened on the host's
    /// own machine is the primary thing we are looking for.
    pub fn find_local_network(&self, local_nets: &[Ipv4Addr]) -> Option<MinecraftServer> {
        self.inner
            .lock()
            .values()
            .find(|s| s.is_local_host() || s.is_local_network(local_nets))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Periodic staleness sweep. Runs until cancelled.
    pub async fn run_sweeper(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = interval.tick() => self.sweep(),
            }
        }
    }

    /// Periodic status-ping pass over every known server. A failed probe
    /// leaves the entry untouched; the sweeper handles expiry.
    pub async fn run_pinger(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            for server in self.all() {
                let endpoint = server.endpoint;
                tokio::select! {
                    () = cancel.cancelled() => return,
                    result = probe_status(endpoint) => match result {
                        Ok(status) => self.set_ping(*endpoint.ip(), status),
                        Err(e) => trace!("status probe of {endpoint} failed: {e}"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(d: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, d), port)
    }

    fn status() -> ServerStatus {
        ServerStatus {
            version: "1.20.1".into(),
            protocol: 763,
            online: 1,
            max: 8,
            description: "A Minecraft Server".into(),
        }
    }

    #[test]
    fn observe_upserts_by_source_address() {
        let reg = ServerRegistry::new();
        reg.observe(endpoint(50, 25565), "Hi", "[MOTD]Hi[/MOTD][AD]25565[/AD]");
        reg.observe(endpoint(50, 25566), "Hi2", "[MOTD]Hi2[/MOTD][AD]25566[/AD]");
        assert_eq!(reg.len(), 1);

        let server = reg.get(Ipv4Addr::new(192, 168, 1, 50)).unwrap();
        assert_eq!(server.motd, "Hi2");
        assert_eq!(server.endpoint.port(), 25566);
        assert!(!server.is_verified());
    }

    #[test]
    fn ping_marks_verified() {
        let reg = ServerRegistry::new();
        reg.observe(endpoint(50, 25565), "Hi", "raw");
        reg.set_ping(Ipv4Addr::new(192, 168, 1, 50), status());

        let server = reg.get(Ipv4Addr::new(192, 168, 1, 50)).unwrap();
        assert!(server.is_verified());
        assert_eq!(server.ping_result.unwrap().protocol, 763);
        assert_eq!(reg.verified().len(), 1);
    }

    #[test]
    fn set_ping_on_unknown_address_is_a_no_op() {
        let reg = ServerRegistry::new();
        reg.set_ping(Ipv4Addr::new(10, 0, 0, 1), status());
        assert!(reg.is_empty());
    }

    #[test]
    fn sweep_keeps_fresh_entries() {
        let reg = ServerRegistry::new();
        reg.observe(endpoint(50, 25565), "Hi", "raw");
        reg.sweep();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn sweep_drops_stale_unverified_entries() {
        let reg = ServerRegistry::new();
        reg.observe(endpoint(50, 25565), "Hi", "raw");
        {
            let mut map = reg.inner.lock();
            let s = map.values_mut().next().unwrap();
            s.broadcast_seen_at = Instant::now() - BROADCAST_STALE_AFTER - Duration::from_secs(1);
        }
        reg.sweep();
        assert!(reg.is_empty());
    }

    #[test]
    fn sweep_keeps_verified_entries_with_recent_ping() {
        let reg = ServerRegistry::new();
        reg.observe(endpoint(50, 25565), "Hi", "raw");
        reg.set_ping(Ipv4Addr::new(192, 168, 1, 50), status());
        {
            // Broadcast long gone, but the ping is fresh.
            let mut map = reg.inner.lock();
            let s = map.values_mut().next().unwrap();
            s.broadcast_seen_at = Instant::now() - BROADCAST_STALE_AFTER - Duration::from_secs(1);
        }
        reg.sweep();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn local_network_predicates() {
        let reg = ServerRegistry::new();
        reg.observe(endpoint(50, 25565), "LAN world", "raw");
        reg.observe(
            SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 9), 25565),
            "Far away",
            "raw",
        );

        let local = reg
            .find_local_network(&[Ipv4Addr::new(192, 168, 1, 0)])
            .unwrap();
        assert_eq!(local.motd, "LAN world");

        assert!(reg.find_local_network(&[Ipv4Addr::new(10, 0, 0, 0)]).is_none());
    }

    #[test]
    fn loopback_source_counts_as_local() {
        let reg = ServerRegistry::new();
        reg.observe(
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 25565),
            "Own world",
            "raw",
        );
        assert!(reg.find_local_network(&[]).is_some());
    }

    #[test]
    fn find_by_motd_substring_matches() {
        let reg = ServerRegistry::new();
        reg.observe(endpoint(50, 25565), "Alice's World [scaffolding]", "raw");
        assert!(reg.find_by_motd_substring("scaffolding").is_some());
        assert!(reg.find_by_motd_substring("bob").is_none());
    }
}
