//! Test support: an in-memory overlay and a scenario harness that drives
//! the room controller end to end without spawning a single subprocess.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use scaffolding_overlay::{
    ForwardProtocol, NetworkNode, NodeInfo, OverlayConfig, OverlayLauncher, PeerInfo, PortSpec,
};
use scaffolding_room::{ControllerOptions, RoomController, RoomState, RoomStatus};

pub(crate) const FAKE_OVERLAY_VERSION: &str = "2.1.0";

/// Virtual address handed to nodes that ask for DHCP.
const FAKE_DHCP_IP: Ipv4Addr = Ipv4Addr::new(10, 144, 144, 77);

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RecordedForward {
    pub(crate) proto: ForwardProtocol,
    pub(crate) local: SocketAddr,
    pub(crate) remote: SocketAddr,
}

#[derive(Default)]
struct FakeState {
    /// Peer list served to `peers()`.
    peers: Vec<PeerInfo>,
    /// `node_info` answers `None` while false, simulating a slow control
    /// plane.
    ready: bool,
    alive: bool,
    forwards: Vec<RecordedForward>,
    tcp_whitelists: Vec<Vec<PortSpec>>,
    udp_whitelists: Vec<Vec<PortSpec>>,
    launched: Vec<OverlayConfig>,
}

/// A scriptable overlay: launcher and node in one shared state.
#[derive(Clone, Default)]
pub(crate) struct FakeOverlay {
    state: Arc<Mutex<FakeState>>,
}

impl FakeOverlay {
    pub(crate) fn new() -> Self {
        let fake = Self::default();
        fake.state.lock().ready = true;
        fake
    }

    /// An overlay whose control plane never answers.
    pub(crate) fn never_ready() -> Self {
        Self::default()
    }

    pub(crate) fn add_center(&self, port: u16, ip: Ipv4Addr) {
        self.state.lock().peers.push(PeerInfo {
            hostname: format!("scaffolding-mc-server-{port}"),
            ipv4: Some(ip),
            id: format!("center-{ip}"),
        });
    }

    /// Simulates the overlay child dying.
    pub(crate) fn kill(&self) {
        self.state.lock().alive = false;
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    pub(crate) fn forwards(&self) -> Vec<RecordedForward> {
        self.state.lock().forwards.clone()
    }

    pub(crate) fn tcp_whitelists(&self) -> Vec<Vec<PortSpec>> {
        self.state.lock().tcp_whitelists.clone()
    }

    pub(crate) fn udp_whitelists(&self) -> Vec<Vec<PortSpec>> {
        self.state.lock().udp_whitelists.clone()
    }

    pub(crate) fn launched(&self) -> Vec<OverlayConfig> {
        self.state.lock().launched.clone()
    }
}

#[async_trait]
impl OverlayLauncher for FakeOverlay {
    async fn version(&self) -> anyhow::Result<String> {
        Ok(FAKE_OVERLAY_VERSION.to_owned())
    }

    async fn launch(&self, config: OverlayConfig) -> anyhow::Result<Box<dyn NetworkNode>> {
        let mut state = self.state.lock();
        state.alive = true;

        let ip = config.virtual_ipv4.unwrap_or(FAKE_DHCP_IP);
        let info = NodeInfo {
            ipv4_addr: Ipv4Net::new(ip, 24).unwrap(),
            hostname: config.hostname.clone(),
            id: format!("fake-{}", config.hostname),
        };
        state.launched.push(config);

        Ok(Box::new(FakeNode {
            state: self.state.clone(),
            info,
        }))
    }
}

struct FakeNode {
    state: Arc<Mutex<FakeState>>,
    info: NodeInfo,
}

#[async_trait]
impl NetworkNode for FakeNode {
    async fn node_info(&self) -> anyhow::Result<Option<NodeInfo>> {
        let state = self.state.lock();
        Ok((state.ready && state.alive).then(|| self.info.clone()))
    }

    async fn peers(&self) -> anyhow::Result<Option<Vec<PeerInfo>>> {
        let state = self.state.lock();
        Ok(state.alive.then(|| state.peers.clone()))
    }

    async fn add_port_forward(
        &self,
        proto: ForwardProtocol,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> anyhow::Result<bool> {
        self.state.lock().forwards.push(RecordedForward {
            proto,
            local,
            remote,
        });
        Ok(true)
    }

    async fn set_tcp_whitelist(&self, ports: &[PortSpec]) -> anyhow::Result<()> {
        self.state.lock().tcp_whitelists.push(ports.to_vec());
        Ok(())
    }

    async fn set_udp_whitelist(&self, ports: &[PortSpec]) -> anyhow::Result<()> {
        self.state.lock().udp_whitelists.push(ports.to_vec());
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    async fn shutdown(&self) {
        self.state.lock().alive = false;
    }
}

/// Fast-clock controller options for tests: millisecond ticks, no multicast
/// socket, a fixed "local LAN", and a throwaway data directory.
pub(crate) fn test_options(data_dir: &std::path::Path) -> ControllerOptions {
    ControllerOptions {
        tick_interval: Duration::from_millis(5),
        heartbeat_timeout: Duration::from_secs(10),
        overlay_start_timeout: Duration::from_millis(500),
        overlay_poll_interval: Duration::from_millis(10),
        discovery_timeout: Duration::from_millis(500),
        discovery_poll_interval: Duration::from_millis(10),
        connect_retry_limit: 5,
        connect_retry_backoff: Duration::from_millis(25),
        health_interval: Duration::from_millis(25),
        relays: vec!["tcp://127.0.0.1:1".to_owned()],
        probe_relays: false,
        enable_lan_listener: false,
        local_networks: Some(vec![Ipv4Addr::new(192, 168, 1, 0)]),
        data_dir: Some(data_dir.to_path_buf()),
        ..ControllerOptions::default()
    }
}

/// One controller + fake overlay + status event stream.
pub(crate) struct Scenario {
    pub(crate) controller: RoomController,
    pub(crate) overlay: FakeOverlay,
    pub(crate) events: flume::Receiver<RoomStatus>,
    _data_dir: tempfile::TempDir,
}

impl Scenario {
    pub(crate) fn new() -> Self {
        Self::with(FakeOverlay::new(), |_| {})
    }

    pub(crate) fn with(
        overlay: FakeOverlay,
        tweak: impl FnOnce(&mut ControllerOptions),
    ) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let data_dir = tempfile::tempdir().unwrap();
        let mut options = test_options(data_dir.path());
        tweak(&mut options);

        let controller = RoomController::new(overlay.clone(), options).unwrap();
        let events = controller.subscribe();

        Self {
            controller,
            overlay,
            events,
            _data_dir: data_dir,
        }
    }

    pub(crate) async fn wait_until(
        &self,
        what: &str,
        pred: impl Fn(&RoomStatus) -> bool,
    ) -> RoomStatus {
        let deadline = Duration::from_secs(5);
        let poll = async {
            loop {
                let status = self.controller.get_status();
                if pred(&status) {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        };

        match tokio::time::timeout(deadline, poll).await {
            Ok(status) => status,
            Err(_) => panic!(
                "timed out waiting for {what}; last status: {:?}",
                self.controller.get_status()
            ),
        }
    }

    pub(crate) async fn wait_for_state(&self, state: RoomState) -> RoomStatus {
        self.wait_until(&format!("state {state:?}"), |s| s.state == state)
            .await
    }

    /// The distinct states seen so far, in emission order.
    pub(crate) fn seen_states(&self) -> Vec<RoomState> {
        let mut states = Vec::new();
        while let Ok(status) = self.events.try_recv() {
            if states.last() != Some(&status.state) {
                states.push(status.state);
            }
        }
        states
    }
}

/// A loopback stand-in for a running Minecraft server: answers the legacy
/// `0xFE` probe with `0xFF` until the returned task is aborted.
pub(crate) async fn spawn_liveness_responder() -> (u16, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let task = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut probe = [0u8; 1];
                if stream.read_exact(&mut probe).await.is_ok() && probe[0] == 0xFE {
                    let _ = stream.write_all(&[0xFF]).await;
                }
            });
        }
    });

    (port, task)
}

/// Asserts that `expected` occurs as a subsequence of `seen`.
pub(crate) fn assert_trajectory(seen: &[RoomState], expected: &[RoomState]) {
    let mut want = expected.iter();
    let mut next = want.next();
    for state in seen {
        if Some(state) == next {
            next = want.next();
        }
    }
    assert!(
        next.is_none(),
        "expected trajectory {expected:?} within {seen:?}"
    );
}
