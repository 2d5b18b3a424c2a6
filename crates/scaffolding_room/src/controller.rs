//! The room controller: public surface and the run loop.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context};
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use scaffolding_lan::{interfaces, listener, ServerRegistry};
use scaffolding_overlay::OverlayLauncher;
use scaffolding_protocol::room_code::RoomCode;
use scaffolding_protocol::{MachineId, PlayerProfile};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::runtime::RoomRuntime;
use crate::state::{RoomRole, RoomState};
use crate::status::RoomStatus;
use crate::{guest, host, machine_id, vendor};

/// How long `stop` waits for the run task to finish its teardown before
/// letting it detach.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Tunables of the controller. The defaults are the production values; tests
/// shrink the intervals and disable the LAN listener.
#[derive(Clone)]
pub struct ControllerOptions {
    /// Cadence of the state-machine step; bounds reaction latency.
    pub tick_interval: Duration,
    /// Compat mode holds `HostMinecraftDetecting` until a LAN world shows
    /// up and treats a dead world as fatal. Eager mode enters `HostRunning`
    /// right away and picks the port up later.
    pub compat_mode: bool,
    /// Roster eviction timeout handed to the scaffolding server.
    pub heartbeat_timeout: Duration,
    pub overlay_start_timeout: Duration,
    pub overlay_poll_interval: Duration,
    pub discovery_timeout: Duration,
    pub discovery_poll_interval: Duration,
    pub connect_retry_limit: u32,
    pub connect_retry_backoff: Duration,
    /// Cadence of the steady-state health pass (overlay alive, Minecraft
    /// port changes, liveness probe / heartbeat).
    pub health_interval: Duration,
    /// Consecutive failed `0xFE` probes that count as "world gone".
    pub probe_failure_threshold: u32,
    /// Consecutive failed guest heartbeats that count as "host gone".
    pub heartbeat_failure_threshold: u32,
    /// Fixed virtual address for the host node; guests always use overlay
    /// DHCP.
    pub host_virtual_ip: Option<Ipv4Addr>,
    /// The overlay's virtual range; addresses in it never count as "local
    /// LAN" when detecting Minecraft servers.
    pub overlay_network: Ipv4Net,
    /// Relay candidates, validated (DNS, optionally a TCP probe) before
    /// every overlay launch.
    pub relays: Vec<String>,
    pub probe_relays: bool,
    /// Off in tests: no multicast socket, no status pinger; the registry is
    /// fed directly instead.
    pub enable_lan_listener: bool,
    /// Overrides interface enumeration for the "same /24" predicate.
    pub local_networks: Option<Vec<Ipv4Addr>>,
    /// First word of the vendor string.
    pub product_name: String,
    /// Overrides the per-user data directory holding `machine_id.txt`.
    pub data_dir: Option<PathBuf>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            compat_mode: true,
            heartbeat_timeout: Duration::from_secs(10),
            overlay_start_timeout: Duration::from_secs(12),
            overlay_poll_interval: Duration::from_secs(1),
            discovery_timeout: Duration::from_secs(25),
            discovery_poll_interval: Duration::from_secs(1),
            connect_retry_limit: 50,
            connect_retry_backoff: Duration::from_secs(2),
            health_interval: Duration::from_secs(5),
            probe_failure_threshold: 6,
            heartbeat_failure_threshold: 3,
            host_virtual_ip: Some(Ipv4Addr::new(10, 144, 144, 1)),
            overlay_network: Ipv4Net::new(Ipv4Addr::new(10, 144, 0, 0), 16)
                .expect("static overlay network"),
            relays: vec![
                "tcp://relay-eu.scaffolding-mc.net:11010".to_owned(),
                "tcp://relay-us.scaffolding-mc.net:11010".to_owned(),
            ],
            probe_relays: false,
            enable_lan_listener: true,
            local_networks: None,
            product_name: "scaffolding".to_owned(),
            data_dir: None,
        }
    }
}

pub(crate) struct Shared {
    pub(crate) state: RoomState,
    pub(crate) role: Option<RoomRole>,
    pub(crate) error: Option<String>,
    pub(crate) room_code: Option<String>,
    pub(crate) players: Vec<PlayerProfile>,
    pub(crate) minecraft_port: Option<u16>,
    pub(crate) last_update: SystemTime,
    cancel: Option<CancellationToken>,
    run_task: Option<JoinHandle<()>>,
}

pub(crate) struct Inner {
    pub(crate) options: ControllerOptions,
    pub(crate) launcher: Arc<dyn OverlayLauncher>,
    pub(crate) registry: ServerRegistry,
    pub(crate) machine_id: MachineId,
    shared: Mutex<Shared>,
    subscribers: Mutex<Vec<flume::Sender<RoomStatus>>>,
}

/// The heart of the daemon. Owns at most one room at a time and drives it
/// through the Host or Guest track on a fixed tick; every observable change
/// is pushed as a [`RoomStatus`] snapshot.
#[derive(Clone)]
pub struct RoomController {
    inner: Arc<Inner>,
}

impl RoomController {
    pub fn new(
        launcher: impl OverlayLauncher + 'static,
        options: ControllerOptions,
    ) -> anyhow::Result<Self> {
        let machine_id = match &options.data_dir {
            Some(dir) => machine_id::load_or_create_in(dir),
            None => machine_id::load_or_create(),
        }
        .context("loading machine id")?;

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                launcher: Arc::new(launcher),
                registry: ServerRegistry::new(),
                machine_id,
                shared: Mutex::new(Shared {
                    state: RoomState::Idle,
                    role: None,
                    error: None,
                    room_code: None,
                    players: Vec::new(),
                    minecraft_port: None,
                    last_update: SystemTime::now(),
                    cancel: None,
                    run_task: None,
                }),
                subscribers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Current snapshot.
    pub fn get_status(&self) -> RoomStatus {
        snapshot(&self.inner.shared.lock())
    }

    /// Subscribes to status snapshots. Every mutation is delivered to every
    /// subscriber in order.
    pub fn subscribe(&self) -> flume::Receiver<RoomStatus> {
        let (tx, rx) = flume::unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// The LAN server registry, for the façade's server browser.
    pub fn registry(&self) -> ServerRegistry {
        self.inner.registry.clone()
    }

    pub fn machine_id(&self) -> &MachineId {
        &self.inner.machine_id
    }

    /// Opens a room as Host: generates a room code, starts the scaffolding
    /// server and the overlay, then watches for the local Minecraft world.
    pub async fn start_host(
        &self,
        scaffolding_port: u16,
        player_name: &str,
        launcher_custom: Option<&str>,
    ) -> anyhow::Result<()> {
        self.ensure_idle()?;

        let vendor = self.compose_vendor(launcher_custom).await;
        let room_code = RoomCode::generate();
        info!("hosting room {room_code} as {player_name:?}");

        self.start_runtime(
            RoomRole::Host,
            RoomState::HostPrepare,
            room_code,
            player_name,
            vendor,
            scaffolding_port,
        )
    }

    /// Joins a room as Guest using a room code.
    pub async fn start_guest(
        &self,
        room_code: &str,
        player_name: &str,
        launcher_custom: Option<&str>,
    ) -> anyhow::Result<()> {
        self.ensure_idle()?;

        let room_code = RoomCode::parse(room_code).context("invalid room code")?;

        let vendor = self.compose_vendor(launcher_custom).await;
        info!("joining room {room_code} as {player_name:?}");

        self.start_runtime(
            RoomRole::Guest,
            RoomState::GuestPrepare,
            room_code,
            player_name,
            vendor,
            0,
        )
    }

    /// Cancels the room and tears everything down, back to `Idle`.
    pub async fn stop(&self) {
        let (cancel, run_task) = {
            let mut shared = self.inner.shared.lock();
            if shared.state == RoomState::Idle {
                return;
            }
            shared.state = RoomState::Stopping;
            self.inner.publish(&mut shared);
            (shared.cancel.take(), shared.run_task.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(task) = run_task {
            if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
                warn!("room task did not finish teardown in time, detaching");
            }
        }

        let mut shared = self.inner.shared.lock();
        shared.state = RoomState::Idle;
        shared.role = None;
        shared.error = None;
        shared.room_code = None;
        shared.players.clear();
        shared.minecraft_port = None;
        self.inner.publish(&mut shared);
    }

    /// Resets a failed room back to `Idle`. This is a full teardown, not a
    /// resume; it does nothing unless the room is in `Error`.
    pub async fn retry(&self) {
        {
            let shared = self.inner.shared.lock();
            if shared.state != RoomState::Error {
                debug!("retry ignored in state {:?}", shared.state);
                return;
            }
        }
        self.stop().await;
    }

    fn ensure_idle(&self) -> anyhow::Result<()> {
        let shared = self.inner.shared.lock();
        if shared.state != RoomState::Idle {
            bail!("a room is already active (state {:?})", shared.state);
        }
        Ok(())
    }

    async fn compose_vendor(&self, launcher_custom: Option<&str>) -> String {
        let version = match self.inner.launcher.version().await {
            Ok(version) => version,
            Err(e) => {
                warn!("overlay version query failed: {e:#}");
                "unknown".to_owned()
            }
        };
        vendor::compose(&self.inner.options.product_name, &version, launcher_custom)
    }

    fn start_runtime(
        &self,
        role: RoomRole,
        first_state: RoomState,
        room_code: RoomCode,
        player_name: &str,
        vendor: String,
        requested_port: u16,
    ) -> anyhow::Result<()> {
        let runtime = RoomRuntime::new(
            role,
            room_code.clone(),
            player_name.to_owned(),
            vendor,
            requested_port,
        );
        let cancel = runtime.cancel.clone();

        let mut shared = self.inner.shared.lock();
        if shared.state != RoomState::Idle {
            bail!("a room is already active (state {:?})", shared.state);
        }

        shared.state = first_state;
        shared.role = Some(role);
        shared.error = None;
        shared.room_code = Some(room_code.to_string());
        shared.players.clear();
        shared.minecraft_port = None;
        shared.cancel = Some(cancel.clone());

        // The Host needs LAN discovery running to find the Minecraft world.
        if role == RoomRole::Host {
            let registry = self.inner.registry.clone();
            tokio::spawn(registry.clone().run_sweeper(cancel.child_token()));
            if self.inner.options.enable_lan_listener {
                tokio::spawn(registry.clone().run_pinger(cancel.child_token()));
                let listener_cancel = cancel.child_token();
                tokio::spawn(async move {
                    if let Err(e) = listener::run_listener(registry, listener_cancel).await {
                        error!("LAN listener failed: {e:#}");
                    }
                });
            }
        }

        shared.run_task = Some(tokio::spawn(run_loop(self.inner.clone(), runtime)));
        self.inner.publish(&mut shared);
        Ok(())
    }
}

impl Inner {
    pub(crate) fn state(&self) -> RoomState {
        self.shared.lock().state
    }

    pub(crate) fn set_state(&self, state: RoomState) {
        let mut shared = self.shared.lock();
        if shared.state != state {
            debug!("room state {:?} -> {state:?}", shared.state);
            shared.state = state;
            self.publish(&mut shared);
        }
    }

    pub(crate) fn set_minecraft_port(&self, port: Option<u16>) {
        let mut shared = self.shared.lock();
        if shared.minecraft_port != port {
            shared.minecraft_port = port;
            self.publish(&mut shared);
        }
    }

    pub(crate) fn update_players(&self, players: Vec<PlayerProfile>) {
        let mut shared = self.shared.lock();
        if shared.players != players {
            shared.players = players;
            self.publish(&mut shared);
        }
    }

    /// Unconditional snapshot, for the periodic refresh while a room sits
    /// in its running state.
    pub(crate) fn publish_snapshot(&self) {
        let mut shared = self.shared.lock();
        self.publish(&mut shared);
    }

    fn enter_error(&self, message: String) {
        let mut shared = self.shared.lock();
        shared.state = RoomState::Error;
        shared.error = Some(message);
        self.publish(&mut shared);
    }

    /// Candidate /24 networks for the "Minecraft world on our LAN" check.
    pub(crate) fn local_networks(&self) -> Vec<Ipv4Addr> {
        match &self.options.local_networks {
            Some(nets) => nets.clone(),
            None => interfaces::local_ipv4_networks(&[self.options.overlay_network]),
        }
    }

    fn publish(&self, shared: &mut Shared) {
        shared.last_update = SystemTime::now();
        let status = snapshot(shared);
        self.subscribers
            .lock()
            .retain(|tx| tx.send(status.clone()).is_ok());
    }
}

fn snapshot(shared: &Shared) -> RoomStatus {
    RoomStatus {
        state: shared.state,
        role: shared.role,
        error: shared.error.clone(),
        room_code: shared.room_code.clone(),
        players: shared.players.clone(),
        minecraft_port: shared.minecraft_port,
        last_update: shared.last_update,
    }
}

async fn run_loop(inner: Arc<Inner>, mut runtime: RoomRuntime) {
    let cancel = runtime.cancel.clone();
    let mut tick = tokio::time::interval(inner.options.tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        let result = tokio::select! {
            () = cancel.cancelled() => break,
            result = step(&inner, &mut runtime) => result,
        };

        if let Err(e) = result {
            error!("room failed: {e:#}");
            cleanup(runtime).await;
            inner.enter_error(format!("{e:#}"));
            return;
        }
    }

    cleanup(runtime).await;
}

async fn step(inner: &Arc<Inner>, runtime: &mut RoomRuntime) -> anyhow::Result<()> {
    match runtime.role {
        RoomRole::Host => host::step(inner, runtime).await,
        RoomRole::Guest => guest::step(inner, runtime).await,
    }
}

/// Ordered teardown of everything a room owns: rendezvous client, then
/// server, then the LAN rebroadcast, and the overlay child tree last so
/// forwards stay alive until nothing uses them.
async fn cleanup(mut runtime: RoomRuntime) {
    runtime.cancel.cancel();

    runtime.scaffolding_client = None;
    if let Some(server) = runtime.scaffolding_server.take() {
        server.shutdown();
    }
    if let Some(fake) = runtime.fake_server.take() {
        fake.stop();
    }
    if let Some(node) = runtime.node.take() {
        node.shutdown().await;
    }
}
