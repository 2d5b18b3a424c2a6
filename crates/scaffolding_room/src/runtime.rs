//! Per-room runtime state, owned by the controller's run task.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use scaffolding_lan::FakeServer;
use scaffolding_net::{ScaffoldingClient, ScaffoldingServer};
use scaffolding_overlay::NetworkNode;
use scaffolding_protocol::room_code::RoomCode;
use tokio_util::sync::CancellationToken;

use crate::state::RoomRole;

/// Everything a live room owns. Created by `start_host`/`start_guest`,
/// mutated only inside the run task's step function, torn down in one place
/// by the cleanup routine.
pub(crate) struct RoomRuntime {
    pub(crate) role: RoomRole,
    pub(crate) room_code: RoomCode,
    pub(crate) player_name: String,
    pub(crate) vendor: String,
    /// The scaffolding port the caller asked for (host track).
    pub(crate) requested_port: u16,

    /// Root of the room's cancellation tree: the run task, the LAN
    /// discovery tasks, and every pending socket op hang off it.
    pub(crate) cancel: CancellationToken,

    pub(crate) node: Option<Arc<dyn NetworkNode>>,
    /// The overlay's id for this node, once known; reported with heartbeats.
    pub(crate) overlay_node_id: Option<String>,
    pub(crate) scaffolding_server: Option<ScaffoldingServer>,
    pub(crate) scaffolding_client: Option<ScaffoldingClient>,
    pub(crate) fake_server: Option<FakeServer>,

    /// Actually bound scaffolding port (host) or locally forwarded
    /// rendezvous port (guest).
    pub(crate) scaffolding_port: Option<u16>,
    pub(crate) minecraft_port: Option<u16>,
    /// The host's virtual address inside the overlay (guest track).
    pub(crate) center: Option<(Ipv4Addr, u16)>,

    // Step bookkeeping.
    pub(crate) phase_deadline: Option<Instant>,
    pub(crate) next_poll: Option<Instant>,
    pub(crate) next_health: Option<Instant>,
    pub(crate) connect_attempts: u32,
    pub(crate) probe_failures: u32,
    pub(crate) heartbeat_failures: u32,
}

impl RoomRuntime {
    pub(crate) fn new(
        role: RoomRole,
        room_code: RoomCode,
        player_name: String,
        vendor: String,
        requested_port: u16,
    ) -> Self {
        Self {
            role,
            room_code,
            player_name,
            vendor,
            requested_port,
            cancel: CancellationToken::new(),
            node: None,
            overlay_node_id: None,
            scaffolding_server: None,
            scaffolding_client: None,
            fake_server: None,
            scaffolding_port: None,
            minecraft_port: None,
            center: None,
            phase_deadline: None,
            next_poll: None,
            next_health: None,
            connect_attempts: 0,
            probe_failures: 0,
            heartbeat_failures: 0,
        }
    }
}
