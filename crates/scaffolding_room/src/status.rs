//! The observable snapshot pushed to subscribers.

use std::time::SystemTime;

use scaffolding_protocol::PlayerProfile;
use serde::Serialize;

use crate::state::{RoomRole, RoomState};

/// Everything a UI needs to render the room. Emitted on every state
/// mutation and whenever a visible field (players, Minecraft port, error)
/// changes; subscribers see a totally ordered sequence.
#[derive(Clone, Debug, Serialize)]
pub struct RoomStatus {
    pub state: RoomState,
    pub role: Option<RoomRole>,
    pub error: Option<String>,
    pub room_code: Option<String>,
    pub players: Vec<PlayerProfile>,
    pub minecraft_port: Option<u16>,
    pub last_update: SystemTime,
}

impl RoomStatus {
    pub fn idle() -> Self {
        Self {
            state: RoomState::Idle,
            role: None,
            error: None,
            room_code: None,
            players: Vec::new(),
            minecraft_port: None,
            last_update: SystemTime::now(),
        }
    }
}
