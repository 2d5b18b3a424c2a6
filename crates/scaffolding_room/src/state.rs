//! Room lifecycle states.

use serde::Serialize;

/// Where the controller currently is. One closed enumeration per the two
/// tracks plus the shared terminal states; every transition is made by the
/// controller's step function, never by a worker task.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    Idle,
    HostPrepare,
    HostScaffoldingStarting,
    HostOverlayStarting,
    HostMinecraftDetecting,
    HostRunning,
    GuestPrepare,
    GuestOverlayStarting,
    GuestDiscoveringCenter,
    GuestConnectingScaffolding,
    GuestRunning,
    Stopping,
    Error,
}

impl RoomState {
    /// The steady states a room settles into.
    pub fn is_running(self) -> bool {
        matches!(self, Self::HostRunning | Self::GuestRunning)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomRole {
    Host,
    Guest,
}
