#![doc = include_str!("../README.md")]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
    rustdoc::missing_crate_level_docs,
    rustdoc::invalid_codeblock_attributes,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::bare_urls,
    rustdoc::invalid_html_tags
)]

pub mod frame;
pub mod machine_id;
pub mod profile;
pub mod room_code;

pub use frame::{
    ScaffoldingRequest, ScaffoldingResponse, MAX_BODY_LEN, MAX_KIND_LEN, STATUS_NOT_READY,
    STATUS_OK, STATUS_UNKNOWN_COMMAND,
};
pub use machine_id::{InvalidMachineId, MachineId};
pub use profile::{PlayerPing, PlayerProfile, ProfileKind, FINGERPRINT};
pub use room_code::{RoomCode, RoomCodeError};

// The `c:*` command namespace understood by every Scaffolding server.
pub const CMD_PING: &str = "c:ping";
pub const CMD_PROTOCOLS: &str = "c:protocols";
pub const CMD_SERVER_PORT: &str = "c:server_port";
pub const CMD_PLAYER_PING: &str = "c:player_ping";
pub const CMD_PLAYER_PROFILES_LIST: &str = "c:player_profiles_list";

/// Overlay hostname prefix for the host's node. Guests discover the host by
/// matching `scaffolding-mc-server-<port>` against the overlay peer list.
pub const CENTER_HOSTNAME_PREFIX: &str = "scaffolding-mc-server-";

/// Overlay hostname prefix for guest nodes.
pub const GUEST_HOSTNAME_PREFIX: &str = "scaffolding-mc-guest-";
