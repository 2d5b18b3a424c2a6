//! Player roster data carried over `c:player_ping` and
//! `c:player_profiles_list`.

use serde::{Deserialize, Serialize};

/// Fixed challenge sent with `c:ping`. The reply must echo it byte-for-byte,
/// which is how a guest tells a Scaffolding server apart from whatever else
/// might be listening on the forwarded port.
pub const FINGERPRINT: [u8; 16] = *b"scaffolding-ping";

/// Privilege class of a roster entry.
///
/// `Host` is singular and immortal: it is created once by the host
/// controller and is neither heartbeat-swept nor replaceable over the wire.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProfileKind {
    Host,
    Guest,
    Local,
}

/// One entry of the roster returned by `c:player_profiles_list`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub name: String,
    /// 32 lowercase hex chars; the identity key of the entry.
    pub machine_id: String,
    pub vendor: String,
    pub kind: ProfileKind,
}

/// JSON body of a `c:player_ping` request.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PlayerPing {
    pub name: String,
    pub machine_id: String,
    pub vendor: String,
    /// Legacy field name kept for wire compatibility with older guests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub easytier_id: Option<String>,
}
