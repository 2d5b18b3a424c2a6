//! The vanilla Minecraft LAN announcement payload.
//!
//! Every "Open to LAN" world multicasts `[MOTD]<motd>[/MOTD][AD]<port>[/AD]`
//! to `224.0.2.60:4445` roughly every 1.5 seconds. The format has been
//! stable since 1.3 and is the only discovery mechanism the vanilla client
//! has.

use std::net::{Ipv4Addr, SocketAddrV4};

use once_cell::sync::Lazy;
use regex::Regex;

/// The multicast group vanilla Minecraft announces on.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 2, 60);
pub const MULTICAST_PORT: u16 = 4445;

pub fn multicast_target() -> SocketAddrV4 {
    SocketAddrV4::new(MULTICAST_GROUP, MULTICAST_PORT)
}

static BEACON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[MOTD\](.*?)\[/MOTD\]\[AD\](\d{1,5})\[/AD\]").unwrap());

/// A parsed (or to-be-emitted) LAN announcement.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LanBeacon {
    pub motd: String,
    pub port: u16,
}

impl LanBeacon {
    pub fn new(motd: impl Into<String>, port: u16) -> Self {
        Self {
            motd: motd.into(),
            port,
        }
    }

    /// Renders the wire payload.
    pub fn payload(&self) -> String {
        format!("[MOTD]{}[/MOTD][AD]{}[/AD]", self.motd, self.port)
    }

    /// Parses a datagram payload. Returns `None` for anything that is not a
    /// well-formed announcement with a nonzero port.
    pub fn parse(payload: &str) -> Option<Self> {
        let caps = BEACON_RE.captures(payload)?;
        let port: u16 = caps[2].parse().ok()?;
        if port == 0 {
            return None;
        }
        Some(Self {
            motd: caps[1].to_owned(),
            port,
        })
    }
}
