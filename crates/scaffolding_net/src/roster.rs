//! Player roster policy.
//!
//! Keyed by machine id, iterated in insertion order. The HOST entry is
//! created exactly once by the controller and is exempt from every mutation
//! path a guest can reach: `c:player_ping` cannot touch it and the
//! heartbeat sweep never evicts it.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use scaffolding_protocol::{PlayerPing, PlayerProfile, ProfileKind};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, PartialEq, Eq, Error)]
pub(crate) enum RosterError {
    #[error("Missing machine_id")]
    MissingMachineId,
    #[error("Cannot modify host profile")]
    HostCollision,
}

struct RosterEntry {
    profile: PlayerProfile,
    last_seen: Instant,
}

#[derive(Default)]
pub(crate) struct Roster {
    entries: IndexMap<String, RosterEntry>,
    host_machine_id: Option<String>,
}

impl Roster {
    /// Installs the singular HOST entry. Replaces a previous host entry if
    /// the controller calls it twice, which only happens within one session.
    pub(crate) fn set_host(&mut self, name: &str, machine_id: &str, vendor: &str) {
        if let Some(old) = self.host_machine_id.take() {
            self.entries.shift_remove(&old);
        }

        self.entries.insert(
            machine_id.to_owned(),
            RosterEntry {
                profile: PlayerProfile {
                    name: name.to_owned(),
                    machine_id: machine_id.to_owned(),
                    vendor: vendor.to_owned(),
                    kind: ProfileKind::Host,
                },
                last_seen: Instant::now(),
            },
        );
        self.host_machine_id = Some(machine_id.to_owned());
    }

    /// Creates or refreshes a GUEST entry from a heartbeat.
    pub(crate) fn apply_ping(&mut self, ping: &PlayerPing) -> Result<(), RosterError> {
        if ping.machine_id.is_empty() {
            return Err(RosterError::MissingMachineId);
        }
        if self.host_machine_id.as_deref() == Some(ping.machine_id.as_str()) {
            return Err(RosterError::HostCollision);
        }

        let now = Instant::now();
        self.entries
            .entry(ping.machine_id.clone())
            .and_modify(|e| {
                e.profile.name = ping.name.clone();
                e.profile.vendor = ping.vendor.clone();
                e.last_seen = now;
            })
            .or_insert_with(|| RosterEntry {
                profile: PlayerProfile {
                    name: ping.name.clone(),
                    machine_id: ping.machine_id.clone(),
                    vendor: ping.vendor.clone(),
                    kind: ProfileKind::Guest,
                },
                last_seen: now,
            });

        Ok(())
    }

    /// Evicts non-HOST entries whose last heartbeat is older than `timeout`.
    pub(crate) fn sweep(&mut self, timeout: Duration) {
        let now = Instant::now();
        self.entries.retain(|machine_id, e| {
            let keep = e.profile.kind == ProfileKind::Host
                || now.duration_since(e.last_seen) <= timeout;
            if !keep {
                debug!("evicting silent player {} ({machine_id})", e.profile.name);
            }
            keep
        });
    }

    /// Snapshot in insertion order.
    pub(crate) fn profiles(&self) -> Vec<PlayerProfile> {
        self.entries.values().map(|e| e.profile.clone()).collect()
    }
}
