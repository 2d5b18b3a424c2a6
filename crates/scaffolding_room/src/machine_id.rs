//! Per-installation machine id, persisted under the user's data directory.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use directories::ProjectDirs;
use scaffolding_protocol::MachineId;
use tempfile::NamedTempFile;
use tracing::warn;

const FILE_NAME: &str = "machine_id.txt";

/// Loads the machine id from the per-user data directory, creating it on
/// first run.
pub fn load_or_create() -> anyhow::Result<MachineId> {
    let dirs =
        ProjectDirs::from("", "", "scaffolding").context("no usable home directory found")?;
    load_or_create_in(dirs.data_dir())
}

/// Same as [`load_or_create`] with an explicit directory.
///
/// A file that fails validation is replaced with a fresh id rather than
/// failing startup; the id only needs to be stable, not recoverable.
pub fn load_or_create_in(dir: &Path) -> anyhow::Result<MachineId> {
    let path = dir.join(FILE_NAME);

    if let Ok(content) = fs::read_to_string(&path) {
        match MachineId::parse(content.trim()) {
            Ok(id) => return Ok(id),
            Err(e) => warn!("replacing invalid {FILE_NAME}: {e}"),
        }
    }

    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let id = MachineId::random();

    // Write-then-rename so a crash can never leave a half-written id.
    let mut tmp = NamedTempFile::new_in(dir).context("creating temporary id file")?;
    tmp.write_all(id.as_str().as_bytes())?;
    tmp.persist(&path)
        .with_context(|| format!("persisting {}", path.display()))?;

    Ok(id)
}
