//! Cross-platform process-tree supervision.
//!
//! The overlay daemon forks helpers; killing only the direct child leaks
//! them. On unix every child gets its own process group and teardown
//! signals the whole group, SIGTERM first, SIGKILL after a grace period.
//! On windows `taskkill /T /F` takes the tree down.

use std::process::Command as StdCommand;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

/// Grace between SIGTERM and SIGKILL. Short, so that a stop/retry settles
/// well inside the 2 s budget users expect.
const TERM_GRACE: Duration = Duration::from_millis(800);

/// Process-wide supervision handle. Created lazily by the controller on the
/// first child launch and shared by every RoomRuntime it runs serially;
/// dropping it does not kill anything (teardown is explicit).
#[derive(Clone, Default)]
pub struct ProcessSupervisor {
    children: Arc<Mutex<Vec<u32>>>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepares a command so its process can be torn down as a tree, and
    /// converts it for async spawning.
    pub fn command(&self, mut cmd: StdCommand) -> tokio::process::Command {
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group: signals to -pid reach the daemon and its forks.
            cmd.process_group(0);
        }
        tokio::process::Command::from(cmd)
    }

    /// Records a spawned child for [`kill_all`](Self::kill_all).
    pub fn register(&self, pid: u32) {
        self.children.lock().push(pid);
    }

    /// Terminates one child's process tree and forgets it.
    pub async fn terminate(&self, pid: u32) {
        self.children.lock().retain(|&p| p != pid);
        terminate_tree(pid).await;
    }

    /// Terminates every registered child tree.
    pub async fn kill_all(&self) {
        let pids: Vec<u32> = std::mem::take(&mut *self.children.lock());
        for pid in pids {
            terminate_tree(pid).await;
        }
    }
}

#[cfg(unix)]
async fn terminate_tree(pid: u32) {
    let group = -(pid as i32);

    debug!("sending SIGTERM to process group {pid}");
    if unsafe { libc::kill(group, libc::SIGTERM) } != 0 {
        // Already gone.
        return;
    }

    tokio::time::sleep(TERM_GRACE).await;

    if unsafe { libc::kill(group, 0) } == 0 {
        warn!("process group {pid} survived SIGTERM, sending SIGKILL");
        unsafe { libc::kill(group, libc::SIGKILL) };
    }
}

#[cfg(windows)]
async fn terminate_tree(pid: u32) {
    debug!("terminating process tree {pid}");
    let result = tokio::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => {}
        Ok(output) => debug!(
            "taskkill for {pid} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Err(e) => warn!("failed to run taskkill for {pid}: {e}"),
    }

    // Swallow the grace period either way so both platforms behave alike.
    tokio::time::sleep(TERM_GRACE).await;
}
