//! Child-process implementation of [`NetworkNode`].
//!
//! The overlay ships as two binaries: a long-running daemon that carries the
//! traffic and a CLI that queries its control plane over a local RPC port.
//! The daemon's output is pumped line by line into tracing events; every
//! query shells out to the CLI and parses JSON from stdout.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};

use anyhow::{ensure, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OverlayConfig;
use crate::node::{ForwardProtocol, NetworkNode, NodeInfo, OverlayLauncher, PeerInfo, PortSpec};
use crate::supervise::ProcessSupervisor;

/// Default control-plane RPC port of the bundled overlay distribution.
pub const DEFAULT_RPC_PORT: u16 = 15888;

/// Launches overlay daemons as supervised child processes.
pub struct OverlayProcessLauncher {
    daemon_program: PathBuf,
    cli_program: PathBuf,
    rpc_port: u16,
    supervisor: ProcessSupervisor,
}

impl OverlayProcessLauncher {
    pub fn new(
        daemon_program: impl Into<PathBuf>,
        cli_program: impl Into<PathBuf>,
        supervisor: ProcessSupervisor,
    ) -> Self {
        Self {
            daemon_program: daemon_program.into(),
            cli_program: cli_program.into(),
            rpc_port: DEFAULT_RPC_PORT,
            supervisor,
        }
    }

    pub fn with_rpc_port(mut self, rpc_port: u16) -> Self {
        self.rpc_port = rpc_port;
        self
    }
}

#[async_trait]
impl OverlayLauncher for OverlayProcessLauncher {
    async fn version(&self) -> anyhow::Result<String> {
        let output = tokio::process::Command::new(&self.cli_program)
            .arg("--version")
            .output()
            .await
            .context("running overlay CLI")?;
        ensure!(output.status.success(), "overlay CLI --version failed");

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        // "<binary name> <version>" or a bare version string.
        Ok(stdout.split_whitespace().last().unwrap_or(stdout).to_owned())
    }

    async fn launch(&self, config: OverlayConfig) -> anyhow::Result<Box<dyn NetworkNode>> {
        let node = OverlayProcess::spawn(
            &self.daemon_program,
            self.cli_program.clone(),
            self.rpc_port,
            self.supervisor.clone(),
            &config,
        )?;
        Ok(Box::new(node))
    }
}

/// A running overlay daemon plus the CLI to talk to it.
pub struct OverlayProcess {
    child: Mutex<Child>,
    pid: u32,
    cli_program: PathBuf,
    rpc_port: u16,
    supervisor: ProcessSupervisor,
    /// Stops the stdout/stderr pump tasks.
    cancel: CancellationToken,
}

impl OverlayProcess {
    fn spawn(
        daemon_program: &Path,
        cli_program: PathBuf,
        rpc_port: u16,
        supervisor: ProcessSupervisor,
        config: &OverlayConfig,
    ) -> anyhow::Result<Self> {
        let mut cmd = StdCommand::new(daemon_program);
        cmd.arg("--network-name")
            .arg(&config.network_name)
            .arg("--network-secret")
            .arg(&config.network_secret)
            .arg("--hostname")
            .arg(&config.hostname)
            .arg("--rpc-port")
            .arg(rpc_port.to_string());

        match config.virtual_ipv4 {
            Some(ip) => {
                cmd.arg("--ipv4").arg(ip.to_string());
            }
            None => {
                cmd.arg("--dhcp");
            }
        }

        for relay in &config.relays {
            cmd.arg("--relay").arg(relay);
        }

        // Whitelists are repeated flags; passing none leaves the daemon's
        // default deny-all in place.
        for spec in &config.tcp_whitelist {
            cmd.arg("--tcp-whitelist").arg(spec.to_string());
        }
        for spec in &config.udp_whitelist {
            cmd.arg("--udp-whitelist").arg(spec.to_string());
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = supervisor
            .command(cmd)
            .spawn()
            .context("spawning overlay daemon")?;
        let pid = child
            .id()
            .context("overlay daemon exited before it could be registered")?;
        supervisor.register(pid);

        info!(
            "overlay daemon started (pid {pid}, network {}, hostname {})",
            config.network_name, config.hostname
        );

        let cancel = CancellationToken::new();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, "stdout", cancel.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, "stderr", cancel.clone()));
        }

        Ok(Self {
            child: Mutex::new(child),
            pid,
            cli_program,
            rpc_port,
            supervisor,
            cancel,
        })
    }

    /// Runs one CLI query. `Ok(None)` means the control plane is not
    /// answering (yet); everything else surfaces stdout.
    async fn run_cli(&self, args: &[&str]) -> anyhow::Result<Option<Vec<u8>>> {
        let output = tokio::process::Command::new(&self.cli_program)
            .arg("--rpc-port")
            .arg(self.rpc_port.to_string())
            .args(args)
            .output()
            .await
            .context("running overlay CLI")?;

        if !output.status.success() {
            debug!(
                "overlay CLI {args:?} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }

        Ok(Some(output.stdout))
    }
}

#[async_trait]
impl NetworkNode for OverlayProcess {
    async fn node_info(&self) -> anyhow::Result<Option<NodeInfo>> {
        let Some(stdout) = self.run_cli(&["node", "info", "--json"]).await? else {
            return Ok(None);
        };

        let info: NodeInfo =
            serde_json::from_slice(&stdout).context("malformed node info from overlay CLI")?;
        Ok(Some(info))
    }

    async fn peers(&self) -> anyhow::Result<Option<Vec<PeerInfo>>> {
        let Some(stdout) = self.run_cli(&["peer", "list", "--json"]).await? else {
            return Ok(None);
        };

        let peers: Vec<PeerInfo> =
            serde_json::from_slice(&stdout).context("malformed peer list from overlay CLI")?;
        Ok(Some(peers))
    }

    async fn add_port_forward(
        &self,
        proto: ForwardProtocol,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> anyhow::Result<bool> {
        let proto = proto.to_string();
        let local = local.to_string();
        let remote = remote.to_string();
        let accepted = self
            .run_cli(&[
                "port-forward", "add", "--proto", &proto, "--local", &local, "--remote", &remote,
            ])
            .await?
            .is_some();

        if accepted {
            debug!("overlay forward added: {proto} {local} -> {remote}");
        } else {
            warn!("overlay rejected forward: {proto} {local} -> {remote}");
        }
        Ok(accepted)
    }

    async fn set_tcp_whitelist(&self, ports: &[PortSpec]) -> anyhow::Result<()> {
        self.set_whitelist("tcp", ports).await
    }

    async fn set_udp_whitelist(&self, ports: &[PortSpec]) -> anyhow::Result<()> {
        self.set_whitelist("udp", ports).await
    }

    fn is_alive(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        self.supervisor.terminate(self.pid).await;
    }
}

impl OverlayProcess {
    async fn set_whitelist(&self, proto: &str, ports: &[PortSpec]) -> anyhow::Result<()> {
        let csv = ports
            .iter()
            .map(PortSpec::to_string)
            .collect::<Vec<_>>()
            .join(",");

        // An empty list still replaces: it means deny all inbound.
        let result = self
            .run_cli(&["whitelist", "set", "--proto", proto, "--ports", &csv])
            .await?;
        ensure!(result.is_some(), "overlay refused {proto} whitelist update");

        debug!("overlay {proto} whitelist set to [{csv}]");
        Ok(())
    }
}

async fn pump_lines(
    stream: impl AsyncRead + Unpin,
    label: &'static str,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => debug!(target: "overlay", "{label}: {line}"),
            Ok(None) => return,
            Err(e) => {
                debug!(target: "overlay", "{label} closed: {e}");
                return;
            }
        }
    }
}
