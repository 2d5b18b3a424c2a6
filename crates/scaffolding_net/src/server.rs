//! The host-side Scaffolding server.
//!
//! One accept task plus one task per connected guest. Every connection is a
//! sequence of request/response pairs; an error on one connection never
//! affects the others.

use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use scaffolding_protocol::{
    PlayerPing, PlayerProfile, ScaffoldingRequest, ScaffoldingResponse, CMD_PING,
    CMD_PLAYER_PING, CMD_PLAYER_PROFILES_LIST, CMD_PROTOCOLS, CMD_SERVER_PORT,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::io::{read_request, write_response};
use crate::roster::Roster;

/// Guests that miss their heartbeat for this long are dropped from the
/// roster.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

const ROSTER_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Command kinds answered by this server, in the order `c:protocols`
/// reports them.
const SUPPORTED_COMMANDS: [&str; 5] = [
    CMD_PING,
    CMD_PROTOCOLS,
    CMD_SERVER_PORT,
    CMD_PLAYER_PING,
    CMD_PLAYER_PROFILES_LIST,
];

struct ServerShared {
    roster: Mutex<Roster>,
    minecraft_port: Mutex<Option<u16>>,
    heartbeat_timeout: Duration,
}

/// Handle to a running Scaffolding server. Dropping it (or calling
/// [`shutdown`](Self::shutdown)) stops the accept loop, every connection
/// task, and the roster sweep.
pub struct ScaffoldingServer {
    shared: Arc<ServerShared>,
    local_port: u16,
    cancel: CancellationToken,
}

impl ScaffoldingServer {
    /// Starts listening on `requested_port`, falling back to an OS-assigned
    /// port if it is taken. The actually bound port is reported by
    /// [`local_port`](Self::local_port).
    pub async fn bind(requested_port: u16, heartbeat_timeout: Duration) -> anyhow::Result<Self> {
        let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, requested_port)).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!("port {requested_port} is taken, falling back to an OS-assigned port");
                TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
                    .await
                    .context("binding fallback port")?
            }
            Err(e) => return Err(e).context("binding scaffolding port"),
        };

        let local_port = listener.local_addr()?.port();
        info!("scaffolding server listening on port {local_port}");

        let shared = Arc::new(ServerShared {
            roster: Mutex::new(Roster::default()),
            minecraft_port: Mutex::new(None),
            heartbeat_timeout,
        });
        let cancel = CancellationToken::new();

        tokio::spawn(accept_loop(listener, shared.clone(), cancel.clone()));
        tokio::spawn(sweep_loop(shared.clone(), cancel.clone()));

        Ok(Self {
            shared,
            local_port,
            cancel,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Installs the singular HOST roster entry.
    pub fn set_host(&self, name: &str, machine_id: &str, vendor: &str) {
        self.shared.roster.lock().set_host(name, machine_id, vendor);
    }

    /// Sets the port `c:server_port` answers with; `None` turns the reply
    /// into the soft "not ready yet" status.
    pub fn set_minecraft_port(&self, port: Option<u16>) {
        *self.shared.minecraft_port.lock() = port;
    }

    /// Roster snapshot in insertion order.
    pub fn players(&self) -> Vec<PlayerProfile> {
        self.shared.roster.lock().profiles()
    }

    /// Stops all server tasks. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ScaffoldingServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<ServerShared>, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote_addr)) => {
                trace!("scaffolding connection from {remote_addr}");
                let shared = shared.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &shared, &cancel).await {
                        debug!("scaffolding connection from {remote_addr} ended: {e:#}");
                    }
                });
            }
            Err(e) => {
                error!("failed to accept scaffolding connection: {e}");
            }
        }
    }
}

async fn sweep_loop(shared: Arc<ServerShared>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(ROSTER_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = interval.tick() => {
                shared.roster.lock().sweep(shared.heartbeat_timeout);
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    shared: &ServerShared,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    stream.set_nodelay(true)?;

    loop {
        let request = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            request = read_request(&mut stream) => request?,
        };

        let Some(request) = request else {
            // Peer hung up between frames.
            return Ok(());
        };

        let response = dispatch(shared, &request);
        write_response(&mut stream, &response).await?;
    }
}

fn dispatch(shared: &ServerShared, request: &ScaffoldingRequest) -> ScaffoldingResponse {
    match request.kind.as_str() {
        CMD_PING => ScaffoldingResponse::ok(request.body.clone()),

        CMD_PROTOCOLS => ScaffoldingResponse::ok(SUPPORTED_COMMANDS.join("\0").into_bytes()),

        CMD_SERVER_PORT => match *shared.minecraft_port.lock() {
            Some(port) => ScaffoldingResponse::ok(port.to_be_bytes().to_vec()),
            None => ScaffoldingResponse::not_ready(),
        },

        CMD_PLAYER_PING => match serde_json::from_slice::<PlayerPing>(&request.body) {
            Ok(ping) => match shared.roster.lock().apply_ping(&ping) {
                Ok(()) => ScaffoldingResponse::ok(Vec::new()),
                Err(e) => ScaffoldingResponse::error(1, e.to_string()),
            },
            Err(e) => ScaffoldingResponse::error(1, format!("malformed player ping: {e}")),
        },

        CMD_PLAYER_PROFILES_LIST => {
            let profiles = shared.roster.lock().profiles();
            match serde_json::to_vec(&profiles) {
                Ok(json) => ScaffoldingResponse::ok(json),
                Err(e) => ScaffoldingResponse::error(1, e.to_string()),
            }
        }

        _ => {
            debug!("unknown scaffolding command {:?}", request.kind);
            ScaffoldingResponse::unknown_command()
        }
    }
}
