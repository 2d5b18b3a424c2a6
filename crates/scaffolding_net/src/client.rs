//! The guest-side Scaffolding client.
//!
//! Strictly one request in flight: every operation takes `&mut self` and
//! reads its reply before returning, so replies can never be misattributed.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use scaffolding_protocol::{
    PlayerPing, PlayerProfile, ScaffoldingRequest, ScaffoldingResponse, CMD_PING,
    CMD_PLAYER_PING, CMD_PLAYER_PROFILES_LIST, CMD_PROTOCOLS, CMD_SERVER_PORT, FINGERPRINT,
    STATUS_NOT_READY, STATUS_OK,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::io::{read_response, write_request};

/// Overall budget for establishing the connection. Generous because the
/// first connect may race the overlay still wiring up its port forward.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(64);

pub struct ScaffoldingClient {
    stream: TcpStream,
}

impl ScaffoldingClient {
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .context("scaffolding connect timed out")?
            .context("scaffolding connect failed")?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Sends one request and reads its reply. Exposed for tests and
    /// diagnostics; the typed wrappers below are the real interface.
    pub async fn raw_request(
        &mut self,
        request: ScaffoldingRequest,
    ) -> anyhow::Result<ScaffoldingResponse> {
        trace!("scaffolding request {:?}", request.kind);
        write_request(&mut self.stream, &request).await?;
        read_response(&mut self.stream).await
    }

    /// `c:ping`: true iff the reply echoes the fingerprint byte-for-byte.
    pub async fn ping(&mut self) -> anyhow::Result<bool> {
        let response = self
            .raw_request(ScaffoldingRequest::new(CMD_PING, FINGERPRINT.to_vec()))
            .await?;
        Ok(response.status == STATUS_OK && response.data == FINGERPRINT)
    }

    /// `c:protocols`: the server's supported command kinds.
    pub async fn protocols(&mut self) -> anyhow::Result<Vec<String>> {
        let response = self
            .raw_request(ScaffoldingRequest::new(CMD_PROTOCOLS, Vec::new()))
            .await?;
        ensure_ok(&response, CMD_PROTOCOLS)?;

        let list = String::from_utf8(response.data).context("protocol list is not UTF-8")?;
        Ok(list
            .split('\0')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// `c:server_port`: `None` while the host has not detected a Minecraft
    /// server yet.
    pub async fn server_port(&mut self) -> anyhow::Result<Option<u16>> {
        let response = self
            .raw_request(ScaffoldingRequest::new(CMD_SERVER_PORT, Vec::new()))
            .await?;

        match response.status {
            STATUS_NOT_READY => Ok(None),
            STATUS_OK => {
                ensure!(
                    response.data.len() >= 2,
                    "server port reply is {} bytes, need 2",
                    response.data.len()
                );
                Ok(Some(u16::from_be_bytes([response.data[0], response.data[1]])))
            }
            status => bail!(
                "c:server_port failed with status {status}: {}",
                String::from_utf8_lossy(&response.data)
            ),
        }
    }

    /// `c:player_ping`: the heartbeat that keeps this guest on the roster.
    pub async fn player_ping(&mut self, ping: &PlayerPing) -> anyhow::Result<()> {
        let body = serde_json::to_vec(ping)?;
        let response = self
            .raw_request(ScaffoldingRequest::new(CMD_PLAYER_PING, body))
            .await?;
        ensure_ok(&response, CMD_PLAYER_PING)
    }

    /// `c:player_profiles_list`: the roster in insertion order.
    pub async fn player_profiles_list(&mut self) -> anyhow::Result<Vec<PlayerProfile>> {
        let response = self
            .raw_request(ScaffoldingRequest::new(CMD_PLAYER_PROFILES_LIST, Vec::new()))
            .await?;
        ensure_ok(&response, CMD_PLAYER_PROFILES_LIST)?;

        serde_json::from_slice(&response.data).context("malformed player profile list")
    }
}

fn ensure_ok(response: &ScaffoldingResponse, kind: &str) -> anyhow::Result<()> {
    ensure!(
        response.status == STATUS_OK,
        "{kind} failed with status {}: {}",
        response.status,
        String::from_utf8_lossy(&response.data)
    );
    Ok(())
}
