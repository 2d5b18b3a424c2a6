//! Liveness and status probes for Minecraft servers.
//!
//! Two generations of the protocol are spoken here. The legacy probe is a
//! single `0xFE` byte answered by `0xFF`, enough to tell "alive" from
//! "gone". The status probe is the modern varint-framed Server-List-Ping
//! (handshake with next-state Status, then a status request) whose reply is
//! a JSON document.

use std::net::SocketAddrV4;
use std::time::Duration;

use anyhow::{bail, ensure, Context};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Protocol version sent in the status handshake. 47 (1.8) is old enough
/// that every server answers it and irrelevant to a pure status query.
const HANDSHAKE_PROTOCOL: i32 = 47;

pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Longest status reply we are willing to buffer.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Decoded Server-List-Ping reply.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ServerStatus {
    pub version: String,
    pub protocol: i64,
    pub online: i64,
    pub max: i64,
    pub description: String,
}

/// Legacy liveness probe against `127.0.0.1:<port>`: one `0xFE` out, alive
/// iff one `0xFF` comes back.
pub async fn probe_liveness(port: u16) -> bool {
    let attempt = async {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.ok()?;
        stream.write_all(&[0xFE]).await.ok()?;
        let mut reply = [0u8; 1];
        stream.read_exact(&mut reply).await.ok()?;
        Some(reply[0] == 0xFF)
    };

    matches!(timeout(LIVENESS_TIMEOUT, attempt).await, Ok(Some(true)))
}

/// Runs a modern Server-List-Ping against `endpoint` and decodes the JSON
/// status reply.
pub async fn probe_status(endpoint: SocketAddrV4) -> anyhow::Result<ServerStatus> {
    timeout(STATUS_TIMEOUT, status_query(endpoint))
        .await
        .context("status probe timed out")?
}

async fn status_query(endpoint: SocketAddrV4) -> anyhow::Result<ServerStatus> {
    let mut stream = TcpStream::connect(endpoint).await?;

    // Handshake: id 0, protocol version, server address, port, next-state 1.
    let mut handshake = Vec::new();
    write_varint(0x00, &mut handshake);
    write_varint(HANDSHAKE_PROTOCOL, &mut handshake);
    write_string(&endpoint.ip().to_string(), &mut handshake);
    handshake.extend_from_slice(&endpoint.port().to_be_bytes());
    write_varint(1, &mut handshake);
    write_frame(&mut stream, &handshake).await?;

    // Status request: id 0, empty.
    write_frame(&mut stream, &[0x00]).await?;

    let frame = read_frame(&mut stream).await?;
    let mut r = frame.as_slice();

    let packet_id = read_varint(&mut r)?;
    ensure!(packet_id == 0x00, "unexpected status packet id {packet_id}");

    let json = read_string(&mut r)?;
    parse_status(&json)
}

fn parse_status(json: &str) -> anyhow::Result<ServerStatus> {
    #[derive(Deserialize)]
    struct RawStatus {
        version: RawVersion,
        players: RawPlayers,
        #[serde(default)]
        description: serde_json::Value,
    }

    #[derive(Deserialize)]
    struct RawVersion {
        name: String,
        protocol: i64,
    }

    #[derive(Deserialize)]
    struct RawPlayers {
        online: i64,
        max: i64,
    }

    let raw: RawStatus = serde_json::from_str(json).context("malformed status JSON")?;

    Ok(ServerStatus {
        version: raw.version.name,
        protocol: raw.version.protocol,
        online: raw.players.online,
        max: raw.players.max,
        description: description_text(&raw.description),
    })
}

/// The `description` field is either a plain string or a text component
/// object; anything unrecognized maps to `"unknown"`.
fn description_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(obj) => obj
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("unknown")
            .to_owned(),
        _ => "unknown".to_owned(),
    }
}

async fn write_frame(stream: &mut TcpStream, content: &[u8]) -> anyhow::Result<()> {
    let mut frame = Vec::with_capacity(content.len() + 5);
    write_varint(content.len() as i32, &mut frame);
    frame.extend_from_slice(content);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
    let len = read_varint_async(stream).await?;
    ensure!(
        (0..=MAX_FRAME_LEN as i32).contains(&len),
        "status frame length {len} out of range"
    );
    let mut frame = vec![0u8; len as usize];
    stream.read_exact(&mut frame).await?;
    Ok(frame)
}

fn write_varint(mut val: i32, buf: &mut Vec<u8>) {
    loop {
        if (val & !0x7F) == 0 {
            buf.push(val as u8);
            return;
        }
        buf.push(((val & 0x7F) | 0x80) as u8);
        val = ((val as u32) >> 7) as i32;
    }
}

fn write_string(s: &str, buf: &mut Vec<u8>) {
    write_varint(s.len() as i32, buf);
    buf.extend_from_slice(s.as_bytes());
}

fn read_varint(r: &mut &[u8]) -> anyhow::Result<i32> {
    let mut val = 0i32;
    for i in 0..5 {
        let Some((&byte, rest)) = r.split_first() else {
            bail!("incomplete varint");
        };
        *r = rest;
        val |= i32::from(byte & 0x7F) << (i * 7);
        if byte & 0x80 == 0 {
            return Ok(val);
        }
    }
    bail!("varint is too large")
}

fn read_string(r: &mut &[u8]) -> anyhow::Result<String> {
    let len = read_varint(r)?;
    ensure!(
        (0..=MAX_FRAME_LEN as i32).contains(&len),
        "string length {len} out of range"
    );
    let len = len as usize;
    ensure!(r.len() >= len, "string truncated");
    let (head, rest) = r.split_at(len);
    let s = std::str::from_utf8(head).context("string is not UTF-8")?;
    *r = rest;
    Ok(s.to_owned())
}

async fn read_varint_async(stream: &mut TcpStream) -> anyhow::Result<i32> {
    let mut val = 0i32;
    for i in 0..5 {
        let byte = stream.read_u8().await?;
        val |= i32::from(byte & 0x7F) << (i * 7);
        if byte & 0x80 == 0 {
            return Ok(val);
        }
    }
    bail!("varint is too large")
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn varint_round_trip() {
        for n in [0, 1, 127, 128, 255, 25565, i32::MAX, -1, i32::MIN] {
            let mut buf = Vec::new();
            write_varint(n, &mut buf);
            assert!(buf.len() <= 5);

            let mut slice = buf.as_slice();
            assert_eq!(read_varint(&mut slice).unwrap(), n);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn description_variants() {
        assert_eq!(description_text(&serde_json::json!("hello")), "hello");
        assert_eq!(
            description_text(&serde_json::json!({"text": "component"})),
            "component"
        );
        assert_eq!(description_text(&serde_json::json!({"extra": []})), "unknown");
        assert_eq!(description_text(&serde_json::json!(42)), "unknown");
        assert_eq!(description_text(&serde_json::Value::Null), "unknown");
    }

    #[test]
    fn parses_full_status_json() {
        let status = parse_status(
            r#"{"version":{"name":"1.20.1","protocol":763},
                "players":{"online":3,"max":8},
                "description":{"text":"Alice's World"}}"#,
        )
        .unwrap();
        assert_eq!(status.version, "1.20.1");
        assert_eq!(status.protocol, 763);
        assert_eq!(status.online, 3);
        assert_eq!(status.max, 8);
        assert_eq!(status.description, "Alice's World");
    }

    #[tokio::test]
    async fn status_probe_against_minimal_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            // Swallow handshake + request frames.
            for _ in 0..2 {
                let len = read_varint_async(&mut stream).await.unwrap();
                let mut frame = vec![0u8; len as usize];
                stream.read_exact(&mut frame).await.unwrap();
            }

            let json = r#"{"version":{"name":"1.20.1","protocol":763},"players":{"online":0,"max":20},"description":"hi"}"#;
            let mut content = Vec::new();
            write_varint(0x00, &mut content);
            write_string(json, &mut content);
            write_frame(&mut stream, &content).await.unwrap();
        });

        let status = probe_status(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
            .await
            .unwrap();
        assert_eq!(status.max, 20);
        assert_eq!(status.description, "hi");
    }

    #[tokio::test]
    async fn liveness_probe_happy_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut probe = [0u8; 1];
            stream.read_exact(&mut probe).await.unwrap();
            assert_eq!(probe[0], 0xFE);
            stream.write_all(&[0xFF]).await.unwrap();
        });

        assert!(probe_liveness(port).await);
    }

    #[tokio::test]
    async fn liveness_probe_fails_on_closed_port() {
        // Bind-then-drop to get a port that is almost certainly closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!probe_liveness(port).await);
    }

    #[tokio::test]
    async fn liveness_probe_fails_on_wrong_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut probe = [0u8; 1];
            stream.read_exact(&mut probe).await.unwrap();
            stream.write_all(&[0x00]).await.unwrap();
        });

        assert!(!probe_liveness(port).await);
    }
}
