//! The length-prefixed Scaffolding frame codec.
//!
//! Request wire format: `kind_len:u8 | kind:utf8 | body_len:u32 BE | body`.
//! Response wire format: `status:u8 | data_len:u32 BE | data`.
//! All multi-byte integers are big-endian.

use std::io::Write;

use anyhow::{bail, ensure, Context};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Command kinds are length-prefixed with a single byte.
pub const MAX_KIND_LEN: usize = u8::MAX as usize;

/// Upper bound for a request body or response data, in bytes.
pub const MAX_BODY_LEN: usize = 1024 * 1024;

/// Success.
pub const STATUS_OK: u8 = 0;
/// Soft failure: the server cannot answer *yet* (e.g. no Minecraft server
/// detected). The caller should ask again later.
pub const STATUS_NOT_READY: u8 = 32;
/// The request kind is not recognized.
pub const STATUS_UNKNOWN_COMMAND: u8 = 255;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ScaffoldingRequest {
    pub kind: String,
    pub body: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ScaffoldingResponse {
    pub status: u8,
    pub data: Vec<u8>,
}

impl ScaffoldingRequest {
    pub fn new(kind: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            body: body.into(),
        }
    }

    pub fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        ensure!(
            self.kind.len() <= MAX_KIND_LEN,
            "request kind of {} bytes exceeds the {MAX_KIND_LEN} byte limit",
            self.kind.len()
        );
        ensure!(
            self.body.len() <= MAX_BODY_LEN,
            "request body of {} bytes exceeds the {MAX_BODY_LEN} byte limit",
            self.body.len()
        );

        w.write_u8(self.kind.len() as u8)?;
        w.write_all(self.kind.as_bytes())?;
        w.write_u32::<BigEndian>(self.body.len() as u32)?;
        w.write_all(&self.body)?;
        Ok(())
    }

    pub fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let kind_len = r.read_u8()? as usize;
        let kind = read_vec(r, kind_len).context("reading request kind")?;
        let kind = String::from_utf8(kind).context("request kind is not UTF-8")?;

        let body_len = r.read_u32::<BigEndian>()? as usize;
        if body_len > MAX_BODY_LEN {
            bail!("request body of {body_len} bytes exceeds the {MAX_BODY_LEN} byte limit");
        }
        let body = read_vec(r, body_len).context("reading request body")?;

        Ok(Self { kind, body })
    }
}

impl ScaffoldingResponse {
    pub fn ok(data: impl Into<Vec<u8>>) -> Self {
        Self {
            status: STATUS_OK,
            data: data.into(),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            status: STATUS_NOT_READY,
            data: Vec::new(),
        }
    }

    pub fn unknown_command() -> Self {
        Self {
            status: STATUS_UNKNOWN_COMMAND,
            data: Vec::new(),
        }
    }

    /// An error reply; `message` travels as UTF-8 in `data`.
    pub fn error(status: u8, message: impl Into<String>) -> Self {
        debug_assert!(status != STATUS_OK);
        Self {
            status,
            data: message.into().into_bytes(),
        }
    }

    pub fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        ensure!(
            self.data.len() <= MAX_BODY_LEN,
            "response data of {} bytes exceeds the {MAX_BODY_LEN} byte limit",
            self.data.len()
        );

        w.write_u8(self.status)?;
        w.write_u32::<BigEndian>(self.data.len() as u32)?;
        w.write_all(&self.data)?;
        Ok(())
    }

    pub fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let status = r.read_u8()?;
        let data_len = r.read_u32::<BigEndian>()? as usize;
        if data_len > MAX_BODY_LEN {
            bail!("response data of {data_len} bytes exceeds the {MAX_BODY_LEN} byte limit");
        }
        let data = read_vec(r, data_len).context("reading response data")?;

        Ok(Self { status, data })
    }
}

fn read_vec(r: &mut &[u8], len: usize) -> anyhow::Result<Vec<u8>> {
    ensure!(r.len() >= len, "frame truncated: need {len} bytes, have {}", r.len());
    let (head, rest) = r.split_at(len);
    *r = rest;
    Ok(head.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let req = ScaffoldingRequest::new("c:ping", vec![0xAB; 16]);

        let mut buf = Vec::new();
        req.encode(&mut buf).unwrap();

        let mut slice = buf.as_slice();
        let decoded = ScaffoldingRequest::decode(&mut slice).unwrap();
        assert!(slice.is_empty());
        assert_eq!(req, decoded);

        // Re-encoding the decoded frame reproduces the bytes exactly.
        let mut buf2 = Vec::new();
        decoded.encode(&mut buf2).unwrap();
        assert_eq!(buf, buf2);
    }

    #[test]
    fn response_round_trip() {
        for resp in [
            ScaffoldingResponse::ok(b"data".to_vec()),
            ScaffoldingResponse::not_ready(),
            ScaffoldingResponse::unknown_command(),
            ScaffoldingResponse::error(1, "Missing machine_id"),
        ] {
            let mut buf = Vec::new();
            resp.encode(&mut buf).unwrap();

            let mut slice = buf.as_slice();
            let decoded = ScaffoldingResponse::decode(&mut slice).unwrap();
            assert!(slice.is_empty());
            assert_eq!(resp, decoded);
        }
    }

    #[test]
    fn oversize_body_rejected() {
        let req = ScaffoldingRequest::new("c:ping", vec![0; MAX_BODY_LEN + 1]);
        assert!(req.encode(&mut Vec::new()).is_err());

        // A forged header claiming a body past the limit must be rejected
        // before any allocation happens.
        let mut buf = Vec::new();
        buf.push(6);
        buf.extend_from_slice(b"c:ping");
        buf.extend_from_slice(&((MAX_BODY_LEN as u32 + 1).to_be_bytes()));
        let mut slice = buf.as_slice();
        assert!(ScaffoldingRequest::decode(&mut slice).is_err());
    }

    #[test]
    fn oversize_kind_rejected() {
        let req = ScaffoldingRequest::new("x".repeat(MAX_KIND_LEN + 1), Vec::new());
        assert!(req.encode(&mut Vec::new()).is_err());
    }

    #[test]
    fn truncated_frame_rejected() {
        let req = ScaffoldingRequest::new("c:protocols", b"abc".to_vec());
        let mut buf = Vec::new();
        req.encode(&mut buf).unwrap();

        for cut in 0..buf.len() {
            let mut slice = &buf[..cut];
            assert!(ScaffoldingRequest::decode(&mut slice).is_err());
        }
    }

    #[test]
    fn empty_body_is_valid() {
        let req = ScaffoldingRequest::new("c:protocols", Vec::new());
        let mut buf = Vec::new();
        req.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 1 + "c:protocols".len() + 4);
        let decoded = ScaffoldingRequest::decode(&mut buf.as_slice()).unwrap();
        assert!(decoded.body.is_empty());
    }
}
