//! Async halves of the frame codec.
//!
//! Reads are exact: a frame that stops short kills the connection. Writes
//! go out in one `write_all` followed by a flush, so a peer never observes
//! a partial message.

use std::io::ErrorKind;

use anyhow::{bail, Context};
use scaffolding_protocol::{ScaffoldingRequest, ScaffoldingResponse, MAX_BODY_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one request. `Ok(None)` means the peer closed the connection
/// cleanly before starting a new frame; EOF anywhere inside a frame is an
/// error.
pub async fn read_request<R>(r: &mut R) -> anyhow::Result<Option<ScaffoldingRequest>>
where
    R: AsyncRead + Unpin,
{
    let kind_len = match r.read_u8().await {
        Ok(len) => usize::from(len),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("reading request kind length"),
    };

    let mut kind = vec![0u8; kind_len];
    r.read_exact(&mut kind).await.context("reading request kind")?;
    let kind = String::from_utf8(kind).context("request kind is not UTF-8")?;

    let body_len = r.read_u32().await.context("reading request body length")? as usize;
    if body_len > MAX_BODY_LEN {
        bail!("request body of {body_len} bytes exceeds the {MAX_BODY_LEN} byte limit");
    }

    let mut body = vec![0u8; body_len];
    r.read_exact(&mut body).await.context("reading request body")?;

    Ok(Some(ScaffoldingRequest { kind, body }))
}

pub async fn write_request<W>(w: &mut W, request: &ScaffoldingRequest) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(1 + request.kind.len() + 4 + request.body.len());
    request.encode(&mut buf)?;
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_response<R>(r: &mut R) -> anyhow::Result<ScaffoldingResponse>
where
    R: AsyncRead + Unpin,
{
    let status = r.read_u8().await.context("reading response status")?;

    let data_len = r.read_u32().await.context("reading response data length")? as usize;
    if data_len > MAX_BODY_LEN {
        bail!("response data of {data_len} bytes exceeds the {MAX_BODY_LEN} byte limit");
    }

    let mut data = vec![0u8; data_len];
    r.read_exact(&mut data).await.context("reading response data")?;

    Ok(ScaffoldingResponse { status, data })
}

pub async fn write_response<W>(w: &mut W, response: &ScaffoldingResponse) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(1 + 4 + response.data.len());
    response.encode(&mut buf)?;
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let request = ScaffoldingRequest::new("c:ping", vec![1, 2, 3]);

        write_request(&mut a, &request).await.unwrap();
        let read = read_request(&mut b).await.unwrap().unwrap();
        assert_eq!(read, request);
    }

    #[tokio::test]
    async fn clean_eof_reads_as_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_request(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_frame_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        // A kind-length byte promising more than will ever arrive.
        a.write_all(&[10, b'c']).await.unwrap();
        drop(a);
        assert!(read_request(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn oversize_response_header_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut header = vec![0u8];
        header.extend_from_slice(&((MAX_BODY_LEN as u32 + 1).to_be_bytes()));
        a.write_all(&header).await.unwrap();
        assert!(read_response(&mut b).await.is_err());
    }
}
