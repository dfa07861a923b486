//! Binary framing primitives.
//!
//! All integers are big-endian. Strings carry a `u16` byte length followed by
//! UTF-8. File bodies are raw bytes copied in [`CHUNK_SIZE`] pieces until the
//! declared length is satisfied; a single read is never assumed to return the
//! whole body.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::command::{Reply, Request, INTRODUCE_REPLIES};
use crate::WireError;

/// Default TCP port for the relay.
pub const DEFAULT_PORT: u16 = 59090;

/// Chunk size for streaming file bodies.
pub const CHUNK_SIZE: usize = 8192;

/// Longest string the `u16` length prefix can carry.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Write a request code.
pub async fn write_request<W>(writer: &mut W, request: Request) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_i32(request.code()).await?;
    Ok(())
}

/// Read and decode a request code.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, WireError>
where
    R: AsyncRead + Unpin,
{
    let code = reader.read_i32().await?;
    Request::from_code(code)
}

/// Write a reply code.
pub async fn write_reply<W>(writer: &mut W, reply: Reply) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_i32(reply.code()).await?;
    Ok(())
}

/// Read and decode a reply code without checking it against a request.
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply, WireError>
where
    R: AsyncRead + Unpin,
{
    let code = reader.read_i32().await?;
    Reply::from_code(code)
}

/// Read the peer's answer to `request` and reject anything outside its reply table.
pub async fn expect_reply<R>(reader: &mut R, request: Request) -> Result<Reply, WireError>
where
    R: AsyncRead + Unpin,
{
    let code = reader.read_i32().await?;
    match Reply::from_code(code) {
        Ok(reply) if request.accepts(reply) => Ok(reply),
        _ => Err(WireError::UnexpectedReply {
            request,
            actual: code,
        }),
    }
}

/// Read the answer to an introduce string. Returns the raw code on violation.
pub async fn read_introduce_reply<R>(reader: &mut R) -> Result<Result<Reply, i32>, WireError>
where
    R: AsyncRead + Unpin,
{
    let code = reader.read_i32().await?;
    Ok(match Reply::from_code(code) {
        Ok(reply) if INTRODUCE_REPLIES.contains(&reply) => Ok(reply),
        _ => Err(code),
    })
}

/// Write a length-prefixed UTF-8 string.
pub async fn write_string<W>(writer: &mut W, value: &str) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = value.as_bytes();
    if bytes.len() > MAX_STRING_LEN {
        return Err(WireError::StringTooLong(bytes.len()));
    }
    writer.write_u16(bytes.len() as u16).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

/// Read a length-prefixed UTF-8 string.
pub async fn read_string<R>(reader: &mut R) -> Result<String, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| WireError::InvalidUtf8)
}

/// Write a 64-bit file length.
pub async fn write_len<W>(writer: &mut W, len: u64) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let len = i64::try_from(len).map_err(|_| too_large("file length", len))?;
    writer.write_i64(len).await?;
    Ok(())
}

/// Read a 64-bit file length.
pub async fn read_len<R>(reader: &mut R) -> Result<u64, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_i64().await?;
    u64::try_from(len).map_err(|_| WireError::NegativeLength(len))
}

/// Write a 32-bit entry count.
pub async fn write_count<W>(writer: &mut W, count: usize) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let count = i32::try_from(count).map_err(|_| too_large("entry count", count as u64))?;
    writer.write_i32(count).await?;
    Ok(())
}

/// Read a 32-bit entry count.
pub async fn read_count<R>(reader: &mut R) -> Result<usize, WireError>
where
    R: AsyncRead + Unpin,
{
    let count = reader.read_i32().await?;
    usize::try_from(count).map_err(|_| WireError::NegativeCount(count))
}

fn too_large(what: &str, value: u64) -> WireError {
    std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("{what} {value} does not fit the wire field"),
    )
    .into()
}

/// Copy exactly `len` bytes from `reader` to `writer` in bounded chunks.
pub async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, len: u64) -> Result<u64, WireError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; CHUNK_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream ended with {} of {} bytes outstanding", remaining, len),
            )
            .into());
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(len)
}
