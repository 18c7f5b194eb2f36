//! Safe TCP connect/read/write helper functions.

use std::marker::Unpin;
use std::net::SocketAddr;

use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::{self, Duration};

use crate::utils::BenchError;

/// Upper bound on the body length of a single framed object.
const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// Reads more bytes from `conn_read` into `read_buf`, treating EOF as an
/// error.
async fn fill_read_buf<Conn>(
    read_buf: &mut BytesMut,
    conn_read: &mut Conn,
) -> Result<(), BenchError>
where
    Conn: AsyncRead + Unpin,
{
    if conn_read.read_buf(read_buf).await? == 0 {
        return Err(BenchError::msg("connection closed by peer"));
    }
    Ok(())
}

/// Receives an object of type `T` from readable connection `conn_read`,
/// using `read_buf` as buffer storage for partial reads. Every object is
/// framed as a big-endian `u64` body length followed by a MessagePack body.
/// Returns:
///   - `Ok(obj)` if successful; upon returning, the frame is consumed from
///     the read buffer
///   - `Err(err)` if the connection fails or the body fails to decode; in
///     the latter case the malformed frame is still consumed, so the next
///     call starts at the following frame
///
/// CANCELLATION SAFETY: we cannot use `read_u64()` and `read_exact()` here
/// because this function may be used as a `tokio::select!` branch and those
/// two methods are not cancellation-safe. Instead, bytes already read are
/// stored in the read buffer and will continue to be appended by future
/// invocations until a whole frame is available.
pub(crate) async fn safe_tcp_read<T, Conn>(
    read_buf: &mut BytesMut,
    conn_read: &mut Conn,
) -> Result<T, BenchError>
where
    T: DeserializeOwned,
    Conn: AsyncRead + Unpin,
{
    // read length of obj first
    if read_buf.capacity() < 8 {
        read_buf.reserve(8 - read_buf.capacity());
    }
    while read_buf.len() < 8 {
        fill_read_buf(read_buf, conn_read).await?;
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&read_buf[..8]);
    let obj_len = u64::from_be_bytes(len_bytes);
    if obj_len > MAX_FRAME_LEN {
        return Err(BenchError(format!("frame length {} too large", obj_len)));
    }

    // then read the obj itself
    #[allow(clippy::cast_possible_truncation)]
    let obj_end = 8 + obj_len as usize;
    if read_buf.capacity() < obj_end {
        read_buf.reserve(obj_end - read_buf.capacity());
    }
    while read_buf.len() < obj_end {
        fill_read_buf(read_buf, conn_read).await?;
    }

    // no further awaits ahead, so consuming the frame here is safe
    let frame = read_buf.split_to(obj_end);
    let obj = rmp_serde::from_slice(&frame[8..])?;
    Ok(obj)
}

/// Writes an object of type `T` onto writable connection `conn_write` with
/// the same framing `safe_tcp_read()` expects. When `conn_write` is a
/// buffered writer, the bytes stay in its buffer until flushed.
pub(crate) async fn tcp_write_framed<T, Conn>(
    conn_write: &mut Conn,
    obj: &T,
) -> Result<(), BenchError>
where
    T: Serialize,
    Conn: AsyncWrite + Unpin,
{
    let obj_bytes = rmp_serde::to_vec(obj)?;
    conn_write.write_u64(obj_bytes.len() as u64).await?; // send length first
    conn_write.write_all(&obj_bytes[..]).await?;
    Ok(())
}

/// Resolves a `host:port` string to its first socket address.
pub(crate) async fn resolve_addr(addr: &str) -> Result<SocketAddr, BenchError> {
    lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| BenchError(format!("address '{}' not resolvable", addr)))
}

/// Wrapper over tokio `TcpSocket::connect()` that provides a retrying logic.
pub(crate) async fn tcp_connect_with_retry(
    conn_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpStream, BenchError> {
    loop {
        let socket = if conn_addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_nodelay(true)?;

        match socket.connect(conn_addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
