//! Client-visible request/reply records exchanged with replicas.
//!
//! A request on the wire is a one-byte operation marker followed by a
//! length-framed MessagePack `Propose`; a reply is a length-framed
//! `ProposeReply` with no marker.

use std::marker::Unpin;

use crate::utils::{safe_tcp_read, tcp_write_framed, BenchError};

use bytes::{Buf, BytesMut};

use serde::{Deserialize, Serialize};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Request sequence ID type.
pub type RequestId = u64;

/// Server replica index type.
pub type ReplicaId = u8;

/// Key type carried by commands.
pub type Key = i64;

/// Value type carried by commands and replies.
pub type Value = i64;

/// Operation marker byte preceding every proposal.
pub const PROPOSE: u8 = 0;

/// Reply value a replica uses to signal a read served without cluster
/// coordination.
pub const LOCAL_READ_SENTINEL: Value = 1000772;

/// Operation kind of a command.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Operation {
    Put,
    Get,
}

/// State machine command carried by a proposal.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct Command {
    pub op: Operation,
    pub key: Key,
    pub value: Value,
}

/// Proposal record sent to a replica.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct Propose {
    /// Process-wide sequence ID of this request.
    pub command_id: RequestId,

    /// The command to be replicated.
    pub command: Command,

    /// Round-scoped tag, set to the index of the issuing round.
    pub tag: u32,
}

/// Reply record received from a replica.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct ProposeReply {
    /// True if the command was committed/executed successfully.
    pub ok: bool,

    /// Sequence ID of the request this reply answers.
    pub command_id: RequestId,

    /// Result value; `LOCAL_READ_SENTINEL` marks a locally served read.
    pub value: Value,

    /// Replica-side timestamp, opaque to the driver.
    pub timestamp: i64,
}

/// Writes a marker-prefixed proposal onto `conn_write`. Nothing is flushed.
pub async fn write_propose<W>(
    conn_write: &mut W,
    propose: &Propose,
) -> Result<(), BenchError>
where
    W: AsyncWrite + Unpin,
{
    conn_write.write_u8(PROPOSE).await?;
    tcp_write_framed(conn_write, propose).await
}

/// Reads a marker-prefixed proposal from `conn_read`. Used by replica-side
/// peers; not cancellation-safe.
pub async fn read_propose<R>(
    read_buf: &mut BytesMut,
    conn_read: &mut R,
) -> Result<Propose, BenchError>
where
    R: AsyncRead + Unpin,
{
    let marker = if read_buf.is_empty() {
        conn_read.read_u8().await?
    } else {
        let marker = read_buf[0];
        read_buf.advance(1);
        marker
    };
    if marker != PROPOSE {
        return Err(BenchError(format!("unknown op marker {}", marker)));
    }
    safe_tcp_read(read_buf, conn_read).await
}

/// Writes a reply record onto `conn_write`. Nothing is flushed.
pub async fn write_reply<W>(
    conn_write: &mut W,
    reply: &ProposeReply,
) -> Result<(), BenchError>
where
    W: AsyncWrite + Unpin,
{
    tcp_write_framed(conn_write, reply).await
}

/// Reads one reply record from `conn_read`. A record that fails to decode
/// is consumed and reported as an error.
pub async fn read_reply<R>(
    read_buf: &mut BytesMut,
    conn_read: &mut R,
) -> Result<ProposeReply, BenchError>
where
    R: AsyncRead + Unpin,
{
    safe_tcp_read(read_buf, conn_read).await
}
