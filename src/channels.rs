//! Replica channel set: one persistent split TCP connection per replica.

use crate::utils::{resolve_addr, tcp_connect_with_retry, BenchError};
use crate::wire::{read_reply, write_propose, Propose, ProposeReply, ReplicaId};

use bytes::BytesMut;

use futures::future::join_all;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Inbound half of a replica channel, lent to one reply collector at a
/// time.
#[derive(Debug)]
pub struct ReplicaReader {
    /// Which replica this reader belongs to.
    replica: ReplicaId,

    /// Read-half split of the TCP connection stream.
    conn_read: OwnedReadHalf,

    /// Reply read buffer; bytes of not-yet-consumed replies persist here
    /// across rounds.
    read_buf: BytesMut,
}

impl ReplicaReader {
    /// Which replica this reader belongs to.
    #[inline]
    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    /// Receives the next reply record.
    pub async fn recv_reply(&mut self) -> Result<ProposeReply, BenchError> {
        read_reply(&mut self.read_buf, &mut self.conn_read).await
    }
}

/// Connection state of one replica.
#[derive(Debug)]
struct ReplicaChannel {
    /// Remote endpoint string.
    addr: String,

    /// Buffered write-half; `None` if never connected or closed.
    writer: Option<BufWriter<OwnedWriteHalf>>,

    /// Read-half; `None` if never connected, closed, or currently lent.
    reader: Option<ReplicaReader>,

    /// Number of proposals written.
    sent: u64,

    /// Number of explicit flushes performed.
    flushes: u64,
}

impl ReplicaChannel {
    /// Connects to a replica; failure leaves the channel unusable.
    async fn connect(replica: ReplicaId, addr: &str, retries: u8) -> Self {
        let mut channel = ReplicaChannel {
            addr: addr.into(),
            writer: None,
            reader: None,
            sent: 0,
            flushes: 0,
        };

        let stream = match resolve_addr(addr).await {
            Ok(sock_addr) => tcp_connect_with_retry(sock_addr, retries).await,
            Err(e) => Err(e),
        };
        match stream {
            Ok(stream) => {
                let (read_half, write_half) = stream.into_split();
                channel.writer = Some(BufWriter::new(write_half));
                channel.reader = Some(ReplicaReader {
                    replica,
                    conn_read: read_half,
                    read_buf: BytesMut::with_capacity(8 + 1024),
                });
                pf_debug!("connected to replica {} '{}'", replica, addr);
            }
            Err(e) => {
                pf_warn!(
                    "error connecting to replica {} '{}': {}",
                    replica,
                    addr,
                    e
                );
            }
        }
        channel
    }

    /// Flushes and shuts down the write-half, dropping the read-half.
    async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                pf_debug!("error closing channel to '{}': {}", self.addr, e);
            }
        }
        self.reader = None;
    }
}

/// Set of channels to all replicas in use, indexed by replica ID.
#[derive(Debug)]
pub struct ReplicaChannels {
    channels: Vec<ReplicaChannel>,
}

impl ReplicaChannels {
    /// Connects to every given endpoint concurrently. Endpoints that fail to
    /// connect are logged and left unusable for the rest of the run.
    pub async fn connect(endpoints: &[String], retries: u8) -> Self {
        let channels = join_all(endpoints.iter().enumerate().map(
            |(replica, addr)| {
                ReplicaChannel::connect(replica as ReplicaId, addr, retries)
            },
        ))
        .await;
        ReplicaChannels { channels }
    }

    /// Number of replicas in the set, usable or not.
    #[inline]
    pub fn population(&self) -> u8 {
        self.channels.len() as u8
    }

    /// True if the replica's outbound path is connected.
    #[inline]
    pub fn is_usable(&self, replica: ReplicaId) -> bool {
        self.channels
            .get(replica as usize)
            .is_some_and(|c| c.writer.is_some())
    }

    /// Writes a proposal into the replica's outbound buffer.
    pub async fn send(
        &mut self,
        replica: ReplicaId,
        propose: &Propose,
    ) -> Result<(), BenchError> {
        let channel = self.channel_mut(replica)?;
        let Some(writer) = channel.writer.as_mut() else {
            return Err(BenchError(format!(
                "channel to replica {} unusable",
                replica
            )));
        };
        write_propose(writer, propose).await?;
        channel.sent += 1;
        Ok(())
    }

    /// Flushes the replica's outbound buffer onto the wire.
    pub async fn flush(&mut self, replica: ReplicaId) -> Result<(), BenchError> {
        let channel = self.channel_mut(replica)?;
        let Some(writer) = channel.writer.as_mut() else {
            return Err(BenchError(format!(
                "channel to replica {} unusable",
                replica
            )));
        };
        channel.flushes += 1;
        writer.flush().await?;
        Ok(())
    }

    /// Lends out the replica's inbound reader.
    pub fn take_reader(&mut self, replica: ReplicaId) -> Option<ReplicaReader> {
        self.channels
            .get_mut(replica as usize)
            .and_then(|c| c.reader.take())
    }

    /// Hands a lent reader back.
    pub fn put_reader(&mut self, reader: ReplicaReader) {
        if let Some(channel) = self.channels.get_mut(reader.replica as usize) {
            // a closed channel stays closed
            if channel.writer.is_some() {
                channel.reader = Some(reader);
            }
        }
    }

    /// Number of proposals written to the replica so far.
    #[inline]
    pub fn sent(&self, replica: ReplicaId) -> u64 {
        self.channels.get(replica as usize).map_or(0, |c| c.sent)
    }

    /// Number of explicit flushes performed on the replica so far.
    #[inline]
    pub fn flushes(&self, replica: ReplicaId) -> u64 {
        self.channels.get(replica as usize).map_or(0, |c| c.flushes)
    }

    /// Closes every channel. Calling it again is a no-op.
    pub async fn close(&mut self) {
        join_all(self.channels.iter_mut().map(|c| c.close())).await;
    }

    /// Drops every channel without flushing what is still buffered.
    pub fn abandon(&mut self) {
        for channel in &mut self.channels {
            if channel.writer.take().is_some() {
                pf_debug!("abandoned channel to '{}'", channel.addr);
            }
            channel.reader = None;
        }
    }

    fn channel_mut(
        &mut self,
        replica: ReplicaId,
    ) -> Result<&mut ReplicaChannel, BenchError> {
        self.channels
            .get_mut(replica as usize)
            .ok_or_else(|| BenchError(format!("replica {} unknown", replica)))
    }
}
