//! Leadership resolver: client side of the cluster manager oracle.

use std::net::SocketAddr;

use crate::utils::{
    safe_tcp_read, tcp_connect_with_retry, tcp_write_framed, BenchError,
};
use crate::wire::ReplicaId;

use async_trait::async_trait;

use bytes::BytesMut;

use serde::{Deserialize, Serialize};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Control request to the manager oracle.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CtrlRequest {
    /// Query the ordered list of replica endpoints.
    GetReplicaList,

    /// Query the index of the current leader.
    GetLeader,
}

/// Control reply from the manager oracle.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CtrlReply {
    /// Reply to replica list query, endpoints as `host:port` strings.
    ReplicaList { servers: Vec<String> },

    /// Reply to leader query.
    Leader { id: ReplicaId },
}

/// Source of cluster membership and leadership information.
#[async_trait]
pub trait LeaderOracle: Send {
    /// Gets the ordered list of replica endpoints.
    async fn replica_list(&mut self) -> Result<Vec<String>, BenchError>;

    /// Gets the index of the current leader.
    async fn leader(&mut self) -> Result<ReplicaId, BenchError>;

    /// Releases whatever connection backs the oracle. No-op by default.
    async fn close(&mut self) -> Result<(), BenchError> {
        Ok(())
    }
}

/// TCP stub talking to the manager oracle over one long-lived connection.
pub struct OracleStub {
    /// Write-half split of the TCP connection stream.
    conn_write: OwnedWriteHalf,

    /// Read-half split of the TCP connection stream.
    conn_read: OwnedReadHalf,

    /// Reply read buffer for cancellation safety.
    reply_buf: BytesMut,
}

impl OracleStub {
    /// Creates a new oracle stub and connects to the manager.
    pub async fn new_by_connect(
        manager: SocketAddr,
        retries: u8,
    ) -> Result<Self, BenchError> {
        pf_info!("connecting to manager '{}'...", manager);
        let stream = tcp_connect_with_retry(manager, retries).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(OracleStub {
            conn_write: write_half,
            conn_read: read_half,
            reply_buf: BytesMut::with_capacity(8 + 1024),
        })
    }

    /// Sends one request and waits for its reply.
    async fn query(
        &mut self,
        req: &CtrlRequest,
    ) -> Result<CtrlReply, BenchError> {
        tcp_write_framed(&mut self.conn_write, req).await?;
        self.conn_write.flush().await?;
        let reply =
            safe_tcp_read(&mut self.reply_buf, &mut self.conn_read).await?;
        pf_trace!("ctrl {:?} -> {:?}", req, reply);
        Ok(reply)
    }
}

#[async_trait]
impl LeaderOracle for OracleStub {
    async fn replica_list(&mut self) -> Result<Vec<String>, BenchError> {
        match self.query(&CtrlRequest::GetReplicaList).await? {
            CtrlReply::ReplicaList { servers } => Ok(servers),
            reply => {
                logged_err!("unexpected reply to GetReplicaList: {:?}", reply)
            }
        }
    }

    async fn leader(&mut self) -> Result<ReplicaId, BenchError> {
        match self.query(&CtrlRequest::GetLeader).await? {
            CtrlReply::Leader { id } => Ok(id),
            reply => logged_err!("unexpected reply to GetLeader: {:?}", reply),
        }
    }

    /// Shuts down the write half so the manager sees the client leave.
    async fn close(&mut self) -> Result<(), BenchError> {
        self.conn_write.shutdown().await?;
        Ok(())
    }
}
