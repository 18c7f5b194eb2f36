//! Shared helpers for integration tests: a mock replica cluster, an
//! in-memory leadership oracle, and a mock manager speaking the control
//! protocol over TCP.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use bytes::BytesMut;

use smrbench::{
    read_propose, write_reply, BenchError, CtrlReply, CtrlRequest, Key,
    LeaderOracle, Operation, ProposeReply, ReplicaId, RequestId,
    LOCAL_READ_SENTINEL,
};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

/// How a mock replica treats the proposals it receives.
#[derive(Debug, Clone, Default)]
pub struct ReplicaBehavior {
    /// Hang up right after replying to this many proposals.
    pub sever_after: Option<usize>,

    /// Every k-th reply carries `ok == false`.
    pub nack_every: Option<usize>,

    /// Reply twice to the proposal with this ID.
    pub duplicate_id: Option<RequestId>,

    /// Answer reads with the local-read sentinel.
    pub local_reads: bool,

    /// Read proposals but never reply.
    pub mute: bool,

    /// Accept the connection but never read from it.
    pub stall: bool,
}

/// A replica stand-in listening on loopback.
pub struct MockReplica {
    pub addr: String,
    received: Arc<Mutex<Vec<(RequestId, Key)>>>,
    handle: JoinHandle<()>,
}

impl MockReplica {
    /// Binds an ephemeral port and serves the first connection accepted.
    pub async fn spawn(behavior: ReplicaBehavior) -> Result<Self, BenchError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        let received = Arc::new(Mutex::new(vec![]));
        let received_ref = received.clone();

        let handle = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            if behavior.stall {
                time::sleep(Duration::from_secs(60)).await;
                return;
            }
            let (mut conn_read, mut conn_write) = stream.into_split();
            let mut read_buf = BytesMut::new();
            let mut count = 0;
            while let Ok(p) = read_propose(&mut read_buf, &mut conn_read).await
            {
                count += 1;
                received_ref
                    .lock()
                    .unwrap()
                    .push((p.command_id, p.command.key));
                if behavior.mute {
                    continue;
                }

                let ok = behavior.nack_every.map_or(true, |k| count % k != 0);
                let value = if behavior.local_reads
                    && p.command.op == Operation::Get
                {
                    LOCAL_READ_SENTINEL
                } else {
                    p.command.value
                };
                let reply = ProposeReply {
                    ok,
                    command_id: p.command_id,
                    value,
                    timestamp: count as i64,
                };
                if write_reply(&mut conn_write, &reply).await.is_err() {
                    return;
                }
                if behavior.duplicate_id == Some(p.command_id)
                    && write_reply(&mut conn_write, &reply).await.is_err()
                {
                    return;
                }
                if behavior.sever_after == Some(count) {
                    return;
                }
            }
        });

        Ok(MockReplica {
            addr,
            received,
            handle,
        })
    }

    /// Sequence IDs received so far, in arrival order.
    pub fn received(&self) -> Vec<RequestId> {
        self.received.lock().unwrap().iter().map(|&(id, _)| id).collect()
    }

    /// Waits for the replica to see its connection closed, then returns
    /// the (sequence ID, key) pairs received in arrival order.
    pub async fn join_keyed(self) -> Vec<(RequestId, Key)> {
        let _ = self.handle.await;
        self.received.lock().unwrap().clone()
    }

    /// Waits for the replica to see its connection closed.
    pub async fn join(self) -> Vec<RequestId> {
        self.join_keyed()
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }
}

/// Spawns one mock replica per behavior.
pub async fn spawn_cluster(
    behaviors: Vec<ReplicaBehavior>,
) -> Result<Vec<MockReplica>, BenchError> {
    let mut replicas = Vec::with_capacity(behaviors.len());
    for behavior in behaviors {
        replicas.push(MockReplica::spawn(behavior).await?);
    }
    Ok(replicas)
}

/// In-memory oracle answering from a scripted queue of leaders.
pub struct MockOracle {
    servers: Vec<String>,
    leaders: VecDeque<ReplicaId>,
    last: ReplicaId,
    leader_queries: Arc<AtomicUsize>,
}

impl MockOracle {
    /// Answers leader queries from `leaders` in order, repeating the last
    /// one once the queue runs out.
    pub fn new(servers: Vec<String>, leaders: Vec<ReplicaId>) -> Self {
        MockOracle {
            servers,
            leaders: leaders.into(),
            last: 0,
            leader_queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of leader queries answered.
    pub fn leader_queries(&self) -> Arc<AtomicUsize> {
        self.leader_queries.clone()
    }
}

#[async_trait]
impl LeaderOracle for MockOracle {
    async fn replica_list(&mut self) -> Result<Vec<String>, BenchError> {
        Ok(self.servers.clone())
    }

    async fn leader(&mut self) -> Result<ReplicaId, BenchError> {
        self.leader_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(leader) = self.leaders.pop_front() {
            self.last = leader;
        }
        Ok(self.last)
    }
}

/// Spawns a manager serving the control protocol with a fixed answer set.
/// The returned handle finishes once the client hangs up.
pub async fn spawn_manager(
    servers: Vec<String>,
    leader: ReplicaId,
) -> Result<(SocketAddr, JoinHandle<Result<(), BenchError>>), BenchError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await?;
        loop {
            let Ok(len) = stream.read_u64().await else {
                break; // client left
            };
            let mut body = vec![0; len as usize];
            stream.read_exact(&mut body).await?;
            let req: CtrlRequest = rmp_serde::from_slice(&body)?;
            let reply = match req {
                CtrlRequest::GetReplicaList => CtrlReply::ReplicaList {
                    servers: servers.clone(),
                },
                CtrlRequest::GetLeader => CtrlReply::Leader { id: leader },
            };
            let bytes = rmp_serde::to_vec(&reply)?;
            stream.write_u64(bytes.len() as u64).await?;
            stream.write_all(&bytes).await?;
        }
        Ok::<(), BenchError>(())
    });
    Ok((addr, handle))
}
