//! Reply collector: one concurrent task per replica expected to answer.

use crate::channels::ReplicaReader;
use crate::utils::Bitmap;
use crate::wire::{ReplicaId, RequestId, LOCAL_READ_SENTINEL};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Window of sequence IDs awaited in a round, for exactly-once checking.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) struct ReplyWindow {
    /// First awaited sequence ID.
    pub(crate) base: RequestId,

    /// Number of awaited sequence IDs.
    pub(crate) span: usize,
}

impl ReplyWindow {
    /// Offset of `id` inside the window, if inside.
    #[inline]
    fn offset(&self, id: RequestId) -> Option<usize> {
        id.checked_sub(self.base)
            .map(|off| off as usize)
            .filter(|&off| off < self.span)
    }
}

/// Completion message a collector sends exactly once.
#[derive(Debug)]
pub(crate) struct CollectorDone {
    /// Which replica this collector read from.
    pub(crate) replica: ReplicaId,

    /// True if any read or decode failed.
    pub(crate) error: bool,

    /// Number of replies successfully decoded.
    pub(crate) received: usize,

    /// Number of OK replies.
    pub(crate) successful: u64,

    /// Number of OK replies carrying the local-read sentinel.
    pub(crate) local_reads: u64,

    /// Window offsets seen, if checking.
    pub(crate) seen: Option<Bitmap>,

    /// Sequence IDs replied more than once by this replica.
    pub(crate) duplicates: Vec<RequestId>,

    /// Sequence IDs replied that fall outside the round's window.
    pub(crate) unexpected: Vec<RequestId>,

    /// The borrowed reader, handed back.
    pub(crate) reader: Option<ReplicaReader>,
}

/// Collector reading exactly `expected` replies from one replica.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReplyCollector {
    replica: ReplicaId,
    expected: usize,
    window: Option<ReplyWindow>,
}

impl ReplyCollector {
    /// Creates a collector; `window` is `Some` iff check mode is on.
    pub(crate) fn new(
        replica: ReplicaId,
        expected: usize,
        window: Option<ReplyWindow>,
    ) -> Self {
        ReplyCollector {
            replica,
            expected,
            window,
        }
    }

    /// Spawns the collector task, which reports on `tx_done` when finished.
    pub(crate) fn spawn(
        self,
        reader: Option<ReplicaReader>,
        tx_done: mpsc::UnboundedSender<CollectorDone>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let done = self.collect(reader).await;
            if let Err(e) = tx_done.send(done) {
                pf_error!("error sending to done channel: {}", e);
            }
        })
    }

    /// Reads the expected replies, absorbing failures into the error flag.
    pub(crate) async fn collect(
        self,
        mut reader: Option<ReplicaReader>,
    ) -> CollectorDone {
        let mut done = CollectorDone {
            replica: self.replica,
            error: false,
            received: 0,
            successful: 0,
            local_reads: 0,
            seen: self.window.map(|w| Bitmap::new(w.span, false)),
            duplicates: vec![],
            unexpected: vec![],
            reader: None,
        };

        let Some(conn) = reader.as_mut() else {
            if self.expected > 0 {
                pf_warn!(
                    "replica {} owes {} replies but has no usable channel",
                    self.replica,
                    self.expected
                );
                done.error = true;
            }
            return done;
        };

        for _ in 0..self.expected {
            let reply = match conn.recv_reply().await {
                Ok(reply) => reply,
                Err(e) => {
                    if !done.error {
                        pf_warn!(
                            "error reading reply from replica {}: {}",
                            self.replica,
                            e
                        );
                    }
                    done.error = true;
                    continue;
                }
            };
            done.received += 1;

            if let (Some(window), Some(seen)) = (&self.window, &mut done.seen)
            {
                match window.offset(reply.command_id) {
                    Some(off) => {
                        if seen.test_and_set(off).unwrap_or(false) {
                            pf_warn!("duplicate reply {}", reply.command_id);
                            done.duplicates.push(reply.command_id);
                        }
                    }
                    None => {
                        pf_debug!(
                            "reply {} outside window {:?}",
                            reply.command_id,
                            window
                        );
                        done.unexpected.push(reply.command_id);
                    }
                }
            }

            if reply.ok {
                done.successful += 1;
                if reply.value == LOCAL_READ_SENTINEL {
                    done.local_reads += 1;
                }
            }
        }

        done.reader = reader;
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ReplicaChannels;
    use crate::utils::BenchError;
    use crate::wire::{write_reply, ProposeReply};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn reply(id: RequestId, ok: bool, value: i64) -> ProposeReply {
        ProposeReply {
            ok,
            command_id: id,
            value,
            timestamp: 0,
        }
    }

    /// Connects a single-replica channel set to a peer that writes the given
    /// replies (and an optional garbage frame) then hangs up.
    async fn scripted_reader(
        replies: Vec<ProposeReply>,
        garbage_at: Option<usize>,
    ) -> Result<ReplicaReader, BenchError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?.to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await?;
            for (i, r) in replies.iter().enumerate() {
                if garbage_at == Some(i) {
                    stream.write_u64(3).await?;
                    stream.write_all(&[0xc1, 0xc1, 0xc1]).await?;
                }
                write_reply(&mut stream, r).await?;
            }
            stream.flush().await?;
            Ok::<(), BenchError>(())
        });
        let mut channels = ReplicaChannels::connect(&[addr], 0).await;
        channels
            .take_reader(0)
            .ok_or_else(|| BenchError::msg("replica 0 not connected"))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn counts_and_sentinel() -> Result<(), BenchError> {
        let replies = vec![
            reply(0, true, 1),
            reply(1, true, LOCAL_READ_SENTINEL),
            reply(2, false, LOCAL_READ_SENTINEL),
            reply(3, true, 4),
        ];
        let reader = scripted_reader(replies, None).await?;
        let done = ReplyCollector::new(0, 4, None).collect(Some(reader)).await;
        assert!(!done.error);
        assert_eq!(done.received, 4);
        assert_eq!(done.successful, 3);
        assert_eq!(done.local_reads, 1);
        assert!(done.seen.is_none());
        assert!(done.reader.is_some());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn check_mode_duplicates() -> Result<(), BenchError> {
        let replies = vec![
            reply(10, true, 1),
            reply(11, true, 1),
            reply(11, true, 1),
            reply(3, true, 1),
        ];
        let reader = scripted_reader(replies, None).await?;
        let window = ReplyWindow { base: 10, span: 3 };
        let done = ReplyCollector::new(0, 4, Some(window))
            .collect(Some(reader))
            .await;
        assert!(!done.error);
        assert_eq!(done.duplicates, vec![11]);
        assert_eq!(done.unexpected, vec![3]);
        let seen = done.seen.unwrap();
        assert_eq!(seen.zeroes().collect::<Vec<_>>(), vec![2]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn decode_failure_keeps_draining() -> Result<(), BenchError> {
        let replies = vec![reply(0, true, 1), reply(1, true, 1)];
        let reader = scripted_reader(replies, Some(1)).await?;
        // garbage frame counts as one of the three expected replies
        let done = ReplyCollector::new(0, 3, None).collect(Some(reader)).await;
        assert!(done.error);
        assert_eq!(done.received, 2);
        assert_eq!(done.successful, 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hangup_flags_error() -> Result<(), BenchError> {
        let reader = scripted_reader(vec![reply(0, true, 1)], None).await?;
        let (tx_done, mut rx_done) = mpsc::unbounded_channel();
        ReplyCollector::new(2, 5, None).spawn(Some(reader), tx_done);
        let done = rx_done
            .recv()
            .await
            .ok_or_else(|| BenchError::msg("done channel closed"))?;
        assert_eq!(done.replica, 2);
        assert!(done.error);
        assert_eq!(done.received, 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_channel() {
        let done = ReplyCollector::new(1, 5, None).collect(None).await;
        assert!(done.error);
        let done = ReplyCollector::new(1, 0, None).collect(None).await;
        assert!(!done.error);
    }
}
