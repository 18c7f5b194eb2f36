//! Round controller: owns all per-run state and drives rounds through
//! setup, dispatch, await and reconcile.

use crate::bench::collector::{CollectorDone, ReplyCollector, ReplyWindow};
use crate::bench::dispatcher::Dispatcher;
use crate::bench::{BenchConfig, RoutingMode};
use crate::channels::ReplicaChannels;
use crate::oracle::LeaderOracle;
use crate::utils::{BenchError, Bitmap, Stopwatch};
use crate::wire::{ReplicaId, RequestId};
use crate::workload::{KeyDistribution, WorkloadPlan};

use futures::future;

use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant};

/// Result of one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    /// Round index, starting at 0.
    pub round: usize,

    /// Time from dispatch start until every collector finished.
    pub elapsed: Duration,

    /// First sequence ID issued in this round.
    pub first_id: RequestId,

    /// Number of sequence IDs consumed in this round.
    pub issued: usize,

    /// True if any collector flagged an error.
    pub error: bool,

    /// Replicas whose collectors flagged errors.
    pub failed: Vec<ReplicaId>,

    /// Awaited sequence IDs never replied (check mode).
    pub missing: Vec<RequestId>,

    /// Sequence IDs replied more than once (check mode).
    pub duplicates: Vec<RequestId>,

    /// Sequence IDs replied that were not awaited this round (check mode).
    pub unexpected: Vec<RequestId>,

    /// True if a termination signal cut the round short.
    pub interrupted: bool,
}

/// Aggregate result of a whole run.
#[derive(Debug, Clone)]
pub struct BenchSummary {
    /// Per-round reports, in order.
    pub rounds: Vec<RoundReport>,

    /// Wall time of the whole run.
    pub elapsed: Duration,

    /// Total number of OK replies.
    pub successful: u64,

    /// Total number of OK replies served locally.
    pub local_reads: u64,
}

/// Marks replicas dead after a failed egalitarian round. Without
/// `drop_failed_only`, the highest live index is dropped regardless of
/// which collectors failed.
pub(crate) fn shrink_live_set(
    alive: &mut Bitmap,
    failed: &[ReplicaId],
    drop_failed_only: bool,
) -> Result<(), BenchError> {
    if drop_failed_only {
        for &r in failed {
            alive.set(r as usize, false)?;
        }
    } else if let Some(last) = alive.ones().last() {
        alive.set(last, false)?;
    }
    Ok(())
}

/// Resolves once `rx_term` holds `true`. Never resolves if the sender is
/// gone without having signaled.
pub(crate) async fn term_signaled(rx_term: &mut watch::Receiver<bool>) {
    let signaled = rx_term.wait_for(|&stop| stop).await.is_ok();
    if !signaled {
        future::pending::<()>().await;
    }
}

/// The benchmark driver.
pub struct RoundController<O: LeaderOracle> {
    config: BenchConfig,
    oracle: O,
    channels: ReplicaChannels,
    plan: WorkloadPlan,
    dispatcher: Dispatcher,

    /// Current leader; in egalitarian mode only used for fast broadcast.
    leader: ReplicaId,

    /// Live replica set; shrinks in egalitarian mode on failures.
    alive: Bitmap,

    /// Replica index -> number of OK replies.
    successful: Vec<u64>,

    /// Replica index -> number of OK replies served locally.
    local_reads: Vec<u64>,

    /// Next sequence ID to issue.
    next_id: RequestId,

    /// Index of the next round to run.
    round: usize,

    stopwatch: Stopwatch,
}

impl<O: LeaderOracle> RoundController<O> {
    /// Discovers the cluster through `oracle`, generates the workload plan,
    /// connects to every replica and resolves the initial leader.
    pub async fn new_and_setup(
        config: BenchConfig,
        mut oracle: O,
    ) -> Result<Self, BenchError> {
        config.validate()?;

        let mut servers = oracle.replica_list().await?;
        if servers.is_empty() {
            return logged_err!("manager reported an empty replica list");
        }
        if servers.len() > ReplicaId::MAX as usize {
            return logged_err!("too many replicas: {}", servers.len());
        }
        if let Some(n) = config.forced_n {
            if n as usize > servers.len() {
                return logged_err!(
                    "forced replica count {} larger than population {}",
                    n,
                    servers.len()
                );
            }
            servers.truncate(n as usize);
        }
        let population = servers.len() as u8;
        pf_info!("using {} replicas: {:?}", population, servers);

        let plan = WorkloadPlan::generate(&config.workload(population))?;
        match plan.dist() {
            KeyDistribution::Conflict { .. } => {
                println!("Uniform distribution")
            }
            KeyDistribution::Zipfian { .. } => {
                println!("Zipfian distribution")
            }
        }

        let channels =
            ReplicaChannels::connect(&servers, config.params.connect_retries)
                .await;

        let leader = match config.forced_leader {
            Some(id) => id,
            None if config.leaderless => 0,
            None => oracle.leader().await?,
        };
        if leader >= population {
            return logged_err!(
                "leader {} out of range of {} replicas",
                leader,
                population
            );
        }
        pf_info!("initial leader is replica {}", leader);

        let dispatcher = Dispatcher::new(
            config.routing(),
            config.fast,
            config.params.batch_size,
        );

        Ok(RoundController {
            config,
            oracle,
            channels,
            plan,
            dispatcher,
            leader,
            alive: Bitmap::new(population as usize, true),
            successful: vec![0; population as usize],
            local_reads: vec![0; population as usize],
            next_id: 0,
            round: 0,
            stopwatch: Stopwatch::new(),
        })
    }

    /// Collectors to arm this round as (replica, expected replies) pairs.
    fn armed_collectors(&self) -> Vec<(ReplicaId, usize)> {
        match self.config.routing() {
            RoutingMode::Leader => {
                vec![(self.leader, self.plan.reqs_per_round())]
            }
            RoutingMode::Egalitarian => self
                .alive
                .ones()
                .map(|r| {
                    let r = r as ReplicaId;
                    (r, self.plan.expected_replies(r))
                })
                .collect(),
        }
    }

    /// Runs one round. Returns early with `interrupted` set if `rx_term`
    /// fires while dispatching, awaiting replies or recovering.
    pub async fn run_round(
        &mut self,
        rx_term: &mut watch::Receiver<bool>,
    ) -> Result<RoundReport, BenchError> {
        let round = self.round;
        self.round += 1;

        // setup
        let window = self.config.check.then_some(ReplyWindow {
            base: self.next_id,
            span: self.plan.reqs_per_round(),
        });
        let mut seen = window.map(|w| Bitmap::new(w.span, false));
        let armed = self.armed_collectors();
        pf_debug!("round {} arming collectors {:?}", round, armed);

        let (tx_done, mut rx_done) = mpsc::unbounded_channel();
        let handles: Vec<_> = armed
            .iter()
            .map(|&(r, n)| {
                ReplyCollector::new(r, n, window)
                    .spawn(self.channels.take_reader(r), tx_done.clone())
            })
            .collect();
        drop(tx_done);

        // dispatch
        self.stopwatch.start(round)?;
        let base_id = self.next_id;
        let dispatched = tokio::select! {
            outcome = self.dispatcher.dispatch_round(
                &mut self.channels,
                &self.plan,
                round as u32,
                self.leader,
                &self.alive,
                &mut self.next_id,
            ) => Some(outcome),

            _ = term_signaled(rx_term) => None,
        };
        let (first_id, issued, interrupted) = match dispatched {
            Some(outcome) => (outcome.first_id, outcome.issued, false),
            None => (base_id, (self.next_id - base_id) as usize, true),
        };
        if interrupted {
            pf_warn!("round {} interrupted while dispatching", round);
        }

        // await
        let mut report = RoundReport {
            round,
            elapsed: Duration::ZERO,
            first_id,
            issued,
            error: false,
            failed: vec![],
            missing: vec![],
            duplicates: vec![],
            unexpected: vec![],
            interrupted,
        };
        let mut pending = armed.len();
        while pending > 0 && !report.interrupted {
            tokio::select! {
                msg = rx_done.recv() => match msg {
                    Some(done) => {
                        pending -= 1;
                        self.fold_collector(done, window, seen.as_mut(), &mut report)?;
                    }
                    None => {
                        pf_error!(
                            "completion channel closed with {} collectors pending",
                            pending
                        );
                        report.error = true;
                        break;
                    }
                },

                _ = term_signaled(rx_term) => {
                    pf_warn!("round {} interrupted", round);
                    report.interrupted = true;
                }
            }
        }
        if report.interrupted {
            for handle in handles {
                handle.abort();
            }
        }

        report.elapsed = self.stopwatch.stop(round)?;
        println!("Round took {:?}", report.elapsed);
        if report.interrupted {
            return Ok(report);
        }

        // reconcile
        if let (Some(window), Some(seen)) = (window, &seen) {
            for off in seen.zeroes() {
                let id = window.base + off as RequestId;
                println!("Didn't receive {}", id);
                report.missing.push(id);
            }
        }
        if report.error {
            let failed = report.failed.clone();
            tokio::select! {
                res = self.recover(&failed) => res?,

                _ = term_signaled(rx_term) => {
                    pf_warn!("round {} interrupted during recovery", round);
                    report.interrupted = true;
                }
            }
        }
        Ok(report)
    }

    /// Folds one collector's completion message into controller state.
    fn fold_collector(
        &mut self,
        done: CollectorDone,
        window: Option<ReplyWindow>,
        seen: Option<&mut Bitmap>,
        report: &mut RoundReport,
    ) -> Result<(), BenchError> {
        pf_debug!(
            "replica {} delivered {} replies, error {}",
            done.replica,
            done.received,
            done.error
        );
        let r = done.replica as usize;
        self.successful[r] += done.successful;
        self.local_reads[r] += done.local_reads;
        if done.error {
            report.error = true;
            report.failed.push(done.replica);
        }

        if let (Some(window), Some(seen), Some(other)) =
            (window, seen, done.seen.as_ref())
        {
            // same ID replied through two different replicas
            for off in seen.merge(other)? {
                let id = window.base + off as RequestId;
                pf_warn!("duplicate reply {} across replicas", id);
                report.duplicates.push(id);
            }
        }
        report.duplicates.extend(done.duplicates);
        report.unexpected.extend(done.unexpected);

        if let Some(reader) = done.reader {
            self.channels.put_reader(reader);
        }
        Ok(())
    }

    /// Recovery after a round with collector errors.
    async fn recover(&mut self, failed: &[ReplicaId]) -> Result<(), BenchError> {
        match self.config.routing() {
            RoutingMode::Egalitarian => {
                shrink_live_set(
                    &mut self.alive,
                    failed,
                    self.config.params.drop_failed_only,
                )?;
                if self.alive.count() == 0 {
                    return logged_err!("no live replicas left");
                }
                pf_warn!(
                    "failed replicas {:?}, live set now {:?}",
                    failed,
                    self.alive
                );
            }
            RoutingMode::Leader => {
                let leader = self.oracle.leader().await?;
                if leader as usize >= self.alive.size() {
                    return logged_err!(
                        "leader {} out of range of {} replicas",
                        leader,
                        self.alive.size()
                    );
                }
                pf_warn!("leader {} failed, now {}", self.leader, leader);
                self.leader = leader;
            }
        }
        Ok(())
    }

    /// Runs all configured rounds, prints the aggregate results and closes
    /// the channels and the oracle.
    pub async fn run(
        &mut self,
        rx_term: &mut watch::Receiver<bool>,
    ) -> Result<BenchSummary, BenchError> {
        let start = Instant::now();
        let mut rounds = Vec::with_capacity(self.config.rounds);
        let mut interrupted = false;
        while self.round < self.config.rounds && !interrupted {
            let report = self.run_round(rx_term).await?;
            interrupted = report.interrupted;
            rounds.push(report);
        }
        let elapsed = start.elapsed();

        let successful = self.total_successful();
        let local_reads = self.total_local_reads();
        println!("Test took {:?}", elapsed);
        println!("Successful: {}", successful);
        println!("Local Reads: {}", local_reads);
        if let Some((cnt, mean, stdev)) = self.stopwatch.summarize() {
            let tput = successful as f64 / elapsed.as_secs_f64().max(1e-9);
            println!(
                "Rounds: {} | mean {:.2} ms | stdev {:.2} ms | {:.2} reqs/s",
                cnt, mean, stdev, tput
            );
        }

        if interrupted {
            // replicas may have stopped draining what is still buffered
            self.channels.abandon();
        }
        self.close().await;
        Ok(BenchSummary {
            rounds,
            elapsed,
            successful,
            local_reads,
        })
    }

    /// Closes all replica channels and the oracle connection.
    pub async fn close(&mut self) {
        self.channels.close().await;
        if let Err(e) = self.oracle.close().await {
            pf_warn!("error closing oracle: {}", e);
        }
    }

    /// Current leader.
    #[inline]
    pub fn leader(&self) -> ReplicaId {
        self.leader
    }

    /// Replicas still considered alive.
    pub fn live_replicas(&self) -> Vec<ReplicaId> {
        self.alive.ones().map(|r| r as ReplicaId).collect()
    }

    /// Number of OK replies from the given replica.
    #[inline]
    pub fn successful(&self, replica: ReplicaId) -> u64 {
        self.successful.get(replica as usize).copied().unwrap_or(0)
    }

    /// Number of locally served reads from the given replica.
    #[inline]
    pub fn local_reads(&self, replica: ReplicaId) -> u64 {
        self.local_reads.get(replica as usize).copied().unwrap_or(0)
    }

    pub fn total_successful(&self) -> u64 {
        self.successful.iter().sum()
    }

    pub fn total_local_reads(&self) -> u64 {
        self.local_reads.iter().sum()
    }

    /// Next sequence ID to be issued.
    #[inline]
    pub fn next_id(&self) -> RequestId {
        self.next_id
    }

    /// Replica channel set, for inspecting per-channel counters.
    #[inline]
    pub fn channels(&self) -> &ReplicaChannels {
        &self.channels
    }

    /// Workload plan reused by every round.
    #[inline]
    pub fn plan(&self) -> &WorkloadPlan {
        &self.plan
    }
}
