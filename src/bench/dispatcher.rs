//! Request dispatcher: routes a round's proposals onto replica channels.

use crate::channels::ReplicaChannels;
use crate::utils::{BenchError, Bitmap};
use crate::wire::{Propose, ReplicaId, RequestId, Value};
use crate::workload::WorkloadPlan;

/// How requests are routed to replicas.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RoutingMode {
    /// All requests go through one designated leader.
    Leader,

    /// Each request goes to its own pre-assigned replica.
    Egalitarian,
}

/// Summary of one round's dispatching.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) struct DispatchOutcome {
    /// Sequence ID of the first request issued in the round.
    pub(crate) first_id: RequestId,

    /// Number of requests issued (sequence IDs consumed).
    pub(crate) issued: usize,

    /// Number of requests skipped because their replica was dead.
    pub(crate) skipped: usize,

    /// Number of failed writes or flushes.
    pub(crate) write_errors: usize,
}

/// Stateless dispatcher; never runs concurrently with itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Dispatcher {
    /// Routing mode in use.
    routing: RoutingMode,

    /// If true, every request is written and flushed on all live replicas.
    fast: bool,

    /// Number of requests between two explicit flushes.
    batch_size: usize,
}

impl Dispatcher {
    pub(crate) fn new(routing: RoutingMode, fast: bool, batch_size: usize) -> Self {
        debug_assert!(batch_size > 0);
        Dispatcher {
            routing,
            fast,
            batch_size,
        }
    }

    /// Replica whose key permutation and channel slot `i` routes through.
    #[inline]
    fn route(
        &self,
        plan: &WorkloadPlan,
        i: usize,
        leader: ReplicaId,
    ) -> ReplicaId {
        match self.routing {
            RoutingMode::Egalitarian if !self.fast => plan.op(i).target,
            _ => leader,
        }
    }

    /// Issues all of `plan`'s slots for one round, consuming one sequence ID
    /// from `next_id` per slot. Write failures are logged and counted, never
    /// returned; they surface as replies that do not arrive.
    pub(crate) async fn dispatch_round(
        &self,
        channels: &mut ReplicaChannels,
        plan: &WorkloadPlan,
        round: u32,
        leader: ReplicaId,
        alive: &Bitmap,
        next_id: &mut RequestId,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome {
            first_id: *next_id,
            issued: 0,
            skipped: 0,
            write_errors: 0,
        };
        let live: Vec<ReplicaId> = alive
            .ones()
            .map(|r| r as ReplicaId)
            .filter(|&r| channels.is_usable(r))
            .collect();
        let batched: Vec<ReplicaId> = match self.routing {
            RoutingMode::Leader => {
                live.iter().copied().filter(|&r| r == leader).collect()
            }
            RoutingMode::Egalitarian => live.clone(),
        };

        for i in 0..plan.slots() {
            let command_id = *next_id;
            *next_id += 1;
            outcome.issued += 1;

            let route = self.route(plan, i, leader);
            let propose = Propose {
                command_id,
                command: plan.command(i, route, command_id as Value + 1),
                tag: round,
            };
            pf_trace!("sending proposal {} -> {}", command_id, route);

            if self.fast {
                // send to everyone
                for &r in &live {
                    if let Err(e) = channels.send(r, &propose).await {
                        Self::note_error(&mut outcome, r, e);
                    } else if let Err(e) = channels.flush(r).await {
                        Self::note_error(&mut outcome, r, e);
                    }
                }
                if live.is_empty() {
                    outcome.skipped += 1;
                }
            } else if live.contains(&route) {
                if let Err(e) = channels.send(route, &propose).await {
                    Self::note_error(&mut outcome, route, e);
                }
            } else {
                outcome.skipped += 1;
            }

            if !self.fast && (i + 1) % self.batch_size == 0 {
                for &r in &batched {
                    if let Err(e) = channels.flush(r).await {
                        Self::note_error(&mut outcome, r, e);
                    }
                }
            }
        }

        // tail of a partial batch
        if !self.fast && plan.slots() % self.batch_size != 0 {
            for &r in &batched {
                if let Err(e) = channels.flush(r).await {
                    Self::note_error(&mut outcome, r, e);
                }
            }
        }

        if outcome.skipped > 0 {
            pf_debug!(
                "round {} skipped {} requests to dead replicas",
                round,
                outcome.skipped
            );
        }
        outcome
    }

    fn note_error(
        outcome: &mut DispatchOutcome,
        replica: ReplicaId,
        e: BenchError,
    ) {
        // only the first failure of a round is worth a warning
        if outcome.write_errors == 0 {
            pf_warn!("error writing to replica {}: {}", replica, e);
        }
        outcome.write_errors += 1;
    }
}
