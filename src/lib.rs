//! Synthetic-workload benchmark driver for leader-based replicated state
//! machine clusters.

#[macro_use]
mod utils;

mod bench;
mod channels;
mod oracle;
mod wire;
mod workload;

pub use crate::utils::{logger_init, BenchError, Bitmap, Stopwatch, ME};

pub use crate::wire::{
    read_propose, read_reply, write_propose, write_reply, Command, Key,
    Operation, Propose, ProposeReply, ReplicaId, RequestId, Value,
    LOCAL_READ_SENTINEL, PROPOSE,
};

pub use crate::workload::{
    KeyDistribution, PlannedOp, WorkloadParams, WorkloadPlan, Zipfian,
    HOT_KEY_INDEX,
};

pub use crate::oracle::{CtrlReply, CtrlRequest, LeaderOracle, OracleStub};

pub use crate::channels::{ReplicaChannels, ReplicaReader};

pub use crate::bench::{
    BenchConfig, BenchParams, BenchSummary, RoundController, RoundReport,
    RoutingMode,
};
