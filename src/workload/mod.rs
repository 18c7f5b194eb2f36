//! Synthetic workload generation: targets, keys, and operation kinds.

mod generator;
mod zipf;

pub use generator::{
    KeyDistribution, PlannedOp, WorkloadParams, WorkloadPlan, HOT_KEY_INDEX,
};
pub use zipf::Zipfian;
