//! Benchmark driver core: dispatching, reply collection, and the per-round
//! control loop.

mod collector;
mod config;
mod controller;
mod dispatcher;

pub use config::{BenchConfig, BenchParams};
pub use controller::{BenchSummary, RoundController, RoundReport};
pub use dispatcher::RoutingMode;
