//! Benchmark run configuration.

use crate::bench::RoutingMode;
use crate::utils::{parse_params, BenchError};
use crate::wire::ReplicaId;
use crate::workload::{KeyDistribution, WorkloadParams};

use serde::Deserialize;

/// Secondary knobs, parsed from a TOML string.
#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchParams {
    /// Number of requests between two explicit flushes.
    pub batch_size: usize,

    /// Zipfian skew constant used when no conflict percentage is given.
    pub zipf_theta: f64,

    /// Seed of the workload plan generator.
    pub seed: u64,

    /// Base seed of the per-replica key permutations.
    pub perm_seed: u64,

    /// Connection retries towards the manager and the replicas.
    pub connect_retries: u8,

    /// If true, a failed egalitarian round marks exactly the replicas whose
    /// collectors failed as dead, instead of the highest live one.
    pub drop_failed_only: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for BenchParams {
    fn default() -> Self {
        BenchParams {
            batch_size: 100,
            zipf_theta: 0.99,
            seed: 42,
            perm_seed: 442,
            connect_retries: 0,
            drop_failed_only: false,
        }
    }
}

impl BenchParams {
    /// Parses params from an optional TOML string, unlisted keys keeping
    /// their defaults.
    pub fn from_toml(params_str: Option<&str>) -> Result<Self, BenchError> {
        let params: BenchParams = parse_params(params_str)?;
        if params.batch_size == 0 {
            return logged_err!(
                "invalid params.batch_size '{}'",
                params.batch_size
            );
        }
        if !(params.zipf_theta > 0.0 && params.zipf_theta < 1.0) {
            return logged_err!(
                "invalid params.zipf_theta '{}'",
                params.zipf_theta
            );
        }
        Ok(params)
    }
}

/// Full configuration of a benchmark run.
#[derive(Debug, PartialEq, Clone)]
pub struct BenchConfig {
    /// Total number of awaited requests across all rounds.
    pub total_reqs: usize,

    /// Number of rounds the requests are split into.
    pub rounds: usize,

    /// Percentage of writes.
    pub writes: u8,

    /// Leaderless (egalitarian) routing if true.
    pub leaderless: bool,

    /// Broadcast every request to all replicas if true.
    pub fast: bool,

    /// Conflict percentage; `None` selects Zipfian keys.
    pub conflicts: Option<u8>,

    /// Extra un-awaited requests per round.
    pub eps: usize,

    /// Use only the first this many replicas.
    pub forced_n: Option<u8>,

    /// Skip the initial leader query and talk to this replica.
    pub forced_leader: Option<ReplicaId>,

    /// Verify that every awaited reply arrives exactly once.
    pub check: bool,

    /// Secondary knobs.
    pub params: BenchParams,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            total_reqs: 5000,
            rounds: 1,
            writes: 100,
            leaderless: false,
            fast: false,
            conflicts: None,
            eps: 0,
            forced_n: None,
            forced_leader: None,
            check: false,
            params: BenchParams::default(),
        }
    }
}

impl BenchConfig {
    /// Rejects out-of-range settings before anything connects.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.rounds == 0 {
            return logged_err!("invalid number of rounds {}", self.rounds);
        }
        if self.total_reqs < self.rounds {
            return logged_err!(
                "total requests {} fewer than rounds {}",
                self.total_reqs,
                self.rounds
            );
        }
        if self.writes > 100 {
            return logged_err!(
                "write percentage {} higher than 100",
                self.writes
            );
        }
        if let Some(c) = self.conflicts {
            if c > 100 {
                return logged_err!(
                    "conflicts percentage {} not within 0 and 100",
                    c
                );
            }
        }
        if self.forced_n == Some(0) {
            return logged_err!("forced replica count must be positive");
        }
        if self.params.batch_size == 0 {
            return logged_err!("batch size must be positive");
        }
        Ok(())
    }

    /// Number of awaited requests per round.
    #[inline]
    pub fn reqs_per_round(&self) -> usize {
        self.total_reqs / self.rounds
    }

    /// Routing mode selected by the leaderless flag.
    #[inline]
    pub fn routing(&self) -> RoutingMode {
        if self.leaderless {
            RoutingMode::Egalitarian
        } else {
            RoutingMode::Leader
        }
    }

    /// Workload generation parameters for a cluster of `population`.
    pub fn workload(&self, population: u8) -> WorkloadParams {
        WorkloadParams {
            population,
            reqs_per_round: self.reqs_per_round(),
            eps: self.eps,
            writes: self.writes,
            dist: match self.conflicts {
                Some(percent) => KeyDistribution::Conflict { percent },
                None => KeyDistribution::Zipfian {
                    theta: self.params.zipf_theta,
                },
            },
            seed: self.params.seed,
            perm_seed: self.params.perm_seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_from_toml() -> Result<(), BenchError> {
        assert_eq!(BenchParams::from_toml(None)?, BenchParams::default());
        let params = BenchParams::from_toml(Some(
            "batch_size = 10\ndrop_failed_only = true",
        ))?;
        assert_eq!(params.batch_size, 10);
        assert!(params.drop_failed_only);
        assert_eq!(params.perm_seed, 442);
        assert!(BenchParams::from_toml(Some("batch_size = 0")).is_err());
        assert!(BenchParams::from_toml(Some("zipf_theta = 1.5")).is_err());
        assert!(BenchParams::from_toml(Some("nonsense = 1")).is_err());
        Ok(())
    }

    #[test]
    fn validate_ranges() {
        assert!(BenchConfig::default().validate().is_ok());
        let bad = [
            BenchConfig {
                writes: 101,
                ..Default::default()
            },
            BenchConfig {
                conflicts: Some(101),
                ..Default::default()
            },
            BenchConfig {
                rounds: 0,
                ..Default::default()
            },
            BenchConfig {
                total_reqs: 2,
                rounds: 3,
                ..Default::default()
            },
            BenchConfig {
                forced_n: Some(0),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn workload_derivation() {
        let config = BenchConfig {
            total_reqs: 1000,
            rounds: 4,
            eps: 5,
            conflicts: Some(30),
            leaderless: true,
            ..Default::default()
        };
        assert_eq!(config.reqs_per_round(), 250);
        assert_eq!(config.routing(), RoutingMode::Egalitarian);
        let w = config.workload(5);
        assert_eq!(w.population, 5);
        assert_eq!(w.eps, 5);
        assert_eq!(w.dist, KeyDistribution::Conflict { percent: 30 });
        let w = BenchConfig::default().workload(3);
        assert_eq!(w.dist, KeyDistribution::Zipfian { theta: 0.99 });
    }
}
