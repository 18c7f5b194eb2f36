//! Per-request target, key and operation generation.

use crate::utils::BenchError;
use crate::wire::{Command, Key, Operation, ReplicaId, Value};
use crate::workload::Zipfian;

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Key index used as the distinguished conflicting key.
pub const HOT_KEY_INDEX: usize = 0;

/// How key indices are drawn.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum KeyDistribution {
    /// With `percent`% chance the hot key, otherwise the request's own
    /// position in the round.
    Conflict { percent: u8 },

    /// Zipfian over the per-round key space with the given skew.
    Zipfian { theta: f64 },
}

/// Workload generation parameters.
#[derive(Debug, Clone)]
pub struct WorkloadParams {
    /// Number of replicas requests may target.
    pub population: u8,

    /// Number of requests awaited per round.
    pub reqs_per_round: usize,

    /// Extra requests issued per round but never awaited.
    pub eps: usize,

    /// Percentage of writes.
    pub writes: u8,

    /// Key index distribution.
    pub dist: KeyDistribution,

    /// Seed of the plan generator.
    pub seed: u64,

    /// Base seed of the per-replica key permutations.
    pub perm_seed: u64,
}

/// One planned request slot of a round.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PlannedOp {
    /// Replica this request is routed to in egalitarian mode.
    pub target: ReplicaId,

    /// Logical key index, translated through a replica's permutation.
    pub key_index: usize,

    /// Write (Put) if true, read (Get) otherwise.
    pub is_write: bool,
}

/// Sequential generator of planned ops driven by one seeded RNG.
struct OpGenerator {
    rng: StdRng,
    population: u8,
    writes: u8,
    keys: KeySampler,
}

/// Key index sampler matching a `KeyDistribution`.
enum KeySampler {
    Conflict(u8),
    Zipfian(Zipfian),
}

impl OpGenerator {
    fn new(params: &WorkloadParams, slots: usize) -> Result<Self, BenchError> {
        let keys = match params.dist {
            KeyDistribution::Zipfian { theta } => {
                KeySampler::Zipfian(Zipfian::new(slots as u64, theta)?)
            }
            KeyDistribution::Conflict { percent } => {
                KeySampler::Conflict(percent)
            }
        };
        Ok(OpGenerator {
            rng: StdRng::seed_from_u64(params.seed),
            population: params.population,
            writes: params.writes,
            keys,
        })
    }

    /// Produces the planned op for request slot `i`.
    fn next_op(&mut self, i: usize) -> PlannedOp {
        let target = self.rng.gen_range(0..self.population);

        let key_index = match &self.keys {
            KeySampler::Conflict(percent) => {
                if self.rng.gen_range(0..100) < *percent {
                    HOT_KEY_INDEX
                } else {
                    i
                }
            }
            KeySampler::Zipfian(zipf) => zipf.sample(&mut self.rng) as usize,
        };

        let is_write = self.rng.gen_range(0..100) < self.writes;

        PlannedOp {
            target,
            key_index,
            is_write,
        }
    }
}

/// Pre-generated workload reused by every round: one planned op per slot
/// plus one key permutation per replica.
#[derive(Debug, Clone)]
pub struct WorkloadPlan {
    /// Planned ops, `reqs_per_round + eps` of them.
    ops: Vec<PlannedOp>,

    /// Replica index -> permutation of key indices.
    perms: Vec<Vec<Key>>,

    /// Replica index -> number of awaited slots targeting it.
    expected: Vec<usize>,

    /// Number of awaited slots per round.
    reqs_per_round: usize,

    /// Key distribution in use.
    dist: KeyDistribution,
}

impl WorkloadPlan {
    /// Generates the plan from given parameters.
    pub fn generate(params: &WorkloadParams) -> Result<Self, BenchError> {
        if params.population == 0 {
            return Err(BenchError::msg("cannot plan for zero replicas"));
        }
        if params.reqs_per_round == 0 {
            return Err(BenchError::msg("zero requests per round"));
        }
        if params.writes > 100 {
            return Err(BenchError(format!(
                "write percentage {} higher than 100",
                params.writes
            )));
        }
        if let KeyDistribution::Conflict { percent } = params.dist {
            if percent > 100 {
                return Err(BenchError(format!(
                    "conflict percentage {} higher than 100",
                    percent
                )));
            }
        }

        let slots = params.reqs_per_round + params.eps;
        let mut generator = OpGenerator::new(params, slots)?;
        let ops: Vec<PlannedOp> =
            (0..slots).map(|i| generator.next_op(i)).collect();

        let mut expected = vec![0; params.population as usize];
        for op in &ops[..params.reqs_per_round] {
            expected[op.target as usize] += 1;
        }

        let perms = (0..params.population)
            .map(|r| {
                let seed = params.perm_seed.wrapping_add(r as u64);
                Self::key_permutation(slots, seed)
            })
            .collect();

        Ok(WorkloadPlan {
            ops,
            perms,
            expected,
            reqs_per_round: params.reqs_per_round,
            dist: params.dist,
        })
    }

    /// Seeded random permutation of key indices `0..slots`.
    fn key_permutation(slots: usize, seed: u64) -> Vec<Key> {
        let mut perm: Vec<Key> = (0..slots as Key).collect();
        perm.shuffle(&mut StdRng::seed_from_u64(seed));
        perm
    }

    /// Number of slots issued per round, awaited or not.
    #[inline]
    pub fn slots(&self) -> usize {
        self.ops.len()
    }

    /// Number of awaited slots per round.
    #[inline]
    pub fn reqs_per_round(&self) -> usize {
        self.reqs_per_round
    }

    /// Key distribution in use.
    #[inline]
    pub fn dist(&self) -> KeyDistribution {
        self.dist
    }

    /// Planned op of slot `i`.
    #[inline]
    pub fn op(&self, i: usize) -> &PlannedOp {
        &self.ops[i]
    }

    /// Number of awaited replies the given replica owes per round.
    #[inline]
    pub fn expected_replies(&self, replica: ReplicaId) -> usize {
        self.expected.get(replica as usize).copied().unwrap_or(0)
    }

    /// Wire key of slot `i` when routed through `replica`'s permutation.
    #[inline]
    pub fn key(&self, i: usize, replica: ReplicaId) -> Key {
        self.perms[replica as usize][self.ops[i].key_index]
    }

    /// Builds the command for slot `i` routed through `replica`.
    pub fn command(&self, i: usize, replica: ReplicaId, value: Value) -> Command {
        Command {
            op: if self.ops[i].is_write {
                Operation::Put
            } else {
                Operation::Get
            },
            key: self.key(i, replica),
            value,
        }
    }
}
