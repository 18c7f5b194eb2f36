//! Stopwatch utility for bookkeeping per-round timing stats.

use crate::utils::BenchError;

use tokio::time::{Duration, Instant};

use statistical::{mean, standard_deviation};

/// Stopwatch utility recording the start and finish timestamps of every
/// round, keyed by round index.
#[derive(Debug, Default)]
pub struct Stopwatch {
    /// Round index -> (start, finish) timestamps.
    records: Vec<(Instant, Option<Instant>)>,
}

impl Stopwatch {
    /// Creates a new stopwatch utility.
    pub fn new() -> Self {
        Stopwatch { records: vec![] }
    }

    /// Marks the start of the given round, which must be the next one.
    pub fn start(&mut self, round: usize) -> Result<(), BenchError> {
        if round != self.records.len() {
            return Err(BenchError(format!(
                "round mismatch: expect {} got {}",
                self.records.len(),
                round
            )));
        }
        self.records.push((Instant::now(), None));
        Ok(())
    }

    /// Marks the finish of the given round, returning its elapsed time.
    pub fn stop(&mut self, round: usize) -> Result<Duration, BenchError> {
        match self.records.get_mut(round) {
            Some((start, finish @ None)) => {
                let now = Instant::now();
                *finish = Some(now);
                Ok(now.duration_since(*start))
            }
            Some(_) => {
                Err(BenchError(format!("round {} already stopped", round)))
            }
            None => Err(BenchError(format!("round {} not started", round))),
        }
    }

    /// Elapsed times of all finished rounds.
    pub fn elapsed(&self) -> Vec<Duration> {
        self.records
            .iter()
            .filter_map(|(start, finish)| {
                finish.map(|f| f.duration_since(*start))
            })
            .collect()
    }

    /// Gathers a summary of (#rounds, mean_ms, stdev_ms) over all finished
    /// rounds. Returns `None` if no round has finished.
    pub fn summarize(&self) -> Option<(usize, f64, f64)> {
        let times: Vec<f64> = self
            .elapsed()
            .into_iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        if times.is_empty() {
            return None;
        }

        let mean = mean(&times);
        let stdev = if times.len() > 1 {
            standard_deviation(&times, Some(mean))
        } else {
            0.0
        };
        Some((times.len(), mean, stdev))
    }
}
