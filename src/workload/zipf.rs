//! YCSB-style Zipfian integer distribution.

use crate::utils::BenchError;

use rand::distributions::Distribution;
use rand::Rng;

/// Zipfian distribution over `[0, items)` where item 0 is the most popular,
/// following the rejection-free generator of Gray et al. used by YCSB.
#[derive(Debug, Clone)]
pub struct Zipfian {
    /// Number of items in the key space.
    items: u64,

    /// Skew constant in (0, 1).
    theta: f64,

    /// 1 / (1 - theta).
    alpha: f64,

    /// Zeta(items, theta).
    zetan: f64,

    /// Precomputed correction term.
    eta: f64,
}

impl Zipfian {
    /// Creates a Zipfian distribution over `items` items with skew `theta`.
    pub fn new(items: u64, theta: f64) -> Result<Self, BenchError> {
        if items == 0 {
            return Err(BenchError::msg("zipfian key space is empty"));
        }
        if !(theta > 0.0 && theta < 1.0) {
            return Err(BenchError(format!(
                "invalid zipfian theta {}",
                theta
            )));
        }

        let zetan = Self::zeta(items, theta);
        let zeta2 = Self::zeta(2, theta);
        let alpha = 1.0 / (1.0 - theta);
        let eta = (1.0 - (2.0 / items as f64).powf(1.0 - theta))
            / (1.0 - zeta2 / zetan);

        Ok(Zipfian {
            items,
            theta,
            alpha,
            zetan,
            eta,
        })
    }

    /// Generalized harmonic number of order `theta` up to `n`.
    fn zeta(n: u64, theta: f64) -> f64 {
        (1..=n).map(|i| 1.0 / (i as f64).powf(theta)).sum()
    }

    /// Number of items in the key space.
    #[inline]
    pub fn items(&self) -> u64 {
        self.items
    }
}

impl Distribution<u64> for Zipfian {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        if self.items == 1 {
            return 0;
        }

        let u: f64 = rng.gen();
        let uz = u * self.zetan;
        if uz < 1.0 {
            return 0;
        }
        if uz < 1.0 + 0.5f64.powf(self.theta) {
            return 1;
        }

        let ret = (self.items as f64
            * (self.eta * u - self.eta + 1.0).powf(self.alpha))
            as u64;
        ret.min(self.items - 1)
    }
}
