//! Multi-armed bandit strategies for banner rotation.

use crate::rating::ratings;
use crate::sampler::sample_index;
use banner_core::error::{BanditError, BanditResult};
use banner_core::types::BannerArm;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::debug;

/// A policy that picks one arm out of a statistics snapshot.
///
/// Implementations are pure: they read the snapshot and never record
/// exposure.
pub trait BanditStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Select using the caller's randomness.
    fn select_with_rng(
        &self,
        snapshot: &[BannerArm],
        rng: &mut dyn RngCore,
    ) -> BanditResult<BannerArm>;

    /// Select using the strategy's own randomness.
    fn select(&self, snapshot: &[BannerArm]) -> BanditResult<BannerArm> {
        self.select_with_rng(snapshot, &mut rand::thread_rng())
    }
}

/// Where a strategy draws its randomness from.
#[derive(Debug, Default)]
pub enum RandomSource {
    /// Per-thread generator, no contention between request handlers.
    #[default]
    ThreadLocal,
    /// One seeded generator shared behind a lock, for reproducible runs.
    Seeded(Mutex<StdRng>),
}

impl RandomSource {
    pub fn seeded(seed: u64) -> Self {
        RandomSource::Seeded(Mutex::new(StdRng::seed_from_u64(seed)))
    }

    pub fn with_rng<T>(&self, f: impl FnOnce(&mut dyn RngCore) -> T) -> T {
        match self {
            RandomSource::ThreadLocal => f(&mut rand::thread_rng()),
            RandomSource::Seeded(rng) => {
                let mut guard = rng.lock();
                f(&mut *guard)
            }
        }
    }
}

/// Pick one arm from `snapshot`.
///
/// Cold arms weigh `1.0`, warm arms weigh their CTR; one arm is drawn in
/// proportion to its weight. A lone arm is returned without drawing.
pub fn select<R: Rng + ?Sized>(
    snapshot: &[BannerArm],
    warm_threshold: u64,
    rng: &mut R,
) -> BanditResult<BannerArm> {
    match snapshot {
        [] => Err(BanditError::InsufficientData),
        [only] => Ok(*only),
        _ => {
            let weights = ratings(snapshot, warm_threshold);
            let index = sample_index(&weights, rng).map_err(|e| {
                debug!(arms = snapshot.len(), warm_threshold, error = %e, "Arm selection failed");
                e
            })?;
            Ok(snapshot[index])
        }
    }
}

/// CTR-weighted roulette selection with unconditional priority for cold arms.
#[derive(Debug)]
pub struct WeightedBandit {
    warm_threshold: u64,
    random: RandomSource,
}

impl WeightedBandit {
    pub fn new(warm_threshold: u64) -> Self {
        Self {
            warm_threshold,
            random: RandomSource::ThreadLocal,
        }
    }

    pub fn with_seed(warm_threshold: u64, seed: u64) -> Self {
        Self {
            warm_threshold,
            random: RandomSource::seeded(seed),
        }
    }

    pub fn warm_threshold(&self) -> u64 {
        self.warm_threshold
    }
}

impl BanditStrategy for WeightedBandit {
    fn name(&self) -> &'static str {
        "weighted_ctr"
    }

    fn select_with_rng(
        &self,
        snapshot: &[BannerArm],
        rng: &mut dyn RngCore,
    ) -> BanditResult<BannerArm> {
        select(snapshot, self.warm_threshold, rng)
    }

    fn select(&self, snapshot: &[BannerArm]) -> BanditResult<BannerArm> {
        self.random
            .with_rng(|rng| select(snapshot, self.warm_threshold, rng))
    }
}
