//! Arm-selection engine for banner rotation: a cold/warm rating policy
//! over impression and click counts, drawn by roulette-wheel sampling.

pub mod bandits;
pub mod rating;
pub mod sampler;

pub use bandits::{select, BanditStrategy, RandomSource, WeightedBandit};
pub use rating::ratings;
pub use sampler::sample_index;
