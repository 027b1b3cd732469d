//! Cold/warm rating policy.
//!
//! Cold arms (fewer impressions than the warm threshold) are rated at the
//! ceiling so new banners get exposure; warm arms are rated by their
//! observed click-through rate.

use banner_core::types::BannerArm;

/// Weight given to every cold arm.
pub const COLD_WEIGHT: f64 = 1.0;

pub fn is_warm(arm: &BannerArm, warm_threshold: u64) -> bool {
    arm.impressions >= warm_threshold
}

/// Split arm indices into `(warm, cold)`, each in input order.
pub fn partition(snapshot: &[BannerArm], warm_threshold: u64) -> (Vec<usize>, Vec<usize>) {
    let mut warm = Vec::new();
    let mut cold = Vec::new();
    for (i, arm) in snapshot.iter().enumerate() {
        if is_warm(arm, warm_threshold) {
            warm.push(i);
        } else {
            cold.push(i);
        }
    }
    (warm, cold)
}

pub fn rating(arm: &BannerArm, warm_threshold: u64) -> f64 {
    if is_warm(arm, warm_threshold) {
        arm.ctr()
    } else {
        COLD_WEIGHT
    }
}

/// Weight of every arm, aligned with `snapshot`.
pub fn ratings(snapshot: &[BannerArm], warm_threshold: u64) -> Vec<f64> {
    let (warm, cold) = partition(snapshot, warm_threshold);
    let mut weights = vec![0.0; snapshot.len()];
    for i in cold {
        weights[i] = COLD_WEIGHT;
    }
    for i in warm {
        weights[i] = snapshot[i].ctr();
    }
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arms() -> Vec<BannerArm> {
        vec![
            BannerArm::new(1, 10, 9),
            BannerArm::new(2, 100, 25),
            BannerArm::new(3, 0, 0),
            BannerArm::new(4, 50, 0),
            BannerArm::new(5, 49, 49),
        ]
    }

    #[test]
    fn test_cold_and_warm_weights() {
        assert_eq!(ratings(&arms(), 50), vec![1.0, 0.25, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let arm = BannerArm::new(1, 50, 5);
        assert!(is_warm(&arm, 50));
        assert!(!is_warm(&arm, 51));
        assert_eq!(rating(&arm, 50), 0.1);
    }

    #[test]
    fn test_partition_preserves_order() {
        let (warm, cold) = partition(&arms(), 50);
        assert_eq!(warm, vec![1, 3]);
        assert_eq!(cold, vec![0, 2, 4]);
    }

    #[test]
    fn test_ratings_agree_with_single_arm_rating() {
        let snapshot = arms();
        let expected: Vec<f64> = snapshot.iter().map(|a| rating(a, 50)).collect();
        assert_eq!(ratings(&snapshot, 50), expected);
    }

    #[test]
    fn test_zero_threshold_makes_every_arm_warm() {
        let weights = ratings(&[BannerArm::new(1, 0, 0), BannerArm::new(2, 4, 2)], 0);
        assert_eq!(weights, vec![0.0, 0.5]);
    }

    #[test]
    fn test_inconsistent_counts_do_not_panic() {
        let weights = ratings(&[BannerArm::new(1, 60, 120)], 50);
        assert_eq!(weights, vec![2.0]);
    }

    #[test]
    fn test_ratings_are_deterministic() {
        let snapshot = arms();
        assert_eq!(ratings(&snapshot, 50), ratings(&snapshot, 50));
        assert!(ratings(&[], 50).is_empty());
    }
}
