//! Roulette-wheel sampling over non-negative weights.

use banner_core::error::{BanditError, BanditResult};
use rand::Rng;

fn total(weights: &[f64]) -> BanditResult<f64> {
    if weights.is_empty() {
        return Err(BanditError::InsufficientData);
    }

    for (index, &weight) in weights.iter().enumerate() {
        if !weight.is_finite() || weight < 0.0 {
            return Err(BanditError::InvalidWeight { index, weight });
        }
    }

    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return Err(BanditError::DegenerateWeights);
    }

    Ok(sum)
}

/// Scale `weights` so they sum to one.
pub fn normalize(weights: &[f64]) -> BanditResult<Vec<f64>> {
    let sum = total(weights)?;
    Ok(weights.iter().map(|w| w / sum).collect())
}

/// Cumulative distribution of `weights` in input order.
///
/// The entry of the last positive weight, and every entry after it, is
/// exactly `1.0`, so any draw in `[0, 1)` lands on some arm.
pub fn cumulative(weights: &[f64]) -> BanditResult<Vec<f64>> {
    let normalized = normalize(weights)?;

    let mut running = 0.0;
    let mut cdf: Vec<f64> = normalized
        .iter()
        .map(|w| {
            running += w;
            running
        })
        .collect();

    if let Some(last) = weights.iter().rposition(|&w| w > 0.0) {
        for c in &mut cdf[last..] {
            *c = 1.0;
        }
    }

    Ok(cdf)
}

/// First index with a positive weight whose cumulative value is `>= p`.
fn index_for_draw(weights: &[f64], cdf: &[f64], p: f64) -> usize {
    let last = weights.iter().rposition(|&w| w > 0.0).unwrap_or(0);
    weights
        .iter()
        .zip(cdf)
        .position(|(&w, &c)| w > 0.0 && c >= p)
        .unwrap_or(last)
}

/// Draw one index with probability proportional to its weight.
pub fn sample_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> BanditResult<usize> {
    let cdf = cumulative(weights)?;
    let p: f64 = rng.gen();
    Ok(index_for_draw(weights, &cdf, p))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_empty_weights() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            sample_index(&[], &mut rng),
            Err(BanditError::InsufficientData)
        );
    }

    #[test]
    fn test_zero_sum() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            sample_index(&[0.0, 0.0, 0.0], &mut rng),
            Err(BanditError::DegenerateWeights)
        );
    }

    #[test]
    fn test_invalid_weights_are_rejected() {
        assert_eq!(
            normalize(&[0.5, -0.5]),
            Err(BanditError::InvalidWeight {
                index: 1,
                weight: -0.5
            })
        );
        assert!(matches!(
            normalize(&[f64::NAN]),
            Err(BanditError::InvalidWeight { index: 0, .. })
        ));
        assert!(matches!(
            normalize(&[1.0, f64::INFINITY]),
            Err(BanditError::InvalidWeight { index: 1, .. })
        ));
    }

    #[test]
    fn test_normalize_sums_to_one() {
        let norm = normalize(&[1.0, 3.0]).unwrap();
        assert_eq!(norm, vec![0.25, 0.75]);
    }

    #[test]
    fn test_cumulative_clamps_tail() {
        let cdf = cumulative(&[0.1; 10]).unwrap();
        assert_eq!(cdf.len(), 10);
        assert_eq!(cdf[9], 1.0);
        assert!(cdf.windows(2).all(|w| w[0] <= w[1]));

        let cdf = cumulative(&[1.0, 1.0, 0.0]).unwrap();
        assert_eq!(cdf, vec![0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_boundary_draws() {
        let weights = [1.0, 1.0];
        let cdf = cumulative(&weights).unwrap();
        assert_eq!(index_for_draw(&weights, &cdf, 0.0), 0);
        assert_eq!(index_for_draw(&weights, &cdf, 0.5), 0);
        assert_eq!(index_for_draw(&weights, &cdf, 0.500_001), 1);
        assert_eq!(index_for_draw(&weights, &cdf, 0.999_999_999), 1);
    }

    #[test]
    fn test_zero_weight_never_drawn() {
        let weights = [0.0, 2.0, 0.0];
        let cdf = cumulative(&weights).unwrap();
        assert_eq!(index_for_draw(&weights, &cdf, 0.0), 1);
        assert_eq!(index_for_draw(&weights, &cdf, 0.999_999_999), 1);

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            assert_eq!(sample_index(&weights, &mut rng).unwrap(), 1);
        }
    }

    #[test]
    fn test_rounding_never_misses_last_arm() {
        let weights = vec![1.0 / 3.0; 3];
        let cdf = cumulative(&weights).unwrap();
        let almost_one = 1.0 - f64::EPSILON;
        assert_eq!(index_for_draw(&weights, &cdf, almost_one), 2);
    }

    #[test]
    fn test_seeded_draws_are_reproducible() {
        let weights = [0.2, 0.5, 0.3, 0.9];
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..32)
                .map(|_| sample_index(&weights, &mut rng).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(7), draw(7));
    }
}
