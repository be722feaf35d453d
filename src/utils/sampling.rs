//! Random sampling helpers
//!
//! All randomness in a run flows through `ChaCha8Rng` so a seeded run is
//! reproducible on every platform.

use anyhow::{Context, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Seeded RNG, or one seeded from OS entropy when no seed is configured.
pub fn rng_from_seed(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Draw `size` indices into `probabilities`, each index `i` with
/// probability `probabilities[i]`.
///
/// Probabilities must sum to 1 within 0.01. `WeightedIndex` normalises
/// by the actual total, so the small slack never biases a draw.
pub fn weighted_indices<R: Rng + ?Sized>(
    probabilities: &[f64],
    size: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if probabilities.is_empty() {
        anyhow::bail!("No values to choose from");
    }
    if probabilities.iter().any(|p| !p.is_finite() || *p < 0.0) {
        anyhow::bail!("Weights must be finite and non-negative, got {:?}", probabilities);
    }

    let total: f64 = probabilities.iter().sum();
    if (total - 1.0).abs() > 0.01 {
        anyhow::bail!("Weights should sum to 1.0, got {:?}", probabilities);
    }

    let dist = WeightedIndex::new(probabilities)
        .with_context(|| format!("Invalid weights {:?}", probabilities))?;
    Ok((0..size).map(|_| dist.sample(&mut *rng)).collect())
}

/// One standard normal deviate (Box-Muller).
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // gen::<f64>() is in [0, 1); 1 - u keeps ln() away from zero
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_indices_respects_certain_outcome() {
        let mut rng = rng_from_seed(Some(7));
        let picks = weighted_indices(&[0.0, 1.0, 0.0], 50, &mut rng).unwrap();
        assert!(picks.iter().all(|&i| i == 1));
    }

    #[test]
    fn test_weighted_indices_rejects_bad_sum() {
        let mut rng = rng_from_seed(Some(7));
        let err = weighted_indices(&[0.2, 0.2], 3, &mut rng).unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_weighted_indices_roughly_follows_weights() {
        let mut rng = rng_from_seed(Some(11));
        let picks = weighted_indices(&[0.25, 0.75], 4000, &mut rng).unwrap();
        let ones = picks.iter().filter(|&&i| i == 1).count() as f64 / 4000.0;
        assert!((ones - 0.75).abs() < 0.05, "fraction was {}", ones);
    }

    #[test]
    fn test_weighted_indices_follow_weighted_index_stream() {
        let weights = [0.2, 0.5, 0.3];
        let picks = weighted_indices(&weights, 20, &mut rng_from_seed(Some(5))).unwrap();

        let dist = WeightedIndex::new(weights).unwrap();
        let mut rng = rng_from_seed(Some(5));
        let expected: Vec<usize> = (0..20).map(|_| dist.sample(&mut rng)).collect();
        assert_eq!(picks, expected);
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let a: Vec<f64> = {
            let mut rng = rng_from_seed(Some(3));
            (0..5).map(|_| standard_normal(&mut rng)).collect()
        };
        let b: Vec<f64> = {
            let mut rng = rng_from_seed(Some(3));
            (0..5).map(|_| standard_normal(&mut rng)).collect()
        };
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.is_finite()));
    }
}
