//! Small numeric helpers shared by the samplers.
use rand::Rng;
use statrs::distribution::{
    Continuous,
    Normal,
};

use crate::errors::DataProcessingError;

fn normal_from_precision(mean: f64, precision: f64) -> Result<Normal, DataProcessingError> {
    let std_dev = (1.0 / precision).sqrt();
    Normal::new(mean, std_dev).map_err(|_| DataProcessingError::ValueOutOfRange {
        value: precision,
        context: format!("normal distribution with mean {} and precision", mean),
    })
}

/// Log density of `x` under a normal parametrised by mean and precision.
pub fn normal_ln_pdf(x: f64, mean: f64, precision: f64) -> Result<f64, DataProcessingError> {
    Ok(normal_from_precision(mean, precision)?.ln_pdf(x))
}

/// One draw from a normal parametrised by mean and precision.
pub fn sample_normal<R: Rng + ?Sized>(
    rng: &mut R,
    mean: f64,
    precision: f64,
) -> Result<f64, DataProcessingError> {
    let dist = normal_from_precision(mean, precision)?;
    Ok(rng.sample(dist))
}

/// `ln(sum(exp(x)))` without overflow. Empty or all `-inf` input gives `-inf`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Samples an index with probability proportional to `exp(log_weights[i])`.
///
/// Returns `None` when no entry has a finite weight.
pub fn sample_log_weights<R: Rng + ?Sized>(rng: &mut R, log_weights: &[f64]) -> Option<usize> {
    let norm = log_sum_exp(log_weights);
    if !norm.is_finite() {
        return None;
    }
    let u: f64 = rng.gen();
    let mut acc = 0.0;
    let mut last_valid = None;
    for (i, w) in log_weights.iter().enumerate() {
        let p = (w - norm).exp();
        if p > 0.0 {
            last_valid = Some(i);
        }
        acc += p;
        if u < acc {
            return Some(i);
        }
    }
    // Rounding can leave `acc` slightly below 1.
    last_valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_log_sum_exp() {
        let v = [0.0f64.ln(), 1.0f64.ln(), 3.0f64.ln()];
        assert!((log_sum_exp(&v) - 4.0f64.ln()).abs() < 1e-12);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_normal_ln_pdf_matches_closed_form() {
        let got = normal_ln_pdf(1.0, 0.0, 4.0).unwrap();
        let expected = 0.5 * (4.0 / (2.0 * std::f64::consts::PI)).ln() - 0.5 * 4.0;
        assert!((got - expected).abs() < 1e-10);
        assert!(normal_ln_pdf(1.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_sample_log_weights_skips_impossible_entries() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let weights = [f64::NEG_INFINITY, 0.0, f64::NEG_INFINITY];
        for _ in 0..100 {
            assert_eq!(sample_log_weights(&mut rng, &weights), Some(1));
        }
        assert_eq!(sample_log_weights(&mut rng, &[f64::NEG_INFINITY]), None);
    }

    #[test]
    fn test_sample_log_weights_frequencies() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let weights = [1.0f64.ln(), 3.0f64.ln()];
        let hits = (0..4000)
            .filter(|_| sample_log_weights(&mut rng, &weights) == Some(1))
            .count();
        let frac = hits as f64 / 4000.0;
        assert!((frac - 0.75).abs() < 0.05, "frac = {}", frac);
    }

    #[test]
    fn test_sample_normal_centered() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let n = 2000;
        let mean = (0..n)
            .map(|_| sample_normal(&mut rng, 5.0, 1.0).unwrap())
            .sum::<f64>()
            / n as f64;
        assert!((mean - 5.0).abs() < 0.15);
    }
}
