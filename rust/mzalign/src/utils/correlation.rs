use crate::errors::DataProcessingError;

fn check_lengths(a: &[f64], b: &[f64], context: &str) -> Result<(), DataProcessingError> {
    if a.len() != b.len() || a.is_empty() {
        return Err(DataProcessingError::ExpectedSlicesSameLength {
            expected: a.len(),
            other: b.len(),
            context: context.to_string(),
        });
    }
    Ok(())
}

/// Calculates the cosine similarity between two vectors of the same size.
///
/// # Example
///
/// ```
/// use mzalign::utils::correlation::cosine_similarity;
///
/// let a = vec![1.0, 2.0, 3.0];
/// let b = vec![4.0, 5.0, 6.0];
/// let result = cosine_similarity(&a, &b).unwrap();
/// assert!((result - 0.9746318).abs() < 1e-6);
/// ```
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Result<f64, DataProcessingError> {
    check_lengths(a, b, "cosine_similarity")?;

    let dot_product: f64 = a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum();
    let magnitude_a: f64 = a.iter().map(|&x| x * x).sum::<f64>().sqrt();
    let magnitude_b: f64 = b.iter().map(|&x| x * x).sum::<f64>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(f64::NAN);
    }
    Ok(dot_product / (magnitude_a * magnitude_b))
}

/// Pearson correlation between two equally sized profiles.
///
/// Constant profiles have no defined correlation and yield `NaN`.
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> Result<f64, DataProcessingError> {
    check_lengths(a, b, "pearson_correlation")?;

    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return Ok(f64::NAN);
    }
    Ok(cov / (var_a.sqrt() * var_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];
        let result = cosine_similarity(&a, &b).unwrap();
        assert!((result - 0.974_631_846).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let result = cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap();
        assert!(result.is_nan());
    }

    #[test]
    fn test_pearson_perfect_and_anti() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        let b = vec![2.0, 4.0, 6.0, 8.0];
        let c = vec![4.0, 3.0, 2.0, 1.0];
        assert!((pearson_correlation(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson_correlation(&a, &c).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        assert!(pearson_correlation(&[1.0, 2.0], &[1.0]).is_err());
        assert!(cosine_similarity(&[], &[]).is_err());
    }
}
