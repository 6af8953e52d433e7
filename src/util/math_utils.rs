/**
Calculates the arithmetic mean of a slice of f64 values.

## Returns
The mean, or `None` for an empty slice or one containing non-finite values.
 */
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/**
Calculates the sample standard deviation (n - 1 denominator) of a slice of f64 values.

## Arguments
- `values`: A slice of f64 values.

## Returns
The standard deviation, or `None` if calculation is not possible (fewer than two values, or NaNs).
 */
pub fn sample_std_deviation(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let mean = mean(values)?;

    let variance = values
        .iter()
        .map(|value| {
            let diff = mean - value;
            diff * diff
        })
        .sum::<f64>()
        / (n - 1) as f64;

    Some(variance.sqrt())
}

/// Rounds half away from zero to the given number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_basic() {
        assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, f64::NAN]), None);
    }

    #[test]
    fn test_sample_std_deviation_basic() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        // Mean = 3.0, sum of squares = 10, sample variance = 10 / 4 = 2.5
        let std_dev = sample_std_deviation(&values).unwrap();
        assert!((std_dev - 2.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_sample_std_deviation_zero() {
        let values = vec![5.0, 5.0, 5.0];
        let std_dev = sample_std_deviation(&values).unwrap();
        assert!(std_dev.abs() < f64::EPSILON);
    }

    #[test]
    fn test_sample_std_deviation_insufficient_data() {
        assert!(sample_std_deviation(&[5.0]).is_none());
        assert!(sample_std_deviation(&[]).is_none());
        assert!(sample_std_deviation(&[1.0, f64::NAN, 3.0]).is_none());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(42.4567, 2), 42.46);
        assert_eq!(round_to(-1.005_1, 2), -1.01);
        assert_eq!(round_to(7.0, 2), 7.0);
    }
}
