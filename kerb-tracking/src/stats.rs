//! Speed-sample statistics.

/// Floor-index percentiles `(p50, p85, p95)` of a sample vector.
///
/// The index for quantile `q` is `floor(n·q)` clamped to `n − 1`; an
/// empty input yields zeros.
pub fn percentiles(samples: &[f64]) -> (f64, f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pick = |q: f64| {
        let idx = ((sorted.len() as f64 * q).floor() as usize).min(sorted.len() - 1);
        sorted[idx]
    };
    (pick(0.50), pick(0.85), pick(0.95))
}

/// Arithmetic mean; zero for an empty input.
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_input_is_all_zeros() {
        assert_eq!(percentiles(&[]), (0.0, 0.0, 0.0));
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn single_sample_is_every_percentile() {
        assert_eq!(percentiles(&[3.5]), (3.5, 3.5, 3.5));
    }

    #[test]
    fn floor_index_selection() {
        let v: Vec<f64> = (1..=10).map(f64::from).collect();
        let (p50, p85, p95) = percentiles(&v);
        assert_relative_eq!(p50, 6.0); // floor(10·0.50) = 5 → v[5]
        assert_relative_eq!(p85, 9.0); // floor(10·0.85) = 8 → v[8]
        assert_relative_eq!(p95, 10.0); // floor(10·0.95) = 9 → v[9]
    }

    #[test]
    fn percentiles_are_ordered_and_bounded_by_max() {
        let v = [4.0, 1.0, 7.5, 2.2, 9.9, 0.1, 5.5, 3.3];
        let (p50, p85, p95) = percentiles(&v);
        assert!(p50 <= p85);
        assert!(p85 <= p95);
        assert!(p95 <= 9.9);
    }

    #[test]
    fn unsorted_input_is_handled() {
        let v = [5.0, 1.0, 3.0];
        let (p50, _, _) = percentiles(&v);
        assert_relative_eq!(p50, 3.0);
        assert_relative_eq!(mean(&v), 3.0);
    }
}
