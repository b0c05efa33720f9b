use anyhow::{Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

// ---------------------------------------------------------------------------
// Small numeric helpers shared across the pipeline
// ---------------------------------------------------------------------------

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mu = mean(values);
    (values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// 95% upper confidence bound of the ensemble mean.
pub fn upper_confidence_interval(values: &[f64]) -> f64 {
    mean(values) + 1.96 * std_dev(values) / (values.len() as f64).sqrt()
}

/// `n` geometrically spaced points from `lo` to `hi`, both included.
pub fn geo_space(lo: f64, hi: f64, n: usize) -> Result<Vec<f64>> {
    if n < 2 {
        bail!("geometric grid needs at least 2 points, got {n}");
    }
    if lo <= 0.0 || hi <= lo {
        bail!("geometric grid needs 0 < lo < hi, got [{lo}, {hi}]");
    }
    let ratio = (hi / lo).powf(1.0 / (n - 1) as f64);
    Ok((0..n).map(|i| lo * ratio.powi(i as i32)).collect())
}

/// Indices of the top `frac` fraction of `values`, at least one, ordered by
/// descending value.
pub fn top_fraction_indices(values: &[f64], frac: f64) -> Vec<usize> {
    if values.is_empty() {
        return Vec::new();
    }
    let keep = ((values.len() as f64 * frac).ceil() as usize).clamp(1, values.len());
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    order.truncate(keep);
    order
}

/// The top `frac` fraction of `values` themselves.
pub fn top_fraction(values: &[f64], frac: f64) -> Vec<f64> {
    top_fraction_indices(values, frac)
        .into_iter()
        .map(|i| values[i])
        .collect()
}

/// Value below which `q` percent of `values` fall (linear interpolation).
pub fn percentile(values: &[f64], q: f64) -> f64 {
    assert!(!values.is_empty(), "percentile of empty slice");
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

/// Pairwise Euclidean distance matrix.
pub fn distance_matrix(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = rows.len();
    let mut dist = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = rows[i]
                .iter()
                .zip(&rows[j])
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }
    dist
}

/// A deterministic permutation of `0..len`.
pub fn seeded_permutation(len: usize, seed: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_space_endpoints() {
        let grid = geo_space(1.0, 1000.0, 4).unwrap();
        for (got, want) in grid.iter().zip([1.0, 10.0, 100.0, 1000.0]) {
            assert!((got - want).abs() < 1e-9, "{got} vs {want}");
        }
        assert!(geo_space(0.0, 1.0, 4).is_err());
        assert!(geo_space(1.0, 10.0, 1).is_err());
    }

    #[test]
    fn top_fraction_keeps_at_least_one() {
        let values = vec![1.0, 5.0, 3.0, 2.0];
        assert_eq!(top_fraction_indices(&values, 0.01), vec![1]);
        assert_eq!(top_fraction(&values, 0.5), vec![5.0, 3.0]);
    }

    #[test]
    fn percentile_interpolates() {
        let values = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 50.0) - 2.0).abs() < 1e-12);
        assert!((percentile(&values, 98.0) - 3.92).abs() < 1e-12);
    }

    #[test]
    fn distance_matrix_is_symmetric() {
        let rows = vec![vec![0.0, 0.0], vec![3.0, 4.0], vec![0.0, 1.0]];
        let d = distance_matrix(&rows);
        assert!((d[0][1] - 5.0).abs() < 1e-12);
        assert_eq!(d[1][0], d[0][1]);
        assert_eq!(d[2][2], 0.0);
    }

    #[test]
    fn seeded_permutation_is_deterministic() {
        assert_eq!(seeded_permutation(10, 42), seeded_permutation(10, 42));
        assert_ne!(seeded_permutation(100, 42), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn uci_exceeds_mean() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert!(upper_confidence_interval(&values) > mean(&values));
    }
}
