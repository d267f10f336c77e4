//! Distance-weighted k-nearest-neighbor engine.
//!
//! A linear scan over `N <= ~50,000` training rows at `F <= 16` features is
//! well within the `spec.md` §4.D performance budget (~1ms/query); no
//! ball-tree/k-d tree is implemented since it would only trade code
//! complexity for speed we don't need yet, and it must reproduce brute-force
//! probabilities exactly regardless.

/// Fixed k for the production classifier (`spec.md` §4.D).
pub const K: usize = 9;

/// Given a training matrix `x` (row-major, one `Vec<f64>` per row), integer
/// labels `y` (same length as `x`, values in `0..num_labels`), and a query
/// vector, returns a per-label weight vector (index = label) summing to 1.0,
/// or an empty vector if `x` is empty.
///
/// Ties among the `k` smallest distances are broken by training-row index
/// ascending (`spec.md` §9, the fixed answer to an open question in the
/// Python original). If any selected neighbor is an exact match
/// (`d_i == 0`), the result collapses to a one-hot vector for that
/// neighbor's label (picking the lowest-indexed such neighbor if several
/// coincide), avoiding a division by zero in the distance weighting.
pub fn predict(x: &[Vec<f64>], y: &[u16], k: usize, num_labels: usize, query: &[f64]) -> Vec<f64> {
    if x.is_empty() {
        return Vec::new();
    }

    let mut distances: Vec<(f64, usize)> = x
        .iter()
        .enumerate()
        .map(|(i, row)| (euclidean(row, query), i))
        .collect();

    // Sort by (distance, index) so ties prefer the lower training-row index.
    distances.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));

    let k = k.min(distances.len());
    let neighbors = &distances[..k];

    if let Some(&(_, zero_idx)) = neighbors.iter().find(|&&(d, _)| d == 0.0) {
        let mut probs = vec![0.0; num_labels];
        probs[y[zero_idx] as usize] = 1.0;
        return probs;
    }

    let mut weights = vec![0.0; num_labels];
    let mut total = 0.0;
    for &(d, idx) in neighbors {
        let w = 1.0 / d;
        weights[y[idx] as usize] += w;
        total += w;
    }
    if total > 0.0 {
        for w in &mut weights {
            *w /= total;
        }
    }
    weights
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_collapses_to_one_hot() {
        let x = vec![vec![1.0, 2.0], vec![5.0, 5.0], vec![9.0, 9.0]];
        let y = vec![0u16, 1, 2];
        let probs = predict(&x, &y, 9, 3, &[5.0, 5.0]);
        assert_eq!(probs, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![0u16, 0, 1, 1];
        let probs = predict(&x, &y, 3, 2, &[1.4]);
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_training_set_yields_empty_vector() {
        let x: Vec<Vec<f64>> = vec![];
        let y: Vec<u16> = vec![];
        assert!(predict(&x, &y, 9, 2, &[1.0]).is_empty());
    }

    #[test]
    fn ties_prefer_lower_training_index() {
        // Two points equidistant from the query, different labels; k=1 should
        // pick the one with the lower index.
        let x = vec![vec![0.0], vec![2.0]];
        let y = vec![0u16, 1];
        let probs = predict(&x, &y, 1, 2, &[1.0]);
        assert_eq!(probs, vec![1.0, 0.0]);
    }
}
