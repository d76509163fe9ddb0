//! Bernoulli log-likelihood of one dendrogram node.
//!
//! # Score formula (maximum-likelihood edge density at one internal node)
//!
//! ```text
//! p = E / (L * R)
//! score(E, L, R) = E * ln(p) + (L * R - E) * ln(1 - p)
//! ```
//!
//! The score is defined as 0 when `p` is exactly 0 or 1.

/// Log-likelihood contribution of an internal node with `n_left` and
/// `n_right` leaves under its children and `n_edges` graph edges crossing
/// between them.
///
/// This is the hot path of the Monte Carlo move: two calls per proposal.
#[inline]
pub fn node_loglik(n_left: usize, n_right: usize, n_edges: usize) -> f64 {
    let pairs = n_left * n_right;
    if n_edges == 0 || n_edges >= pairs {
        return 0.0;
    }
    let e = n_edges as f64;
    let m = pairs as f64;
    let p = e / m;
    e * p.ln() + (m - e) * (1.0 - p).ln()
}

/// Sum of node scores over `(n_left, n_right, n_edges)` triples.
pub fn tree_loglik<I>(stats: I) -> f64
where
    I: IntoIterator<Item = (usize, usize, usize)>,
{
    stats
        .into_iter()
        .map(|(l, r, e)| node_loglik(l, r, e))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_degenerate_densities() {
        assert_eq!(node_loglik(1, 1, 0), 0.0);
        assert_eq!(node_loglik(1, 1, 1), 0.0);
        assert_eq!(node_loglik(3, 4, 0), 0.0);
        assert_eq!(node_loglik(3, 4, 12), 0.0);
    }

    #[test]
    fn test_node_loglik_with_data() {
        // p = 1/4 over 4 pairs
        let expected = 0.25_f64.ln() + 3.0 * 0.75_f64.ln();
        assert_abs_diff_eq!(node_loglik(2, 2, 1), expected, epsilon = 1e-12);

        // symmetric in the number of edges vs. non-edges
        assert_abs_diff_eq!(node_loglik(3, 1, 1), node_loglik(1, 3, 2), epsilon = 1e-12);
    }

    #[test]
    fn test_node_loglik_is_non_positive() {
        for l in 1..5 {
            for r in 1..5 {
                for e in 0..=(l * r) {
                    let s = node_loglik(l, r, e);
                    assert!(s.is_finite());
                    assert!(s <= 0.0, "l={} r={} e={} score={}", l, r, e, s);
                }
            }
        }
    }

    #[test]
    fn test_tree_loglik_sums_nodes() {
        let stats = vec![(1, 1, 1), (1, 1, 1), (2, 2, 1)];
        assert_abs_diff_eq!(tree_loglik(stats), node_loglik(2, 2, 1), epsilon = 1e-12);
    }
}
