//! Weighted allocation of an integer sample budget.

use rand::Rng;
use smallvec::{smallvec, SmallVec};
use tracing::error;

/// Split `n` samples across components in proportion to `weights`.
///
/// Largest-remainder apportionment: each component receives the floor of its
/// proportional share and the leftover budget is assigned by drawing
/// components with probability proportional to their fractional shares,
/// without replacement. The returned counts always sum to exactly `n`, and
/// each count is within one of the unrounded share.
///
/// Invalid weights (non-finite or non-positive total) produce an empty
/// result so callers can detect the failure by length.
pub fn weighted_sample<R: Rng + ?Sized>(
    rng: &mut R,
    n: usize,
    weights: &[f64],
) -> SmallVec<[usize; 8]> {
    if weights.is_empty() {
        return SmallVec::new();
    }

    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 || weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        error!(?weights, "Invalid sampling weights");
        return SmallVec::new();
    }

    let mut counts: SmallVec<[usize; 8]> = smallvec![0; weights.len()];
    if n == 0 {
        return counts;
    }

    let mut fractions: SmallVec<[f64; 8]> = smallvec![0.0; weights.len()];
    let mut allocated = 0usize;
    for (i, &w) in weights.iter().enumerate() {
        let share = n as f64 * w / total;
        let base = share.floor().min(n as f64) as usize;
        counts[i] = base;
        fractions[i] = share - base as f64;
        allocated += base;
    }

    let mut remaining = n.saturating_sub(allocated);
    while remaining > 0 {
        let fraction_total: f64 = fractions.iter().sum();
        let chosen = if fraction_total > 0.0 {
            let mut u = rng.gen::<f64>() * fraction_total;
            let mut pick = fractions.len() - 1;
            for (i, &f) in fractions.iter().enumerate() {
                if u < f {
                    pick = i;
                    break;
                }
                u -= f;
            }
            pick
        } else {
            // Rounding consumed every fractional share; give the leftover to
            // the heaviest component.
            let mut pick = 0;
            for (i, &w) in weights.iter().enumerate() {
                if w > weights[pick] {
                    pick = i;
                }
            }
            pick
        };
        counts[chosen] += 1;
        fractions[chosen] = 0.0;
        remaining -= 1;
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn allocation_is_exact_for_round_shares() {
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let counts = weighted_sample(&mut rng, 1000, &[0.6, 0.3, 0.1]);
            assert_eq!(counts.as_slice(), &[600, 300, 100]);
        }
    }

    #[test]
    fn totals_are_preserved() {
        let mut rng = StdRng::seed_from_u64(42);
        for trial in 0..100 {
            let k = 2 + trial % 6;
            let weights: Vec<f64> = (0..k).map(|_| rng.gen::<f64>() + 1e-3).collect();
            for &n in &[1usize, 7, 50, 999] {
                let counts = weighted_sample(&mut rng, n, &weights);
                assert_eq!(counts.iter().sum::<usize>(), n);
                // Largest remainder keeps every count within one of its share.
                let total: f64 = weights.iter().sum();
                for (i, &c) in counts.iter().enumerate() {
                    let share = n as f64 * weights[i] / total;
                    assert!(
                        (c as f64 - share).abs() <= 1.0 + 1e-9,
                        "count {} too far from share {}",
                        c,
                        share
                    );
                }
            }
        }
    }

    #[test]
    fn zero_weight_components_get_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        let counts = weighted_sample(&mut rng, 100, &[0.5, 0.0, 0.5]);
        assert_eq!(counts.iter().sum::<usize>(), 100);
        assert_eq!(counts[1], 0);
    }

    #[test]
    fn invalid_weights_yield_empty_result() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(weighted_sample(&mut rng, 10, &[]).is_empty());
        assert!(weighted_sample(&mut rng, 10, &[0.0, 0.0]).is_empty());
        assert!(weighted_sample(&mut rng, 10, &[f64::NAN, 1.0]).is_empty());
        assert!(weighted_sample(&mut rng, 10, &[-1.0, 2.0]).is_empty());
    }

    #[test]
    fn zero_budget_allocates_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        let counts = weighted_sample(&mut rng, 0, &[1.0, 2.0]);
        assert_eq!(counts.as_slice(), &[0, 0]);
    }
}
