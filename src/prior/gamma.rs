//! Gamma candidate with conjugate prior on the rate.
//!
//! Mathematical Background
//! -----------------------
//! The data (shifted by the offset) are modelled as `v ~ Gamma(s, r)` with
//! the shape `s` estimated from the decayed sample moments by moment
//! matching, `s = mean^2 / variance`, and a conjugate `Gamma(a, b)` prior on
//! the rate `r`. Both `a` and `b` are derived from the same decayed
//! accumulators on demand, `a = s * n` and `b = n * mean`, which keeps the
//! rate posterior consistent with whatever shape the moments currently imply.
//!
//! Marginalizing the rate gives a compound-gamma (scaled beta-prime)
//! predictive whose distribution function is the regularized incomplete beta
//! `I_z(s, a)` with `z = v / (v + b)`.
//!
//! The shape is treated as a point estimate rather than marginalized, so this
//! candidate reports one unmarginalized parameter and pays the corresponding
//! maturity penalty during selection.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::maths::numerics::{hash_f64, INF};
use crate::maths::special::{gamma_ln, incomplete_beta, incomplete_beta_inv};
use crate::prior::normal::{minus_log_joint_cdf_impl, probability_of_less_likely_impl};
use crate::prior::{
    validate_batch, CdfBounds, LogLikelihood, ProbabilityCalculation, SampleProbability,
    ADJUST_OFFSET_SAMPLE_SIZE, MINIMUM_COEFFICIENT_OF_VARIATION,
};

/// Margin the offset keeps between the smallest admissible sample and the
/// support boundary.
pub(crate) const GAMMA_OFFSET_MARGIN: f64 = 0.1;

/// Clamp on the moment-matched likelihood shape.
const MINIMUM_SHAPE: f64 = 0.01;
const MAXIMUM_SHAPE: f64 = 1e5;

/// Conjugate gamma-rate prior with moment-estimated shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaRate {
    /// Shift applied to samples to keep them positive.
    offset: f64,
    /// Decayed weighted mean of the shifted samples.
    sample_mean: f64,
    /// Decayed weighted centred second moment of the shifted samples.
    sample_m2: f64,
    /// Decayed count of absorbed samples.
    number_samples: f64,
    /// Exponential forgetting rate.
    decay_rate: f64,
}

/// The derived conjugate state.
struct Posterior {
    shape: f64,
    a: f64,
    b: f64,
}

impl GammaRate {
    /// The non-informative prior with no offset.
    pub fn non_informative(decay_rate: f64) -> Self {
        GammaRate {
            offset: 0.0,
            sample_mean: 0.0,
            sample_m2: 0.0,
            number_samples: 0.0,
            decay_rate,
        }
    }

    /// Non-informative until the moments pin down a shape, which needs at
    /// least two distinct sample values.
    pub fn is_non_informative(&self) -> bool {
        self.number_samples <= 0.0 || self.sample_m2 <= 0.0
    }

    pub fn participates_in_model_selection(&self) -> bool {
        true
    }

    /// The shape estimate is not integrated out.
    pub fn unmarginalized_parameters(&self) -> f64 {
        1.0
    }

    fn likelihood_shape(&self) -> Option<f64> {
        if self.is_non_informative() {
            return None;
        }
        let scale = self.sample_mean.abs().max(1.0);
        let floor = (MINIMUM_COEFFICIENT_OF_VARIATION * scale)
            * (MINIMUM_COEFFICIENT_OF_VARIATION * scale);
        let variance = (self.sample_m2 / self.number_samples).max(floor);
        Some((self.sample_mean * self.sample_mean / variance).clamp(MINIMUM_SHAPE, MAXIMUM_SHAPE))
    }

    fn posterior(&self) -> Option<Posterior> {
        let shape = self.likelihood_shape()?;
        Some(Posterior {
            shape,
            a: shape * self.number_samples,
            b: self.number_samples * self.sample_mean,
        })
    }

    // ========================================================================
    // Offset management
    // ========================================================================

    pub fn needs_offset(&self) -> bool {
        true
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn offset_margin(&self) -> f64 {
        GAMMA_OFFSET_MARGIN
    }

    /// Grow the offset so every sample falls inside the support, re-learning
    /// an informative posterior from deterministic resamples.
    pub fn adjust_offset(&mut self, samples: &[f64], _counts: &[f64]) {
        let min_sample = samples.iter().cloned().fold(f64::INFINITY, f64::min);
        if !min_sample.is_finite() || min_sample + self.offset > 0.0 {
            return;
        }
        let new_offset = self.offset_margin() - min_sample;
        if self.is_non_informative() {
            self.offset = new_offset;
            return;
        }

        let mut resamples = Vec::with_capacity(ADJUST_OFFSET_SAMPLE_SIZE);
        self.sample_marginal_likelihood(ADJUST_OFFSET_SAMPLE_SIZE, &mut resamples);
        let weight = self.number_samples / resamples.len() as f64;
        let decay_rate = self.decay_rate;
        debug!(
            old_offset = self.offset,
            new_offset, "Re-learning gamma posterior under new offset"
        );
        self.set_to_non_informative(new_offset, decay_rate);
        let counts = vec![weight; resamples.len()];
        self.add_samples(&resamples, &counts);
    }

    pub fn set_to_non_informative(&mut self, offset: f64, decay_rate: f64) {
        *self = GammaRate::non_informative(decay_rate);
        self.offset = offset;
    }

    // ========================================================================
    // Updating
    // ========================================================================

    pub fn add_samples(&mut self, samples: &[f64], counts: &[f64]) {
        if !validate_batch("gamma add_samples", samples, counts) {
            return;
        }
        for (x, c) in samples.iter().zip(counts) {
            let v = x + self.offset;
            if v <= 0.0 {
                error!(x, offset = self.offset, "Sample outside gamma support");
                continue;
            }
            // Weighted Welford update of the moment accumulators.
            self.number_samples += c;
            let delta = v - self.sample_mean;
            self.sample_mean += (c / self.number_samples) * delta;
            self.sample_m2 += c * delta * (v - self.sample_mean);
        }
        if self.sample_m2 < 0.0 {
            self.sample_m2 = 0.0;
        }
    }

    pub fn propagate_forwards_by_time(&mut self, time: f64) {
        if !time.is_finite() || time < 0.0 {
            error!(time, "Bad propagation interval");
            return;
        }
        let alpha = (-self.decay_rate * time).exp();
        self.number_samples *= alpha;
        self.sample_m2 *= alpha;
    }

    // ========================================================================
    // Marginal likelihood
    // ========================================================================

    pub fn joint_log_marginal_likelihood(&self, samples: &[f64], counts: &[f64]) -> LogLikelihood {
        if !validate_batch("gamma likelihood", samples, counts) {
            return LogLikelihood::failed();
        }
        let Some(p) = self.posterior() else {
            return LogLikelihood::overflowed();
        };

        let mut count = 0.0;
        let mut total = 0.0;
        let mut log_total = 0.0;
        for (x, c) in samples.iter().zip(counts) {
            let v = x + self.offset;
            if v <= 0.0 {
                // Zero likelihood outside the support.
                return LogLikelihood::overflowed();
            }
            count += c;
            total += c * v;
            log_total += c * v.ln();
        }

        let a = p.a + p.shape * count;
        let b = p.b + total;
        let value = (p.shape - 1.0) * log_total - count * gamma_ln(p.shape)
            + p.a * p.b.ln()
            - a * b.ln()
            + gamma_ln(a)
            - gamma_ln(p.a);

        let result = LogLikelihood::of(value);
        if result.is_failed() {
            error!(?samples, ?counts, "Failed to compute gamma log likelihood");
        }
        result
    }

    fn cdf(&self, x: f64) -> f64 {
        let Some(p) = self.posterior() else {
            return f64::NAN;
        };
        let v = x + self.offset;
        if v <= 0.0 {
            return 0.0;
        }
        incomplete_beta(p.shape, p.a, v / (v + p.b))
    }

    fn cdf_complement(&self, x: f64) -> f64 {
        let Some(p) = self.posterior() else {
            return f64::NAN;
        };
        let v = x + self.offset;
        if v <= 0.0 {
            return 1.0;
        }
        // 1 - I_z(s, a) = I_{1-z}(a, s), with 1 - z formed without
        // cancellation.
        incomplete_beta(p.a, p.shape, p.b / (v + p.b))
    }

    pub fn minus_log_joint_cdf(&self, samples: &[f64], counts: &[f64]) -> Option<CdfBounds> {
        minus_log_joint_cdf_impl(self.is_non_informative(), samples, counts, |x| self.cdf(x))
    }

    pub fn minus_log_joint_cdf_complement(
        &self,
        samples: &[f64],
        counts: &[f64],
    ) -> Option<CdfBounds> {
        minus_log_joint_cdf_impl(self.is_non_informative(), samples, counts, |x| {
            self.cdf_complement(x)
        })
    }

    pub fn probability_of_less_likely_samples(
        &self,
        calculation: ProbabilityCalculation,
        samples: &[f64],
        counts: &[f64],
    ) -> Option<SampleProbability> {
        probability_of_less_likely_impl(
            self.is_non_informative(),
            calculation,
            samples,
            counts,
            self.marginal_likelihood_mode(),
            |x| self.cdf(x),
            |x| self.cdf_complement(x),
        )
    }

    fn quantile(&self, p: &Posterior, u: f64) -> f64 {
        let z = incomplete_beta_inv(p.shape, p.a, u);
        if z >= 1.0 {
            return INF;
        }
        p.b * z / (1.0 - z) - self.offset
    }

    pub fn sample_marginal_likelihood(&self, n: usize, out: &mut Vec<f64>) {
        if n == 0 {
            return;
        }
        let Some(p) = self.posterior() else {
            return;
        };
        for j in 0..n {
            let u = (2.0 * j as f64 + 1.0) / (2.0 * n as f64);
            out.push(self.quantile(&p, u));
        }
    }

    // ========================================================================
    // Summary statistics
    // ========================================================================

    /// Predictive mean `b s / (a - 1)`, falling back to the sample mean for a
    /// posterior too young for the moment to exist.
    pub fn marginal_likelihood_mean(&self) -> f64 {
        let Some(p) = self.posterior() else {
            return 0.0;
        };
        if p.a > 1.0 {
            p.b * p.shape / (p.a - 1.0) - self.offset
        } else {
            self.sample_mean - self.offset
        }
    }

    pub fn nearest_marginal_likelihood_mean(&self, _value: f64) -> f64 {
        self.marginal_likelihood_mean()
    }

    pub fn marginal_likelihood_mode(&self) -> f64 {
        let Some(p) = self.posterior() else {
            return 0.0;
        };
        if p.shape > 1.0 {
            p.b * (p.shape - 1.0) / (p.a + 1.0) - self.offset
        } else {
            -self.offset
        }
    }

    pub fn marginal_likelihood_variance(&self) -> f64 {
        let Some(p) = self.posterior() else {
            return INF;
        };
        if p.a > 2.0 {
            let mean_z = p.shape / (p.a - 1.0);
            p.b * p.b * mean_z * (p.shape + p.a - 1.0) / ((p.a - 1.0) * (p.a - 2.0))
        } else {
            self.sample_m2 / self.number_samples
        }
    }

    pub fn marginal_likelihood_confidence_interval(&self, percentage: f64) -> (f64, f64) {
        let Some(p) = self.posterior() else {
            return (0.0, 0.0);
        };
        let fraction = percentage.clamp(0.0, 100.0) / 100.0;
        let alpha = 0.5 * (1.0 - fraction);
        (self.quantile(&p, alpha), self.quantile(&p, 1.0 - alpha))
    }

    pub fn marginal_likelihood_support(&self) -> (f64, f64) {
        (-self.offset, INF)
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub fn number_samples(&self) -> f64 {
        self.number_samples
    }

    pub fn decay_rate(&self) -> f64 {
        self.decay_rate
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.decay_rate = decay_rate;
    }

    pub fn checksum(&self, seed: u64) -> u64 {
        let mut seed = hash_f64(seed, self.offset);
        seed = hash_f64(seed, self.sample_mean);
        seed = hash_f64(seed, self.sample_m2);
        seed = hash_f64(seed, self.number_samples);
        hash_f64(seed, self.decay_rate)
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.offset.is_finite()
            && self.sample_mean.is_finite()
            && self.sample_m2.is_finite()
            && self.sample_m2 >= 0.0
            && self.number_samples.is_finite()
            && self.number_samples >= 0.0
            && self.decay_rate.is_finite()
            && self.decay_rate >= 0.0
    }
}

impl fmt::Display for GammaRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.likelihood_shape() {
            None => write!(f, "gamma non-informative"),
            Some(shape) => write!(
                f,
                "gamma(shape = {:.6}, mean = {:.6})",
                shape,
                self.marginal_likelihood_mean()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maths::numerics::FpStatus;

    fn informed(samples: &[f64]) -> GammaRate {
        let mut prior = GammaRate::non_informative(0.0);
        let counts = vec![1.0; samples.len()];
        prior.add_samples(samples, &counts);
        prior
    }

    #[test]
    fn needs_two_distinct_values_to_inform() {
        let mut prior = GammaRate::non_informative(0.0);
        assert!(prior.is_non_informative());
        prior.add_samples(&[3.0, 3.0, 3.0], &[1.0; 3]);
        assert!(prior.is_non_informative());
        prior.add_samples(&[4.0], &[1.0]);
        assert!(!prior.is_non_informative());
    }

    #[test]
    fn moment_matching_recovers_the_shape() {
        // mean 5, biased variance 5 => shape 5.
        let prior = informed(&[2.0, 4.0, 6.0, 8.0]);
        let shape = prior.likelihood_shape().unwrap();
        assert!((shape - 5.0).abs() < 1e-9);
        assert!((prior.marginal_likelihood_mean() - 5.0).abs() < 0.5);
    }

    #[test]
    fn weighted_batches_match_repetition() {
        let mut weighted = GammaRate::non_informative(0.0);
        weighted.add_samples(&[2.0, 5.0], &[3.0, 2.0]);
        let mut repeated = GammaRate::non_informative(0.0);
        repeated.add_samples(&[2.0, 2.0, 2.0, 5.0, 5.0], &[1.0; 5]);
        assert!((weighted.sample_mean - repeated.sample_mean).abs() < 1e-9);
        assert!((weighted.sample_m2 - repeated.sample_m2).abs() < 1e-9);
        assert_eq!(weighted.number_samples(), repeated.number_samples());
    }

    #[test]
    fn single_sample_likelihood_matches_predictive_density() {
        let prior = informed(&[2.0, 4.0, 6.0, 8.0, 3.0]);
        let p = prior.posterior().unwrap();
        for &x in &[0.5, 2.0, 5.0, 12.0] {
            let ll = prior.joint_log_marginal_likelihood(&[x], &[1.0]);
            assert!(ll.is_stable());
            // Scaled beta-prime density of the compound gamma.
            let expected = (p.shape - 1.0) * x.ln() - gamma_ln(p.shape) + p.a * p.b.ln()
                - (p.a + p.shape) * (p.b + x).ln()
                + gamma_ln(p.a + p.shape)
                - gamma_ln(p.a);
            assert!(
                (ll.value - expected).abs() < 1e-9,
                "x = {}: {} vs {}",
                x,
                ll.value,
                expected
            );
        }
    }

    #[test]
    fn samples_outside_support_have_zero_likelihood() {
        let prior = informed(&[2.0, 4.0, 6.0]);
        let ll = prior.joint_log_marginal_likelihood(&[-0.5], &[1.0]);
        assert_eq!(ll.status, FpStatus::Overflowed);
        assert_eq!(prior.cdf(-0.5), 0.0);
    }

    #[test]
    fn cdf_is_monotone_and_complementary() {
        let prior = informed(&[2.0, 4.0, 6.0, 8.0]);
        let mut last = 0.0;
        for &x in &[0.5, 1.0, 3.0, 5.0, 10.0, 50.0] {
            let f = prior.cdf(x);
            assert!(f >= last);
            assert!((f + prior.cdf_complement(x) - 1.0).abs() < 1e-10);
            last = f;
        }
    }

    #[test]
    fn quantiles_round_trip_through_cdf() {
        let prior = informed(&[2.0, 4.0, 6.0, 8.0, 5.0]);
        let p = prior.posterior().unwrap();
        for &u in &[0.05, 0.25, 0.5, 0.75, 0.95] {
            let x = prior.quantile(&p, u);
            assert!((prior.cdf(x) - u).abs() < 1e-8, "u = {}", u);
        }
    }

    #[test]
    fn offset_adjustment_admits_negative_samples() {
        let mut prior = informed(&[2.0, 4.0, 6.0, 8.0]);
        let samples_before = prior.number_samples();
        prior.adjust_offset(&[-1.5], &[1.0]);
        assert_eq!(prior.offset(), GAMMA_OFFSET_MARGIN + 1.5);
        assert!((prior.number_samples() - samples_before).abs() < 1e-6);
        let ll = prior.joint_log_marginal_likelihood(&[-1.5], &[1.0]);
        assert!(ll.is_stable());
    }

    #[test]
    fn forgetting_preserves_the_shape_estimate() {
        let mut prior = informed(&[2.0, 4.0, 6.0, 8.0]);
        prior.set_decay_rate(0.1);
        let shape = prior.likelihood_shape().unwrap();
        prior.propagate_forwards_by_time(4.0);
        // Count and spread decay together, so the moment-matched shape holds.
        assert!((prior.likelihood_shape().unwrap() - shape).abs() < 1e-9);
        assert!(prior.number_samples() < 4.0);
    }

    #[test]
    fn sampling_is_deterministic_and_in_support() {
        let prior = informed(&[2.0, 4.0, 6.0, 8.0]);
        let mut a = Vec::new();
        let mut b = Vec::new();
        prior.sample_marginal_likelihood(30, &mut a);
        prior.sample_marginal_likelihood(30, &mut b);
        assert_eq!(a, b);
        assert_eq!(a.len(), 30);
        for s in &a {
            assert!(*s > prior.marginal_likelihood_support().0);
        }
    }

    #[test]
    fn reset_clears_accumulators_but_keeps_offset_argument() {
        let mut prior = informed(&[2.0, 4.0]);
        prior.set_to_non_informative(0.75, 0.5);
        assert!(prior.is_non_informative());
        assert_eq!(prior.offset(), 0.75);
        assert_eq!(prior.decay_rate(), 0.5);
        assert_eq!(prior.number_samples(), 0.0);
    }
}
