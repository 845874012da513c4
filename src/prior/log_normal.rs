//! Log-normal candidate with conjugate normal-gamma prior on the log scale.
//!
//! Identical machinery to [`crate::prior::normal`] applied to
//! `y = ln(x + offset)`, plus the Jacobian `1 / (x + offset)` in the data
//! space likelihood. The offset keeps shifted or slightly negative data
//! inside the support `(-offset, inf)` and is re-estimated on demand by
//! [`LogNormalMeanPrecision::adjust_offset`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::maths::numerics::{hash_f64, INF};
use crate::maths::special::{gamma_ln, t_cdf, t_quantile, LOG_2_PI};
use crate::prior::normal::{
    minus_log_joint_cdf_impl, probability_of_less_likely_impl, weighted_moments,
};
use crate::prior::{
    validate_batch, CdfBounds, LogLikelihood, ProbabilityCalculation, SampleProbability,
    ADJUST_OFFSET_SAMPLE_SIZE, MINIMUM_COEFFICIENT_OF_VARIATION,
};

/// Margin the offset keeps between the smallest admissible sample and the
/// support boundary.
pub(crate) const LOG_NORMAL_OFFSET_MARGIN: f64 = 1.0;

/// Conjugate normal-gamma prior for log-normally distributed data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogNormalMeanPrecision {
    /// Shift applied to samples before taking logs.
    offset: f64,
    /// Conditional mean of the log-data mean.
    gaussian_mean: f64,
    /// Pseudo-count of samples carried by the mean estimate.
    gaussian_precision: f64,
    /// Shape of the gamma prior on the log-data precision.
    gamma_shape: f64,
    /// Rate of the gamma prior on the log-data precision.
    gamma_rate: f64,
    /// Decayed count of absorbed samples.
    number_samples: f64,
    /// Exponential forgetting rate.
    decay_rate: f64,
}

impl LogNormalMeanPrecision {
    /// The non-informative prior with no offset.
    pub fn non_informative(decay_rate: f64) -> Self {
        LogNormalMeanPrecision {
            offset: 0.0,
            gaussian_mean: 0.0,
            gaussian_precision: 0.0,
            gamma_shape: 0.0,
            gamma_rate: 0.0,
            number_samples: 0.0,
            decay_rate,
        }
    }

    pub fn is_non_informative(&self) -> bool {
        self.gaussian_precision <= 0.0 || self.gamma_shape <= 0.0
    }

    pub fn participates_in_model_selection(&self) -> bool {
        true
    }

    pub fn unmarginalized_parameters(&self) -> f64 {
        0.0
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
        LOG_NORMAL_OFFSET_MARGIN
    }

    /// Grow the offset so every sample falls inside the support.
    ///
    /// An informative posterior is re-learnt under the new offset from a
    /// fixed-size set of deterministic resamples of the current marginal,
    /// weighted to preserve the absorbed sample count.
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
            new_offset, "Re-learning log-normal posterior under new offset"
        );
        self.set_to_non_informative(new_offset, decay_rate);
        let counts = vec![weight; resamples.len()];
        self.add_samples(&resamples, &counts);
    }

    pub fn set_to_non_informative(&mut self, offset: f64, decay_rate: f64) {
        *self = LogNormalMeanPrecision::non_informative(decay_rate);
        self.offset = offset;
    }

    // ========================================================================
    // Updating
    // ========================================================================

    pub fn add_samples(&mut self, samples: &[f64], counts: &[f64]) {
        if !validate_batch("log-normal add_samples", samples, counts) {
            return;
        }
        let mut logs = Vec::with_capacity(samples.len());
        let mut log_counts = Vec::with_capacity(samples.len());
        for (x, c) in samples.iter().zip(counts) {
            let v = x + self.offset;
            if v <= 0.0 {
                error!(x, offset = self.offset, "Sample outside log-normal support");
                continue;
            }
            logs.push(v.ln());
            log_counts.push(*c);
        }
        if logs.is_empty() {
            return;
        }

        let (n, mean, ss) = weighted_moments(&logs, &log_counts);
        let old_mean = self.gaussian_mean;
        let old_precision = self.gaussian_precision;
        let precision = old_precision + n;
        self.gaussian_mean = (old_precision * old_mean + n * mean) / precision;
        self.gaussian_precision = precision;
        self.gamma_shape += 0.5 * n;
        self.gamma_rate +=
            0.5 * (ss + old_precision * n * (mean - old_mean) * (mean - old_mean) / precision);
        self.number_samples += n;

        let scale = self.gaussian_mean.abs().max(1.0);
        let floor = self.gamma_shape
            * (MINIMUM_COEFFICIENT_OF_VARIATION * scale)
            * (MINIMUM_COEFFICIENT_OF_VARIATION * scale);
        if self.gamma_rate < floor {
            self.gamma_rate = floor;
        }
    }

    pub fn propagate_forwards_by_time(&mut self, time: f64) {
        if !time.is_finite() || time < 0.0 {
            error!(time, "Bad propagation interval");
            return;
        }
        let alpha = (-self.decay_rate * time).exp();
        self.gaussian_precision *= alpha;
        self.gamma_shape *= alpha;
        self.gamma_rate *= alpha;
        self.number_samples *= alpha;
    }

    // ========================================================================
    // Marginal likelihood
    // ========================================================================

    pub fn joint_log_marginal_likelihood(&self, samples: &[f64], counts: &[f64]) -> LogLikelihood {
        if !validate_batch("log-normal likelihood", samples, counts) {
            return LogLikelihood::failed();
        }
        if self.is_non_informative() {
            return LogLikelihood::overflowed();
        }
        let mut logs = Vec::with_capacity(samples.len());
        for x in samples {
            let v = x + self.offset;
            if v <= 0.0 {
                // Zero likelihood outside the support.
                return LogLikelihood::overflowed();
            }
            logs.push(v.ln());
        }

        let (n, mean, ss) = weighted_moments(&logs, counts);
        let precision = self.gaussian_precision + n;
        let shape = self.gamma_shape + 0.5 * n;
        let rate = self.gamma_rate
            + 0.5
                * (ss
                    + self.gaussian_precision * n * (mean - self.gaussian_mean)
                        * (mean - self.gaussian_mean)
                        / precision);

        // The Jacobian of y = ln(x + offset) contributes -sum(c ln(x + offset)),
        // which is exactly -n * mean of the logs.
        let value = -0.5 * n * LOG_2_PI
            + 0.5 * (self.gaussian_precision.ln() - precision.ln())
            + self.gamma_shape * self.gamma_rate.ln()
            - shape * rate.ln()
            + gamma_ln(shape)
            - gamma_ln(self.gamma_shape)
            - n * mean;

        let result = LogLikelihood::of(value);
        if result.is_failed() {
            error!(
                ?samples,
                ?counts,
                "Failed to compute log-normal log likelihood"
            );
        }
        result
    }

    fn predictive_scale2(&self) -> f64 {
        self.gamma_rate * (self.gaussian_precision + 1.0)
            / (self.gamma_shape * self.gaussian_precision)
    }

    fn predictive_degrees_freedom(&self) -> f64 {
        2.0 * self.gamma_shape
    }

    fn cdf(&self, x: f64) -> f64 {
        let v = x + self.offset;
        if v <= 0.0 {
            return 0.0;
        }
        let t = (v.ln() - self.gaussian_mean) / self.predictive_scale2().sqrt();
        t_cdf(t, self.predictive_degrees_freedom())
    }

    fn cdf_complement(&self, x: f64) -> f64 {
        let v = x + self.offset;
        if v <= 0.0 {
            return 1.0;
        }
        let t = (v.ln() - self.gaussian_mean) / self.predictive_scale2().sqrt();
        t_cdf(-t, self.predictive_degrees_freedom())
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

    pub fn sample_marginal_likelihood(&self, n: usize, out: &mut Vec<f64>) {
        if n == 0 || self.is_non_informative() {
            return;
        }
        let scale = self.predictive_scale2().sqrt();
        let df = self.predictive_degrees_freedom();
        for j in 0..n {
            let u = (2.0 * j as f64 + 1.0) / (2.0 * n as f64);
            let y = self.gaussian_mean + scale * t_quantile(u, df);
            out.push(bounded_exp(y) - self.offset);
        }
    }

    // ========================================================================
    // Summary statistics
    // ========================================================================

    /// Mean of the marginal, using the log-normal moment formula with the
    /// predictive squared scale plugged in for the log variance.
    pub fn marginal_likelihood_mean(&self) -> f64 {
        if self.is_non_informative() {
            return 0.0;
        }
        let v = self.predictive_scale2();
        bounded_exp(self.gaussian_mean + 0.5 * v) - self.offset
    }

    pub fn nearest_marginal_likelihood_mean(&self, _value: f64) -> f64 {
        self.marginal_likelihood_mean()
    }

    pub fn marginal_likelihood_mode(&self) -> f64 {
        if self.is_non_informative() {
            return 0.0;
        }
        let v = self.predictive_scale2();
        bounded_exp(self.gaussian_mean - v) - self.offset
    }

    pub fn marginal_likelihood_variance(&self) -> f64 {
        if self.is_non_informative() {
            return INF;
        }
        let v = self.predictive_scale2();
        let mean_sq = bounded_exp(2.0 * self.gaussian_mean + v);
        ((bounded_exp(v) - 1.0) * mean_sq).min(INF)
    }

    pub fn marginal_likelihood_confidence_interval(&self, percentage: f64) -> (f64, f64) {
        if self.is_non_informative() {
            return (0.0, 0.0);
        }
        let fraction = percentage.clamp(0.0, 100.0) / 100.0;
        let alpha = 0.5 * (1.0 - fraction);
        let scale = self.predictive_scale2().sqrt();
        let df = self.predictive_degrees_freedom();
        (
            bounded_exp(self.gaussian_mean + scale * t_quantile(alpha, df)) - self.offset,
            bounded_exp(self.gaussian_mean + scale * t_quantile(1.0 - alpha, df)) - self.offset,
        )
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
        seed = hash_f64(seed, self.gaussian_mean);
        seed = hash_f64(seed, self.gaussian_precision);
        seed = hash_f64(seed, self.gamma_shape);
        seed = hash_f64(seed, self.gamma_rate);
        seed = hash_f64(seed, self.number_samples);
        hash_f64(seed, self.decay_rate)
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.offset.is_finite()
            && self.gaussian_mean.is_finite()
            && self.gaussian_precision.is_finite()
            && self.gaussian_precision >= 0.0
            && self.gamma_shape.is_finite()
            && self.gamma_shape >= 0.0
            && self.gamma_rate.is_finite()
            && self.gamma_rate >= 0.0
            && self.number_samples.is_finite()
            && self.number_samples >= 0.0
            && self.decay_rate.is_finite()
            && self.decay_rate >= 0.0
    }
}

impl fmt::Display for LogNormalMeanPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_non_informative() {
            return write!(f, "log-normal non-informative");
        }
        write!(
            f,
            "log-normal(location = {:.6}, scale = {:.6}, offset = {:.6})",
            self.gaussian_mean,
            self.predictive_scale2().sqrt(),
            self.offset
        )
    }
}

/// `exp(x)` saturated at the finite sentinel instead of IEEE infinity.
fn bounded_exp(x: f64) -> f64 {
    if x >= 709.0 {
        INF
    } else if x <= -709.0 {
        0.0
    } else {
        x.exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maths::numerics::FpStatus;
    use crate::maths::special::t_pdf;

    fn informed(samples: &[f64]) -> LogNormalMeanPrecision {
        let mut prior = LogNormalMeanPrecision::non_informative(0.0);
        let counts = vec![1.0; samples.len()];
        prior.add_samples(samples, &counts);
        prior
    }

    #[test]
    fn fresh_prior_is_non_informative() {
        let prior = LogNormalMeanPrecision::non_informative(0.01);
        assert!(prior.is_non_informative());
        assert!(prior.needs_offset());
        assert_eq!(prior.offset(), 0.0);
        assert_eq!(
            prior.joint_log_marginal_likelihood(&[1.0], &[1.0]).status,
            FpStatus::Overflowed
        );
    }

    #[test]
    fn learns_location_on_the_log_scale() {
        let samples = [std::f64::consts::E; 8];
        let prior = informed(&samples);
        assert!((prior.gaussian_mean - 1.0).abs() < 1e-12);
        assert_eq!(prior.number_samples(), 8.0);
    }

    #[test]
    fn single_sample_likelihood_matches_predictive_density() {
        let prior = informed(&[1.0, 2.0, 4.0, 8.0, 3.0, 5.0]);
        let scale = prior.predictive_scale2().sqrt();
        let df = prior.predictive_degrees_freedom();
        for &x in &[0.5, 1.0, 3.0, 10.0] {
            let ll = prior.joint_log_marginal_likelihood(&[x], &[1.0]);
            assert!(ll.is_stable());
            let t = (x.ln() - prior.gaussian_mean) / scale;
            // Data-space density: t density over the log divided by (scale * x).
            let expected = (t_pdf(t, df) / (scale * x)).ln();
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
        let prior = informed(&[1.0, 2.0, 4.0]);
        let ll = prior.joint_log_marginal_likelihood(&[-1.0], &[1.0]);
        assert_eq!(ll.status, FpStatus::Overflowed);
        assert_eq!(prior.cdf(-1.0), 0.0);
        assert_eq!(prior.cdf_complement(-1.0), 1.0);
    }

    #[test]
    fn offset_adjustment_admits_negative_samples() {
        let mut prior = informed(&[5.0, 6.0, 7.0, 8.0]);
        let samples_before = prior.number_samples();
        prior.adjust_offset(&[-2.0], &[1.0]);
        assert_eq!(prior.offset(), LOG_NORMAL_OFFSET_MARGIN + 2.0);
        // The re-learnt posterior keeps the absorbed count.
        assert!((prior.number_samples() - samples_before).abs() < 1e-6);
        let ll = prior.joint_log_marginal_likelihood(&[-2.0], &[1.0]);
        assert!(ll.is_stable());
        assert!(prior.marginal_likelihood_support().0 <= -2.0);
    }

    #[test]
    fn offset_adjustment_is_a_no_op_inside_support() {
        let mut prior = informed(&[5.0, 6.0, 7.0]);
        let before = prior;
        prior.adjust_offset(&[4.0, 9.0], &[1.0, 1.0]);
        assert_eq!(prior, before);
    }

    #[test]
    fn offset_adjustment_on_fresh_prior_just_moves_support() {
        let mut prior = LogNormalMeanPrecision::non_informative(0.0);
        prior.adjust_offset(&[-3.0], &[1.0]);
        assert_eq!(prior.offset(), LOG_NORMAL_OFFSET_MARGIN + 3.0);
        assert!(prior.is_non_informative());
    }

    #[test]
    fn mean_tracks_heavy_right_tail() {
        // Log-normal data: the marginal mean exceeds the median.
        let samples = [1.0, 1.5, 2.0, 3.0, 5.0, 9.0, 2.5, 1.2];
        let prior = informed(&samples);
        let median = bounded_exp(prior.gaussian_mean) - prior.offset();
        assert!(prior.marginal_likelihood_mean() > median);
        assert!(prior.marginal_likelihood_mode() < median);
    }

    #[test]
    fn sampling_respects_the_support() {
        let prior = informed(&[1.0, 2.0, 4.0, 8.0]);
        let mut samples = Vec::new();
        prior.sample_marginal_likelihood(50, &mut samples);
        assert_eq!(samples.len(), 50);
        let lower = prior.marginal_likelihood_support().0;
        for s in &samples {
            assert!(*s > lower);
        }
    }

    #[test]
    fn confidence_interval_round_trips_through_cdf() {
        let prior = informed(&[1.0, 2.0, 4.0, 8.0, 3.0]);
        let (lo, hi) = prior.marginal_likelihood_confidence_interval(80.0);
        assert!((prior.cdf(lo) - 0.1).abs() < 1e-8);
        assert!((prior.cdf(hi) - 0.9).abs() < 1e-8);
    }

    #[test]
    fn forgetting_preserves_location() {
        let mut prior = informed(&[1.0, 2.0, 4.0, 8.0]);
        prior.set_decay_rate(0.2);
        let location = prior.gaussian_mean;
        prior.propagate_forwards_by_time(3.0);
        assert!((prior.gaussian_mean - location).abs() < 1e-12);
        assert!(prior.number_samples() < 4.0);
    }
}
