//! Normal candidate with conjugate normal-gamma prior.
//!
//! Mathematical Background
//! -----------------------
//! The data are modelled as `x ~ N(mu, 1/tau)` with a conjugate normal-gamma
//! prior on `(mu, tau)`: `tau ~ Gamma(a, b)` (rate parameterization) and
//! `mu | tau ~ N(m, 1/(k tau))`. The posterior stays in the family, with a
//! weighted batch `{(x_i, c_i)}`, `n = sum(c_i)`, mean `xbar` and spread
//! `ss = sum(c_i (x_i - xbar)^2)` updating
//!
//! ```text
//! k' = k + n
//! m' = (k m + n xbar) / k'
//! a' = a + n / 2
//! b' = b + (ss + k n (xbar - m)^2 / k') / 2
//! ```
//!
//! The marginal (predictive) distribution of one future sample is Student's t
//! with `2a` degrees of freedom, location `m` and squared scale
//! `b (k + 1) / (a k)`, and the joint marginal likelihood of a batch has the
//! closed form used by `joint_log_marginal_likelihood` below.
//!
//! The non-informative prior is the improper limit `k = a = b = 0`; the first
//! absorbed batch then reproduces the sample moments.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::maths::numerics::{hash_f64, FpStatus, INF, MINUS_INF};
use crate::maths::special::{gamma_ln, t_cdf, t_quantile, LOG_2_PI};
use crate::prior::{
    validate_batch, CdfBounds, LogLikelihood, ProbabilityCalculation, SampleProbability, Tail,
    MINIMUM_COEFFICIENT_OF_VARIATION,
};

/// Conjugate normal-gamma prior for normally distributed data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalMeanPrecision {
    /// Conditional mean of the data mean.
    gaussian_mean: f64,
    /// Pseudo-count of samples carried by the mean estimate.
    gaussian_precision: f64,
    /// Shape of the gamma prior on the data precision.
    gamma_shape: f64,
    /// Rate of the gamma prior on the data precision.
    gamma_rate: f64,
    /// Decayed count of absorbed samples.
    number_samples: f64,
    /// Exponential forgetting rate.
    decay_rate: f64,
}

impl NormalMeanPrecision {
    /// The non-informative prior.
    pub fn non_informative(decay_rate: f64) -> Self {
        NormalMeanPrecision {
            gaussian_mean: 0.0,
            gaussian_precision: 0.0,
            gamma_shape: 0.0,
            gamma_rate: 0.0,
            number_samples: 0.0,
            decay_rate,
        }
    }

    /// An informative prior with the given normal-gamma parameters.
    ///
    /// `precision` doubles as the pseudo-count of samples the prior is worth.
    pub fn with_parameters(
        mean: f64,
        precision: f64,
        shape: f64,
        rate: f64,
        decay_rate: f64,
    ) -> Self {
        NormalMeanPrecision {
            gaussian_mean: mean,
            gaussian_precision: precision,
            gamma_shape: shape,
            gamma_rate: rate,
            number_samples: precision,
            decay_rate,
        }
    }

    pub fn is_non_informative(&self) -> bool {
        self.gaussian_precision <= 0.0 || self.gamma_shape <= 0.0
    }

    /// The normal candidate always competes for selection.
    pub fn participates_in_model_selection(&self) -> bool {
        true
    }

    /// All parameters are integrated out of the marginal likelihood.
    pub fn unmarginalized_parameters(&self) -> f64 {
        0.0
    }

    // ========================================================================
    // Updating
    // ========================================================================

    pub fn add_samples(&mut self, samples: &[f64], counts: &[f64]) {
        if !validate_batch("normal add_samples", samples, counts) {
            return;
        }
        let (n, mean, ss) = weighted_moments(samples, counts);

        let old_mean = self.gaussian_mean;
        let old_precision = self.gaussian_precision;
        let precision = old_precision + n;
        self.gaussian_mean = (old_precision * old_mean + n * mean) / precision;
        self.gaussian_precision = precision;
        self.gamma_shape += 0.5 * n;
        self.gamma_rate +=
            0.5 * (ss + old_precision * n * (mean - old_mean) * (mean - old_mean) / precision);
        self.number_samples += n;
        self.enforce_minimum_variance();
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

    /// Floor the rate so the implied coefficient of variation stays above
    /// [`MINIMUM_COEFFICIENT_OF_VARIATION`]; constant data would otherwise
    /// collapse the posterior to a point mass.
    fn enforce_minimum_variance(&mut self) {
        let minimum_deviation =
            MINIMUM_COEFFICIENT_OF_VARIATION * self.gaussian_mean.abs().max(1.0);
        let minimum_rate = self.gamma_shape * minimum_deviation * minimum_deviation;
        if self.gamma_rate < minimum_rate {
            self.gamma_rate = minimum_rate;
        }
    }

    /// No offset is needed on the full real line.
    pub fn needs_offset(&self) -> bool {
        false
    }

    pub fn offset(&self) -> f64 {
        0.0
    }

    pub fn offset_margin(&self) -> f64 {
        0.0
    }

    pub fn adjust_offset(&mut self, _samples: &[f64], _counts: &[f64]) {}

    pub fn set_to_non_informative(&mut self, _offset: f64, decay_rate: f64) {
        *self = NormalMeanPrecision::non_informative(decay_rate);
    }

    // ========================================================================
    // Marginal likelihood
    // ========================================================================

    /// Joint log marginal likelihood of a weighted batch under the current
    /// posterior, with all parameters integrated out.
    pub fn joint_log_marginal_likelihood(&self, samples: &[f64], counts: &[f64]) -> LogLikelihood {
        if !validate_batch("normal likelihood", samples, counts) {
            return LogLikelihood::failed();
        }
        if self.is_non_informative() {
            return LogLikelihood::overflowed();
        }

        let (n, mean, ss) = weighted_moments(samples, counts);
        let precision = self.gaussian_precision + n;
        let shape = self.gamma_shape + 0.5 * n;
        let rate = self.gamma_rate
            + 0.5
                * (ss
                    + self.gaussian_precision * n * (mean - self.gaussian_mean)
                        * (mean - self.gaussian_mean)
                        / precision);

        let value = -0.5 * n * LOG_2_PI
            + 0.5 * (self.gaussian_precision.ln() - precision.ln())
            + self.gamma_shape * self.gamma_rate.ln()
            - shape * rate.ln()
            + gamma_ln(shape)
            - gamma_ln(self.gamma_shape);

        let result = LogLikelihood::of(value);
        if result.is_failed() {
            error!(?samples, ?counts, "Failed to compute normal log likelihood");
        }
        result
    }

    /// Location of the predictive Student's t.
    fn predictive_location(&self) -> f64 {
        self.gaussian_mean
    }

    /// Squared scale of the predictive Student's t.
    fn predictive_scale2(&self) -> f64 {
        self.gamma_rate * (self.gaussian_precision + 1.0)
            / (self.gamma_shape * self.gaussian_precision)
    }

    fn predictive_degrees_freedom(&self) -> f64 {
        2.0 * self.gamma_shape
    }

    /// Distribution function of the predictive at `x`.
    fn cdf(&self, x: f64) -> f64 {
        let t = (x - self.predictive_location()) / self.predictive_scale2().sqrt();
        t_cdf(t, self.predictive_degrees_freedom())
    }

    /// Survival function of the predictive at `x`, via t symmetry so the
    /// upper tail keeps full relative precision.
    fn cdf_complement(&self, x: f64) -> f64 {
        let t = (x - self.predictive_location()) / self.predictive_scale2().sqrt();
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

    /// Deterministic marginal likelihood samples at the interior midpoint
    /// quantiles `(2j + 1) / (2n)`.
    pub fn sample_marginal_likelihood(&self, n: usize, out: &mut Vec<f64>) {
        if n == 0 || self.is_non_informative() {
            return;
        }
        let location = self.predictive_location();
        let scale = self.predictive_scale2().sqrt();
        let df = self.predictive_degrees_freedom();
        for j in 0..n {
            let u = (2.0 * j as f64 + 1.0) / (2.0 * n as f64);
            out.push(location + scale * t_quantile(u, df));
        }
    }

    // ========================================================================
    // Summary statistics
    // ========================================================================

    pub fn marginal_likelihood_mean(&self) -> f64 {
        self.gaussian_mean
    }

    pub fn nearest_marginal_likelihood_mean(&self, _value: f64) -> f64 {
        self.gaussian_mean
    }

    pub fn marginal_likelihood_mode(&self) -> f64 {
        self.gaussian_mean
    }

    pub fn marginal_likelihood_variance(&self) -> f64 {
        if self.is_non_informative() || self.gamma_shape <= 1.0 {
            return INF;
        }
        self.predictive_scale2() * self.gamma_shape / (self.gamma_shape - 1.0)
    }

    /// Central confidence interval of the predictive containing `percentage`
    /// percent of its mass.
    pub fn marginal_likelihood_confidence_interval(&self, percentage: f64) -> (f64, f64) {
        if self.is_non_informative() {
            return (self.gaussian_mean, self.gaussian_mean);
        }
        let fraction = percentage.clamp(0.0, 100.0) / 100.0;
        let alpha = 0.5 * (1.0 - fraction);
        let location = self.predictive_location();
        let scale = self.predictive_scale2().sqrt();
        let df = self.predictive_degrees_freedom();
        (
            location + scale * t_quantile(alpha, df),
            location + scale * t_quantile(1.0 - alpha, df),
        )
    }

    pub fn marginal_likelihood_support(&self) -> (f64, f64) {
        (MINUS_INF, INF)
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
        let mut seed = hash_f64(seed, self.gaussian_mean);
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
        self.gaussian_mean.is_finite()
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

impl fmt::Display for NormalMeanPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_non_informative() {
            return write!(f, "normal non-informative");
        }
        write!(
            f,
            "normal(mean = {:.6}, variance = {:.6})",
            self.marginal_likelihood_mean(),
            self.marginal_likelihood_variance()
        )
    }
}

/// Count, mean and centred second moment of a weighted batch.
pub(crate) fn weighted_moments(samples: &[f64], counts: &[f64]) -> (f64, f64, f64) {
    let n: f64 = counts.iter().sum();
    let mean: f64 = samples
        .iter()
        .zip(counts)
        .map(|(x, c)| c * x)
        .sum::<f64>()
        / n;
    let ss: f64 = samples
        .iter()
        .zip(counts)
        .map(|(x, c)| c * (x - mean) * (x - mean))
        .sum();
    (n, mean, ss)
}

/// Shared negated-log-cdf accumulation over a weighted batch.
///
/// Each per-sample distribution function value is clamped to
/// `[DBL_MIN, 1]` before taking logs so the sum stays finite; the bounds
/// coincide because no truncation is applied at the member level.
pub(crate) fn minus_log_joint_cdf_impl(
    non_informative: bool,
    samples: &[f64],
    counts: &[f64],
    cdf: impl Fn(f64) -> f64,
) -> Option<CdfBounds> {
    if !validate_batch("minus_log_joint_cdf", samples, counts) {
        return None;
    }
    if non_informative {
        let value = std::f64::consts::LN_2;
        return Some(CdfBounds {
            lower: value,
            upper: value,
        });
    }
    let mut sum = 0.0;
    for (x, c) in samples.iter().zip(counts) {
        let f = cdf(*x);
        if f.is_nan() {
            error!(x, "Failed to compute cdf");
            return None;
        }
        sum += c * -(f.clamp(f64::MIN_POSITIVE, 1.0).ln());
    }
    Some(CdfBounds {
        lower: sum,
        upper: sum,
    })
}

/// Shared probability-of-less-likely-samples over a weighted batch.
///
/// Per-sample probabilities are combined with Fisher's method; the batch tail
/// is the merge of each sample's side of `mode`.
pub(crate) fn probability_of_less_likely_impl(
    non_informative: bool,
    calculation: ProbabilityCalculation,
    samples: &[f64],
    counts: &[f64],
    mode: f64,
    cdf: impl Fn(f64) -> f64,
    cdf_complement: impl Fn(f64) -> f64,
) -> Option<SampleProbability> {
    if !validate_batch("probability_of_less_likely_samples", samples, counts) {
        return None;
    }
    if non_informative {
        return Some(SampleProbability {
            lower: 1.0,
            upper: 1.0,
            tail: Tail::Undetermined,
        });
    }

    let mut count = 0.0;
    let mut minus_log_product = 0.0;
    let mut tail = Tail::Undetermined;
    for (x, c) in samples.iter().zip(counts) {
        let f = cdf(*x);
        let fc = cdf_complement(*x);
        if f.is_nan() || fc.is_nan() {
            error!(x, "Failed to compute cdf");
            return None;
        }
        let p = match calculation {
            ProbabilityCalculation::OneSidedBelow => f,
            ProbabilityCalculation::OneSidedAbove => fc,
            ProbabilityCalculation::TwoSided => 2.0 * f.min(fc),
        };
        let p = p.clamp(f64::MIN_POSITIVE, 1.0);
        count += c;
        minus_log_product += c * -(p.ln());
        tail = tail.merge(if *x < mode { Tail::Left } else { Tail::Right });
    }

    let p = crate::maths::special::joint_probability_of_less_likely(count, minus_log_product);
    if FpStatus::of(p) != FpStatus::Stable {
        error!(
            count,
            minus_log_product, "Failed to combine sample probabilities"
        );
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    Some(SampleProbability {
        lower: p,
        upper: p,
        tail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maths::special::t_pdf;

    fn informed(samples: &[f64]) -> NormalMeanPrecision {
        let mut prior = NormalMeanPrecision::non_informative(0.0);
        let counts = vec![1.0; samples.len()];
        prior.add_samples(samples, &counts);
        prior
    }

    #[test]
    fn fresh_prior_is_non_informative() {
        let prior = NormalMeanPrecision::non_informative(0.001);
        assert!(prior.is_non_informative());
        assert!(prior.participates_in_model_selection());
        assert_eq!(prior.number_samples(), 0.0);
        assert_eq!(
            prior.joint_log_marginal_likelihood(&[1.0], &[1.0]).status,
            FpStatus::Overflowed
        );
    }

    #[test]
    fn first_batch_reproduces_sample_moments() {
        let samples = [2.0, 4.0, 9.0, 5.0];
        let prior = informed(&samples);
        assert!(!prior.is_non_informative());
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((prior.marginal_likelihood_mean() - mean).abs() < 1e-12);
        assert_eq!(prior.number_samples(), 4.0);
    }

    #[test]
    fn counts_scale_like_repetition() {
        let mut weighted = NormalMeanPrecision::non_informative(0.0);
        weighted.add_samples(&[1.0, 3.0], &[2.0, 3.0]);
        let mut repeated = NormalMeanPrecision::non_informative(0.0);
        repeated.add_samples(&[1.0, 1.0, 3.0, 3.0, 3.0], &[1.0; 5]);
        assert!((weighted.gaussian_mean - repeated.gaussian_mean).abs() < 1e-12);
        assert!((weighted.gamma_rate - repeated.gamma_rate).abs() < 1e-12);
        assert_eq!(weighted.number_samples(), repeated.number_samples());
    }

    #[test]
    fn single_sample_likelihood_matches_predictive_density() {
        let prior = informed(&[1.0, 2.5, 0.5, 4.0, 3.0, 1.5]);
        let scale = prior.predictive_scale2().sqrt();
        let df = prior.predictive_degrees_freedom();
        for &x in &[-1.0, 0.0, 2.0, 5.0, 10.0] {
            let ll = prior.joint_log_marginal_likelihood(&[x], &[1.0]);
            assert!(ll.is_stable());
            let t = (x - prior.predictive_location()) / scale;
            let expected = (t_pdf(t, df) / scale).ln();
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
    fn likelihood_prefers_data_near_posterior_mean() {
        let prior = informed(&[9.0, 10.0, 11.0, 10.5, 9.5]);
        let near = prior.joint_log_marginal_likelihood(&[10.0], &[1.0]);
        let far = prior.joint_log_marginal_likelihood(&[30.0], &[1.0]);
        assert!(near.value > far.value);
    }

    #[test]
    fn cdf_and_complement_sum_to_one() {
        let prior = informed(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        for &x in &[-2.0, 0.5, 3.0, 7.0] {
            let sum = prior.cdf(x) + prior.cdf_complement(x);
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn joint_cdf_accumulates_counts() {
        let prior = informed(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let single = prior.minus_log_joint_cdf(&[2.5], &[1.0]).unwrap();
        let double = prior.minus_log_joint_cdf(&[2.5], &[2.0]).unwrap();
        assert!((double.lower - 2.0 * single.lower).abs() < 1e-12);
        assert_eq!(single.lower, single.upper);
    }

    #[test]
    fn two_sided_probability_is_large_at_the_mode() {
        let prior = informed(&[4.0, 5.0, 6.0, 5.5, 4.5]);
        let at_mode = prior
            .probability_of_less_likely_samples(
                ProbabilityCalculation::TwoSided,
                &[prior.marginal_likelihood_mode()],
                &[1.0],
            )
            .unwrap();
        assert!(at_mode.lower > 0.9);

        let far = prior
            .probability_of_less_likely_samples(ProbabilityCalculation::TwoSided, &[50.0], &[1.0])
            .unwrap();
        assert!(far.lower < 1e-3);
        assert_eq!(far.tail, Tail::Right);

        let low = prior
            .probability_of_less_likely_samples(ProbabilityCalculation::TwoSided, &[-50.0], &[1.0])
            .unwrap();
        assert_eq!(low.tail, Tail::Left);
    }

    #[test]
    fn sampling_is_deterministic_and_centred() {
        let prior = informed(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut first = Vec::new();
        prior.sample_marginal_likelihood(20, &mut first);
        let mut second = Vec::new();
        prior.sample_marginal_likelihood(20, &mut second);
        assert_eq!(first, second);
        assert_eq!(first.len(), 20);
        let sample_mean = first.iter().sum::<f64>() / first.len() as f64;
        assert!((sample_mean - prior.marginal_likelihood_mean()).abs() < 0.2);
        // Quantile order is preserved.
        for window in first.windows(2) {
            assert!(window[0] <= window[1]);
        }
    }

    #[test]
    fn confidence_interval_brackets_the_mean() {
        let prior = informed(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let (lo, hi) = prior.marginal_likelihood_confidence_interval(90.0);
        let mean = prior.marginal_likelihood_mean();
        assert!(lo < mean && mean < hi);
        // The interval endpoints sit at the matching predictive quantiles.
        assert!((prior.cdf(lo) - 0.05).abs() < 1e-9);
        assert!((prior.cdf(hi) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn forgetting_widens_the_predictive() {
        let mut prior = informed(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        prior.set_decay_rate(0.1);
        let mean = prior.marginal_likelihood_mean();
        let scale2 = prior.predictive_scale2();
        let samples = prior.number_samples();
        prior.propagate_forwards_by_time(5.0);
        assert!((prior.marginal_likelihood_mean() - mean).abs() < 1e-12);
        assert!(prior.predictive_scale2() > scale2);
        assert!(prior.number_samples() < samples);
    }

    #[test]
    fn constant_data_keeps_a_positive_variance() {
        let mut prior = NormalMeanPrecision::non_informative(0.0);
        prior.add_samples(&[7.0; 10], &[1.0; 10]);
        assert!(prior.gamma_rate > 0.0);
        assert!(prior.predictive_scale2() > 0.0);
        let ll = prior.joint_log_marginal_likelihood(&[7.0], &[1.0]);
        assert!(ll.is_stable());
    }

    #[test]
    fn reset_returns_to_non_informative() {
        let mut prior = informed(&[1.0, 2.0, 3.0]);
        prior.set_to_non_informative(0.0, 0.25);
        assert!(prior.is_non_informative());
        assert_eq!(prior.number_samples(), 0.0);
        assert_eq!(prior.decay_rate(), 0.25);
    }

    #[test]
    fn checksum_tracks_state() {
        let a = informed(&[1.0, 2.0, 3.0]);
        let b = informed(&[1.0, 2.0, 3.0]);
        assert_eq!(a.checksum(42), b.checksum(42));
        let c = informed(&[1.0, 2.0, 4.0]);
        assert_ne!(a.checksum(42), c.checksum(42));
    }
}
