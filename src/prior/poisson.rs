//! Poisson candidate with conjugate gamma prior on the rate.
//!
//! The rate carries a `Gamma(1/2 + sum(c k), n)` posterior (Jeffreys shape
//! baseline), giving a negative-binomial predictive. The candidate only
//! participates in model selection while the data look like counts: the first
//! materially non-integer sample excludes it until the next reset, which the
//! mixture observes as a participation flip.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::maths::numerics::{hash_f64, INF};
use crate::maths::special::{gamma_ln, incomplete_beta};
use crate::prior::normal::{minus_log_joint_cdf_impl, probability_of_less_likely_impl};
use crate::prior::{
    validate_batch, CdfBounds, LogLikelihood, ProbabilityCalculation, SampleProbability,
};

/// Relative deviation from an integer beyond which a sample stops looking
/// like a count.
const INTEGER_TOLERANCE: f64 = 1e-8;

/// Conjugate gamma-Poisson prior for count data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoissonRate {
    /// Decayed weighted sum of the absorbed counts.
    sum_count_values: f64,
    /// Decayed count of absorbed samples.
    number_samples: f64,
    /// False once a materially non-integer sample has been seen.
    integer_data: bool,
    /// Exponential forgetting rate.
    decay_rate: f64,
}

impl PoissonRate {
    /// The non-informative prior.
    pub fn non_informative(decay_rate: f64) -> Self {
        PoissonRate {
            sum_count_values: 0.0,
            number_samples: 0.0,
            integer_data: true,
            decay_rate,
        }
    }

    pub fn is_non_informative(&self) -> bool {
        self.number_samples <= 0.0
    }

    /// Counts only: participation is withdrawn on non-integer data.
    pub fn participates_in_model_selection(&self) -> bool {
        self.integer_data
    }

    pub fn unmarginalized_parameters(&self) -> f64 {
        0.0
    }

    /// Shape of the gamma posterior on the rate.
    fn posterior_shape(&self) -> f64 {
        0.5 + self.sum_count_values
    }

    /// Rate of the gamma posterior on the rate.
    fn posterior_rate(&self) -> f64 {
        self.number_samples
    }

    // ========================================================================
    // Updating
    // ========================================================================

    pub fn add_samples(&mut self, samples: &[f64], counts: &[f64]) {
        if !validate_batch("poisson add_samples", samples, counts) {
            return;
        }
        for (x, c) in samples.iter().zip(counts) {
            let k = x.round();
            if (x - k).abs() > INTEGER_TOLERANCE * x.abs().max(1.0) && self.integer_data {
                debug!(x, "Non-integer sample; poisson leaves model selection");
                self.integer_data = false;
            }
            if k < 0.0 {
                error!(x, "Negative sample outside poisson support");
                continue;
            }
            self.sum_count_values += c * k;
            self.number_samples += c;
        }
    }

    pub fn propagate_forwards_by_time(&mut self, time: f64) {
        if !time.is_finite() || time < 0.0 {
            error!(time, "Bad propagation interval");
            return;
        }
        let alpha = (-self.decay_rate * time).exp();
        self.sum_count_values *= alpha;
        self.number_samples *= alpha;
    }

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
        *self = PoissonRate::non_informative(decay_rate);
    }

    // ========================================================================
    // Marginal likelihood
    // ========================================================================

    pub fn joint_log_marginal_likelihood(&self, samples: &[f64], counts: &[f64]) -> LogLikelihood {
        if !validate_batch("poisson likelihood", samples, counts) {
            return LogLikelihood::failed();
        }
        if self.is_non_informative() {
            return LogLikelihood::overflowed();
        }

        let mut count = 0.0;
        let mut count_values = 0.0;
        let mut log_factorials = 0.0;
        for (x, c) in samples.iter().zip(counts) {
            let k = x.round();
            if k < 0.0 {
                // Zero likelihood for negative counts.
                return LogLikelihood::overflowed();
            }
            count += c;
            count_values += c * k;
            log_factorials += c * gamma_ln(k + 1.0);
        }

        let a = self.posterior_shape();
        let b = self.posterior_rate();
        let a_next = a + count_values;
        let b_next = b + count;
        let value = -log_factorials + a * b.ln() - a_next * b_next.ln() + gamma_ln(a_next)
            - gamma_ln(a);

        let result = LogLikelihood::of(value);
        if result.is_failed() {
            error!(?samples, ?counts, "Failed to compute poisson log likelihood");
        }
        result
    }

    /// Negative binomial distribution function at `floor(x)`.
    fn cdf(&self, x: f64) -> f64 {
        if x < 0.0 {
            return 0.0;
        }
        let a = self.posterior_shape();
        let b = self.posterior_rate();
        incomplete_beta(a, x.floor() + 1.0, b / (b + 1.0))
    }

    fn cdf_complement(&self, x: f64) -> f64 {
        if x < 0.0 {
            return 1.0;
        }
        let a = self.posterior_shape();
        let b = self.posterior_rate();
        incomplete_beta(x.floor() + 1.0, a, 1.0 / (b + 1.0))
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

    /// Smallest count whose distribution function reaches `u`.
    fn quantile(&self, u: f64) -> f64 {
        if self.cdf(0.0) >= u {
            return 0.0;
        }
        let mut lo = 0.0;
        let mut hi = (2.0 * self.marginal_likelihood_mean()).ceil().max(1.0);
        while self.cdf(hi) < u && hi < 1e15 {
            lo = hi;
            hi *= 2.0;
        }
        while hi - lo > 1.0 {
            let mid = ((lo + hi) / 2.0).floor();
            if self.cdf(mid) >= u {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        hi
    }

    pub fn sample_marginal_likelihood(&self, n: usize, out: &mut Vec<f64>) {
        if n == 0 || self.is_non_informative() {
            return;
        }
        for j in 0..n {
            let u = (2.0 * j as f64 + 1.0) / (2.0 * n as f64);
            out.push(self.quantile(u));
        }
    }

    // ========================================================================
    // Summary statistics
    // ========================================================================

    pub fn marginal_likelihood_mean(&self) -> f64 {
        if self.is_non_informative() {
            return 0.0;
        }
        self.posterior_shape() / self.posterior_rate()
    }

    pub fn nearest_marginal_likelihood_mean(&self, _value: f64) -> f64 {
        self.marginal_likelihood_mean()
    }

    pub fn marginal_likelihood_mode(&self) -> f64 {
        if self.is_non_informative() {
            return 0.0;
        }
        let a = self.posterior_shape();
        if a > 1.0 {
            ((a - 1.0) / self.posterior_rate()).floor()
        } else {
            0.0
        }
    }

    pub fn marginal_likelihood_variance(&self) -> f64 {
        if self.is_non_informative() {
            return INF;
        }
        let b = self.posterior_rate();
        self.posterior_shape() * (b + 1.0) / (b * b)
    }

    pub fn marginal_likelihood_confidence_interval(&self, percentage: f64) -> (f64, f64) {
        if self.is_non_informative() {
            return (0.0, 0.0);
        }
        let fraction = percentage.clamp(0.0, 100.0) / 100.0;
        let alpha = 0.5 * (1.0 - fraction);
        (self.quantile(alpha), self.quantile(1.0 - alpha))
    }

    pub fn marginal_likelihood_support(&self) -> (f64, f64) {
        (0.0, INF)
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
        let mut seed = hash_f64(seed, self.sum_count_values);
        seed = hash_f64(seed, self.number_samples);
        seed = hash_combine_bool(seed, self.integer_data);
        hash_f64(seed, self.decay_rate)
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.sum_count_values.is_finite()
            && self.sum_count_values >= 0.0
            && self.number_samples.is_finite()
            && self.number_samples >= 0.0
            && self.decay_rate.is_finite()
            && self.decay_rate >= 0.0
    }
}

fn hash_combine_bool(seed: u64, value: bool) -> u64 {
    crate::maths::numerics::hash_combine(seed, value as u64)
}

impl fmt::Display for PoissonRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_non_informative() {
            return write!(f, "poisson non-informative");
        }
        write!(f, "poisson(rate = {:.6})", self.marginal_likelihood_mean())
    }
}
