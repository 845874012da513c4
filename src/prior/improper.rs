//! Improper placeholder candidate.
//!
//! Carries no distributional assumptions and never participates in model
//! selection; it exists so a mixture can be configured with a slot that
//! absorbs sample counts without expressing an opinion.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::maths::numerics::{hash_f64, INF, MINUS_INF};
use crate::prior::{
    validate_batch, CdfBounds, LogLikelihood, ProbabilityCalculation, SampleProbability, Tail,
};

/// Distribution function value reported for an improper marginal, which says
/// nothing about where a sample falls.
pub(crate) const IMPROPER_CDF: f64 = 0.5;

/// A prior that is everywhere improper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImproperPrior {
    /// Decayed count of absorbed samples.
    number_samples: f64,
    /// Exponential forgetting rate.
    decay_rate: f64,
}

impl ImproperPrior {
    pub fn non_informative(decay_rate: f64) -> Self {
        ImproperPrior {
            number_samples: 0.0,
            decay_rate,
        }
    }

    /// Improper forever.
    pub fn is_non_informative(&self) -> bool {
        true
    }

    pub fn participates_in_model_selection(&self) -> bool {
        false
    }

    pub fn unmarginalized_parameters(&self) -> f64 {
        0.0
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

    pub fn add_samples(&mut self, samples: &[f64], counts: &[f64]) {
        if !validate_batch("improper add_samples", samples, counts) {
            return;
        }
        self.number_samples += counts.iter().sum::<f64>();
    }

    pub fn propagate_forwards_by_time(&mut self, time: f64) {
        if !time.is_finite() || time < 0.0 {
            error!(time, "Bad propagation interval");
            return;
        }
        self.number_samples *= (-self.decay_rate * time).exp();
    }

    pub fn set_to_non_informative(&mut self, _offset: f64, decay_rate: f64) {
        *self = ImproperPrior::non_informative(decay_rate);
    }

    pub fn joint_log_marginal_likelihood(
        &self,
        _samples: &[f64],
        _counts: &[f64],
    ) -> LogLikelihood {
        LogLikelihood::overflowed()
    }

    pub fn minus_log_joint_cdf(&self, samples: &[f64], counts: &[f64]) -> Option<CdfBounds> {
        if !validate_batch("minus_log_joint_cdf", samples, counts) {
            return None;
        }
        let value = -IMPROPER_CDF.ln();
        Some(CdfBounds {
            lower: value,
            upper: value,
        })
    }

    pub fn minus_log_joint_cdf_complement(
        &self,
        samples: &[f64],
        counts: &[f64],
    ) -> Option<CdfBounds> {
        if !validate_batch("minus_log_joint_cdf", samples, counts) {
            return None;
        }
        let value = -(1.0 - IMPROPER_CDF).ln();
        Some(CdfBounds {
            lower: value,
            upper: value,
        })
    }

    pub fn probability_of_less_likely_samples(
        &self,
        _calculation: ProbabilityCalculation,
        samples: &[f64],
        counts: &[f64],
    ) -> Option<SampleProbability> {
        if !validate_batch("probability_of_less_likely_samples", samples, counts) {
            return None;
        }
        Some(SampleProbability {
            lower: 1.0,
            upper: 1.0,
            tail: Tail::Undetermined,
        })
    }

    pub fn sample_marginal_likelihood(&self, _n: usize, _out: &mut Vec<f64>) {}

    pub fn marginal_likelihood_mean(&self) -> f64 {
        0.0
    }

    pub fn nearest_marginal_likelihood_mean(&self, _value: f64) -> f64 {
        0.0
    }

    pub fn marginal_likelihood_mode(&self) -> f64 {
        0.0
    }

    pub fn marginal_likelihood_variance(&self) -> f64 {
        INF
    }

    pub fn marginal_likelihood_confidence_interval(&self, _percentage: f64) -> (f64, f64) {
        (0.0, 0.0)
    }

    pub fn marginal_likelihood_support(&self) -> (f64, f64) {
        (MINUS_INF, INF)
    }

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
        let seed = hash_f64(seed, self.number_samples);
        hash_f64(seed, self.decay_rate)
    }

    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.number_samples.is_finite()
            && self.number_samples >= 0.0
            && self.decay_rate.is_finite()
            && self.decay_rate >= 0.0
    }
}

impl fmt::Display for ImproperPrior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "improper")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maths::numerics::FpStatus;

    #[test]
    fn never_participates_and_never_informs() {
        let mut prior = ImproperPrior::non_informative(0.0);
        assert!(!prior.participates_in_model_selection());
        assert!(prior.is_non_informative());
        prior.add_samples(&[1.0, 2.0, 3.0], &[1.0; 3]);
        assert!(prior.is_non_informative());
        assert_eq!(prior.number_samples(), 3.0);
        assert_eq!(
            prior.joint_log_marginal_likelihood(&[1.0], &[1.0]).status,
            FpStatus::Overflowed
        );
    }

    #[test]
    fn cdf_is_a_coin_flip_in_both_directions() {
        let prior = ImproperPrior::non_informative(0.0);
        let below = prior.minus_log_joint_cdf(&[5.0], &[1.0]).unwrap();
        let above = prior.minus_log_joint_cdf_complement(&[5.0], &[1.0]).unwrap();
        assert!((below.lower - std::f64::consts::LN_2).abs() < 1e-15);
        assert_eq!(below.lower, above.lower);
    }

    #[test]
    fn probability_is_always_one_with_no_tail() {
        let prior = ImproperPrior::non_informative(0.0);
        let p = prior
            .probability_of_less_likely_samples(
                ProbabilityCalculation::TwoSided,
                &[100.0],
                &[1.0],
            )
            .unwrap();
        assert_eq!(p.lower, 1.0);
        assert_eq!(p.tail, Tail::Undetermined);
    }

    #[test]
    fn sampling_produces_nothing() {
        let prior = ImproperPrior::non_informative(0.0);
        let mut out = Vec::new();
        prior.sample_marginal_likelihood(10, &mut out);
        assert!(out.is_empty());
    }
}
