//! Closed dispatch over the candidate prior families.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::prior::gamma::GammaRate;
use crate::prior::improper::ImproperPrior;
use crate::prior::log_normal::LogNormalMeanPrecision;
use crate::prior::normal::NormalMeanPrecision;
use crate::prior::poisson::PoissonRate;
use crate::prior::{CdfBounds, LogLikelihood, ProbabilityCalculation, SampleProbability};

/// Identifies a candidate family, independent of its posterior state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorFamily {
    Normal,
    LogNormal,
    Gamma,
    Poisson,
    Improper,
}

/// One candidate model of the mixture.
///
/// A closed enum rather than trait objects: the set of families is fixed,
/// dispatch is exhaustive at compile time, and values stay `Copy` and
/// directly serializable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum CandidatePrior {
    Normal(NormalMeanPrecision),
    LogNormal(LogNormalMeanPrecision),
    Gamma(GammaRate),
    Poisson(PoissonRate),
    Improper(ImproperPrior),
}

impl CandidatePrior {
    /// A non-informative candidate of the given family.
    pub fn non_informative(family: PriorFamily, decay_rate: f64) -> CandidatePrior {
        match family {
            PriorFamily::Normal => {
                CandidatePrior::Normal(NormalMeanPrecision::non_informative(decay_rate))
            }
            PriorFamily::LogNormal => {
                CandidatePrior::LogNormal(LogNormalMeanPrecision::non_informative(decay_rate))
            }
            PriorFamily::Gamma => CandidatePrior::Gamma(GammaRate::non_informative(decay_rate)),
            PriorFamily::Poisson => {
                CandidatePrior::Poisson(PoissonRate::non_informative(decay_rate))
            }
            PriorFamily::Improper => {
                CandidatePrior::Improper(ImproperPrior::non_informative(decay_rate))
            }
        }
    }

    pub fn family(&self) -> PriorFamily {
        match self {
            CandidatePrior::Normal(_) => PriorFamily::Normal,
            CandidatePrior::LogNormal(_) => PriorFamily::LogNormal,
            CandidatePrior::Gamma(_) => PriorFamily::Gamma,
            CandidatePrior::Poisson(_) => PriorFamily::Poisson,
            CandidatePrior::Improper(_) => PriorFamily::Improper,
        }
    }

    pub fn is_non_informative(&self) -> bool {
        match self {
            CandidatePrior::Normal(p) => p.is_non_informative(),
            CandidatePrior::LogNormal(p) => p.is_non_informative(),
            CandidatePrior::Gamma(p) => p.is_non_informative(),
            CandidatePrior::Poisson(p) => p.is_non_informative(),
            CandidatePrior::Improper(p) => p.is_non_informative(),
        }
    }

    pub fn participates_in_model_selection(&self) -> bool {
        match self {
            CandidatePrior::Normal(p) => p.participates_in_model_selection(),
            CandidatePrior::LogNormal(p) => p.participates_in_model_selection(),
            CandidatePrior::Gamma(p) => p.participates_in_model_selection(),
            CandidatePrior::Poisson(p) => p.participates_in_model_selection(),
            CandidatePrior::Improper(p) => p.participates_in_model_selection(),
        }
    }

    pub fn unmarginalized_parameters(&self) -> f64 {
        match self {
            CandidatePrior::Normal(p) => p.unmarginalized_parameters(),
            CandidatePrior::LogNormal(p) => p.unmarginalized_parameters(),
            CandidatePrior::Gamma(p) => p.unmarginalized_parameters(),
            CandidatePrior::Poisson(p) => p.unmarginalized_parameters(),
            CandidatePrior::Improper(p) => p.unmarginalized_parameters(),
        }
    }

    // ========================================================================
    // Offset management
    // ========================================================================

    pub fn needs_offset(&self) -> bool {
        match self {
            CandidatePrior::Normal(p) => p.needs_offset(),
            CandidatePrior::LogNormal(p) => p.needs_offset(),
            CandidatePrior::Gamma(p) => p.needs_offset(),
            CandidatePrior::Poisson(p) => p.needs_offset(),
            CandidatePrior::Improper(p) => p.needs_offset(),
        }
    }

    pub fn offset(&self) -> f64 {
        match self {
            CandidatePrior::Normal(p) => p.offset(),
            CandidatePrior::LogNormal(p) => p.offset(),
            CandidatePrior::Gamma(p) => p.offset(),
            CandidatePrior::Poisson(p) => p.offset(),
            CandidatePrior::Improper(p) => p.offset(),
        }
    }

    pub fn offset_margin(&self) -> f64 {
        match self {
            CandidatePrior::Normal(p) => p.offset_margin(),
            CandidatePrior::LogNormal(p) => p.offset_margin(),
            CandidatePrior::Gamma(p) => p.offset_margin(),
            CandidatePrior::Poisson(p) => p.offset_margin(),
            CandidatePrior::Improper(p) => p.offset_margin(),
        }
    }

    pub fn adjust_offset(&mut self, samples: &[f64], counts: &[f64]) {
        match self {
            CandidatePrior::Normal(p) => p.adjust_offset(samples, counts),
            CandidatePrior::LogNormal(p) => p.adjust_offset(samples, counts),
            CandidatePrior::Gamma(p) => p.adjust_offset(samples, counts),
            CandidatePrior::Poisson(p) => p.adjust_offset(samples, counts),
            CandidatePrior::Improper(p) => p.adjust_offset(samples, counts),
        }
    }

    // ========================================================================
    // Updating
    // ========================================================================

    pub fn add_samples(&mut self, samples: &[f64], counts: &[f64]) {
        match self {
            CandidatePrior::Normal(p) => p.add_samples(samples, counts),
            CandidatePrior::LogNormal(p) => p.add_samples(samples, counts),
            CandidatePrior::Gamma(p) => p.add_samples(samples, counts),
            CandidatePrior::Poisson(p) => p.add_samples(samples, counts),
            CandidatePrior::Improper(p) => p.add_samples(samples, counts),
        }
    }

    pub fn propagate_forwards_by_time(&mut self, time: f64) {
        match self {
            CandidatePrior::Normal(p) => p.propagate_forwards_by_time(time),
            CandidatePrior::LogNormal(p) => p.propagate_forwards_by_time(time),
            CandidatePrior::Gamma(p) => p.propagate_forwards_by_time(time),
            CandidatePrior::Poisson(p) => p.propagate_forwards_by_time(time),
            CandidatePrior::Improper(p) => p.propagate_forwards_by_time(time),
        }
    }

    pub fn set_to_non_informative(&mut self, offset: f64, decay_rate: f64) {
        match self {
            CandidatePrior::Normal(p) => p.set_to_non_informative(offset, decay_rate),
            CandidatePrior::LogNormal(p) => p.set_to_non_informative(offset, decay_rate),
            CandidatePrior::Gamma(p) => p.set_to_non_informative(offset, decay_rate),
            CandidatePrior::Poisson(p) => p.set_to_non_informative(offset, decay_rate),
            CandidatePrior::Improper(p) => p.set_to_non_informative(offset, decay_rate),
        }
    }

    // ========================================================================
    // Marginal likelihood
    // ========================================================================

    pub fn joint_log_marginal_likelihood(&self, samples: &[f64], counts: &[f64]) -> LogLikelihood {
        match self {
            CandidatePrior::Normal(p) => p.joint_log_marginal_likelihood(samples, counts),
            CandidatePrior::LogNormal(p) => p.joint_log_marginal_likelihood(samples, counts),
            CandidatePrior::Gamma(p) => p.joint_log_marginal_likelihood(samples, counts),
            CandidatePrior::Poisson(p) => p.joint_log_marginal_likelihood(samples, counts),
            CandidatePrior::Improper(p) => p.joint_log_marginal_likelihood(samples, counts),
        }
    }

    pub fn minus_log_joint_cdf(&self, samples: &[f64], counts: &[f64]) -> Option<CdfBounds> {
        match self {
            CandidatePrior::Normal(p) => p.minus_log_joint_cdf(samples, counts),
            CandidatePrior::LogNormal(p) => p.minus_log_joint_cdf(samples, counts),
            CandidatePrior::Gamma(p) => p.minus_log_joint_cdf(samples, counts),
            CandidatePrior::Poisson(p) => p.minus_log_joint_cdf(samples, counts),
            CandidatePrior::Improper(p) => p.minus_log_joint_cdf(samples, counts),
        }
    }

    pub fn minus_log_joint_cdf_complement(
        &self,
        samples: &[f64],
        counts: &[f64],
    ) -> Option<CdfBounds> {
        match self {
            CandidatePrior::Normal(p) => p.minus_log_joint_cdf_complement(samples, counts),
            CandidatePrior::LogNormal(p) => p.minus_log_joint_cdf_complement(samples, counts),
            CandidatePrior::Gamma(p) => p.minus_log_joint_cdf_complement(samples, counts),
            CandidatePrior::Poisson(p) => p.minus_log_joint_cdf_complement(samples, counts),
            CandidatePrior::Improper(p) => p.minus_log_joint_cdf_complement(samples, counts),
        }
    }

    pub fn probability_of_less_likely_samples(
        &self,
        calculation: ProbabilityCalculation,
        samples: &[f64],
        counts: &[f64],
    ) -> Option<SampleProbability> {
        match self {
            CandidatePrior::Normal(p) => {
                p.probability_of_less_likely_samples(calculation, samples, counts)
            }
            CandidatePrior::LogNormal(p) => {
                p.probability_of_less_likely_samples(calculation, samples, counts)
            }
            CandidatePrior::Gamma(p) => {
                p.probability_of_less_likely_samples(calculation, samples, counts)
            }
            CandidatePrior::Poisson(p) => {
                p.probability_of_less_likely_samples(calculation, samples, counts)
            }
            CandidatePrior::Improper(p) => {
                p.probability_of_less_likely_samples(calculation, samples, counts)
            }
        }
    }

    pub fn sample_marginal_likelihood(&self, n: usize, out: &mut Vec<f64>) {
        match self {
            CandidatePrior::Normal(p) => p.sample_marginal_likelihood(n, out),
            CandidatePrior::LogNormal(p) => p.sample_marginal_likelihood(n, out),
            CandidatePrior::Gamma(p) => p.sample_marginal_likelihood(n, out),
            CandidatePrior::Poisson(p) => p.sample_marginal_likelihood(n, out),
            CandidatePrior::Improper(p) => p.sample_marginal_likelihood(n, out),
        }
    }

    // ========================================================================
    // Summary statistics
    // ========================================================================

    pub fn marginal_likelihood_mean(&self) -> f64 {
        match self {
            CandidatePrior::Normal(p) => p.marginal_likelihood_mean(),
            CandidatePrior::LogNormal(p) => p.marginal_likelihood_mean(),
            CandidatePrior::Gamma(p) => p.marginal_likelihood_mean(),
            CandidatePrior::Poisson(p) => p.marginal_likelihood_mean(),
            CandidatePrior::Improper(p) => p.marginal_likelihood_mean(),
        }
    }

    pub fn nearest_marginal_likelihood_mean(&self, value: f64) -> f64 {
        match self {
            CandidatePrior::Normal(p) => p.nearest_marginal_likelihood_mean(value),
            CandidatePrior::LogNormal(p) => p.nearest_marginal_likelihood_mean(value),
            CandidatePrior::Gamma(p) => p.nearest_marginal_likelihood_mean(value),
            CandidatePrior::Poisson(p) => p.nearest_marginal_likelihood_mean(value),
            CandidatePrior::Improper(p) => p.nearest_marginal_likelihood_mean(value),
        }
    }

    pub fn marginal_likelihood_mode(&self) -> f64 {
        match self {
            CandidatePrior::Normal(p) => p.marginal_likelihood_mode(),
            CandidatePrior::LogNormal(p) => p.marginal_likelihood_mode(),
            CandidatePrior::Gamma(p) => p.marginal_likelihood_mode(),
            CandidatePrior::Poisson(p) => p.marginal_likelihood_mode(),
            CandidatePrior::Improper(p) => p.marginal_likelihood_mode(),
        }
    }

    pub fn marginal_likelihood_variance(&self) -> f64 {
        match self {
            CandidatePrior::Normal(p) => p.marginal_likelihood_variance(),
            CandidatePrior::LogNormal(p) => p.marginal_likelihood_variance(),
            CandidatePrior::Gamma(p) => p.marginal_likelihood_variance(),
            CandidatePrior::Poisson(p) => p.marginal_likelihood_variance(),
            CandidatePrior::Improper(p) => p.marginal_likelihood_variance(),
        }
    }

    pub fn marginal_likelihood_confidence_interval(&self, percentage: f64) -> (f64, f64) {
        match self {
            CandidatePrior::Normal(p) => p.marginal_likelihood_confidence_interval(percentage),
            CandidatePrior::LogNormal(p) => p.marginal_likelihood_confidence_interval(percentage),
            CandidatePrior::Gamma(p) => p.marginal_likelihood_confidence_interval(percentage),
            CandidatePrior::Poisson(p) => p.marginal_likelihood_confidence_interval(percentage),
            CandidatePrior::Improper(p) => p.marginal_likelihood_confidence_interval(percentage),
        }
    }

    pub fn marginal_likelihood_support(&self) -> (f64, f64) {
        match self {
            CandidatePrior::Normal(p) => p.marginal_likelihood_support(),
            CandidatePrior::LogNormal(p) => p.marginal_likelihood_support(),
            CandidatePrior::Gamma(p) => p.marginal_likelihood_support(),
            CandidatePrior::Poisson(p) => p.marginal_likelihood_support(),
            CandidatePrior::Improper(p) => p.marginal_likelihood_support(),
        }
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub fn number_samples(&self) -> f64 {
        match self {
            CandidatePrior::Normal(p) => p.number_samples(),
            CandidatePrior::LogNormal(p) => p.number_samples(),
            CandidatePrior::Gamma(p) => p.number_samples(),
            CandidatePrior::Poisson(p) => p.number_samples(),
            CandidatePrior::Improper(p) => p.number_samples(),
        }
    }

    pub fn decay_rate(&self) -> f64 {
        match self {
            CandidatePrior::Normal(p) => p.decay_rate(),
            CandidatePrior::LogNormal(p) => p.decay_rate(),
            CandidatePrior::Gamma(p) => p.decay_rate(),
            CandidatePrior::Poisson(p) => p.decay_rate(),
            CandidatePrior::Improper(p) => p.decay_rate(),
        }
    }

    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        match self {
            CandidatePrior::Normal(p) => p.set_decay_rate(decay_rate),
            CandidatePrior::LogNormal(p) => p.set_decay_rate(decay_rate),
            CandidatePrior::Gamma(p) => p.set_decay_rate(decay_rate),
            CandidatePrior::Poisson(p) => p.set_decay_rate(decay_rate),
            CandidatePrior::Improper(p) => p.set_decay_rate(decay_rate),
        }
    }

    pub fn checksum(&self, seed: u64) -> u64 {
        let seed = crate::maths::numerics::hash_combine(seed, self.family() as u64);
        match self {
            CandidatePrior::Normal(p) => p.checksum(seed),
            CandidatePrior::LogNormal(p) => p.checksum(seed),
            CandidatePrior::Gamma(p) => p.checksum(seed),
            CandidatePrior::Poisson(p) => p.checksum(seed),
            CandidatePrior::Improper(p) => p.checksum(seed),
        }
    }

    pub fn memory_usage(&self) -> usize {
        match self {
            CandidatePrior::Normal(p) => p.memory_usage(),
            CandidatePrior::LogNormal(p) => p.memory_usage(),
            CandidatePrior::Gamma(p) => p.memory_usage(),
            CandidatePrior::Poisson(p) => p.memory_usage(),
            CandidatePrior::Improper(p) => p.memory_usage(),
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        match self {
            CandidatePrior::Normal(p) => p.is_valid(),
            CandidatePrior::LogNormal(p) => p.is_valid(),
            CandidatePrior::Gamma(p) => p.is_valid(),
            CandidatePrior::Poisson(p) => p.is_valid(),
            CandidatePrior::Improper(p) => p.is_valid(),
        }
    }
}

impl fmt::Display for CandidatePrior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidatePrior::Normal(p) => p.fmt(f),
            CandidatePrior::LogNormal(p) => p.fmt(f),
            CandidatePrior::Gamma(p) => p.fmt(f),
            CandidatePrior::Poisson(p) => p.fmt(f),
            CandidatePrior::Improper(p) => p.fmt(f),
        }
    }
}

impl From<NormalMeanPrecision> for CandidatePrior {
    fn from(p: NormalMeanPrecision) -> Self {
        CandidatePrior::Normal(p)
    }
}

impl From<LogNormalMeanPrecision> for CandidatePrior {
    fn from(p: LogNormalMeanPrecision) -> Self {
        CandidatePrior::LogNormal(p)
    }
}

impl From<GammaRate> for CandidatePrior {
    fn from(p: GammaRate) -> Self {
        CandidatePrior::Gamma(p)
    }
}

impl From<PoissonRate> for CandidatePrior {
    fn from(p: PoissonRate) -> Self {
        CandidatePrior::Poisson(p)
    }
}

impl From<ImproperPrior> for CandidatePrior {
    fn from(p: ImproperPrior) -> Self {
        CandidatePrior::Improper(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_builds_every_family() {
        for family in [
            PriorFamily::Normal,
            PriorFamily::LogNormal,
            PriorFamily::Gamma,
            PriorFamily::Poisson,
            PriorFamily::Improper,
        ] {
            let prior = CandidatePrior::non_informative(family, 0.01);
            assert_eq!(prior.family(), family);
            assert!(prior.is_non_informative());
            assert_eq!(prior.decay_rate(), 0.01);
        }
    }

    #[test]
    fn dispatch_reaches_the_inner_state() {
        let mut prior = CandidatePrior::non_informative(PriorFamily::Normal, 0.0);
        prior.add_samples(&[1.0, 2.0, 3.0], &[1.0; 3]);
        assert!(!prior.is_non_informative());
        assert_eq!(prior.number_samples(), 3.0);
        assert!((prior.marginal_likelihood_mean() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn serialization_is_tagged_by_family() {
        let prior = CandidatePrior::non_informative(PriorFamily::LogNormal, 0.0);
        let json = serde_json::to_string(&prior).unwrap();
        assert!(json.contains("\"family\":\"log_normal\""), "{}", json);
        let back: CandidatePrior = serde_json::from_str(&json).unwrap();
        assert_eq!(back.family(), PriorFamily::LogNormal);
    }

    #[test]
    fn checksum_distinguishes_families_with_identical_state() {
        let normal = CandidatePrior::non_informative(PriorFamily::Normal, 0.0);
        let improper = CandidatePrior::non_informative(PriorFamily::Improper, 0.0);
        assert_ne!(normal.checksum(0), improper.checksum(0));
    }
}
