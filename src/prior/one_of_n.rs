//! Online Bayesian model selection over a fixed set of candidate priors.
//!
//! Mathematical Background
//! -----------------------
//! The mixture maintains, for each candidate model `m`, a posterior selection
//! weight proportional to `P(m) * L(data | m)`. Updates run incrementally in
//! log space: absorbing a batch adds each candidate's joint log marginal
//! likelihood to its log weight, and the weights are renormalized when the
//! mutation scope ends. Aggregate quantities (marginal likelihood,
//! distribution functions, sample probabilities, summary statistics) are
//! weight-averaged over the candidates, with log-sum-exp used wherever sums
//! of exponentials appear.
//!
//! Three refinements keep the selection honest and stable:
//!
//! - *Maturity penalty.* A candidate that estimates parameters outside the
//!   marginalized posterior (the gamma shape) sees an artificially sharper
//!   likelihood while young. Its log likelihood is discounted by half the
//!   batch's change in log sample count per unmarginalized parameter.
//! - *Weight floor.* A single wild batch may not drive any candidate's weight
//!   below a penalty floor that scales with the batch count, so a normally
//!   better candidate can recover later.
//! - *Participation pinning.* A candidate that has withdrawn from selection
//!   (for example the Poisson on non-integer data) has its weight pinned far
//!   below every live candidate without ever reaching the log-space
//!   sentinel; a candidate whose participation flips is restarted just below
//!   the current best weight.
//!
//! Weight bookkeeping never stores normalized linear weights; they are
//! recomputed from the log weights on every read.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Deref, DerefMut};

use rand::Rng;
use smallvec::SmallVec;
use tracing::{debug, error, trace};

use crate::errors::PriorError;
use crate::maths::numerics::{
    hash_f64, log_sum_exp, log_will_underflow, logn, shift_left, shift_right, truncate, FpStatus,
    INF, MINUS_INF,
};
use crate::maths::sampling::weighted_sample;
use crate::prior::candidate::{CandidatePrior, PriorFamily};
use crate::prior::improper::IMPROPER_CDF;
use crate::prior::weight::ModelWeight;
use crate::prior::{
    validate_batch, CdfBounds, LogLikelihood, ProbabilityCalculation, SampleProbability, Tail,
};

/// `ln(1e-6)`: the relative weight a candidate restarts with when its
/// participation flips.
const LOG_INITIAL_WEIGHT: f64 = -13.815_510_557_964_274;

/// Candidates lighter than this are ignored by weighted summary statistics.
const MINIMUM_SIGNIFICANT_WEIGHT: f64 = 0.01;

/// Relative error tolerated by truncated aggregations.
const MAXIMUM_RELATIVE_ERROR: f64 = 1e-3;

/// `ln(MAXIMUM_RELATIVE_ERROR)`.
const LOG_MAXIMUM_RELATIVE_ERROR: f64 = -6.907_755_278_982_137;

/// Candidates lighter than this are omitted from the display output.
const PRINT_SIGNIFICANT_WEIGHT: f64 = 0.05;

/// Log weight totals within this of zero are treated as already normalized,
/// so serializing a freshly restored prior reproduces its input bit for bit.
const NORMALIZED_TOLERANCE: f64 = 1e-10;

/// Floor, per batch sample, on the log-likelihood penalty a single update may
/// apply to one candidate. Saturates at -100 as the mixture matures; young
/// mixtures forgive less cautiously.
fn max_model_penalty(number_samples: f64) -> f64 {
    -10.0 * number_samples / (0.1 * number_samples + 1.0)
}

pub(crate) type WeightedModels = SmallVec<[(ModelWeight, CandidatePrior); 5]>;

/// An online model-averaging prior over a fixed set of candidate families.
#[derive(Debug, Clone, PartialEq)]
pub struct OneOfNPrior {
    models: WeightedModels,
    decay_rate: f64,
    number_samples: f64,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

impl OneOfNPrior {
    /// Build a mixture with equal initial weights.
    pub fn new(models: Vec<CandidatePrior>, decay_rate: f64) -> Result<Self, PriorError> {
        if models.is_empty() {
            return Err(PriorError::NoModels);
        }
        let weight = 1.0 / models.len() as f64;
        Self::with_weights(models.into_iter().map(|m| (weight, m)).collect(), decay_rate)
    }

    /// Build a mixture with explicit positive initial weights.
    pub fn with_weights(
        models: Vec<(f64, CandidatePrior)>,
        decay_rate: f64,
    ) -> Result<Self, PriorError> {
        if models.is_empty() {
            return Err(PriorError::NoModels);
        }
        let decay_rate = if decay_rate.is_finite() && decay_rate >= 0.0 {
            decay_rate
        } else {
            error!(decay_rate, "Bad decay rate; using zero");
            0.0
        };

        let mut weighted: WeightedModels = SmallVec::new();
        for (weight, mut model) in models {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(PriorError::invalid_weight(format!(
                    "{} for {:?} candidate",
                    weight,
                    model.family()
                )));
            }
            model.set_decay_rate(decay_rate);
            weighted.push((ModelWeight::new(weight), model));
        }

        let mut prior = OneOfNPrior {
            models: weighted,
            decay_rate,
            number_samples: 0.0,
            minimum: None,
            maximum: None,
        };
        prior.normalize_weights();
        Ok(prior)
    }

    /// Rebuild from restored state; the weights are normalized once so a
    /// valid checkpoint round-trips unchanged.
    pub(crate) fn from_restored(
        models: WeightedModels,
        decay_rate: f64,
        number_samples: f64,
        minimum: Option<f64>,
        maximum: Option<f64>,
    ) -> Self {
        let mut prior = OneOfNPrior {
            models,
            decay_rate,
            number_samples,
            minimum,
            maximum,
        };
        prior.normalize_weights();
        prior
    }

    // ========================================================================
    // Weight bookkeeping
    // ========================================================================

    /// Shift the stored log weights so the linear weights sum to one.
    ///
    /// Skipped when the total is already inside [`NORMALIZED_TOLERANCE`] of
    /// normalized, or degenerate (left for the repair path).
    fn normalize_weights(&mut self) {
        let log_total = self.log_weight_total();
        if !log_total.is_finite() || log_total.abs() < NORMALIZED_TOLERANCE {
            return;
        }
        for (weight, _) in self.models.iter_mut() {
            weight.add_log_factor(-log_total);
        }
    }

    fn log_weight_total(&self) -> f64 {
        let log_weights: SmallVec<[f64; 5]> =
            self.models.iter().map(|(w, _)| w.log_weight()).collect();
        log_sum_exp(&log_weights)
    }

    fn has_bad_weights(&self) -> bool {
        self.models
            .iter()
            .any(|(w, _)| !w.log_weight().is_finite())
    }

    fn debug_weights(&self) -> String {
        self.models
            .iter()
            .map(|(w, _)| format!("{:.15e}", w.log_weight()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// The normalized linear selection weights, in model order.
    ///
    /// Degenerate stored weights read as uniform until the next update
    /// repairs the prior.
    pub fn weights(&self) -> Vec<f64> {
        let log_total = self.log_weight_total();
        if !log_total.is_finite() {
            return vec![1.0 / self.models.len() as f64; self.models.len()];
        }
        self.models
            .iter()
            .map(|(w, _)| w.normalized(log_total))
            .collect()
    }

    /// The stored log weights, in model order.
    pub fn log_weights(&self) -> Vec<f64> {
        self.models.iter().map(|(w, _)| w.log_weight()).collect()
    }

    pub fn models(&self) -> impl Iterator<Item = &CandidatePrior> {
        self.models.iter().map(|(_, m)| m)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub(crate) fn weighted_models(&self) -> &[(ModelWeight, CandidatePrior)] {
        &self.models
    }

    pub(crate) fn observed_range(&self) -> (Option<f64>, Option<f64>) {
        (self.minimum, self.maximum)
    }

    fn participating(
        &self,
    ) -> impl Iterator<Item = (usize, &(ModelWeight, CandidatePrior))> {
        self.models
            .iter()
            .enumerate()
            .filter(|(_, (_, m))| m.participates_in_model_selection())
    }

    // ========================================================================
    // Updating
    // ========================================================================

    /// Absorb a weighted sample batch into every candidate and re-score the
    /// selection weights by each candidate's marginal likelihood.
    pub fn add_samples(&mut self, samples: &[f64], counts: &[f64]) {
        if !validate_batch("add_samples", samples, counts) {
            return;
        }

        let mut this = NormalizeOnExit::new(self);
        let was_non_informative = this.is_non_informative();

        // Every candidate's support must cover the batch before scoring.
        this.adjust_offset(samples, counts);

        let batch_count: f64 = counts.iter().sum();
        let count_before = this.number_samples;
        this.number_samples += batch_count;
        for &x in samples {
            this.minimum = Some(this.minimum.map_or(x, |m| m.min(x)));
            this.maximum = Some(this.maximum.map_or(x, |m| m.max(x)));
        }

        // Candidates with unmarginalized parameters see an artificially
        // sharp likelihood while young; discount by the change in log count.
        let penalty = if count_before > 0.0 {
            0.5 * (count_before.ln() - this.number_samples.ln())
        } else {
            0.0
        };

        let mut outcomes: SmallVec<[Option<f64>; 5]> = SmallVec::new();
        let mut reinstated: SmallVec<[bool; 5]> = SmallVec::new();
        let mut min_log_likelihood = INF;
        let mut any_stable = false;

        for (_, model) in this.models.iter_mut() {
            let participates = model.participates_in_model_selection();
            let likelihood = if participates {
                model.joint_log_marginal_likelihood(samples, counts)
            } else {
                LogLikelihood::overflowed()
            };

            match likelihood.status {
                FpStatus::Failed => {
                    error!(
                        model = ?model.family(),
                        ?samples,
                        ?counts,
                        "Failed to compute log likelihood; skipping update for this model"
                    );
                    outcomes.push(None);
                    reinstated.push(false);
                    continue;
                }
                FpStatus::Overflowed => {
                    outcomes.push(Some(MINUS_INF));
                }
                FpStatus::Stable => {
                    let value =
                        likelihood.value + model.unmarginalized_parameters() * penalty;
                    min_log_likelihood = min_log_likelihood.min(value);
                    any_stable = true;
                    outcomes.push(Some(value));
                }
            }

            model.add_samples(samples, counts);
            reinstated.push(participates != model.participates_in_model_selection());
        }

        // The first informative batch seeds the candidates but leaves the
        // weights untouched; the mixture had no likelihood to score against.
        if !was_non_informative && any_stable {
            let min_log_factor = (batch_count * max_model_penalty(this.number_samples))
                .max(min_log_likelihood - batch_count * 100.0);

            let mut max_log_weight = MINUS_INF;
            for (i, outcome) in outcomes.iter().enumerate() {
                let Some(log_likelihood) = *outcome else {
                    continue;
                };
                let (weight, model) = &mut this.models[i];
                let floor = if model.participates_in_model_selection() {
                    min_log_factor
                } else {
                    // Pin far below every live candidate, without compounding
                    // into the log-space sentinel.
                    MINUS_INF / 2.0 - weight.log_weight()
                };
                weight.add_log_factor(log_likelihood.max(floor));
                max_log_weight = max_log_weight.max(weight.log_weight());
            }

            for (i, &flipped) in reinstated.iter().enumerate() {
                if flipped {
                    debug!(
                        model = ?this.models[i].1.family(),
                        "Participation changed; restarting selection weight"
                    );
                    this.models[i]
                        .0
                        .set_log_weight(max_log_weight + LOG_INITIAL_WEIGHT);
                }
            }
        }

        if this.has_bad_weights() {
            error!(
                weights = %this.debug_weights(),
                ?samples,
                ?counts,
                "Model weights are degenerate; resetting to non-informative"
            );
            let offset = this.offset_margin();
            let decay_rate = this.decay_rate;
            this.set_to_non_informative(offset, decay_rate);
        }
    }

    /// Age the candidate posteriors and relax the selection weights towards
    /// uniform at the decay rate.
    pub fn propagate_forwards_by_time(&mut self, time: f64) {
        if !time.is_finite() || time < 0.0 {
            error!(time, "Bad propagation interval");
            return;
        }
        let mut this = NormalizeOnExit::new(self);
        let alpha = (-this.decay_rate * time).exp();
        for (weight, model) in this.models.iter_mut() {
            weight.age(alpha);
            model.propagate_forwards_by_time(time);
        }
        this.number_samples *= alpha;
        trace!(time, alpha, "Aged one-of-n prior");
    }

    /// Permanently drop the candidates whose family matches the predicate.
    ///
    /// Surviving relative weights are preserved up to renormalization. A
    /// predicate matching every candidate is refused; the mixture must keep
    /// at least one model.
    pub fn remove_models(&mut self, mut remove: impl FnMut(PriorFamily) -> bool) {
        if self.models.iter().all(|(_, m)| remove(m.family())) {
            error!("Refusing to remove every candidate model");
            return;
        }
        let mut this = NormalizeOnExit::new(self);
        this.models.retain(|(_, model)| !remove(model.family()));
    }

    /// Reset every candidate and weight, keeping the model set.
    pub fn set_to_non_informative(&mut self, offset: f64, decay_rate: f64) {
        for (weight, model) in self.models.iter_mut() {
            weight.age(0.0);
            model.set_to_non_informative(offset, decay_rate);
        }
        self.decay_rate = decay_rate;
        self.number_samples = 0.0;
        self.normalize_weights();
    }

    // ========================================================================
    // Offset management
    // ========================================================================

    pub fn needs_offset(&self) -> bool {
        self.models.iter().any(|(_, m)| m.needs_offset())
    }

    /// The largest support offset carried by any candidate.
    pub fn offset(&self) -> f64 {
        self.models
            .iter()
            .map(|(_, m)| m.offset())
            .fold(0.0, f64::max)
    }

    pub fn offset_margin(&self) -> f64 {
        self.models
            .iter()
            .map(|(_, m)| m.offset_margin())
            .fold(0.0, f64::max)
    }

    /// Give every candidate the chance to move its support over the batch.
    pub fn adjust_offset(&mut self, samples: &[f64], counts: &[f64]) {
        for (_, model) in self.models.iter_mut() {
            model.adjust_offset(samples, counts);
        }
    }

    // ========================================================================
    // Marginal likelihood
    // ========================================================================

    /// True while any participating candidate is still non-informative, or
    /// the weights are degenerate.
    pub fn is_non_informative(&self) -> bool {
        self.has_bad_weights()
            || self
                .models
                .iter()
                .any(|(_, m)| m.participates_in_model_selection() && m.is_non_informative())
    }

    /// Weight-averaged joint log marginal likelihood of a batch.
    pub fn joint_log_marginal_likelihood(&self, samples: &[f64], counts: &[f64]) -> LogLikelihood {
        if !validate_batch("joint_log_marginal_likelihood", samples, counts) {
            return LogLikelihood::failed();
        }

        let mut log_likelihoods: SmallVec<[f64; 5]> = SmallVec::new();
        let mut max_log_likelihood = MINUS_INF;
        for (_, (weight, model)) in self.participating() {
            let likelihood = model.joint_log_marginal_likelihood(samples, counts);
            match likelihood.status {
                FpStatus::Failed => {
                    error!(model = ?model.family(), "Failed to compute joint log likelihood");
                    return LogLikelihood::failed();
                }
                FpStatus::Overflowed => {}
                FpStatus::Stable => {
                    let value = likelihood.value + weight.log_weight();
                    if value.is_finite() {
                        log_likelihoods.push(value);
                        max_log_likelihood = max_log_likelihood.max(value);
                    }
                }
            }
        }

        if log_likelihoods.is_empty() {
            // Every candidate underflowed (or none participates).
            return LogLikelihood::overflowed();
        }

        let mut sum = 0.0;
        for &value in &log_likelihoods {
            sum += (value - max_log_likelihood).exp();
        }
        let result = LogLikelihood::of(max_log_likelihood + sum.ln());
        if result.status == FpStatus::Overflowed {
            debug!(?samples, "Joint log marginal likelihood overflowed");
        }
        result
    }

    pub fn minus_log_joint_cdf(&self, samples: &[f64], counts: &[f64]) -> Option<CdfBounds> {
        self.minus_log_joint_cdf_impl(false, samples, counts)
    }

    pub fn minus_log_joint_cdf_complement(
        &self,
        samples: &[f64],
        counts: &[f64],
    ) -> Option<CdfBounds> {
        self.minus_log_joint_cdf_impl(true, samples, counts)
    }

    /// Bounds on the negated log of the weight-averaged joint distribution
    /// function.
    ///
    /// Candidates are visited heaviest first. Once the combined weight of the
    /// unvisited tail cannot change the running bounds by more than
    /// [`MAXIMUM_RELATIVE_ERROR`] in log space, the tail is dropped and the
    /// upper bound widened by the worst it could have contributed.
    fn minus_log_joint_cdf_impl(
        &self,
        complement: bool,
        samples: &[f64],
        counts: &[f64],
    ) -> Option<CdfBounds> {
        if !validate_batch("minus_log_joint_cdf", samples, counts) {
            return None;
        }
        if self.is_non_informative() {
            let value = if complement {
                -(1.0 - IMPROPER_CDF).ln()
            } else {
                -IMPROPER_CDF.ln()
            };
            return Some(CdfBounds {
                lower: value,
                upper: value,
            });
        }

        let mut order: SmallVec<[(f64, usize); 5]> = self
            .participating()
            .map(|(i, (w, _))| (w.log_weight(), i))
            .collect();
        if order.is_empty() {
            let value = -IMPROPER_CDF.ln();
            return Some(CdfBounds {
                lower: value,
                upper: value,
            });
        }
        // Heaviest first, insertion order breaking ties.
        order.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let n = order.len();
        let mut log_lower: SmallVec<[f64; 5]> = SmallVec::new();
        let mut log_upper: SmallVec<[f64; 5]> = SmallVec::new();
        let mut max_log_lower = MINUS_INF;
        let mut max_log_upper = MINUS_INF;
        let mut log_max_remainder = MINUS_INF;
        let mut truncated = false;

        for (i, &(log_weight, index)) in order.iter().enumerate() {
            let model = &self.models[index].1;
            let bounds = if complement {
                model.minus_log_joint_cdf_complement(samples, counts)
            } else {
                model.minus_log_joint_cdf(samples, counts)
            };
            let Some(bounds) = bounds else {
                error!(model = ?model.family(), "Failed to compute joint cdf");
                return None;
            };

            // This candidate's term in the log of the weighted cdf sum.
            let li = log_weight - bounds.lower;
            let ui = log_weight - bounds.upper;
            log_lower.push(li);
            log_upper.push(ui);
            max_log_lower = max_log_lower.max(li);
            max_log_upper = max_log_upper.max(ui);

            if i + 1 < n {
                log_max_remainder = logn(n - i - 1) + order[i + 1].0;
                if log_max_remainder < max_log_lower + LOG_MAXIMUM_RELATIVE_ERROR
                    && log_max_remainder < max_log_upper + LOG_MAXIMUM_RELATIVE_ERROR
                {
                    truncated = true;
                    break;
                }
            }
        }

        // When nothing can underflow, sum the exponentials directly; the
        // shifted form loses a bit of precision for no protection.
        if !log_will_underflow(max_log_lower) {
            max_log_lower = 0.0;
        }
        if !log_will_underflow(max_log_upper) {
            max_log_upper = 0.0;
        }
        let mut lower_sum = 0.0;
        let mut upper_sum = 0.0;
        for j in 0..log_lower.len() {
            lower_sum += (log_lower[j] - max_log_lower).exp();
            upper_sum += (log_upper[j] - max_log_upper).exp();
        }
        let lower = -lower_sum.ln() - max_log_lower;
        let mut upper = -upper_sum.ln() - max_log_upper;
        if truncated {
            upper += -(1.0 + (log_max_remainder + upper).exp()).ln();
        }

        Some(CdfBounds {
            lower: lower.max(0.0),
            upper: upper.max(0.0),
        })
    }

    /// Weight-averaged probability of seeing a less likely batch, with the
    /// dominant candidate deciding the tail.
    ///
    /// Candidates are visited heaviest first and the tail of the weight
    /// distribution is pruned once it cannot contribute more than
    /// [`MAXIMUM_RELATIVE_ERROR`] relative to the accumulated bound.
    pub fn probability_of_less_likely_samples(
        &self,
        calculation: ProbabilityCalculation,
        samples: &[f64],
        counts: &[f64],
    ) -> Option<SampleProbability> {
        if !validate_batch("probability_of_less_likely_samples", samples, counts) {
            return None;
        }
        if self.is_non_informative() {
            return Some(SampleProbability {
                lower: 1.0,
                upper: 1.0,
                tail: Tail::Undetermined,
            });
        }

        let log_total = self.log_weight_total();
        let mut order: SmallVec<[(f64, usize); 5]> = self
            .participating()
            .map(|(i, (w, _))| (w.normalized(log_total), i))
            .collect();
        if order.is_empty() {
            return Some(SampleProbability {
                lower: 1.0,
                upper: 1.0,
                tail: Tail::Undetermined,
            });
        }
        order.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let total_models = self.models.len();
        let mut lower = 0.0;
        let mut upper = 0.0;
        let mut tail = Tail::Undetermined;
        let mut tail_weight = -1.0;

        for (i, &(weight, index)) in order.iter().enumerate() {
            // The unvisited candidates can no longer move the result.
            if lower > (total_models - i) as f64 * weight / MAXIMUM_RELATIVE_ERROR {
                break;
            }
            let model = &self.models[index].1;
            let Some(probability) =
                model.probability_of_less_likely_samples(calculation, samples, counts)
            else {
                error!(model = ?model.family(), "Failed to compute sample probability");
                return None;
            };
            lower += weight * probability.lower;
            upper += weight * probability.upper;
            let contribution = weight * (probability.lower + probability.upper);
            if contribution > tail_weight {
                tail_weight = contribution;
                tail = probability.tail;
            }
        }

        if !(0.0..=1.001).contains(&lower) || !(0.0..=1.001).contains(&upper) {
            error!(lower, upper, "Sample probability bounds out of range");
        }
        let lower = if lower.is_nan() {
            0.0
        } else {
            lower.clamp(0.0, 1.0)
        };
        let upper = if upper.is_nan() {
            1.0
        } else {
            upper.clamp(0.0, 1.0)
        };
        Some(SampleProbability { lower, upper, tail })
    }

    /// Draw `number_samples` marginal likelihood samples.
    ///
    /// The budget is split across candidates in proportion to their weights;
    /// each candidate then contributes deterministic quantile samples, so the
    /// only randomness is in the budget allocation. Every sample is truncated
    /// into the intersected support.
    pub fn sample_marginal_likelihood<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        number_samples: usize,
        out: &mut Vec<f64>,
    ) {
        out.clear();
        if number_samples == 0 || self.is_non_informative() {
            return;
        }

        let weights = self.weights();
        let allocation = weighted_sample(rng, number_samples, &weights);
        if allocation.len() != self.models.len() {
            error!("Failed to allocate the sampling budget across candidates");
            return;
        }

        let support = self.marginal_likelihood_support();
        let lower = shift_right(support.0);
        let upper = shift_left(support.1);

        let mut model_samples = Vec::new();
        for (i, (_, model)) in self.models.iter().enumerate() {
            model_samples.clear();
            model.sample_marginal_likelihood(allocation[i], &mut model_samples);
            for &sample in &model_samples {
                out.push(truncate(sample, lower, upper));
            }
        }
    }

    // ========================================================================
    // Summary statistics
    // ========================================================================

    /// Intersection of the participating candidates' supports.
    pub fn marginal_likelihood_support(&self) -> (f64, f64) {
        let mut lower = MINUS_INF;
        let mut upper = INF;
        for (_, (_, model)) in self.participating() {
            let (lo, hi) = model.marginal_likelihood_support();
            lower = lower.max(lo);
            upper = upper.min(hi);
        }
        (lower, upper)
    }

    /// Weighted mean over the significant candidates; the median of the
    /// candidate means while the mixture is still non-informative.
    pub fn marginal_likelihood_mean(&self) -> f64 {
        if self.is_non_informative() {
            let means: Vec<f64> = self
                .participating()
                .map(|(_, (_, m))| m.marginal_likelihood_mean())
                .collect();
            return median(&means);
        }
        let log_total = self.log_weight_total();
        let mut mean = 0.0;
        for (_, (weight, model)) in self.participating() {
            let w = weight.normalized(log_total);
            if w < MINIMUM_SIGNIFICANT_WEIGHT {
                continue;
            }
            mean += w * model.marginal_likelihood_mean();
        }
        mean
    }

    pub fn nearest_marginal_likelihood_mean(&self, value: f64) -> f64 {
        let log_total = self.log_weight_total();
        let mut mean = 0.0;
        for (_, (weight, model)) in self.participating() {
            let w = weight.normalized(log_total);
            if w < MINIMUM_SIGNIFICANT_WEIGHT {
                continue;
            }
            mean += w * model.nearest_marginal_likelihood_mean(value);
        }
        mean
    }

    /// Average of the candidate modes, weighted by selection weight times
    /// each candidate's own likelihood at its mode, truncated into the
    /// support.
    pub fn marginal_likelihood_mode(&self) -> f64 {
        let log_total = self.log_weight_total();
        let mut weight_sum = 0.0;
        let mut mode = 0.0;
        for (_, (weight, model)) in self.participating() {
            let candidate_mode = model.marginal_likelihood_mode();
            let likelihood = model.joint_log_marginal_likelihood(&[candidate_mode], &[1.0]);
            if likelihood.is_failed() {
                continue;
            }
            let w = weight.normalized(log_total) * likelihood.value.exp();
            weight_sum += w;
            mode += w * candidate_mode;
        }
        let mode = if weight_sum > 0.0 { mode / weight_sum } else { 0.0 };
        let support = self.marginal_likelihood_support();
        truncate(mode, support.0, support.1)
    }

    /// Weighted average of the candidate variances over the significant
    /// candidates. An approximation: the spread of the candidate means is
    /// deliberately not included.
    pub fn marginal_likelihood_variance(&self) -> f64 {
        if self.is_non_informative() {
            return INF;
        }
        let log_total = self.log_weight_total();
        let mut variance = 0.0;
        for (_, (weight, model)) in self.participating() {
            let w = weight.normalized(log_total);
            if w < MINIMUM_SIGNIFICANT_WEIGHT {
                continue;
            }
            variance += w * model.marginal_likelihood_variance();
        }
        variance.min(INF)
    }

    /// Weighted average of the candidate confidence intervals over the
    /// non-negligible candidates. First order only: exact in the limit that
    /// one candidate dominates.
    pub fn marginal_likelihood_confidence_interval(&self, percentage: f64) -> (f64, f64) {
        let log_total = self.log_weight_total();
        let mut weight_sum = 0.0;
        let mut lower_sum = 0.0;
        let mut upper_sum = 0.0;
        for (weight, model) in self.models.iter() {
            let w = weight.normalized(log_total);
            if w < MAXIMUM_RELATIVE_ERROR {
                continue;
            }
            let (lo, hi) = model.marginal_likelihood_confidence_interval(percentage);
            weight_sum += w;
            lower_sum += w * lo;
            upper_sum += w * hi;
        }
        if weight_sum <= 0.0 {
            return (0.0, 0.0);
        }
        (lower_sum / weight_sum, upper_sum / weight_sum)
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

    /// Set the forgetting rate on the mixture and every candidate.
    pub fn set_decay_rate(&mut self, decay_rate: f64) {
        self.decay_rate = decay_rate;
        for (_, model) in self.models.iter_mut() {
            model.set_decay_rate(decay_rate);
        }
    }

    pub fn checksum(&self, seed: u64) -> u64 {
        let mut seed = hash_f64(seed, self.decay_rate);
        seed = hash_f64(seed, self.number_samples);
        seed = hash_f64(seed, self.minimum.unwrap_or(f64::NAN));
        seed = hash_f64(seed, self.maximum.unwrap_or(f64::NAN));
        for (weight, model) in &self.models {
            seed = weight.checksum(seed);
            seed = model.checksum(seed);
        }
        seed
    }

    /// Bytes held by this value, including any heap spill of the model
    /// storage.
    pub fn memory_usage(&self) -> usize {
        let mut size = std::mem::size_of::<Self>();
        if self.models.spilled() {
            size += self.models.capacity()
                * std::mem::size_of::<(ModelWeight, CandidatePrior)>();
        }
        size
    }

    /// Per-candidate breakdown of [`memory_usage`](Self::memory_usage) for
    /// diagnostic dumps.
    pub fn debug_memory_usage(&self) -> String {
        let mut out = format!("one-of-n: {} bytes", self.memory_usage());
        for (_, model) in &self.models {
            out.push_str(&format!(
                "\n  {:?}: {} bytes",
                model.family(),
                model.memory_usage()
            ));
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn poison_weight(&mut self, index: usize) {
        self.models[index].0.set_log_weight(f64::NAN);
    }
}

impl fmt::Display for OneOfNPrior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "one-of-n")?;
        if self.is_non_informative() {
            write!(f, " non-informative")?;
        }
        write!(f, ": # samples {:.1}", self.number_samples)?;
        let log_total = self.log_weight_total();
        for (weight, model) in &self.models {
            let w = weight.normalized(log_total);
            if w >= PRINT_SIGNIFICANT_WEIGHT {
                write!(f, "\n  weight {:.5}  {}", w, model)?;
            }
        }
        Ok(())
    }
}

/// Renormalizes the mixture weights when the mutation scope ends, however it
/// ends.
struct NormalizeOnExit<'a> {
    prior: &'a mut OneOfNPrior,
}

impl<'a> NormalizeOnExit<'a> {
    fn new(prior: &'a mut OneOfNPrior) -> Self {
        NormalizeOnExit { prior }
    }
}

impl Deref for NormalizeOnExit<'_> {
    type Target = OneOfNPrior;

    fn deref(&self) -> &OneOfNPrior {
        self.prior
    }
}

impl DerefMut for NormalizeOnExit<'_> {
    fn deref_mut(&mut self) -> &mut OneOfNPrior {
        self.prior
    }
}

impl Drop for NormalizeOnExit<'_> {
    fn drop(&mut self) {
        self.prior.normalize_weights();
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        0.5 * (sorted[mid - 1] + sorted[mid])
    }
}
