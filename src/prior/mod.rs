//! Candidate Bayesian priors and the one-of-n mixture over them.
//!
//! The mixture ([`one_of_n::OneOfNPrior`]) maintains a posterior weight per
//! candidate family alongside each family's own posterior parameters. The
//! candidate families live in their own modules ([`normal`], [`log_normal`],
//! [`gamma`], [`poisson`], [`improper`]) behind the [`candidate`] dispatch
//! enum, with [`weight`] holding the log-space weight arithmetic and
//! [`checkpoint`] the persistence layer.

pub mod candidate;
pub mod checkpoint;
pub mod gamma;
pub mod improper;
pub mod log_normal;
pub mod normal;
pub mod one_of_n;
pub mod poisson;
pub mod weight;

use tracing::error;

use crate::maths::numerics::{FpStatus, INF, MINUS_INF};

/// Smallest coefficient of variation a posterior is allowed to imply.
///
/// Constant or near-constant data would otherwise drive a scale posterior to
/// a point mass, and a later slightly different sample to a likelihood of
/// zero. The floor is relative to `max(|mean|, 1)`.
pub(crate) const MINIMUM_COEFFICIENT_OF_VARIATION: f64 = 1e-4;

/// Number of deterministic resamples used to re-learn a posterior when its
/// support offset has to move.
pub(crate) const ADJUST_OFFSET_SAMPLE_SIZE: usize = 50;

/// Which tail of the marginal distribution an unlikely sample fell in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    /// No tail determined (no samples, or an improper marginal).
    Undetermined,
    /// Below the distribution mode.
    Left,
    /// Above the distribution mode.
    Right,
    /// Samples fell on both sides of the mode.
    Mixed,
}

impl Tail {
    /// Combine the tail of one sample into a running batch tail.
    pub fn merge(self, other: Tail) -> Tail {
        use Tail::*;
        match (self, other) {
            (Undetermined, t) | (t, Undetermined) => t,
            (Left, Left) => Left,
            (Right, Right) => Right,
            _ => Mixed,
        }
    }
}

/// The style of probability-of-less-likely-samples calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbabilityCalculation {
    /// Probability of seeing a smaller value.
    OneSidedBelow,
    /// Probability of seeing a value at least as far from the mode.
    TwoSided,
    /// Probability of seeing a larger value.
    OneSidedAbove,
}

/// A log marginal likelihood tagged with its floating-point status.
///
/// `value` is meaningful for `Stable` (finite) and `Overflowed` (saturated at
/// a sentinel bound); for `Failed` it must not be used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogLikelihood {
    pub status: FpStatus,
    pub value: f64,
}

impl LogLikelihood {
    /// A finite, usable log-likelihood.
    pub fn stable(value: f64) -> Self {
        LogLikelihood {
            status: FpStatus::Stable,
            value,
        }
    }

    /// A likelihood that vanished (or blew up); saturated in log space.
    pub fn overflowed() -> Self {
        LogLikelihood {
            status: FpStatus::Overflowed,
            value: MINUS_INF,
        }
    }

    /// A failed computation whose value is meaningless.
    pub fn failed() -> Self {
        LogLikelihood {
            status: FpStatus::Failed,
            value: f64::NAN,
        }
    }

    /// Classify a computed value, saturating infinities at the sentinels.
    pub fn of(value: f64) -> Self {
        match FpStatus::of(value) {
            FpStatus::Stable => LogLikelihood::stable(value),
            FpStatus::Overflowed => LogLikelihood {
                status: FpStatus::Overflowed,
                value: if value > 0.0 { INF } else { MINUS_INF },
            },
            FpStatus::Failed => LogLikelihood::failed(),
        }
    }

    pub fn is_stable(&self) -> bool {
        self.status == FpStatus::Stable
    }

    pub fn is_failed(&self) -> bool {
        self.status == FpStatus::Failed
    }
}

/// Bounds on the negated log of a joint distribution function.
///
/// `lower <= upper`; equality whenever no truncation was applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CdfBounds {
    pub lower: f64,
    pub upper: f64,
}

/// Result of a probability-of-less-likely-samples calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleProbability {
    pub lower: f64,
    pub upper: f64,
    pub tail: Tail,
}

/// Check a weighted sample batch for contract violations.
///
/// Returns false after logging if the slices are empty or of different
/// lengths, if any sample is non-finite, or if any count is non-finite or
/// non-positive. Callers treat a false return as a no-op.
pub(crate) fn validate_batch(operation: &str, samples: &[f64], counts: &[f64]) -> bool {
    if samples.is_empty() {
        error!(operation, "No samples provided");
        return false;
    }
    if samples.len() != counts.len() {
        error!(
            operation,
            samples = samples.len(),
            counts = counts.len(),
            "Samples and counts have different lengths"
        );
        return false;
    }
    if samples.iter().any(|s| !s.is_finite()) {
        error!(operation, "Batch contains non-finite samples");
        return false;
    }
    if counts.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        error!(operation, "Batch contains invalid counts");
        return false;
    }
    true
}
