//! Floating-point taxonomy and log-space primitives.
//!
//! All model-selection arithmetic runs in log space on top of these helpers.
//! Two conventions matter throughout the crate:
//!
//! 1. Saturation uses the largest-magnitude *finite* doubles ([`MINUS_INF`],
//!    [`INF`]) rather than IEEE infinities, so that downstream arithmetic on a
//!    saturated value stays finite instead of producing NaN via `inf - inf`.
//! 2. Every computed log-likelihood is classified with [`FpStatus`] before it
//!    is allowed to touch the model weights.

/// Saturating stand-in for negative infinity in log space.
///
/// The lowest finite double. `exp(MINUS_INF)` is exactly `0.0` and sums or
/// differences with other finite values remain finite.
pub const MINUS_INF: f64 = f64::MIN;

/// Saturating stand-in for positive infinity.
pub const INF: f64 = f64::MAX;

/// Classification of a floating-point computation result.
///
/// `Overflowed` covers both directions: a likelihood that underflowed to zero
/// is reported as `Overflowed` with value [`MINUS_INF`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpStatus {
    /// Finite and usable.
    Stable,
    /// Infinite (either sign); the value has been saturated.
    Overflowed,
    /// NaN; the value is meaningless and must not be used.
    Failed,
}

impl FpStatus {
    /// Classify a computed value.
    pub fn of(x: f64) -> FpStatus {
        if x.is_nan() {
            FpStatus::Failed
        } else if x.is_infinite() {
            FpStatus::Overflowed
        } else {
            FpStatus::Stable
        }
    }
}

/// `ln(n)` with the small arguments taken from a fixed table.
///
/// The mixture never holds more than a handful of models, so the common
/// arguments hit the table and summary truncation bounds are reproducible to
/// the last bit across platforms.
pub fn logn(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => std::f64::consts::LN_2,
        3 => 1.0986122886681098,
        4 => 1.3862943611198906,
        5 => 1.6094379124341003,
        _ => (n as f64).ln(),
    }
}

/// Log of a sum of exponentials with the max-subtraction trick.
///
/// Returns [`MINUS_INF`] for an empty slice. Entries at `MINUS_INF` contribute
/// exactly zero. The result is exact when one term dominates.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let mut max = MINUS_INF;
    for &v in values {
        if v > max {
            max = v;
        }
    }
    if values.is_empty() || !max.is_finite() {
        return max;
    }
    let mut sum = 0.0;
    for &v in values {
        sum += (v - max).exp();
    }
    max + sum.ln()
}

/// True if `exp(log)` underflows to a subnormal or zero.
pub fn log_will_underflow(log: f64) -> bool {
    log < f64::MIN_POSITIVE.ln()
}

/// Nudge `x` infinitesimally towards positive infinity.
///
/// Used to move a support lower bound strictly inside the open interval.
/// Zero and the saturated bounds are fixed points.
pub fn shift_right(x: f64) -> f64 {
    if x == 0.0 || x >= INF {
        return x;
    }
    if x > 0.0 {
        x * (1.0 + f64::EPSILON)
    } else {
        x * (1.0 - f64::EPSILON)
    }
}

/// Nudge `x` infinitesimally towards negative infinity.
pub fn shift_left(x: f64) -> f64 {
    if x == 0.0 || x <= MINUS_INF {
        return x;
    }
    if x > 0.0 {
        x * (1.0 - f64::EPSILON)
    } else {
        x * (1.0 + f64::EPSILON)
    }
}

/// Truncate `x` into `[a, b]`.
///
/// Unlike `f64::clamp` this never panics: if the interval is empty (`a > b`)
/// the result saturates at `b`.
pub fn truncate(x: f64, a: f64, b: f64) -> f64 {
    x.max(a).min(b)
}

/// Combine a value into a running hash seed.
///
/// Order-sensitive mixing in the style of `hash_combine`; stable across runs
/// and platforms, which is all the checksum contract requires.
pub fn hash_combine(seed: u64, value: u64) -> u64 {
    seed ^ (value
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2))
}

/// Combine a double into a running hash seed via its bit pattern.
pub fn hash_f64(seed: u64, value: f64) -> u64 {
    hash_combine(seed, value.to_bits())
}
