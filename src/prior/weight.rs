//! Log-space model weight arithmetic.

use crate::maths::numerics::{hash_f64, log_will_underflow};

/// The selection weight of one candidate model, stored as a log.
///
/// Updates multiply the linear weight, so they add in log space; exponential
/// forgetting multiplies the *log* directly, relaxing the weight towards one
/// at the decay rate. Stored values are only comparable within a mixture; the
/// mixture normalizes them after every batch of mutations and callers read
/// linear weights through [`ModelWeight::normalized`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelWeight {
    log_weight: f64,
}

impl ModelWeight {
    /// Weight from a positive linear value.
    pub fn new(weight: f64) -> Self {
        ModelWeight {
            log_weight: weight.ln(),
        }
    }

    /// Weight directly from a log value.
    pub fn from_log(log_weight: f64) -> Self {
        ModelWeight { log_weight }
    }

    pub fn log_weight(&self) -> f64 {
        self.log_weight
    }

    pub fn set_log_weight(&mut self, log_weight: f64) {
        self.log_weight = log_weight;
    }

    /// Multiply by a likelihood factor given in log space.
    pub fn add_log_factor(&mut self, log_factor: f64) {
        self.log_weight += log_factor;
    }

    /// Apply exponential forgetting with factor `alpha` in [0, 1].
    ///
    /// `alpha = 1` leaves the weight unchanged; `alpha = 0` resets it to a
    /// linear weight of one.
    pub fn age(&mut self, alpha: f64) {
        self.log_weight *= alpha;
    }

    /// The linear weight relative to a normalization constant, computed at
    /// read time. Underflow clamps to exactly zero.
    pub fn normalized(&self, log_total: f64) -> f64 {
        let log_normalized = self.log_weight - log_total;
        if log_will_underflow(log_normalized) {
            0.0
        } else {
            log_normalized.exp()
        }
    }

    pub fn checksum(&self, seed: u64) -> u64 {
        hash_f64(seed, self.log_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maths::numerics::MINUS_INF;

    #[test]
    fn construction_round_trips_through_log_space() {
        let w = ModelWeight::new(0.25);
        assert!((w.log_weight() - 0.25_f64.ln()).abs() < 1e-15);
        assert!((w.normalized(0.0) - 0.25).abs() < 1e-15);
        let v = ModelWeight::from_log(-1.5);
        assert_eq!(v.log_weight(), -1.5);
    }

    #[test]
    fn log_factors_multiply_linear_weights() {
        let mut w = ModelWeight::new(0.5);
        w.add_log_factor(-2.0);
        let expected = 0.5 * (-2.0_f64).exp();
        assert!((w.normalized(0.0) - expected).abs() < 1e-15);
    }

    #[test]
    fn aging_relaxes_towards_unit_weight() {
        let mut w = ModelWeight::from_log(-8.0);
        w.age(0.5);
        assert_eq!(w.log_weight(), -4.0);
        w.age(0.0);
        assert_eq!(w.log_weight(), 0.0);
        assert_eq!(w.normalized(0.0), 1.0);
    }

    #[test]
    fn aging_preserves_weight_ordering() {
        let mut heavy = ModelWeight::from_log(-1.0);
        let mut light = ModelWeight::from_log(-20.0);
        heavy.age(0.7);
        light.age(0.7);
        assert!(heavy.log_weight() > light.log_weight());
        // Forgetting narrows the gap.
        assert!(light.log_weight() - (-20.0) > 0.0);
    }

    #[test]
    fn normalization_underflow_clamps_to_zero() {
        let w = ModelWeight::from_log(MINUS_INF / 2.0);
        assert_eq!(w.normalized(0.0), 0.0);
        let near = ModelWeight::from_log(-800.0);
        assert_eq!(near.normalized(0.0), 0.0);
        let fine = ModelWeight::from_log(-700.0);
        assert!(fine.normalized(0.0) > 0.0);
    }
}
