//! Serialized snapshots of the one-of-n prior.
//!
//! A checkpoint is a plain data mirror of the mixture state: the version, the
//! raw log weights, the candidate posteriors, and the mixture bookkeeping.
//! Restoring validates everything before any state is built, then normalizes
//! the weights exactly once; the normalization is skipped when the weights
//! are already within tolerance, so serializing a freshly restored prior
//! reproduces the checkpoint byte for byte.

use serde::{Deserialize, Serialize};

use crate::errors::PriorError;
use crate::prior::candidate::CandidatePrior;
use crate::prior::one_of_n::{OneOfNPrior, WeightedModels};
use crate::prior::weight::ModelWeight;

/// Version written into every checkpoint; bumped on incompatible layout
/// changes.
pub const CHECKPOINT_VERSION: u32 = 1;

/// One candidate model and its raw log selection weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCheckpoint {
    pub log_weight: f64,
    pub prior: CandidatePrior,
}

/// A complete snapshot of a [`OneOfNPrior`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneOfNCheckpoint {
    pub version: u32,
    pub models: Vec<ModelCheckpoint>,
    pub decay_rate: f64,
    pub number_samples: f64,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
}

impl OneOfNPrior {
    /// Snapshot the full mixture state.
    pub fn to_checkpoint(&self) -> OneOfNCheckpoint {
        let (minimum, maximum) = self.observed_range();
        OneOfNCheckpoint {
            version: CHECKPOINT_VERSION,
            models: self
                .weighted_models()
                .iter()
                .map(|(weight, prior)| ModelCheckpoint {
                    log_weight: weight.log_weight(),
                    prior: *prior,
                })
                .collect(),
            decay_rate: self.decay_rate(),
            number_samples: self.number_samples(),
            minimum,
            maximum,
        }
    }

    /// Rebuild a mixture from a snapshot, validating every field first.
    pub fn from_checkpoint(checkpoint: OneOfNCheckpoint) -> Result<OneOfNPrior, PriorError> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(PriorError::UnsupportedVersion {
                found: checkpoint.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        if checkpoint.models.is_empty() {
            return Err(PriorError::NoModels);
        }
        if !checkpoint.decay_rate.is_finite() || checkpoint.decay_rate < 0.0 {
            return Err(PriorError::bad_checkpoint(format!(
                "decay rate {}",
                checkpoint.decay_rate
            )));
        }
        if !checkpoint.number_samples.is_finite() || checkpoint.number_samples < 0.0 {
            return Err(PriorError::bad_checkpoint(format!(
                "sample count {}",
                checkpoint.number_samples
            )));
        }
        for bound in [checkpoint.minimum, checkpoint.maximum].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(PriorError::bad_checkpoint(format!(
                    "observed range bound {}",
                    bound
                )));
            }
        }
        if let (Some(minimum), Some(maximum)) = (checkpoint.minimum, checkpoint.maximum) {
            if minimum > maximum {
                return Err(PriorError::bad_checkpoint(format!(
                    "observed range [{}, {}]",
                    minimum, maximum
                )));
            }
        }

        let mut models = WeightedModels::new();
        for model in checkpoint.models {
            if !model.log_weight.is_finite() {
                return Err(PriorError::invalid_weight(format!(
                    "log weight {} for {:?} candidate",
                    model.log_weight,
                    model.prior.family()
                )));
            }
            if !model.prior.is_valid() {
                return Err(PriorError::bad_checkpoint(format!(
                    "invalid {:?} candidate state",
                    model.prior.family()
                )));
            }
            models.push((ModelWeight::from_log(model.log_weight), model.prior));
        }

        Ok(OneOfNPrior::from_restored(
            models,
            checkpoint.decay_rate,
            checkpoint.number_samples,
            checkpoint.minimum,
            checkpoint.maximum,
        ))
    }

    /// Serialize to a JSON checkpoint string.
    pub fn to_json(&self) -> Result<String, PriorError> {
        serde_json::to_string(&self.to_checkpoint())
            .map_err(|e| PriorError::bad_checkpoint(e.to_string()))
    }

    /// Restore from a JSON checkpoint string.
    pub fn from_json(json: &str) -> Result<OneOfNPrior, PriorError> {
        let checkpoint: OneOfNCheckpoint =
            serde_json::from_str(json).map_err(|e| PriorError::bad_checkpoint(e.to_string()))?;
        OneOfNPrior::from_checkpoint(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::candidate::PriorFamily;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Gamma, LogNormal, Normal, Poisson};

    fn standard_mixture() -> OneOfNPrior {
        OneOfNPrior::new(
            vec![
                CandidatePrior::non_informative(PriorFamily::Normal, 0.0),
                CandidatePrior::non_informative(PriorFamily::LogNormal, 0.0),
                CandidatePrior::non_informative(PriorFamily::Gamma, 0.0),
                CandidatePrior::non_informative(PriorFamily::Poisson, 0.0),
            ],
            0.0,
        )
        .unwrap()
    }

    fn assert_round_trip_is_identity(prior: &OneOfNPrior) {
        let json = prior.to_json().unwrap();
        let restored = OneOfNPrior::from_json(&json).unwrap();
        assert_eq!(&restored, prior);
        assert_eq!(restored.checksum(17), prior.checksum(17));
        // Serializing the restored prior reproduces the checkpoint exactly.
        assert_eq!(restored.to_json().unwrap(), json);
        let twice = OneOfNPrior::from_json(&restored.to_json().unwrap()).unwrap();
        assert_eq!(twice.to_json().unwrap(), json);
    }

    #[test]
    fn fresh_mixture_round_trips_byte_identically() {
        assert_round_trip_is_identity(&standard_mixture());
    }

    #[test]
    fn updated_and_aged_mixture_round_trips_byte_identically() {
        let mut prior = standard_mixture();
        prior.set_decay_rate(0.01);
        prior.add_samples(&[2.0, 3.0, 5.0, 4.0], &[1.0, 2.0, 1.0, 1.0]);
        prior.add_samples(&[1.5, 2.5, 6.5], &[1.0; 3]);
        prior.propagate_forwards_by_time(2.5);
        prior.add_samples(&[3.0, 4.0], &[1.0; 2]);
        assert_round_trip_is_identity(&prior);
    }

    #[test]
    fn random_mixed_family_updates_round_trip_byte_identically() {
        // A long random history, drawn from every candidate's home
        // distribution in turn, must survive the round trip exactly.
        let mut rng = StdRng::seed_from_u64(4242);
        let continuous = Normal::new(8.0, 2.0).unwrap();
        let positive = LogNormal::new(1.5, 0.4).unwrap();
        let skewed = Gamma::new(4.0, 2.0).unwrap();
        let counts = Poisson::new(7.0).unwrap();

        let mut prior = standard_mixture();
        prior.set_decay_rate(0.002);
        for i in 0..1000 {
            let x: f64 = match i % 4 {
                0 => continuous.sample(&mut rng),
                1 => positive.sample(&mut rng),
                2 => skewed.sample(&mut rng),
                _ => counts.sample(&mut rng),
            };
            prior.add_samples(&[x], &[1.0]);
            if i % 200 == 199 {
                prior.propagate_forwards_by_time(1.0);
            }
        }
        assert_round_trip_is_identity(&prior);
    }

    #[test]
    fn trimmed_and_reset_mixtures_round_trip_byte_identically() {
        let mut trimmed = standard_mixture();
        trimmed.add_samples(&[2.0, 3.0, 4.0], &[1.0; 3]);
        trimmed.remove_models(|family| family == PriorFamily::Poisson);
        assert_round_trip_is_identity(&trimmed);

        let mut reset = standard_mixture();
        reset.add_samples(&[2.0, 3.0], &[1.0; 2]);
        reset.set_to_non_informative(0.5, 0.1);
        assert_round_trip_is_identity(&reset);
    }

    #[test]
    fn restore_reproduces_every_field() {
        let mut prior = standard_mixture();
        prior.add_samples(&[-1.0, 4.0, 9.0], &[1.0; 3]);
        prior.add_samples(&[2.0, 3.0], &[1.0; 2]);

        let restored = OneOfNPrior::from_json(&prior.to_json().unwrap()).unwrap();
        assert_eq!(restored.log_weights(), prior.log_weights());
        assert_eq!(restored.number_samples(), prior.number_samples());
        assert_eq!(restored.decay_rate(), prior.decay_rate());
        assert_eq!(restored.observed_range(), (Some(-1.0), Some(9.0)));
        for (a, b) in restored.models().zip(prior.models()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn unnormalized_checkpoints_are_normalized_once() {
        let mut checkpoint = standard_mixture().to_checkpoint();
        for model in checkpoint.models.iter_mut() {
            model.log_weight += 3.0;
        }
        let restored = OneOfNPrior::from_checkpoint(checkpoint).unwrap();
        let total: f64 = restored.weights().iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        // Stable from the first re-serialization onwards.
        let json = restored.to_json().unwrap();
        let again = OneOfNPrior::from_json(&json).unwrap();
        assert_eq!(again.to_json().unwrap(), json);
    }

    #[test]
    fn unsupported_versions_are_rejected() {
        let mut checkpoint = standard_mixture().to_checkpoint();
        checkpoint.version = CHECKPOINT_VERSION + 1;
        assert_eq!(
            OneOfNPrior::from_checkpoint(checkpoint),
            Err(PriorError::UnsupportedVersion {
                found: CHECKPOINT_VERSION + 1,
                expected: CHECKPOINT_VERSION
            })
        );
    }

    #[test]
    fn degenerate_checkpoints_are_rejected() {
        let mut empty = standard_mixture().to_checkpoint();
        empty.models.clear();
        assert_eq!(
            OneOfNPrior::from_checkpoint(empty),
            Err(PriorError::NoModels)
        );

        let mut bad_weight = standard_mixture().to_checkpoint();
        bad_weight.models[0].log_weight = f64::NAN;
        assert!(matches!(
            OneOfNPrior::from_checkpoint(bad_weight),
            Err(PriorError::InvalidWeight(_))
        ));

        let mut bad_decay = standard_mixture().to_checkpoint();
        bad_decay.decay_rate = -0.5;
        assert!(matches!(
            OneOfNPrior::from_checkpoint(bad_decay),
            Err(PriorError::BadCheckpoint(_))
        ));

        let mut bad_count = standard_mixture().to_checkpoint();
        bad_count.number_samples = f64::NAN;
        assert!(matches!(
            OneOfNPrior::from_checkpoint(bad_count),
            Err(PriorError::BadCheckpoint(_))
        ));

        let mut bad_range = standard_mixture().to_checkpoint();
        bad_range.minimum = Some(5.0);
        bad_range.maximum = Some(1.0);
        assert!(matches!(
            OneOfNPrior::from_checkpoint(bad_range),
            Err(PriorError::BadCheckpoint(_))
        ));
    }

    #[test]
    fn corrupt_candidate_state_is_rejected() {
        let mut prior = standard_mixture();
        prior.add_samples(&[2.0, 3.0], &[1.0; 2]);
        let mut value: serde_json::Value =
            serde_json::from_str(&prior.to_json().unwrap()).unwrap();
        value["models"][0]["prior"]["gaussian_precision"] = serde_json::json!(-4.0);
        let json = serde_json::to_string(&value).unwrap();
        assert!(matches!(
            OneOfNPrior::from_json(&json),
            Err(PriorError::BadCheckpoint(_))
        ));
    }

    #[test]
    fn malformed_json_is_rejected() {
        for bad in ["", "not json", "{\"version\":1}", "[1,2,3]"] {
            assert!(matches!(
                OneOfNPrior::from_json(bad),
                Err(PriorError::BadCheckpoint(_))
            ));
        }
    }
}
