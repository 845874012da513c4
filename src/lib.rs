#![deny(unreachable_pub)]

//! Adaptive model selection for online anomaly detection.
//!
//! The centerpiece is [`OneOfNPrior`]: a Bayesian model average over a fixed
//! set of candidate distribution families (normal, log-normal, gamma,
//! Poisson, plus an improper placeholder), updated one weighted batch at a
//! time. Each candidate maintains a conjugate posterior over its own
//! parameters; the mixture maintains a log-space selection weight per
//! candidate, aged by exponential forgetting so the choice of family can
//! track drifting data.
//!
//! Queries (marginal likelihood, distribution functions, the probability of
//! seeing a less likely sample, summary statistics) aggregate over the
//! candidates by weight. All state serializes to a versioned JSON checkpoint
//! and restores exactly.
//!
//! ```
//! use mixture_prior::{CandidatePrior, OneOfNPrior, PriorFamily};
//!
//! let mut prior = OneOfNPrior::new(
//!     vec![
//!         CandidatePrior::non_informative(PriorFamily::Normal, 0.0),
//!         CandidatePrior::non_informative(PriorFamily::LogNormal, 0.0),
//!         CandidatePrior::non_informative(PriorFamily::Gamma, 0.0),
//!         CandidatePrior::non_informative(PriorFamily::Poisson, 0.0),
//!     ],
//!     0.0,
//! )
//! .unwrap();
//!
//! for batch in [[4.0, 5.0, 6.0], [5.0, 7.0, 5.0]] {
//!     prior.add_samples(&batch, &[1.0; 3]);
//! }
//! let weights = prior.weights();
//! assert_eq!(weights.len(), 4);
//! assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
//! ```

mod errors;
pub mod maths;
pub mod prior;

pub use errors::PriorError;
pub use maths::numerics::FpStatus;
pub use prior::candidate::{CandidatePrior, PriorFamily};
pub use prior::checkpoint::{ModelCheckpoint, OneOfNCheckpoint, CHECKPOINT_VERSION};
pub use prior::gamma::GammaRate;
pub use prior::improper::ImproperPrior;
pub use prior::log_normal::LogNormalMeanPrecision;
pub use prior::normal::NormalMeanPrecision;
pub use prior::one_of_n::OneOfNPrior;
pub use prior::poisson::PoissonRate;
pub use prior::weight::ModelWeight;
pub use prior::{CdfBounds, LogLikelihood, ProbabilityCalculation, SampleProbability, Tail};
