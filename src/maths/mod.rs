//! Numerical support for the prior library.
//!
//! Split by concern:
//! - [`numerics`]: floating-point status taxonomy, log-space helpers and the
//!   sentinel bounds used instead of IEEE infinities.
//! - [`special`]: special functions (log-gamma, incomplete beta/gamma,
//!   Student's t and normal distribution functions).
//! - [`sampling`]: weighted allocation of a sample budget across components.

pub mod numerics;
pub mod sampling;
pub mod special;
