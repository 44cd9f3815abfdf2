//! # ns-vegas
//!
//! Adaptive-grid Monte Carlo integration.
//!
//! - [`AdaptiveMap`]: trainable piecewise-linear map from the unit hypercube,
//! - [`Integrator`]: stratified sampling with batched integrand evaluation,
//! - [`WeightedAverage`]: inverse-covariance weighted iteration averages with
//!   `chi2`, `dof` and `Q`.
//!
//! Integrands implement [`ns_core::BatchIntegrand`].

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Weighted iteration averages.
pub mod average;
/// Stratified adaptive integrator.
pub mod integrator;
/// Adaptive map.
pub mod map;

pub use average::{IterationEstimate, WeightedAverage, q_value};
pub use integrator::{Integrator, Strata, VegasConfig};
pub use map::AdaptiveMap;
