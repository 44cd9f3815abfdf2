//! Probability building blocks for NextStat expectation values.
//!
//! This crate hosts the probability math consumed by the expectation-value core:
//! - normal densities (standard and scaled),
//! - transforms/bijectors, including the tail-compressing tangent map,
//! - the correlated Gaussian distribution with its whitening transform.

pub mod gaussian;
pub mod normal;
pub mod transforms;

pub use gaussian::GaussianDistribution;
pub use transforms::{Bijector, TangentBijector};
