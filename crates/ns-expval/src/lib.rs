//! # ns-expval
//!
//! Expectation values `E[f(p)]` of user functions under correlated Gaussian
//! distributions, by adaptive Monte Carlo integration.
//!
//! The distribution is whitened into independent standard-normal coordinates
//! `x`, each of which is reached from a bounded angle `θ` through the tangent
//! map `x = scale·tan θ`. One grid over `θ`, trained once on the standard
//! normal, is copied to every dimension and then refined by the sampler.
//!
//! ```ignore
//! let dist = GaussianDistribution::scalar(1.0, 0.5)?;
//! let mut integ = PdfIntegrator::new(dist, ExpvalConfig::default())?;
//! integ.normalization(&CallOptions::default())?; // warm-up
//! let r = integ.expval(|p| Ok(Shaped::Scalar(p[0] * p[0])), &CallOptions::default())?;
//! println!("E[p^2] = {}", r);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// User-function probing and flattening.
pub mod adapter;
/// Construction and call settings.
pub mod config;
/// Shared grid training.
pub mod grid;
/// Controller.
pub mod integrator;
/// Batched integrand.
pub mod pipeline;
/// Normalization and reshaping of raw results.
pub mod result;

pub use adapter::{FlatBuffer, IntegrandAdapter};
pub use config::{CallOptions, ExpvalConfig};
pub use grid::GridTrainer;
pub use integrator::PdfIntegrator;
pub use pipeline::ExpectationPipeline;
pub use result::{ExpvalResult, marshal};
