//! # ns-core
//!
//! Core types for NextStat expectation values.
//!
//! This crate provides:
//! - the workspace error type and `Result` alias,
//! - shape-polymorphic values (`Shaped`, `ShapeDescriptor`) used to move
//!   scalars, arrays and named collections through flat numeric buffers,
//! - `Uncertain`, a scalar estimate with first-order error propagation,
//! - `ParamView`, the reusable parameter object handed to user functions,
//! - the collaborator traits (`Distribution`, `BatchIntegrand`) that decouple
//!   the expectation-value core from concrete distributions and samplers.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Error types.
pub mod error;
/// Reusable parameter object reconstructed from flat parameter vectors.
pub mod params;
/// Collaborator traits.
pub mod traits;
/// Shape-polymorphic values and uncertain scalars.
pub mod types;

pub use error::{Error, Result};
pub use params::ParamView;
pub use traits::{BatchIntegrand, Distribution};
pub use types::{Output, ShapeDescriptor, Shaped, Uncertain};
