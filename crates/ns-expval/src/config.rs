//! Construction and per-call settings.

use ns_core::{Error, Result};
use ns_vegas::VegasConfig;
use serde::{Deserialize, Serialize};

/// Settings fixed when a [`crate::PdfIntegrator`] is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpvalConfig {
    /// Tail cutoff: decorrelated coordinates satisfy `|x| <= limit` (default 1e15).
    pub limit: f64,
    /// Width of the region the tangent map emphasizes (default 1).
    pub scale: f64,
    /// Increments in the shared grid (default 100).
    pub ninc: usize,
    /// Synthetic points used to train the shared grid (default 2000).
    pub train_points: usize,
    /// Training rounds (default 10).
    pub train_rounds: usize,
    /// Adaptation speed during training (default 1.5).
    pub train_alpha: f64,
    /// Seed for the synthetic training points.
    pub seed: u64,
}

impl Default for ExpvalConfig {
    fn default() -> Self {
        Self {
            limit: 1e15,
            scale: 1.0,
            ninc: 100,
            train_points: 2000,
            train_rounds: 10,
            train_alpha: 1.5,
            seed: 0,
        }
    }
}

impl ExpvalConfig {
    /// Check settings for consistency.
    pub fn validate(&self) -> Result<()> {
        if !(self.limit.is_finite() && self.limit > 0.0) {
            return Err(Error::Validation(format!("limit must be positive, got {}", self.limit)));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::Validation(format!("scale must be positive, got {}", self.scale)));
        }
        if self.ninc == 0 {
            return Err(Error::Validation("ninc must be > 0".into()));
        }
        if self.train_points == 0 {
            return Err(Error::Validation("train_points must be > 0".into()));
        }
        if !self.train_alpha.is_finite() {
            return Err(Error::Validation(format!(
                "train_alpha must be finite, got {}",
                self.train_alpha
            )));
        }
        Ok(())
    }
}

/// Per-call settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    /// Drop the probability density from the integrand, giving `∫ f(p) dp`.
    pub nopdf: bool,
    /// Evaluate each batch on the rayon pool.
    pub parallel: bool,
    /// Sampler settings; `None` uses [`VegasConfig::default`].
    pub vegas: Option<VegasConfig>,
}

impl CallOptions {
    /// Options with the given sampler settings.
    pub fn with_vegas(vegas: VegasConfig) -> Self {
        Self { vegas: Some(vegas), ..Default::default() }
    }

    /// Sampler settings in effect for this call.
    pub fn vegas_config(&self) -> VegasConfig {
        self.vegas.clone().unwrap_or_default()
    }
}
