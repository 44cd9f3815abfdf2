//! Shared one-dimensional grid over the tangent-mapped coordinate.
//!
//! After whitening every axis of the target is a standard normal, so one grid
//! trained on `φ(x)` in the angle coordinate `θ ∈ [-L, L]` serves all of them.
//! Training cost does not grow with the number of dimensions.

use ns_core::Result;
use ns_prob::TangentBijector;
use ns_vegas::AdaptiveMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ExpvalConfig;

/// Trains the shared grid.
#[derive(Debug, Clone)]
pub struct GridTrainer {
    bijector: TangentBijector,
    half_width: f64,
    ninc: usize,
    points: usize,
    rounds: usize,
    alpha: f64,
    seed: u64,
}

impl GridTrainer {
    /// Trainer for the domain and training settings in `config`.
    pub fn new(config: &ExpvalConfig) -> Result<Self> {
        config.validate()?;
        let bijector = TangentBijector::new(config.scale);
        Ok(Self {
            bijector,
            half_width: bijector.domain_limit(config.limit),
            ninc: config.ninc,
            points: config.train_points,
            rounds: config.train_rounds,
            alpha: config.train_alpha,
            seed: config.seed,
        })
    }

    /// `L = atan(limit/scale)`; the grid spans `[-L, L]`.
    pub fn half_width(&self) -> f64 {
        self.half_width
    }

    /// Run the training rounds and return the `ninc + 1` breakpoints.
    pub fn train(&self) -> Result<Vec<f64>> {
        let l = self.half_width;
        let mut map = AdaptiveMap::new(&[(-l, l)], self.ninc)?;

        let n = self.points;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let y: Vec<f64> = (0..n).map(|i| (i as f64 + rng.random::<f64>()) / n as f64).collect();
        let mut theta = vec![0.0; n];
        let mut jac = vec![0.0; n];
        let mut f = vec![0.0; n];

        for _ in 0..self.rounds {
            map.map(&y, &mut theta, &mut jac);
            for ((fi, &th), &j) in f.iter_mut().zip(&theta).zip(&jac) {
                let t = th.tan();
                let x = self.bijector.scale() * t;
                let fx = (t * t + 1.0) * (-0.5 * x * x).exp();
                *fi = (j * fx).powi(2);
            }
            map.add_training_data(&y, &f);
            map.adapt(self.alpha);
        }

        let grid = map.grid(0).to_vec();
        log::debug!(
            "trained shared grid: ninc={} L={:.6} rounds={} points={}",
            self.ninc,
            l,
            self.rounds,
            n
        );
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grid_shape() {
        let trainer = GridTrainer::new(&ExpvalConfig::default()).unwrap();
        let g = trainer.train().unwrap();
        assert_eq!(g.len(), 101);
        assert!(g.windows(2).all(|w| w[1] > w[0]));
        let l = trainer.half_width();
        assert_eq!(g[0], -l);
        assert_eq!(g[100], l);
        assert!(l < std::f64::consts::FRAC_PI_2);
    }

    #[test]
    fn test_default_grid_is_nearly_antisymmetric() {
        let g = GridTrainer::new(&ExpvalConfig::default()).unwrap().train().unwrap();
        let n = g.len() - 1;
        assert!(g[n / 2].abs() < 0.01, "midpoint {}", g[n / 2]);
        // The outermost increments reach into the far tails and are noisy.
        for i in 3..=n - 3 {
            assert!((g[i] + g[n - i]).abs() < 0.05, "i={i}: {} vs {}", g[i], g[n - i]);
        }
    }

    #[test]
    fn test_grid_concentrates_near_center() {
        let g = GridTrainer::new(&ExpvalConfig::default()).unwrap().train().unwrap();
        let center = g[51] - g[50];
        let edge = g[100] - g[99];
        assert!(center < edge, "center={center} edge={edge}");
        // Untrained spacing would be 2L/100 ≈ 0.031.
        assert!(center < 0.03);
    }

    #[test]
    fn test_small_limit_narrows_domain() {
        let cfg = ExpvalConfig { limit: 2.0, ninc: 20, ..Default::default() };
        let trainer = GridTrainer::new(&cfg).unwrap();
        assert!((trainer.half_width() - 2.0f64.atan()).abs() < 1e-15);
        let g = trainer.train().unwrap();
        assert_eq!(g.len(), 21);
        assert!(g.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_no_rounds_gives_uniform_grid() {
        let cfg = ExpvalConfig { train_rounds: 0, ninc: 4, limit: 1.0, ..Default::default() };
        let g = GridTrainer::new(&cfg).unwrap().train().unwrap();
        let l = 1.0f64.atan();
        for (i, v) in g.iter().enumerate() {
            assert!((v - (-l + 0.5 * l * i as f64)).abs() < 1e-12);
        }
    }
}
