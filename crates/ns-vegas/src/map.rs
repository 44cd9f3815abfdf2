//! Adaptive map: per-dimension piecewise-linear map from `y ∈ [0,1]` to `x`.
//!
//! Each dimension owns a grid of `ninc + 1` increasing breakpoints. A uniform
//! `y` lands in increment `i = floor(y * ninc)` and is mapped linearly inside
//! it, so the Jacobian `dx/dy = ninc * (grid[i+1] - grid[i])` is piecewise
//! constant. Training data accumulated per increment drives [`AdaptiveMap::adapt`],
//! which moves breakpoints so that every increment carries the same (smoothed,
//! compressed) share of the training signal.

use ns_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Piecewise-linear adaptive map over a hyper-rectangle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveMap {
    grid: Vec<Vec<f64>>,
    sum_f: Vec<Vec<f64>>,
    n_f: Vec<Vec<f64>>,
}

impl AdaptiveMap {
    /// Uniform map over `bounds` with `ninc` increments per dimension.
    pub fn new(bounds: &[(f64, f64)], ninc: usize) -> Result<Self> {
        if ninc == 0 {
            return Err(Error::Validation("ninc must be > 0".into()));
        }
        let grids = bounds
            .iter()
            .map(|&(lo, hi)| {
                (0..=ninc).map(|i| lo + (hi - lo) * (i as f64) / (ninc as f64)).collect()
            })
            .collect();
        Self::from_grids(grids)
    }

    /// Map from explicit breakpoints, one grid per dimension.
    pub fn from_grids(grids: Vec<Vec<f64>>) -> Result<Self> {
        if grids.is_empty() {
            return Err(Error::Validation("adaptive map needs at least one dimension".into()));
        }
        for (d, g) in grids.iter().enumerate() {
            if g.len() < 2 {
                return Err(Error::Validation(format!(
                    "grid {d} needs at least 2 breakpoints, got {}",
                    g.len()
                )));
            }
            if g.iter().any(|v| !v.is_finite()) {
                return Err(Error::Validation(format!("grid {d} has non-finite breakpoints")));
            }
            if g.windows(2).any(|w| w[1] <= w[0]) {
                return Err(Error::Validation(format!(
                    "grid {d} breakpoints must be strictly increasing"
                )));
            }
        }
        let sum_f = grids.iter().map(|g| vec![0.0; g.len() - 1]).collect();
        let n_f = grids.iter().map(|g| vec![0.0; g.len() - 1]).collect();
        Ok(Self { grid: grids, sum_f, n_f })
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.grid.len()
    }

    /// Number of increments in dimension `d`.
    pub fn ninc(&self, d: usize) -> usize {
        self.grid[d].len() - 1
    }

    /// Breakpoints of dimension `d`.
    pub fn grid(&self, d: usize) -> &[f64] {
        &self.grid[d]
    }

    /// `(lower, upper)` limits of dimension `d`.
    pub fn region(&self, d: usize) -> (f64, f64) {
        let g = &self.grid[d];
        (g[0], g[g.len() - 1])
    }

    #[inline]
    fn increment(&self, d: usize, y: f64) -> (usize, f64) {
        let ninc = self.grid[d].len() - 1;
        let yn = y.clamp(0.0, 1.0) * ninc as f64;
        let iy = (yn.floor() as usize).min(ninc - 1);
        (iy, yn - iy as f64)
    }

    /// Map a single coordinate of dimension `d`; returns `(x, dx/dy)`.
    #[inline]
    pub fn map_1d(&self, d: usize, y: f64) -> (f64, f64) {
        let g = &self.grid[d];
        let (iy, dy) = self.increment(d, y);
        let inc = g[iy + 1] - g[iy];
        (g[iy] + inc * dy, inc * (g.len() - 1) as f64)
    }

    /// Map one point; returns the Jacobian (product over dimensions).
    pub fn map_point(&self, y: &[f64], x: &mut [f64]) -> f64 {
        let mut jac = 1.0;
        for (d, (yd, xd)) in y.iter().zip(x.iter_mut()).enumerate() {
            let (v, j) = self.map_1d(d, *yd);
            *xd = v;
            jac *= j;
        }
        jac
    }

    /// Map a batch of points (rows of `y`, `batch x dim`) into `x` and `jac`.
    pub fn map(&self, y: &[f64], x: &mut [f64], jac: &mut [f64]) {
        let dim = self.dim();
        for ((yr, xr), j) in y.chunks(dim).zip(x.chunks_mut(dim)).zip(jac.iter_mut()) {
            *j = self.map_point(yr, xr);
        }
    }

    /// Accumulate training weights `f` (one per row of `y`) into the increments
    /// the points fall in.
    pub fn add_training_data(&mut self, y: &[f64], f: &[f64]) {
        let dim = self.dim();
        for (yr, &fi) in y.chunks(dim).zip(f) {
            for (d, &yd) in yr.iter().enumerate() {
                let (iy, _) = self.increment(d, yd);
                self.sum_f[d][iy] += fi;
                self.n_f[d][iy] += 1.0;
            }
        }
    }

    /// `true` if any training data has been accumulated since the last adapt/clear.
    pub fn has_training_data(&self) -> bool {
        self.n_f.iter().any(|n| n.iter().any(|&c| c > 0.0))
    }

    /// Discard accumulated training data.
    pub fn clear(&mut self) {
        for (s, n) in self.sum_f.iter_mut().zip(self.n_f.iter_mut()) {
            s.fill(0.0);
            n.fill(0.0);
        }
    }

    /// Move breakpoints using the accumulated training data, then clear it.
    ///
    /// The per-increment averages are smoothed with their neighbours, normalized,
    /// and compressed as `((1 - r) / ln(1/r))^alpha`; the grid is then rebuilt so
    /// that every increment holds an equal share. `alpha < 0` skips smoothing and
    /// compression; `alpha = 0` leaves the grid effectively unchanged. Dimensions
    /// without training data keep their grid.
    pub fn adapt(&mut self, alpha: f64) {
        for d in 0..self.dim() {
            let ninc = self.ninc(d);
            if self.n_f[d].iter().all(|&c| c == 0.0) {
                continue;
            }
            let mut avg: Vec<f64> = self.sum_f[d]
                .iter()
                .zip(&self.n_f[d])
                .map(|(&s, &n)| if n > 0.0 { (s / n).abs() } else { 0.0 })
                .collect();

            if alpha >= 0.0 && ninc > 1 {
                let old = avg.clone();
                avg[0] = (7.0 * old[0] + old[1]) / 8.0;
                avg[ninc - 1] = (7.0 * old[ninc - 1] + old[ninc - 2]) / 8.0;
                for i in 1..ninc - 1 {
                    avg[i] = (old[i - 1] + 6.0 * old[i] + old[i + 1]) / 8.0;
                }
                let total: f64 = avg.iter().sum();
                if !(total.is_finite() && total > 0.0) {
                    continue;
                }
                for a in avg.iter_mut() {
                    let r = *a / total;
                    if r > 0.0 && r <= 0.999_999_99 {
                        *a = ((1.0 - r) / -r.ln()).powf(alpha);
                    }
                }
            }

            if let Some(new_grid) = regrid(&self.grid[d], &avg) {
                self.grid[d] = new_grid;
            }
        }
        self.clear();
    }
}

/// Breakpoints giving each increment an equal share of `weights`, where
/// `weights[i]` is spread uniformly over old increment `i`.
///
/// Returns `None` if the weights are degenerate or rounding would break
/// strict monotonicity.
fn regrid(grid: &[f64], weights: &[f64]) -> Option<Vec<f64>> {
    let ninc = weights.len();
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }
    let per_inc = total / ninc as f64;

    let mut new_grid = Vec::with_capacity(ninc + 1);
    new_grid.push(grid[0]);
    let mut j = 0;
    let mut acc = 0.0;
    for k in 1..ninc {
        let target = per_inc * k as f64;
        while j < ninc - 1 && acc + weights[j] < target {
            acc += weights[j];
            j += 1;
        }
        let frac = if weights[j] > 0.0 { ((target - acc) / weights[j]).clamp(0.0, 1.0) } else { 0.0 };
        let x = grid[j] + frac * (grid[j + 1] - grid[j]);
        if x <= new_grid[k - 1] {
            return None;
        }
        new_grid.push(x);
    }
    let last = grid[ninc];
    if last <= new_grid[ninc - 1] {
        return None;
    }
    new_grid.push(last);
    Some(new_grid)
}
