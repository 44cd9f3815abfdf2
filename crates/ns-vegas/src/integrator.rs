//! Stratified adaptive Monte Carlo integration over an [`AdaptiveMap`].
//!
//! The unit hypercube in `y` is split into `nstrat^dim` hypercubes with the
//! same number of samples each. Every iteration samples all hypercubes, maps
//! the points through the adaptive map, evaluates the integrand in batches and
//! accumulates per-hypercube means and covariances. The map is trained on the
//! squared weighted first output component and adapted between iterations.

use ns_core::{BatchIntegrand, Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::average::{IterationEstimate, WeightedAverage};
use crate::map::AdaptiveMap;

/// Sampler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VegasConfig {
    /// Number of iterations.
    pub nitn: usize,
    /// Approximate number of integrand evaluations per iteration.
    pub neval: usize,
    /// Adapt the map between iterations.
    pub adapt: bool,
    /// Adaptation speed passed to [`AdaptiveMap::adapt`].
    pub alpha: f64,
    /// Upper bound on the number of stratification hypercubes.
    pub max_nhcube: usize,
    /// Target number of points per integrand batch.
    pub batch_size: usize,
    /// RNG seed; `None` draws one from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for VegasConfig {
    fn default() -> Self {
        Self {
            nitn: 10,
            neval: 1000,
            adapt: true,
            alpha: 0.5,
            max_nhcube: 1_000_000,
            batch_size: 1000,
            seed: None,
        }
    }
}

impl VegasConfig {
    /// Check settings for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.nitn == 0 {
            return Err(Error::Validation("nitn must be > 0".into()));
        }
        if self.neval < 2 {
            return Err(Error::Validation(format!("neval must be >= 2, got {}", self.neval)));
        }
        if self.max_nhcube == 0 {
            return Err(Error::Validation("max_nhcube must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Validation("batch_size must be > 0".into()));
        }
        if !self.alpha.is_finite() {
            return Err(Error::Validation(format!("alpha must be finite, got {}", self.alpha)));
        }
        Ok(())
    }
}

/// Hypercube layout for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strata {
    /// Stratifications per dimension.
    pub nstrat: usize,
    /// Total number of hypercubes, `nstrat^dim`.
    pub nhcube: usize,
    /// Samples per hypercube (at least 2).
    pub neval_hcube: usize,
}

impl Strata {
    /// `nstrat = floor((neval/2)^(1/dim))`, capped so that `nstrat^dim <= max_nhcube`.
    pub fn new(dim: usize, neval: usize, max_nhcube: usize) -> Self {
        let target = (neval / 2).clamp(1, max_nhcube.max(1));
        let mut nstrat = (target as f64).powf(1.0 / dim.max(1) as f64).floor().max(1.0) as usize;
        let fits = |n: usize| n.checked_pow(dim as u32).is_some_and(|h| h <= target);
        while nstrat > 1 && !fits(nstrat) {
            nstrat -= 1;
        }
        let nhcube = nstrat.pow(dim as u32);
        Self { nstrat, nhcube, neval_hcube: (neval / nhcube).max(2) }
    }

    /// Evaluations per iteration.
    pub fn neval(&self) -> usize {
        self.nhcube * self.neval_hcube
    }
}

/// Adaptive stratified Monte Carlo integrator.
#[derive(Debug, Clone)]
pub struct Integrator {
    map: AdaptiveMap,
}

impl Integrator {
    /// Integrator over the region covered by `map`.
    pub fn new(map: AdaptiveMap) -> Self {
        Self { map }
    }

    /// Current map.
    pub fn map(&self) -> &AdaptiveMap {
        &self.map
    }

    /// Consume the integrator, returning its (possibly adapted) map.
    pub fn into_map(self) -> AdaptiveMap {
        self.map
    }

    /// Integration dimension.
    pub fn dim(&self) -> usize {
        self.map.dim()
    }

    /// Run `cfg.nitn` iterations of `f` and return their weighted average.
    pub fn integrate(&mut self, f: &dyn BatchIntegrand, cfg: &VegasConfig) -> Result<WeightedAverage> {
        cfg.validate()?;
        let nout = f.output_len();
        if nout == 0 {
            return Err(Error::Validation("integrand produces no output".into()));
        }
        let strata = Strata::new(self.dim(), cfg.neval, cfg.max_nhcube);
        let seed = cfg.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);
        log::debug!(
            "vegas: dim={} nout={} nstrat={} nhcube={} neval/itn={}",
            self.dim(),
            nout,
            strata.nstrat,
            strata.nhcube,
            strata.neval()
        );

        let mut avg = WeightedAverage::new(nout);
        for itn in 0..cfg.nitn {
            // A failed iteration must not leave partial training data behind.
            let est = self.iteration(f, cfg, strata, &mut rng).inspect_err(|_| self.map.clear())?;
            avg.add(est)?;
            log::debug!("vegas itn {}: {} (Q={:.2})", itn + 1, avg.value(0), avg.q());
        }
        Ok(avg)
    }

    fn iteration(
        &mut self,
        f: &dyn BatchIntegrand,
        cfg: &VegasConfig,
        strata: Strata,
        rng: &mut StdRng,
    ) -> Result<IterationEstimate> {
        let dim = self.dim();
        let nout = f.output_len();
        let Strata { nstrat, nhcube, neval_hcube: nh } = strata;
        let hcubes_per_batch = (cfg.batch_size / nh).max(1);
        let vol = 1.0 / nhcube as f64;
        let n = nh as f64;

        let mut integral = vec![0.0; nout];
        let mut cov = vec![0.0; nout * nout];
        let mut s1 = vec![0.0; nout];
        let mut s2 = vec![0.0; nout * nout];
        let mut wf = vec![0.0; nout];
        let mut coords = vec![0usize; dim];
        let mut y = Vec::new();
        let mut x = Vec::new();
        let mut jac = Vec::new();
        let mut out = Vec::new();
        let mut train = Vec::new();

        let mut h0 = 0;
        while h0 < nhcube {
            let h1 = (h0 + hcubes_per_batch).min(nhcube);
            let npts = (h1 - h0) * nh;
            y.resize(npts * dim, 0.0);
            x.resize(npts * dim, 0.0);
            jac.resize(npts, 0.0);
            out.resize(npts * nout, 0.0);
            train.resize(npts, 0.0);

            for h in h0..h1 {
                let mut rem = h;
                for c in coords.iter_mut() {
                    *c = rem % nstrat;
                    rem /= nstrat;
                }
                let base = (h - h0) * nh;
                for row in base..base + nh {
                    for (d, &c) in coords.iter().enumerate() {
                        y[row * dim + d] = (c as f64 + rng.random::<f64>()) / nstrat as f64;
                    }
                }
            }
            self.map.map(&y, &mut x, &mut jac);
            f.eval_batch(&x, dim, &mut out)?;
            if out.iter().any(|v| !v.is_finite()) {
                return Err(Error::Computation("integrand returned a non-finite value".into()));
            }

            for hb in 0..h1 - h0 {
                s1.fill(0.0);
                s2.fill(0.0);
                for row in hb * nh..(hb + 1) * nh {
                    let w = jac[row] * vol;
                    for (k, o) in wf.iter_mut().enumerate() {
                        *o = w * out[row * nout + k];
                    }
                    train[row] = wf[0] * wf[0];
                    for k in 0..nout {
                        s1[k] += wf[k];
                        for l in 0..nout {
                            s2[k * nout + l] += wf[k] * wf[l];
                        }
                    }
                }
                for k in 0..nout {
                    let mk = s1[k] / n;
                    integral[k] += mk;
                    for l in 0..nout {
                        let ml = s1[l] / n;
                        cov[k * nout + l] += (s2[k * nout + l] / n - mk * ml) / (n - 1.0);
                    }
                }
            }
            if cfg.adapt {
                self.map.add_training_data(&y, &train);
            }
            h0 = h1;
        }

        for k in 0..nout {
            let d = &mut cov[k * nout + k];
            *d = d.max(0.0);
        }
        if cfg.adapt {
            self.map.adapt(cfg.alpha);
        }
        IterationEstimate::new(integral, cov)
    }
}
