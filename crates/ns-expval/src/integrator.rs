//! Expectation-value integrator.
//!
//! Construction trains the shared grid once; every call probes the user
//! function, wraps it in an [`ExpectationPipeline`] and runs the adaptive
//! sampler. The sampler keeps its adapted map between calls, so a cheap first
//! call (e.g. [`PdfIntegrator::normalization`]) can serve as warm-up.

use ns_core::{Distribution, Error, Output, ParamView, Result, Uncertain};
use ns_prob::TangentBijector;
use ns_vegas::{AdaptiveMap, Integrator, WeightedAverage};

use crate::adapter::{FlatFn, IntegrandAdapter, ShapedFn};
use crate::config::{CallOptions, ExpvalConfig};
use crate::grid::GridTrainer;
use crate::pipeline::ExpectationPipeline;
use crate::result::{ExpvalResult, marshal};

/// Q below which a call logs a warning about inconsistent iterations.
const LOW_Q: f64 = 0.05;

/// Monte Carlo expectation values under a whitened distribution.
pub struct PdfIntegrator<D: Distribution> {
    dist: D,
    config: ExpvalConfig,
    bijector: TangentBijector,
    grid: Vec<f64>,
    sampler: Integrator,
    last_norm: Option<Uncertain>,
    rank: usize,
}

impl<D: Distribution> PdfIntegrator<D> {
    /// Train the shared grid and build a sampler with one copy per dimension.
    pub fn new(dist: D, config: ExpvalConfig) -> Result<Self> {
        config.validate()?;
        let dim = dist.size();
        if dim == 0 {
            return Err(Error::Validation("distribution has no parameters".into()));
        }
        if dist.mean_flat().len() != dim || dist.pjac().len() != dim {
            return Err(Error::Validation(format!(
                "distribution reports size {dim} but mean has {} and pjac {} entries",
                dist.mean_flat().len(),
                dist.pjac().len()
            )));
        }
        if dist.shape().size() != dim {
            return Err(Error::Validation(format!(
                "distribution reports size {dim} but its layout holds {} values",
                dist.shape().size()
            )));
        }
        let grid = GridTrainer::new(&config)?.train()?;
        let map = AdaptiveMap::from_grids(vec![grid.clone(); dim])?;
        log::debug!("expval integrator: dim={dim} ninc={} scale={}", config.ninc, config.scale);
        Ok(Self {
            dist,
            bijector: TangentBijector::new(config.scale),
            config,
            grid,
            sampler: Integrator::new(map),
            last_norm: None,
            rank: 0,
        })
    }

    /// The target distribution.
    pub fn distribution(&self) -> &D {
        &self.dist
    }

    /// Construction settings.
    pub fn config(&self) -> &ExpvalConfig {
        &self.config
    }

    /// Breakpoints of the shared grid as trained at construction.
    pub fn trained_grid(&self) -> &[f64] {
        &self.grid
    }

    /// Current sampler map (adapted by previous calls).
    pub fn map(&self) -> &AdaptiveMap {
        self.sampler.map()
    }

    /// Discard adaptation from previous calls.
    pub fn reset_map(&mut self) -> Result<()> {
        let map = AdaptiveMap::from_grids(vec![self.grid.clone(); self.dist.size()])?;
        self.sampler = Integrator::new(map);
        Ok(())
    }

    /// Rank of the worker coordinating the last parallel call.
    pub fn worker_rank(&self) -> usize {
        self.rank
    }

    /// Normalization estimate of the last call that included the density.
    pub fn last_norm(&self) -> Option<Uncertain> {
        self.last_norm
    }

    /// Expectation value of `f` (or `∫ f(p) dp` with `nopdf`).
    pub fn expval<F>(&mut self, f: F, opts: &CallOptions) -> Result<ExpvalResult>
    where
        F: Fn(&ParamView) -> Result<Output> + Sync,
    {
        let f: ShapedFn<'_> = &f;
        self.call(Some(f), opts)
    }

    /// Integrate the density alone. The value is empty; see [`ExpvalResult::norm`].
    pub fn normalization(&mut self, opts: &CallOptions) -> Result<ExpvalResult> {
        self.call(None, opts)
    }

    /// Integrate a function that writes `len` flat slots per sample.
    ///
    /// The function fills the whole row, including a density slot if it wants
    /// one, and the raw sampler output is returned without normalization.
    pub fn expval_flat<F>(&mut self, f: F, len: usize, opts: &CallOptions) -> Result<WeightedAverage>
    where
        F: Fn(&ParamView, &mut [f64]) -> Result<()> + Sync,
    {
        let vegas = opts.vegas_config();
        vegas.validate()?;
        let f: FlatFn<'_> = &f;
        let adapter = IntegrandAdapter::flat(f, len)?;
        self.run(adapter, opts)
    }

    fn call(&mut self, f: Option<ShapedFn<'_>>, opts: &CallOptions) -> Result<ExpvalResult> {
        if opts.nopdf && f.is_none() {
            return Err(Error::Validation("nopdf requested without a function: nothing to integrate".into()));
        }
        opts.vegas_config().validate()?;

        let mut view = ParamView::new(self.dist.shape().clone(), self.dist.extend());
        view.set_flat(self.dist.mean_flat());
        let adapter = IntegrandAdapter::probe(f, !opts.nopdf, &view)?;
        let shape = adapter.shape().clone();
        let density_slot = adapter.density_slot();

        let raw = self.run(adapter, opts)?;
        let result = marshal(raw, &shape, density_slot)?;
        if density_slot {
            self.last_norm = result.norm();
        }
        Ok(result)
    }

    fn run(&mut self, adapter: IntegrandAdapter<'_>, opts: &CallOptions) -> Result<WeightedAverage> {
        let vegas = opts.vegas_config();
        if opts.parallel {
            self.rank = rayon::current_thread_index().unwrap_or(0);
        }
        let pipeline =
            ExpectationPipeline::new(&self.dist, self.bijector, adapter, opts.nopdf, opts.parallel);
        let raw = self.sampler.integrate(&pipeline, &vegas)?;
        if raw.q() < LOW_Q {
            log::warn!(
                "iterations inconsistent: chi2/dof = {:.2}, Q = {:.3}; consider more warm-up or larger neval",
                raw.chi2() / raw.dof().max(1) as f64,
                raw.q()
            );
        }
        Ok(raw)
    }
}
