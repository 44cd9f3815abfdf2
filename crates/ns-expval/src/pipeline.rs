//! Batched integrand: grid angles to weighted, flattened user output.
//!
//! For each row `θ` of a batch:
//! 1. `x = scale·tan θ`, `jac = scale·(tan²θ + 1)` per dimension,
//! 2. weight `∏ jac·φ(x)`, or `∏ jac·pjac` when the density is dropped,
//! 3. `p = mean + x_to_dp(x)`, written into the call's [`ParamView`],
//! 4. the adapter fills the flat row, which is scaled by the weight.

use std::sync::Mutex;

use ns_core::{BatchIntegrand, Distribution, Error, ParamView, Result};
use ns_prob::TangentBijector;
use ns_prob::normal::std_pdf;
use rayon::prelude::*;

use crate::adapter::{FlatBuffer, IntegrandAdapter};

/// Smallest number of rows handed to one rayon task.
const MIN_CHUNK_ROWS: usize = 16;

/// Reusable per-worker state.
struct Scratch {
    view: ParamView,
    x: Vec<f64>,
    dp: Vec<f64>,
    p: Vec<f64>,
    buf: FlatBuffer,
}

/// The batched integrand handed to the sampler for one call.
pub struct ExpectationPipeline<'a> {
    dist: &'a dyn Distribution,
    bijector: TangentBijector,
    adapter: IntegrandAdapter<'a>,
    nopdf: bool,
    parallel: bool,
    scratch: Mutex<Scratch>,
}

impl<'a> ExpectationPipeline<'a> {
    /// Pipeline for `dist` with the probed `adapter`.
    pub fn new(
        dist: &'a dyn Distribution,
        bijector: TangentBijector,
        adapter: IntegrandAdapter<'a>,
        nopdf: bool,
        parallel: bool,
    ) -> Self {
        let scratch = Mutex::new(new_scratch(dist, &adapter));
        Self { dist, bijector, adapter, nopdf, parallel, scratch }
    }

    /// Output layout in effect for this call.
    pub fn adapter(&self) -> &IntegrandAdapter<'a> {
        &self.adapter
    }

    fn eval_rows(&self, theta: &[f64], out: &mut [f64], s: &mut Scratch) -> Result<()> {
        let dim = self.dist.size();
        let nout = self.adapter.buffer_len();
        let mean = self.dist.mean_flat();
        let pjac = self.dist.pjac();

        for (th, row) in theta.chunks_exact(dim).zip(out.chunks_exact_mut(nout)) {
            let mut w = 1.0;
            for (d, &t) in th.iter().enumerate() {
                let (x, jac) = self.bijector.forward_with_jacobian(t);
                s.x[d] = x;
                w *= if self.nopdf { jac * pjac[d] } else { jac * std_pdf(x) };
            }
            self.dist.x_to_dp(&s.x, &mut s.dp);
            for ((p, &m), &dp) in s.p.iter_mut().zip(mean).zip(&s.dp) {
                *p = m + dp;
            }
            s.view.set_flat(&s.p);
            self.adapter.fill(&s.view, &mut s.buf)?;
            for (o, &b) in row.iter_mut().zip(s.buf.iter()) {
                *o = w * b;
            }
        }
        Ok(())
    }
}

fn new_scratch(dist: &dyn Distribution, adapter: &IntegrandAdapter<'_>) -> Scratch {
    let n = dist.size();
    Scratch {
        view: ParamView::new(dist.shape().clone(), dist.extend()),
        x: vec![0.0; n],
        dp: vec![0.0; n],
        p: vec![0.0; n],
        buf: adapter.new_buffer(),
    }
}

impl BatchIntegrand for ExpectationPipeline<'_> {
    fn output_len(&self) -> usize {
        self.adapter.buffer_len()
    }

    fn eval_batch(&self, theta: &[f64], dim: usize, out: &mut [f64]) -> Result<()> {
        if dim != self.dist.size() {
            return Err(Error::Validation(format!(
                "batch has {dim} columns, distribution has {} dimensions",
                self.dist.size()
            )));
        }
        let nout = self.adapter.buffer_len();
        let rows = theta.len() / dim;
        if nout == 0 || rows == 0 {
            return Ok(());
        }
        if out.len() != rows * nout {
            return Err(Error::Validation(format!(
                "output batch has {} slots, expected {}",
                out.len(),
                rows * nout
            )));
        }

        if self.parallel {
            let chunk = rows.div_ceil(rayon::current_num_threads()).max(MIN_CHUNK_ROWS);
            theta.par_chunks(chunk * dim).zip(out.par_chunks_mut(chunk * nout)).try_for_each_init(
                || new_scratch(self.dist, &self.adapter),
                |s, (t, o)| self.eval_rows(t, o, s),
            )
        } else {
            let mut s = self
                .scratch
                .lock()
                .map_err(|_| Error::Computation("pipeline scratch lock poisoned".into()))?;
            self.eval_rows(theta, out, &mut s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ns_core::{Output, Shaped, ShapeDescriptor};
    use ns_prob::GaussianDistribution;

    fn square(p: &ParamView) -> Result<Output> {
        Ok(Shaped::Scalar(p[0] * p[0]))
    }

    fn mean_view(dist: &dyn Distribution) -> ParamView {
        let mut v = ParamView::new(dist.shape().clone(), dist.extend());
        v.set_flat(dist.mean_flat());
        v
    }

    #[test]
    fn test_rows_are_weighted() {
        let dist = GaussianDistribution::scalar(1.0, 2.0).unwrap();
        let adapter = IntegrandAdapter::probe(Some(&square), true, &mean_view(&dist)).unwrap();
        let pipe = ExpectationPipeline::new(&dist, TangentBijector::new(1.0), adapter, false, false);
        assert_eq!(pipe.output_len(), 2);

        let theta = [0.0, 0.5];
        let mut out = vec![0.0; 4];
        pipe.eval_batch(&theta, 1, &mut out).unwrap();

        // θ = 0: x = 0, jac = 1, p = 1.
        assert!((out[0] - std_pdf(0.0)).abs() < 1e-15);
        assert!((out[1] - std_pdf(0.0)).abs() < 1e-15);
        // θ = 0.5: p = 1 + 2·tan(0.5).
        let t = 0.5f64.tan();
        let w = (t * t + 1.0) * std_pdf(t);
        let p = 1.0 + 2.0 * t;
        assert!((out[2] - w).abs() < 1e-14);
        assert!((out[3] - w * p * p).abs() < 1e-12);
    }

    #[test]
    fn test_nopdf_uses_density_jacobian() {
        let dist = GaussianDistribution::scalar(0.0, 3.0).unwrap();
        let adapter = IntegrandAdapter::probe(Some(&square), false, &mean_view(&dist)).unwrap();
        let pipe = ExpectationPipeline::new(&dist, TangentBijector::new(1.0), adapter, true, false);
        assert_eq!(pipe.output_len(), 1);
        let mut out = vec![0.0; 1];
        pipe.eval_batch(&[0.3], 1, &mut out).unwrap();
        let t = 0.3f64.tan();
        let expected = (t * t + 1.0) * 3.0 * (3.0 * t).powi(2);
        assert!((out[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let dist = GaussianDistribution::independent(
            vec![0.5, -1.0],
            &[1.0, 2.0],
            ShapeDescriptor::Array(vec![2]),
        )
        .unwrap();
        let f = |p: &ParamView| -> Result<Output> { Ok(Shaped::vector(vec![p[0] * p[1], p[1]])) };
        let view = mean_view(&dist);
        let rows = 200;
        let theta: Vec<f64> = (0..2 * rows).map(|i| ((i * 37) % 101) as f64 / 101.0 - 0.5).collect();

        let mut serial = vec![0.0; rows * 3];
        let adapter = IntegrandAdapter::probe(Some(&f), true, &view).unwrap();
        ExpectationPipeline::new(&dist, TangentBijector::new(1.0), adapter, false, false)
            .eval_batch(&theta, 2, &mut serial)
            .unwrap();

        let mut parallel = vec![0.0; rows * 3];
        let adapter = IntegrandAdapter::probe(Some(&f), true, &view).unwrap();
        ExpectationPipeline::new(&dist, TangentBijector::new(1.0), adapter, false, true)
            .eval_batch(&theta, 2, &mut parallel)
            .unwrap();

        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_dimension_mismatch() {
        let dist = GaussianDistribution::scalar(0.0, 1.0).unwrap();
        let adapter = IntegrandAdapter::probe(None, true, &mean_view(&dist)).unwrap();
        let pipe = ExpectationPipeline::new(&dist, TangentBijector::new(1.0), adapter, false, false);
        let mut out = vec![0.0; 1];
        assert!(pipe.eval_batch(&[0.0, 0.0], 2, &mut out).is_err());
    }
}
