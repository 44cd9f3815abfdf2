//! Weighted averages of per-iteration Monte Carlo estimates.
//!
//! Every iteration produces a vector estimate with its covariance. The running
//! result is the inverse-covariance weighted mean; `chi2` measures the spread of
//! the iterations around it and `Q` is the chi-square survival probability.

use nalgebra::{DMatrix, DVector};
use ns_core::{Error, Result, Uncertain};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Relative ridge added to iteration covariances before inversion.
const RIDGE: f64 = 1e-12;

/// One iteration: mean vector and row-major covariance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationEstimate {
    /// Estimated values.
    pub mean: Vec<f64>,
    /// Covariance (`len x len`, row-major).
    pub cov: Vec<f64>,
}

impl IterationEstimate {
    /// Build an estimate, checking that `cov` is `len x len`.
    pub fn new(mean: Vec<f64>, cov: Vec<f64>) -> Result<Self> {
        if cov.len() != mean.len() * mean.len() {
            return Err(Error::Validation(format!(
                "covariance length {} does not match {} values",
                cov.len(),
                mean.len()
            )));
        }
        Ok(Self { mean, cov })
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    /// `true` if the estimate has no components.
    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Standard deviation of component `i`.
    pub fn sdev(&self, i: usize) -> f64 {
        self.cov[i * self.len() + i].max(0.0).sqrt()
    }

    /// Component `i` as an uncertain scalar.
    pub fn value(&self, i: usize) -> Uncertain {
        Uncertain::new(self.mean[i], self.sdev(i))
    }
}

/// Running average over iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedAverage {
    nout: usize,
    itn: Vec<IterationEstimate>,
    mean: Vec<f64>,
    cov: Vec<f64>,
    chi2: f64,
}

struct Combined {
    mean: Vec<f64>,
    cov: Vec<f64>,
    chi2: f64,
}

impl WeightedAverage {
    /// Empty average over `nout` components.
    pub fn new(nout: usize) -> Self {
        Self { nout, itn: Vec::new(), mean: vec![0.0; nout], cov: vec![0.0; nout * nout], chi2: 0.0 }
    }

    /// Average of the given iterations.
    pub fn from_iterations(nout: usize, items: Vec<IterationEstimate>) -> Result<Self> {
        let mut avg = Self::new(nout);
        for it in items {
            avg.add(it)?;
        }
        Ok(avg)
    }

    /// Add one iteration and update the weighted mean.
    pub fn add(&mut self, est: IterationEstimate) -> Result<()> {
        if est.len() != self.nout {
            return Err(Error::Validation(format!(
                "iteration has {} components, expected {}",
                est.len(),
                self.nout
            )));
        }
        if est.mean.iter().chain(&est.cov).any(|v| !v.is_finite()) {
            return Err(Error::Computation("non-finite iteration estimate".into()));
        }
        self.itn.push(est);
        let c = combine(&self.itn, true)?;
        self.mean = c.mean;
        self.cov = c.cov;
        self.chi2 = c.chi2;
        Ok(())
    }

    /// Number of components.
    pub fn nout(&self) -> usize {
        self.nout
    }

    /// Number of iterations.
    pub fn len(&self) -> usize {
        self.itn.len()
    }

    /// `true` before the first iteration.
    pub fn is_empty(&self) -> bool {
        self.itn.is_empty()
    }

    /// Weighted mean.
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Covariance of the weighted mean (row-major).
    pub fn covariance(&self) -> &[f64] {
        &self.cov
    }

    /// Standard deviation of component `i`.
    pub fn sdev(&self, i: usize) -> f64 {
        self.cov[i * self.nout + i].max(0.0).sqrt()
    }

    /// Component `i` as an uncertain scalar.
    pub fn value(&self, i: usize) -> Uncertain {
        Uncertain::new(self.mean[i], self.sdev(i))
    }

    /// All components as uncertain scalars.
    pub fn values(&self) -> Vec<Uncertain> {
        (0..self.nout).map(|i| self.value(i)).collect()
    }

    /// Chi-square of the iterations around the weighted mean.
    pub fn chi2(&self) -> f64 {
        self.chi2
    }

    /// Degrees of freedom: `(iterations - 1) * components`.
    pub fn dof(&self) -> usize {
        self.itn.len().saturating_sub(1) * self.nout
    }

    /// Probability that a chi-square this large arises by chance.
    pub fn q(&self) -> f64 {
        q_value(self.chi2, self.dof())
    }

    /// Per-iteration estimates.
    pub fn itn_results(&self) -> &[IterationEstimate] {
        &self.itn
    }

    /// Per-iteration table: estimate, running average, `chi2/dof`, `Q`.
    ///
    /// Columns show the first component; `chi2/dof` and `Q` cover all of them.
    /// With `weighted = false` the running average is the plain mean.
    pub fn summary(&self, weighted: bool) -> String {
        let mut out = String::new();
        out.push_str("itn   integral        average         chi2/dof        Q\n");
        out.push_str("-------------------------------------------------------\n");
        if self.nout == 0 {
            return out;
        }
        for i in 1..=self.itn.len() {
            let Ok(c) = combine(&self.itn[..i], weighted) else {
                continue;
            };
            let dof = (i - 1) * self.nout;
            let chi2_dof = if dof > 0 { c.chi2 / dof as f64 } else { 0.0 };
            let integral = self.itn[i - 1].value(0);
            let average = Uncertain::new(c.mean[0], c.cov[0].max(0.0).sqrt());
            out.push_str(&format!(
                "{:>3}   {:<16}{:<16}{:>8.2}{:>9.2}\n",
                i,
                integral.to_string(),
                average.to_string(),
                chi2_dof,
                q_value(c.chi2, dof)
            ));
        }
        out
    }
}

/// Chi-square survival probability; `1` when there are no degrees of freedom.
pub fn q_value(chi2: f64, dof: usize) -> f64 {
    if dof == 0 {
        return 1.0;
    }
    match ChiSquared::new(dof as f64) {
        Ok(d) => d.sf(chi2.max(0.0)),
        Err(_) => f64::NAN,
    }
}

fn invert(m: DMatrix<f64>) -> Result<DMatrix<f64>> {
    if let Some(ch) = m.clone().cholesky() {
        return Ok(ch.inverse());
    }
    m.pseudo_inverse(1e-300)
        .map_err(|e| Error::Computation(format!("cannot invert covariance: {e}")))
}

fn combine(items: &[IterationEstimate], weighted: bool) -> Result<Combined> {
    let n = items.first().map_or(0, |it| it.len());
    let k = items.len();
    if k == 0 {
        return Ok(Combined { mean: vec![0.0; n], cov: vec![0.0; n * n], chi2: 0.0 });
    }
    if k == 1 {
        let it = &items[0];
        return Ok(Combined { mean: it.mean.clone(), cov: it.cov.clone(), chi2: 0.0 });
    }

    let scale = items
        .iter()
        .flat_map(|it| (0..n).map(move |i| it.cov[i * n + i]))
        .fold(0.0_f64, f64::max);
    let plain_mean: Vec<f64> =
        (0..n).map(|a| items.iter().map(|it| it.mean[a]).sum::<f64>() / k as f64).collect();
    if scale <= 0.0 {
        // All iterations exact.
        return Ok(Combined { mean: plain_mean, cov: vec![0.0; n * n], chi2: 0.0 });
    }

    let ridge = DMatrix::<f64>::identity(n, n) * (scale * RIDGE);
    let weights = items
        .iter()
        .map(|it| invert(DMatrix::from_row_slice(n, n, &it.cov) + &ridge))
        .collect::<Result<Vec<_>>>()?;

    let (mean, cov) = if weighted {
        let mut wsum = DMatrix::<f64>::zeros(n, n);
        let mut wx = DVector::<f64>::zeros(n);
        for (it, w) in items.iter().zip(&weights) {
            wx += w * DVector::from_column_slice(&it.mean);
            wsum += w;
        }
        let cov = invert(wsum)?;
        let mean = &cov * wx;
        (mean, cov)
    } else {
        let mut cov = DMatrix::<f64>::zeros(n, n);
        for it in items {
            cov += DMatrix::from_row_slice(n, n, &it.cov);
        }
        (DVector::from_vec(plain_mean), cov / (k * k) as f64)
    };

    let chi2 = items
        .iter()
        .zip(&weights)
        .map(|(it, w)| {
            let d = DVector::from_column_slice(&it.mean) - &mean;
            (d.transpose() * w * &d)[(0, 0)]
        })
        .sum();

    // nalgebra storage is column-major.
    let cov_rows = cov.transpose().as_slice().to_vec();
    Ok(Combined { mean: mean.iter().copied().collect(), cov: cov_rows, chi2 })
}
