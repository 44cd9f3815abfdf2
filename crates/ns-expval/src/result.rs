//! Turning raw sampler output into expectation values.
//!
//! With the density slot present, slot 0 of the raw result is the
//! normalization integral `∫ pdf` and every other slot is `∫ f·pdf`; their
//! ratio is the expectation value. Ratio uncertainties use the full raw
//! covariance, so the (strong) correlation between numerator and denominator
//! is accounted for.

use std::fmt;

use ns_core::{Error, Result, ShapeDescriptor, Shaped, Uncertain};
use ns_vegas::WeightedAverage;

/// Expectation values in the shape of the user output, with diagnostics.
#[derive(Debug, Clone)]
pub struct ExpvalResult {
    value: Shaped<Uncertain>,
    covariance: Vec<f64>,
    norm: Option<Uncertain>,
    raw: WeightedAverage,
}

impl ExpvalResult {
    /// Expectation values, shaped like the user output.
    pub fn value(&self) -> &Shaped<Uncertain> {
        &self.value
    }

    /// Consume the result, keeping only the shaped values.
    pub fn into_value(self) -> Shaped<Uncertain> {
        self.value
    }

    /// Scalar result, if the user output was a scalar.
    pub fn as_scalar(&self) -> Option<Uncertain> {
        self.value.as_scalar().copied()
    }

    /// Named entry, if the user output was a named collection.
    pub fn get(&self, name: &str) -> Option<&Shaped<Uncertain>> {
        self.value.get(name)
    }

    /// Flat means in slot order.
    pub fn mean_flat(&self) -> Vec<f64> {
        self.value.flat_values().into_iter().map(|u| u.mean).collect()
    }

    /// Covariance of the flat values (row-major).
    pub fn covariance(&self) -> &[f64] {
        &self.covariance
    }

    /// Normalization integral; `None` when the density was dropped.
    pub fn norm(&self) -> Option<Uncertain> {
        self.norm
    }

    /// Degrees of freedom of the iteration average.
    pub fn dof(&self) -> usize {
        self.raw.dof()
    }

    /// Chi-square of the iteration average.
    pub fn chi2(&self) -> f64 {
        self.raw.chi2()
    }

    /// Goodness of fit of the iteration average.
    pub fn q(&self) -> f64 {
        self.raw.q()
    }

    /// Per-iteration table of the raw integrals.
    pub fn summary(&self, weighted: bool) -> String {
        self.raw.summary(weighted)
    }

    /// Unnormalized sampler output.
    pub fn raw(&self) -> &WeightedAverage {
        &self.raw
    }
}

impl fmt::Display for ExpvalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Normalize (if `density_slot`) and reshape a raw result.
pub fn marshal(raw: WeightedAverage, shape: &ShapeDescriptor, density_slot: bool) -> Result<ExpvalResult> {
    let n = raw.nout();
    let off = usize::from(density_slot);
    if n < off || n - off != shape.size() {
        return Err(Error::Validation(format!(
            "raw result has {n} slots, layout {shape:?} needs {}",
            shape.size() + off
        )));
    }
    let m = n - off;
    let mean = raw.mean();
    let c = raw.covariance();

    let (values, covariance) = if density_slot {
        let m0 = mean[0];
        if m0 == 0.0 || !m0.is_finite() {
            return Err(Error::Computation(format!("normalization integral is {m0}")));
        }
        let r: Vec<f64> = (0..m).map(|a| mean[a + 1] / m0).collect();
        let mut cov = vec![0.0; m * m];
        for a in 0..m {
            for b in 0..m {
                let (ia, ib) = (a + 1, b + 1);
                cov[a * m + b] = (c[ia * n + ib] - r[a] * c[ib] - r[b] * c[ia * n]
                    + r[a] * r[b] * c[0])
                    / (m0 * m0);
            }
        }
        (r, cov)
    } else {
        (mean.to_vec(), c.to_vec())
    };

    let uncertain = values
        .iter()
        .enumerate()
        .map(|(a, &v)| Uncertain::new(v, covariance[a * m + a].max(0.0).sqrt()))
        .collect();
    let value = shape.restore(uncertain)?;
    let norm = density_slot.then(|| raw.value(0));
    Ok(ExpvalResult { value, covariance, norm, raw })
}
