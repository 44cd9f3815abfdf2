//! Correlated multivariate Gaussian distribution in whitened coordinates.
//!
//! The covariance `Σ` is rescaled to a correlation matrix `R = D⁻¹ Σ D⁻¹`
//! (`D = diag(σ)`) and eigen-decomposed, `R = V Λ Vᵀ`. Parameters are then
//! expressed through independent standard-normal coordinates `x`:
//!
//! `p = mean + D V sqrt(Λ) x`
//!
//! Small eigenvalues of `R` can be raised to `svdcut * λ_max` to regularize
//! near-singular covariances (this only ever widens the distribution).

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ns_core::traits::Distribution;
use ns_core::{Error, Result, ShapeDescriptor};
use rand::Rng;
use rand_distr::{Distribution as RandDistribution, StandardNormal};

use crate::normal::LN_SQRT_2PI;

/// Default eigenvalue floor relative to the largest eigenvalue.
pub const DEFAULT_SVDCUT: f64 = 1e-15;

/// Multivariate Gaussian with a whitening transform.
#[derive(Debug, Clone)]
pub struct GaussianDistribution {
    shape: ShapeDescriptor,
    extend: bool,
    mean: Vec<f64>,
    /// `dp = sig * x`
    sig: DMatrix<f64>,
    /// `x = isig * dp`
    isig: DMatrix<f64>,
    pjac: Vec<f64>,
    /// `ln(sqrt(det(2π Σ')))`
    log_norm: f64,
    n_modified: usize,
}

impl GaussianDistribution {
    /// Build from a mean vector, covariance matrix and parameter layout.
    ///
    /// `svdcut = None` (or `Some(0.0)`) leaves the covariance unchanged; any
    /// eigenvalue below `svdcut * λ_max` is otherwise replaced by that floor.
    pub fn new(
        mean: Vec<f64>,
        cov: DMatrix<f64>,
        shape: ShapeDescriptor,
        svdcut: Option<f64>,
    ) -> Result<Self> {
        let n = mean.len();
        if n == 0 {
            return Err(Error::Validation("distribution needs at least one parameter".into()));
        }
        if shape.size() != n {
            return Err(Error::Validation(format!(
                "layout {:?} has {} slots but mean has {}",
                shape,
                shape.size(),
                n
            )));
        }
        if cov.nrows() != n || cov.ncols() != n {
            return Err(Error::Validation(format!(
                "covariance must be {}x{}, got {}x{}",
                n,
                n,
                cov.nrows(),
                cov.ncols()
            )));
        }
        if mean.iter().any(|m| !m.is_finite()) {
            return Err(Error::Validation("mean must be finite".into()));
        }
        if let Some(cut) = svdcut {
            if !cut.is_finite() || cut < 0.0 {
                return Err(Error::Validation(format!("svdcut must be >= 0, got {cut}")));
            }
        }

        let mut sdev = Vec::with_capacity(n);
        for i in 0..n {
            let v = cov[(i, i)];
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::Validation(format!(
                    "variance of parameter {i} must be finite and > 0, got {v}"
                )));
            }
            sdev.push(v.sqrt());
        }

        // Symmetrise and rescale to a correlation matrix.
        let mut corr = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                corr[(i, j)] = 0.5 * (cov[(i, j)] + cov[(j, i)]) / (sdev[i] * sdev[j]);
            }
        }

        let eig = SymmetricEigen::new(corr);
        let max_eig = eig.eigenvalues.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let floor = svdcut.unwrap_or(0.0) * max_eig;
        let mut n_modified = 0;
        let mut vals = Vec::with_capacity(n);
        for &lam in eig.eigenvalues.iter() {
            if lam < floor {
                n_modified += 1;
                vals.push(floor);
            } else {
                vals.push(lam);
            }
        }
        if let Some(bad) = vals.iter().find(|&&l| !l.is_finite() || l <= 0.0) {
            return Err(Error::Validation(format!(
                "covariance is not positive definite (eigenvalue {bad}); set svdcut > 0 to regularize"
            )));
        }

        let v = &eig.eigenvectors;
        let mut sig = DMatrix::<f64>::zeros(n, n);
        let mut isig = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            for k in 0..n {
                let sq = vals[k].sqrt();
                sig[(i, k)] = sdev[i] * v[(i, k)] * sq;
                isig[(k, i)] = v[(i, k)] / (sq * sdev[i]);
            }
        }

        let pjac: Vec<f64> = (0..n).map(|i| sdev[i] * vals[i].sqrt()).collect();
        let log_norm = pjac.iter().map(|p| p.ln()).sum::<f64>() + n as f64 * LN_SQRT_2PI;

        Ok(Self { shape, extend: false, mean, sig, isig, pjac, log_norm, n_modified })
    }

    /// One-dimensional `N(mean, sdev^2)` with scalar layout.
    pub fn scalar(mean: f64, sdev: f64) -> Result<Self> {
        let cov = DMatrix::from_element(1, 1, sdev * sdev);
        Self::new(vec![mean], cov, ShapeDescriptor::Scalar, Some(DEFAULT_SVDCUT))
    }

    /// Independent parameters with the given standard deviations.
    pub fn independent(mean: Vec<f64>, sdev: &[f64], shape: ShapeDescriptor) -> Result<Self> {
        if sdev.len() != mean.len() {
            return Err(Error::Validation(format!(
                "got {} standard deviations for {} means",
                sdev.len(),
                mean.len()
            )));
        }
        let var = DVector::from_iterator(sdev.len(), sdev.iter().map(|s| s * s));
        Self::new(mean, DMatrix::from_diagonal(&var), shape, Some(DEFAULT_SVDCUT))
    }

    /// Expose `log(name)` / `sqrt(name)` entries of a named layout as `name`.
    pub fn extended(mut self) -> Self {
        self.extend = true;
        self
    }

    /// Number of eigenvalues raised by `svdcut`.
    pub fn n_modified(&self) -> usize {
        self.n_modified
    }

    /// Covariance actually used (after `svdcut`), `sig * sigᵀ`.
    pub fn covariance(&self) -> DMatrix<f64> {
        &self.sig * self.sig.transpose()
    }

    /// Whitening: flat parameter point `p` -> standard-normal coordinates `x`.
    pub fn p_to_x(&self, p: &[f64]) -> Vec<f64> {
        let dp = DVector::from_iterator(p.len(), p.iter().zip(&self.mean).map(|(a, m)| a - m));
        (&self.isig * dp).iter().copied().collect()
    }

    /// Normalized density at flat point `p`.
    pub fn density(&self, p: &[f64]) -> f64 {
        let x = self.p_to_x(p);
        let chi2: f64 = x.iter().map(|v| v * v).sum();
        (-0.5 * chi2 - self.log_norm).exp()
    }

    /// Draw one flat parameter vector.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let x: Vec<f64> =
            (0..self.mean.len()).map(|_| RandDistribution::<f64>::sample(&StandardNormal, rng)).collect();
        let mut dp = vec![0.0; x.len()];
        self.x_to_dp(&x, &mut dp);
        dp.iter().zip(&self.mean).map(|(d, m)| d + m).collect()
    }
}

impl Distribution for GaussianDistribution {
    fn size(&self) -> usize {
        self.mean.len()
    }

    fn shape(&self) -> &ShapeDescriptor {
        &self.shape
    }

    fn extend(&self) -> bool {
        self.extend
    }

    fn mean_flat(&self) -> &[f64] {
        &self.mean
    }

    fn x_to_dp(&self, x: &[f64], dp: &mut [f64]) {
        let n = self.mean.len();
        for (i, out) in dp.iter_mut().enumerate().take(n) {
            let mut acc = 0.0;
            for (k, xk) in x.iter().enumerate() {
                acc += self.sig[(i, k)] * xk;
            }
            *out = acc;
        }
    }

    fn pjac(&self) -> &[f64] {
        &self.pjac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn correlated() -> GaussianDistribution {
        let cov = DMatrix::from_row_slice(2, 2, &[4.0, 1.8, 1.8, 1.0]);
        GaussianDistribution::new(
            vec![1.0, -1.0],
            cov,
            ShapeDescriptor::Array(vec![2]),
            Some(DEFAULT_SVDCUT),
        )
        .unwrap()
    }

    #[test]
    fn test_whitening_reproduces_covariance() {
        let g = correlated();
        let cov = g.covariance();
        assert_relative_eq!(cov[(0, 0)], 4.0, epsilon = 1e-12);
        assert_relative_eq!(cov[(0, 1)], 1.8, epsilon = 1e-12);
        assert_relative_eq!(cov[(1, 1)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pjac_is_sqrt_det() {
        let g = correlated();
        let det = 4.0 * 1.0 - 1.8 * 1.8;
        let prod: f64 = g.pjac().iter().product();
        assert_relative_eq!(prod, f64::sqrt(det), epsilon = 1e-12);
    }

    #[test]
    fn test_whiten_roundtrip() {
        let g = correlated();
        let x = [0.3, -1.2];
        let mut dp = [0.0; 2];
        g.x_to_dp(&x, &mut dp);
        let p: Vec<f64> = dp.iter().zip(g.mean_flat()).map(|(d, m)| d + m).collect();
        let back = g.p_to_x(&p);
        assert_relative_eq!(back[0], x[0], epsilon = 1e-12);
        assert_relative_eq!(back[1], x[1], epsilon = 1e-12);
    }

    #[test]
    fn test_density_at_mean() {
        let g = GaussianDistribution::scalar(2.0, 0.5).unwrap();
        let expected = 1.0 / (0.5 * (2.0 * std::f64::consts::PI).sqrt());
        assert_relative_eq!(g.density(&[2.0]), expected, epsilon = 1e-12);
        assert_relative_eq!(
            g.density(&[2.5]),
            expected * (-0.5f64).exp(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_svdcut_regularizes_singular_covariance() {
        // Eigenvalues of this "correlation" are 2.2 and -0.2.
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 1.2, 1.2, 1.0]);
        let shape = ShapeDescriptor::Array(vec![2]);
        assert!(GaussianDistribution::new(vec![0.0, 0.0], cov.clone(), shape.clone(), None).is_err());
        let g = GaussianDistribution::new(vec![0.0, 0.0], cov, shape, Some(1e-6)).unwrap();
        assert_eq!(g.n_modified(), 1);
        assert!(g.pjac().iter().all(|&p| p > 0.0));
    }

    #[test]
    fn test_invalid_inputs() {
        let cov = DMatrix::from_element(1, 1, 1.0);
        assert!(GaussianDistribution::new(vec![], DMatrix::zeros(0, 0), ShapeDescriptor::Scalar, None).is_err());
        assert!(GaussianDistribution::new(vec![0.0], cov.clone(), ShapeDescriptor::Array(vec![2]), None).is_err());
        assert!(GaussianDistribution::new(vec![0.0], cov, ShapeDescriptor::Scalar, Some(-1.0)).is_err());
        assert!(GaussianDistribution::scalar(0.0, 0.0).is_err());
        assert!(GaussianDistribution::independent(vec![0.0, 1.0], &[1.0], ShapeDescriptor::Array(vec![2])).is_err());
    }

    #[test]
    fn test_sample_moments() {
        let g = correlated();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let n = 20_000;
        let mut sum = [0.0; 2];
        let mut cross = 0.0;
        for _ in 0..n {
            let p = g.sample(&mut rng);
            sum[0] += p[0];
            sum[1] += p[1];
            cross += (p[0] - 1.0) * (p[1] + 1.0);
        }
        assert!((sum[0] / n as f64 - 1.0).abs() < 0.1);
        assert!((sum[1] / n as f64 + 1.0).abs() < 0.05);
        assert!((cross / n as f64 - 1.8).abs() < 0.15);
    }
}
