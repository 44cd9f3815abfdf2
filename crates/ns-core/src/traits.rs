//! Core traits for NextStat expectation values
//!
//! This module defines the seams between the expectation-value core and its
//! two collaborators: the whitened Gaussian distribution (ns-prob) and the
//! adaptive Monte Carlo sampler (ns-vegas). The core depends only on these
//! traits, not on concrete implementations.

use crate::Result;
use crate::types::ShapeDescriptor;

/// A distribution that can be expressed in decorrelated standard-normal
/// coordinates `x`, with `p = mean + x_to_dp(x)`.
pub trait Distribution: Send + Sync {
    /// Number of flat parameters (and of decorrelated dimensions).
    fn size(&self) -> usize;

    /// Parameter layout.
    fn shape(&self) -> &ShapeDescriptor;

    /// Whether named layouts expose derived `log(name)` / `sqrt(name)` entries.
    fn extend(&self) -> bool;

    /// Mean in flat coordinates.
    fn mean_flat(&self) -> &[f64];

    /// Inverse whitening: standard-normal deviation `x` -> flat parameter deviation `dp`.
    fn x_to_dp(&self, x: &[f64], dp: &mut [f64]);

    /// Per-dimension density Jacobian; `prod(pjac) = |det(dp/dx)|`.
    fn pjac(&self) -> &[f64];
}

/// A vectorized integrand evaluated on batches of points.
///
/// Points are rows of `theta` (`batch x dim`, row-major); results are rows of
/// `out` (`batch x output_len()`, row-major).
pub trait BatchIntegrand: Sync {
    /// Number of values produced per point.
    fn output_len(&self) -> usize;

    /// Evaluate every row of `theta` into the matching row of `out`.
    fn eval_batch(&self, theta: &[f64], dim: usize, out: &mut [f64]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SquareIntegrand;

    impl BatchIntegrand for SquareIntegrand {
        fn output_len(&self) -> usize {
            1
        }

        fn eval_batch(&self, theta: &[f64], dim: usize, out: &mut [f64]) -> Result<()> {
            for (row, o) in theta.chunks(dim).zip(out.iter_mut()) {
                *o = row.iter().map(|t| t * t).sum();
            }
            Ok(())
        }
    }

    #[test]
    fn test_dummy_integrand() {
        let f = SquareIntegrand;
        let mut out = vec![0.0; 2];
        f.eval_batch(&[1.0, 2.0, 3.0, 4.0], 2, &mut out).unwrap();
        assert_eq!(out, vec![5.0, 25.0]);
        assert_eq!(f.output_len(), 1);
    }
}
