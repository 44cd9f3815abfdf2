//! Bijective transforms (bijectors) between bounded and unbounded coordinates.
//!
//! The expectation-value integrator samples a bounded coordinate `θ` and maps
//! it onto the real line. The map has to be invertible with a known Jacobian so
//! that `∫ g(x) dx = ∫ g(x(θ)) |dx/dθ| dθ`.

/// A bijective transform `v = forward(u)`.
///
/// Which side is bounded depends on the implementation.
pub trait Bijector: Send + Sync {
    /// Map `u -> v`.
    fn forward(&self, u: f64) -> f64;
    /// Map `v -> u`.
    fn inverse(&self, v: f64) -> f64;
    /// Log absolute determinant of Jacobian: `log|dv/du|`
    fn log_abs_det_jacobian(&self, u: f64) -> f64;
    /// Derivative of log|J| w.r.t. u: `d/du log|dv/du|`
    fn grad_log_abs_det_jacobian(&self, u: f64) -> f64;
    /// Jacobian element: `dv/du`
    fn jacobian(&self, u: f64) -> f64;
}

/// Tangent map: `(-π/2, π/2) -> (-inf, inf)`, `x = scale * tan(θ)`.
///
/// Restricting `θ` to `[-L, L]` with `L = atan(limit/scale)` bounds `|x|` by
/// `limit`, and heavy tails in `x` are compressed into a finite `θ` interval.
/// `dx/dθ = scale * (tan(θ)^2 + 1)` is strictly positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TangentBijector {
    scale: f64,
}

impl TangentBijector {
    /// Create a tangent map with positive `scale`.
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }

    /// Rescaling factor.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Half-width `L = atan(limit/scale)` of the `θ` interval giving `|x| <= limit`.
    pub fn domain_limit(&self, limit: f64) -> f64 {
        (limit.abs() / self.scale).atan()
    }

    /// `(x, dx/dθ)` with a single `tan` evaluation.
    #[inline]
    pub fn forward_with_jacobian(&self, theta: f64) -> (f64, f64) {
        let t = theta.tan();
        (self.scale * t, self.scale * (t * t + 1.0))
    }
}

impl Bijector for TangentBijector {
    #[inline]
    fn forward(&self, theta: f64) -> f64 {
        self.scale * theta.tan()
    }

    #[inline]
    fn inverse(&self, x: f64) -> f64 {
        (x / self.scale).atan()
    }

    #[inline]
    fn log_abs_det_jacobian(&self, theta: f64) -> f64 {
        // 1 + tan^2 = 1/cos^2
        self.scale.ln() - 2.0 * theta.cos().abs().ln()
    }

    #[inline]
    fn grad_log_abs_det_jacobian(&self, theta: f64) -> f64 {
        2.0 * theta.tan()
    }

    #[inline]
    fn jacobian(&self, theta: f64) -> f64 {
        let t = theta.tan();
        self.scale * (t * t + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bijector_roundtrip(b: &dyn Bijector, z_values: &[f64], rtol: f64) {
        for &z in z_values {
            let theta = b.forward(z);
            let z_back = b.inverse(theta);
            let diff = (z - z_back).abs();
            let scale = z.abs().max(1.0);
            assert!(
                diff / scale < rtol,
                "Roundtrip failed: z={}, theta={}, z_back={}, diff={}",
                z,
                theta,
                z_back,
                diff
            );
        }
    }

    fn test_jacobian_fd(b: &dyn Bijector, z_values: &[f64]) {
        let h = 1e-6;
        for &z in z_values {
            let fd = (b.forward(z + h) - b.forward(z - h)) / (2.0 * h);
            let j = b.jacobian(z);
            assert!((fd - j).abs() / j.abs().max(1.0) < 1e-5, "z={z}: fd={fd}, jac={j}");
            assert!((j.abs().ln() - b.log_abs_det_jacobian(z)).abs() < 1e-10);

            let fd_grad = (b.log_abs_det_jacobian(z + h) - b.log_abs_det_jacobian(z - h)) / (2.0 * h);
            let g = b.grad_log_abs_det_jacobian(z);
            assert!((fd_grad - g).abs() < 1e-4, "z={z}: fd_grad={fd_grad}, grad={g}");
        }
    }

    #[test]
    fn test_tangent_roundtrip_and_jacobian() {
        let zs = [-1.4, -0.8, -0.1, 0.0, 0.3, 1.0, 1.5];
        for scale in [0.5, 1.0, 3.0] {
            let b = TangentBijector::new(scale);
            test_bijector_roundtrip(&b, &zs, 1e-12);
            test_jacobian_fd(&b, &zs);
        }
    }

    #[test]
    fn test_forward_with_jacobian_consistent() {
        let b = TangentBijector::new(2.0);
        for th in [-1.2, -0.3, 0.0, 0.7, 1.3] {
            let (x, j) = b.forward_with_jacobian(th);
            assert!((x - b.forward(th)).abs() < 1e-12);
            assert!((j - b.jacobian(th)).abs() < 1e-12);
            assert!(j > 0.0);
        }
    }

    #[test]
    fn test_forward_maps_angle_to_real_line() {
        let b = TangentBijector::new(1.0);
        assert!(b.forward(std::f64::consts::FRAC_PI_2 - 1e-9) > 1e8);
        assert!(b.forward(-std::f64::consts::FRAC_PI_2 + 1e-9) < -1e8);
        for x in [-1e12, -3.0, 0.0, 3.0, 1e12] {
            assert!(b.inverse(x).abs() < std::f64::consts::FRAC_PI_2);
        }
    }

    #[test]
    fn test_domain_limit_bounds_x() {
        let b = TangentBijector::new(1.5);
        let l = b.domain_limit(4.0);
        assert!((b.forward(l) - 4.0).abs() < 1e-12);
        assert!((b.forward(-l) + 4.0).abs() < 1e-12);
        // Default-sized limits stay strictly inside (-π/2, π/2).
        let l = b.domain_limit(1e15);
        assert!(l < std::f64::consts::FRAC_PI_2);
        assert!(b.forward(l).is_finite());
    }
}
