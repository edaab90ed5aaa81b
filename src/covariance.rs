//! Turbulence phase covariance
//!
//! The covariance kernel is an interface: [VonKarman] is the kernel used by the
//! simulator, any other isotropic or anisotropic kernel can be plugged into
//! [PhaseScreen](crate::PhaseScreen) through [CovarianceKernel].

use nalgebra::DMatrix;
use scilib::math::bessel;
use std::f64::consts::PI;

use crate::pupil::PositionSet;

/// Spatial covariance function of the phase
pub trait CovarianceKernel {
    /// Covariance between the phase at `(x_out,y_out)` and the phase at `(x_in,y_in)`
    fn covariance(&self, x_out: f64, y_out: f64, x_in: f64, y_in: f64) -> f64;
}

// Γ(11/6)/(2^(5/6)π^(8/3)) (24/5 Γ(6/5))^(5/6)
const COV_COEF: f64 = 0.08583068106228546;
// Γ(11/6)Γ(5/6)/(2π^(8/3)) (24/5 Γ(6/5))^(5/6)
const VAR_COEF: f64 = 0.08631432991183458;
const NU: f64 = 5. / 6.;

/// Von Kármán phase covariance in rad² at 0.5 micron
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VonKarman {
    /// Fried parameter [m]
    pub r0: f64,
    /// outer scale [m]
    pub l0: f64,
}
impl VonKarman {
    pub fn new(r0: f64, l0: f64) -> Self {
        Self { r0, l0 }
    }
    /// Phase variance
    pub fn variance(&self) -> f64 {
        VAR_COEF * (self.l0 / self.r0).powf(5. / 3.)
    }
    /// Phase covariance at separation `r` [m]
    pub fn at(&self, r: f64) -> f64 {
        if r == 0. {
            return self.variance();
        }
        let u = 2. * PI * r / self.l0;
        COV_COEF * (self.l0 / self.r0).powf(5. / 3.) * u.powf(NU) * bessel_k56(u)
    }
}
impl CovarianceKernel for VonKarman {
    fn covariance(&self, x_out: f64, y_out: f64, x_in: f64, y_in: f64) -> f64 {
        self.at((x_out - x_in).hypot(y_out - y_in))
    }
}

/// Modified Bessel function of the second kind of order 5/6
fn bessel_k56(x: f64) -> f64 {
    bessel::k(NU, x.into()).re
}

/// Covariance matrix between the `output` and `input` positions
///
/// The matrix has as many rows as `output` and as many columns as `input`.
pub fn covariance_matrix<K>(kernel: &K, output: &PositionSet, input: &PositionSet) -> DMatrix<f64>
where
    K: CovarianceKernel + ?Sized,
{
    let output = output.as_slice();
    let input = input.as_slice();
    DMatrix::from_fn(output.len(), input.len(), |i, j| {
        let (x_out, y_out) = output[i];
        let (x_in, y_in) = input[j];
        kernel.covariance(x_out, y_out, x_in, y_in)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn bessel_reference_values() {
        assert_relative_eq!(bessel_k56(0.5), 1.39372110760149, max_relative = 1e-6);
        assert_relative_eq!(bessel_k56(1.), 0.5405300878883361, max_relative = 1e-6);
        assert_relative_eq!(bessel_k56(3.), 0.0384231344435494, max_relative = 1e-6);
        assert_relative_eq!(bessel_k56(6.), 0.0013125989438329, max_relative = 1e-6);
    }

    #[test]
    fn covariance_is_continuous_at_zero() {
        let vk = VonKarman::new(0.15, 25.);
        assert_relative_eq!(vk.at(1e-9), vk.variance(), max_relative = 1e-4);
        assert!(vk.at(1.) < vk.variance());
        assert!(vk.at(2.) < vk.at(1.));
    }

    #[test]
    fn symmetric_matrix() {
        let vk = VonKarman::new(0.15, 25.);
        let positions = crate::Pupil::circle(3., 6).positions(0.5);
        let cov = covariance_matrix(&vk, &positions, &positions);
        assert_eq!(cov.nrows(), positions.len());
        assert_relative_eq!(cov.clone(), cov.transpose(), epsilon = 1e-12);
        cov.diagonal()
            .iter()
            .for_each(|&v| assert_relative_eq!(v, vk.variance()));
    }
}
