//! Shack-Hartmann wavefront sensor
//!
//! The pupil is divided into `nsubx`×`nsubx` subapertures of `w`×`w` pixels.
//! The far field of each subaperture is computed with a 2D DFT kernel applied to the
//! whole batch of subapertures at once as a single complex matrix product.
//!
//! Subapertures are indexed with `k = by*nsubx + bx` where `by` (`bx`) is the subaperture
//! row (column), and pixels inside a subaperture or a detector image are flattened
//! row-major.

use itertools::iproduct;
use nalgebra::{Complex, DMatrix};
use std::f64::consts::PI;

use crate::pupil::Pupil;

/// Radians to arcseconds
pub const ARCSEC: f64 = 4.848e-6;

#[derive(Debug, thiserror::Error)]
pub enum ShwfsError {
    #[error("the pupil width {0} is not a multiple of the number of subapertures {1}")]
    Subapertures(usize, usize),
    #[error("the pupil is not square ({0}x{1})")]
    PupilShape(usize, usize),
    #[error("the field of view must be an even number of pixels, found {0}")]
    FieldOfView(usize),
    #[error("invalid wavefront sensor parameter `{0}`: {1}")]
    Parameter(&'static str, f64),
    #[error("expected a {expected:?} phase map, found {found:?}")]
    PhaseShape {
        expected: (usize, usize),
        found: (usize, usize),
    },
}
type Result<T> = std::result::Result<T, ShwfsError>;

/// [Shwfs] builder
#[derive(Debug, Clone)]
pub struct ShwfsBuilder {
    pupil: Pupil,
    nsubx: usize,
    fovx: usize,
    wavelength: f64,
    diam: f64,
}
impl ShwfsBuilder {
    /// Number of subapertures across the pupil
    pub fn nsubx(self, nsubx: usize) -> Self {
        Self { nsubx, ..self }
    }
    /// Subaperture field of view [pixel]
    pub fn fovx(self, fovx: usize) -> Self {
        Self { fovx, ..self }
    }
    /// Sensing wavelength [micron]
    pub fn wavelength(self, wavelength: f64) -> Self {
        Self { wavelength, ..self }
    }
    /// Pupil diameter [m]
    pub fn diameter(self, diam: f64) -> Self {
        Self { diam, ..self }
    }
    pub fn build(self) -> Result<Shwfs> {
        let (n, m) = self.pupil.mask().shape();
        if n != m {
            return Err(ShwfsError::PupilShape(n, m));
        }
        if self.nsubx == 0 || n % self.nsubx != 0 {
            return Err(ShwfsError::Subapertures(n, self.nsubx));
        }
        if self.fovx == 0 || self.fovx % 2 != 0 {
            return Err(ShwfsError::FieldOfView(self.fovx));
        }
        for (name, value) in [("wavelength", self.wavelength), ("diam", self.diam)] {
            if !(value.is_finite() && value > 0.) {
                return Err(ShwfsError::Parameter(name, value));
            }
        }

        let subwidth = n / self.nsubx;
        let padded_width = (2 * subwidth).max(self.fovx);
        let dft = dft_kernel(subwidth, padded_width, self.fovx);
        let dft2_t = dft.kronecker(&dft).transpose();
        log::info!(
            "SH-WFS: {0}x{0} subapertures of {1}x{1} pixels, {2}x{2} pixels field of view",
            self.nsubx,
            subwidth,
            self.fovx
        );

        Ok(Shwfs {
            amplitude: self.pupil.as_f64(),
            pupil: self.pupil,
            nsubx: self.nsubx,
            fovx: self.fovx,
            wavelength: self.wavelength,
            diam: self.diam,
            subwidth,
            padded_width,
            dft2_t,
        })
    }
}

/// Complex number of modulus `r` and argument `theta`
fn polar(r: f64, theta: f64) -> Complex<f64> {
    let (sin, cos) = theta.sin_cos();
    Complex::new(r * cos, r * sin)
}

/// 1D DFT kernel from `subwidth` pupil samples to `fovx` detector pixels
///
/// The kernel is the `padded_width` points orthonormal DFT, centered on the zero frequency,
/// restricted to the first `subwidth` samples, shifted by half a pixel and cropped to the
/// central `fovx` frequencies.
fn dft_kernel(subwidth: usize, padded_width: usize, fovx: usize) -> DMatrix<Complex<f64>> {
    let p = padded_width as f64;
    let first = padded_width / 2 - fovx / 2;
    let norm = p.sqrt().recip();
    DMatrix::from_fn(fovx, subwidth, |row, col| {
        let freq = (first + row) as f64 - (padded_width / 2) as f64;
        let col = col as f64;
        polar(norm, -2. * PI * freq * col / p - PI * col / p)
    })
}

/// WFS detector readout
#[derive(Debug, Clone)]
pub struct WfsFrame {
    /// subaperture images, one row-major flattened `fovx`×`fovx` image per row
    pub subapertures: DMatrix<f64>,
    /// full detector image, `nsubx*fovx`×`nsubx*fovx`
    pub image: DMatrix<f64>,
}
impl WfsFrame {
    /// Total intensity in each subaperture
    pub fn flux(&self) -> Vec<f64> {
        self.subapertures.row_iter().map(|row| row.sum()).collect()
    }
}

/// Shack-Hartmann wavefront sensor
#[derive(Debug, Clone)]
pub struct Shwfs {
    pupil: Pupil,
    amplitude: DMatrix<f64>,
    nsubx: usize,
    fovx: usize,
    wavelength: f64,
    diam: f64,
    subwidth: usize,
    padded_width: usize,
    // transpose of the 2D DFT kernel: (subwidth², fovx²)
    dft2_t: DMatrix<Complex<f64>>,
}
impl Shwfs {
    /// Returns a [ShwfsBuilder] for the given pupil with 32 subapertures across,
    /// 8 pixels field of view, 0.589 micron wavelength and 8m diameter
    pub fn builder(pupil: Pupil) -> ShwfsBuilder {
        ShwfsBuilder {
            pupil,
            nsubx: 32,
            fovx: 8,
            wavelength: 0.589,
            diam: 8.,
        }
    }
    /// Measures the phase `phi` [micron] and returns the detector intensity
    pub fn measure(&self, phi: &DMatrix<f64>) -> Result<WfsFrame> {
        let width = self.pupil.width();
        if phi.shape() != (width, width) {
            return Err(ShwfsError::PhaseShape {
                expected: (width, width),
                found: phi.shape(),
            });
        }
        let (nsubx, w, fovx) = (self.nsubx, self.subwidth, self.fovx);
        let k = 2. * PI / self.wavelength;

        // complex amplitude batched as (nsubx², subwidth²)
        let camp = DMatrix::from_fn(nsubx * nsubx, w * w, |s, q| {
            let (row, col) = ((s / nsubx) * w + q / w, (s % nsubx) * w + q % w);
            polar(self.amplitude[(row, col)], k * phi[(row, col)])
        });
        let subapertures = (camp * &self.dft2_t).map(|c| c.norm_sqr());

        let mut image = DMatrix::zeros(nsubx * fovx, nsubx * fovx);
        for (by, bx, py, px) in iproduct!(0..nsubx, 0..nsubx, 0..fovx, 0..fovx) {
            image[(by * fovx + py, bx * fovx + px)] =
                subapertures[(by * nsubx + bx, py * fovx + px)];
        }
        Ok(WfsFrame {
            subapertures,
            image,
        })
    }
    /// Detector pixel angular size [arcsec]
    pub fn pixel_scale(&self) -> f64 {
        (self.wavelength * 1e-6) / (self.diam / self.nsubx as f64) * self.subwidth as f64
            / self.padded_width as f64
            / ARCSEC
    }
    pub fn pupil(&self) -> &Pupil {
        &self.pupil
    }
    pub fn nsubx(&self) -> usize {
        self.nsubx
    }
    pub fn fovx(&self) -> usize {
        self.fovx
    }
    /// Subaperture width [pixel]
    pub fn subwidth(&self) -> usize {
        self.subwidth
    }
    /// Width of the zero padded DFT
    pub fn padded_width(&self) -> usize {
        self.padded_width
    }
    /// Number of subapertures
    pub fn n_subaperture(&self) -> usize {
        self.nsubx * self.nsubx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassicCog, ValidSubapertures};
    use approx::assert_relative_eq;

    #[test]
    fn flat_phase_energy() {
        let wfs = Shwfs::builder(Pupil::square(8)).nsubx(2).fovx(8).build().unwrap();
        assert_eq!(wfs.padded_width(), 8);
        let frame = wfs.measure(&DMatrix::zeros(8, 8)).unwrap();
        assert_eq!(frame.subapertures.shape(), (4, 64));
        assert_eq!(frame.image.shape(), (16, 16));
        // unaberrated point spread function of a 4x4 square aperture
        let dft = dft_kernel(4, 8, 8);
        let psf = dft.kronecker(&dft) * DMatrix::from_element(16, 1, Complex::new(1., 0.));
        for (p, field) in psf.iter().enumerate() {
            assert_relative_eq!(frame.subapertures[(0, p)], field.norm_sqr(), epsilon = 1e-12);
        }
        // Parseval
        frame
            .flux()
            .iter()
            .for_each(|&f| assert_relative_eq!(f, 16., epsilon = 1e-10));
        assert_relative_eq!(frame.image.sum(), 64., epsilon = 1e-9);
    }

    #[test]
    fn polar_complex() {
        let c = polar(2., PI / 2.);
        assert_relative_eq!(c.re, 0., epsilon = 1e-12);
        assert_relative_eq!(c.im, 2., epsilon = 1e-12);
        assert_relative_eq!(polar(0.5, 1.2).norm(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(polar(0.5, 1.2).arg(), 1.2, epsilon = 1e-12);
        // first column of the DFT kernel is the normalization constant
        let dft = dft_kernel(4, 8, 8);
        dft.column(0).iter().for_each(|c| {
            assert_relative_eq!(c.re, 8f64.sqrt().recip(), epsilon = 1e-12);
            assert_relative_eq!(c.im, 0., epsilon = 1e-12);
        });
    }

    #[test]
    fn cropped_field_of_view() {
        let wfs = Shwfs::builder(Pupil::square(16)).nsubx(2).fovx(4).build().unwrap();
        assert_eq!(wfs.padded_width(), 16);
        let frame = wfs.measure(&DMatrix::zeros(16, 16)).unwrap();
        assert_eq!(frame.subapertures.shape(), (4, 16));
        frame.flux().iter().for_each(|&f| assert!(f < 64.));
    }

    #[test]
    fn image_layout() {
        let mut pupil = DMatrix::repeat(8, 8, true);
        pupil.view_mut((0, 4), (4, 4)).fill(false);
        let wfs = Shwfs::builder(Pupil::new(pupil))
            .nsubx(2)
            .fovx(8)
            .build()
            .unwrap();
        let frame = wfs.measure(&DMatrix::zeros(8, 8)).unwrap();
        assert_eq!(frame.flux()[1], 0.);
        assert!(frame.flux()[0] > 0.);
        assert_eq!(frame.image.view((0, 8), (8, 8)).sum(), 0.);
    }

    #[test]
    fn tilt_moves_the_spot() {
        let wfs = Shwfs::builder(Pupil::square(8)).nsubx(1).fovx(8).build().unwrap();
        // a phase ramp of one wavelength across the padded width moves the spot by one
        // pixel, the centroid is biased low by the field of view truncation
        let lambda = 0.589;
        let phi = DMatrix::from_fn(8, 8, |_, col| lambda * col as f64 / 16.);
        let frame = wfs.measure(&phi).unwrap();
        let cog = ClassicCog::calibrate(8);
        let c = cog.cog(&frame.subapertures).unwrap();
        assert_relative_eq!(c[(0, 0)], 0.9337836319388663, epsilon = 1e-6);
        assert_relative_eq!(c[(0, 1)], 0., epsilon = 1e-9);
        let c = cog.cog(&wfs.measure(&-phi).unwrap().subapertures).unwrap();
        assert_relative_eq!(c[(0, 0)], -0.9337836319388663, epsilon = 1e-6);
    }

    #[test]
    fn end_to_end_flat_phase() {
        let pupil = Pupil::circle(32., 64);
        let wfs = Shwfs::builder(pupil).nsubx(32).fovx(8).build().unwrap();
        let frame = wfs.measure(&DMatrix::zeros(64, 64)).unwrap();
        assert_eq!(frame.image.shape(), (256, 256));
        let cog = ClassicCog::calibrate(8);
        let centroids = cog.cog(&frame.subapertures).unwrap();
        let flux = frame.flux();
        let valid = ValidSubapertures::from_flux(&flux, 0.9);
        for k in (0..wfs.n_subaperture()).filter(|&k| valid.is_valid(k)) {
            assert_relative_eq!(centroids[(k, 0)], 0., epsilon = 1e-9);
            assert_relative_eq!(centroids[(k, 1)], 0., epsilon = 1e-9);
            assert_relative_eq!(flux[k], 4., epsilon = 1e-9);
        }
    }

    #[test]
    fn flux_validity() {
        let radius = 32.;
        let pupil = Pupil::circle(radius, 64);
        let wfs = Shwfs::builder(pupil).nsubx(32).fovx(8).build().unwrap();
        let frame = wfs.measure(&DMatrix::zeros(64, 64)).unwrap();
        let valid = ValidSubapertures::from_flux(&frame.flux(), 0.9);
        // a 2x2 subaperture is fully illuminated if its farthest pixel center is in the pupil
        let expected = iproduct!(0..32, 0..32)
            .filter(|&(by, bx)| {
                let far = |b: usize| {
                    let lo = (2 * b) as f64 + 0.5 - 32.;
                    let hi = lo + 1.;
                    lo.abs().max(hi.abs())
                };
                far(by).powi(2) + far(bx).powi(2) <= radius * radius
            })
            .count();
        assert_eq!(expected, 780);
        assert_eq!(valid.count(), expected);
    }

    #[test]
    fn pixel_scale() {
        let wfs = Shwfs::builder(Pupil::circle(32., 64)).build().unwrap();
        // 0.589e-6/0.25 * 2/8 rad
        assert_relative_eq!(wfs.pixel_scale(), 0.589e-6 / 0.25 * 0.25 / ARCSEC);
    }

    #[test]
    fn invalid_geometry() {
        assert!(matches!(
            Shwfs::builder(Pupil::square(64)).nsubx(5).build(),
            Err(ShwfsError::Subapertures(64, 5))
        ));
        assert!(matches!(
            Shwfs::builder(Pupil::square(64)).fovx(7).build(),
            Err(ShwfsError::FieldOfView(7))
        ));
        let wfs = Shwfs::builder(Pupil::square(64)).build().unwrap();
        assert!(matches!(
            wfs.measure(&DMatrix::zeros(32, 32)),
            Err(ShwfsError::PhaseShape { .. })
        ));
    }
}
