//! Autoregressive turbulence phase screen
//!
//! The phase over the active pupil points evolves according to
//! `x ← A x + Fvv v` where `A ≈ Σyx Σxx⁺` is the linear predictor of the next phase
//! under frozen flow with lamination, and `Fvv` is the square root of the
//! innovation covariance `Σvv = Σxx − A Σxx Aᵀ`.
//!
//! The state vector is mutated in place by [PhaseScreen::step]; it must not be read by
//! another thread while a step is in progress.

use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::{f64::consts::PI, time::Instant};

use crate::{
    covariance::{covariance_matrix, CovarianceKernel, VonKarman},
    factorization::{factorize, Factorization, FactorizationError, Truncation},
    pupil::{PositionSet, Pupil},
    state_matrix::{StateMatrix, Strategy},
};

/// Conversion factor from phase variance in rad² at 0.5 micron to OPD variance in micron²
pub const RAD2_TO_MICRON2: f64 = (0.5 / (2. * PI)) * (0.5 / (2. * PI));

#[derive(Debug, thiserror::Error)]
pub enum PhaseScreenError {
    #[error("invalid phase screen parameter `{0}`: {1}")]
    Parameter(&'static str, String),
    #[error("the pupil is not square ({0}x{1})")]
    PupilShape(usize, usize),
    #[error("the pupil has no active point")]
    EmptyPupil,
    #[error("failed to factor the phase covariance")]
    CovarianceXX(#[source] FactorizationError),
    #[error("failed to factor the innovation covariance")]
    CovarianceVV(#[source] FactorizationError),
}
type Result<T> = std::result::Result<T, PhaseScreenError>;

/// [PhaseScreen] builder
pub struct PhaseScreenBuilder {
    pupil: Pupil,
    r0: f64,
    l0: f64,
    diam: f64,
    laminar: f64,
    wind: [f64; 2],
    ittime: f64,
    truncation_xx: Truncation,
    truncation_vv: Truncation,
    seed: u64,
    strategy: Option<Strategy>,
    kernel: Option<Box<dyn CovarianceKernel>>,
}
impl PhaseScreenBuilder {
    fn new(pupil: Pupil) -> Self {
        Self {
            pupil,
            r0: 0.15,
            l0: 25.,
            diam: 8.,
            laminar: 0.995,
            wind: [10., 20.],
            ittime: 1. / 500.,
            truncation_xx: Truncation::default(),
            truncation_vv: Truncation::default(),
            seed: 1234,
            strategy: None,
            kernel: None,
        }
    }
    /// Fried parameter at 0.5 micron [m]
    pub fn r0(self, r0: f64) -> Self {
        Self { r0, ..self }
    }
    /// Outer scale [m]
    pub fn outer_scale(self, l0: f64) -> Self {
        Self { l0, ..self }
    }
    /// Pupil diameter [m]
    pub fn diameter(self, diam: f64) -> Self {
        Self { diam, ..self }
    }
    /// Fraction of the frozen flow correlation retained per step
    pub fn laminar(self, laminar: f64) -> Self {
        Self { laminar, ..self }
    }
    /// Wind velocity `[vx,vy]` [m/s]
    pub fn wind(self, wind: [f64; 2]) -> Self {
        Self { wind, ..self }
    }
    /// Time step [s]
    pub fn ittime(self, ittime: f64) -> Self {
        Self { ittime, ..self }
    }
    /// Truncation of the phase covariance eigen modes
    pub fn truncation_xx(self, truncation_xx: Truncation) -> Self {
        Self {
            truncation_xx,
            ..self
        }
    }
    /// Truncation of the innovation covariance eigen modes
    pub fn truncation_vv(self, truncation_vv: Truncation) -> Self {
        Self {
            truncation_vv,
            ..self
        }
    }
    /// Random generator seed
    pub fn seed(self, seed: u64) -> Self {
        Self { seed, ..self }
    }
    /// Forces the state matrix evaluation strategy instead of benchmarking
    pub fn strategy(self, strategy: Strategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..self
        }
    }
    /// Replaces the von Kármán covariance kernel
    pub fn kernel<K: CovarianceKernel + 'static>(self, kernel: K) -> Self {
        Self {
            kernel: Some(Box::new(kernel)),
            ..self
        }
    }
    fn validate(&self) -> Result<()> {
        let positive = [
            ("r0", self.r0),
            ("L0", self.l0),
            ("diam", self.diam),
            ("ittime", self.ittime),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.) {
                return Err(PhaseScreenError::Parameter(
                    name,
                    format!("{value}, expected a finite positive value"),
                ));
            }
        }
        if !(self.laminar > 0. && self.laminar <= 1.) {
            return Err(PhaseScreenError::Parameter(
                "laminar",
                format!("{}, expected a value in ]0,1]", self.laminar),
            ));
        }
        if !self.wind.iter().all(|v| v.is_finite()) {
            return Err(PhaseScreenError::Parameter(
                "wind",
                format!("{:?}, expected finite values", self.wind),
            ));
        }
        if !self.pupil.is_square() {
            let (n, m) = self.pupil.mask().shape();
            return Err(PhaseScreenError::PupilShape(n, m));
        }
        if self.pupil.n_active() == 0 {
            return Err(PhaseScreenError::EmptyPupil);
        }
        self.truncation_xx
            .validate()
            .map_err(PhaseScreenError::CovarianceXX)?;
        self.truncation_vv
            .validate()
            .map_err(PhaseScreenError::CovarianceVV)?;
        Ok(())
    }
    /// Builds the phase screen model and draws the initial phase
    pub fn build(self) -> Result<PhaseScreen> {
        self.validate()?;
        let now = Instant::now();
        let kernel = self
            .kernel
            .unwrap_or_else(|| -> Box<dyn CovarianceKernel> {
                Box::new(VonKarman::new(self.r0, self.l0))
            });

        let pixsize = self.diam / self.pupil.width() as f64;
        let positions = self.pupil.positions(pixsize);
        log::info!(
            "phase screen: {} active points, {:.3}m pixels",
            positions.len(),
            pixsize
        );

        let cov_xx = covariance_matrix(kernel.as_ref(), &positions, &positions) * RAD2_TO_MICRON2;
        let factor_xx =
            factorize(&cov_xx, self.truncation_xx).map_err(PhaseScreenError::CovarianceXX)?;
        log::info!(
            "phase covariance: {} modes retained ({:.3}s)",
            factor_xx.n_mode(),
            now.elapsed().as_secs_f64()
        );

        let [vx, vy] = self.wind;
        let cov_yx = covariance_matrix(
            kernel.as_ref(),
            &positions.shifted(vx * self.ittime, vy * self.ittime),
            &positions,
        ) * (self.laminar * RAD2_TO_MICRON2);
        let state_matrix = match self.strategy {
            Some(strategy) => StateMatrix::with_strategy(&cov_yx, &factor_xx.inverse, strategy),
            None => StateMatrix::new(&cov_yx, &factor_xx.inverse),
        };

        let a_cov_xx = state_matrix.dot_batch(&cov_xx);
        let a_cov_xx_at = state_matrix.dot_batch(&a_cov_xx.transpose()).transpose();
        let cov_vv = &cov_xx - a_cov_xx_at;
        let cov_vv = (&cov_vv + cov_vv.transpose()) * 0.5;
        let factor_vv =
            factorize(&cov_vv, self.truncation_vv).map_err(PhaseScreenError::CovarianceVV)?;
        log::info!(
            "innovation covariance: {} modes retained ({:.3}s)",
            factor_vv.n_mode(),
            now.elapsed().as_secs_f64()
        );

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let z = DVector::<f64>::from_distribution(factor_xx.n_mode(), &StandardNormal, &mut rng);
        let x = &factor_xx.factor * z;

        Ok(PhaseScreen {
            pupil: self.pupil,
            positions,
            cov_xx,
            factor_xx,
            factor_vv,
            state_matrix,
            x,
            rng,
        })
    }
}

/// Temporally correlated turbulence phase over the pupil
#[derive(Debug)]
pub struct PhaseScreen {
    pupil: Pupil,
    positions: PositionSet,
    cov_xx: DMatrix<f64>,
    factor_xx: Factorization,
    factor_vv: Factorization,
    state_matrix: StateMatrix,
    x: DVector<f64>,
    rng: ChaCha8Rng,
}
impl PhaseScreen {
    /// Returns a [PhaseScreenBuilder] for the given pupil
    pub fn builder(pupil: Pupil) -> PhaseScreenBuilder {
        PhaseScreenBuilder::new(pupil)
    }
    /// Advances the phase by one time step
    pub fn step(&mut self) {
        let v = DVector::<f64>::from_distribution(
            self.factor_vv.n_mode(),
            &StandardNormal,
            &mut self.rng,
        );
        self.x = self.state_matrix.dot(&self.x) + &self.factor_vv.factor * v;
    }
    /// Phase map [micron], zero outside the pupil
    pub fn phase(&self) -> DMatrix<f64> {
        self.pupil.scatter(&self.x)
    }
    /// Phase [micron] at the active pupil points
    pub fn state(&self) -> &DVector<f64> {
        &self.x
    }
    pub fn pupil(&self) -> &Pupil {
        &self.pupil
    }
    pub fn positions(&self) -> &PositionSet {
        &self.positions
    }
    /// Phase covariance [micron²]
    pub fn covariance_xx(&self) -> &DMatrix<f64> {
        &self.cov_xx
    }
    pub fn factor_xx(&self) -> &Factorization {
        &self.factor_xx
    }
    pub fn factor_vv(&self) -> &Factorization {
        &self.factor_vv
    }
    pub fn state_matrix(&self) -> &StateMatrix {
        &self.state_matrix
    }
    /// Standard deviation [micron] of the phase over the pupil
    pub fn rms(&self) -> f64 {
        let n = self.x.len() as f64;
        let mean = self.x.mean();
        (self.x.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn builder() -> PhaseScreenBuilder {
        PhaseScreen::builder(Pupil::circle(4., 8))
            .diameter(2.)
            .truncation_xx(Truncation::Threshold(1e-4))
            .truncation_vv(Truncation::Threshold(1e-8))
    }

    #[test]
    fn phase_map() {
        let screen = builder().build().unwrap();
        let phi = screen.phase();
        assert_eq!(phi.shape(), (8, 8));
        assert_eq!(phi[(0, 0)], 0.);
        assert_eq!(screen.pupil().gather(&phi), *screen.state());
        assert_eq!(screen.state().len(), screen.pupil().n_active());
    }

    #[test]
    fn deterministic() {
        let mut a = builder().seed(42).strategy(Strategy::Classic).build().unwrap();
        let mut b = builder().seed(42).strategy(Strategy::Factored).build().unwrap();
        for _ in 0..50 {
            a.step();
            b.step();
        }
        let scale = a.state().norm();
        assert_relative_eq!(a.state().clone(), b.state().clone(), epsilon = 1e-8 * scale);

        let mut c = builder().seed(42).strategy(Strategy::Classic).build().unwrap();
        (0..50).for_each(|_| c.step());
        assert_eq!(a.state(), c.state());

        let d = builder().seed(43).build().unwrap();
        assert!((d.state() - builder().seed(42).build().unwrap().state()).norm() > 0.);
    }

    #[test]
    fn stationary_statistics() {
        let mut screen = builder()
            .laminar(0.5)
            .wind([50., 0.])
            .strategy(Strategy::Classic)
            .build()
            .unwrap();
        let reference = &screen.factor_xx().factor * screen.factor_xx().factor.transpose();
        let n = screen.state().len();
        let n_step = 4000;
        let mut sample = DMatrix::<f64>::zeros(n, n);
        for _ in 0..n_step {
            screen.step();
            let x = screen.state();
            sample += x * x.transpose();
        }
        sample /= n_step as f64;
        let trace_error = (sample.trace() - reference.trace()).abs() / reference.trace();
        assert!(trace_error < 0.15, "trace error: {trace_error}");
        let error = (&sample - &reference).norm() / reference.norm();
        assert!(error < 0.3, "covariance error: {error}");
    }

    #[test]
    fn invalid_parameters() {
        assert!(matches!(
            builder().laminar(1.5).build(),
            Err(PhaseScreenError::Parameter("laminar", _))
        ));
        assert!(matches!(
            builder().r0(-0.1).build(),
            Err(PhaseScreenError::Parameter("r0", _))
        ));
        assert!(matches!(
            builder().truncation_xx(Truncation::Modes(0)).build(),
            Err(PhaseScreenError::CovarianceXX(FactorizationError::ZeroModes))
        ));
        assert!(matches!(
            builder().truncation_xx(Truncation::Threshold(1e9)).build(),
            Err(PhaseScreenError::CovarianceXX(
                FactorizationError::NoModeLeft(..)
            ))
        ));
        assert!(matches!(
            PhaseScreen::builder(Pupil::new(DMatrix::repeat(4, 4, false))).build(),
            Err(PhaseScreenError::EmptyPupil)
        ));
    }

    #[test]
    fn mode_count_truncation() {
        let screen = builder()
            .truncation_xx(Truncation::Modes(12))
            .truncation_vv(Truncation::Modes(5))
            .build()
            .unwrap();
        assert_eq!(screen.factor_xx().n_mode(), 12);
        assert_eq!(screen.factor_vv().n_mode(), 5);
        assert_eq!(screen.state_matrix().rank(), 12);
    }
}
