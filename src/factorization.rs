//! Truncated square root of symmetric covariance matrices
//!
//! A covariance matrix `Σ = V Λ Vᵀ` is factored into `F = V_r Λ_r^½` and
//! `F⁻ = V_r Λ_r^-½` where `r` is the set of retained eigen modes.
//! `F Fᵀ` is the covariance restricted to the retained modes and `F F⁻ᵀ` is the
//! orthogonal projector onto them.

use nalgebra::{DMatrix, DVector, SymmetricEigen};

#[derive(Debug, thiserror::Error)]
pub enum FactorizationError {
    #[error("the covariance matrix is not square ({0}x{1})")]
    NotSquare(usize, usize),
    #[error("invalid eigen value threshold {0}, expected a finite positive value")]
    Threshold(f64),
    #[error("the number of modes must be greater than 0")]
    ZeroModes,
    #[error("{0} modes requested but the covariance has only {1}")]
    TooManyModes(usize, usize),
    #[error("no eigen value above the threshold {0} (largest: {1})")]
    NoModeLeft(f64, f64),
    #[error("degenerate covariance, no eigen value above the numerical floor {0}")]
    Degenerate(f64),
}
type Result<T> = std::result::Result<T, FactorizationError>;

/// Eigen modes truncation policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Truncation {
    /// keep the modes with an eigen value strictly greater than the threshold
    Threshold(f64),
    /// keep the given number of modes with the largest eigen values
    Modes(usize),
}
impl Default for Truncation {
    fn default() -> Self {
        Truncation::Threshold(1e-5)
    }
}
impl Truncation {
    /// Checks the policy independently of any covariance
    pub fn validate(&self) -> Result<()> {
        match *self {
            Truncation::Threshold(t) if !t.is_finite() || t < 0. => {
                Err(FactorizationError::Threshold(t))
            }
            Truncation::Modes(0) => Err(FactorizationError::ZeroModes),
            _ => Ok(()),
        }
    }
}

/// Truncated square root factorization
#[derive(Debug, Clone)]
pub struct Factorization {
    /// eigen vectors scaled by the square root of the eigen values
    pub factor: DMatrix<f64>,
    /// eigen vectors scaled by the inverse square root of the eigen values
    pub inverse: DMatrix<f64>,
    /// retained eigen values in decreasing order
    pub eigen_values: DVector<f64>,
}
impl Factorization {
    /// Number of retained modes
    pub fn n_mode(&self) -> usize {
        self.factor.ncols()
    }
    /// Orthogonal projector onto the retained modes
    pub fn projector(&self) -> DMatrix<f64> {
        &self.factor * self.inverse.transpose()
    }
}

/// Factors the symmetric `covariance` matrix according to the `truncation` policy
///
/// Eigen values below the numerical floor `ε n λ_max` are never retained.
pub fn factorize(covariance: &DMatrix<f64>, truncation: Truncation) -> Result<Factorization> {
    let (n, m) = covariance.shape();
    if n != m {
        return Err(FactorizationError::NotSquare(n, m));
    }
    truncation.validate()?;
    if let Truncation::Modes(k) = truncation {
        if k > n {
            return Err(FactorizationError::TooManyModes(k, n));
        }
    }

    let eigen = SymmetricEigen::new(covariance.clone());
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[j].total_cmp(&eigen.eigenvalues[i]));

    let lambda_max = order
        .first()
        .map(|&i| eigen.eigenvalues[i])
        .unwrap_or_default();
    let floor = lambda_max.max(0.) * f64::EPSILON * n as f64;
    let n_floor = order
        .iter()
        .take_while(|&&i| eigen.eigenvalues[i] > floor)
        .count();
    if n_floor == 0 {
        return Err(FactorizationError::Degenerate(floor));
    }

    let n_kept = match truncation {
        Truncation::Threshold(t) => {
            let n_kept = order
                .iter()
                .take_while(|&&i| eigen.eigenvalues[i] > t)
                .count()
                .min(n_floor);
            if n_kept == 0 {
                return Err(FactorizationError::NoModeLeft(t, lambda_max));
            }
            n_kept
        }
        Truncation::Modes(k) => {
            if k > n_floor {
                log::warn!(
                    "{} of the {} requested modes are below the numerical floor {:.3e} and are dropped",
                    k - n_floor,
                    k,
                    floor
                );
            }
            k.min(n_floor)
        }
    };
    log::debug!("factorization: {n_kept}/{n} modes retained");

    let kept = &order[..n_kept];
    let eigen_values = DVector::from_iterator(n_kept, kept.iter().map(|&i| eigen.eigenvalues[i]));
    let vectors = eigen.eigenvectors.select_columns(kept);
    let mut factor = vectors.clone();
    let mut inverse = vectors;
    for (k, &lambda) in eigen_values.iter().enumerate() {
        let sqrt_lambda = lambda.sqrt();
        factor.column_mut(k).scale_mut(sqrt_lambda);
        inverse.column_mut(k).scale_mut(sqrt_lambda.recip());
    }
    Ok(Factorization {
        factor,
        inverse,
        eigen_values,
    })
}
