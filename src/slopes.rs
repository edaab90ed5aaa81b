//! Valid subapertures and slope vectors

use nalgebra::DMatrix;

#[derive(Debug, thiserror::Error)]
pub enum SlopesError {
    #[error("expected a ({expected}x2) centroids matrix, found ({rows}x{cols})")]
    Centroids {
        expected: usize,
        rows: usize,
        cols: usize,
    },
    #[error("a {0} subapertures mask is not square")]
    Mask(usize),
}
type Result<T> = std::result::Result<T, SlopesError>;

/// Fraction of the brightest subaperture flux a subaperture must exceed to be valid
pub const FLUX_FRACTION: f64 = 0.9;

/// Subapertures selection
///
/// Subapertures are indexed with `k = by N + bx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSubapertures {
    mask: Vec<bool>,
}
impl ValidSubapertures {
    /// Selects the subapertures with a flux greater than `fraction` of the maximum flux
    pub fn from_flux(flux: &[f64], fraction: f64) -> Self {
        let max_flux = flux.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let threshold = fraction * max_flux;
        Self {
            mask: flux.iter().map(|&f| f > threshold).collect(),
        }
    }
    /// Subapertures selection from a validity mask, non zero for valid subapertures
    pub fn from_mask(mask: &[u8]) -> Self {
        Self {
            mask: mask.iter().map(|&v| v != 0).collect(),
        }
    }
    /// Validity mask, 1 for valid subapertures
    pub fn mask(&self) -> Vec<u8> {
        self.mask.iter().map(|&v| v as u8).collect()
    }
    /// Number of valid subapertures
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }
    pub fn len(&self) -> usize {
        self.mask.len()
    }
    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }
    pub fn is_valid(&self, k: usize) -> bool {
        self.mask.get(k).copied().unwrap_or(false)
    }
    /// Iterator over the indices of the valid subapertures
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask
            .iter()
            .enumerate()
            .filter_map(|(k, &v)| v.then_some(k))
    }
    /// `(bx,by)` grid coordinates of the valid subapertures in slope vector order
    pub fn coordinates(&self) -> Result<Vec<(usize, usize)>> {
        let n = self.mask.len();
        let nsubx = (n as f64).sqrt().round() as usize;
        if nsubx * nsubx != n {
            return Err(SlopesError::Mask(n));
        }
        Ok(self.indices().map(|k| (k % nsubx, k / nsubx)).collect())
    }
    /// Packs the `(x,y)` centroids of the valid subapertures into a slope vector
    ///
    /// The x slopes of all the valid subapertures come first followed by the y slopes,
    /// each scaled by `scale`. The centroids must have one row per subaperture.
    pub fn pack(&self, centroids: &DMatrix<f64>, scale: f64) -> Result<Vec<f32>> {
        if centroids.shape() != (self.mask.len(), 2) {
            return Err(SlopesError::Centroids {
                expected: self.mask.len(),
                rows: centroids.nrows(),
                cols: centroids.ncols(),
            });
        }
        let valid: Vec<usize> = self.indices().collect();
        Ok((0..2)
            .flat_map(|axis| valid.iter().map(move |&k| (axis, k)))
            .map(|(axis, k)| (centroids[(k, axis)] * scale) as f32)
            .collect())
    }
}
