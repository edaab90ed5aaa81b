//! Center of gravity centroiding

use nalgebra::DMatrix;

#[derive(Debug, thiserror::Error)]
pub enum CentroidError {
    #[error("expected images of {expected} pixels, found {found}")]
    ImageSize { expected: usize, found: usize },
}
type Result<T> = std::result::Result<T, CentroidError>;

/// Thresholded center of gravity
///
/// Images are `npix`×`npix` and centroids are given in pixels from the image center,
/// `x` along the columns and `y` along the rows.
#[derive(Debug, Clone)]
pub struct ClassicCog {
    npix: usize,
    // pixel coordinates: (npix², 2), columns are x and y
    xy_mat: DMatrix<f64>,
    threshold: Option<f64>,
}
impl ClassicCog {
    /// Calibrates the centroider for `npix`×`npix` images with a zero background threshold
    pub fn calibrate(npix: usize) -> Self {
        let offset = npix as f64 / 2. - 0.5;
        let xy_mat = DMatrix::from_fn(npix * npix, 2, |p, axis| match axis {
            0 => (p % npix) as f64 - offset,
            _ => (p / npix) as f64 - offset,
        });
        Self {
            npix,
            xy_mat,
            threshold: Some(0.),
        }
    }
    /// Sets the background threshold, `None` disables the thresholding
    pub fn with_threshold(self, threshold: Option<f64>) -> Self {
        Self { threshold, ..self }
    }
    pub fn npix(&self) -> usize {
        self.npix
    }
    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }
    /// Centroids of a batch of images
    ///
    /// Each row of `intensity` is a row-major flattened image. The returned matrix has
    /// one `(x,y)` row per image; the centroid of an image with no flux left after
    /// thresholding is `NaN`.
    pub fn cog(&self, intensity: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let expected = self.npix * self.npix;
        if intensity.ncols() != expected {
            return Err(CentroidError::ImageSize {
                expected,
                found: intensity.ncols(),
            });
        }
        let weights = match self.threshold {
            Some(threshold) => intensity.map(|i| (i - threshold).max(0.)),
            None => intensity.clone(),
        };
        let mut centroids = &weights * &self.xy_mat;
        for (mut centroid, image) in centroids.row_iter_mut().zip(weights.row_iter()) {
            let flux = image.sum();
            if flux > 0. {
                centroid /= flux;
            } else {
                centroid.fill(f64::NAN);
            }
        }
        Ok(centroids)
    }
    /// Centroid of a single `npix`×`npix` image
    pub fn cog_image(&self, image: &DMatrix<f64>) -> Result<(f64, f64)> {
        if image.shape() != (self.npix, self.npix) {
            return Err(CentroidError::ImageSize {
                expected: self.npix * self.npix,
                found: image.len(),
            });
        }
        let row = DMatrix::from_iterator(1, image.len(), image.transpose().iter().copied());
        let c = self.cog(&row)?;
        Ok((c[(0, 0)], c[(0, 1)]))
    }
}
