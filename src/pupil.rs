//! Telescope pupil
//!
//! Boolean aperture mask and the ordered set of physical coordinates of its active points.

use itertools::iproduct;
use nalgebra::{DMatrix, DVector};

/// Pupil mask over a square grid
///
/// Rows are along the y axis and columns along the x axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Pupil(DMatrix<bool>);
impl Pupil {
    /// Creates a pupil from a boolean mask
    pub fn new(mask: DMatrix<bool>) -> Self {
        Self(mask)
    }
    /// Circular aperture of radius `radius` pixels inscribed in a `width`×`width` grid
    ///
    /// A pixel is active if its center lies within the circle.
    pub fn circle(radius: f64, width: usize) -> Self {
        let half = width as f64 / 2.;
        let r2 = radius * radius;
        Self(DMatrix::from_fn(width, width, |row, col| {
            let x = col as f64 + 0.5 - half;
            let y = row as f64 + 0.5 - half;
            x * x + y * y <= r2
        }))
    }
    /// Fully open square aperture
    pub fn square(width: usize) -> Self {
        Self(DMatrix::repeat(width, width, true))
    }
    /// Returns the mask
    pub fn mask(&self) -> &DMatrix<bool> {
        &self.0
    }
    /// Returns the grid width
    pub fn width(&self) -> usize {
        self.0.nrows()
    }
    pub fn is_square(&self) -> bool {
        self.0.nrows() == self.0.ncols()
    }
    /// Number of active points
    pub fn n_active(&self) -> usize {
        self.0.iter().filter(|&&m| m).count()
    }
    /// Iterator over the (row,col) indices of the active points
    ///
    /// The order is row-major (x varies fastest) and is the order used by every
    /// vector indexed by pupil point.
    pub fn active(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        iproduct!(0..self.0.nrows(), 0..self.0.ncols()).filter(|&(row, col)| self.0[(row, col)])
    }
    /// Physical (x,y) coordinates of the active points for a grid of `pixsize` meters
    pub fn positions(&self, pixsize: f64) -> PositionSet {
        PositionSet(
            self.active()
                .map(|(row, col)| (col as f64 * pixsize, row as f64 * pixsize))
                .collect(),
        )
    }
    /// Gathers the active points of a map into a vector
    pub fn gather(&self, map: &DMatrix<f64>) -> DVector<f64> {
        DVector::from_iterator(self.n_active(), self.active().map(|idx| map[idx]))
    }
    /// Scatters a vector onto the pupil grid, zero outside the mask
    pub fn scatter(&self, values: &DVector<f64>) -> DMatrix<f64> {
        let mut map = DMatrix::zeros(self.0.nrows(), self.0.ncols());
        self.active()
            .zip(values.iter())
            .for_each(|(idx, &v)| map[idx] = v);
        map
    }
    /// Returns the mask as a 0/1 valued map
    pub fn as_f64(&self) -> DMatrix<f64> {
        self.0.map(|m| if m { 1f64 } else { 0f64 })
    }
}

/// Ordered (x,y) coordinates [m] of the active pupil points
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PositionSet(Vec<(f64, f64)>);
impl PositionSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &(f64, f64)> {
        self.0.iter()
    }
    /// Returns a copy of the positions translated by `(dx,dy)`
    pub fn shifted(&self, dx: f64, dy: f64) -> Self {
        Self(self.0.iter().map(|&(x, y)| (x + dx, y + dy)).collect())
    }
    pub fn as_slice(&self) -> &[(f64, f64)] {
        self.0.as_slice()
    }
}
