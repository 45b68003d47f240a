//! Affine maps from reference simplices to world coordinates.

use nalgebra as na;

use crate::GridError;

/// Tolerance for [`Geometry::check_inside`].
const INSIDE_TOLERANCE: f64 = 1e-12;

/// The affine map from the reference simplex of dimension `mydim`
/// onto a simplex with the given corners in `WDIM`-dimensional space.
///
/// The reference simplex has its corners at the origin and the unit vectors,
/// so the map is `x = c_0 + J ξ`
/// where column `i` of the Jacobian `J` is `c_{i+1} - c_0`.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry<const WDIM: usize> {
    corners: Vec<na::SVector<f64, WDIM>>,
}

impl<const WDIM: usize> Geometry<WDIM> {
    /// Create a geometry from its corners in local vertex order.
    ///
    /// # Panics
    ///
    /// If there are no corners or more than `WDIM + 1` of them.
    pub fn new(corners: Vec<na::SVector<f64, WDIM>>) -> Self {
        assert!(
            !corners.is_empty() && corners.len() <= WDIM + 1,
            "a simplex in {WDIM}D space has 1 to {} corners, got {}",
            WDIM + 1,
            corners.len()
        );
        Self { corners }
    }

    /// The full-dimensional reference simplex itself.
    pub fn reference() -> Self {
        let mut corners = vec![na::SVector::zeros()];
        corners.extend((0..WDIM).map(|i| na::SVector::from_fn(|j, _| if j == i { 1.0 } else { 0.0 })));
        Self { corners }
    }

    /// Dimension of the simplex.
    #[inline]
    pub fn mydim(&self) -> usize {
        self.corners.len() - 1
    }

    /// Dimension of the space the simplex lives in.
    #[inline]
    pub const fn coorddim(&self) -> usize {
        WDIM
    }

    /// Simplices are always mapped affinely.
    #[inline]
    pub const fn affine(&self) -> bool {
        true
    }

    /// Number of corners.
    #[inline]
    pub fn corner_count(&self) -> usize {
        self.corners.len()
    }

    /// A corner in world coordinates.
    #[inline]
    pub fn corner(&self, i: usize) -> na::SVector<f64, WDIM> {
        self.corners[i]
    }

    /// All corners in local vertex order.
    #[inline]
    pub fn corners(&self) -> &[na::SVector<f64, WDIM>] {
        &self.corners
    }

    /// The barycenter.
    pub fn center(&self) -> na::SVector<f64, WDIM> {
        self.corners.iter().sum::<na::SVector<f64, WDIM>>() / self.corners.len() as f64
    }

    /// The `WDIM × mydim` Jacobian of the map.
    pub fn jacobian(&self) -> na::DMatrix<f64> {
        let c0 = self.corners[0];
        na::DMatrix::from_fn(WDIM, self.mydim(), |row, col| {
            self.corners[col + 1][row] - c0[row]
        })
    }

    /// Map a point from reference coordinates to world coordinates.
    pub fn global(&self, local: &[f64]) -> na::SVector<f64, WDIM> {
        debug_assert_eq!(local.len(), self.mydim());
        let c0 = self.corners[0];
        self.corners[1..]
            .iter()
            .zip(local)
            .fold(c0, |x, (c, &xi)| x + (c - c0) * xi)
    }

    /// Map a point from world coordinates back to reference coordinates.
    ///
    /// For simplices of lower dimension than the world
    /// this gives the reference coordinates of the point's orthogonal projection
    /// onto the simplex's affine hull.
    pub fn local(&self, global: &na::SVector<f64, WDIM>) -> Result<na::DVector<f64>, GridError> {
        let jit = self.jacobian_inverse_transposed()?;
        let diff = na::DVector::from_column_slice((global - self.corners[0]).as_slice());
        Ok(jit.transpose() * diff)
    }

    /// The volume scaling factor `sqrt(det(JᵀJ))` of the map.
    pub fn integration_element(&self) -> f64 {
        if self.mydim() == 0 {
            return 1.0;
        }
        let j = self.jacobian();
        f64::sqrt((j.transpose() * &j).determinant().max(0.0))
    }

    /// The `mydim`-dimensional volume of the simplex.
    /// Points have a volume of 1.
    pub fn volume(&self) -> f64 {
        let factorial: usize = (1..=self.mydim()).product();
        self.integration_element() / factorial as f64
    }

    /// The transposed (pseudo-)inverse `J (JᵀJ)⁻¹` of the Jacobian,
    /// which maps reference gradients to world gradients.
    ///
    /// For `mydim == WDIM` this is the ordinary inverse transpose.
    /// For lower-dimensional simplices it's the transpose
    /// of the Moore-Penrose pseudo-inverse.
    pub fn jacobian_inverse_transposed(&self) -> Result<na::DMatrix<f64>, GridError> {
        if self.mydim() == 0 {
            return Ok(na::DMatrix::zeros(WDIM, 0));
        }
        let j = self.jacobian();
        let gram_inv = (j.transpose() * &j)
            .try_inverse()
            .ok_or(GridError::DegenerateGeometry)?;
        Ok(j * gram_inv)
    }

    /// Check whether reference coordinates lie in the reference simplex.
    pub fn check_inside(&self, local: &[f64]) -> bool {
        local.iter().all(|&xi| xi >= -INSIDE_TOLERANCE)
            && local.iter().sum::<f64>() <= 1.0 + INSIDE_TOLERANCE
    }
}
