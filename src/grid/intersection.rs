use std::rc::Rc;

use nalgebra as na;

use super::{AdaptiveGrid, Entity};
use crate::{
    traverse::{ElInfo, TraverseMode},
    Geometry, GridError,
};

/// The face of an element seen as the interface to its neighbour
/// or to the domain boundary.
///
/// Faces are numbered by their opposite vertex.
#[derive(Clone, Debug)]
pub struct Intersection<'g, const DIM: usize, const WDIM: usize> {
    grid: &'g AdaptiveGrid<DIM, WDIM>,
    info: Rc<ElInfo<WDIM>>,
    mode: TraverseMode,
    face: usize,
}

impl<'g, const DIM: usize, const WDIM: usize> Intersection<'g, DIM, WDIM> {
    /// Whether there is an element on the other side.
    #[inline]
    pub fn neighbor(&self) -> bool {
        self.info.neighbours[self.face].is_some()
    }

    /// Whether the face is on the domain boundary.
    #[inline]
    pub fn boundary(&self) -> bool {
        !self.neighbor()
    }

    /// Boundary id of the face, `None` in the interior.
    #[inline]
    pub fn boundary_id(&self) -> Option<i32> {
        self.info.boundary[self.face]
    }

    /// Local number of the face in the inside element.
    #[inline]
    pub fn number_in_self(&self) -> usize {
        self.face
    }

    /// Local number of the face in the outside element,
    /// which is the number of the outside vertex opposite to it.
    #[inline]
    pub fn number_in_neighbor(&self) -> Option<usize> {
        self.info.opp_vertex[self.face]
    }

    /// The element this intersection belongs to.
    pub fn inside(&self) -> Entity<'g, DIM, WDIM> {
        Entity {
            grid: self.grid,
            info: Rc::clone(&self.info),
            mode: self.mode,
            codim: 0,
            local: 0,
        }
    }

    /// The element on the other side, if there is one.
    pub fn outside(&self) -> Option<Entity<'g, DIM, WDIM>> {
        let nb = self.info.neighbours[self.face]?;
        Some(Entity::element_from_index(self.grid, nb, self.mode))
    }

    /// The face as a simplex in world coordinates.
    pub fn geometry(&self) -> Geometry<WDIM> {
        Geometry::new(
            self.info
                .coords
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != self.face)
                .map(|(_, c)| *c)
                .collect(),
        )
    }

    /// The face in the reference coordinates of the inside element,
    /// with corners in the same order as [`geometry`][Self::geometry].
    pub fn intersection_self_local(&self) -> Geometry<DIM> {
        Geometry::new(
            Geometry::<DIM>::reference()
                .corners()
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != self.face)
                .map(|(_, c)| *c)
                .collect(),
        )
    }

    /// The face in the reference coordinates of the outside element,
    /// with corners in the same order as [`geometry`][Self::geometry].
    /// `None` on the domain boundary.
    ///
    /// If the outside element is coarser,
    /// this only covers the part of its face that the inside element touches.
    pub fn intersection_neighbor_local(&self) -> Result<Option<Geometry<DIM>>, GridError> {
        let Some(outside) = self.outside() else {
            return Ok(None);
        };
        let outside = outside.geometry();
        let corners = self
            .geometry()
            .corners()
            .iter()
            .map(|c| {
                let local = outside.local(c)?;
                Ok(na::SVector::from_iterator(local.iter().copied()))
            })
            .collect::<Result<Vec<_>, GridError>>()?;
        Ok(Some(Geometry::new(corners)))
    }

    /// Whether the outside element is on the same level as the inside one.
    /// `false` on the domain boundary.
    pub fn neighbor_has_same_level(&self) -> bool {
        self.info.neighbours[self.face]
            .is_some_and(|nb| self.grid.mesh.element(nb).level == self.info.level)
    }

    /// An outward normal vector of unspecified length.
    ///
    /// Normals are constant over each face since elements are affine.
    /// For elements of lower dimension than the world the normal lies
    /// in the element's tangent space.
    pub fn outer_normal(&self) -> Result<na::SVector<f64, WDIM>, GridError> {
        let element = Geometry::new(self.info.coords.clone());
        let jit = element.jacobian_inverse_transposed()?;
        // outward normal of the reference simplex's face
        let reference_normal = if self.face == 0 {
            na::DVector::from_element(DIM, 1.0)
        } else {
            let mut n = na::DVector::zeros(DIM);
            n[self.face - 1] = -1.0;
            n
        };
        let n = jit * reference_normal;
        Ok(na::SVector::from_iterator(n.iter().copied()))
    }

    /// The outward unit normal.
    pub fn unit_outer_normal(&self) -> Result<na::SVector<f64, WDIM>, GridError> {
        Ok(self.outer_normal()?.normalize())
    }

    /// The outward normal scaled with the integration element of the face.
    pub fn integration_outer_normal(&self) -> Result<na::SVector<f64, WDIM>, GridError> {
        Ok(self.unit_outer_normal()? * self.geometry().integration_element())
    }
}

/// Iterator over the intersections of an element.
#[derive(Clone, Debug)]
pub struct IntersectionIter<'g, const DIM: usize, const WDIM: usize> {
    grid: &'g AdaptiveGrid<DIM, WDIM>,
    info: Rc<ElInfo<WDIM>>,
    mode: TraverseMode,
    next_face: usize,
    face_count: usize,
}

impl<'g, const DIM: usize, const WDIM: usize> IntersectionIter<'g, DIM, WDIM> {
    pub(super) fn new(element: &Entity<'g, DIM, WDIM>) -> Self {
        Self {
            grid: element.grid,
            info: Rc::clone(&element.info),
            mode: element.mode,
            next_face: 0,
            face_count: if element.codim == 0 { DIM + 1 } else { 0 },
        }
    }
}

impl<'g, const DIM: usize, const WDIM: usize> Iterator for IntersectionIter<'g, DIM, WDIM> {
    type Item = Intersection<'g, DIM, WDIM>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_face >= self.face_count {
            return None;
        }
        let face = self.next_face;
        self.next_face += 1;
        Some(Intersection {
            grid: self.grid,
            info: Rc::clone(&self.info),
            mode: self.mode,
            face,
        })
    }
}
