//! Canonical owners of shared sub-entities.
//!
//! A face, edge or vertex is contained in several elements of a level (or of the leaf view),
//! so iterating over sub-entities by walking the elements would emit it several times.
//! A [`MarkerVector`] picks the first element in traversal order
//! that contains each sub-entity as the one responsible for emitting it.

use crate::mesh::HierarchicalMesh;
use crate::traverse::{PartitionType, TraverseMode, TraverseStack};
use crate::GridError;

/// Owning element of every sub-entity of codimension `1..=DIM` in one view of the grid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkerVector {
    /// indexed by `codim - 1`, then by the sub-entity's hierarchic index
    owners: Vec<Vec<Option<usize>>>,
    /// the level this was built for, `None` for the leaf view
    level: Option<usize>,
}

impl MarkerVector {
    /// Build the marker of the elements on one level.
    pub fn mark_new_vertices<const DIM: usize, const WDIM: usize>(
        mesh: &HierarchicalMesh<DIM, WDIM>,
        level: usize,
    ) -> Self {
        Self::build(mesh, TraverseMode::Level(level))
    }

    /// Build the marker of the leaf elements.
    pub fn mark_new_leaf_vertices<const DIM: usize, const WDIM: usize>(
        mesh: &HierarchicalMesh<DIM, WDIM>,
    ) -> Self {
        Self::build(mesh, TraverseMode::Leaf)
    }

    fn build<const DIM: usize, const WDIM: usize>(
        mesh: &HierarchicalMesh<DIM, WDIM>,
        mode: TraverseMode,
    ) -> Self {
        let mut owners: Vec<Vec<Option<usize>>> = (1..=DIM)
            .map(|codim| vec![None; mesh.index_managers[codim].size()])
            .collect();

        let mut stack = TraverseStack::new(mesh, mode, PartitionType::All, 0);
        let mut info = stack.go_first_element();
        while let Some(el_info) = info {
            let el = mesh.element(el_info.element);
            for codim in 1..=DIM {
                for &idx in &el.indices[codim] {
                    owners[codim - 1][idx].get_or_insert(el_info.element);
                }
            }
            info = stack.go_next_el_info();
        }

        let level = match mode {
            TraverseMode::Level(l) => Some(l),
            TraverseMode::Leaf => None,
        };
        Self { owners, level }
    }

    /// The level this marker was built for, `None` if it's the leaf marker.
    #[inline]
    pub fn level(&self) -> Option<usize> {
        self.level
    }

    /// The element responsible for a sub-entity,
    /// `None` if no element of this view contains it.
    pub fn owner(&self, codim: usize, index: usize) -> Result<Option<usize>, GridError> {
        let dim = self.owners.len();
        if codim == 0 || codim > dim {
            return Err(GridError::InvalidCodim { codim, dim });
        }
        Ok(self.owners[codim - 1].get(index).copied().flatten())
    }

    /// Check whether a sub-entity should be skipped when reached through `element`
    /// because a different element owns it.
    pub fn not_on_element(&self, codim: usize, element: usize, index: usize) -> bool {
        match self.owner(codim, index) {
            Ok(Some(owner)) => owner != element,
            _ => true,
        }
    }

    /// [`not_on_element`][Self::not_on_element] for vertices.
    #[inline]
    pub fn vertex_not_on_element(&self, element: usize, vertex: usize) -> bool {
        self.not_on_element(self.owners.len(), element, vertex)
    }

    /// [`not_on_element`][Self::not_on_element] for faces.
    #[inline]
    pub fn face_not_on_element(&self, element: usize, face: usize) -> bool {
        self.not_on_element(1, element, face)
    }

    /// [`not_on_element`][Self::not_on_element] for edges.
    /// Always `true` for one-dimensional grids, whose edges are the elements.
    pub fn edge_not_on_element(&self, element: usize, edge: usize) -> bool {
        let dim = self.owners.len();
        if dim < 2 {
            return true;
        }
        self.not_on_element(dim - 1, element, edge)
    }
}
