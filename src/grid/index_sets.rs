use fixedbitset as fb;

use super::Entity;
use crate::{
    mesh::HierarchicalMesh,
    traverse::{PartitionType, TraverseMode, TraverseStack},
    GridError,
};

/// Offset between the id ranges of consecutive codimensions.
pub(crate) const ID_CODIM_STRIDE: u64 = 300_000_000;

/// Indices of entities over the whole refinement hierarchy.
///
/// These are the indices handed out by the mesh's index managers,
/// so they are not consecutive but stay fixed for the lifetime of an entity.
#[derive(Clone, Copy, Debug)]
pub struct HierarchicIndexSet<'g, const DIM: usize, const WDIM: usize> {
    mesh: &'g HierarchicalMesh<DIM, WDIM>,
}

impl<'g, const DIM: usize, const WDIM: usize> HierarchicIndexSet<'g, DIM, WDIM> {
    pub(super) fn new(mesh: &'g HierarchicalMesh<DIM, WDIM>) -> Self {
        Self { mesh }
    }

    /// Hierarchic index of an entity.
    #[inline]
    pub fn index(&self, entity: &Entity<'_, DIM, WDIM>) -> usize {
        entity.index()
    }

    /// Hierarchic index of a sub-entity.
    #[inline]
    pub fn sub_index(
        &self,
        entity: &Entity<'_, DIM, WDIM>,
        i: usize,
        codim: usize,
    ) -> Result<usize, GridError> {
        entity.sub_index(codim, i)
    }

    /// One past the largest index of a codimension.
    pub fn size(&self, codim: usize) -> Result<usize, GridError> {
        Ok(self.mesh.index_manager(codim)?.size())
    }
}

/// Consecutive indices `0..size(codim)` for the entities of one view of the grid.
/// Numbers are assigned in traversal order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsecutiveIndexSet {
    /// entities in the view per codimension, by hierarchic index
    members: Vec<fb::FixedBitSet>,
    /// consecutive number per codimension, by hierarchic index.
    /// only meaningful for members
    numbers: Vec<Vec<usize>>,
    sizes: Vec<usize>,
}

/// Index set of the entities on one level.
pub type LevelIndexSet = ConsecutiveIndexSet;
/// Index set of the entities in the leaf view.
pub type LeafIndexSet = ConsecutiveIndexSet;

impl ConsecutiveIndexSet {
    pub(crate) fn build<const DIM: usize, const WDIM: usize>(
        mesh: &HierarchicalMesh<DIM, WDIM>,
        mode: TraverseMode,
    ) -> Self {
        let capacity: Vec<usize> = (0..=DIM)
            .map(|codim| mesh.index_managers[codim].size())
            .collect();
        let mut members: Vec<fb::FixedBitSet> = capacity
            .iter()
            .map(|&c| fb::FixedBitSet::with_capacity(c))
            .collect();
        let mut numbers: Vec<Vec<usize>> = capacity.iter().map(|&c| vec![0; c]).collect();
        let mut sizes = vec![0; DIM + 1];

        let mut stack = TraverseStack::new(mesh, mode, PartitionType::All, 0);
        let mut info = stack.go_first_element();
        while let Some(el_info) = info {
            let el = mesh.element(el_info.element);
            for codim in 0..=DIM {
                for &idx in &el.indices[codim] {
                    if !members[codim].put(idx) {
                        numbers[codim][idx] = sizes[codim];
                        sizes[codim] += 1;
                    }
                }
            }
            info = stack.go_next_el_info();
        }

        Self {
            members,
            numbers,
            sizes,
        }
    }

    /// Consecutive index of the entity with the given hierarchic index,
    /// `None` if it's not part of this view.
    pub fn index_of(&self, codim: usize, hierarchic_index: usize) -> Option<usize> {
        let members = self.members.get(codim)?;
        members
            .contains(hierarchic_index)
            .then(|| self.numbers[codim][hierarchic_index])
    }

    /// Consecutive index of an entity.
    pub fn index<const DIM: usize, const WDIM: usize>(
        &self,
        entity: &Entity<'_, DIM, WDIM>,
    ) -> Option<usize> {
        self.index_of(entity.codim(), entity.index())
    }

    /// Consecutive index of a sub-entity.
    pub fn sub_index<const DIM: usize, const WDIM: usize>(
        &self,
        entity: &Entity<'_, DIM, WDIM>,
        i: usize,
        codim: usize,
    ) -> Option<usize> {
        self.index_of(codim, entity.sub_index(codim, i).ok()?)
    }

    /// Number of entities of a codimension in the view.
    pub fn size(&self, codim: usize) -> Result<usize, GridError> {
        self.sizes.get(codim).copied().ok_or(GridError::InvalidCodim {
            codim,
            dim: self.sizes.len() - 1,
        })
    }

    /// Check whether an entity is part of the view.
    pub fn contains<const DIM: usize, const WDIM: usize>(
        &self,
        entity: &Entity<'_, DIM, WDIM>,
    ) -> bool {
        self.index(entity).is_some()
    }
}

/// Ids that are unique across all codimensions,
/// built from the hierarchic index and the codimension.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdSet;

impl IdSet {
    /// Id of an entity.
    #[inline]
    pub fn id<const DIM: usize, const WDIM: usize>(&self, entity: &Entity<'_, DIM, WDIM>) -> u64 {
        Self::id_of(entity.codim(), entity.index())
    }

    /// Id of a sub-entity.
    pub fn sub_id<const DIM: usize, const WDIM: usize>(
        &self,
        entity: &Entity<'_, DIM, WDIM>,
        i: usize,
        codim: usize,
    ) -> Result<u64, GridError> {
        Ok(Self::id_of(codim, entity.sub_index(codim, i)?))
    }

    #[inline]
    fn id_of(codim: usize, index: usize) -> u64 {
        codim as u64 * ID_CODIM_STRIDE + index as u64
    }
}
