//! The grid interface on top of the refinement hierarchy:
//! entities, views, index sets and adaptation.

mod entity;
pub use entity::{Entity, EntityPartition};

mod iterators;
pub use iterators::{EntityIter, HierarchicIter};

mod intersection;
pub use intersection::{Intersection, IntersectionIter};

mod index_sets;
pub use index_sets::{ConsecutiveIndexSet, HierarchicIndexSet, IdSet, LeafIndexSet, LevelIndexSet};

use std::cell::OnceCell;

use crate::{
    marker::MarkerVector,
    mesh::HierarchicalMesh,
    traverse::{PartitionType, TraverseMode},
    GridConfig, GridError, MacroFormat,
};

/// An adaptively refined simplicial grid.
///
/// Per-level data (markers, level and leaf index sets) is built on first use
/// and thrown away whenever the grid changes.
///
/// ```
/// # use bisection_grid::{na, AdaptiveGrid, MacroGridBuilder};
/// let mut b = MacroGridBuilder::<2, 2>::new();
/// for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
///     b.add_vertex(na::Vector2::new(x, y));
/// }
/// b.add_element(&[0, 2, 1]);
/// b.add_element(&[2, 0, 3]);
/// let mut grid = AdaptiveGrid::new(b.create()?);
///
/// grid.global_refine(2)?;
/// assert_eq!(grid.max_level(), 2);
/// assert_eq!(grid.leaf_size(0)?, 8);
/// // the center vertex is shared by every leaf but visited once
/// assert_eq!(grid.leaf_entities(2)?.count(), 9);
/// # Ok::<(), bisection_grid::GridError>(())
/// ```
#[derive(Debug)]
pub struct AdaptiveGrid<const DIM: usize, const WDIM: usize> {
    pub(crate) mesh: HierarchicalMesh<DIM, WDIM>,
    rank: usize,
    level_markers: Vec<OnceCell<MarkerVector>>,
    leaf_marker: OnceCell<MarkerVector>,
    level_index_sets: Vec<OnceCell<ConsecutiveIndexSet>>,
    leaf_index_set: OnceCell<ConsecutiveIndexSet>,
    was_changed: bool,
    coarsening_marked: bool,
}

impl<const DIM: usize, const WDIM: usize> AdaptiveGrid<DIM, WDIM> {
    /// Wrap a mesh in a grid owned by rank 0.
    pub fn new(mesh: HierarchicalMesh<DIM, WDIM>) -> Self {
        Self::with_rank(mesh, 0)
    }

    /// Wrap a mesh in a grid as seen by the given rank.
    pub fn with_rank(mesh: HierarchicalMesh<DIM, WDIM>, rank: usize) -> Self {
        let mut grid = Self {
            mesh,
            rank,
            level_markers: Vec::new(),
            leaf_marker: OnceCell::new(),
            level_index_sets: Vec::new(),
            leaf_index_set: OnceCell::new(),
            was_changed: false,
            coarsening_marked: false,
        };
        grid.calc_extras();
        grid.was_changed = false;
        grid
    }

    /// Load the macro grid named in a configuration
    /// and apply its initial global refinements.
    pub fn from_config(config: &GridConfig) -> Result<Self, GridError> {
        let mut grid = match config.format {
            MacroFormat::Gmsh => {
                let bytes = std::fs::read(&config.macro_grid)
                    .map_err(|e| GridError::io(&config.macro_grid, e))?;
                let mesh = crate::gmsh::load_macro_grid::<DIM, WDIM>(&bytes)?;
                log::info!("loaded macro grid from {}", config.macro_grid.display());
                Self::with_rank(mesh, config.rank)
            }
            #[cfg(feature = "serde")]
            MacroFormat::Ron => {
                let (mut grid, _time) = Self::read_grid(&config.macro_grid)?;
                grid.rank = config.rank;
                grid
            }
            #[cfg(not(feature = "serde"))]
            MacroFormat::Ron => {
                return Err(GridError::Serialization(
                    "reading RON grids requires the `serde` feature".to_string(),
                ));
            }
        };
        grid.global_refine(config.global_refinements)?;
        Ok(grid)
    }

    /// The underlying refinement hierarchy.
    #[inline]
    pub fn mesh(&self) -> &HierarchicalMesh<DIM, WDIM> {
        &self.mesh
    }

    /// The rank whose point of view partition iterators take.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The finest level present in the grid.
    #[inline]
    pub fn max_level(&self) -> usize {
        self.mesh.max_level()
    }

    //
    // iteration
    //

    /// Iterate over the entities of a codimension on one level.
    pub fn level_entities(
        &self,
        level: usize,
        codim: usize,
    ) -> Result<EntityIter<'_, DIM, WDIM>, GridError> {
        self.level_entities_partition(level, codim, PartitionType::All)
    }

    /// Iterate over the entities of a codimension on one level,
    /// restricted to a partition.
    pub fn level_entities_partition(
        &self,
        level: usize,
        codim: usize,
        partition: PartitionType,
    ) -> Result<EntityIter<'_, DIM, WDIM>, GridError> {
        self.check_codim(codim)?;
        self.check_level(level)?;
        let marker = if codim > 0 && partition == PartitionType::All {
            Some(self.level_marker(level)?)
        } else {
            None
        };
        Ok(EntityIter::new(
            self,
            TraverseMode::Level(level),
            partition,
            codim,
            marker,
        ))
    }

    /// Iterate over the entities of a codimension in the leaf view.
    pub fn leaf_entities(&self, codim: usize) -> Result<EntityIter<'_, DIM, WDIM>, GridError> {
        self.leaf_entities_partition(codim, PartitionType::All)
    }

    /// Iterate over the entities of a codimension in the leaf view,
    /// restricted to a partition.
    pub fn leaf_entities_partition(
        &self,
        codim: usize,
        partition: PartitionType,
    ) -> Result<EntityIter<'_, DIM, WDIM>, GridError> {
        self.check_codim(codim)?;
        let marker = if codim > 0 && partition == PartitionType::All {
            Some(self.leaf_marker())
        } else {
            None
        };
        Ok(EntityIter::new(
            self,
            TraverseMode::Leaf,
            partition,
            codim,
            marker,
        ))
    }

    /// Iterate over the elements of one level.
    pub fn level_elements(&self, level: usize) -> Result<EntityIter<'_, DIM, WDIM>, GridError> {
        self.level_entities(level, 0)
    }

    /// Iterate over the leaf elements.
    pub fn leaf_elements(&self) -> EntityIter<'_, DIM, WDIM> {
        EntityIter::new(self, TraverseMode::Leaf, PartitionType::All, 0, None)
    }

    /// The element with the given hierarchic index, as seen from its own level.
    pub fn element(&self, element: usize) -> Result<Entity<'_, DIM, WDIM>, GridError> {
        let level = self.mesh.level(element)?;
        Ok(Entity::element_from_index(
            self,
            element,
            TraverseMode::Level(level),
        ))
    }

    //
    // sizes and index sets
    //

    /// Number of entities of a codimension on one level.
    pub fn size(&self, level: usize, codim: usize) -> Result<usize, GridError> {
        self.level_index_set(level)?.size(codim)
    }

    /// Number of entities of a codimension in the leaf view.
    pub fn leaf_size(&self, codim: usize) -> Result<usize, GridError> {
        self.leaf_index_set().size(codim)
    }

    /// Size of the hierarchic index range of a codimension.
    pub fn hierarchic_size(&self, codim: usize) -> Result<usize, GridError> {
        Ok(self.mesh.index_manager(codim)?.size())
    }

    /// The marker deciding which element emits each shared sub-entity of a level.
    pub fn level_marker(&self, level: usize) -> Result<&MarkerVector, GridError> {
        self.check_level(level)?;
        Ok(self.level_markers[level]
            .get_or_init(|| MarkerVector::mark_new_vertices(&self.mesh, level)))
    }

    /// The marker of the leaf view.
    pub fn leaf_marker(&self) -> &MarkerVector {
        self.leaf_marker
            .get_or_init(|| MarkerVector::mark_new_leaf_vertices(&self.mesh))
    }

    /// Indices of entities over the whole hierarchy.
    #[inline]
    pub fn hierarchic_index_set(&self) -> HierarchicIndexSet<'_, DIM, WDIM> {
        HierarchicIndexSet::new(&self.mesh)
    }

    /// Consecutive indices of the entities of one level.
    pub fn level_index_set(&self, level: usize) -> Result<&LevelIndexSet, GridError> {
        self.check_level(level)?;
        Ok(self.level_index_sets[level]
            .get_or_init(|| ConsecutiveIndexSet::build(&self.mesh, TraverseMode::Level(level))))
    }

    /// Consecutive indices of the entities of the leaf view.
    pub fn leaf_index_set(&self) -> &LeafIndexSet {
        self.leaf_index_set
            .get_or_init(|| ConsecutiveIndexSet::build(&self.mesh, TraverseMode::Leaf))
    }

    /// Persistent ids of entities.
    #[inline]
    pub fn id_set(&self) -> IdSet {
        IdSet
    }

    //
    // adaptation
    //

    /// Mark a leaf element for refinement (`ref_count > 0`)
    /// or coarsening (`ref_count < 0`).
    /// Returns whether the mark was accepted.
    pub fn mark(&mut self, element: usize, ref_count: i8) -> Result<bool, GridError> {
        self.mesh.mark(element, ref_count)
    }

    /// The refinement mark of an element.
    pub fn get_mark(&self, element: usize) -> Result<i8, GridError> {
        self.mesh.get_mark(element)
    }

    /// Prepare for adaptation.
    /// Returns whether any element is marked for coarsening,
    /// i.e. whether data may be lost in [`adapt`][Self::adapt].
    pub fn pre_adapt(&mut self) -> bool {
        self.coarsening_marked = self.mesh.has_coarsening_marks();
        self.coarsening_marked
    }

    /// Refine and coarsen according to the marks.
    ///
    /// Returns whether any element was refined.
    /// Elements created here report [`Entity::is_new`] until the next call.
    pub fn adapt(&mut self) -> Result<bool, GridError> {
        self.mesh.clear_new_flags();

        let refined = match self.mesh.refine() {
            Ok(n) => n,
            Err(e) => {
                // a failed closure may still have bisected some elements
                self.calc_extras();
                return Err(e);
            }
        };
        let coarsened = if self.coarsening_marked || self.mesh.has_coarsening_marks() {
            self.mesh.coarsen()
        } else {
            0
        };

        self.was_changed = refined > 0 || coarsened > 0;
        if self.was_changed {
            self.calc_extras();
        }
        log::debug!(
            "adapted grid: {refined} bisections, {coarsened} coarsenings, {} leaves",
            self.mesh.leaf_count()
        );
        Ok(refined > 0)
    }

    /// Finish an adaptation cycle, clearing all remaining marks.
    /// Returns whether the last [`adapt`][Self::adapt] changed the grid.
    pub fn post_adapt(&mut self) -> bool {
        self.mesh.clear_marks();
        self.coarsening_marked = false;
        std::mem::take(&mut self.was_changed)
    }

    /// Bisect every leaf element `refinements` times.
    pub fn global_refine(&mut self, refinements: usize) -> Result<(), GridError> {
        for _ in 0..refinements {
            let leaves: Vec<usize> = self.mesh.leaves().collect();
            for leaf in leaves {
                self.mesh.mark(leaf, 1)?;
            }
            self.adapt()?;
            self.post_adapt();
        }
        Ok(())
    }

    /// Invalidate everything computed from the grid's state
    /// and size the caches for the current number of levels.
    pub(crate) fn calc_extras(&mut self) {
        let levels = self.mesh.max_level() + 1;
        self.level_markers = (0..levels).map(|_| OnceCell::new()).collect();
        self.leaf_marker = OnceCell::new();
        self.level_index_sets = (0..levels).map(|_| OnceCell::new()).collect();
        self.leaf_index_set = OnceCell::new();
        self.was_changed = true;
    }

    fn check_codim(&self, codim: usize) -> Result<(), GridError> {
        if codim > DIM {
            return Err(GridError::InvalidCodim { codim, dim: DIM });
        }
        Ok(())
    }

    fn check_level(&self, level: usize) -> Result<(), GridError> {
        let max_level = self.mesh.max_level();
        if level > max_level {
            return Err(GridError::LevelOutOfRange { level, max_level });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::*;
    use std::collections::HashSet;

    #[test]
    fn adaptation_cycle() {
        let mut grid = AdaptiveGrid::new(unit_square());
        assert!(!grid.pre_adapt());
        assert_eq!(grid.leaf_size(0).unwrap(), 2);

        assert!(grid.mark(0, 1).unwrap());
        assert!(!grid.pre_adapt());
        assert!(grid.adapt().unwrap());
        assert!(grid.post_adapt());
        assert_eq!(grid.leaf_size(0).unwrap(), 4);
        assert_eq!(grid.max_level(), 1);
        // new flags survive post-adapt and are cleared by the next adapt
        let new: Vec<bool> = grid.leaf_elements().map(|e| e.is_new()).collect();
        assert_eq!(new, vec![true; 4]);

        let leaves: Vec<usize> = grid.leaf_elements().map(|e| e.index()).collect();
        for &l in &leaves {
            assert!(grid.mark(l, -1).unwrap());
        }
        assert!(grid.leaf_elements().all(|e| e.might_vanish()));
        assert!(grid.pre_adapt());
        assert!(!grid.adapt().unwrap());
        assert!(grid.post_adapt());
        assert_eq!(grid.leaf_size(0).unwrap(), 2);
        assert_eq!(grid.max_level(), 0);
        assert!(grid.leaf_elements().all(|e| !e.is_new()));

        // nothing marked, nothing changes
        assert!(!grid.adapt().unwrap());
        assert!(!grid.post_adapt());
    }

    #[test]
    fn level_and_leaf_sizes() {
        let mut grid = AdaptiveGrid::new(twin_tets());
        grid.global_refine(3).unwrap();
        assert_eq!(grid.max_level(), 3);
        assert_eq!(grid.size(0, 0).unwrap(), 2);
        assert_eq!(grid.size(1, 0).unwrap(), 4);
        assert_eq!(grid.size(3, 0).unwrap(), 16);
        assert_eq!(grid.leaf_size(0).unwrap(), 16);
        assert_eq!(grid.size(0, 3).unwrap(), 5);
        assert_eq!(grid.size(0, 1).unwrap(), 7);
        assert!(matches!(
            grid.size(4, 0),
            Err(GridError::LevelOutOfRange { level: 4, max_level: 3 })
        ));
        assert!(matches!(
            grid.leaf_entities(4),
            Err(GridError::InvalidCodim { codim: 4, dim: 3 })
        ));
        assert_eq!(
            grid.hierarchic_size(0).unwrap(),
            grid.mesh().element_count()
        );
    }

    #[test]
    fn codim_iteration_visits_each_index_once() {
        let mut grid = AdaptiveGrid::new(unit_square());
        grid.global_refine(3).unwrap();
        // refine a corner a bit further
        let corner = grid.leaf_elements().next().unwrap().index();
        grid.mark(corner, 2).unwrap();
        grid.adapt().unwrap();
        grid.post_adapt();

        for codim in 0..=2 {
            for level in 0..=grid.max_level() {
                let indices: Vec<usize> = grid
                    .level_entities(level, codim)
                    .unwrap()
                    .map(|e| e.index())
                    .collect();
                let unique: HashSet<usize> = indices.iter().copied().collect();
                assert_eq!(indices.len(), unique.len(), "level {level} codim {codim}");
                assert_eq!(indices.len(), grid.size(level, codim).unwrap());
            }
            let leaf: Vec<usize> = grid
                .leaf_entities(codim)
                .unwrap()
                .map(|e| e.index())
                .collect();
            let unique: HashSet<usize> = leaf.iter().copied().collect();
            assert_eq!(leaf.len(), unique.len());
            assert_eq!(leaf.len(), grid.leaf_size(codim).unwrap());
        }
        // a conforming triangulation of a disk-like domain satisfies Euler's formula
        let v = grid.leaf_size(2).unwrap() as i64;
        let e = grid.leaf_size(1).unwrap() as i64;
        let f = grid.leaf_size(0).unwrap() as i64;
        assert_eq!(v - e + f, 1);
    }

    #[test]
    fn partition_iteration() {
        let mut mesh = unit_square();
        mesh.set_owner(1, 1).unwrap();
        let mut grid = AdaptiveGrid::with_rank(mesh, 1);
        grid.global_refine(1).unwrap();

        let owned: Vec<usize> = grid
            .leaf_entities_partition(0, PartitionType::InteriorBorder)
            .unwrap()
            .map(|e| e.element_info().macro_index)
            .collect();
        assert_eq!(owned, vec![1, 1]);
        let ghosts = grid
            .leaf_entities_partition(2, PartitionType::Ghost)
            .unwrap()
            .count();
        // the corners of the other triangle and the midpoint of the diagonal
        assert_eq!(ghosts, 4);
        assert!(grid
            .leaf_entities_partition(0, PartitionType::Ghost)
            .unwrap()
            .all(|e| e.partition_type() == EntityPartition::Ghost));
    }

    #[test]
    fn caches_are_rebuilt_after_changes() {
        let mut grid = AdaptiveGrid::new(unit_interval());
        assert_eq!(grid.leaf_size(1).unwrap(), 3);
        grid.global_refine(1).unwrap();
        assert_eq!(grid.leaf_size(1).unwrap(), 5);
        assert_eq!(grid.leaf_marker().level(), None);
        assert_eq!(grid.level_marker(1).unwrap().level(), Some(1));
        assert!(grid.level_marker(2).is_err());
    }
}
