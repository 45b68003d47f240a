use std::rc::Rc;

use itertools::Itertools;

use super::{AdaptiveGrid, HierarchicIter, IntersectionIter};
use crate::{
    reference,
    traverse::{el_info_of, ElInfo, TraverseMode},
    Geometry, GridError,
};

/// Which side of a partition boundary an entity is on, seen from the grid's rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityPartition {
    /// Owned by the local rank, and so are all of its neighbours.
    Interior,
    /// Owned by the local rank, next to an element owned by a different rank.
    Border,
    /// Owned by a different rank.
    Ghost,
}

/// A view of one entity of some codimension,
/// reached through an element that contains it.
///
/// Sub-entities are identified by their local number in that element;
/// the same face, edge or vertex reached through a different element
/// compares equal, since equality goes by codimension and hierarchic index.
#[derive(Clone, Debug)]
pub struct Entity<'g, const DIM: usize, const WDIM: usize> {
    pub(super) grid: &'g AdaptiveGrid<DIM, WDIM>,
    pub(super) info: Rc<ElInfo<WDIM>>,
    /// traversal mode the element frame was built with,
    /// reused when frames of related elements are needed
    pub(super) mode: TraverseMode,
    pub(super) codim: usize,
    pub(super) local: usize,
}

impl<'g, const DIM: usize, const WDIM: usize> PartialEq for Entity<'g, DIM, WDIM> {
    fn eq(&self, other: &Self) -> bool {
        self.codim == other.codim && self.index() == other.index()
    }
}
impl<'g, const DIM: usize, const WDIM: usize> Eq for Entity<'g, DIM, WDIM> {}

impl<'g, const DIM: usize, const WDIM: usize> Entity<'g, DIM, WDIM> {
    pub(super) fn element_from_index(
        grid: &'g AdaptiveGrid<DIM, WDIM>,
        element: usize,
        mode: TraverseMode,
    ) -> Self {
        Self {
            grid,
            info: Rc::new(el_info_of(&grid.mesh, element, mode)),
            mode,
            codim: 0,
            local: 0,
        }
    }

    /// Codimension of the entity.
    #[inline]
    pub fn codim(&self) -> usize {
        self.codim
    }

    /// Dimension of the entity.
    #[inline]
    pub fn mydim(&self) -> usize {
        DIM - self.codim
    }

    /// Level of the element this entity was reached through.
    #[inline]
    pub fn level(&self) -> usize {
        self.info.level
    }

    /// Hierarchic index, unique among live entities of the same codimension.
    #[inline]
    pub fn index(&self) -> usize {
        self.grid.mesh.element(self.info.element).indices[self.codim][self.local]
    }

    /// Persistent id, unique among all live entities.
    #[inline]
    pub fn id(&self) -> u64 {
        self.grid.id_set().id(self)
    }

    /// Local number of this entity in the element it was reached through.
    #[inline]
    pub fn local_number(&self) -> usize {
        self.local
    }

    /// Traversal frame of the element this entity was reached through.
    #[inline]
    pub fn element_info(&self) -> &ElInfo<WDIM> {
        &self.info
    }

    /// Local numbers (in the containing element) of this entity's vertices.
    fn local_vertices(&self) -> Vec<usize> {
        reference::sub_entity_vertices(DIM, self.codim)[self.local].clone()
    }

    /// The geometric realisation of the entity.
    pub fn geometry(&self) -> Geometry<WDIM> {
        Geometry::new(
            self.local_vertices()
                .into_iter()
                .map(|l| self.info.coords[l])
                .collect(),
        )
    }

    /// Number of sub-entities of codimension `codim` (relative to the grid) in this entity.
    pub fn sub_entity_count(&self, codim: usize) -> Result<usize, GridError> {
        self.check_sub_codim(codim)?;
        Ok(reference::sub_entity_count(self.mydim(), codim - self.codim))
    }

    /// Element-local number of sub-entity `i` of codimension `codim`,
    /// numbered as in this entity's own reference simplex.
    fn element_local(&self, codim: usize, i: usize) -> Result<usize, GridError> {
        self.check_sub_codim(codim)?;
        let own = self.local_vertices();
        let sub: Vec<usize> = reference::sub_entity_vertices(self.mydim(), codim - self.codim)
            .get(i)
            .ok_or(GridError::InvalidCodim { codim, dim: DIM })?
            .iter()
            .map(|&pos| own[pos])
            .collect();
        Ok(reference::sub_entity_with_vertices(DIM, codim, &sub)
            .expect("sub-simplex of a sub-entity is a sub-entity. This is a bug in bisection-grid"))
    }

    /// Hierarchic index of sub-entity `i` of codimension `codim`.
    pub fn sub_index(&self, codim: usize, i: usize) -> Result<usize, GridError> {
        let local = self.element_local(codim, i)?;
        Ok(self.grid.mesh.element(self.info.element).indices[codim][local])
    }

    /// Sub-entity `i` of codimension `codim`.
    pub fn sub_entity(&self, codim: usize, i: usize) -> Result<Self, GridError> {
        let local = self.element_local(codim, i)?;
        Ok(Self {
            grid: self.grid,
            info: Rc::clone(&self.info),
            mode: self.mode,
            codim,
            local,
        })
    }

    fn check_sub_codim(&self, codim: usize) -> Result<(), GridError> {
        if codim < self.codim || codim > DIM {
            return Err(GridError::InvalidCodim { codim, dim: DIM });
        }
        Ok(())
    }

    /// Global vertex indices of the entity, sorted.
    pub fn vertex_indices(&self) -> Vec<usize> {
        let verts = self.grid.mesh.element(self.info.element).vertices();
        self.local_vertices()
            .into_iter()
            .map(|l| verts[l])
            .sorted_unstable()
            .collect()
    }

    /// Whether the element this entity was reached through has no children.
    pub fn is_leaf(&self) -> bool {
        self.grid.mesh.element(self.info.element).is_leaf()
    }

    /// The element this one was bisected from.
    /// `None` for macro elements and entities of codimension > 0.
    pub fn father(&self) -> Option<Self> {
        if self.codim != 0 {
            return None;
        }
        let parent = self.grid.mesh.element(self.info.element).parent?;
        let mode = match self.mode {
            TraverseMode::Level(_) => TraverseMode::Level(self.info.level - 1),
            TraverseMode::Leaf => TraverseMode::Leaf,
        };
        Some(Self::element_from_index(self.grid, parent, mode))
    }

    /// Which of its father's two children the element is.
    /// `None` for macro elements and entities of codimension > 0.
    pub fn n_child(&self) -> Option<usize> {
        if self.codim != 0 {
            return None;
        }
        let parent = self.grid.mesh.element(self.info.element).parent?;
        let children = self.grid.mesh.element(parent).children?;
        children.iter().position(|&c| c == self.info.element)
    }

    /// The element as a simplex in the reference coordinates of its father.
    /// `None` for macro elements and entities of codimension > 0.
    ///
    /// Bisection always produces the same two halves of the reference simplex
    /// for a given father type.
    pub fn geometry_in_father(&self) -> Option<Geometry<DIM>> {
        let child = self.n_child()?;
        let parent = self.grid.mesh.element(self.info.element).parent?;
        let father_type = self.grid.mesh.element(parent).el_type;

        let reference = Geometry::<DIM>::reference();
        let corners = reference.corners();
        let new = reference::new_vertex(DIM);
        Some(Geometry::new(
            reference::child_vertices(DIM, father_type, child)
                .iter()
                .map(|&l| {
                    if l == new {
                        (corners[0] + corners[1]) * 0.5
                    } else {
                        corners[l]
                    }
                })
                .collect(),
        ))
    }

    /// Whether the element was created in the most recent adaptation.
    /// Always `false` for entities of codimension > 0.
    pub fn is_new(&self) -> bool {
        self.codim == 0 && self.grid.mesh.element(self.info.element).is_new
    }

    /// Whether the element is marked for coarsening
    /// and may disappear in the next adaptation.
    pub fn might_vanish(&self) -> bool {
        self.codim == 0 && self.mark() < 0
    }

    /// Refinement mark of the element this entity was reached through.
    pub fn mark(&self) -> i8 {
        self.grid.mesh.element(self.info.element).mark
    }

    /// Which side of the grid rank's partition boundary
    /// the element this entity was reached through is on.
    pub fn partition_type(&self) -> EntityPartition {
        let mesh = &self.grid.mesh;
        let rank = self.grid.rank();
        let foreign = |element: usize| {
            mesh.macro_element(mesh.element(element).macro_index).owner() != rank
        };

        if foreign(self.info.element) {
            EntityPartition::Ghost
        } else if self.info.neighbours.iter().flatten().any(|&nb| foreign(nb)) {
            EntityPartition::Border
        } else {
            EntityPartition::Interior
        }
    }

    /// The intersections of an element with its neighbours and the domain boundary,
    /// one per face. Empty for entities of codimension > 0.
    pub fn intersections(&self) -> IntersectionIter<'g, DIM, WDIM> {
        IntersectionIter::new(self)
    }

    /// The descendants of an element up to level `max_level`, in depth-first order.
    /// Empty for entities of codimension > 0.
    pub fn descendants(&self, max_level: usize) -> HierarchicIter<'g, DIM, WDIM> {
        HierarchicIter::new(self, max_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::*;
    use approx::assert_relative_eq;

    #[test]
    fn sub_entities_of_a_tetrahedron() {
        let grid = AdaptiveGrid::new(single_tet());
        let tet = grid.leaf_elements().next().unwrap();
        assert_eq!(tet.sub_entity_count(1).unwrap(), 4);
        assert_eq!(tet.sub_entity_count(2).unwrap(), 6);
        assert_eq!(tet.sub_entity_count(3).unwrap(), 4);
        assert!(tet.sub_entity_count(4).is_err());

        // face 0 is opposite vertex 0
        let face = tet.sub_entity(1, 0).unwrap();
        assert_eq!(face.vertex_indices(), vec![1, 2, 3]);
        assert_eq!(face.sub_entity_count(2).unwrap(), 3);
        assert_eq!(face.sub_entity_count(3).unwrap(), 3);
        assert!(face.sub_entity_count(0).is_err());
        // edge 0 of the face is opposite its first vertex, i.e. (2, 3)
        let edge = face.sub_entity(2, 0).unwrap();
        assert_eq!(edge.vertex_indices(), vec![2, 3]);
        assert_eq!(edge.index(), tet.sub_index(2, 5).unwrap());
        assert_eq!(face.sub_index(3, 2).unwrap(), 3);

        assert_relative_eq!(face.geometry().volume(), f64::sqrt(3.0) / 2.0);
        assert_eq!(edge.mydim(), 1);
        assert_eq!(edge.sub_entity(3, 1).unwrap().index(), 3);
    }

    #[test]
    fn father_and_level() {
        let mut grid = AdaptiveGrid::new(unit_square());
        grid.global_refine(2).unwrap();
        for leaf in grid.leaf_elements() {
            assert_eq!(leaf.level(), 2);
            let father = leaf.father().unwrap();
            assert_eq!(father.level(), 1);
            assert_eq!(
                grid.mesh().children(father.index()).unwrap().map(|c| c.contains(&leaf.index())),
                Some(true)
            );
            let grandfather = father.father().unwrap();
            assert!(grandfather.father().is_none());
            // the father covers the child
            assert_relative_eq!(
                father.geometry().volume(),
                2.0 * leaf.geometry().volume(),
                epsilon = 1e-14
            );
        }
        let vertex = grid.leaf_entities(2).unwrap().next().unwrap();
        assert!(vertex.father().is_none());
        assert_eq!(vertex.geometry().mydim(), 0);
    }

    #[test]
    fn children_in_father_coordinates() {
        fn check<const DIM: usize, const WDIM: usize>(grid: &AdaptiveGrid<DIM, WDIM>) {
            for leaf in grid.leaf_elements() {
                let father = leaf.father().unwrap();
                let n = leaf.n_child().unwrap();
                assert_eq!(
                    grid.mesh().children(father.index()).unwrap().unwrap()[n],
                    leaf.index()
                );

                let in_father = leaf.geometry_in_father().unwrap();
                assert_relative_eq!(
                    in_father.volume(),
                    0.5 * Geometry::<DIM>::reference().volume(),
                    epsilon = 1e-14
                );
                // mapping the local corners through the father lands on the child's corners
                let father_geo = father.geometry();
                for (local, global) in in_father.corners().iter().zip(leaf.geometry().corners()) {
                    assert!(father_geo.check_inside(local.as_slice()));
                    assert_relative_eq!(
                        father_geo.global(local.as_slice()),
                        *global,
                        epsilon = 1e-12
                    );
                }
            }
        }

        let mut interval = AdaptiveGrid::new(unit_interval());
        interval.global_refine(2).unwrap();
        check(&interval);
        let mut square = AdaptiveGrid::new(unit_square());
        square.global_refine(3).unwrap();
        check(&square);
        // three refinements cycle the tetrahedra through every element type
        for levels in 1..=3 {
            let mut tets = AdaptiveGrid::new(twin_tets());
            tets.global_refine(levels).unwrap();
            check(&tets);
        }

        let macro_el = square.level_elements(0).unwrap().next().unwrap();
        assert_eq!(macro_el.n_child(), None);
        assert!(macro_el.geometry_in_father().is_none());
        let vertex = square.leaf_entities(2).unwrap().next().unwrap();
        assert_eq!(vertex.n_child(), None);
    }

    #[test]
    fn border_elements_touch_other_ranks() {
        let mut mesh = unit_square();
        mesh.set_owner(1, 1).unwrap();
        let mut grid = AdaptiveGrid::with_rank(mesh, 0);
        grid.global_refine(2).unwrap();

        let mut seen = std::collections::HashSet::new();
        for el in grid.leaf_elements() {
            let owned = el.element_info().macro_index == 0;
            let foreign_neighbour = el
                .intersections()
                .filter_map(|i| i.outside())
                .any(|out| out.element_info().macro_index == 1);
            let expected = match (owned, foreign_neighbour) {
                (false, _) => EntityPartition::Ghost,
                (true, true) => EntityPartition::Border,
                (true, false) => EntityPartition::Interior,
            };
            assert_eq!(el.partition_type(), expected);
            seen.insert(expected);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn equality_goes_by_index() {
        let grid = AdaptiveGrid::new(unit_square());
        let elements: Vec<_> = grid.level_elements(0).unwrap().collect();
        // the diagonal is face 2 of both triangles
        let a = elements[0].sub_entity(1, 2).unwrap();
        let b = elements[1].sub_entity(1, 2).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
        assert_ne!(elements[0], elements[1]);
        assert_ne!(a.id(), elements[0].id());
    }

    #[test]
    fn element_lookup_by_index() {
        let mut grid = AdaptiveGrid::new(twin_tets());
        grid.global_refine(2).unwrap();
        let leaf = grid.leaf_elements().last().unwrap();
        let again = grid.element(leaf.index()).unwrap();
        assert_eq!(again.element_info().coords, leaf.element_info().coords);
        assert_eq!(again.partition_type(), EntityPartition::Interior);
        assert!(grid.element(9999).is_err());
    }
}
