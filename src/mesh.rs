//! The hierarchy of bisected simplices underlying a grid.
//!
//! Elements live in an arena addressed by their codimension 0 index.
//! Faces, edges and vertices are shared between the elements that contain them
//! and identified by their (sorted) vertex indices,
//! so that every sub-entity has exactly one index no matter how many
//! elements on how many levels reference it.

/// Macro triangulation input and validation.
mod construction;
pub use construction::{MacroGridBuilder, DEFAULT_BOUNDARY_ID};

/// Bisection, conformity closure and coarsening.
mod adaptation;

use nalgebra as na;
use std::collections::HashMap;

use crate::{reference, GridError, IndexManager};

/// A simplicial mesh refined by recursive bisection.
///
/// `DIM` is the dimension of the elements (1 to 3)
/// and `WDIM` the dimension of the space they are embedded in.
#[derive(Clone, Debug)]
pub struct HierarchicalMesh<const DIM: usize, const WDIM: usize> {
    pub(crate) macro_elements: Vec<MacroElement>,
    /// element arena, indexed by hierarchic element index.
    /// freed slots are `None` until their index is reused
    pub(crate) elements: Vec<Option<Element>>,
    pub(crate) vertices: VertexTable<WDIM>,
    /// shared sub-entities of codimensions `1..DIM`
    /// (vertices have their own table), stored at `codim - 1`
    pub(crate) sub_entities: Vec<SubEntityTable>,
    /// one index manager per codimension `0..=DIM`
    pub(crate) index_managers: Vec<IndexManager>,
    pub(crate) max_level: usize,
}

/// Data attached to the root of each refinement tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MacroElement {
    pub(crate) root: usize,
    /// neighbouring macro element across each face
    pub(crate) neighbours: Vec<Option<usize>>,
    /// boundary id of each face, `None` for interior faces
    pub(crate) boundary: Vec<Option<i32>>,
    pub(crate) owner: usize,
}

impl MacroElement {
    /// Hierarchic index of the level 0 element.
    #[inline]
    pub fn root(&self) -> usize {
        self.root
    }

    /// Index of the macro element across each face.
    #[inline]
    pub fn neighbours(&self) -> &[Option<usize>] {
        &self.neighbours
    }

    /// Boundary id of each face, `None` for faces in the interior of the domain.
    #[inline]
    pub fn boundary(&self) -> &[Option<i32>] {
        &self.boundary
    }

    /// Rank of the partition this macro element (and its whole tree) belongs to.
    #[inline]
    pub fn owner(&self) -> usize {
        self.owner
    }
}

/// A node of a refinement tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Element {
    /// global indices of sub-entities per codimension.
    /// `indices[0]` holds only this element's own index
    /// and the last entry holds the vertices in local order
    pub indices: Vec<Vec<usize>>,
    pub parent: Option<usize>,
    pub children: Option<[usize; 2]>,
    pub level: usize,
    pub macro_index: usize,
    pub el_type: u8,
    /// refinement mark: positive to refine, negative to coarsen
    pub mark: i8,
    /// created in the most recent adaptation
    pub is_new: bool,
}

impl Element {
    #[inline]
    pub fn index(&self) -> usize {
        self.indices[0][0]
    }

    #[inline]
    pub fn vertices(&self) -> &[usize] {
        &self.indices[self.indices.len() - 1]
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// The refinement edge, spanned by local vertices 0 and 1.
    #[inline]
    pub fn refinement_edge(&self) -> [usize; 2] {
        let v = self.vertices();
        [v[0], v[1]]
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct VertexTable<const WDIM: usize> {
    pub coords: Vec<na::SVector<f64, WDIM>>,
    /// elements on any level that have each vertex as a corner
    pub elements: Vec<Vec<usize>>,
    /// the bisected edge each midpoint vertex was created on
    pub edge_of: Vec<Option<[usize; 2]>>,
    /// inverse of `edge_of`, keyed by sorted edge
    pub midpoints: HashMap<[usize; 2], usize>,
}

impl<const WDIM: usize> VertexTable<WDIM> {
    fn ensure_len(&mut self, len: usize) {
        if self.coords.len() < len {
            self.coords.resize(len, na::SVector::zeros());
            self.elements.resize(len, Vec::new());
            self.edge_of.resize(len, None);
        }
    }
}

/// Faces or edges shared by the elements containing them.
#[derive(Clone, Debug, Default)]
pub(crate) struct SubEntityTable {
    /// map from the sorted vertex indices of a sub-entity to its index
    index_map: HashMap<Vec<usize>, usize>,
    /// sorted vertex indices of each live sub-entity
    pub keys: Vec<Vec<usize>>,
    /// elements on any level that contain each sub-entity
    pub elements: Vec<Vec<usize>>,
}

impl SubEntityTable {
    /// Record that `element` contains the sub-entity with the given vertices,
    /// allocating an index for it if it's not referenced yet.
    fn register(&mut self, key: Vec<usize>, element: usize, im: &mut IndexManager) -> usize {
        if let Some(&idx) = self.index_map.get(&key) {
            self.elements[idx].push(element);
            return idx;
        }

        let idx = im.allocate();
        if self.keys.len() <= idx {
            self.keys.resize(idx + 1, Vec::new());
            self.elements.resize(idx + 1, Vec::new());
        }
        self.keys[idx] = key.clone();
        self.elements[idx] = vec![element];
        self.index_map.insert(key, idx);
        idx
    }

    /// Remove `element` from the users of a sub-entity,
    /// freeing the index once nothing references it.
    fn unregister(&mut self, idx: usize, element: usize, im: &mut IndexManager) {
        let users = &mut self.elements[idx];
        users.retain(|&e| e != element);
        if users.is_empty() {
            let key = std::mem::take(&mut self.keys[idx]);
            self.index_map.remove(&key);
            im.free(idx);
        }
    }

    /// Record that `element` contains the sub-entity with index `idx`,
    /// which was allocated elsewhere.
    ///
    /// Fails if the index or the vertices were already taken by a different sub-entity.
    #[cfg(feature = "serde")]
    fn register_at(
        &mut self,
        key: Vec<usize>,
        idx: usize,
        element: usize,
    ) -> Result<(), GridError> {
        if let Some(&other) = self.index_map.get(&key) {
            if other != idx {
                return Err(GridError::Serialization(format!(
                    "sub-entity {key:?} has both index {other} and {idx}"
                )));
            }
        }
        if self.keys.len() <= idx {
            self.keys.resize(idx + 1, Vec::new());
            self.elements.resize(idx + 1, Vec::new());
        }
        if self.elements[idx].is_empty() {
            self.keys[idx] = key.clone();
            self.index_map.insert(key, idx);
        } else if self.keys[idx] != key {
            return Err(GridError::Serialization(format!(
                "index {idx} is used by both {:?} and {key:?}",
                self.keys[idx]
            )));
        }
        self.elements[idx].push(element);
        Ok(())
    }

    #[inline]
    pub fn find(&self, key: &[usize]) -> Option<usize> {
        self.index_map.get(key).copied()
    }
}

impl<const DIM: usize, const WDIM: usize> HierarchicalMesh<DIM, WDIM> {
    /// A mesh with no vertices or elements, for the builder to fill in.
    pub(crate) fn empty() -> Result<Self, GridError> {
        if DIM == 0 || DIM > 3 || WDIM < DIM || WDIM > 3 {
            return Err(GridError::UnsupportedDimension {
                dim: DIM,
                world_dim: WDIM,
            });
        }
        Ok(Self {
            macro_elements: Vec::new(),
            elements: Vec::new(),
            vertices: VertexTable::default(),
            sub_entities: vec![SubEntityTable::default(); DIM - 1],
            index_managers: vec![IndexManager::new(); DIM + 1],
            max_level: 0,
        })
    }

    /// Dimension of the elements.
    #[inline]
    pub const fn dim(&self) -> usize {
        DIM
    }

    /// Dimension of the space the mesh is embedded in.
    #[inline]
    pub const fn world_dim(&self) -> usize {
        WDIM
    }

    /// Number of macro elements (refinement trees).
    #[inline]
    pub fn macro_count(&self) -> usize {
        self.macro_elements.len()
    }

    /// Access a macro element.
    #[inline]
    pub fn macro_element(&self, macro_index: usize) -> &MacroElement {
        &self.macro_elements[macro_index]
    }

    /// Assign a macro element (and all its descendants) to a partition.
    pub fn set_owner(&mut self, macro_index: usize, rank: usize) -> Result<(), GridError> {
        let m = self
            .macro_elements
            .get_mut(macro_index)
            .ok_or(GridError::UnknownElement(macro_index))?;
        m.owner = rank;
        Ok(())
    }

    /// Owner rank of every macro element, in order.
    pub fn owners(&self) -> Vec<usize> {
        self.macro_elements.iter().map(|m| m.owner).collect()
    }

    /// The finest level present in the mesh.
    #[inline]
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// The index manager of a codimension.
    pub fn index_manager(&self, codim: usize) -> Result<&IndexManager, GridError> {
        self.index_managers
            .get(codim)
            .ok_or(GridError::InvalidCodim { codim, dim: DIM })
    }

    /// Number of live entities of a codimension over all levels.
    pub fn entity_count(&self, codim: usize) -> Result<usize, GridError> {
        Ok(self.index_manager(codim)?.live_count())
    }

    /// Number of live elements over all levels.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.index_managers[0].live_count()
    }

    /// Number of live vertices.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.index_managers[DIM].live_count()
    }

    /// Hierarchic indices of all live elements.
    pub fn elements(&self) -> impl '_ + Iterator<Item = usize> {
        self.elements.iter().flatten().map(|el| el.index())
    }

    /// Hierarchic indices of all elements without children.
    pub fn leaves(&self) -> impl '_ + Iterator<Item = usize> {
        self.elements
            .iter()
            .flatten()
            .filter(|el| el.is_leaf())
            .map(|el| el.index())
    }

    /// Number of elements without children.
    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    /// Check whether an element with the given index is alive.
    #[inline]
    pub fn contains_element(&self, element: usize) -> bool {
        matches!(self.elements.get(element), Some(Some(_)))
    }

    /// Coordinates of a vertex.
    #[inline]
    pub fn vertex_coords(&self, vertex: usize) -> &na::SVector<f64, WDIM> {
        &self.vertices.coords[vertex]
    }

    /// Vertex indices of an element, in local order.
    pub fn element_vertices(&self, element: usize) -> Result<&[usize], GridError> {
        Ok(self.try_element(element)?.vertices())
    }

    /// Global indices of an element's sub-entities of the given codimension,
    /// in local order.
    pub fn sub_indices(&self, element: usize, codim: usize) -> Result<&[usize], GridError> {
        let el = self.try_element(element)?;
        el.indices
            .get(codim)
            .map(|idx| idx.as_slice())
            .ok_or(GridError::InvalidCodim { codim, dim: DIM })
    }

    /// Parent of an element, `None` for macro elements.
    pub fn parent(&self, element: usize) -> Result<Option<usize>, GridError> {
        Ok(self.try_element(element)?.parent)
    }

    /// The two children of an element, `None` for leaves.
    pub fn children(&self, element: usize) -> Result<Option<[usize; 2]>, GridError> {
        Ok(self.try_element(element)?.children)
    }

    /// Refinement level of an element.
    pub fn level(&self, element: usize) -> Result<usize, GridError> {
        Ok(self.try_element(element)?.level)
    }

    /// Check whether an element has no children.
    pub fn is_leaf(&self, element: usize) -> Result<bool, GridError> {
        Ok(self.try_element(element)?.is_leaf())
    }

    #[inline]
    pub(crate) fn try_element(&self, element: usize) -> Result<&Element, GridError> {
        match self.elements.get(element) {
            Some(Some(el)) => Ok(el),
            _ => Err(GridError::UnknownElement(element)),
        }
    }

    /// Access an element that is known to be alive
    /// because it was reached through the tree.
    #[inline]
    pub(crate) fn element(&self, element: usize) -> &Element {
        self.elements[element]
            .as_ref()
            .expect("dangling element reference. This is a bug in bisection-grid")
    }

    #[inline]
    pub(crate) fn element_mut(&mut self, element: usize) -> &mut Element {
        self.elements[element]
            .as_mut()
            .expect("dangling element reference. This is a bug in bisection-grid")
    }

    /// Elements on any level containing the face with the given sorted vertices.
    pub(crate) fn elements_containing_face(&self, key: &[usize]) -> &[usize] {
        if DIM == 1 {
            // faces of intervals are vertices
            return &self.vertices.elements[key[0]];
        }
        match self.sub_entities[0].find(key) {
            Some(idx) => &self.sub_entities[0].elements[idx],
            None => &[],
        }
    }

    /// Check whether one element is an ancestor of the other (or the same element).
    pub(crate) fn are_related(&self, a: usize, b: usize) -> bool {
        let (mut fine, coarse) = if self.element(a).level >= self.element(b).level {
            (a, b)
        } else {
            (b, a)
        };
        let coarse_level = self.element(coarse).level;
        while self.element(fine).level > coarse_level {
            match self.element(fine).parent {
                Some(p) => fine = p,
                None => return false,
            }
        }
        fine == coarse
    }

    /// Add a vertex with a fresh index.
    pub(crate) fn add_vertex(&mut self, coords: na::SVector<f64, WDIM>) -> usize {
        let idx = self.index_managers[DIM].allocate();
        self.vertices.ensure_len(idx + 1);
        self.vertices.coords[idx] = coords;
        self.vertices.elements[idx].clear();
        self.vertices.edge_of[idx] = None;
        idx
    }

    /// Create an element from its vertices in local order,
    /// registering all of its sub-entities.
    pub(crate) fn insert_element(
        &mut self,
        vertices: Vec<usize>,
        parent: Option<usize>,
        level: usize,
        macro_index: usize,
        el_type: u8,
    ) -> usize {
        debug_assert_eq!(vertices.len(), DIM + 1);
        let id = self.index_managers[0].allocate();

        let mut indices = Vec::with_capacity(DIM + 1);
        indices.push(vec![id]);
        for codim in 1..DIM {
            let mut codim_indices = Vec::new();
            for local in reference::sub_entity_vertices(DIM, codim) {
                let mut key: Vec<usize> = local.iter().map(|&l| vertices[l]).collect();
                key.sort_unstable();
                codim_indices.push(self.sub_entities[codim - 1].register(
                    key,
                    id,
                    &mut self.index_managers[codim],
                ));
            }
            indices.push(codim_indices);
        }
        for &v in &vertices {
            self.vertices.elements[v].push(id);
        }
        indices.push(vertices);

        if self.elements.len() <= id {
            self.elements.resize_with(id + 1, || None);
        }
        self.elements[id] = Some(Element {
            indices,
            parent,
            children: None,
            level,
            macro_index,
            el_type,
            mark: 0,
            is_new: false,
        });
        id
    }

    /// Put a stored vertex back at its old index.
    /// Index managers must already hold the stored state.
    #[cfg(feature = "serde")]
    pub(crate) fn restore_vertex(
        &mut self,
        idx: usize,
        coords: na::SVector<f64, WDIM>,
        edge_of: Option<[usize; 2]>,
    ) {
        self.vertices.ensure_len(idx + 1);
        self.vertices.coords[idx] = coords;
        self.vertices.edge_of[idx] = edge_of;
        if let Some(edge) = edge_of {
            self.vertices.midpoints.insert(edge, idx);
        }
    }

    /// Put a stored element back at its old index,
    /// registering it with the sub-entities it refers to.
    /// Index managers must already hold the stored state.
    #[cfg(feature = "serde")]
    pub(crate) fn restore_element(&mut self, element: Element) -> Result<(), GridError> {
        let id = element.index();
        let vertices = element.vertices().to_vec();
        for codim in 1..DIM {
            for (local, verts) in reference::sub_entity_vertices(DIM, codim).iter().enumerate() {
                let mut key: Vec<usize> = verts.iter().map(|&l| vertices[l]).collect();
                key.sort_unstable();
                self.sub_entities[codim - 1].register_at(key, element.indices[codim][local], id)?;
            }
        }
        for &v in &vertices {
            self.vertices.elements[v].push(id);
        }
        self.max_level = self.max_level.max(element.level);

        if self.elements.len() <= id {
            self.elements.resize_with(id + 1, || None);
        }
        self.elements[id] = Some(element);
        Ok(())
    }

    /// Remove an element, freeing its index
    /// and the indices of all sub-entities no longer referenced.
    pub(crate) fn remove_element(&mut self, id: usize) {
        let el = self.elements[id]
            .take()
            .expect("removed a dead element. This is a bug in bisection-grid");

        for codim in 1..DIM {
            for &idx in &el.indices[codim] {
                self.sub_entities[codim - 1].unregister(idx, id, &mut self.index_managers[codim]);
            }
        }
        for &v in el.vertices() {
            let users = &mut self.vertices.elements[v];
            users.retain(|&e| e != id);
            if users.is_empty() {
                if let Some(edge) = self.vertices.edge_of[v].take() {
                    self.vertices.midpoints.remove(&edge);
                }
                self.index_managers[DIM].free(v);
            }
        }
        self.index_managers[0].free(id);
    }

    /// Recompute the finest level after elements were removed.
    pub(crate) fn update_max_level(&mut self) {
        self.max_level = self
            .elements
            .iter()
            .flatten()
            .map(|el| el.level)
            .max()
            .unwrap_or(0);
    }
}

/// Sorted vertex indices of the face opposite local vertex `face`.
pub(crate) fn face_key(vertices: &[usize], face: usize) -> Vec<usize> {
    let mut key: Vec<usize> = vertices
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != face)
        .map(|(_, v)| *v)
        .collect();
    key.sort_unstable();
    key
}
