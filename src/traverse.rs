//! Depth-first traversal of the refinement trees.
//!
//! The mesh itself only stores topology and vertex positions.
//! Everything a traversal hands out about an element
//! (coordinates, neighbours, boundary ids) is reconstructed from the frame of its parent,
//! the same way for every element of the hierarchy.

use nalgebra as na;

use crate::mesh::{face_key, HierarchicalMesh};
use crate::reference;

/// Which elements a traversal emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraverseMode {
    /// Every element of the given level.
    Level(usize),
    /// Every element without children, whatever its level.
    Leaf,
}

/// Which macro elements a traversal visits, relative to the local rank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PartitionType {
    /// Every macro element.
    #[default]
    All,
    /// Macro elements owned by the local rank.
    InteriorBorder,
    /// Elements owned by another rank that share a face with an element
    /// owned by the local rank.
    Ghost,
}

/// Everything a traversal knows about one element.
#[derive(Clone, Debug, PartialEq)]
pub struct ElInfo<const WDIM: usize> {
    /// Hierarchic index of the element.
    pub element: usize,
    /// Index of the macro element whose tree contains this element.
    pub macro_index: usize,
    /// Refinement level, 0 for macro elements.
    pub level: usize,
    /// Bisection type, only meaningful for tetrahedra.
    pub el_type: u8,
    /// Vertex coordinates in local order.
    pub coords: Vec<na::SVector<f64, WDIM>>,
    /// Element across each face.
    /// May be coarser than this element if no element of this element's level
    /// (or finer, in leaf traversals) shares the whole face.
    pub neighbours: Vec<Option<usize>>,
    /// Local number of the neighbour's vertex opposite the shared face.
    pub opp_vertex: Vec<Option<usize>>,
    /// Coordinates of the neighbour's vertex opposite the shared face.
    pub opp_coords: Vec<Option<na::SVector<f64, WDIM>>>,
    /// Boundary id of each face, `None` in the interior of the domain.
    pub boundary: Vec<Option<i32>>,
}

/// Build the frame of a macro element's root.
pub fn fill_macro_info<const DIM: usize, const WDIM: usize>(
    mesh: &HierarchicalMesh<DIM, WDIM>,
    macro_index: usize,
    mode: TraverseMode,
) -> ElInfo<WDIM> {
    let macro_el = mesh.macro_element(macro_index);
    let root = mesh.element(macro_el.root);
    let vertices = root.vertices();

    let mut info = ElInfo {
        element: macro_el.root,
        macro_index,
        level: 0,
        el_type: root.el_type,
        coords: vertices
            .iter()
            .map(|&v| *mesh.vertex_coords(v))
            .collect(),
        neighbours: vec![None; DIM + 1],
        opp_vertex: vec![None; DIM + 1],
        opp_coords: vec![None; DIM + 1],
        boundary: macro_el.boundary.clone(),
    };

    for face in 0..=DIM {
        let key = face_key(vertices, face);
        let nb = find_neighbour(mesh, info.element, &key, mode, 0)
            .or_else(|| macro_el.neighbours[face].map(|m| mesh.macro_element(m).root));
        set_neighbour(mesh, &mut info, face, nb, &key);
    }

    info
}

/// Build the frame of child `ichild` of the element described by `parent`.
///
/// # Panics
///
/// If the parent element has no children.
pub fn fill_el_info<const DIM: usize, const WDIM: usize>(
    mesh: &HierarchicalMesh<DIM, WDIM>,
    parent: &ElInfo<WDIM>,
    ichild: usize,
    mode: TraverseMode,
) -> ElInfo<WDIM> {
    let children = mesh
        .element(parent.element)
        .children
        .expect("filled the frame of a child of a leaf. This is a bug in bisection-grid");
    let child_id = children[ichild];
    let child = mesh.element(child_id);
    let child_verts = child.vertices();

    let new = reference::new_vertex(DIM);
    let cv = reference::child_vertices(DIM, parent.el_type, ichild);
    let mid = (parent.coords[0] + parent.coords[1]) * 0.5;
    // the refinement edge endpoint this child doesn't contain
    let missing = 1 - ichild;

    let mut info = ElInfo {
        element: child_id,
        macro_index: parent.macro_index,
        level: parent.level + 1,
        el_type: child.el_type,
        coords: cv
            .iter()
            .map(|&l| if l == new { mid } else { parent.coords[l] })
            .collect(),
        neighbours: vec![None; DIM + 1],
        opp_vertex: vec![None; DIM + 1],
        opp_coords: vec![None; DIM + 1],
        boundary: vec![None; DIM + 1],
    };

    for face in 0..=DIM {
        let key = face_key(child_verts, face);
        let nb = find_neighbour(mesh, child_id, &key, mode, info.level);

        let parent_face = match cv[face] {
            0 | 1 => {
                // the face between the two children
                set_neighbour(mesh, &mut info, face, nb, &key);
                continue;
            }
            l if l == new => missing,
            l => l,
        };
        info.boundary[face] = parent.boundary[parent_face];
        match nb {
            Some(_) => set_neighbour(mesh, &mut info, face, nb, &key),
            None => {
                info.neighbours[face] = parent.neighbours[parent_face];
                info.opp_vertex[face] = parent.opp_vertex[parent_face];
                info.opp_coords[face] = parent.opp_coords[parent_face];
            }
        }
    }

    info
}

/// Rebuild the frame of any element by descending from its macro element.
pub fn el_info_of<const DIM: usize, const WDIM: usize>(
    mesh: &HierarchicalMesh<DIM, WDIM>,
    element: usize,
    mode: TraverseMode,
) -> ElInfo<WDIM> {
    let mut path = Vec::new();
    let mut current = element;
    while let Some(parent) = mesh.element(current).parent {
        let children = mesh.element(parent).children.unwrap_or_default();
        path.push(if children[0] == current { 0 } else { 1 });
        current = parent;
    }

    let mut info = fill_macro_info(mesh, mesh.element(current).macro_index, mode);
    for &ichild in path.iter().rev() {
        info = fill_el_info(mesh, &info, ichild, mode);
    }
    info
}

/// The element on the other side of the face with sorted vertices `key`
/// that shares the whole face, if there is one.
fn find_neighbour<const DIM: usize, const WDIM: usize>(
    mesh: &HierarchicalMesh<DIM, WDIM>,
    element: usize,
    key: &[usize],
    mode: TraverseMode,
    level: usize,
) -> Option<usize> {
    let candidates = mesh
        .elements_containing_face(key)
        .iter()
        .copied()
        .filter(|&c| !mesh.are_related(c, element));
    match mode {
        TraverseMode::Level(_) => candidates
            .filter(|&c| mesh.element(c).level <= level)
            .max_by_key(|&c| mesh.element(c).level),
        TraverseMode::Leaf => candidates.max_by_key(|&c| mesh.element(c).level),
    }
}

fn set_neighbour<const DIM: usize, const WDIM: usize>(
    mesh: &HierarchicalMesh<DIM, WDIM>,
    info: &mut ElInfo<WDIM>,
    face: usize,
    nb: Option<usize>,
    key: &[usize],
) {
    info.neighbours[face] = nb;
    let opp = nb.and_then(|nb| {
        mesh.element(nb)
            .vertices()
            .iter()
            .position(|v| !key.contains(v))
    });
    info.opp_vertex[face] = opp;
    info.opp_coords[face] = nb
        .zip(opp)
        .map(|(nb, l)| *mesh.vertex_coords(mesh.element(nb).vertices()[l]));
}

/// Stack of element frames for a depth-first walk over every refinement tree.
///
/// A traversal is started with [`go_first_element`][Self::go_first_element]
/// and continued with [`go_next_el_info`][Self::go_next_el_info].
/// The stack also works as an [`Iterator`] over owned copies of the frames.
#[derive(Debug)]
pub struct TraverseStack<'m, const DIM: usize, const WDIM: usize> {
    mesh: &'m HierarchicalMesh<DIM, WDIM>,
    mode: TraverseMode,
    partition: PartitionType,
    rank: usize,
    frames: Vec<ElInfo<WDIM>>,
    /// number of children of each frame that were already descended into
    info_stack: Vec<usize>,
    next_macro: usize,
}

impl<'m, const DIM: usize, const WDIM: usize> TraverseStack<'m, DIM, WDIM> {
    /// Create a traversal that hasn't started yet.
    pub fn new(
        mesh: &'m HierarchicalMesh<DIM, WDIM>,
        mode: TraverseMode,
        partition: PartitionType,
        rank: usize,
    ) -> Self {
        Self {
            mesh,
            mode,
            partition,
            rank,
            frames: Vec::new(),
            info_stack: Vec::new(),
            next_macro: 0,
        }
    }

    /// Which elements this traversal emits.
    #[inline]
    pub fn mode(&self) -> TraverseMode {
        self.mode
    }

    /// Start over from the first macro element and return the first emitted frame.
    pub fn go_first_element(&mut self) -> Option<&ElInfo<WDIM>> {
        self.frames.clear();
        self.info_stack.clear();
        self.next_macro = 0;
        self.go_next_el_info()
    }

    /// Advance to the next emitted frame.
    pub fn go_next_el_info(&mut self) -> Option<&ElInfo<WDIM>> {
        loop {
            let Some(top) = self.frames.last() else {
                let macro_index = self.next_accepted_macro()?;
                let info = fill_macro_info(self.mesh, macro_index, self.mode);
                self.push(info);
                if self.emits_top() {
                    return self.frames.last();
                }
                continue;
            };

            let may_descend = match self.mode {
                TraverseMode::Leaf => true,
                TraverseMode::Level(l) => top.level < l,
            };
            let depth = self.frames.len() - 1;
            let visited = self.info_stack[depth];
            let has_children = self.mesh.element(top.element).children.is_some();

            if may_descend && has_children && visited < 2 {
                let child = fill_el_info(self.mesh, top, visited, self.mode);
                self.info_stack[depth] += 1;
                self.push(child);
                if self.emits_top() {
                    return self.frames.last();
                }
            } else {
                self.frames.pop();
                self.info_stack.pop();
            }
        }
    }

    fn push(&mut self, info: ElInfo<WDIM>) {
        self.frames.push(info);
        self.info_stack.push(0);
    }

    fn emits_top(&self) -> bool {
        let Some(top) = self.frames.last() else {
            return false;
        };
        let in_view = match self.mode {
            TraverseMode::Leaf => self.mesh.element(top.element).is_leaf(),
            TraverseMode::Level(l) => top.level == l,
        };
        in_view && (self.partition != PartitionType::Ghost || self.touches_rank(top))
    }

    /// Whether a neighbour of the frame's element is owned by the local rank.
    fn touches_rank(&self, info: &ElInfo<WDIM>) -> bool {
        info.neighbours.iter().flatten().any(|&nb| {
            let macro_index = self.mesh.element(nb).macro_index;
            self.mesh.macro_element(macro_index).owner == self.rank
        })
    }

    fn next_accepted_macro(&mut self) -> Option<usize> {
        while self.next_macro < self.mesh.macro_count() {
            let m = self.next_macro;
            self.next_macro += 1;
            if accepts_macro(self.mesh, m, self.partition, self.rank) {
                return Some(m);
            }
        }
        None
    }
}

impl<'m, const DIM: usize, const WDIM: usize> Iterator for TraverseStack<'m, DIM, WDIM> {
    type Item = ElInfo<WDIM>;

    fn next(&mut self) -> Option<Self::Item> {
        self.go_next_el_info().cloned()
    }
}

/// Check whether a traversal with the given partition filter visits a macro element.
/// Ghost traversals additionally skip the elements inside it
/// that don't touch the local partition.
pub(crate) fn accepts_macro<const DIM: usize, const WDIM: usize>(
    mesh: &HierarchicalMesh<DIM, WDIM>,
    macro_index: usize,
    partition: PartitionType,
    rank: usize,
) -> bool {
    let m = mesh.macro_element(macro_index);
    match partition {
        PartitionType::All => true,
        PartitionType::InteriorBorder => m.owner == rank,
        PartitionType::Ghost => {
            m.owner != rank
                && m.neighbours
                    .iter()
                    .flatten()
                    .any(|&nb| mesh.macro_element(nb).owner == rank)
        }
    }
}
