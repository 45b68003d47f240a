use nalgebra as na;
use std::collections::HashMap;

use super::{face_key, HierarchicalMesh, MacroElement};
use crate::GridError;

/// Boundary id given to domain boundary faces that weren't assigned one explicitly.
pub const DEFAULT_BOUNDARY_ID: i32 = 1;

/// Incremental construction of a macro triangulation.
///
/// Local vertices 0 and 1 of every element span its refinement edge,
/// so the order in which vertices are given matters:
/// neighbouring elements should agree on the refinement edge of their shared faces
/// wherever possible, otherwise refinement has to recurse into neighbours
/// to keep the mesh conforming.
///
/// ```
/// # use bisection_grid::{na, MacroGridBuilder};
/// let mut b = MacroGridBuilder::<2, 2>::new();
/// for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
///     b.add_vertex(na::Vector2::new(x, y));
/// }
/// b.add_element(&[0, 2, 1]);
/// b.add_element(&[2, 0, 3]);
/// let mesh = b.create().expect("valid mesh");
/// assert_eq!(mesh.macro_count(), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct MacroGridBuilder<const DIM: usize, const WDIM: usize> {
    vertices: Vec<na::SVector<f64, WDIM>>,
    elements: Vec<Vec<usize>>,
    el_types: Vec<u8>,
    boundary_ids: HashMap<(usize, usize), i32>,
    owners: Vec<usize>,
}

impl<const DIM: usize, const WDIM: usize> MacroGridBuilder<DIM, WDIM> {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            elements: Vec::new(),
            el_types: Vec::new(),
            boundary_ids: HashMap::new(),
            owners: Vec::new(),
        }
    }

    /// Add a vertex, returning its index.
    pub fn add_vertex(&mut self, coords: na::SVector<f64, WDIM>) -> usize {
        self.vertices.push(coords);
        self.vertices.len() - 1
    }

    /// Add an element of type 0 given its vertex indices in local order,
    /// returning its macro index.
    pub fn add_element(&mut self, vertices: &[usize]) -> usize {
        self.add_element_with_type(vertices, 0)
    }

    /// Add an element with an explicit element type.
    /// The type only affects how tetrahedra are bisected.
    pub fn add_element_with_type(&mut self, vertices: &[usize], el_type: u8) -> usize {
        self.elements.push(vertices.to_vec());
        self.el_types.push(el_type % 3);
        self.owners.push(0);
        self.elements.len() - 1
    }

    /// Set the boundary id of the face opposite local vertex `face` of an element.
    /// Ignored if the face turns out to be in the interior of the domain.
    pub fn set_boundary(&mut self, element: usize, face: usize, id: i32) {
        self.boundary_ids.insert((element, face), id);
    }

    /// Assign an element to the partition of the given rank.
    pub fn set_owner(&mut self, element: usize, rank: usize) -> Result<(), GridError> {
        let owner = self
            .owners
            .get_mut(element)
            .ok_or(GridError::UnknownElement(element))?;
        *owner = rank;
        Ok(())
    }

    /// Validate the input and build the level 0 mesh.
    pub fn create(self) -> Result<HierarchicalMesh<DIM, WDIM>, GridError> {
        let mut mesh = HierarchicalMesh::<DIM, WDIM>::empty()?;

        if self.elements.is_empty() {
            return Err(GridError::InvalidMacroGrid("no elements".to_string()));
        }
        for (el_idx, verts) in self.elements.iter().enumerate() {
            if verts.len() != DIM + 1 {
                return Err(GridError::InvalidMacroGrid(format!(
                    "element {el_idx} has {} vertices, expected {}",
                    verts.len(),
                    DIM + 1
                )));
            }
            if let Some(v) = verts.iter().find(|&&v| v >= self.vertices.len()) {
                return Err(GridError::InvalidMacroGrid(format!(
                    "element {el_idx} refers to vertex {v} which doesn't exist"
                )));
            }
            let mut sorted = verts.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != verts.len() {
                return Err(GridError::InvalidMacroGrid(format!(
                    "element {el_idx} has repeated vertices"
                )));
            }
        }

        // identify neighbours by their shared faces
        let mut faces: HashMap<Vec<usize>, Vec<(usize, usize)>> = HashMap::new();
        for (el_idx, verts) in self.elements.iter().enumerate() {
            for face in 0..=DIM {
                faces
                    .entry(face_key(verts, face))
                    .or_default()
                    .push((el_idx, face));
            }
        }

        let mut neighbours = vec![vec![None; DIM + 1]; self.elements.len()];
        let mut boundary = vec![vec![None; DIM + 1]; self.elements.len()];
        for (key, sharing) in &faces {
            match sharing.as_slice() {
                [(el, face)] => {
                    boundary[*el][*face] = Some(
                        self.boundary_ids
                            .get(&(*el, *face))
                            .copied()
                            .unwrap_or(DEFAULT_BOUNDARY_ID),
                    );
                }
                [(el_a, face_a), (el_b, face_b)] => {
                    neighbours[*el_a][*face_a] = Some(*el_b);
                    neighbours[*el_b][*face_b] = Some(*el_a);
                }
                _ => {
                    return Err(GridError::InvalidMacroGrid(format!(
                        "face {key:?} is shared by {} elements",
                        sharing.len()
                    )));
                }
            }
        }

        for coords in self.vertices {
            mesh.add_vertex(coords);
        }
        for (macro_index, verts) in self.elements.into_iter().enumerate() {
            let root = mesh.insert_element(verts, None, 0, macro_index, self.el_types[macro_index]);
            mesh.macro_elements.push(MacroElement {
                root,
                neighbours: std::mem::take(&mut neighbours[macro_index]),
                boundary: std::mem::take(&mut boundary[macro_index]),
                owner: self.owners[macro_index],
            });
        }

        Ok(mesh)
    }
}
