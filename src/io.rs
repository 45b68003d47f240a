//! Saving and restoring grids as RON.
//!
//! A saved grid keeps every hierarchic index,
//! so data stored alongside it by index stays valid after reading it back.

use std::{collections::HashSet, fs, path::Path, path::PathBuf};

use nalgebra as na;

use crate::{
    mesh::{Element, HierarchicalMesh, MacroElement},
    reference, AdaptiveGrid, GridError, IndexManager,
};

/// Conversion to and from a plain data type that `serde` can handle.
pub trait ConvertToSerializable {
    /// The plain data type.
    type SerializableType: serde::Serialize + serde::de::DeserializeOwned;
    /// Convert to the plain data type.
    fn to_serializable(&self) -> Self::SerializableType;
    /// Convert from the plain data type.
    fn from_serializable(s: Self::SerializableType) -> Result<Self, GridError>
    where
        Self: Sized;
}

/// A vertex as stored on disk.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SerializableVertex {
    coords: Vec<f64>,
    /// the bisected edge the vertex is the midpoint of
    edge_of: Option<[usize; 2]>,
}

/// An element as stored on disk.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SerializableElement {
    indices: Vec<Vec<usize>>,
    parent: Option<usize>,
    children: Option<[usize; 2]>,
    level: usize,
    macro_index: usize,
    el_type: u8,
    mark: i8,
}

/// A macro element as stored on disk.
/// Owners are stored in a separate file.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SerializableMacroElement {
    root: usize,
    neighbours: Vec<Option<usize>>,
    boundary: Vec<Option<i32>>,
}

/// A whole refinement hierarchy as stored on disk.
///
/// Vertex and element slots whose index is currently free are `None`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SerializableMesh {
    dim: usize,
    world_dim: usize,
    vertices: Vec<Option<SerializableVertex>>,
    elements: Vec<Option<SerializableElement>>,
    macro_elements: Vec<SerializableMacroElement>,
    index_managers: Vec<IndexManager>,
}

/// The file contents written by [`AdaptiveGrid::write_grid`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct GridFile {
    time: f64,
    mesh: SerializableMesh,
}

impl<const DIM: usize, const WDIM: usize> ConvertToSerializable for HierarchicalMesh<DIM, WDIM> {
    type SerializableType = SerializableMesh;

    fn to_serializable(&self) -> SerializableMesh {
        let vertex_slots = self.index_managers[DIM].size();
        let vertices = (0..vertex_slots)
            .map(|v| {
                self.index_managers[DIM]
                    .is_live(v)
                    .then(|| SerializableVertex {
                        coords: self.vertices.coords[v].iter().copied().collect(),
                        edge_of: self.vertices.edge_of[v],
                    })
            })
            .collect();
        let elements = self
            .elements
            .iter()
            .map(|slot| {
                slot.as_ref().map(|el| SerializableElement {
                    indices: el.indices.clone(),
                    parent: el.parent,
                    children: el.children,
                    level: el.level,
                    macro_index: el.macro_index,
                    el_type: el.el_type,
                    mark: el.mark,
                })
            })
            .collect();
        let macro_elements = self
            .macro_elements
            .iter()
            .map(|m| SerializableMacroElement {
                root: m.root,
                neighbours: m.neighbours.clone(),
                boundary: m.boundary.clone(),
            })
            .collect();

        SerializableMesh {
            dim: DIM,
            world_dim: WDIM,
            vertices,
            elements,
            macro_elements,
            index_managers: self.index_managers.clone(),
        }
    }

    fn from_serializable(s: SerializableMesh) -> Result<Self, GridError> {
        if s.dim != DIM || s.world_dim != WDIM {
            return Err(GridError::DimensionMismatch {
                dim: DIM,
                world_dim: WDIM,
                found_dim: s.dim,
                found_world_dim: s.world_dim,
            });
        }
        let mut mesh = Self::empty()?;
        check_references(&s).map_err(GridError::Serialization)?;
        mesh.index_managers = s.index_managers;

        for (idx, vertex) in s.vertices.into_iter().enumerate() {
            let Some(vertex) = vertex else { continue };
            mesh.restore_vertex(
                idx,
                na::SVector::from_column_slice(&vertex.coords),
                vertex.edge_of,
            );
        }

        for el in s.elements.into_iter().flatten() {
            mesh.restore_element(Element {
                indices: el.indices,
                parent: el.parent,
                children: el.children,
                level: el.level,
                macro_index: el.macro_index,
                el_type: el.el_type,
                mark: el.mark,
                is_new: false,
            })?;
        }
        let element_slots = mesh.index_managers[0].size();
        mesh.elements.resize_with(element_slots, || None);

        for m in s.macro_elements {
            mesh.macro_elements.push(MacroElement {
                root: m.root,
                neighbours: m.neighbours,
                boundary: m.boundary,
                owner: 0,
            });
        }

        // faces and edges only exist as parts of elements
        for codim in 1..DIM {
            let users = &mesh.sub_entities[codim - 1].elements;
            let im = &mesh.index_managers[codim];
            if let Some(idx) = (0..im.size()).find(|&i| {
                im.is_live(i) && users.get(i).map_or(true, |u| u.is_empty())
            }) {
                return Err(GridError::Serialization(format!(
                    "codimension {codim} index {idx} is live but no element refers to it"
                )));
            }
        }

        Ok(mesh)
    }
}

/// Check that everything a stored mesh refers to exists and fits together.
/// Sub-entities shared between elements are checked while restoring them.
fn check_references(s: &SerializableMesh) -> Result<(), String> {
    let dim = s.dim;
    if s.index_managers.len() != dim + 1 {
        return Err(format!(
            "expected {} index managers, found {}",
            dim + 1,
            s.index_managers.len()
        ));
    }
    let ims = &s.index_managers;
    let element = |idx: usize| s.elements.get(idx).and_then(Option::as_ref);

    // slots are filled exactly where the index managers say an index is live
    if s.vertices.len() != ims[dim].size() {
        return Err(format!(
            "{} vertex slots for {} vertex indices",
            s.vertices.len(),
            ims[dim].size()
        ));
    }
    if s.elements.len() > ims[0].size() {
        return Err(format!(
            "{} element slots for {} element indices",
            s.elements.len(),
            ims[0].size()
        ));
    }
    for idx in 0..ims[0].size() {
        if element(idx).is_some() != ims[0].is_live(idx) {
            return Err(format!("element slot {idx} disagrees with the free list"));
        }
    }

    let mut midpoints = HashSet::new();
    for (idx, vertex) in s.vertices.iter().enumerate() {
        if vertex.is_some() != ims[dim].is_live(idx) {
            return Err(format!("vertex slot {idx} disagrees with the free list"));
        }
        let Some(vertex) = vertex else { continue };
        if vertex.coords.len() != s.world_dim {
            return Err(format!(
                "vertex {idx} has {} coordinates",
                vertex.coords.len()
            ));
        }
        if let Some([a, b]) = vertex.edge_of {
            let valid = a < b && [a, b].iter().all(|&v| v != idx && ims[dim].is_live(v));
            if !valid || !midpoints.insert([a, b]) {
                return Err(format!(
                    "vertex {idx} is the midpoint of an invalid edge ({a}, {b})"
                ));
            }
        }
    }

    let macro_count = s.macro_elements.len();
    for (macro_index, m) in s.macro_elements.iter().enumerate() {
        if m.neighbours.len() != dim + 1 || m.boundary.len() != dim + 1 {
            return Err(format!(
                "macro element {macro_index} has {} neighbours and {} boundary ids",
                m.neighbours.len(),
                m.boundary.len()
            ));
        }
        if let Some(nb) = m.neighbours.iter().flatten().find(|&&nb| nb >= macro_count) {
            return Err(format!(
                "macro element {macro_index} has an unknown neighbour {nb}"
            ));
        }
        match element(m.root) {
            Some(root) if root.macro_index == macro_index && root.parent.is_none() => {}
            _ => {
                return Err(format!(
                    "root {} of macro element {macro_index} doesn't exist",
                    m.root
                ))
            }
        }
    }

    let new = reference::new_vertex(dim);
    for (idx, el) in s.elements.iter().enumerate() {
        let Some(el) = el else { continue };
        let well_formed = el.indices.len() == dim + 1
            && el.indices[0] == [idx]
            && (1..=dim).all(|c| el.indices[c].len() == reference::sub_entity_count(dim, c));
        if !well_formed {
            return malformed(idx, "malformed indices");
        }
        for codim in 1..=dim {
            if let Some(i) = el.indices[codim].iter().find(|&&i| !ims[codim].is_live(i)) {
                return malformed(idx, format!("a dead codimension {codim} index {i}"));
            }
        }
        let vertices = &el.indices[dim];
        if vertices.iter().collect::<HashSet<_>>().len() != dim + 1 {
            return malformed(idx, "repeated vertices");
        }
        if el.el_type > 2 {
            return malformed(idx, format!("an unknown element type {}", el.el_type));
        }
        if el.macro_index >= macro_count {
            return malformed(idx, format!("an unknown macro element {}", el.macro_index));
        }

        match el.parent {
            None => {
                if s.macro_elements[el.macro_index].root != idx || el.level != 0 {
                    return malformed(idx, "no parent but isn't a macro element root");
                }
            }
            Some(p) => {
                let fits = element(p).is_some_and(|parent| {
                    parent.children.is_some_and(|c| c.contains(&idx))
                        && parent.level + 1 == el.level
                        && parent.macro_index == el.macro_index
                });
                if !fits {
                    return malformed(idx, format!("a parent {p} that doesn't have it as a child"));
                }
            }
        }

        let Some(children) = el.children else { continue };
        if children[0] == children[1] {
            return malformed(idx, "the same element as both children");
        }
        let mut mid = None;
        for (child_no, &c) in children.iter().enumerate() {
            let Some(child) = element(c).filter(|child| child.parent == Some(idx)) else {
                return malformed(idx, format!("a child {c} that doesn't have it as the parent"));
            };
            if child.indices.len() != dim + 1 || child.indices[dim].len() != dim + 1 {
                return malformed(idx, format!("a malformed child {c}"));
            }
            if child.el_type != reference::child_type(dim, el.el_type) {
                return malformed(idx, format!("a child {c} of the wrong type"));
            }
            let table = reference::child_vertices(dim, el.el_type, child_no);
            for (&l, &v) in table.iter().zip(&child.indices[dim]) {
                if l == new {
                    if *mid.get_or_insert(v) != v {
                        return malformed(idx, "children with different midpoints");
                    }
                } else if vertices[l] != v {
                    return malformed(idx, format!("a child {c} with the wrong vertices"));
                }
            }
        }
        let edge = [
            vertices[0].min(vertices[1]),
            vertices[0].max(vertices[1]),
        ];
        let midpoint_of = mid
            .and_then(|m| s.vertices.get(m))
            .and_then(Option::as_ref)
            .and_then(|v| v.edge_of);
        if midpoint_of != Some(edge) {
            return malformed(idx, "children that don't split its refinement edge");
        }
    }

    Ok(())
}

fn malformed(element: usize, what: impl std::fmt::Display) -> Result<(), String> {
    Err(format!("element {element} has {what}"))
}

/// Path of the file holding the owner rank of each macro element.
fn owner_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("_own");
    PathBuf::from(name)
}

impl<const DIM: usize, const WDIM: usize> AdaptiveGrid<DIM, WDIM> {
    /// Save the grid with a time stamp.
    ///
    /// The owner rank of each macro element goes to a second file
    /// named like `path` with `_own` appended.
    pub fn write_grid(&self, path: impl AsRef<Path>, time: f64) -> Result<(), GridError> {
        let path = path.as_ref();
        let file = GridFile {
            time,
            mesh: self.mesh.to_serializable(),
        };
        let ron_s = ron::to_string(&file).map_err(|e| GridError::Serialization(e.to_string()))?;
        fs::write(path, ron_s).map_err(|e| GridError::io(path, e))?;

        let own_path = owner_path(path);
        let owners = ron::to_string(&self.mesh.owners())
            .map_err(|e| GridError::Serialization(e.to_string()))?;
        fs::write(&own_path, owners).map_err(|e| GridError::io(&own_path, e))?;

        log::info!(
            "wrote grid with {} elements at time {time} to {}",
            self.mesh.element_count(),
            path.display()
        );
        Ok(())
    }

    /// Restore a grid saved with [`write_grid`][Self::write_grid],
    /// returning it with its time stamp.
    ///
    /// If the owner file is missing, every macro element is owned by rank 0.
    pub fn read_grid(path: impl AsRef<Path>) -> Result<(Self, f64), GridError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| GridError::io(path, e))?;
        let file: GridFile =
            ron::from_str(&content).map_err(|e| GridError::Serialization(e.to_string()))?;
        let mut mesh = HierarchicalMesh::<DIM, WDIM>::from_serializable(file.mesh)?;

        let own_path = owner_path(path);
        match fs::read_to_string(&own_path) {
            Ok(content) => {
                let owners: Vec<usize> = ron::from_str(&content)
                    .map_err(|e| GridError::Serialization(e.to_string()))?;
                if owners.len() != mesh.macro_count() {
                    return Err(GridError::Serialization(format!(
                        "{} owners for {} macro elements",
                        owners.len(),
                        mesh.macro_count()
                    )));
                }
                for (macro_index, rank) in owners.into_iter().enumerate() {
                    mesh.set_owner(macro_index, rank)?;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no owner file at {}, using rank 0", own_path.display());
            }
            Err(e) => return Err(GridError::io(own_path, e)),
        }

        log::info!(
            "read grid with {} elements at time {} from {}",
            mesh.element_count(),
            file.time,
            path.display()
        );
        Ok((AdaptiveGrid::new(mesh), file.time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bisection-grid-{}-{name}.ron", std::process::id()))
    }

    #[test]
    fn adapted_grid_round_trip() {
        let mut mesh = twin_tets();
        mesh.set_owner(1, 3).unwrap();
        let mut grid = AdaptiveGrid::new(mesh);
        grid.global_refine(3).unwrap();
        // free some indices so that the free lists are not empty
        let leaves: Vec<usize> = grid.mesh().leaves().collect();
        for el in leaves {
            grid.mark(el, -1).unwrap();
        }
        grid.pre_adapt();
        grid.adapt().unwrap();
        grid.post_adapt();
        let corner = grid.mesh().leaves().next().unwrap();
        grid.mark(corner, 1).unwrap();

        let path = temp_path("round-trip");
        grid.write_grid(&path, 0.25).unwrap();
        let (read, time) = AdaptiveGrid::<3, 3>::read_grid(&path).unwrap();
        assert_eq!(time, 0.25);

        assert_eq!(read.max_level(), grid.max_level());
        assert_eq!(read.mesh().owners(), vec![0, 3]);
        assert_eq!(read.mesh().element_count(), grid.mesh().element_count());
        assert_eq!(read.mesh().vertex_count(), grid.mesh().vertex_count());
        for codim in 0..=3 {
            assert_eq!(
                read.mesh().index_manager(codim).unwrap(),
                grid.mesh().index_manager(codim).unwrap()
            );
            assert_eq!(read.leaf_size(codim).unwrap(), grid.leaf_size(codim).unwrap());
        }
        for el in grid.mesh().elements() {
            for codim in 0..=3 {
                assert_eq!(
                    read.mesh().sub_indices(el, codim).unwrap(),
                    grid.mesh().sub_indices(el, codim).unwrap()
                );
            }
            assert_eq!(read.get_mark(el).unwrap(), grid.get_mark(el).unwrap());
        }
        assert_consistent(read.mesh());

        // the restored grid keeps adapting the same way
        let mut read = read;
        grid.adapt().unwrap();
        read.adapt().unwrap();
        assert_eq!(read.mesh().leaf_count(), grid.mesh().leaf_count());

        fs::remove_file(&path).unwrap();
        fs::remove_file(owner_path(&path)).unwrap();
    }

    #[test]
    fn missing_owner_file_means_rank_zero() {
        let mut mesh = unit_square();
        mesh.set_owner(0, 1).unwrap();
        let grid = AdaptiveGrid::new(mesh);
        let path = temp_path("no-owners");
        grid.write_grid(&path, 1.0).unwrap();
        fs::remove_file(owner_path(&path)).unwrap();

        let (read, _) = AdaptiveGrid::<2, 2>::read_grid(&path).unwrap();
        assert_eq!(read.mesh().owners(), vec![0, 0]);
        fs::remove_file(&path).unwrap();
    }

    /// A square refined twice and coarsened once, so every free list has entries.
    fn coarsened_square() -> SerializableMesh {
        let mut mesh = unit_square();
        refine_all(&mut mesh, 2);
        let leaves: Vec<usize> = mesh.leaves().collect();
        for l in leaves {
            mesh.mark(l, -1).unwrap();
        }
        assert!(mesh.coarsen() > 0);
        mesh.to_serializable()
    }

    fn assert_rejected(s: SerializableMesh) {
        let res = HierarchicalMesh::<2, 2>::from_serializable(s);
        assert!(
            matches!(res, Err(GridError::Serialization(_))),
            "corrupted mesh was accepted: {res:?}"
        );
    }

    /// Index of the first live element that has children.
    fn first_parent(s: &SerializableMesh) -> usize {
        s.elements
            .iter()
            .position(|el| el.as_ref().is_some_and(|el| el.children.is_some()))
            .unwrap()
    }

    fn el(s: &mut SerializableMesh, idx: usize) -> &mut SerializableElement {
        s.elements[idx].as_mut().unwrap()
    }

    #[test]
    fn intact_mesh_is_accepted() {
        let s = coarsened_square();
        let mesh = HierarchicalMesh::<2, 2>::from_serializable(s.clone()).unwrap();
        assert_consistent(&mesh);
        assert_eq!(mesh.to_serializable(), s);
    }

    #[test]
    fn broken_hierarchy_is_rejected() {
        let s = coarsened_square();
        let parent = first_parent(&s);
        let [c0, c1] = s.elements[parent].as_ref().unwrap().children.unwrap();
        let leaf = s
            .elements
            .iter()
            .position(|el| el.as_ref().is_some_and(|el| el.children.is_none()))
            .unwrap();

        let mut bad = s.clone();
        el(&mut bad, leaf).children = Some([40, 41]);
        assert_rejected(bad);

        let mut bad = s.clone();
        el(&mut bad, parent).children = Some([c1, c0]);
        assert_rejected(bad);

        let mut bad = s.clone();
        el(&mut bad, parent).children = Some([c0, c0]);
        assert_rejected(bad);

        let mut bad = s.clone();
        el(&mut bad, c0).parent = Some(c1);
        assert_rejected(bad);

        let mut bad = s.clone();
        el(&mut bad, c0).parent = None;
        assert_rejected(bad);

        let mut bad = s.clone();
        el(&mut bad, c0).level += 1;
        assert_rejected(bad);

        let mut bad = s.clone();
        el(&mut bad, c0).el_type = 3;
        assert_rejected(bad);

        let mut bad = s.clone();
        el(&mut bad, c0).macro_index = 2;
        assert_rejected(bad);

        // a child that doesn't come from bisecting the parent's refinement edge
        let mut bad = s;
        el(&mut bad, c0).indices[2].swap(0, 1);
        assert_rejected(bad);
    }

    #[test]
    fn broken_macro_elements_are_rejected() {
        let s = coarsened_square();

        let mut bad = s.clone();
        bad.macro_elements[0].neighbours.pop();
        assert_rejected(bad);

        let mut bad = s.clone();
        bad.macro_elements[0].boundary.push(None);
        assert_rejected(bad);

        let mut bad = s.clone();
        bad.macro_elements[1].neighbours[0] = Some(7);
        assert_rejected(bad);

        let mut bad = s.clone();
        bad.macro_elements[1].root = bad.macro_elements[0].root;
        assert_rejected(bad);

        let mut bad = s;
        bad.macro_elements.pop();
        assert_rejected(bad);
    }

    #[test]
    fn broken_indices_are_rejected() {
        let s = coarsened_square();
        let parent = first_parent(&s);
        let dead_edge = (0..s.index_managers[1].size())
            .find(|&i| !s.index_managers[1].is_live(i))
            .unwrap();
        let dead_element = (0..s.index_managers[0].size())
            .find(|&i| !s.index_managers[0].is_live(i))
            .unwrap();

        let mut bad = s.clone();
        el(&mut bad, parent).indices[1][0] = dead_edge;
        assert_rejected(bad);

        let mut bad = s.clone();
        el(&mut bad, parent).indices[1][0] = s.index_managers[1].size() + 5;
        assert_rejected(bad);

        // two different edges of one element under the same index
        let mut bad = s.clone();
        let e = el(&mut bad, parent);
        e.indices[1][0] = e.indices[1][1];
        assert_rejected(bad);

        let mut bad = s.clone();
        el(&mut bad, parent).indices[2][2] = s.index_managers[2].size();
        assert_rejected(bad);

        // a slot filled although its index is free, and the other way round
        let mut bad = s.clone();
        bad.elements[dead_element] = bad.elements[parent].clone();
        assert_rejected(bad);

        let mut bad = s.clone();
        bad.elements[parent] = None;
        assert_rejected(bad);

        let mut bad = s.clone();
        bad.index_managers.pop();
        assert_rejected(bad);

        let mut bad = s.clone();
        bad.vertices.pop();
        assert_rejected(bad);

        let mut bad = s.clone();
        let v = bad.vertices.iter_mut().flatten().next().unwrap();
        v.coords.push(0.0);
        assert_rejected(bad);

        let mut bad = s;
        let v = bad.vertices.iter_mut().flatten().last().unwrap();
        v.edge_of = Some([0, 40]);
        assert_rejected(bad);
    }

    #[test]
    fn corrupted_file_is_a_serialization_error() {
        let mut mesh = unit_square();
        refine_all(&mut mesh, 1);
        let path = temp_path("corrupted");
        AdaptiveGrid::new(mesh).write_grid(&path, 0.0).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let corrupted = content.replacen("children:None", "children:Some((40,41))", 1);
        assert_ne!(content, corrupted);
        fs::write(&path, corrupted).unwrap();
        assert!(matches!(
            AdaptiveGrid::<2, 2>::read_grid(&path),
            Err(GridError::Serialization(_))
        ));

        fs::remove_file(&path).unwrap();
        fs::remove_file(owner_path(&path)).unwrap();
    }

    #[test]
    fn read_errors() {
        assert!(matches!(
            AdaptiveGrid::<2, 2>::read_grid(temp_path("does-not-exist")),
            Err(GridError::Io { .. })
        ));

        let path = temp_path("mismatch");
        AdaptiveGrid::new(unit_square()).write_grid(&path, 0.0).unwrap();
        assert!(matches!(
            AdaptiveGrid::<2, 3>::read_grid(&path),
            Err(GridError::DimensionMismatch {
                found_dim: 2,
                found_world_dim: 2,
                ..
            })
        ));
        fs::write(&path, "(time: 0.0, mesh: ())").unwrap();
        assert!(matches!(
            AdaptiveGrid::<2, 2>::read_grid(&path),
            Err(GridError::Serialization(_))
        ));
        fs::remove_file(&path).unwrap();
        fs::remove_file(owner_path(&path)).unwrap();
    }
}
