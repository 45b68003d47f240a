//! Loading macro triangulations generated with [`gmsh`](https://www.gmsh.info/).
//!
//! Only version 4.1 of the MSH format is supported,
//! as per the [`mshio`] library.

use std::collections::{HashMap, HashSet};

use nalgebra as na;

use crate::{mesh::face_key, GridError, HierarchicalMesh, MacroGridBuilder};

/// Error in loading a mesh from a Gmsh .msh file.
#[derive(thiserror::Error, Debug)]
pub enum GmshError {
    /// Error parsing the .msh file.
    ///
    /// (Implementation note: parser error converted to string
    /// to avoid lifetime issues with the byte slices it contains)
    #[error("Parsing the .msh data failed: {0}")]
    ParseError(String),
    /// The given .msh file contains no nodes.
    #[error("Invalid .msh data: no nodes")]
    MissingNodes,
    /// The given .msh file contains no elements of the supported type.
    #[error("Invalid .msh data: no elements of the correct type")]
    MissingElements,
    /// An element refers to a node tag that can't be a valid node.
    #[error("Invalid .msh data: node tag {0}")]
    InvalidNodeTag(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct EntityId {
    dim: i32,
    tag: i32,
}

#[derive(Clone, Debug, Default)]
struct PhysicalGroup {
    entities: HashSet<EntityId>,
    nodes: HashSet<usize>,
}

impl PhysicalGroup {
    /// Whether the group contains geometric entities of the given dimension.
    fn has_dim(&self, dim: i32) -> bool {
        self.entities.iter().any(|e| e.dim == dim)
    }
}

/// Load a macro triangulation from a `.msh` file.
///
/// First-order simplices of dimension `DIM` in the file are the macro elements:
/// `Lin2` elements for 1D grids, `Tri3` for 2D and `Tet4` for 3D
/// (see [`ElementType`][mshio::ElementType]).
/// Elements of other types are ignored.
/// Vertex coordinates beyond the first `WDIM` are dropped.
///
/// The first two nodes of each element span its refinement edge,
/// see [`MacroGridBuilder`] for how that affects refinement.
///
/// # Physical groups
///
/// Physical groups of dimension `DIM - 1` (points, curves or surfaces
/// depending on the grid dimension) become boundary ids:
/// a boundary face gets the group's tag as its id
/// if **every** vertex of the face belongs to the group.
/// Consequently a group must also contain its boundary entities.
/// For example, for the bottom edge of a square to get id 100,
/// the end points of the edge must be in the group as well:
/// ```text
/// Physical Curve(100) = {1};
/// Physical Point(100) = {1, 2};
/// ```
/// If a face matches several groups, the largest tag wins.
/// Boundary faces in no group get [`DEFAULT_BOUNDARY_ID`][crate::DEFAULT_BOUNDARY_ID].
pub fn load_macro_grid<const DIM: usize, const WDIM: usize>(
    bytes: &[u8],
) -> Result<HierarchicalMesh<DIM, WDIM>, GridError> {
    let element_type = match (DIM, WDIM) {
        (1, 1..=3) => mshio::ElementType::Lin2,
        (2, 2..=3) => mshio::ElementType::Tri3,
        (3, 3) => mshio::ElementType::Tet4,
        _ => {
            return Err(GridError::UnsupportedDimension {
                dim: DIM,
                world_dim: WDIM,
            })
        }
    };

    let msh = mshio::parse_msh_bytes(bytes).map_err(|e| GmshError::ParseError(format!("{}", e)))?;
    let nodes = msh.data.nodes.ok_or(GmshError::MissingNodes)?;
    let elements = msh.data.elements.ok_or(GmshError::MissingElements)?;

    let mut physical_groups = gather_physical_groups(msh.data.entities.as_ref());
    // only groups of faces give boundary ids
    physical_groups.retain(|_, g| g.has_dim(DIM as i32 - 1));

    let mut builder = MacroGridBuilder::<DIM, WDIM>::new();
    let mut vertex_count = 0;
    for block in &nodes.node_blocks {
        let ent_id = EntityId {
            dim: block.entity_dim,
            tag: block.entity_tag,
        };
        let mut phys_groups: Vec<&mut PhysicalGroup> = physical_groups
            .values_mut()
            .filter(|pg| pg.entities.contains(&ent_id))
            .collect();

        for node in &block.nodes {
            let vert_idx = builder.add_vertex(na::SVector::<f64, WDIM>::from_iterator(
                [node.x, node.y, node.z].into_iter().take(WDIM),
            ));
            vertex_count = vert_idx + 1;
            for g in &mut phys_groups {
                g.nodes.insert(vert_idx);
            }
        }
    }
    if vertex_count == 0 {
        return Err(GmshError::MissingNodes.into());
    }

    let mut macro_vertices: Vec<Vec<usize>> = Vec::new();
    for el in elements
        .element_blocks
        .iter()
        .filter(|block| block.element_type == element_type)
        .flat_map(|block| block.elements.iter())
    {
        // gmsh tags start at 1, subtract 1 to get the index in the array.
        // (this assumes node tags are sequential and in order)
        let verts = el
            .nodes
            .iter()
            .map(|&tag| {
                usize::try_from(tag)
                    .ok()
                    .and_then(|t| t.checked_sub(1))
                    .ok_or(GmshError::InvalidNodeTag(tag))
            })
            .collect::<Result<Vec<usize>, GmshError>>()?;
        builder.add_element(&verts);
        macro_vertices.push(verts);
    }
    if macro_vertices.is_empty() {
        return Err(GmshError::MissingElements.into());
    }

    let mut group_tags: Vec<&i32> = physical_groups.keys().collect();
    group_tags.sort_unstable();
    for tag in group_tags {
        let group = &physical_groups[tag];
        for (el_idx, verts) in macro_vertices.iter().enumerate() {
            for face in 0..=DIM {
                if face_key(verts, face)
                    .iter()
                    .all(|v| group.nodes.contains(v))
                {
                    builder.set_boundary(el_idx, face, *tag);
                }
            }
        }
    }

    let mesh = builder.create()?;
    log::info!(
        "loaded macro grid with {} elements and {} vertices, {} boundary groups",
        mesh.macro_count(),
        mesh.vertex_count(),
        physical_groups.len()
    );
    Ok(mesh)
}

/// Collect the physical groups defined in a .msh file
/// into a structure we can easily look them up from.
///
/// This only populates the `entities` field of each group;
/// nodes are filled in while reading the node blocks.
fn gather_physical_groups(
    entities: Option<&mshio::Entities<i32, f64>>,
) -> HashMap<i32, PhysicalGroup> {
    let Some(entities) = entities else {
        return HashMap::new();
    };

    let mut groups: HashMap<i32, PhysicalGroup> = HashMap::new();
    let mut insert = |dim: i32, tag: i32, physical_tags: &[i32]| {
        for ptag in physical_tags {
            groups
                .entry(*ptag)
                .or_default()
                .entities
                .insert(EntityId { dim, tag });
        }
    };

    for point in &entities.points {
        insert(0, point.tag, &point.physical_tags[..]);
    }
    for curve in &entities.curves {
        insert(1, curve.tag, &curve.physical_tags[..]);
    }
    for surface in &entities.surfaces {
        insert(2, surface.tag, &surface.physical_tags[..]);
    }
    for volume in &entities.volumes {
        insert(3, volume.tag, &volume.physical_tags[..]);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_BOUNDARY_ID;

    const SQUARE: &[u8] = include_bytes!("gmsh/square.msh");

    #[test]
    fn square_with_bottom_group() {
        let mesh = load_macro_grid::<2, 2>(SQUARE).expect("Failed to load mesh");
        assert_eq!(mesh.macro_count(), 2);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.element_vertices(0).unwrap(), &[0, 2, 1]);
        assert_eq!(*mesh.vertex_coords(2), na::Vector2::new(1.0, 1.0));

        // the bottom edge is opposite local vertex 1 of the first triangle
        let b0 = mesh.macro_element(0).boundary();
        assert_eq!(b0, &[Some(DEFAULT_BOUNDARY_ID), Some(100), None]);
        let b1 = mesh.macro_element(1).boundary();
        assert_eq!(b1, &[Some(DEFAULT_BOUNDARY_ID), Some(DEFAULT_BOUNDARY_ID), None]);
        assert_eq!(mesh.macro_element(0).neighbours()[2], Some(1));
    }

    #[test]
    fn surface_and_interval_views_of_the_same_file() {
        let surface = load_macro_grid::<2, 3>(SQUARE).unwrap();
        assert_eq!(*surface.vertex_coords(3), na::Vector3::new(0.0, 1.0, 0.0));

        // the single line element on the bottom edge
        let interval = load_macro_grid::<1, 2>(SQUARE).unwrap();
        assert_eq!(interval.macro_count(), 1);
        assert_eq!(interval.element_vertices(0).unwrap(), &[0, 1]);
        // point groups are the boundary of a 1D grid
        assert_eq!(interval.macro_element(0).boundary(), &[Some(100), Some(100)]);
    }

    #[test]
    fn errors() {
        assert!(matches!(
            load_macro_grid::<3, 3>(SQUARE),
            Err(GridError::Gmsh(GmshError::MissingElements))
        ));
        assert!(matches!(
            load_macro_grid::<3, 2>(SQUARE),
            Err(GridError::UnsupportedDimension { .. })
        ));
        assert!(matches!(
            load_macro_grid::<2, 2>(b"not a mesh"),
            Err(GridError::Gmsh(GmshError::ParseError(_)))
        ));
    }
}
