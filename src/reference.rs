//! Local numbering conventions of the reference simplex
//! and the bisection rule in terms of local vertex numbers.

use itertools::Itertools;

/// Marker used in the child vertex tables for the new midpoint vertex.
/// Equal to `DIM + 1` for every supported dimension.
pub(crate) const fn new_vertex(dim: usize) -> usize {
    dim + 1
}

const CHILD_VERTEX_1D: [[usize; 2]; 2] = [[0, 2], [1, 2]];
const CHILD_VERTEX_2D: [[usize; 3]; 2] = [[2, 0, 3], [1, 2, 3]];
#[rustfmt::skip]
const CHILD_VERTEX_3D: [[[usize; 4]; 2]; 3] = [
    [[0, 2, 3, 4], [1, 3, 2, 4]],
    [[0, 2, 3, 4], [1, 2, 3, 4]],
    [[0, 2, 3, 4], [1, 2, 3, 4]],
];

/// Parent-local vertex numbers of the vertices of child `child`,
/// with [`new_vertex`] standing for the midpoint of the refinement edge.
pub(crate) fn child_vertices(dim: usize, el_type: u8, child: usize) -> &'static [usize] {
    match dim {
        1 => &CHILD_VERTEX_1D[child],
        2 => &CHILD_VERTEX_2D[child],
        3 => &CHILD_VERTEX_3D[el_type as usize % 3][child],
        _ => unreachable!("dimension checked at mesh construction"),
    }
}

/// Element type of the children of an element of type `el_type`.
/// Only tetrahedra cycle through types.
#[inline]
pub(crate) fn child_type(dim: usize, el_type: u8) -> u8 {
    if dim == 3 {
        (el_type + 1) % 3
    } else {
        0
    }
}

/// Number of sub-entities of the given codimension in a `dim`-simplex.
pub(crate) fn sub_entity_count(dim: usize, codim: usize) -> usize {
    // binomial(dim + 1, dim + 1 - codim)
    let n = dim + 1;
    let k = n - codim;
    (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
}

/// Local vertex numbers of every sub-entity of the given codimension.
///
/// Faces (codimension 1) are numbered by their opposite vertex,
/// vertices by themselves, and everything in between (edges of a tetrahedron)
/// in lexicographic order.
pub(crate) fn sub_entity_vertices(dim: usize, codim: usize) -> Vec<Vec<usize>> {
    if codim == 0 {
        vec![(0..=dim).collect()]
    } else if codim == dim {
        (0..=dim).map(|i| vec![i]).collect()
    } else if codim == 1 {
        (0..=dim)
            .map(|opp| (0..=dim).filter(|&i| i != opp).collect())
            .collect()
    } else {
        (0..=dim).combinations(dim + 1 - codim).collect()
    }
}

/// The local sub-entity of the given codimension spanned by a set of local vertices,
/// if there is one.
pub(crate) fn sub_entity_with_vertices(dim: usize, codim: usize, local: &[usize]) -> Option<usize> {
    let mut sorted = local.to_vec();
    sorted.sort_unstable();
    sub_entity_vertices(dim, codim)
        .iter()
        .position(|verts| *verts == sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_match_numbering() {
        for dim in 1..=3 {
            for codim in 0..=dim {
                assert_eq!(
                    sub_entity_count(dim, codim),
                    sub_entity_vertices(dim, codim).len(),
                    "dim {dim} codim {codim}"
                );
            }
        }
        assert_eq!(sub_entity_count(3, 2), 6);
        assert_eq!(sub_entity_count(3, 1), 4);
        assert_eq!(sub_entity_count(2, 1), 3);
    }

    #[test]
    fn tetrahedron_edges_are_lexicographic() {
        let edges = sub_entity_vertices(3, 2);
        assert_eq!(
            edges,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(sub_entity_with_vertices(3, 2, &[3, 1]), Some(4));
        assert_eq!(sub_entity_with_vertices(2, 1, &[0, 2]), Some(1));
    }

    #[test]
    fn children_split_the_refinement_edge() {
        for dim in 1..=3 {
            for el_type in 0..3u8 {
                let c0 = child_vertices(dim, el_type, 0);
                let c1 = child_vertices(dim, el_type, 1);
                // each child drops exactly one endpoint of the refinement edge
                // and puts the midpoint last
                assert!(c0.contains(&0) && !c0.contains(&1));
                assert!(c1.contains(&1) && !c1.contains(&0));
                assert_eq!(c0[dim], new_vertex(dim));
                assert_eq!(c1[dim], new_vertex(dim));
                // together they cover every parent vertex
                for v in 0..=dim {
                    assert!(c0.contains(&v) || c1.contains(&v));
                }
            }
        }
        assert_eq!(child_type(3, 2), 0);
        assert_eq!(child_type(2, 0), 0);
    }
}
