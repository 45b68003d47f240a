//! Hierarchical grids of simplices refined by recursive bisection.
//!
//! A grid starts from a conforming macro triangulation of intervals,
//! triangles or tetrahedra, embedded in a world of dimension 1 to 3.
//! Elements are bisected at their refinement edge and coarsened again
//! by merging sibling pairs, keeping the leaf mesh conforming.
//!
//! Every entity (element, face, edge, vertex) gets a hierarchic index
//! from a recycling [`IndexManager`] per codimension.
//! On top of those the [`AdaptiveGrid`] provides level and leaf views
//! with consecutive index sets, intersections with neighbours,
//! and the mark / adapt cycle.
//! Nothing but the macro elements and the tree structure is stored per element;
//! coordinates and neighbours are reconstructed during traversal
//! by a [`TraverseStack`].

#![warn(missing_docs)]

mod error;
#[doc(inline)]
pub use error::GridError;

mod index_manager;
#[doc(inline)]
pub use index_manager::IndexManager;

pub(crate) mod reference;

pub mod mesh;
#[doc(inline)]
pub use mesh::{HierarchicalMesh, MacroElement, MacroGridBuilder, DEFAULT_BOUNDARY_ID};

pub mod traverse;
#[doc(inline)]
pub use traverse::{ElInfo, PartitionType, TraverseMode, TraverseStack};

pub mod marker;
#[doc(inline)]
pub use marker::MarkerVector;

pub mod geometry;
#[doc(inline)]
pub use geometry::Geometry;

pub mod grid;
#[doc(inline)]
pub use grid::{AdaptiveGrid, Entity, EntityPartition, Intersection};

mod config;
#[doc(inline)]
pub use config::{GridConfig, MacroFormat};

pub mod gmsh;

#[cfg(feature = "serde")]
pub mod io;

// nalgebra re-export for building coordinates

pub use nalgebra as na;
