//! The error type shared by all fallible grid operations.

use std::path::PathBuf;

/// Error in building, adapting, or persisting a grid.
#[derive(thiserror::Error, Debug)]
pub enum GridError {
    /// Reading or writing a file failed.
    #[error("I/O error on `{path}`")]
    Io {
        /// The file that was being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Loading a macro triangulation from a Gmsh file failed.
    #[error(transparent)]
    Gmsh(#[from] crate::gmsh::GmshError),
    /// A stored grid or configuration could not be encoded or decoded.
    ///
    /// (the serializer's error is converted to a string
    /// so that this type doesn't depend on the `serde` feature)
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// The macro triangulation is not a valid simplicial mesh.
    #[error("invalid macro grid: {0}")]
    InvalidMacroGrid(String),
    /// The requested pair of grid and world dimensions is not supported.
    #[error("unsupported dimensions: grid dimension {dim} in world dimension {world_dim}")]
    UnsupportedDimension {
        /// Dimension of the elements.
        dim: usize,
        /// Dimension of the coordinate space.
        world_dim: usize,
    },
    /// A codimension outside of `0..=DIM` was requested.
    #[error("codimension {codim} is not valid for a {dim}-dimensional grid")]
    InvalidCodim {
        /// The requested codimension.
        codim: usize,
        /// Dimension of the grid.
        dim: usize,
    },
    /// A level above the grid's maximum level was requested.
    #[error("level {level} exceeds the maximum level {max_level}")]
    LevelOutOfRange {
        /// The requested level.
        level: usize,
        /// The finest level currently present in the grid.
        max_level: usize,
    },
    /// No live element has the given hierarchic index.
    #[error("no element with index {0}")]
    UnknownElement(usize),
    /// Making the neighbourhood of a refinement edge compatible didn't terminate.
    ///
    /// This happens when the refinement edges of the macro triangulation
    /// are not chosen consistently.
    #[error("refinement closure around edge ({0}, {1}) did not terminate")]
    RefinementClosure(usize, usize),
    /// A geometry mapping has a singular Jacobian.
    #[error("degenerate geometry: the Jacobian is singular")]
    DegenerateGeometry,
    /// A stored grid has different dimensions than the one being read into.
    #[error("stored grid has dimensions ({found_dim}, {found_world_dim}), expected ({dim}, {world_dim})")]
    DimensionMismatch {
        /// Grid dimension of the reading type.
        dim: usize,
        /// World dimension of the reading type.
        world_dim: usize,
        /// Grid dimension found in the file.
        found_dim: usize,
        /// World dimension found in the file.
        found_world_dim: usize,
    },
}

impl GridError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
