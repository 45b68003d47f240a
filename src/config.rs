//! Settings for building a grid from files.

use std::path::PathBuf;

#[cfg(feature = "serde")]
use std::path::Path;

#[cfg(feature = "serde")]
use crate::GridError;

/// File format of a macro grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MacroFormat {
    /// A Gmsh `.msh` 4.1 file.
    #[default]
    Gmsh,
    /// A grid previously saved with [`AdaptiveGrid::write_grid`][crate::AdaptiveGrid::write_grid].
    Ron,
}

/// Everything needed to set up a grid with [`AdaptiveGrid::from_config`][crate::AdaptiveGrid::from_config].
///
/// Fields missing from a configuration file take their default values:
/// ```
/// # #[cfg(feature = "serde")] {
/// # use bisection_grid::{GridConfig, MacroFormat};
/// let config = GridConfig::from_ron_str(r#"(macro_grid: "square.msh", global_refinements: 3)"#)
///     .expect("valid config");
/// assert_eq!(config.format, MacroFormat::Gmsh);
/// assert_eq!(config.rank, 0);
/// assert_eq!(config.global_refinements, 3);
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GridConfig {
    /// Path of the macro grid file.
    pub macro_grid: PathBuf,
    /// Format of the macro grid file.
    pub format: MacroFormat,
    /// Rank of this process in a partitioned run.
    pub rank: usize,
    /// Number of times every element is bisected after loading.
    pub global_refinements: usize,
}

#[cfg(feature = "serde")]
impl GridConfig {
    /// Parse a configuration from RON.
    pub fn from_ron_str(s: &str) -> Result<Self, GridError> {
        ron::from_str(s).map_err(|e| GridError::Serialization(e.to_string()))
    }

    /// Read a configuration from a RON file.
    pub fn from_ron_file(path: impl AsRef<Path>) -> Result<Self, GridError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| GridError::io(path, e))?;
        let config = Self::from_ron_str(&content)?;
        log::info!("read grid configuration from {}", path.display());
        Ok(config)
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;

    #[test]
    fn parses_every_field() {
        let config = GridConfig::from_ron_str(
            r#"(
                macro_grid: "meshes/cube.ron",
                format: Ron,
                rank: 2,
                global_refinements: 1,
            )"#,
        )
        .unwrap();
        assert_eq!(
            config,
            GridConfig {
                macro_grid: PathBuf::from("meshes/cube.ron"),
                format: MacroFormat::Ron,
                rank: 2,
                global_refinements: 1,
            }
        );
    }

    #[test]
    fn reports_bad_input() {
        assert!(matches!(
            GridConfig::from_ron_str("(format: Xdr)"),
            Err(GridError::Serialization(_))
        ));
        assert!(matches!(
            GridConfig::from_ron_file("does/not/exist.ron"),
            Err(GridError::Io { .. })
        ));
    }
}
