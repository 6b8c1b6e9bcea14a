//! Engine configuration.

use crate::style::PolygonStyle;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for a [`PlanningMap`](crate::PlanningMap).
///
/// Every field has a default, so a config file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Style given to newly committed polygons.
    pub polygon_style: PolygonStyle,
    /// Style of the copies rendered on secondary viewports.
    pub mirror_style: PolygonStyle,
    /// Shapes with an area at or below this are discarded on finish.
    pub min_polygon_area: f64,
    /// Run the overlap check on uploaded geometry.
    pub validate_uploads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polygon_style: PolygonStyle::default(),
            mirror_style: PolygonStyle::mirror(),
            min_polygon_area: 0.0,
            validate_uploads: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"min_polygon_area": 2.5}"#).unwrap();
        assert!((config.min_polygon_area - 2.5).abs() < f64::EPSILON);
        assert!(config.validate_uploads);
        assert_eq!(config.mirror_style, PolygonStyle::mirror());
    }

    #[test]
    fn test_invalid_config() {
        let result = EngineConfig::from_json(r#"{"validate_uploads": "yes"}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"validate_uploads": false}}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert!(!config.validate_uploads);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineConfig::from_file(dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
