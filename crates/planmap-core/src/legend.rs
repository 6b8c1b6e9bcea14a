//! Legend construction from colormap configurations.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

/// Legend errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LegendError {
    #[error("Colormap not found: {0}")]
    UnknownColormap(String),
    #[error("Invalid colormap: {0}")]
    Parse(String),
}

/// Result type for legend operations.
pub type LegendResult<T> = Result<T, LegendError>;

/// One stop of a colormap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorEntry {
    /// CSS color, e.g. `#30123b`.
    pub rgb: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub percentile: Option<f64>,
}

/// A named colormap as served by the legend source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColormapConfig {
    pub name: String,
    #[serde(default)]
    pub colors: Option<Vec<ColorEntry>>,
}

impl ColormapConfig {
    pub fn from_json(json: &str) -> LegendResult<Self> {
        serde_json::from_str(json).map_err(|e| LegendError::Parse(e.to_string()))
    }
}

/// Parallel color and label lists, ordered low to high.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Legend {
    pub colors: Vec<String>,
    pub labels: Vec<String>,
}

impl Legend {
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// `(color, label)` pairs in display order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.colors
            .iter()
            .map(String::as_str)
            .zip(self.labels.iter().map(String::as_str))
    }
}

/// Percentile order; stops without a percentile go last, in input order.
fn by_percentile(a: &ColorEntry, b: &ColorEntry) -> Ordering {
    match (a.percentile, b.percentile) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn label(entry: &ColorEntry) -> String {
    match (&entry.name, entry.percentile) {
        (Some(name), _) => name.clone(),
        (None, Some(p)) => p.to_string(),
        (None, None) => String::new(),
    }
}

/// Build a legend sorted ascending by percentile.
///
/// The sort is stable. Entries without a percentile compare equal to each
/// other and are placed after every entry that has one, keeping their input
/// order. Labels use the entry name, then the percentile, then `""`.
/// A missing or empty color list yields an empty legend.
pub fn build_legend(config: &ColormapConfig) -> Legend {
    let Some(colors) = config.colors.as_deref() else {
        return Legend::default();
    };
    let mut entries: Vec<&ColorEntry> = colors.iter().collect();
    entries.sort_by(|a, b| by_percentile(a, b));

    Legend {
        colors: entries.iter().map(|e| e.rgb.clone()).collect(),
        labels: entries.iter().map(|e| label(e)).collect(),
    }
}

/// Supplies colormaps by name (e.g. `"turbo"`).
pub trait ColormapSource {
    fn colormap(&self, name: &str) -> LegendResult<ColormapConfig>;
}

/// Colormaps held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticColormaps {
    maps: HashMap<String, ColormapConfig>,
}

impl StaticColormaps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config: ColormapConfig) {
        self.maps.insert(config.name.clone(), config);
    }

    /// Load a JSON array of colormaps.
    pub fn from_json(json: &str) -> LegendResult<Self> {
        let configs: Vec<ColormapConfig> =
            serde_json::from_str(json).map_err(|e| LegendError::Parse(e.to_string()))?;
        let mut maps = Self::new();
        for config in configs {
            maps.insert(config);
        }
        Ok(maps)
    }
}

impl ColormapSource for StaticColormaps {
    fn colormap(&self, name: &str) -> LegendResult<ColormapConfig> {
        self.maps
            .get(name)
            .cloned()
            .ok_or_else(|| LegendError::UnknownColormap(name.to_string()))
    }
}
