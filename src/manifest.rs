use std::fs;
use std::io;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Raster,
    Vector,
}

/// One displayed layer. `path` and `style` are relative to the working
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerEntry {
    pub name: String,
    pub kind: LayerKind,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl LayerEntry {
    pub fn raster(name: &str, path: &str, style: Option<String>) -> LayerEntry {
        LayerEntry {
            name: String::from(name),
            kind: LayerKind::Raster,
            path: String::from(path),
            style,
        }
    }

    pub fn vector(name: &str, path: &str, style: Option<String>) -> LayerEntry {
        LayerEntry {
            name: String::from(name),
            kind: LayerKind::Vector,
            path: String::from(path),
            style,
        }
    }
}

/// Record of the derived map: working CRS, extents, and the displayed
/// layers bottom to top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub crs_wkt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsg: Option<i32>,
    /// `[w, s, e, n]` in map units.
    pub extent: [f64; 4],
    /// `[w, s, e, n]` in EPSG:4326.
    pub extent_wgs84: [f64; 4],
    pub layers: Vec<LayerEntry>,
}

pub fn write_manifest(path: &str, manifest: &ProjectManifest) -> io::Result<()> {
    let serialized = serde_json::to_string_pretty(manifest)?;
    fs::write(path, serialized)?;

    Ok(())
}
