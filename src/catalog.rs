// Device catalog loader
// The default catalog is embedded at build time; a JSON file can replace it

use std::path::Path;

use anyhow::Context;
use insteon_modem::{DeviceCatalog, DeviceDescriptor};
use serde::Deserialize;
use tracing::info;

/// Catalog shipped with the binary
pub const EMBEDDED_CATALOG: &str = include_str!("../data/devices.json");

/// Versioned catalog file
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    version: u32,
    devices: Vec<DeviceDescriptor>,
}

/// Parse a catalog from JSON.
///
/// Accepts the versioned `{ "version": N, "devices": [...] }` layout or a
/// bare array of descriptors.
pub fn load_from_json(json: &str) -> anyhow::Result<DeviceCatalog> {
    if let Ok(file) = serde_json::from_str::<CatalogFile>(json) {
        info!(
            "Catalog version {} ({} products)",
            file.version,
            file.devices.len()
        );
        return Ok(DeviceCatalog::new(file.devices));
    }

    let devices: Vec<DeviceDescriptor> =
        serde_json::from_str(json).context("Failed to parse device catalog")?;
    Ok(DeviceCatalog::new(devices))
}

pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<DeviceCatalog> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    load_from_json(&content)
}

/// The embedded catalog
pub fn load_default() -> anyhow::Result<DeviceCatalog> {
    load_from_json(EMBEDDED_CATALOG)
}

/// Load `path` when given, otherwise the embedded catalog
pub fn load(path: Option<&Path>) -> anyhow::Result<DeviceCatalog> {
    match path {
        Some(path) => {
            let catalog = load_from_file(path)?;
            info!("Loaded catalog from {}", path.display());
            Ok(catalog)
        }
        None => load_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_catalog() {
        let catalog = load_default().unwrap();
        assert!(!catalog.is_empty());
        let dimmer = catalog.lookup(0x01, 0x20).unwrap();
        assert_eq!(dimmer.sku.as_deref(), Some("2477D"));
        assert!(catalog.lookup(0x01, 0xFE).is_none());
    }

    #[test]
    fn test_bare_array() {
        let json = r#"[
            { "category": 2, "subcategory": 42, "name": "SwitchLinc Relay" }
        ]"#;
        let catalog = load_from_json(json).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.lookup(0x02, 0x2A).unwrap().sku.is_none());
    }

    #[test]
    fn test_malformed_catalog() {
        assert!(load_from_json(r#"{ "devices": 3 }"#).is_err());
        assert!(load_from_json(r#"[{ "category": 300, "subcategory": 0, "name": "x" }]"#).is_err());
    }
}
