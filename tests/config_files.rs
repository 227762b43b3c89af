//! Integration tests for the driver's on-disk inputs.
//!
//! These go through real files: the TOML config (defaults, save/load,
//! partial overrides) and JSON catalogs replacing the embedded one.

use std::io::Write;

use insteon_driver::{catalog, DriverConfig};
use insteon_modem::{DeviceKind, FlagLayout};
use insteon_transport::Timing;

// ── Config ──

#[test]
fn missing_config_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = DriverConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, DriverConfig::default());
    assert_eq!(config.timing, Timing::default());
    assert!(config.port.is_none());
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("driver.toml");

    let mut config = DriverConfig {
        port: Some("/dev/ttyUSB0".into()),
        ..Default::default()
    };
    config.timing.device_cooldown_ms = 500;
    let layout = FlagLayout::new(
        [
            (0, "program_lock".to_string()),
            (7, "relay_follows_input".to_string()),
        ]
        .into(),
    )
    .unwrap();
    config
        .flag_layouts
        .insert(DeviceKind::IoLinc.name().to_string(), layout);
    config.save(&path).unwrap();

    let loaded = DriverConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    let layout = loaded.flag_layout(DeviceKind::IoLinc).unwrap();
    assert_eq!(layout.decode(0x80)["relay_follows_input"], true);
}

#[test]
fn malformed_config_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[timing]\ndevice_retries = \"many\"").unwrap();
    assert!(DriverConfig::load(file.path()).is_err());
}

// ── Catalog ──

#[test]
fn catalog_file_replaces_embedded_catalog() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "version": 2, "devices": [
            {{ "category": 1, "subcategory": 58, "name": "Test Dimmer", "sku": "T-1" }}
        ] }}"#
    )
    .unwrap();

    let custom = catalog::load(Some(file.path())).unwrap();
    assert_eq!(custom.len(), 1);
    assert_eq!(custom.lookup(0x01, 0x3A).unwrap().name, "Test Dimmer");
    assert!(custom.lookup(0x01, 0x20).is_none());

    let embedded = catalog::load(None).unwrap();
    assert!(embedded.lookup(0x01, 0x20).is_some());
}

#[test]
fn missing_catalog_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("none.json");
    assert!(catalog::load(Some(path.as_path())).is_err());
}
