// Driver configuration
// TOML file with the serial port, catalog override, timing and flag layouts

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use insteon_modem::{DeviceKind, FlagLayout};
use insteon_transport::Timing;
use serde::{Deserialize, Serialize};

/// Contents of `driver.toml`
///
/// ```toml
/// port = "/dev/ttyUSB0"
///
/// [timing]
/// device_cooldown_ms = 300
///
/// [flag_layouts.dimmable_lighting]
/// 0 = "program_lock"
/// 1 = "led_on_tx"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Serial port of the modem; auto-detected when unset
    pub port: Option<String>,
    /// JSON catalog replacing the embedded one
    pub catalog: Option<PathBuf>,
    pub timing: Timing,
    /// Operating flag layouts keyed by device kind name
    pub flag_layouts: BTreeMap<String, FlagLayout>,
}

impl DriverConfig {
    /// `~/.config/insteon/driver.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("insteon")
            .join("driver.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: DriverConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn flag_layout(&self, kind: DeviceKind) -> Option<&FlagLayout> {
        self.flag_layouts.get(kind.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path() {
        let path = DriverConfig::default_path();
        assert!(path.ends_with("insteon/driver.toml"));
    }

    #[test]
    fn test_partial_timing() {
        let config: DriverConfig = toml::from_str(
            r#"
            port = "/dev/ttyUSB1"

            [timing]
            device_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.timing.device_retries, 5);
        assert_eq!(
            config.timing.remote_timeout_ms,
            Timing::default().remote_timeout_ms
        );
        assert!(config.flag_layouts.is_empty());
    }

    #[test]
    fn test_flag_layouts() {
        let config: DriverConfig = toml::from_str(
            r#"
            [flag_layouts.dimmable_lighting]
            0 = "program_lock"
            4 = "led_off"
            "#,
        )
        .unwrap();
        let layout = config.flag_layout(DeviceKind::DimmableLighting).unwrap();
        assert_eq!(layout.len(), 2);
        assert_eq!(layout.decode(0x10)["led_off"], true);
        assert!(config.flag_layout(DeviceKind::IoLinc).is_none());
    }

    #[test]
    fn test_bad_flag_bit_rejected() {
        let result: Result<DriverConfig, _> = toml::from_str(
            r#"
            [flag_layouts.io_linc]
            9 = "relay"
            "#,
        );
        assert!(result.is_err());
    }
}
