//! Modem setting command handlers.

use anyhow::bail;
use insteon_modem::ModemConfig;

use super::query::print_config;
use super::{CommandResult, Session};

/// Flag overrides from the command line; unset fields keep the modem's value
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigChanges {
    pub auto_linking: Option<bool>,
    pub monitor_mode: Option<bool>,
    pub auto_led: Option<bool>,
    pub deadman: Option<bool>,
}

impl ConfigChanges {
    pub fn is_empty(&self) -> bool {
        self.auto_linking.is_none()
            && self.monitor_mode.is_none()
            && self.auto_led.is_none()
            && self.deadman.is_none()
    }

    pub fn apply(&self, mut config: ModemConfig) -> ModemConfig {
        if let Some(v) = self.auto_linking {
            config.auto_linking = v;
        }
        if let Some(v) = self.monitor_mode {
            config.monitor_mode = v;
        }
        if let Some(v) = self.auto_led {
            config.auto_led = v;
        }
        if let Some(v) = self.deadman {
            config.deadman = v;
        }
        config
    }
}

/// Read-modify-write the modem configuration byte
pub async fn set_config(session: &Session, changes: ConfigChanges) -> CommandResult {
    if changes.is_empty() {
        bail!("Nothing to change; pass at least one of --auto-linking, --monitor-mode, --auto-led, --deadman");
    }
    let modem = session.open_modem()?;
    let current = modem.sync_config().await?;
    let updated = changes.apply(current);
    if updated == current {
        println!("Config unchanged (0x{:02X})", current.to_byte());
        return Ok(());
    }
    modem.set_config(updated).await?;
    print_config(&updated);
    Ok(())
}

/// Switch the modem LED
pub async fn led(session: &Session, on: bool) -> CommandResult {
    let modem = session.open_modem()?;
    modem.set_led(on).await?;
    println!("LED {}", if on { "on" } else { "off" });
    Ok(())
}

/// Factory reset
pub async fn reset(session: &Session, confirmed: bool) -> CommandResult {
    if !confirmed {
        bail!("Reset erases every link in the modem; rerun with --yes");
    }
    let modem = session.open_modem()?;
    let info = modem.sync_info().await?;
    modem.reset().await?;
    println!("Modem {} reset to factory defaults", info.address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_changes_apply() {
        let current = ModemConfig::from_byte(0x00);
        let changes = ConfigChanges {
            monitor_mode: Some(true),
            auto_led: Some(false),
            ..Default::default()
        };
        let updated = changes.apply(current);
        assert!(updated.auto_linking);
        assert!(updated.monitor_mode);
        assert!(!updated.auto_led);
        assert_eq!(updated.to_byte(), 0x60);
        assert!(ConfigChanges::default().is_empty());
    }
}
