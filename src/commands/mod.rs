//! Command handlers for the CLI application.
//!
//! This module organizes command handlers by category:
//! - `query`: Read-only modem commands (info, config, links)
//! - `set`: Modem settings (set-config, led, reset)
//! - `device`: Per-device commands (device, device-links, ping, send, flags, on, off, ...)
//! - `links`: Link management (all-link, link, unlink, add-link, delete-link)
//! - `utility`: Commands that need no modem session (monitor, ports, catalog)

pub mod device;
pub mod links;
pub mod query;
pub mod set;
pub mod utility;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use insteon_driver::{catalog, DriverConfig};
use insteon_modem::ModemInterface;
use insteon_transport::{
    list_modems, MonitorConfig, MonitorFilter, MonitorTransport, OutputFormat, SerialTransport,
    Transport,
};
use serde::Serialize;
use tracing::info;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

/// Everything a handler needs to open the modem
pub struct Session {
    pub config: DriverConfig,
    /// Port from the command line, overriding the config file
    pub port: Option<String>,
    pub monitor: Option<MonitorConfig>,
    pub json: bool,
}

impl Session {
    /// Port to open: command line, then config file, then the first FTDI modem
    pub fn resolve_port(&self) -> anyhow::Result<String> {
        if let Some(port) = self.port.as_ref().or(self.config.port.as_ref()) {
            return Ok(port.clone());
        }
        match list_modems().into_iter().next() {
            Some(port) => {
                info!("Auto-detected modem at {}", port.path);
                Ok(port.path)
            }
            None => bail!("No modem found; pass --port or set `port` in the config file"),
        }
    }

    /// Open the serial port, wrapping it with the monitor when enabled
    pub fn open_transport(&self) -> anyhow::Result<Arc<dyn Transport>> {
        let path = self.resolve_port()?;
        let serial = SerialTransport::open(&path)
            .with_context(|| format!("Failed to open modem at {path}"))?;
        let transport: Arc<dyn Transport> = Arc::new(serial);
        Ok(match &self.monitor {
            Some(config) => MonitorTransport::wrap(transport, config.clone()),
            None => transport,
        })
    }

    /// Open the modem with the configured timing and catalog
    pub fn open_modem(&self) -> anyhow::Result<ModemInterface> {
        let catalog = catalog::load(self.config.catalog.as_deref())?;
        let transport = self.open_transport()?;
        Ok(ModemInterface::open(
            transport,
            self.config.timing.clone(),
            Arc::new(catalog),
        ))
    }

    /// Print `value` as JSON when --json is set; returns whether it did
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> anyhow::Result<bool> {
        if !self.json {
            return Ok(false);
        }
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(true)
    }
}

/// Set up a Ctrl-C handler that sets the given flag to false when triggered.
/// Returns the Arc<AtomicBool> for use in the main loop.
pub fn setup_interrupt_handler() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .ok();

    running
}

/// Create monitor config from CLI flags
pub fn create_monitor_config(
    monitor: bool,
    hex: bool,
    json: bool,
    filter: Option<&str>,
) -> anyhow::Result<Option<MonitorConfig>> {
    if !monitor {
        return Ok(None);
    }
    Ok(Some(monitor_config(hex, json, filter)?))
}

pub fn monitor_config(hex: bool, json: bool, filter: Option<&str>) -> anyhow::Result<MonitorConfig> {
    let filter = match filter {
        Some(f) => f.parse::<MonitorFilter>().map_err(anyhow::Error::msg)?,
        None => MonitorFilter::All,
    };
    Ok(MonitorConfig::default()
        .with_hex(hex)
        .with_filter(filter)
        .with_format(if json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }))
}
