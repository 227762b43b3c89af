//! Utility command handlers.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use insteon_driver::catalog;
use insteon_transport::{list_ports, MonitorConfig, MonitorTransport, SerialTransport, Transport};

use super::{setup_interrupt_handler, CommandResult, Session};

/// Print all modem traffic until Ctrl-C or the port goes away
pub async fn monitor(session: &Session, config: MonitorConfig) -> CommandResult {
    let path = session.resolve_port()?;
    let serial = SerialTransport::open(&path)
        .with_context(|| format!("Failed to open modem at {path}"))?;
    let transport = MonitorTransport::wrap(Arc::new(serial), config);

    eprintln!("Monitoring {} (Ctrl-C to stop)", path);
    let running = setup_interrupt_handler();
    while running.load(Ordering::SeqCst) {
        if !transport.is_connected().await {
            eprintln!("Modem disconnected");
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    transport.close().await?;
    Ok(())
}

/// List serial ports, FTDI modems first
pub fn ports(session: &Session, all: bool) -> CommandResult {
    let mut ports = list_ports();
    if !all {
        ports.retain(|p| p.is_likely_modem());
    }
    ports.sort_by_key(|p| (!p.is_likely_modem(), p.path.clone()));

    if session.print_json(&ports)? {
        return Ok(());
    }
    if ports.is_empty() {
        println!(
            "No {}serial ports found",
            if all { "" } else { "PowerLinc " }
        );
        return Ok(());
    }
    for port in &ports {
        let usb = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!("{vid:04x}:{pid:04x}"),
            _ => "-".to_string(),
        };
        println!(
            "{:<20} {:<10} {}{}",
            port.path,
            usb,
            port.product.as_deref().unwrap_or(""),
            if port.is_likely_modem() { "  [modem]" } else { "" }
        );
    }
    Ok(())
}

/// List the products in the loaded catalog
pub fn catalog(session: &Session) -> CommandResult {
    let catalog = catalog::load(session.config.catalog.as_deref())?;
    let entries = catalog.sorted();
    if session.print_json(&entries)? {
        return Ok(());
    }
    println!("{} products:", entries.len());
    for d in entries {
        println!(
            "  {:02X}/{:02X}  {:<10} {}",
            d.category,
            d.subcategory,
            d.sku.as_deref().unwrap_or("-"),
            d.name
        );
    }
    Ok(())
}
