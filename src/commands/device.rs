//! Per-device command handlers.

use insteon_modem::{categories, Address, DeviceIdentity};
use insteon_transport::protocol::{self, insteon};
use tracing::warn;

use super::query::print_links;
use super::{CommandResult, Session};

fn print_identity(identity: &DeviceIdentity) {
    println!("Address:     {}", identity.address);
    println!(
        "Category:    {:02X}/{:02X}",
        identity.category, identity.subcategory
    );
    match &identity.descriptor {
        Some(d) => println!(
            "Product:     {}{}",
            d.name,
            d.sku.as_ref().map(|s| format!(" ({s})")).unwrap_or_default()
        ),
        None => println!("Product:     unknown"),
    }
    println!("Kind:        {}", identity.kind);
    println!("Firmware:    {:02X}", identity.firmware);
    println!("Hardware:    {:02X}", identity.hardware);
}

/// Identify a device
pub async fn device(session: &Session, address: Address, refresh: bool) -> CommandResult {
    let modem = session.open_modem()?;
    let identity = modem.resolve_device(address, refresh).await?;
    if session.print_json(&identity)? {
        return Ok(());
    }
    print_identity(&identity);
    Ok(())
}

/// Read a device's link database
pub async fn device_links(
    session: &Session,
    address: Address,
    start: u16,
    count: u8,
) -> CommandResult {
    let modem = session.open_modem()?;
    let records = modem.read_device_links(address, start, count).await?;
    if session.print_json(&records)? {
        return Ok(());
    }
    println!("{} link database:", address);
    print_links(&records);
    Ok(())
}

pub async fn ping(session: &Session, address: Address) -> CommandResult {
    let modem = session.open_modem()?;
    let started = tokio::time::Instant::now();
    modem.device(address).ping().await?;
    println!("{} answered in {} ms", address, started.elapsed().as_millis());
    Ok(())
}

/// Send a raw direct command; extended when a payload is given
pub async fn send(
    session: &Session,
    address: Address,
    cmd1: u8,
    cmd2: u8,
    data: Option<&[u8]>,
) -> CommandResult {
    let modem = session.open_modem()?;
    let ack = match data {
        Some(data) => {
            modem
                .send_extended_command(address, cmd1, cmd2, data, None)
                .await?
        }
        None => modem.send_standard_command(address, cmd1, cmd2, None).await?,
    };
    if session.print_json(&ack)? {
        return Ok(());
    }
    println!(
        "{} ACK {:02X} {:02X} ({})",
        ack.from,
        ack.cmd1,
        ack.cmd2,
        insteon::name(ack.cmd1)
    );
    if let Some(data) = &ack.user_data {
        println!("  data {}", protocol::hex(data));
    }
    Ok(())
}

/// Read and decode the operating flags byte
pub async fn flags(session: &Session, address: Address) -> CommandResult {
    let modem = session.open_modem()?;
    let identity = modem.resolve_device(address, false).await?;
    let queue = modem.device(address);

    let Some(layout) = session.config.flag_layout(identity.kind) else {
        let raw = queue.operating_flags().await?;
        println!("Operating flags: 0x{raw:02X} (0b{raw:08b})");
        println!(
            "No flag layout for {}; add [flag_layouts.{}] to the config file to decode it",
            identity.kind, identity.kind
        );
        return Ok(());
    };

    let flags = categories::read_operating_flags(&queue, layout).await?;
    if session.print_json(&flags)? {
        return Ok(());
    }
    println!("{} ({}) operating flags:", address, identity.kind);
    for (name, set) in &flags {
        println!("  {:<20} {}", name, if *set { "on" } else { "off" });
    }
    Ok(())
}

// === Lighting ===

pub async fn on(session: &Session, address: Address, level: u8, fast: bool) -> CommandResult {
    let modem = session.open_modem()?;
    let queue = modem.device(address);
    if fast {
        if level != categories::LEVEL_MAX {
            warn!("Fast on ignores the level; turning {} fully on", address);
        }
        categories::light_on_fast(&queue).await?;
        println!("{} on", address);
    } else {
        let acked = categories::light_on(&queue, level).await?;
        println!("{} on at {}", address, acked);
    }
    Ok(())
}

pub async fn off(session: &Session, address: Address, fast: bool) -> CommandResult {
    let modem = session.open_modem()?;
    let queue = modem.device(address);
    if fast {
        categories::light_off_fast(&queue).await?;
    } else {
        categories::light_off(&queue).await?;
    }
    println!("{} off", address);
    Ok(())
}

pub async fn status(session: &Session, address: Address) -> CommandResult {
    let modem = session.open_modem()?;
    let level = categories::status(&modem.device(address)).await?;
    println!(
        "{} level {} ({}%)",
        address,
        level,
        (level as u32 * 100 + 127) / 255
    );
    Ok(())
}

pub async fn beep(session: &Session, address: Address) -> CommandResult {
    let modem = session.open_modem()?;
    categories::beep(&modem.device(address)).await?;
    Ok(())
}

/// Switch an I/OLinc relay
pub async fn relay(session: &Session, address: Address, on: bool) -> CommandResult {
    let modem = session.open_modem()?;
    categories::set_relay(&modem.device(address), on).await?;
    println!("{} relay {}", address, if on { "closed" } else { "open" });
    Ok(())
}
