//! Query (read-only) command handlers.

use insteon_modem::{LinkRecord, ModemConfig};
use insteon_transport::protocol;

use super::{CommandResult, Session};

/// Get modem identity
pub async fn info(session: &Session) -> CommandResult {
    let modem = session.open_modem()?;
    let info = modem.sync_info().await?;
    if session.print_json(&info)? {
        return Ok(());
    }
    let port = modem.transport().port_info();
    println!("Port:        {}", port.path);
    println!("Address:     {}", info.address);
    println!(
        "Category:    {:02X}/{:02X}{}",
        info.category,
        info.subcategory,
        modem
            .catalog()
            .lookup(info.category, info.subcategory)
            .map(|d| format!(" ({})", d.name))
            .unwrap_or_default()
    );
    println!("Firmware:    {:02X}", info.firmware);
    Ok(())
}

pub fn print_config(config: &ModemConfig) {
    let on_off = |b: bool| if b { "on" } else { "off" };
    println!("Config:      0x{:02X}", config.to_byte());
    println!("  Auto-linking: {}", on_off(config.auto_linking));
    println!("  Monitor mode: {}", on_off(config.monitor_mode));
    println!("  Auto LED:     {}", on_off(config.auto_led));
    println!("  Deadman:      {}", on_off(config.deadman));
}

/// Get modem configuration flags
pub async fn config(session: &Session) -> CommandResult {
    let modem = session.open_modem()?;
    let config = modem.sync_config().await?;
    if session.print_json(&config)? {
        return Ok(());
    }
    print_config(&config);
    Ok(())
}

pub fn print_links(records: &[LinkRecord]) {
    if records.is_empty() {
        println!("No links");
        return;
    }
    println!("Group  Role        Address    Data");
    for r in records {
        println!(
            "{:>5}  {:<10}  {}   {}",
            r.group,
            r.role,
            r.address,
            protocol::hex(&r.data)
        );
    }
}

/// List the modem's link table
pub async fn links(session: &Session, grouped: bool) -> CommandResult {
    let modem = session.open_modem()?;
    let records = modem.sync_links().await?;

    if grouped {
        let groups = modem.groups();
        if session.print_json(&groups)? {
            return Ok(());
        }
        for (group, members) in &groups {
            println!("Group {} ({} responders)", group, members.len());
            for r in members {
                println!("  {}  data {}", r.address, protocol::hex(&r.data));
            }
        }
        let responders = modem.responders();
        if !responders.is_empty() {
            println!("Modem responds to:");
            for r in &responders {
                println!("  {} group {}", r.address, r.group);
            }
        }
        return Ok(());
    }

    if session.print_json(&*records)? {
        return Ok(());
    }
    print_links(&records);
    println!(
        "{} records, {} devices",
        records.len(),
        modem.linked_devices().len()
    );
    Ok(())
}
