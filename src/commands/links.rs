//! Link management command handlers.

use anyhow::bail;
use insteon_modem::{Address, LinkDirection, LinkRole, LinkingCompleted};
use insteon_transport::protocol::insteon;

use super::{CommandResult, Session};

fn print_completed(verb: &str, done: &LinkingCompleted) {
    println!(
        "{} {} group {} (code 0x{:02X}, cat {:02X}/{:02X}, fw {:02X})",
        verb,
        done.address,
        done.group,
        done.link_code,
        done.category,
        done.subcategory,
        done.firmware
    );
}

/// Send a group command and report the responders that failed cleanup
pub async fn all_link(session: &Session, group: u8, cmd1: u8, cmd2: u8) -> CommandResult {
    let modem = session.open_modem()?;
    let report = modem.send_all_link_command(group, cmd1, cmd2).await?;
    if session.print_json(&report)? {
        return Ok(());
    }
    println!(
        "Group {} {} ({:02X} {:02X}): {}",
        group,
        insteon::name(cmd1),
        cmd1,
        cmd2,
        if report.ack {
            "all responders acknowledged"
        } else {
            "cleanup incomplete"
        }
    );
    for address in &report.failures {
        println!("  failed: {}", address);
    }
    Ok(())
}

fn direction(device_controls: bool) -> LinkDirection {
    if device_controls {
        LinkDirection::DeviceControls
    } else {
        LinkDirection::ModemControls
    }
}

/// Link a device to the modem
pub async fn link(
    session: &Session,
    address: Address,
    group: u8,
    device_controls: bool,
) -> CommandResult {
    let modem = session.open_modem()?;
    let done = modem
        .link_device(address, group, direction(device_controls))
        .await?;
    print_completed("Linked", &done);
    Ok(())
}

/// Unlink a device from the modem
pub async fn unlink(
    session: &Session,
    address: Address,
    group: u8,
    device_controls: bool,
) -> CommandResult {
    let modem = session.open_modem()?;
    let done = modem
        .unlink_device(address, group, direction(device_controls))
        .await?;
    print_completed("Unlinked", &done);
    Ok(())
}

/// Write a link record directly into the modem's table
pub async fn add_link(
    session: &Session,
    address: Address,
    group: u8,
    role: LinkRole,
    data: Option<&[u8]>,
) -> CommandResult {
    let data = match data {
        None => [0u8; 3],
        Some(bytes) if bytes.len() <= 3 => {
            let mut out = [0u8; 3];
            out[..bytes.len()].copy_from_slice(bytes);
            out
        }
        Some(bytes) => bail!("Link data is 3 bytes, got {}", bytes.len()),
    };
    let modem = session.open_modem()?;
    modem.add_link_record(address, group, role, data).await?;
    println!("Added {} record for {} group {}", role, address, group);
    Ok(())
}

/// Delete a record from the modem's table
pub async fn delete_link(
    session: &Session,
    address: Address,
    group: u8,
    role: LinkRole,
) -> CommandResult {
    let modem = session.open_modem()?;
    if modem.delete_link(address, group, role).await? {
        println!("Deleted {} record for {} group {}", role, address, group);
    } else {
        println!("No {} record for {} group {}", role, address, group);
    }
    Ok(())
}
