// CLI definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use insteon_transport::{Address, LinkRole};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "insteon")]
#[command(author, version, about = "Insteon PowerLinc Modem driver")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Serial port of the modem (default: config file, then auto-detect)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub port: Option<String>,

    /// Config file (default: ~/.config/insteon/driver.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable transport monitoring (prints all frames and packets)
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Show raw hex alongside decoded output
    #[arg(long, global = true)]
    pub hex: bool,

    /// Filter monitor output (all, in, out, op=0xNN)
    #[arg(long, global = true)]
    pub filter: Option<String>,

    /// Print results and monitor lines as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    // === Query Commands ===
    /// Get modem address, category and firmware
    #[command(visible_aliases = ["version", "v"])]
    Info,

    /// Get modem configuration flags
    #[command(visible_alias = "cfg")]
    Config,

    /// List the modem's link table
    #[command(visible_alias = "l")]
    Links {
        /// Group records by controller group
        #[arg(short, long)]
        grouped: bool,
    },

    // === Modem Settings ===
    /// Change modem configuration flags (unset flags keep their value)
    #[command(visible_alias = "sc")]
    SetConfig {
        #[arg(long)]
        auto_linking: Option<bool>,
        #[arg(long)]
        monitor_mode: Option<bool>,
        #[arg(long)]
        auto_led: Option<bool>,
        #[arg(long)]
        deadman: Option<bool>,
    },

    /// Switch the modem LED
    Led {
        #[arg(value_enum)]
        state: Switch,
    },

    /// Factory reset the modem (erases every link)
    Reset {
        /// Required to actually reset
        #[arg(long)]
        yes: bool,
    },

    // === Device Commands ===
    /// Identify a device (category, product, firmware)
    #[command(visible_aliases = ["dev", "d"])]
    Device {
        address: Address,
        /// Ignore the cached identity
        #[arg(long)]
        refresh: bool,
    },

    /// Read a device's link database
    #[command(visible_alias = "dl")]
    DeviceLinks {
        address: Address,
        /// First record location (hex, 0 = top of database)
        #[arg(long, value_parser = parse_hex_u16, default_value = "0")]
        start: u16,
        /// Records to read (0 = all)
        #[arg(long, default_value = "0")]
        count: u8,
    },

    /// Ping a device
    Ping { address: Address },

    /// Send a raw direct command (bytes in hex)
    Send {
        address: Address,
        #[arg(value_parser = parse_hex_u8)]
        cmd1: u8,
        #[arg(value_parser = parse_hex_u8, default_value = "0")]
        cmd2: u8,
        /// Extended payload, up to 13 bytes (e.g. "00 01 FF")
        #[arg(long, value_parser = parse_hex_bytes)]
        data: Option<HexBytes>,
    },

    /// Read and decode a device's operating flags
    Flags { address: Address },

    /// Turn a light on
    On {
        address: Address,
        /// Level (0-255)
        #[arg(default_value = "255")]
        level: u8,
        /// Skip the ramp
        #[arg(long)]
        fast: bool,
    },

    /// Turn a light off
    Off {
        address: Address,
        #[arg(long)]
        fast: bool,
    },

    /// Read a device's current level
    Status { address: Address },

    /// Make a device beep
    Beep { address: Address },

    /// Switch an I/OLinc relay
    Relay {
        address: Address,
        #[arg(value_enum)]
        state: Switch,
    },

    // === Link Commands ===
    /// Send a command to every responder of a group
    #[command(visible_alias = "al")]
    AllLink {
        group: u8,
        #[arg(value_parser = parse_hex_u8)]
        cmd1: u8,
        #[arg(value_parser = parse_hex_u8, default_value = "0")]
        cmd2: u8,
    },

    /// Link a device to the modem
    Link {
        address: Address,
        #[arg(short, long, default_value = "1")]
        group: u8,
        /// Make the device the controller
        #[arg(long)]
        device_controls: bool,
    },

    /// Remove a link between a device and the modem
    Unlink {
        address: Address,
        #[arg(short, long, default_value = "1")]
        group: u8,
        /// The device was the controller
        #[arg(long)]
        device_controls: bool,
    },

    /// Write a link record straight into the modem
    AddLink {
        address: Address,
        #[arg(short, long, default_value = "1")]
        group: u8,
        /// Modem's role (controller, responder)
        #[arg(short, long, default_value = "controller")]
        role: LinkRole,
        /// Record data bytes (hex)
        #[arg(long, value_parser = parse_hex_bytes)]
        data: Option<HexBytes>,
    },

    /// Delete a link record from the modem
    #[command(visible_alias = "rm")]
    DeleteLink {
        address: Address,
        #[arg(short, long, default_value = "1")]
        group: u8,
        #[arg(short, long, default_value = "controller")]
        role: LinkRole,
    },

    // === Utility Commands ===
    /// Print modem traffic until Ctrl-C
    #[command(visible_alias = "mon")]
    Monitor,

    /// List serial ports
    Ports {
        /// Include ports that don't look like modems
        #[arg(short, long)]
        all: bool,
    },

    /// List known products
    Catalog,
}

/// Bytes given on the command line in hex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

fn strip_hex(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    u8::from_str_radix(strip_hex(s), 16).map_err(|e| format!("invalid hex byte '{s}': {e}"))
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::from_str_radix(strip_hex(s), 16).map_err(|e| format!("invalid hex value '{s}': {e}"))
}

/// "01 FF 3A", "01,FF,3A" or "01FF3A"
fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let digits: String = s
        .chars()
        .filter(|c| !matches!(c, ' ' | ',' | ':' | '.'))
        .collect();
    let digits = strip_hex(&digits);
    if !digits.is_ascii() {
        return Err(format!("invalid hex bytes '{s}'"));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in '{s}'"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| parse_hex_u8(&digits[i..i + 2]))
        .collect::<Result<Vec<_>, _>>()
        .map(HexBytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_hex_parsers() {
        assert_eq!(parse_hex_u8("0x11"), Ok(0x11));
        assert_eq!(parse_hex_u8("ff"), Ok(0xFF));
        assert!(parse_hex_u8("100").is_err());
        assert_eq!(parse_hex_u16("0FFF"), Ok(0x0FFF));
        assert_eq!(
            parse_hex_bytes("01 ff,3A"),
            Ok(HexBytes(vec![0x01, 0xFF, 0x3A]))
        );
        assert!(parse_hex_bytes("012").is_err());
    }

    #[test]
    fn test_parse_link_command() {
        let cli = Cli::try_parse_from(["insteon", "link", "aa.bb.cc", "-g", "3"]).unwrap();
        match cli.command {
            Some(Commands::Link {
                address,
                group,
                device_controls,
            }) => {
                assert_eq!(address, Address::new(0xAA, 0xBB, 0xCC));
                assert_eq!(group, 3);
                assert!(!device_controls);
            }
            _ => panic!("expected link command"),
        }
    }
}
