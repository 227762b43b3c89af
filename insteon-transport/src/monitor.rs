//! MonitorTransport middleware for tracing modem traffic
//!
//! Wraps any Transport and prints every outgoing frame and inbound packet
//! to stderr, as text or JSON lines.
//!
//! # Example
//!
//! ```ignore
//! use insteon_transport::{MonitorConfig, MonitorTransport, SerialTransport};
//!
//! let serial = SerialTransport::open("/dev/ttyUSB0")?;
//! let monitored = MonitorTransport::wrap(Arc::new(serial), MonitorConfig::default());
//! ```

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::packet::{InboundPacket, TimestampedPacket};
use crate::protocol::{self, cmd, insteon};
use crate::types::PortInfo;
use crate::{Transport, TransportError};

/// Output format for the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Which traffic to show
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MonitorFilter {
    #[default]
    All,
    /// Only packets from the modem
    Inbound,
    /// Only frames sent to the modem
    Outbound,
    /// One opcode in either direction
    Opcode(u8),
}

impl FromStr for MonitorFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" | "" => Ok(Self::All),
            "in" | "inbound" | "rx" => Ok(Self::Inbound),
            "out" | "outbound" | "tx" => Ok(Self::Outbound),
            s if s.starts_with("op=") || s.starts_with("0x") => {
                let hex_str = s.strip_prefix("op=").unwrap_or(s);
                let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
                u8::from_str_radix(hex_str, 16)
                    .map(Self::Opcode)
                    .map_err(|e| format!("Invalid opcode: {}", e))
            }
            _ => Err(format!("Unknown filter: {}", s)),
        }
    }
}

/// Configuration for the MonitorTransport
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    /// Show raw hex alongside decoded output
    pub show_hex: bool,
    pub filter: MonitorFilter,
    pub format: OutputFormat,
}

impl MonitorConfig {
    pub fn with_hex(mut self, show: bool) -> Self {
        self.show_hex = show;
        self
    }

    pub fn with_filter(mut self, filter: MonitorFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    fn show_outbound(&self, opcode: Option<u8>) -> bool {
        match &self.filter {
            MonitorFilter::All | MonitorFilter::Outbound => true,
            MonitorFilter::Inbound => false,
            MonitorFilter::Opcode(op) => opcode == Some(*op),
        }
    }

    fn show_inbound(&self, packet: &InboundPacket) -> bool {
        match &self.filter {
            MonitorFilter::All | MonitorFilter::Inbound => true,
            MonitorFilter::Outbound => false,
            MonitorFilter::Opcode(op) => packet_opcode(packet) == Some(*op),
        }
    }
}

fn packet_opcode(packet: &InboundPacket) -> Option<u8> {
    Some(match packet {
        InboundPacket::StandardMessage(_) => cmd::STANDARD_MESSAGE_RECEIVED,
        InboundPacket::ExtendedMessage(_) => cmd::EXTENDED_MESSAGE_RECEIVED,
        InboundPacket::X10Received { .. } => cmd::X10_RECEIVED,
        InboundPacket::AllLinkingCompleted(_) => cmd::ALL_LINKING_COMPLETED,
        InboundPacket::ButtonEvent(_) => cmd::BUTTON_EVENT,
        InboundPacket::UserReset => cmd::USER_RESET,
        InboundPacket::CleanupFailure { .. } => cmd::ALL_LINK_CLEANUP_FAILURE,
        InboundPacket::AllLinkRecord(_) => cmd::ALL_LINK_RECORD_RESPONSE,
        InboundPacket::CleanupStatus { .. } => cmd::ALL_LINK_CLEANUP_STATUS,
        InboundPacket::Echo(e) => e.opcode,
        InboundPacket::Busy => return None,
    })
}

/// One-line description, e.g. `[AA.BB.CC][S][ACK]: 11 FF`
pub fn describe(packet: &InboundPacket) -> String {
    match packet {
        InboundPacket::StandardMessage(m) | InboundPacket::ExtendedMessage(m) => {
            let mut s = format!(
                "[{}][{}][{}]: {:02X} {:02X} ({})",
                m.from,
                if m.is_extended() { 'E' } else { 'S' },
                m.subtype().name(),
                m.cmd1,
                m.cmd2,
                insteon::name(m.cmd1),
            );
            if let Some(d) = &m.user_data {
                s.push_str(&format!(" [{}]", protocol::hex(d)));
            }
            s
        }
        InboundPacket::Echo(e) => format!(
            "[{}] {} {}",
            cmd::name(e.opcode),
            if e.ack { "ACK" } else { "NAK" },
            protocol::hex(&e.data)
        ),
        InboundPacket::AllLinkRecord(r) => format!(
            "[LINK] {} group {} {} data {}",
            if r.is_controller() { "controller" } else { "responder" },
            r.group,
            r.address,
            protocol::hex(&r.data)
        ),
        InboundPacket::AllLinkingCompleted(c) => format!(
            "[LINKED] code 0x{:02X} group {} {} cat {:02X}/{:02X} fw {:02X}",
            c.link_code, c.group, c.address, c.category, c.subcategory, c.firmware
        ),
        InboundPacket::Busy => "[BUSY] NAK".to_string(),
        other => format!("{:?}", other),
    }
}

/// Transport middleware that prints all frames and packets
pub struct MonitorTransport {
    inner: Arc<dyn Transport>,
    config: MonitorConfig,
}

impl MonitorTransport {
    /// Wrap a transport with printing middleware.
    ///
    /// Spawns a tokio task that prints inbound packets for as long as the
    /// inner transport keeps its broadcast channel open.
    pub fn wrap(transport: Arc<dyn Transport>, config: MonitorConfig) -> Arc<dyn Transport> {
        let rx = transport.subscribe_packets();
        tokio::spawn(print_inbound(rx, config.clone()));
        Arc::new(Self {
            inner: transport,
            config,
        })
    }

    fn print_outbound(&self, frame: &[u8]) {
        let opcode = frame.get(1).copied();
        if !self.config.show_outbound(opcode) {
            return;
        }
        match self.config.format {
            OutputFormat::Text => {
                let name = opcode.map(cmd::name).unwrap_or("WAKE");
                eprintln!(">>> {}  {}", name, protocol::hex(frame.get(2..).unwrap_or(&[])));
                if self.config.show_hex {
                    eprintln!("    HEX  {}", protocol::hex(frame));
                }
            }
            OutputFormat::Json => {
                let line = serde_json::json!({
                    "dir": "tx",
                    "opcode": opcode,
                    "name": opcode.map(cmd::name),
                    "frame": protocol::hex(frame),
                });
                eprintln!("{}", line);
            }
        }
    }
}

async fn print_inbound(mut rx: broadcast::Receiver<TimestampedPacket>, config: MonitorConfig) {
    loop {
        let tp = match rx.recv().await {
            Ok(tp) => tp,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                eprintln!("<<< ({} packets dropped)", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if !config.show_inbound(&tp.packet) {
            continue;
        }
        match config.format {
            OutputFormat::Text => eprintln!("<<< {:>9.3}  {}", tp.timestamp, describe(&tp.packet)),
            OutputFormat::Json => match serde_json::to_string(&tp) {
                Ok(s) => eprintln!("{}", s),
                Err(e) => eprintln!("<<< unserializable packet: {}", e),
            },
        }
    }
}

#[async_trait]
impl Transport for MonitorTransport {
    async fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.print_outbound(frame);
        self.inner.write_frame(frame).await
    }

    fn subscribe_packets(&self) -> broadcast::Receiver<TimestampedPacket> {
        self.inner.subscribe_packets()
    }

    fn port_info(&self) -> &PortInfo {
        self.inner.port_info()
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::standard_from;
    use crate::types::{Address, MessageSubtype};

    #[test]
    fn test_monitor_filter_parse() {
        assert_eq!(MonitorFilter::from_str("all").unwrap(), MonitorFilter::All);
        assert_eq!(MonitorFilter::from_str("rx").unwrap(), MonitorFilter::Inbound);
        assert_eq!(
            MonitorFilter::from_str("outbound").unwrap(),
            MonitorFilter::Outbound
        );
        assert_eq!(
            MonitorFilter::from_str("op=0x62").unwrap(),
            MonitorFilter::Opcode(0x62)
        );
        assert_eq!(
            MonitorFilter::from_str("0x50").unwrap(),
            MonitorFilter::Opcode(0x50)
        );
        assert!(MonitorFilter::from_str("bogus").is_err());
    }

    #[test]
    fn test_describe_device_message() {
        let p = standard_from(
            Address::new(0xAA, 0xBB, 0xCC),
            Address::new(1, 2, 3),
            MessageSubtype::AckOfDirect,
            0x11,
            0xFF,
        );
        assert_eq!(describe(&p), "[AA.BB.CC][S][ACK]: 11 FF (LIGHT_ON)");
    }

    #[test]
    fn test_opcode_filter_matches_inbound() {
        let cfg = MonitorConfig::default().with_filter(MonitorFilter::Opcode(0x50));
        let p = standard_from(
            Address::default(),
            Address::default(),
            MessageSubtype::Broadcast,
            0x01,
            0x00,
        );
        assert!(cfg.show_inbound(&p));
        assert!(!cfg.show_outbound(Some(0x62)));
    }
}
