//! Transport abstraction layer for Insteon PowerLinc Modem communication
//!
//! This crate provides:
//!
//! - the PLM byte protocol (opcodes, frame lengths, extended checksum)
//! - typed command builders and decoded inbound packets
//! - a byte-stream parser and a serial transport (19200 8-N-1)
//! - a packet router with explicit matchers
//! - `FlowControlTransport`, the ordered single-flight modem queue
//! - a traffic monitor, plus a scripted mock transport behind the `mock`
//!   feature

pub mod command;
pub mod error;
pub mod flow_control;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod monitor;
pub mod packet;
pub mod parser;
pub mod protocol;
pub mod router;
pub mod serial;
pub mod types;

pub use command::{
    CancelLinking, CommandFrame, GetFirstLinkRecord, GetImConfig, GetImInfo, GetNextLinkRecord,
    ManageLinkRecord, ModemCommand, ModemConfig, ModemInfo, ModemResponse, ParseError, ResetIm,
    RfSleep, SendAllLink, SendMessage, SetHostCategory, SetImConfig, SetLed, StartLinking,
};
pub use error::TransportError;
pub use flow_control::{Exchange, FlowControlTransport, Request, Timing};
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockTransport, ScriptedReply};
pub use monitor::{MonitorConfig, MonitorFilter, MonitorTransport, OutputFormat};
pub use packet::{
    DeviceMessage, Echo, InboundPacket, LinkRecordResponse, LinkingCompleted, PacketType,
    TimestampedPacket,
};
pub use parser::PacketParser;
pub use router::{OnceListener, PacketFilter, PacketRouter, StreamListener};
pub use serial::{list_modems, list_ports, SerialTransport};
pub use types::{Address, LinkRole, MessageFlags, MessageSubtype, PortInfo, PortKind};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The core transport trait - all backends implement this
///
/// A transport only moves bytes: it writes complete frames and broadcasts
/// every decoded inbound packet. Correlation lives in `FlowControlTransport`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one complete frame (starting with 0x02)
    async fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to decoded inbound packets.
    ///
    /// Packets are pushed from a dedicated reader with a timestamp (seconds
    /// since the transport opened).
    fn subscribe_packets(&self) -> broadcast::Receiver<TimestampedPacket>;

    /// Port identification
    fn port_info(&self) -> &PortInfo;

    /// Check if transport is still connected
    async fn is_connected(&self) -> bool;

    /// Close the transport gracefully
    async fn close(&self) -> Result<(), TransportError>;
}

/// Type alias for a boxed transport
pub type BoxedTransport = Arc<dyn Transport>;
