//! Transport error types

use thiserror::Error;

use crate::protocol::cmd;

/// Errors that can occur during transport operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    #[error("Modem disconnected")]
    Disconnected,

    #[error("Serial error: {0}")]
    Serial(String),

    /// The port refused the frame; not retried
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// No echo within the local deadline
    #[error("No echo for {} (0x{opcode:02X}) from modem", cmd::name(*opcode))]
    LocalTimeout { opcode: u8 },

    /// Echo carried NAK
    #[error("Modem rejected {} (0x{opcode:02X})", cmd::name(*opcode))]
    NotAcked { opcode: u8 },

    /// The modem answered with a lone NAK: its buffer was full
    #[error("Modem busy, {} (0x{opcode:02X}) dropped", cmd::name(*opcode))]
    Busy { opcode: u8 },

    /// Echo was fine but the follow-up packet never came
    #[error("No reply to {} (0x{opcode:02X}) within deadline", cmd::name(*opcode))]
    RemoteTimeout { opcode: u8 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serialport::Error> for TransportError {
    fn from(e: serialport::Error) -> Self {
        match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(e.to_string()),
            _ => TransportError::Serial(e.to_string()),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => TransportError::PortNotFound(e.to_string()),
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected => {
                TransportError::Disconnected
            }
            _ => TransportError::Serial(e.to_string()),
        }
    }
}
