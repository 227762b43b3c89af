//! Modem interface error types

use std::time::Duration;

use insteon_transport::{Address, TransportError};
use thiserror::Error;

use crate::linking::LinkingState;

/// Errors from modem and device operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModemError {
    /// Transport layer error (write failure, modem NAK, local deadline)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The device answered with a NAK of direct message
    #[error("Device {address} rejected command {cmd1:02X} (reason 0x{cmd2:02X})")]
    RemoteNotAcked { address: Address, cmd1: u8, cmd2: u8 },

    /// The modem accepted the command but the device never answered
    #[error("No reply from device {address}")]
    RemoteTimeout { address: Address },

    /// The modem never reported ALL_LINKING_COMPLETED
    #[error("No linking completion within {0:?}")]
    LinkingTimeout(Duration),

    /// Reply arrived but does not make sense for the request
    #[error("Unexpected response: {0}")]
    ProtocolMismatch(String),

    /// Invalid parameter value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A linking session stopped before completing
    #[error("Linking failed while {state}: {source}")]
    LinkingFailed {
        state: LinkingState,
        source: Box<ModemError>,
    },

    /// Device or record not found
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ModemError {
    /// Failures the device command queue retries: the modem was busy or
    /// refused the frame, or the device stayed silent. An explicit device NAK
    /// is final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModemError::Transport(TransportError::NotAcked { .. })
                | ModemError::Transport(TransportError::Busy { .. })
                | ModemError::RemoteTimeout { .. }
        )
    }
}
