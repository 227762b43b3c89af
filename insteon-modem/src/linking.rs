//! Linking orchestrator
//!
//! Linking needs both ends in linking mode at once: the modem through
//! START_ALL_LINKING and the device through an enter-linking command, with a
//! settle delay between them. The modem reports success with
//! ALL_LINKING_COMPLETED (0x53).
//!
//! ```text
//! link:   Idle → GatewayLinking → Settling → DeviceLinking → WaitCompletion → Linked
//! unlink: Idle → DeviceLinking → Settling → GatewayLinking → WaitCompletion → Linked
//!                          (any step) → Failed
//! ```
//!
//! On unlink the modem deletes its controller record in unlink mode (0xFF)
//! when it controlled the device, and answers as a responder (0x00) when
//! the device was the controller.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use insteon_transport::{
    CancelLinking, InboundPacket, LinkRole, LinkingCompleted, PacketFilter, PacketType,
    StartLinking,
};

use crate::device::DeviceCommandQueue;
use crate::error::ModemError;

/// Where a linking session is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LinkingState {
    Idle,
    GatewayLinking,
    Settling,
    DeviceLinking,
    WaitCompletion,
    Linked,
    Failed,
}

impl fmt::Display for LinkingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::GatewayLinking => "putting modem in linking mode",
            Self::Settling => "settling",
            Self::DeviceLinking => "putting device in linking mode",
            Self::WaitCompletion => "waiting for link completion",
            Self::Linked => "linked",
            Self::Failed => "failed",
        })
    }
}

/// Which end of the link becomes the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LinkDirection {
    /// The modem controls the device (the usual setup)
    #[default]
    ModemControls,
    /// The device controls the modem
    DeviceControls,
}

impl LinkDirection {
    pub fn modem_role(self) -> LinkRole {
        match self {
            Self::ModemControls => LinkRole::Controller,
            Self::DeviceControls => LinkRole::Responder,
        }
    }

    pub fn from_modem_role(role: LinkRole) -> Self {
        match role {
            LinkRole::Controller => Self::ModemControls,
            LinkRole::Responder => Self::DeviceControls,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Link,
    Unlink,
}

/// One link or unlink run against one device
pub struct LinkingSession {
    device: Arc<DeviceCommandQueue>,
    group: u8,
    direction: LinkDirection,
    state: LinkingState,
    history: Vec<LinkingState>,
    gateway_armed: bool,
}

impl LinkingSession {
    pub fn new(device: Arc<DeviceCommandQueue>, group: u8, direction: LinkDirection) -> Self {
        Self {
            device,
            group,
            direction,
            state: LinkingState::Idle,
            history: vec![LinkingState::Idle],
            gateway_armed: false,
        }
    }

    pub fn state(&self) -> LinkingState {
        self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[LinkingState] {
        &self.history
    }

    pub fn group(&self) -> u8 {
        self.group
    }

    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    /// Create the link
    pub async fn link(&mut self) -> Result<LinkingCompleted, ModemError> {
        self.run(Mode::Link).await
    }

    /// Remove the link
    pub async fn unlink(&mut self) -> Result<LinkingCompleted, ModemError> {
        self.run(Mode::Unlink).await
    }

    fn enter(&mut self, state: LinkingState) {
        info!(
            "{} group {}: {} → {}",
            self.device.address(),
            self.group,
            self.state,
            state
        );
        self.state = state;
        self.history.push(state);
    }

    async fn run(&mut self, mode: Mode) -> Result<LinkingCompleted, ModemError> {
        if self.state != LinkingState::Idle {
            return Err(ModemError::InvalidParameter(format!(
                "linking session already used ({})",
                self.state
            )));
        }

        match self.steps(mode).await {
            Ok(done) => {
                self.enter(LinkingState::Linked);
                Ok(done)
            }
            Err(e) => {
                let failed_in = self.state;
                if self.gateway_armed {
                    // Not a rollback: just leave the modem out of linking mode
                    if let Err(cancel) = self.device.flow().send(&CancelLinking).await {
                        warn!("Cancel linking after failure also failed: {}", cancel);
                    }
                }
                self.enter(LinkingState::Failed);
                Err(ModemError::LinkingFailed {
                    state: failed_in,
                    source: Box::new(e),
                })
            }
        }
    }

    /// START_ALL_LINKING for this session's mode and direction
    fn gateway_start(&self, mode: Mode) -> StartLinking {
        match (mode, self.direction) {
            (Mode::Link, direction) => StartLinking::as_role(direction.modem_role(), self.group),
            (Mode::Unlink, LinkDirection::ModemControls) => StartLinking::delete(self.group),
            (Mode::Unlink, LinkDirection::DeviceControls) => {
                StartLinking::as_role(LinkRole::Responder, self.group)
            }
        }
    }

    async fn steps(&mut self, mode: Mode) -> Result<LinkingCompleted, ModemError> {
        let flow = Arc::clone(self.device.flow());
        let timing = flow.timing().clone();
        let address = self.device.address();

        // Completion can only arrive after both ends are armed, but register
        // up front so no window exists.
        let mut completion = flow.router().once(
            PacketFilter::new(PacketType::AllLinkingCompleted).matching(move |p| {
                matches!(p, InboundPacket::AllLinkingCompleted(c) if c.address == address)
            }),
        );

        let modem_start = self.gateway_start(mode);

        match mode {
            Mode::Link => {
                self.enter(LinkingState::GatewayLinking);
                flow.send(&modem_start).await?;
                self.gateway_armed = true;

                self.enter(LinkingState::Settling);
                tokio::time::sleep(timing.link_settle()).await;

                self.enter(LinkingState::DeviceLinking);
                self.device.enter_linking(self.group).await?;
            }
            Mode::Unlink => {
                self.enter(LinkingState::DeviceLinking);
                self.device.enter_unlinking(self.group).await?;

                self.enter(LinkingState::Settling);
                tokio::time::sleep(timing.link_settle()).await;

                self.enter(LinkingState::GatewayLinking);
                flow.send(&modem_start).await?;
                self.gateway_armed = true;
            }
        }

        self.enter(LinkingState::WaitCompletion);
        let packet = match tokio::time::timeout(timing.link_complete_timeout(), completion.recv())
            .await
        {
            Ok(Some(packet)) => packet,
            Ok(None) => return Err(insteon_transport::TransportError::Disconnected.into()),
            Err(_) => return Err(ModemError::LinkingTimeout(timing.link_complete_timeout())),
        };
        let InboundPacket::AllLinkingCompleted(done) = &packet else {
            return Err(ModemError::ProtocolMismatch(format!(
                "expected linking completed, got {:?}",
                packet.packet_type()
            )));
        };
        let done = *done;

        if mode == Mode::Link && done.link_code != modem_start.link_code {
            return Err(ModemError::ProtocolMismatch(format!(
                "modem linked with code 0x{:02X}, expected 0x{:02X}",
                done.link_code, modem_start.link_code
            )));
        }
        if mode == Mode::Unlink && done.link_code != modem_start.link_code {
            warn!(
                "Unlink of {} completed with link code 0x{:02X}",
                address, done.link_code
            );
        }
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_roles() {
        assert_eq!(LinkDirection::default().modem_role(), LinkRole::Controller);
        assert_eq!(
            LinkDirection::DeviceControls.modem_role(),
            LinkRole::Responder
        );
        assert_eq!(
            LinkDirection::from_modem_role(LinkRole::Responder),
            LinkDirection::DeviceControls
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LinkingState::WaitCompletion.to_string(), "waiting for link completion");
    }
}
