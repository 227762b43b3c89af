//! Type-safe PLM command builders and echo parsers
//!
//! Every host command serializes to an immutable [`CommandFrame`]. Commands
//! that return data in their echo (GET_IM_INFO, GET_IM_CONFIG) have a matching
//! [`ModemResponse`] type.

use std::fmt;

use serde::Serialize;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::packet::Echo;
use crate::protocol::{
    self, cmd, config_bits, link_code, manage_op, record_flags, EXTENDED_DATA_LEN, START,
};
use crate::types::{Address, LinkRole, MessageFlags};

/// Number of caller-supplied bytes in an extended message (D1..D13)
pub const EXTENDED_USER_LEN: usize = EXTENDED_DATA_LEN - 1;

// =============================================================================
// Core Traits
// =============================================================================

/// A fully serialized frame, ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: Vec<u8>,
}

impl CommandFrame {
    /// `START opcode data...`
    pub fn new(opcode: u8, data: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(data.len() + 2);
        bytes.push(START);
        bytes.push(opcode);
        bytes.extend_from_slice(data);
        Self { bytes }
    }

    /// The wake byte: a lone START with no opcode
    pub fn wake() -> Self {
        Self { bytes: vec![START] }
    }

    /// Opcode, or `None` for the wake byte
    pub fn opcode(&self) -> Option<u8> {
        self.bytes.get(1).copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().map(cmd::name).unwrap_or("WAKE");
        write!(f, "{} [{}]", name, protocol::hex(&self.bytes))
    }
}

/// A host command that can be serialized to a frame
pub trait ModemCommand {
    /// PLM opcode (e.g. 0x60 for GET_IM_INFO)
    const OPCODE: u8;

    /// Serialize the bytes following the opcode
    fn to_data(&self) -> Vec<u8>;

    /// Build the complete frame
    fn build(&self) -> CommandFrame {
        CommandFrame::new(Self::OPCODE, &self.to_data())
    }
}

/// Data carried back in a command echo
pub trait ModemResponse: Sized {
    /// Opcode the echo must carry
    const OPCODE: u8;

    /// Minimum echo data length (excluding START, opcode and ACK)
    const MIN_LEN: usize;

    fn from_data(data: &[u8]) -> Result<Self, ParseError>;

    /// Parse with validation
    fn parse(echo: &Echo) -> Result<Self, ParseError> {
        if echo.opcode != Self::OPCODE {
            return Err(ParseError::CommandMismatch {
                expected: Self::OPCODE,
                got: echo.opcode,
            });
        }
        if echo.data.len() < Self::MIN_LEN {
            return Err(ParseError::TooShort {
                expected: Self::MIN_LEN,
                got: echo.data.len(),
            });
        }
        Self::from_data(&echo.data)
    }
}

/// Parse and construction errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    TooShort { expected: usize, got: usize },
    CommandMismatch { expected: u8, got: u8 },
    InvalidValue { field: &'static str, value: u8 },
    UnknownOpcode(u8),
    PayloadTooLong { max: usize, got: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { expected, got } => {
                write!(f, "Frame too short: expected {expected} bytes, got {got}")
            }
            Self::CommandMismatch { expected, got } => {
                write!(f, "Opcode mismatch: expected 0x{expected:02X}, got 0x{got:02X}")
            }
            Self::InvalidValue { field, value } => {
                write!(f, "Invalid value for {field}: 0x{value:02X}")
            }
            Self::UnknownOpcode(op) => write!(f, "Unknown opcode 0x{op:02X}"),
            Self::PayloadTooLong { max, got } => {
                write!(f, "Extended payload too long: max {max} bytes, got {got}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

// =============================================================================
// Modem info / configuration
// =============================================================================

/// GET_IM_INFO (0x60)
#[derive(Debug, Clone, Copy, Default)]
pub struct GetImInfo;

impl ModemCommand for GetImInfo {
    const OPCODE: u8 = cmd::GET_IM_INFO;
    fn to_data(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Modem identity from the GET_IM_INFO echo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ModemInfo {
    pub address: Address,
    pub category: u8,
    pub subcategory: u8,
    pub firmware: u8,
}

impl ModemResponse for ModemInfo {
    const OPCODE: u8 = cmd::GET_IM_INFO;
    const MIN_LEN: usize = 6;

    fn from_data(data: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            address: Address([data[0], data[1], data[2]]),
            category: data[3],
            subcategory: data[4],
            firmware: data[5],
        })
    }
}

/// GET_IM_CONFIG (0x73)
#[derive(Debug, Clone, Copy, Default)]
pub struct GetImConfig;

impl ModemCommand for GetImConfig {
    const OPCODE: u8 = cmd::GET_IM_CONFIG;
    fn to_data(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Modem configuration, mirrored from the single config byte.
///
/// The wire byte stores three of the four options inverted ("disabled" bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModemConfig {
    pub auto_linking: bool,
    pub monitor_mode: bool,
    pub auto_led: bool,
    pub deadman: bool,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self::from_byte(0)
    }
}

impl ModemConfig {
    pub fn from_byte(b: u8) -> Self {
        Self {
            auto_linking: b & config_bits::AUTO_LINK_DISABLED == 0,
            monitor_mode: b & config_bits::MONITOR_MODE != 0,
            auto_led: b & config_bits::AUTO_LED_DISABLED == 0,
            deadman: b & config_bits::DEADMAN_DISABLED == 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut b = 0;
        if !self.auto_linking {
            b |= config_bits::AUTO_LINK_DISABLED;
        }
        if self.monitor_mode {
            b |= config_bits::MONITOR_MODE;
        }
        if !self.auto_led {
            b |= config_bits::AUTO_LED_DISABLED;
        }
        if !self.deadman {
            b |= config_bits::DEADMAN_DISABLED;
        }
        b
    }
}

impl ModemResponse for ModemConfig {
    const OPCODE: u8 = cmd::GET_IM_CONFIG;
    const MIN_LEN: usize = 1;

    fn from_data(data: &[u8]) -> Result<Self, ParseError> {
        Ok(Self::from_byte(data[0]))
    }
}

/// SET_IM_CONFIG (0x6B)
#[derive(Debug, Clone, Copy)]
pub struct SetImConfig(pub ModemConfig);

impl ModemCommand for SetImConfig {
    const OPCODE: u8 = cmd::SET_IM_CONFIG;
    fn to_data(&self) -> Vec<u8> {
        vec![self.0.to_byte()]
    }
}

/// SET_HOST_CATEGORY (0x66)
#[derive(Debug, Clone, Copy)]
pub struct SetHostCategory {
    pub category: u8,
    pub subcategory: u8,
    /// 0xFF leaves the firmware byte unchanged
    pub firmware: u8,
}

impl ModemCommand for SetHostCategory {
    const OPCODE: u8 = cmd::SET_HOST_CATEGORY;
    fn to_data(&self) -> Vec<u8> {
        vec![self.category, self.subcategory, self.firmware]
    }
}

/// LED_ON (0x6D) / LED_OFF (0x6E); only honoured when auto-LED is disabled
#[derive(Debug, Clone, Copy)]
pub struct SetLed(pub bool);

impl SetLed {
    pub fn opcode(&self) -> u8 {
        if self.0 {
            cmd::LED_ON
        } else {
            cmd::LED_OFF
        }
    }

    pub fn build(&self) -> CommandFrame {
        CommandFrame::new(self.opcode(), &[])
    }
}

/// RF_SLEEP (0x72); the two bytes are the ACK command bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct RfSleep {
    pub cmd1: u8,
    pub cmd2: u8,
}

impl ModemCommand for RfSleep {
    const OPCODE: u8 = cmd::RF_SLEEP;
    fn to_data(&self) -> Vec<u8> {
        vec![self.cmd1, self.cmd2]
    }
}

/// RESET_IM (0x67): erases every link and restores factory config
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetIm;

impl ModemCommand for ResetIm {
    const OPCODE: u8 = cmd::RESET_IM;
    fn to_data(&self) -> Vec<u8> {
        Vec::new()
    }
}

// =============================================================================
// Link table
// =============================================================================

/// GET_FIRST_ALL_LINK_RECORD (0x69)
#[derive(Debug, Clone, Copy, Default)]
pub struct GetFirstLinkRecord;

impl ModemCommand for GetFirstLinkRecord {
    const OPCODE: u8 = cmd::GET_FIRST_ALL_LINK_RECORD;
    fn to_data(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// GET_NEXT_ALL_LINK_RECORD (0x6A)
#[derive(Debug, Clone, Copy, Default)]
pub struct GetNextLinkRecord;

impl ModemCommand for GetNextLinkRecord {
    const OPCODE: u8 = cmd::GET_NEXT_ALL_LINK_RECORD;
    fn to_data(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// MANAGE_ALL_LINK_RECORD (0x6F): 9-byte payload
///
/// Fields are private; use [`ManageLinkRecord::new`] so the flags byte always
/// agrees with the requested role.
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ManageLinkRecord {
    control: u8,
    flags: u8,
    group: u8,
    address: [u8; 3],
    data: [u8; 3],
}

impl ManageLinkRecord {
    pub fn new(control: u8, role: LinkRole, group: u8, address: Address, data: [u8; 3]) -> Self {
        let mut flags = record_flags::IN_USE | record_flags::USED_BEFORE;
        if role == LinkRole::Controller {
            flags |= record_flags::CONTROLLER;
        }
        Self {
            control,
            flags,
            group,
            address: address.bytes(),
            data,
        }
    }

    /// Delete the first record matching role, group and address
    pub fn delete(role: LinkRole, group: u8, address: Address) -> Self {
        Self::new(manage_op::DELETE_FIRST, role, group, address, [0; 3])
    }

    /// Add a record for the given role
    pub fn add(role: LinkRole, group: u8, address: Address, data: [u8; 3]) -> Self {
        let control = match role {
            LinkRole::Controller => manage_op::ADD_CONTROLLER,
            LinkRole::Responder => manage_op::ADD_RESPONDER,
        };
        Self::new(control, role, group, address, data)
    }

    pub fn control(&self) -> u8 {
        self.control
    }
}

impl ModemCommand for ManageLinkRecord {
    const OPCODE: u8 = cmd::MANAGE_ALL_LINK_RECORD;
    fn to_data(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

/// START_ALL_LINKING (0x64)
#[derive(Debug, Clone, Copy)]
pub struct StartLinking {
    pub link_code: u8,
    pub group: u8,
}

impl StartLinking {
    /// Linking where the modem takes `role`
    pub fn as_role(role: LinkRole, group: u8) -> Self {
        let link_code = match role {
            LinkRole::Controller => link_code::CONTROLLER,
            LinkRole::Responder => link_code::RESPONDER,
        };
        Self { link_code, group }
    }

    /// Unlinking: the modem deletes the link the device announces
    pub fn delete(group: u8) -> Self {
        Self {
            link_code: link_code::DELETE,
            group,
        }
    }
}

impl ModemCommand for StartLinking {
    const OPCODE: u8 = cmd::START_ALL_LINKING;
    fn to_data(&self) -> Vec<u8> {
        vec![self.link_code, self.group]
    }
}

/// CANCEL_ALL_LINKING (0x65)
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelLinking;

impl ModemCommand for CancelLinking {
    const OPCODE: u8 = cmd::CANCEL_ALL_LINKING;
    fn to_data(&self) -> Vec<u8> {
        Vec::new()
    }
}

// =============================================================================
// Device messages
// =============================================================================

/// SEND_INSTEON_MESSAGE (0x62), standard or extended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessage {
    to: Address,
    flags: MessageFlags,
    cmd1: u8,
    cmd2: u8,
    user_data: Option<[u8; EXTENDED_DATA_LEN]>,
}

impl SendMessage {
    /// Standard direct message; the extended bit is cleared from `flags`
    pub fn standard(to: Address, cmd1: u8, cmd2: u8, flags: Option<MessageFlags>) -> Self {
        Self {
            to,
            flags: flags
                .unwrap_or(MessageFlags::STANDARD_DIRECT)
                .with_extended(false),
            cmd1,
            cmd2,
            user_data: None,
        }
    }

    /// Extended direct message with D1..D13 from `data` (zero padded) and the
    /// checksum placed in D14.
    pub fn extended(
        to: Address,
        cmd1: u8,
        cmd2: u8,
        data: &[u8],
        flags: Option<MessageFlags>,
    ) -> Result<Self, ParseError> {
        if data.len() > EXTENDED_USER_LEN {
            return Err(ParseError::PayloadTooLong {
                max: EXTENDED_USER_LEN,
                got: data.len(),
            });
        }
        let mut user_data = [0u8; EXTENDED_DATA_LEN];
        user_data[..data.len()].copy_from_slice(data);
        user_data[EXTENDED_DATA_LEN - 1] = protocol::extended_checksum(cmd1, cmd2, &user_data);
        Ok(Self {
            to,
            flags: flags
                .unwrap_or(MessageFlags::EXTENDED_DIRECT)
                .with_extended(true),
            cmd1,
            cmd2,
            user_data: Some(user_data),
        })
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    pub fn cmd1(&self) -> u8 {
        self.cmd1
    }

    pub fn cmd2(&self) -> u8 {
        self.cmd2
    }

    pub fn is_extended(&self) -> bool {
        self.user_data.is_some()
    }

    pub fn user_data(&self) -> Option<&[u8; EXTENDED_DATA_LEN]> {
        self.user_data.as_ref()
    }
}

impl ModemCommand for SendMessage {
    const OPCODE: u8 = cmd::SEND_INSTEON_MESSAGE;
    fn to_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(6 + EXTENDED_DATA_LEN);
        data.extend_from_slice(&self.to.bytes());
        data.push(self.flags.0);
        data.push(self.cmd1);
        data.push(self.cmd2);
        if let Some(ud) = &self.user_data {
            data.extend_from_slice(ud);
        }
        data
    }
}

/// SEND_ALL_LINK_COMMAND (0x61): group broadcast followed by modem cleanups
#[derive(Debug, Clone, Copy)]
pub struct SendAllLink {
    pub group: u8,
    pub cmd1: u8,
    pub cmd2: u8,
}

impl ModemCommand for SendAllLink {
    const OPCODE: u8 = cmd::SEND_ALL_LINK_COMMAND;
    fn to_data(&self) -> Vec<u8> {
        vec![self.group, self.cmd1, self.cmd2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_info_frame() {
        assert_eq!(GetImInfo.build().as_bytes(), &[0x02, 0x60]);
    }

    #[test]
    fn test_standard_send_frame() {
        let m = SendMessage::standard(Address::new(0xAA, 0xBB, 0xCC), 0x11, 0xFF, None);
        assert_eq!(
            m.build().as_bytes(),
            &[0x02, 0x62, 0xAA, 0xBB, 0xCC, 0x0F, 0x11, 0xFF]
        );
    }

    #[test]
    fn test_standard_send_clears_extended_bit() {
        let m = SendMessage::standard(
            Address::new(1, 2, 3),
            0x19,
            0x00,
            Some(MessageFlags::EXTENDED_DIRECT),
        );
        assert!(!m.flags().is_extended());
    }

    #[test]
    fn test_extended_send_frame_has_checksum() {
        let m = SendMessage::extended(
            Address::new(0xAA, 0xBB, 0xCC),
            0x2F,
            0x00,
            &[0x00, 0x00, 0x0F, 0xFF, 0x01],
            None,
        )
        .unwrap();
        let frame = m.build();
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), 22);
        assert_eq!(bytes[5], 0x1F);
        let sum: u32 = bytes[6..22].iter().map(|&b| b as u32).sum();
        assert_eq!(sum % 256, 0);
    }

    #[test]
    fn test_extended_rejects_long_payload() {
        let err = SendMessage::extended(Address::default(), 0x2E, 0, &[0u8; 14], None);
        assert_eq!(
            err,
            Err(ParseError::PayloadTooLong {
                max: EXTENDED_USER_LEN,
                got: 14
            })
        );
    }

    #[test]
    fn test_manage_link_record_layout() {
        let m = ManageLinkRecord::add(
            LinkRole::Controller,
            0x01,
            Address::new(0x11, 0x22, 0x33),
            [0xFF, 0x1C, 0x01],
        );
        assert_eq!(
            m.build().as_bytes(),
            &[0x02, 0x6F, 0x40, 0xE2, 0x01, 0x11, 0x22, 0x33, 0xFF, 0x1C, 0x01]
        );
        let d = ManageLinkRecord::delete(LinkRole::Responder, 0x02, Address::new(1, 2, 3));
        assert_eq!(d.control(), manage_op::DELETE_FIRST);
        assert_eq!(d.to_data()[1] & record_flags::CONTROLLER, 0);
    }

    #[test]
    fn test_config_byte_inverted_bits() {
        let c = ModemConfig::from_byte(0x00);
        assert!(c.auto_linking && c.auto_led && c.deadman && !c.monitor_mode);

        let c = ModemConfig::from_byte(0xE0);
        assert!(!c.auto_linking);
        assert!(c.monitor_mode);
        assert!(!c.auto_led);
        assert!(c.deadman);
        assert_eq!(c.to_byte(), 0xE0);
    }

    #[test]
    fn test_parse_info_echo() {
        let echo = Echo {
            opcode: cmd::GET_IM_INFO,
            data: vec![0x11, 0x22, 0x33, 0x03, 0x15, 0x9E],
            ack: true,
        };
        let info = ModemInfo::parse(&echo).unwrap();
        assert_eq!(info.address, Address::new(0x11, 0x22, 0x33));
        assert_eq!(info.category, 0x03);
        assert_eq!(info.subcategory, 0x15);
        assert_eq!(info.firmware, 0x9E);

        let wrong = Echo {
            opcode: cmd::GET_IM_CONFIG,
            ..echo
        };
        assert!(matches!(
            ModemInfo::parse(&wrong),
            Err(ParseError::CommandMismatch { .. })
        ));
    }

    #[test]
    fn test_start_linking_codes() {
        assert_eq!(
            StartLinking::as_role(LinkRole::Controller, 5).build().as_bytes(),
            &[0x02, 0x64, 0x01, 0x05]
        );
        assert_eq!(StartLinking::delete(1).to_data(), vec![0xFF, 0x01]);
    }
}
