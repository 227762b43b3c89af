//! Decoded modem packets
//!
//! [`InboundPacket`] is the single type flowing up from the parser to the
//! router. Device messages (0x50/0x51) keep their raw flags so both the
//! subtype and the hop counts stay available to matchers.

use serde::Serialize;

use crate::command::ParseError;
use crate::protocol::{self, cmd, record_flags, ACK, EXTENDED_DATA_LEN, NAK, START};
use crate::types::{Address, MessageFlags, MessageSubtype};

/// A standard or extended message received from (or echoed to) a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceMessage {
    pub from: Address,
    pub to: Address,
    pub flags: MessageFlags,
    pub cmd1: u8,
    pub cmd2: u8,
    /// D1..D14 for extended messages
    pub user_data: Option<[u8; EXTENDED_DATA_LEN]>,
}

impl DeviceMessage {
    pub fn subtype(&self) -> MessageSubtype {
        self.flags.subtype()
    }

    pub fn is_extended(&self) -> bool {
        self.user_data.is_some()
    }
}

/// Echo of a host command, with the modem's ACK/NAK
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Echo {
    pub opcode: u8,
    /// Bytes between the opcode and the trailing ACK/NAK
    pub data: Vec<u8>,
    pub ack: bool,
}

/// ALL_LINKING_COMPLETED (0x53)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkingCompleted {
    /// 0x00 responder, 0x01 controller, 0xFF deleted
    pub link_code: u8,
    pub group: u8,
    pub address: Address,
    pub category: u8,
    pub subcategory: u8,
    pub firmware: u8,
}

/// ALL_LINK_RECORD_RESPONSE (0x57)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkRecordResponse {
    pub flags: u8,
    pub group: u8,
    pub address: Address,
    pub data: [u8; 3],
}

impl LinkRecordResponse {
    pub fn is_controller(&self) -> bool {
        self.flags & record_flags::CONTROLLER != 0
    }
}

/// Every packet the modem can send to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum InboundPacket {
    StandardMessage(DeviceMessage),
    ExtendedMessage(DeviceMessage),
    X10Received { raw: u8, flag: u8 },
    AllLinkingCompleted(LinkingCompleted),
    ButtonEvent(u8),
    UserReset,
    CleanupFailure { group: u8, address: Address },
    AllLinkRecord(LinkRecordResponse),
    /// Cleanup status report; `ack` false means at least one responder failed
    CleanupStatus { ack: bool },
    Echo(Echo),
    /// Lone NAK: the modem could not accept the last command
    Busy,
}

/// Packet type used as the primary key of router filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    StandardMessage,
    ExtendedMessage,
    X10Received,
    AllLinkingCompleted,
    ButtonEvent,
    UserReset,
    CleanupFailure,
    AllLinkRecord,
    CleanupStatus,
    /// Echo of the given host opcode
    Echo(u8),
    Busy,
}

impl InboundPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::StandardMessage(_) => PacketType::StandardMessage,
            Self::ExtendedMessage(_) => PacketType::ExtendedMessage,
            Self::X10Received { .. } => PacketType::X10Received,
            Self::AllLinkingCompleted(_) => PacketType::AllLinkingCompleted,
            Self::ButtonEvent(_) => PacketType::ButtonEvent,
            Self::UserReset => PacketType::UserReset,
            Self::CleanupFailure { .. } => PacketType::CleanupFailure,
            Self::AllLinkRecord(_) => PacketType::AllLinkRecord,
            Self::CleanupStatus { .. } => PacketType::CleanupStatus,
            Self::Echo(e) => PacketType::Echo(e.opcode),
            Self::Busy => PacketType::Busy,
        }
    }

    /// Device message payload, for 0x50/0x51 packets
    pub fn device_message(&self) -> Option<&DeviceMessage> {
        match self {
            Self::StandardMessage(m) | Self::ExtendedMessage(m) => Some(m),
            _ => None,
        }
    }

    pub fn subtype(&self) -> Option<MessageSubtype> {
        self.device_message().map(DeviceMessage::subtype)
    }

    /// Originating device address, where the packet carries one
    pub fn source(&self) -> Option<Address> {
        match self {
            Self::StandardMessage(m) | Self::ExtendedMessage(m) => Some(m.from),
            Self::AllLinkingCompleted(c) => Some(c.address),
            Self::CleanupFailure { address, .. } => Some(*address),
            Self::AllLinkRecord(r) => Some(r.address),
            _ => None,
        }
    }

    /// Acknowledgement bit: echo ACK/NAK, cleanup status; true for everything else
    /// except a busy NAK
    pub fn is_ack(&self) -> bool {
        match self {
            Self::Echo(e) => e.ack,
            Self::CleanupStatus { ack } => *ack,
            Self::Busy => false,
            _ => true,
        }
    }

    pub fn as_echo(&self) -> Option<&Echo> {
        match self {
            Self::Echo(e) => Some(e),
            _ => None,
        }
    }

    /// Decode one complete frame (starting with START).
    pub fn decode(frame: &[u8]) -> Result<Self, ParseError> {
        if frame == [NAK] {
            return Ok(Self::Busy);
        }
        if frame.len() < 2 {
            return Err(ParseError::TooShort {
                expected: 2,
                got: frame.len(),
            });
        }
        if frame[0] != START {
            return Err(ParseError::InvalidValue {
                field: "start",
                value: frame[0],
            });
        }
        let opcode = frame[1];
        let expected = protocol::inbound_len(opcode)
            .or_else(|| protocol::echo_len(opcode, frame.get(5).copied()))
            .ok_or(ParseError::UnknownOpcode(opcode))?;
        if frame.len() < expected || expected == 0 {
            return Err(ParseError::TooShort {
                expected,
                got: frame.len(),
            });
        }
        let body = &frame[2..expected];

        let packet = match opcode {
            cmd::STANDARD_MESSAGE_RECEIVED | cmd::EXTENDED_MESSAGE_RECEIVED => {
                let msg = decode_device_message(body)?;
                if opcode == cmd::STANDARD_MESSAGE_RECEIVED {
                    Self::StandardMessage(msg)
                } else {
                    Self::ExtendedMessage(msg)
                }
            }
            cmd::X10_RECEIVED => Self::X10Received {
                raw: body[0],
                flag: body[1],
            },
            cmd::ALL_LINKING_COMPLETED => Self::AllLinkingCompleted(LinkingCompleted {
                link_code: body[0],
                group: body[1],
                address: Address([body[2], body[3], body[4]]),
                category: body[5],
                subcategory: body[6],
                firmware: body[7],
            }),
            cmd::BUTTON_EVENT => Self::ButtonEvent(body[0]),
            cmd::USER_RESET => Self::UserReset,
            cmd::ALL_LINK_CLEANUP_FAILURE => Self::CleanupFailure {
                // body[0] is always 0x01
                group: body[1],
                address: Address([body[2], body[3], body[4]]),
            },
            cmd::ALL_LINK_RECORD_RESPONSE => Self::AllLinkRecord(LinkRecordResponse {
                flags: body[0],
                group: body[1],
                address: Address([body[2], body[3], body[4]]),
                data: [body[5], body[6], body[7]],
            }),
            cmd::ALL_LINK_CLEANUP_STATUS => Self::CleanupStatus {
                ack: body[0] == ACK,
            },
            _ => {
                let (status, data) = body
                    .split_last()
                    .ok_or(ParseError::TooShort { expected, got: 2 })?;
                Self::Echo(Echo {
                    opcode,
                    data: data.to_vec(),
                    ack: *status == ACK,
                })
            }
        };
        Ok(packet)
    }
}

/// Decode `from(3) to(3) flags cmd1 cmd2 [D1..D14]`
fn decode_device_message(body: &[u8]) -> Result<DeviceMessage, ParseError> {
    if body.len() < 9 {
        return Err(ParseError::TooShort {
            expected: 9,
            got: body.len(),
        });
    }
    let user_data = if body.len() >= 9 + EXTENDED_DATA_LEN {
        let mut d = [0u8; EXTENDED_DATA_LEN];
        d.copy_from_slice(&body[9..9 + EXTENDED_DATA_LEN]);
        Some(d)
    } else {
        None
    };
    Ok(DeviceMessage {
        from: Address([body[0], body[1], body[2]]),
        to: Address([body[3], body[4], body[5]]),
        flags: MessageFlags(body[6]),
        cmd1: body[7],
        cmd2: body[8],
        user_data,
    })
}

/// Packet with timestamp (seconds since the transport was opened)
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedPacket {
    pub timestamp: f64,
    pub packet: InboundPacket,
}

impl TimestampedPacket {
    pub fn new(timestamp: f64, packet: InboundPacket) -> Self {
        Self { timestamp, packet }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_standard_ack() {
        let frame = [
            0x02, 0x50, 0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33, 0x2F, 0x11, 0xFF,
        ];
        let p = InboundPacket::decode(&frame).unwrap();
        assert_eq!(p.packet_type(), PacketType::StandardMessage);
        assert_eq!(p.subtype(), Some(MessageSubtype::AckOfDirect));
        assert_eq!(p.source(), Some(Address::new(0xAA, 0xBB, 0xCC)));
        let m = p.device_message().unwrap();
        assert_eq!((m.cmd1, m.cmd2), (0x11, 0xFF));
        assert!(!m.is_extended());
    }

    #[test]
    fn test_decode_get_info_echo() {
        let frame = [0x02, 0x60, 0x11, 0x22, 0x33, 0x03, 0x15, 0x9E, 0x06];
        let p = InboundPacket::decode(&frame).unwrap();
        assert_eq!(p.packet_type(), PacketType::Echo(cmd::GET_IM_INFO));
        assert!(p.is_ack());
        assert_eq!(p.as_echo().unwrap().data, vec![0x11, 0x22, 0x33, 0x03, 0x15, 0x9E]);
    }

    #[test]
    fn test_decode_nak_echo() {
        let p = InboundPacket::decode(&[0x02, 0x69, 0x15]).unwrap();
        assert_eq!(p.packet_type(), PacketType::Echo(cmd::GET_FIRST_ALL_LINK_RECORD));
        assert!(!p.is_ack());
    }

    #[test]
    fn test_decode_link_record() {
        let frame = [0x02, 0x57, 0xE2, 0x01, 0xAA, 0xBB, 0xCC, 0x01, 0x20, 0x41];
        let p = InboundPacket::decode(&frame).unwrap();
        match p {
            InboundPacket::AllLinkRecord(r) => {
                assert!(r.is_controller());
                assert_eq!(r.group, 1);
                assert_eq!(r.data, [0x01, 0x20, 0x41]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_opcode() {
        assert_eq!(
            InboundPacket::decode(&[0x02, 0x42, 0x00]),
            Err(ParseError::UnknownOpcode(0x42))
        );
    }

    #[test]
    fn test_busy() {
        assert_eq!(InboundPacket::decode(&[NAK]).unwrap(), InboundPacket::Busy);
        assert!(!InboundPacket::Busy.is_ack());
    }
}
