//! Common types for the transport layer

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::protocol::flags;

/// 3-byte Insteon device address, displayed as `AA.BB.CC`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 3]);

impl Address {
    pub const fn new(a: u8, b: u8, c: u8) -> Self {
        Self([a, b, c])
    }

    /// Read an address from the first three bytes of a slice
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [a, b, c, ..] => Some(Self([*a, *b, *c])),
            _ => None,
        }
    }

    pub fn bytes(&self) -> [u8; 3] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}.{:02X}.{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

/// Error parsing an address string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(pub String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid Insteon address '{}'", self.0)
    }
}

impl std::error::Error for AddressParseError {}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Accepts `AA.BB.CC`, `AA:BB:CC`, `AA BB CC` or `AABBCC`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError(s.to_string());
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '.' | ':' | ' '))
            .collect();
        if digits.len() != 6 {
            return Err(err());
        }
        let mut out = [0u8; 3];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).map_err(|_| err())?;
        }
        Ok(Self(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Message subtype carried in bits 7..5 of the flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageSubtype {
    Direct,
    AckOfDirect,
    AllLinkCleanup,
    AckOfCleanup,
    Broadcast,
    NakOfDirect,
    AllLinkBroadcast,
    NakOfCleanup,
}

impl MessageSubtype {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0b000 => Self::Direct,
            0b001 => Self::AckOfDirect,
            0b010 => Self::AllLinkCleanup,
            0b011 => Self::AckOfCleanup,
            0b100 => Self::Broadcast,
            0b101 => Self::NakOfDirect,
            0b110 => Self::AllLinkBroadcast,
            _ => Self::NakOfCleanup,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Direct => 0b000,
            Self::AckOfDirect => 0b001,
            Self::AllLinkCleanup => 0b010,
            Self::AckOfCleanup => 0b011,
            Self::Broadcast => 0b100,
            Self::NakOfDirect => 0b101,
            Self::AllLinkBroadcast => 0b110,
            Self::NakOfCleanup => 0b111,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::AckOfDirect => "ACK",
            Self::AllLinkCleanup => "Cleanup",
            Self::AckOfCleanup => "Cleanup ACK",
            Self::Broadcast => "Broadcast",
            Self::NakOfDirect => "NAK",
            Self::AllLinkBroadcast => "All-Link Broadcast",
            Self::NakOfCleanup => "Cleanup NAK",
        }
    }
}

/// Decoded Insteon message flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageFlags(pub u8);

impl MessageFlags {
    pub const STANDARD_DIRECT: Self = Self(flags::STANDARD_DIRECT);
    pub const EXTENDED_DIRECT: Self = Self(flags::EXTENDED_DIRECT);

    /// Build a flags byte; hop counts are clamped to 0..=3
    pub fn new(subtype: MessageSubtype, extended: bool, hops_left: u8, max_hops: u8) -> Self {
        let hops_left = hops_left.min(3);
        let max_hops = max_hops.min(3);
        let mut b = subtype.bits() << flags::SUBTYPE_SHIFT;
        if extended {
            b |= flags::EXTENDED;
        }
        b |= hops_left << flags::HOPS_LEFT_SHIFT;
        b |= max_hops;
        Self(b)
    }

    pub fn subtype(self) -> MessageSubtype {
        MessageSubtype::from_bits((self.0 & flags::SUBTYPE_MASK) >> flags::SUBTYPE_SHIFT)
    }

    pub fn is_extended(self) -> bool {
        self.0 & flags::EXTENDED != 0
    }

    pub fn hops_left(self) -> u8 {
        (self.0 & flags::HOPS_LEFT_MASK) >> flags::HOPS_LEFT_SHIFT
    }

    pub fn max_hops(self) -> u8 {
        self.0 & flags::MAX_HOPS_MASK
    }

    /// Same flags with the extended bit forced on or off
    pub fn with_extended(self, extended: bool) -> Self {
        if extended {
            Self(self.0 | flags::EXTENDED)
        } else {
            Self(self.0 & !flags::EXTENDED)
        }
    }
}

/// Which side of a link a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkRole {
    Controller,
    Responder,
}

impl LinkRole {
    pub fn opposite(self) -> Self {
        match self {
            Self::Controller => Self::Responder,
            Self::Responder => Self::Controller,
        }
    }
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Controller => "controller",
            Self::Responder => "responder",
        })
    }
}

impl FromStr for LinkRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "controller" | "ctrl" | "c" => Ok(Self::Controller),
            "responder" | "resp" | "r" => Ok(Self::Responder),
            _ => Err(format!("unknown link role: {s}")),
        }
    }
}

/// Kind of port backing a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PortKind {
    /// USB serial adapter
    Usb,
    /// Native or unknown serial port
    Serial,
    /// In-process test transport
    Mock,
}

/// Port identification information
#[derive(Debug, Clone, Serialize)]
pub struct PortInfo {
    /// Device path (e.g. /dev/ttyUSB0)
    pub path: String,
    pub kind: PortKind,
    /// USB Vendor ID
    pub vid: Option<u16>,
    /// USB Product ID
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub product: Option<String>,
}

impl PortInfo {
    #[cfg(any(test, feature = "mock"))]
    pub fn mock() -> Self {
        Self {
            path: "mock".into(),
            kind: PortKind::Mock,
            vid: None,
            pid: None,
            serial_number: None,
            product: None,
        }
    }

    /// FTDI FT232R bridge used by PowerLinc 2413U modems
    pub fn is_likely_modem(&self) -> bool {
        self.vid == Some(crate::serial::FTDI_VID) && self.pid == Some(crate::serial::FT232R_PID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_formats() {
        let a: Address = "1A.2B.3C".parse().unwrap();
        assert_eq!(a, Address::new(0x1A, 0x2B, 0x3C));
        assert_eq!("1a:2b:3c".parse::<Address>().unwrap(), a);
        assert_eq!("1A2B3C".parse::<Address>().unwrap(), a);
        assert_eq!(a.to_string(), "1A.2B.3C");
        assert!("1A.2B".parse::<Address>().is_err());
        assert!("ZZ.2B.3C".parse::<Address>().is_err());
    }

    #[test]
    fn test_flags_decode() {
        let f = MessageFlags(0x2F);
        assert_eq!(f.subtype(), MessageSubtype::AckOfDirect);
        assert!(!f.is_extended());
        assert_eq!(f.hops_left(), 3);
        assert_eq!(f.max_hops(), 3);

        let b = MessageFlags(0x8B);
        assert_eq!(b.subtype(), MessageSubtype::Broadcast);
        assert_eq!(b.hops_left(), 2);
    }

    #[test]
    fn test_flags_new_clamps_hops() {
        let f = MessageFlags::new(MessageSubtype::Direct, true, 9, 7);
        assert_eq!(f, MessageFlags::EXTENDED_DIRECT);
        let s = MessageFlags::new(MessageSubtype::Direct, false, 3, 3);
        assert_eq!(s, MessageFlags::STANDARD_DIRECT);
    }

    #[test]
    fn test_address_serde_as_string() {
        let a = Address::new(0xAA, 0xBB, 0xCC);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"AA.BB.CC\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }
}
