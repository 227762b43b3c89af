//! Byte-stream parser: serial bytes in, one `InboundPacket` per frame out
//!
//! Frame length is fixed by opcode (SEND_INSTEON_MESSAGE echoes also depend
//! on the extended flag). Partial frames are kept across calls; bytes that
//! cannot start a frame are skipped until the next START marker.

use tracing::{debug, trace};

use crate::packet::InboundPacket;
use crate::protocol::{self, NAK, START};

#[derive(Debug, Default)]
pub struct PacketParser {
    buf: Vec<u8>,
    skipped: usize,
}

impl PacketParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes discarded while resynchronizing
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed bytes; returns every packet completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<InboundPacket> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            match self.buf.first() {
                None => break,
                Some(&NAK) => {
                    self.buf.remove(0);
                    out.push(InboundPacket::Busy);
                    continue;
                }
                Some(&START) => {}
                Some(&b) => {
                    trace!("Skipping stray byte 0x{:02X}", b);
                    self.buf.remove(0);
                    self.skipped += 1;
                    continue;
                }
            }

            let Some(&opcode) = self.buf.get(1) else {
                break;
            };
            let len = match protocol::inbound_len(opcode)
                .or_else(|| protocol::echo_len(opcode, self.buf.get(5).copied()))
            {
                Some(0) => break, // need the flags byte
                Some(len) => len,
                None => {
                    debug!("Unknown opcode 0x{:02X}, resynchronizing", opcode);
                    self.buf.remove(0);
                    self.skipped += 1;
                    continue;
                }
            };
            if self.buf.len() < len {
                break;
            }

            let frame: Vec<u8> = self.buf.drain(..len).collect();
            match InboundPacket::decode(&frame) {
                Ok(packet) => out.push(packet),
                Err(e) => {
                    debug!("Dropping frame {}: {}", protocol::hex(&frame), e);
                    self.skipped += frame.len();
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;
    use crate::protocol::cmd;
    use crate::types::MessageSubtype;

    #[test]
    fn test_split_frame_across_reads() {
        let mut p = PacketParser::new();
        assert!(p.push(&[0x02, 0x60, 0x11, 0x22]).is_empty());
        assert_eq!(p.buffered(), 4);
        let out = p.push(&[0x33, 0x03, 0x15, 0x9E, 0x06]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].packet_type(), PacketType::Echo(cmd::GET_IM_INFO));
        assert_eq!(p.buffered(), 0);
    }

    #[test]
    fn test_send_echo_waits_for_flags_byte() {
        let mut p = PacketParser::new();
        assert!(p.push(&[0x02, 0x62, 0xAA, 0xBB, 0xCC]).is_empty());
        // Extended flags: 23-byte echo
        assert!(p.push(&[0x1F, 0x2F, 0x00]).is_empty());
        let rest = [0u8; 14];
        assert!(p.push(&rest).is_empty());
        let out = p.push(&[0x06]);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_ack());
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut p = PacketParser::new();
        let mut bytes = vec![0xFF, 0x00, 0x02, 0x42];
        bytes.extend_from_slice(&[
            0x02, 0x50, 0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33, 0x2F, 0x11, 0xFF,
        ]);
        let out = p.push(&bytes);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].subtype(), Some(MessageSubtype::AckOfDirect));
        assert_eq!(p.skipped(), 4);
    }

    #[test]
    fn test_back_to_back_frames_and_busy() {
        let mut p = PacketParser::new();
        let out = p.push(&[0x15, 0x02, 0x69, 0x15, 0x02, 0x58, 0x06]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], InboundPacket::Busy);
        assert!(!out[1].is_ack());
        assert_eq!(out[2], InboundPacket::CleanupStatus { ack: true });
    }
}
