//! Protocol constants and utilities for the Insteon PowerLinc Modem (PLM)
//!
//! Every frame on the serial line starts with [`START`] followed by an opcode.
//! Host commands are echoed back by the modem with a trailing [`ACK`] or
//! [`NAK`]; modem-originated packets (0x50..0x58) have no trailing status.

/// Frame start marker
pub const START: u8 = 0x02;
/// Positive acknowledgement trailing a command echo
pub const ACK: u8 = 0x06;
/// Negative acknowledgement; a lone NAK means the modem is busy
pub const NAK: u8 = 0x15;

/// Serial line speed (8-N-1)
pub const BAUD_RATE: u32 = 19_200;

/// Number of user-data bytes in an extended message (D1..D14)
pub const EXTENDED_DATA_LEN: usize = 14;

/// PLM opcodes (second byte of every frame)
pub mod cmd {
    // Modem -> host
    pub const STANDARD_MESSAGE_RECEIVED: u8 = 0x50;
    pub const EXTENDED_MESSAGE_RECEIVED: u8 = 0x51;
    pub const X10_RECEIVED: u8 = 0x52;
    pub const ALL_LINKING_COMPLETED: u8 = 0x53;
    pub const BUTTON_EVENT: u8 = 0x54;
    pub const USER_RESET: u8 = 0x55;
    pub const ALL_LINK_CLEANUP_FAILURE: u8 = 0x56;
    pub const ALL_LINK_RECORD_RESPONSE: u8 = 0x57;
    pub const ALL_LINK_CLEANUP_STATUS: u8 = 0x58;

    // Host -> modem
    pub const GET_IM_INFO: u8 = 0x60;
    pub const SEND_ALL_LINK_COMMAND: u8 = 0x61;
    pub const SEND_INSTEON_MESSAGE: u8 = 0x62;
    pub const SEND_X10: u8 = 0x63;
    pub const START_ALL_LINKING: u8 = 0x64;
    pub const CANCEL_ALL_LINKING: u8 = 0x65;
    pub const SET_HOST_CATEGORY: u8 = 0x66;
    pub const RESET_IM: u8 = 0x67;
    pub const SET_ACK_MESSAGE_BYTE: u8 = 0x68;
    pub const GET_FIRST_ALL_LINK_RECORD: u8 = 0x69;
    pub const GET_NEXT_ALL_LINK_RECORD: u8 = 0x6A;
    pub const SET_IM_CONFIG: u8 = 0x6B;
    pub const GET_ALL_LINK_RECORD_FOR_SENDER: u8 = 0x6C;
    pub const LED_ON: u8 = 0x6D;
    pub const LED_OFF: u8 = 0x6E;
    pub const MANAGE_ALL_LINK_RECORD: u8 = 0x6F;
    pub const SET_NAK_MESSAGE_BYTE: u8 = 0x70;
    pub const SET_ACK_MESSAGE_TWO_BYTES: u8 = 0x71;
    pub const RF_SLEEP: u8 = 0x72;
    pub const GET_IM_CONFIG: u8 = 0x73;

    /// Get human-readable name for an opcode
    pub fn name(opcode: u8) -> &'static str {
        match opcode {
            STANDARD_MESSAGE_RECEIVED => "STANDARD_MESSAGE_RECEIVED",
            EXTENDED_MESSAGE_RECEIVED => "EXTENDED_MESSAGE_RECEIVED",
            X10_RECEIVED => "X10_RECEIVED",
            ALL_LINKING_COMPLETED => "ALL_LINKING_COMPLETED",
            BUTTON_EVENT => "BUTTON_EVENT",
            USER_RESET => "USER_RESET",
            ALL_LINK_CLEANUP_FAILURE => "ALL_LINK_CLEANUP_FAILURE",
            ALL_LINK_RECORD_RESPONSE => "ALL_LINK_RECORD_RESPONSE",
            ALL_LINK_CLEANUP_STATUS => "ALL_LINK_CLEANUP_STATUS",
            GET_IM_INFO => "GET_IM_INFO",
            SEND_ALL_LINK_COMMAND => "SEND_ALL_LINK_COMMAND",
            SEND_INSTEON_MESSAGE => "SEND_INSTEON_MESSAGE",
            SEND_X10 => "SEND_X10",
            START_ALL_LINKING => "START_ALL_LINKING",
            CANCEL_ALL_LINKING => "CANCEL_ALL_LINKING",
            SET_HOST_CATEGORY => "SET_HOST_CATEGORY",
            RESET_IM => "RESET_IM",
            SET_ACK_MESSAGE_BYTE => "SET_ACK_MESSAGE_BYTE",
            GET_FIRST_ALL_LINK_RECORD => "GET_FIRST_ALL_LINK_RECORD",
            GET_NEXT_ALL_LINK_RECORD => "GET_NEXT_ALL_LINK_RECORD",
            SET_IM_CONFIG => "SET_IM_CONFIG",
            GET_ALL_LINK_RECORD_FOR_SENDER => "GET_ALL_LINK_RECORD_FOR_SENDER",
            LED_ON => "LED_ON",
            LED_OFF => "LED_OFF",
            MANAGE_ALL_LINK_RECORD => "MANAGE_ALL_LINK_RECORD",
            SET_NAK_MESSAGE_BYTE => "SET_NAK_MESSAGE_BYTE",
            SET_ACK_MESSAGE_TWO_BYTES => "SET_ACK_MESSAGE_TWO_BYTES",
            RF_SLEEP => "RF_SLEEP",
            GET_IM_CONFIG => "GET_IM_CONFIG",
            _ => "UNKNOWN",
        }
    }

    /// Whether the opcode is a host command (echoed back with ACK/NAK)
    pub fn is_host_command(opcode: u8) -> bool {
        (GET_IM_INFO..=GET_IM_CONFIG).contains(&opcode)
    }
}

/// Insteon message flag bits (byte following the addresses)
pub mod flags {
    /// Message subtype, bits 7..5
    pub const SUBTYPE_MASK: u8 = 0xE0;
    pub const SUBTYPE_SHIFT: u8 = 5;
    /// Extended (14 data bytes) message
    pub const EXTENDED: u8 = 0x10;
    pub const HOPS_LEFT_MASK: u8 = 0x0C;
    pub const HOPS_LEFT_SHIFT: u8 = 2;
    pub const MAX_HOPS_MASK: u8 = 0x03;

    /// Direct message, 3 hops left of 3
    pub const STANDARD_DIRECT: u8 = 0x0F;
    /// Extended direct message, 3 hops left of 3
    pub const EXTENDED_DIRECT: u8 = 0x1F;
}

/// IM configuration byte (GET_IM_CONFIG / SET_IM_CONFIG)
pub mod config_bits {
    pub const AUTO_LINK_DISABLED: u8 = 0x80;
    pub const MONITOR_MODE: u8 = 0x40;
    pub const AUTO_LED_DISABLED: u8 = 0x20;
    pub const DEADMAN_DISABLED: u8 = 0x10;
}

/// All-link record flag bits (modem table and device ALDB share the layout)
pub mod record_flags {
    pub const IN_USE: u8 = 0x80;
    pub const CONTROLLER: u8 = 0x40;
    /// Cleared on the high-water record (never used)
    pub const USED_BEFORE: u8 = 0x02;
}

/// MANAGE_ALL_LINK_RECORD control codes
pub mod manage_op {
    pub const FIND_FIRST: u8 = 0x00;
    pub const FIND_NEXT: u8 = 0x01;
    pub const MODIFY_FIRST_OR_ADD: u8 = 0x20;
    pub const ADD_CONTROLLER: u8 = 0x40;
    pub const ADD_RESPONDER: u8 = 0x41;
    pub const DELETE_FIRST: u8 = 0x80;
}

/// START_ALL_LINKING link codes
pub mod link_code {
    pub const RESPONDER: u8 = 0x00;
    pub const CONTROLLER: u8 = 0x01;
    pub const EITHER: u8 = 0x03;
    pub const DELETE: u8 = 0xFF;
}

/// Device (cmd1) commands carried inside SEND_INSTEON_MESSAGE
pub mod insteon {
    /// cmd1 of the broadcast a device sends after SET or an ID request
    pub const SET_BUTTON_RESPONDER: u8 = 0x01;
    pub const SET_BUTTON_CONTROLLER: u8 = 0x02;
    pub const PRODUCT_DATA_REQUEST: u8 = 0x03;
    pub const EXIT_LINKING: u8 = 0x08;
    pub const ENTER_LINKING: u8 = 0x09;
    pub const ENTER_UNLINKING: u8 = 0x0A;
    pub const ENGINE_VERSION: u8 = 0x0D;
    pub const PING: u8 = 0x0F;
    pub const ID_REQUEST: u8 = 0x10;
    pub const LIGHT_ON: u8 = 0x11;
    pub const LIGHT_ON_FAST: u8 = 0x12;
    pub const LIGHT_OFF: u8 = 0x13;
    pub const LIGHT_OFF_FAST: u8 = 0x14;
    pub const STATUS_REQUEST: u8 = 0x19;
    pub const GET_OPERATING_FLAGS: u8 = 0x1F;
    pub const SET_OPERATING_FLAGS: u8 = 0x20;
    pub const EXTENDED_GET_SET: u8 = 0x2E;
    pub const READ_WRITE_ALDB: u8 = 0x2F;
    pub const BEEP: u8 = 0x30;

    /// ALDB sub-commands (D2 of a READ_WRITE_ALDB message)
    pub const ALDB_READ: u8 = 0x00;
    pub const ALDB_RECORD: u8 = 0x01;
    pub const ALDB_WRITE: u8 = 0x02;

    pub fn name(cmd1: u8) -> &'static str {
        match cmd1 {
            SET_BUTTON_RESPONDER => "SET_BUTTON_RESPONDER",
            SET_BUTTON_CONTROLLER => "SET_BUTTON_CONTROLLER",
            PRODUCT_DATA_REQUEST => "PRODUCT_DATA_REQUEST",
            EXIT_LINKING => "EXIT_LINKING",
            ENTER_LINKING => "ENTER_LINKING",
            ENTER_UNLINKING => "ENTER_UNLINKING",
            ENGINE_VERSION => "ENGINE_VERSION",
            PING => "PING",
            ID_REQUEST => "ID_REQUEST",
            LIGHT_ON => "LIGHT_ON",
            LIGHT_ON_FAST => "LIGHT_ON_FAST",
            LIGHT_OFF => "LIGHT_OFF",
            LIGHT_OFF_FAST => "LIGHT_OFF_FAST",
            STATUS_REQUEST => "STATUS_REQUEST",
            GET_OPERATING_FLAGS => "GET_OPERATING_FLAGS",
            SET_OPERATING_FLAGS => "SET_OPERATING_FLAGS",
            EXTENDED_GET_SET => "EXTENDED_GET_SET",
            READ_WRITE_ALDB => "READ_WRITE_ALDB",
            BEEP => "BEEP",
            _ => "UNKNOWN",
        }
    }
}

/// Default timing for correlation and device queues.
///
/// All of these are overridable through [`crate::Timing`].
pub mod timing {
    /// Wait for the modem's local echo (ms)
    pub const LOCAL_TIMEOUT_MS: u64 = 1_000;
    /// Wait for a downstream device reply after the echo (ms)
    pub const REMOTE_TIMEOUT_MS: u64 = 10_000;
    /// Delay after a successful modem command before the next one (ms)
    pub const GATEWAY_COOLDOWN_MS: u64 = 100;
    /// Delay after a resolved standard device command (ms)
    pub const DEVICE_COOLDOWN_MS: u64 = 200;
    /// Delay after a resolved extended device command (ms)
    pub const EXTENDED_COOLDOWN_MS: u64 = 500;
    /// Re-sends of a device command after a busy modem or silent device
    pub const DEVICE_RETRIES: u32 = 2;
    /// Re-sends of a modem request after a lone busy NAK
    pub const BUSY_RETRIES: u32 = 3;
    /// Settle time between the two halves of a linking handshake (ms)
    pub const LINK_SETTLE_MS: u64 = 2_000;
    /// Wait for the all-linking-completed report (ms)
    pub const LINK_COMPLETE_TIMEOUT_MS: u64 = 30_000;
    /// Wait for an ID request broadcast (ms)
    pub const RESOLVE_TIMEOUT_MS: u64 = 2_000;
    /// Pause after the wake byte (ms)
    pub const WAKE_SETTLE_MS: u64 = 40;
    /// Queue capacity for pending requests
    pub const REQUEST_QUEUE_SIZE: usize = 32;
}

/// Total frame length (including START) of a modem-originated packet
pub fn inbound_len(opcode: u8) -> Option<usize> {
    Some(match opcode {
        cmd::STANDARD_MESSAGE_RECEIVED => 11,
        cmd::EXTENDED_MESSAGE_RECEIVED => 25,
        cmd::X10_RECEIVED => 4,
        cmd::ALL_LINKING_COMPLETED => 10,
        cmd::BUTTON_EVENT => 3,
        cmd::USER_RESET => 2,
        cmd::ALL_LINK_CLEANUP_FAILURE => 7,
        cmd::ALL_LINK_RECORD_RESPONSE => 10,
        cmd::ALL_LINK_CLEANUP_STATUS => 3,
        _ => return None,
    })
}

/// Total echo length (including START and the trailing ACK/NAK) of a host command.
///
/// SEND_INSTEON_MESSAGE depends on the extended bit of its flags byte; pass
/// `None` when the flags byte has not arrived yet and `Some(0)` is returned.
pub fn echo_len(opcode: u8, msg_flags: Option<u8>) -> Option<usize> {
    Some(match opcode {
        cmd::GET_IM_INFO => 9,
        cmd::SEND_ALL_LINK_COMMAND => 6,
        cmd::SEND_INSTEON_MESSAGE => match msg_flags {
            Some(f) if f & flags::EXTENDED != 0 => 23,
            Some(_) => 9,
            None => 0,
        },
        cmd::SEND_X10 => 5,
        cmd::START_ALL_LINKING => 5,
        cmd::CANCEL_ALL_LINKING => 3,
        cmd::SET_HOST_CATEGORY => 6,
        cmd::RESET_IM => 3,
        cmd::SET_ACK_MESSAGE_BYTE => 4,
        cmd::GET_FIRST_ALL_LINK_RECORD => 3,
        cmd::GET_NEXT_ALL_LINK_RECORD => 3,
        cmd::SET_IM_CONFIG => 4,
        cmd::GET_ALL_LINK_RECORD_FOR_SENDER => 3,
        cmd::LED_ON => 3,
        cmd::LED_OFF => 3,
        cmd::MANAGE_ALL_LINK_RECORD => 12,
        cmd::SET_NAK_MESSAGE_BYTE => 4,
        cmd::SET_ACK_MESSAGE_TWO_BYTES => 5,
        cmd::RF_SLEEP => 5,
        cmd::GET_IM_CONFIG => 6,
        _ => return None,
    })
}

/// Extended message checksum over cmd1, cmd2 and D1..D13.
///
/// Two's complement of the low byte of the sum, so that the sum including
/// the checksum is 0 mod 256.
pub fn extended_checksum(cmd1: u8, cmd2: u8, data: &[u8]) -> u8 {
    let sum = data
        .iter()
        .take(EXTENDED_DATA_LEN - 1)
        .fold(cmd1.wrapping_add(cmd2), |acc, &b| acc.wrapping_add(b));
    0u8.wrapping_sub(sum)
}

/// Format a byte slice as spaced uppercase hex
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_zero_sum_exhaustive_cmds() {
        let payloads: [[u8; 13]; 4] = [
            [0; 13],
            [0xFF; 13],
            [0x00, 0x00, 0x0F, 0xFF, 0x01, 0, 0, 0, 0, 0, 0, 0, 0],
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13],
        ];
        for cmd1 in 0..=255u8 {
            for cmd2 in [0x00u8, 0x01, 0x7F, 0xFF] {
                for p in &payloads {
                    let c = extended_checksum(cmd1, cmd2, p);
                    let total = p
                        .iter()
                        .fold(cmd1 as u32 + cmd2 as u32 + c as u32, |a, &b| a + b as u32);
                    assert_eq!(total % 256, 0, "cmd1={cmd1:02X} cmd2={cmd2:02X}");
                }
            }
        }
    }

    #[test]
    fn test_checksum_ignores_fourteenth_byte() {
        let mut data = [0u8; 14];
        data[0] = 0x01;
        let a = extended_checksum(0x2F, 0x00, &data);
        data[13] = 0xAA;
        assert_eq!(a, extended_checksum(0x2F, 0x00, &data));
        // 0x2F + 0x01 = 0x30 -> 0xD0
        assert_eq!(a, 0xD0);
    }

    #[test]
    fn test_echo_len_send_depends_on_flags() {
        assert_eq!(
            echo_len(cmd::SEND_INSTEON_MESSAGE, Some(flags::STANDARD_DIRECT)),
            Some(9)
        );
        assert_eq!(
            echo_len(cmd::SEND_INSTEON_MESSAGE, Some(flags::EXTENDED_DIRECT)),
            Some(23)
        );
        assert_eq!(echo_len(cmd::SEND_INSTEON_MESSAGE, None), Some(0));
        assert_eq!(echo_len(0x42, None), None);
    }

    #[test]
    fn test_inbound_lengths() {
        assert_eq!(inbound_len(cmd::STANDARD_MESSAGE_RECEIVED), Some(11));
        assert_eq!(inbound_len(cmd::EXTENDED_MESSAGE_RECEIVED), Some(25));
        assert_eq!(inbound_len(cmd::ALL_LINK_RECORD_RESPONSE), Some(10));
        assert_eq!(inbound_len(cmd::GET_IM_INFO), None);
    }

    #[test]
    fn test_opcode_names() {
        assert_eq!(cmd::name(cmd::GET_IM_INFO), "GET_IM_INFO");
        assert_eq!(insteon::name(insteon::ID_REQUEST), "ID_REQUEST");
        assert!(cmd::is_host_command(cmd::MANAGE_ALL_LINK_RECORD));
        assert!(!cmd::is_host_command(cmd::ALL_LINK_CLEANUP_STATUS));
    }
}
