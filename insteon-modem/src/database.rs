//! Device link database (ALDB) reader
//!
//! A read request is an extended 0x2F with D2 = 0x00. The device answers with
//! one extended 0x2F per record (D2 = 0x01) and marks the end of its table
//! with a high-water record.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use tracing::{debug, info};

use insteon_transport::protocol::insteon;
use insteon_transport::{Address, InboundPacket, MessageSubtype, PacketFilter, PacketType};

use crate::device::DeviceCommandQueue;
use crate::error::ModemError;
use crate::links::LinkRecord;

/// Top of the link database on most devices; used when 0 is requested
pub const DEFAULT_START: u16 = 0x0FFF;

/// D1..D13 of a read request
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct AldbReadRequest {
    unused: u8,
    kind: u8,
    start: [u8; 2],
    count: u8,
    reserved: [u8; 8],
}

impl AldbReadRequest {
    /// `start` 0 means the top of the table, `count` 0 means every record
    pub fn new(start: u16, count: u8) -> Self {
        let start = if start == 0 { DEFAULT_START } else { start };
        Self {
            unused: 0,
            kind: insteon::ALDB_READ,
            start: start.to_be_bytes(),
            count,
            reserved: [0; 8],
        }
    }

    pub fn start(&self) -> u16 {
        u16::from_be_bytes(self.start)
    }
}

/// D1..D14 of a record response
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct AldbRecordData {
    unused: u8,
    kind: u8,
    location: [u8; 2],
    unused2: u8,
    flags: u8,
    group: u8,
    peer: [u8; 3],
    data: [u8; 3],
    checksum: u8,
}

impl AldbRecordData {
    pub fn is_record(&self) -> bool {
        self.kind == insteon::ALDB_RECORD
    }

    pub fn to_link_record(&self) -> LinkRecord {
        LinkRecord::from_flags(self.flags, self.group, Address(self.peer), self.data)
            .with_location(u16::from_be_bytes(self.location))
    }
}

/// Decode a record response, `None` for anything else
pub fn decode_record(packet: &InboundPacket) -> Option<LinkRecord> {
    let msg = packet.device_message()?;
    if msg.cmd1 != insteon::READ_WRITE_ALDB {
        return None;
    }
    let raw = AldbRecordData::read_from_bytes(msg.user_data.as_ref()?.as_slice()).ok()?;
    raw.is_record().then(|| raw.to_link_record())
}

/// Read a device's link database.
///
/// Stops after the high-water record (kept as the last entry) or after
/// `count` records. A gap longer than the remote deadline fails with
/// `RemoteTimeout`. On success the device's cached table is replaced.
pub async fn read_device_database(
    queue: &DeviceCommandQueue,
    start: u16,
    count: u8,
) -> Result<Vec<LinkRecord>, ModemError> {
    let address = queue.address();
    let mut records_rx = queue.flow().router().subscribe(
        PacketFilter::new(PacketType::ExtendedMessage)
            .subtype(MessageSubtype::Direct)
            .from_address(address)
            .matching(|p| decode_record(p).is_some()),
    );

    let request = AldbReadRequest::new(start, count);
    debug!("Reading ALDB of {} from 0x{:04X}", address, request.start());
    queue
        .send_extended(insteon::READ_WRITE_ALDB, 0x00, request.as_bytes())
        .await?;

    let gap = queue.timing().remote_timeout();
    let mut records = Vec::new();
    loop {
        let packet = match tokio::time::timeout(gap, records_rx.recv()).await {
            Ok(Some(packet)) => packet,
            Ok(None) => return Err(insteon_transport::TransportError::Disconnected.into()),
            Err(_) => return Err(ModemError::RemoteTimeout { address }),
        };
        let Some(record) = decode_record(&packet) else {
            continue;
        };
        let done = record.high_water || (count != 0 && records.len() + 1 >= count as usize);
        records.push(record);
        if done {
            break;
        }
    }

    info!("Read {} ALDB record(s) from {}", records.len(), address);
    queue.replace_links(records.clone());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use insteon_transport::mock::extended_from;

    #[test]
    fn test_read_request_layout() {
        let req = AldbReadRequest::new(0, 0);
        assert_eq!(req.as_bytes().len(), 13);
        assert_eq!(&req.as_bytes()[..5], &[0x00, 0x00, 0x0F, 0xFF, 0x00]);
        assert_eq!(AldbReadRequest::new(0x0FF7, 1).as_bytes()[4], 1);
    }

    #[test]
    fn test_decode_record() {
        let mut d = [0u8; 14];
        d[1] = 0x01;
        d[2..4].copy_from_slice(&[0x0F, 0xF7]);
        d[5] = 0xA2;
        d[6] = 0x01;
        d[7..10].copy_from_slice(&[0x44, 0x85, 0x11]);
        d[10..13].copy_from_slice(&[0xFF, 0x1F, 0x01]);
        let p = extended_from(
            Address::new(1, 2, 3),
            Address::new(4, 5, 6),
            MessageSubtype::Direct,
            0x2F,
            0x00,
            d,
        );
        let r = decode_record(&p).unwrap();
        assert_eq!(r.location, Some(0x0FF7));
        assert_eq!(r.address, Address::new(0x44, 0x85, 0x11));
        assert_eq!(r.group, 1);
        assert!(r.in_use);
        assert!(!r.is_controller());
        assert!(!r.high_water);
        assert_eq!(r.data, [0xFF, 0x1F, 0x01]);
    }

    #[test]
    fn test_read_request_echo_is_not_a_record() {
        let p = extended_from(
            Address::new(1, 2, 3),
            Address::new(4, 5, 6),
            MessageSubtype::Direct,
            0x2F,
            0x00,
            [0; 14],
        );
        assert_eq!(decode_record(&p), None);
    }
}
