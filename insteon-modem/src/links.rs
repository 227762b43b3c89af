//! Link records and the gateway link table reader

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use insteon_transport::protocol::record_flags;
use insteon_transport::{
    Address, FlowControlTransport, GetFirstLinkRecord, GetNextLinkRecord, InboundPacket,
    LinkRecordResponse, LinkRole, ModemCommand, PacketFilter, PacketType, Request,
    TransportError,
};

use crate::error::ModemError;

/// One entry of a gateway or device link table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    pub group: u8,
    /// Peer address
    pub address: Address,
    pub role: LinkRole,
    pub in_use: bool,
    /// End-of-table sentinel (flags bit 1 clear)
    pub high_water: bool,
    /// On-level, ramp rate, extra
    pub data: [u8; 3],
    /// Memory address inside a device database; `None` for gateway records
    pub location: Option<u16>,
}

impl LinkRecord {
    /// Decode a record from its flags byte and fields
    pub fn from_flags(flags: u8, group: u8, address: Address, data: [u8; 3]) -> Self {
        Self {
            group,
            address,
            role: if flags & record_flags::CONTROLLER != 0 {
                LinkRole::Controller
            } else {
                LinkRole::Responder
            },
            in_use: flags & record_flags::IN_USE != 0,
            high_water: flags & record_flags::USED_BEFORE == 0,
            data,
            location: None,
        }
    }

    pub fn with_location(mut self, location: u16) -> Self {
        self.location = Some(location);
        self
    }

    /// Re-encode the flags byte
    pub fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.in_use {
            flags |= record_flags::IN_USE;
        }
        if self.role == LinkRole::Controller {
            flags |= record_flags::CONTROLLER;
        }
        if !self.high_water {
            flags |= record_flags::USED_BEFORE;
        }
        flags
    }

    pub fn is_controller(&self) -> bool {
        self.role == LinkRole::Controller
    }

    pub fn on_level(&self) -> u8 {
        self.data[0]
    }

    pub fn ramp_rate(&self) -> u8 {
        self.data[1]
    }
}

impl From<&LinkRecordResponse> for LinkRecord {
    fn from(r: &LinkRecordResponse) -> Self {
        Self::from_flags(r.flags, r.group, r.address, r.data)
    }
}

// ============================================================================
// Derived views
// ============================================================================

/// Controller records keyed by group
pub fn groups(links: &[LinkRecord]) -> BTreeMap<u8, Vec<LinkRecord>> {
    let mut out: BTreeMap<u8, Vec<LinkRecord>> = BTreeMap::new();
    for link in links.iter().filter(|l| l.is_controller()) {
        out.entry(link.group).or_default().push(*link);
    }
    out
}

/// Records where the table owner is a responder
pub fn responders(links: &[LinkRecord]) -> Vec<LinkRecord> {
    links.iter().filter(|l| !l.is_controller()).copied().collect()
}

/// Unique peer addresses in first-seen order
pub fn linked_devices(links: &[LinkRecord]) -> Vec<Address> {
    let mut out: Vec<Address> = Vec::new();
    for link in links {
        if !out.contains(&link.address) {
            out.push(link.address);
        }
    }
    out
}

// ============================================================================
// Gateway table reader
// ============================================================================

fn record_request<C: ModemCommand>(command: &C) -> Request {
    Request::new(command.build()).with_reply(PacketFilter::new(PacketType::AllLinkRecord))
}

/// Read the whole gateway link table: get-first, then get-next until the
/// modem answers NAK. N records cost N+1 requests.
///
/// A busy modem gets the same request again, up to `busy_retries` times.
/// Any other failure (including a record that never follows its ACK) is an
/// error, so callers never see a truncated table.
pub async fn read_gateway_links(
    flow: &FlowControlTransport,
) -> Result<Vec<LinkRecord>, ModemError> {
    let mut records = Vec::new();
    let mut first = true;
    let mut busy = 0;

    loop {
        let request = if first {
            record_request(&GetFirstLinkRecord)
        } else {
            record_request(&GetNextLinkRecord)
        };
        let exchange = match flow.submit(request).await {
            Ok(exchange) => exchange,
            Err(TransportError::NotAcked { .. }) => break,
            Err(TransportError::Busy { opcode }) if busy < flow.timing().busy_retries => {
                busy += 1;
                warn!(
                    "Modem busy on 0x{:02X} after {} record(s), retry {}",
                    opcode,
                    records.len(),
                    busy
                );
                tokio::time::sleep(flow.timing().gateway_cooldown()).await;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        busy = 0;

        match exchange.reply {
            Some(InboundPacket::AllLinkRecord(r)) => {
                debug!(
                    "Link record: {} group {} {}",
                    if r.is_controller() { "controller" } else { "responder" },
                    r.group,
                    r.address
                );
                records.push(LinkRecord::from(&r));
            }
            other => {
                return Err(ModemError::ProtocolMismatch(format!(
                    "expected link record, got {:?}",
                    other.map(|p| p.packet_type())
                )))
            }
        }
        first = false;
    }

    info!("Read {} gateway link record(s)", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(group: u8, last: u8, role: LinkRole) -> LinkRecord {
        LinkRecord {
            group,
            address: Address::new(0x11, 0x22, last),
            role,
            in_use: true,
            high_water: false,
            data: [0xFF, 0x1C, 0x01],
            location: None,
        }
    }

    #[test]
    fn test_flags_decode() {
        let r = LinkRecord::from_flags(0xC2, 1, Address::default(), [0; 3]);
        assert!(r.in_use);
        assert!(r.is_controller());
        assert!(!r.high_water);
        assert_eq!(r.flags(), 0xC2);

        let hw = LinkRecord::from_flags(0x00, 0, Address::default(), [0; 3]);
        assert!(hw.high_water);
        assert!(!hw.in_use);
        assert_eq!(hw.role, LinkRole::Responder);
    }

    #[test]
    fn test_groups_only_controllers() {
        let links = [
            record(1, 1, LinkRole::Controller),
            record(1, 2, LinkRole::Controller),
            record(2, 3, LinkRole::Responder),
            record(3, 3, LinkRole::Controller),
        ];
        let g = groups(&links);
        assert_eq!(g.len(), 2);
        assert_eq!(g[&1].len(), 2);
        assert_eq!(g[&3][0].address, Address::new(0x11, 0x22, 3));
        assert_eq!(responders(&links).len(), 1);
    }

    #[test]
    fn test_linked_devices_first_seen_order() {
        let links = [
            record(1, 9, LinkRole::Controller),
            record(1, 2, LinkRole::Controller),
            record(0, 9, LinkRole::Responder),
        ];
        assert_eq!(
            linked_devices(&links),
            vec![Address::new(0x11, 0x22, 9), Address::new(0x11, 0x22, 2)]
        );
    }
}
