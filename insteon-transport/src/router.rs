//! Packet router: explicit matchers over a dispatch table
//!
//! Listeners register a [`PacketFilter`] keyed by packet type with an optional
//! subtype, source address and predicate. Each inbound packet is offered to
//! every registered listener in registration order. One-shot listeners are
//! removed on first delivery; both kinds deregister when their guard drops,
//! so a late packet can never resolve a request that already gave up.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::packet::{InboundPacket, PacketType};
use crate::types::{Address, MessageSubtype};

type Predicate = Arc<dyn Fn(&InboundPacket) -> bool + Send + Sync>;

/// Matcher for inbound packets
#[derive(Clone)]
pub struct PacketFilter {
    types: Vec<PacketType>,
    subtypes: Vec<MessageSubtype>,
    address: Option<Address>,
    predicate: Option<Predicate>,
}

impl fmt::Debug for PacketFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketFilter")
            .field("types", &self.types)
            .field("subtypes", &self.subtypes)
            .field("address", &self.address)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl PacketFilter {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            types: vec![packet_type],
            subtypes: Vec::new(),
            address: None,
            predicate: None,
        }
    }

    /// Echo of a host opcode
    pub fn echo(opcode: u8) -> Self {
        Self::new(PacketType::Echo(opcode))
    }

    /// Standard or extended message
    pub fn device_message() -> Self {
        Self::new(PacketType::StandardMessage).or_type(PacketType::ExtendedMessage)
    }

    /// Also accept another packet type
    pub fn or_type(mut self, packet_type: PacketType) -> Self {
        self.types.push(packet_type);
        self
    }

    /// Require one of the given subtypes (device messages only)
    pub fn subtype(mut self, subtype: MessageSubtype) -> Self {
        self.subtypes.push(subtype);
        self
    }

    /// Require the packet to originate from `address`
    pub fn from_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Extra check run after the keyed fields matched
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&InboundPacket) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn matches(&self, packet: &InboundPacket) -> bool {
        if !self.types.contains(&packet.packet_type()) {
            return false;
        }
        if !self.subtypes.is_empty() {
            match packet.subtype() {
                Some(s) if self.subtypes.contains(&s) => {}
                _ => return false,
            }
        }
        if let Some(addr) = self.address {
            if packet.source() != Some(addr) {
                return false;
            }
        }
        self.predicate.as_ref().map_or(true, |p| p(packet))
    }
}

enum Sink {
    Once(Option<oneshot::Sender<InboundPacket>>),
    Stream(mpsc::UnboundedSender<InboundPacket>),
}

struct Entry {
    id: u64,
    filter: PacketFilter,
    sink: Sink,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Shared dispatch table. Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct PacketRouter {
    table: Arc<Mutex<Table>>,
}

impl PacketRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, filter: PacketFilter, sink: Sink) -> u64 {
        let mut table = self.table.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push(Entry { id, filter, sink });
        id
    }

    fn deregister(&self, id: u64) {
        self.table.lock().entries.retain(|e| e.id != id);
    }

    /// Register a one-shot listener. Dropping the guard deregisters it.
    pub fn once(&self, filter: PacketFilter) -> OnceListener {
        let (tx, rx) = oneshot::channel();
        let id = self.register(filter, Sink::Once(Some(tx)));
        OnceListener {
            id,
            router: self.clone(),
            rx,
        }
    }

    /// Register a persistent listener. Dropping the guard deregisters it.
    pub fn subscribe(&self, filter: PacketFilter) -> StreamListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(filter, Sink::Stream(tx));
        StreamListener {
            id,
            router: self.clone(),
            rx,
        }
    }

    /// Offer a packet to every matching listener; returns the delivery count
    pub fn dispatch(&self, packet: &InboundPacket) -> usize {
        let mut table = self.table.lock();
        let mut delivered = 0;
        table.entries.retain_mut(|entry| {
            if !entry.filter.matches(packet) {
                return true;
            }
            match &mut entry.sink {
                Sink::Once(tx) => {
                    if let Some(tx) = tx.take() {
                        if tx.send(packet.clone()).is_ok() {
                            delivered += 1;
                        }
                    }
                    false
                }
                Sink::Stream(tx) => {
                    if tx.send(packet.clone()).is_ok() {
                        delivered += 1;
                        true
                    } else {
                        false
                    }
                }
            }
        });
        delivered
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.table.lock().entries.len()
    }
}

/// Guard for a one-shot listener
pub struct OnceListener {
    id: u64,
    router: PacketRouter,
    rx: oneshot::Receiver<InboundPacket>,
}

impl OnceListener {
    /// Wait for the matching packet; `None` if the router went away
    pub async fn recv(&mut self) -> Option<InboundPacket> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for OnceListener {
    fn drop(&mut self) {
        self.router.deregister(self.id);
    }
}

/// Guard for a persistent listener
pub struct StreamListener {
    id: u64,
    router: PacketRouter,
    rx: mpsc::UnboundedReceiver<InboundPacket>,
}

impl StreamListener {
    pub async fn recv(&mut self) -> Option<InboundPacket> {
        self.rx.recv().await
    }

    /// Next already-delivered packet, if any
    pub fn try_recv(&mut self) -> Option<InboundPacket> {
        self.rx.try_recv().ok()
    }
}

impl Drop for StreamListener {
    fn drop(&mut self) {
        self.router.deregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{DeviceMessage, Echo};
    use crate::types::MessageFlags;

    fn ack_from(addr: Address) -> InboundPacket {
        InboundPacket::StandardMessage(DeviceMessage {
            from: addr,
            to: Address::new(1, 2, 3),
            flags: MessageFlags(0x2F),
            cmd1: 0x11,
            cmd2: 0xFF,
            user_data: None,
        })
    }

    #[test]
    fn test_filter_keys() {
        let a = Address::new(0xAA, 0xBB, 0xCC);
        let f = PacketFilter::device_message()
            .subtype(MessageSubtype::AckOfDirect)
            .subtype(MessageSubtype::NakOfDirect)
            .from_address(a);
        assert!(f.matches(&ack_from(a)));
        assert!(!f.matches(&ack_from(Address::new(1, 1, 1))));
        assert!(!PacketFilter::device_message()
            .subtype(MessageSubtype::Broadcast)
            .matches(&ack_from(a)));
        assert!(!PacketFilter::echo(0x60).matches(&ack_from(a)));
    }

    #[test]
    fn test_predicate() {
        let f = PacketFilter::device_message().matching(|p| {
            p.device_message().map(|m| m.cmd1 == 0x19).unwrap_or(false)
        });
        assert!(!f.matches(&ack_from(Address::default())));
    }

    #[tokio::test]
    async fn test_once_delivers_once_and_deregisters() {
        let router = PacketRouter::new();
        let mut l = router.once(PacketFilter::echo(0x60));
        assert_eq!(router.listener_count(), 1);

        let echo = InboundPacket::Echo(Echo {
            opcode: 0x60,
            data: vec![],
            ack: true,
        });
        assert_eq!(router.dispatch(&echo), 1);
        assert_eq!(router.listener_count(), 0);
        assert_eq!(router.dispatch(&echo), 0);
        assert_eq!(l.recv().await, Some(echo));
    }

    #[tokio::test]
    async fn test_dropped_guard_stops_delivery() {
        let router = PacketRouter::new();
        let l = router.once(PacketFilter::echo(0x60));
        let mut s = router.subscribe(PacketFilter::echo(0x60));
        drop(l);
        assert_eq!(router.listener_count(), 1);

        let echo = InboundPacket::Echo(Echo {
            opcode: 0x60,
            data: vec![],
            ack: false,
        });
        assert_eq!(router.dispatch(&echo), 1);
        assert_eq!(router.dispatch(&echo), 1);
        assert_eq!(s.recv().await, Some(echo.clone()));
        assert_eq!(s.recv().await, Some(echo));
        drop(s);
        assert_eq!(router.listener_count(), 0);
    }
}
