//! Scripted in-process transport for tests and dry runs
//!
//! Every written frame is recorded with a timestamp. A responder closure maps
//! each write to the packets the "modem" should emit and the delay before each.
//! Packets can also be injected directly to simulate unsolicited traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::packet::{DeviceMessage, Echo, InboundPacket, TimestampedPacket};
use crate::types::{Address, MessageFlags, MessageSubtype, PortInfo};
use crate::Transport;

const PACKET_CHANNEL_CAPACITY: usize = 256;

/// One packet the mock emits after a write
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub delay: Duration,
    pub packet: InboundPacket,
}

impl ScriptedReply {
    pub fn now(packet: InboundPacket) -> Self {
        Self {
            delay: Duration::ZERO,
            packet,
        }
    }

    pub fn after(delay_ms: u64, packet: InboundPacket) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            packet,
        }
    }
}

/// A frame written to the mock
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub at: Instant,
    pub frame: Vec<u8>,
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<ScriptedReply> + Send>;

pub struct MockTransport {
    info: PortInfo,
    packet_tx: broadcast::Sender<TimestampedPacket>,
    writes: Arc<Mutex<Vec<WriteRecord>>>,
    responder: Mutex<Option<Responder>>,
    fail_writes: AtomicBool,
    connected: AtomicBool,
    start: Instant,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Mock that accepts writes and never answers
    pub fn new() -> Self {
        let (packet_tx, _) = broadcast::channel(PACKET_CHANNEL_CAPACITY);
        Self {
            info: PortInfo::mock(),
            packet_tx,
            writes: Arc::new(Mutex::new(Vec::new())),
            responder: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            start: Instant::now(),
        }
    }

    /// Mock driven by a responder closure
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<ScriptedReply> + Send + 'static,
    {
        let mock = Self::new();
        *mock.responder.lock() = Some(Box::new(responder));
        mock
    }

    /// Make every following write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Emit a packet immediately
    pub fn inject(&self, packet: InboundPacket) {
        let ts = self.start.elapsed().as_secs_f64();
        let _ = self.packet_tx.send(TimestampedPacket::new(ts, packet));
    }

    /// Snapshot of every write so far
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().clone()
    }

    /// Just the written frames
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.writes.lock().iter().map(|w| w.frame.clone()).collect()
    }

    fn schedule(&self, replies: Vec<ScriptedReply>) {
        for reply in replies {
            let tx = self.packet_tx.clone();
            let start = self.start;
            tokio::spawn(async move {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                let ts = start.elapsed().as_secs_f64();
                let _ = tx.send(TimestampedPacket::new(ts, reply.packet));
            });
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Serial("mock write refused".into()));
        }
        self.writes.lock().push(WriteRecord {
            at: Instant::now(),
            frame: frame.to_vec(),
        });
        let replies = match self.responder.lock().as_mut() {
            Some(responder) => responder(frame),
            None => Vec::new(),
        };
        self.schedule(replies);
        Ok(())
    }

    fn subscribe_packets(&self) -> broadcast::Receiver<TimestampedPacket> {
        self.packet_tx.subscribe()
    }

    fn port_info(&self) -> &PortInfo {
        &self.info
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Packet helpers for scripting
// ============================================================================

/// Echo of a written frame with the given status; data is everything after the opcode
pub fn echo_of(frame: &[u8], ack: bool) -> InboundPacket {
    InboundPacket::Echo(Echo {
        opcode: frame.get(1).copied().unwrap_or(0),
        data: frame.get(2..).map(<[u8]>::to_vec).unwrap_or_default(),
        ack,
    })
}

/// Echo with explicit data (for commands whose echo carries a response)
pub fn echo_with(opcode: u8, data: &[u8], ack: bool) -> InboundPacket {
    InboundPacket::Echo(Echo {
        opcode,
        data: data.to_vec(),
        ack,
    })
}

/// Standard message from `from` with the given subtype
pub fn standard_from(
    from: Address,
    to: Address,
    subtype: MessageSubtype,
    cmd1: u8,
    cmd2: u8,
) -> InboundPacket {
    InboundPacket::StandardMessage(DeviceMessage {
        from,
        to,
        flags: MessageFlags::new(subtype, false, 3, 3),
        cmd1,
        cmd2,
        user_data: None,
    })
}

/// Extended message from `from` with the given subtype
pub fn extended_from(
    from: Address,
    to: Address,
    subtype: MessageSubtype,
    cmd1: u8,
    cmd2: u8,
    user_data: [u8; 14],
) -> InboundPacket {
    InboundPacket::ExtendedMessage(DeviceMessage {
        from,
        to,
        flags: MessageFlags::new(subtype, true, 3, 3),
        cmd1,
        cmd2,
        user_data: Some(user_data),
    })
}
