//! Per-device command queue
//!
//! Every remote device gets its own single-consumer queue. A task goes out
//! through the modem queue (which guarantees the local echo), then waits for
//! the device's ACK or NAK of direct message. The queue settles for a
//! cooldown after every resolution before taking the next task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use insteon_transport::protocol::insteon;
use insteon_transport::{
    Address, DeviceMessage, FlowControlTransport, MessageFlags, MessageSubtype, PacketFilter,
    SendMessage, Timing, TransportError,
};

use crate::error::ModemError;
use crate::links::LinkRecord;
use crate::resolver::DeviceIdentity;

/// Tasks a device queue buffers before `send` waits
const DEVICE_QUEUE_SIZE: usize = 16;

// ============================================================================
// Device state
// ============================================================================

/// What the driver knows about one device
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub address: Address,
    pub identity: Option<DeviceIdentity>,
    /// Last database read, replaced wholesale
    pub links: Arc<[LinkRecord]>,
}

impl DeviceState {
    fn new(address: Address) -> Self {
        Self {
            address,
            identity: None,
            links: Arc::from(Vec::new()),
        }
    }
}

/// Reply to a status request (0x19)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    /// Link database revision counter (cmd1 of the ACK)
    pub database_delta: u8,
    /// Current level, 0x00-0xFF (cmd2 of the ACK)
    pub level: u8,
}

// ============================================================================
// Queue
// ============================================================================

struct DeviceTask {
    message: SendMessage,
    retries_remaining: u32,
    reply_tx: oneshot::Sender<Result<DeviceMessage, ModemError>>,
}

/// Ordered, single-flight command queue for one device.
///
/// Must be created inside a tokio runtime.
pub struct DeviceCommandQueue {
    address: Address,
    flow: Arc<FlowControlTransport>,
    task_tx: mpsc::Sender<DeviceTask>,
    state: Arc<RwLock<DeviceState>>,
    pending: Arc<AtomicUsize>,
}

impl DeviceCommandQueue {
    pub fn new(flow: Arc<FlowControlTransport>, address: Address) -> Self {
        let (task_tx, task_rx) = mpsc::channel(DEVICE_QUEUE_SIZE);
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(device_worker(
            Arc::clone(&flow),
            address,
            task_rx,
            Arc::clone(&pending),
        ));
        Self {
            address,
            flow,
            task_tx,
            state: Arc::new(RwLock::new(DeviceState::new(address))),
            pending,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn flow(&self) -> &Arc<FlowControlTransport> {
        &self.flow
    }

    pub fn timing(&self) -> &Timing {
        self.flow.timing()
    }

    /// Tasks submitted but not yet resolved
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Snapshot of the device state
    pub fn state(&self) -> DeviceState {
        self.state.read().clone()
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.state.read().identity.clone()
    }

    pub fn links(&self) -> Arc<[LinkRecord]> {
        Arc::clone(&self.state.read().links)
    }

    pub(crate) fn set_identity(&self, identity: DeviceIdentity) {
        self.state.write().identity = Some(identity);
    }

    pub(crate) fn replace_links(&self, links: Vec<LinkRecord>) {
        self.state.write().links = Arc::from(links);
    }

    /// Send a direct message and wait for the device's ACK.
    ///
    /// `data` selects an extended message (up to 13 user bytes, checksum
    /// added). `flags` defaults to 0x0F standard / 0x1F extended.
    pub async fn send_insteon_command(
        &self,
        cmd1: u8,
        cmd2: u8,
        data: Option<&[u8]>,
        flags: Option<MessageFlags>,
    ) -> Result<DeviceMessage, ModemError> {
        let message = match data {
            Some(data) => SendMessage::extended(self.address, cmd1, cmd2, data, flags)
                .map_err(|e| ModemError::InvalidParameter(e.to_string()))?,
            None => SendMessage::standard(self.address, cmd1, cmd2, flags),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::SeqCst);
        let task = DeviceTask {
            message,
            retries_remaining: self.timing().device_retries,
            reply_tx,
        };
        if self.task_tx.send(task).await.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Disconnected.into());
        }

        reply_rx
            .await
            .map_err(|_| ModemError::from(TransportError::Disconnected))?
    }

    pub async fn send_standard(&self, cmd1: u8, cmd2: u8) -> Result<DeviceMessage, ModemError> {
        self.send_insteon_command(cmd1, cmd2, None, None).await
    }

    pub async fn send_extended(
        &self,
        cmd1: u8,
        cmd2: u8,
        data: &[u8],
    ) -> Result<DeviceMessage, ModemError> {
        self.send_insteon_command(cmd1, cmd2, Some(data), None).await
    }

    // === Primitives ===

    pub async fn ping(&self) -> Result<(), ModemError> {
        self.send_standard(insteon::PING, 0x00).await?;
        Ok(())
    }

    /// Insteon engine version: 0x00 i1, 0x01 i2, 0x02 i2cs
    pub async fn engine_version(&self) -> Result<u8, ModemError> {
        Ok(self.send_standard(insteon::ENGINE_VERSION, 0x00).await?.cmd2)
    }

    pub async fn status(&self) -> Result<StatusReport, ModemError> {
        let ack = self.send_standard(insteon::STATUS_REQUEST, 0x00).await?;
        Ok(StatusReport {
            database_delta: ack.cmd1,
            level: ack.cmd2,
        })
    }

    /// Ask the device to broadcast its category/subcategory/firmware.
    /// The broadcast itself is collected by the resolver.
    pub async fn id_request(&self) -> Result<(), ModemError> {
        self.send_standard(insteon::ID_REQUEST, 0x00).await?;
        Ok(())
    }

    pub async fn enter_linking(&self, group: u8) -> Result<(), ModemError> {
        self.send_extended(insteon::ENTER_LINKING, group, &[]).await?;
        Ok(())
    }

    pub async fn enter_unlinking(&self, group: u8) -> Result<(), ModemError> {
        self.send_extended(insteon::ENTER_UNLINKING, group, &[]).await?;
        Ok(())
    }

    pub async fn exit_linking(&self) -> Result<(), ModemError> {
        self.send_standard(insteon::EXIT_LINKING, 0x00).await?;
        Ok(())
    }

    /// Raw operating flags byte (cmd2 of the ACK)
    pub async fn operating_flags(&self) -> Result<u8, ModemError> {
        Ok(self
            .send_standard(insteon::GET_OPERATING_FLAGS, 0x00)
            .await?
            .cmd2)
    }
}

// ============================================================================
// Worker
// ============================================================================

async fn device_worker(
    flow: Arc<FlowControlTransport>,
    address: Address,
    mut rx: mpsc::Receiver<DeviceTask>,
    pending: Arc<AtomicUsize>,
) {
    debug!("Device queue for {} started", address);
    // A retried task goes back to the head of the queue
    let mut retry: Option<DeviceTask> = None;

    loop {
        let mut task = match retry.take() {
            Some(task) => task,
            None => match rx.recv().await {
                Some(task) => task,
                None => break,
            },
        };
        let extended = task.message.is_extended();

        match attempt(&flow, address, &task.message).await {
            Err(e) if e.is_retryable() && task.retries_remaining > 0 => {
                task.retries_remaining -= 1;
                warn!(
                    "{} to {} failed ({}), {} retr{} left",
                    insteon::name(task.message.cmd1()),
                    address,
                    e,
                    task.retries_remaining,
                    if task.retries_remaining == 1 { "y" } else { "ies" }
                );
                retry = Some(task);
            }
            result => {
                pending.fetch_sub(1, Ordering::SeqCst);
                let _ = task.reply_tx.send(result);
            }
        }

        tokio::time::sleep(flow.timing().device_cooldown(extended)).await;
    }

    debug!("Device queue for {} stopped", address);
}

async fn attempt(
    flow: &FlowControlTransport,
    address: Address,
    message: &SendMessage,
) -> Result<DeviceMessage, ModemError> {
    // Registered before the write: the ACK can beat the echo's resolution
    let mut reply_rx = flow.router().once(
        PacketFilter::device_message()
            .subtype(MessageSubtype::AckOfDirect)
            .subtype(MessageSubtype::NakOfDirect)
            .from_address(address),
    );

    flow.send(message).await?;

    let remote = flow.timing().remote_timeout();
    let packet = match tokio::time::timeout(remote, reply_rx.recv()).await {
        Ok(Some(packet)) => packet,
        Ok(None) => return Err(TransportError::Disconnected.into()),
        Err(_) => return Err(ModemError::RemoteTimeout { address }),
    };
    let reply = packet
        .device_message()
        .cloned()
        .ok_or_else(|| ModemError::ProtocolMismatch(format!("{:?}", packet.packet_type())))?;

    if reply.subtype() == MessageSubtype::NakOfDirect {
        debug!("{} NAKed {:02X} with 0x{:02X}", address, message.cmd1(), reply.cmd2);
        return Err(ModemError::RemoteNotAcked {
            address,
            cmd1: message.cmd1(),
            cmd2: reply.cmd2,
        });
    }
    Ok(reply)
}
