//! High-level interface for Insteon PowerLinc modems
//!
//! This crate provides a convenient API on top of the modem correlation queue
//! from `insteon-transport`: modem identity and configuration, the gateway
//! link table, per-device command queues, device link databases, linking
//! sessions and device identification.

pub mod categories;
pub mod database;
pub mod device;
pub mod error;
pub mod linking;
pub mod links;
pub mod resolver;

pub use categories::FlagLayout;
pub use device::{DeviceCommandQueue, DeviceState, StatusReport};
pub use error::ModemError;
pub use linking::{LinkDirection, LinkingSession, LinkingState};
pub use links::LinkRecord;
pub use resolver::{DeviceCatalog, DeviceDescriptor, DeviceIdentity, DeviceKind};

// Re-exported so consumers need only this crate for common types
pub use insteon_transport::{
    Address, DeviceMessage, LinkRole, LinkingCompleted, MessageFlags, ModemConfig, ModemInfo,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use insteon_transport::{
    CancelLinking, CommandFrame, FlowControlTransport, GetImConfig, GetImInfo, InboundPacket,
    ManageLinkRecord, ModemCommand, PacketFilter, PacketType, Request, ResetIm, RfSleep,
    SendAllLink, SetHostCategory, SetImConfig, SetLed, StartLinking, Timing, Transport,
    TransportError,
};

/// Outcome of an all-link group command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Every responder acknowledged its cleanup
    pub ack: bool,
    /// Responders the modem reported as failed
    pub failures: Vec<Address>,
}

/// High-level modem interface using any transport
///
/// Holds the last synced modem state and one command queue per device.
pub struct ModemInterface {
    transport: Arc<FlowControlTransport>,
    catalog: Arc<DeviceCatalog>,
    info: RwLock<Option<ModemInfo>>,
    config: RwLock<Option<ModemConfig>>,
    links: RwLock<Arc<[LinkRecord]>>,
    devices: Mutex<HashMap<Address, Arc<DeviceCommandQueue>>>,
}

impl ModemInterface {
    /// Create a new modem interface
    ///
    /// # Arguments
    /// * `transport` - Flow-controlled transport layer
    /// * `catalog` - Product table used to identify devices
    pub fn new(transport: Arc<FlowControlTransport>, catalog: Arc<DeviceCatalog>) -> Self {
        Self {
            transport,
            catalog,
            info: RwLock::new(None),
            config: RwLock::new(None),
            links: RwLock::new(Arc::from(Vec::new())),
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Wrap a raw transport in a correlation queue with the given timing
    pub fn open(raw: Arc<dyn Transport>, timing: Timing, catalog: Arc<DeviceCatalog>) -> Self {
        Self::new(Arc::new(FlowControlTransport::new(raw, timing)), catalog)
    }

    /// Get the underlying transport
    pub fn transport(&self) -> &Arc<FlowControlTransport> {
        &self.transport
    }

    pub fn catalog(&self) -> &Arc<DeviceCatalog> {
        &self.catalog
    }

    pub fn timing(&self) -> &Timing {
        self.transport.timing()
    }

    // === Modem state ===

    /// Last synced modem identity
    pub fn info(&self) -> Option<ModemInfo> {
        *self.info.read()
    }

    /// Last synced modem configuration
    pub fn config(&self) -> Option<ModemConfig> {
        *self.config.read()
    }

    /// Last synced gateway link table
    pub fn links(&self) -> Arc<[LinkRecord]> {
        Arc::clone(&self.links.read())
    }

    /// Controller records keyed by group
    pub fn groups(&self) -> BTreeMap<u8, Vec<LinkRecord>> {
        links::groups(&self.links())
    }

    pub fn responders(&self) -> Vec<LinkRecord> {
        links::responders(&self.links())
    }

    /// Unique peers in the gateway table, first-seen order
    pub fn linked_devices(&self) -> Vec<Address> {
        links::linked_devices(&self.links())
    }

    /// Refresh identity, configuration and link table
    pub async fn sync(&self) -> Result<(), ModemError> {
        self.sync_info().await?;
        self.sync_config().await?;
        self.sync_links().await?;
        Ok(())
    }

    pub async fn sync_info(&self) -> Result<ModemInfo, ModemError> {
        let info: ModemInfo = self.transport.query(&GetImInfo).await?;
        info!(
            "Modem {} cat {:02X}/{:02X} fw {:02X}",
            info.address, info.category, info.subcategory, info.firmware
        );
        *self.info.write() = Some(info);
        Ok(info)
    }

    pub async fn sync_config(&self) -> Result<ModemConfig, ModemError> {
        let config: ModemConfig = self.transport.query(&GetImConfig).await?;
        debug!("Modem config {:?}", config);
        *self.config.write() = Some(config);
        Ok(config)
    }

    /// Re-read the gateway link table and replace the cached copy
    pub async fn sync_links(&self) -> Result<Arc<[LinkRecord]>, ModemError> {
        let records: Arc<[LinkRecord]> = links::read_gateway_links(&self.transport).await?.into();
        *self.links.write() = Arc::clone(&records);
        Ok(records)
    }

    // === Modem control ===

    pub async fn set_config(&self, config: ModemConfig) -> Result<(), ModemError> {
        self.transport.send(&SetImConfig(config)).await?;
        *self.config.write() = Some(config);
        Ok(())
    }

    /// Set the category the modem announces when linking
    pub async fn set_category(
        &self,
        category: u8,
        subcategory: u8,
        firmware: u8,
    ) -> Result<(), ModemError> {
        self.transport
            .send(&SetHostCategory {
                category,
                subcategory,
                firmware,
            })
            .await?;
        Ok(())
    }

    pub async fn set_led(&self, on: bool) -> Result<(), ModemError> {
        self.transport.send_frame(SetLed(on).build()).await?;
        Ok(())
    }

    /// Put the modem's RF side to sleep until `wake`
    pub async fn sleep(&self) -> Result<(), ModemError> {
        self.transport.send(&RfSleep::default()).await?;
        Ok(())
    }

    /// Send the lone wake byte; the queue settles before the next command
    pub async fn wake(&self) -> Result<(), ModemError> {
        self.transport
            .submit(Request::fire_and_forget(CommandFrame::wake()))
            .await?;
        Ok(())
    }

    /// Factory reset: erases the modem's link table and configuration
    pub async fn reset(&self) -> Result<(), ModemError> {
        // The modem only echoes once its EEPROM is cleared
        let request = Request::new(ResetIm.build()).with_local_timeout(self.timing().remote_timeout());
        self.transport.submit(request).await?;
        *self.links.write() = Arc::from(Vec::new());
        *self.config.write() = None;
        Ok(())
    }

    // === Gateway links ===

    /// Write a link record straight into the modem, then re-sync
    pub async fn add_link_record(
        &self,
        address: Address,
        group: u8,
        role: LinkRole,
        data: [u8; 3],
    ) -> Result<(), ModemError> {
        self.transport
            .send(&ManageLinkRecord::add(role, group, address, data))
            .await?;
        self.sync_links().await?;
        Ok(())
    }

    /// Delete the first matching record. Returns false when the modem had
    /// no such record.
    pub async fn delete_link(
        &self,
        address: Address,
        group: u8,
        role: LinkRole,
    ) -> Result<bool, ModemError> {
        match self
            .transport
            .send(&ManageLinkRecord::delete(role, group, address))
            .await
        {
            Ok(_) => {
                self.sync_links().await?;
                Ok(true)
            }
            Err(TransportError::NotAcked { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Put only the modem into linking mode (the device side is manual)
    pub async fn start_linking(&self, role: LinkRole, group: u8) -> Result<(), ModemError> {
        self.transport.send(&StartLinking::as_role(role, group)).await?;
        Ok(())
    }

    /// Put only the modem into unlinking mode
    pub async fn start_unlinking(&self, group: u8) -> Result<(), ModemError> {
        self.transport.send(&StartLinking::delete(group)).await?;
        Ok(())
    }

    pub async fn cancel_linking(&self) -> Result<(), ModemError> {
        self.transport.send(&CancelLinking).await?;
        Ok(())
    }

    /// Wait for the next ALL_LINKING_COMPLETED, e.g. after a SET press
    pub async fn wait_linking_completed(&self) -> Result<LinkingCompleted, ModemError> {
        let mut rx = self
            .transport
            .router()
            .once(PacketFilter::new(PacketType::AllLinkingCompleted));
        let timeout = self.timing().link_complete_timeout();
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(InboundPacket::AllLinkingCompleted(done))) => Ok(done),
            Ok(Some(other)) => Err(ModemError::ProtocolMismatch(format!(
                "{:?}",
                other.packet_type()
            ))),
            Ok(None) => Err(TransportError::Disconnected.into()),
            Err(_) => Err(ModemError::LinkingTimeout(timeout)),
        }
    }

    /// Send a group command to every responder of `group` and wait for the
    /// modem's cleanup report
    pub async fn send_all_link_command(
        &self,
        group: u8,
        cmd1: u8,
        cmd2: u8,
    ) -> Result<CleanupReport, ModemError> {
        let mut failures_rx = self.transport.router().subscribe(
            PacketFilter::new(PacketType::CleanupFailure).matching(move |p| {
                matches!(p, InboundPacket::CleanupFailure { group: g, .. } if *g == group)
            }),
        );
        let request = Request::new(SendAllLink { group, cmd1, cmd2 }.build())
            .with_reply(PacketFilter::new(PacketType::CleanupStatus));
        let exchange = self.transport.submit(request).await?;

        let ack = matches!(exchange.reply, Some(InboundPacket::CleanupStatus { ack: true }));
        let mut failures = Vec::new();
        while let Some(packet) = failures_rx.try_recv() {
            if let InboundPacket::CleanupFailure { address, .. } = packet {
                failures.push(address);
            }
        }
        Ok(CleanupReport { ack, failures })
    }

    // === Devices ===

    /// Command queue for `address`, created on first use
    pub fn device(&self, address: Address) -> Arc<DeviceCommandQueue> {
        let mut devices = self.devices.lock();
        Arc::clone(devices.entry(address).or_insert_with(|| {
            debug!("New device queue for {}", address);
            Arc::new(DeviceCommandQueue::new(Arc::clone(&self.transport), address))
        }))
    }

    /// Addresses with a device queue
    pub fn known_devices(&self) -> Vec<Address> {
        let mut all: Vec<_> = self.devices.lock().keys().copied().collect();
        all.sort();
        all
    }

    pub async fn send_standard_command(
        &self,
        address: Address,
        cmd1: u8,
        cmd2: u8,
        flags: Option<MessageFlags>,
    ) -> Result<DeviceMessage, ModemError> {
        self.device(address)
            .send_insteon_command(cmd1, cmd2, None, flags)
            .await
    }

    pub async fn send_extended_command(
        &self,
        address: Address,
        cmd1: u8,
        cmd2: u8,
        data: &[u8],
        flags: Option<MessageFlags>,
    ) -> Result<DeviceMessage, ModemError> {
        self.device(address)
            .send_insteon_command(cmd1, cmd2, Some(data), flags)
            .await
    }

    /// Identify a device. Cached identities are returned unless `refresh`.
    pub async fn resolve_device(
        &self,
        address: Address,
        refresh: bool,
    ) -> Result<DeviceIdentity, ModemError> {
        let queue = self.device(address);
        if !refresh {
            if let Some(identity) = queue.identity() {
                return Ok(identity);
            }
        }
        resolver::resolve(&queue, &self.catalog).await
    }

    /// Read a device's link database (`start` 0 = top, `count` 0 = all)
    pub async fn read_device_links(
        &self,
        address: Address,
        start: u16,
        count: u8,
    ) -> Result<Vec<LinkRecord>, ModemError> {
        database::read_device_database(&self.device(address), start, count).await
    }

    /// Link the modem and a device, then re-sync the gateway table
    pub async fn link_device(
        &self,
        address: Address,
        group: u8,
        direction: LinkDirection,
    ) -> Result<LinkingCompleted, ModemError> {
        let mut session = LinkingSession::new(self.device(address), group, direction);
        let done = session.link().await?;
        self.sync_links().await?;
        Ok(done)
    }

    /// Remove the link between the modem and a device, then re-sync
    pub async fn unlink_device(
        &self,
        address: Address,
        group: u8,
        direction: LinkDirection,
    ) -> Result<LinkingCompleted, ModemError> {
        let mut session = LinkingSession::new(self.device(address), group, direction);
        let done = session.unlink().await?;
        self.sync_links().await?;
        Ok(done)
    }
}
