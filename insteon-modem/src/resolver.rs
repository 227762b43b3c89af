//! Device identification: ID request, catalog lookup and behaviour dispatch

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use insteon_transport::protocol::insteon;
use insteon_transport::{Address, MessageSubtype, PacketFilter, PacketType};

use crate::device::DeviceCommandQueue;
use crate::error::ModemError;

// ============================================================================
// Catalog
// ============================================================================

/// One product in the device catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub category: u8,
    pub subcategory: u8,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
}

/// Immutable (category, subcategory) → product table.
///
/// Built once at startup and shared; the resolver never mutates it.
#[derive(Debug, Clone, Default)]
pub struct DeviceCatalog {
    entries: HashMap<(u8, u8), DeviceDescriptor>,
}

impl DeviceCatalog {
    pub fn new(descriptors: impl IntoIterator<Item = DeviceDescriptor>) -> Self {
        Self {
            entries: descriptors
                .into_iter()
                .map(|d| ((d.category, d.subcategory), d))
                .collect(),
        }
    }

    pub fn lookup(&self, category: u8, subcategory: u8) -> Option<&DeviceDescriptor> {
        self.entries.get(&(category, subcategory))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by category then subcategory
    pub fn sorted(&self) -> Vec<&DeviceDescriptor> {
        let mut all: Vec<_> = self.entries.values().collect();
        all.sort_by_key(|d| (d.category, d.subcategory));
        all
    }
}

// ============================================================================
// Behaviour variants
// ============================================================================

/// Behaviour family selected once per device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    DimmableLighting,
    KeypadDimmer,
    SwitchedLighting,
    OutletLinc,
    IoLinc,
    SensorActuator,
    MotionSensor,
    OpenCloseSensor,
    LeakSensor,
    Security,
    Generic,
}

impl DeviceKind {
    /// Dispatch on category/subcategory
    pub fn select(category: u8, subcategory: u8) -> Self {
        match (category, subcategory) {
            (0x01, 0x1C) => Self::KeypadDimmer,
            (0x01, _) => Self::DimmableLighting,
            (0x02, 0x08 | 0x39) => Self::OutletLinc,
            (0x02, _) => Self::SwitchedLighting,
            (0x07, 0x00) => Self::IoLinc,
            (0x07, _) => Self::SensorActuator,
            (0x10, 0x01 | 0x03 | 0x04 | 0x05) => Self::MotionSensor,
            (0x10, 0x02 | 0x06 | 0x07 | 0x09 | 0x11 | 0x14 | 0x15) => Self::OpenCloseSensor,
            (0x10, 0x08) => Self::LeakSensor,
            (0x10, _) => Self::Security,
            _ => Self::Generic,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::DimmableLighting => "dimmable_lighting",
            Self::KeypadDimmer => "keypad_dimmer",
            Self::SwitchedLighting => "switched_lighting",
            Self::OutletLinc => "outlet_linc",
            Self::IoLinc => "io_linc",
            Self::SensorActuator => "sensor_actuator",
            Self::MotionSensor => "motion_sensor",
            Self::OpenCloseSensor => "open_close_sensor",
            Self::LeakSensor => "leak_sensor",
            Self::Security => "security",
            Self::Generic => "generic",
        }
    }

    /// Lighting variants accept on/off/level commands
    pub fn is_lighting(self) -> bool {
        matches!(
            self,
            Self::DimmableLighting | Self::KeypadDimmer | Self::SwitchedLighting | Self::OutletLinc
        )
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity reported by a device's ID broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub address: Address,
    pub category: u8,
    pub subcategory: u8,
    pub firmware: u8,
    /// cmd2 of the broadcast
    pub hardware: u8,
    pub kind: DeviceKind,
    pub descriptor: Option<DeviceDescriptor>,
}

impl DeviceIdentity {
    /// Build from raw identity bytes; kinds fall back to generic when the
    /// catalog has no entry
    pub fn new(
        address: Address,
        [category, subcategory, firmware]: [u8; 3],
        hardware: u8,
        catalog: &DeviceCatalog,
    ) -> Self {
        let descriptor = catalog.lookup(category, subcategory).cloned();
        let kind = if descriptor.is_some() {
            DeviceKind::select(category, subcategory)
        } else {
            DeviceKind::Generic
        };
        Self {
            address,
            category,
            subcategory,
            firmware,
            hardware,
            kind,
            descriptor,
        }
    }
}

/// Send an ID request and wait for the device's SET-button broadcast.
///
/// The whole exchange runs under the resolve deadline (2 s by default).
pub async fn resolve(
    queue: &DeviceCommandQueue,
    catalog: &DeviceCatalog,
) -> Result<DeviceIdentity, ModemError> {
    let address = queue.address();
    let mut broadcast_rx = queue.flow().router().once(
        PacketFilter::new(PacketType::StandardMessage)
            .subtype(MessageSubtype::Broadcast)
            .from_address(address),
    );

    let deadline = queue.timing().resolve_timeout();
    let exchange = async {
        queue.id_request().await?;
        broadcast_rx
            .recv()
            .await
            .ok_or_else(|| ModemError::from(insteon_transport::TransportError::Disconnected))
    };
    let packet = match tokio::time::timeout(deadline, exchange).await {
        Ok(result) => result?,
        Err(_) => return Err(ModemError::RemoteTimeout { address }),
    };

    let msg = packet
        .device_message()
        .ok_or_else(|| ModemError::ProtocolMismatch("ID reply is not a device message".into()))?;
    debug!("ID broadcast from {}: {:?}", address, msg);

    if !matches!(
        msg.cmd1,
        insteon::SET_BUTTON_RESPONDER | insteon::SET_BUTTON_CONTROLLER
    ) {
        return Err(ModemError::ProtocolMismatch(format!(
            "ID broadcast with cmd1 0x{:02X}",
            msg.cmd1
        )));
    }
    let [category, subcategory, firmware] = msg.to.bytes();
    if category == 0xFF {
        return Err(ModemError::ProtocolMismatch(format!(
            "invalid category 0xFF from {}",
            address
        )));
    }

    let identity = DeviceIdentity::new(address, [category, subcategory, firmware], msg.cmd2, catalog);
    info!(
        "{} is {:02X}/{:02X} fw {:02X} ({}{})",
        address,
        category,
        subcategory,
        firmware,
        identity.kind,
        identity
            .descriptor
            .as_ref()
            .map(|d| format!(", {}", d.name))
            .unwrap_or_default()
    );
    queue.set_identity(identity.clone());
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_table() {
        assert_eq!(DeviceKind::select(0x01, 0x1C), DeviceKind::KeypadDimmer);
        assert_eq!(DeviceKind::select(0x01, 0x20), DeviceKind::DimmableLighting);
        assert_eq!(DeviceKind::select(0x02, 0x39), DeviceKind::OutletLinc);
        assert_eq!(DeviceKind::select(0x02, 0x2A), DeviceKind::SwitchedLighting);
        assert_eq!(DeviceKind::select(0x07, 0x00), DeviceKind::IoLinc);
        assert_eq!(DeviceKind::select(0x07, 0x1A), DeviceKind::SensorActuator);
        assert_eq!(DeviceKind::select(0x10, 0x01), DeviceKind::MotionSensor);
        assert_eq!(DeviceKind::select(0x10, 0x11), DeviceKind::OpenCloseSensor);
        assert_eq!(DeviceKind::select(0x10, 0x08), DeviceKind::LeakSensor);
        assert_eq!(DeviceKind::select(0x10, 0x0A), DeviceKind::Security);
        assert_eq!(DeviceKind::select(0x03, 0x15), DeviceKind::Generic);
    }

    #[test]
    fn test_unknown_product_is_generic() {
        let catalog = DeviceCatalog::new([DeviceDescriptor {
            category: 0x01,
            subcategory: 0x20,
            name: "SwitchLinc Dimmer".into(),
            sku: Some("2477D".into()),
        }]);
        let addr = Address::new(1, 2, 3);
        let known = DeviceIdentity::new(addr, [0x01, 0x20, 0x45], 0, &catalog);
        assert_eq!(known.kind, DeviceKind::DimmableLighting);
        assert_eq!(known.descriptor.unwrap().sku.as_deref(), Some("2477D"));

        let unknown = DeviceIdentity::new(addr, [0x01, 0x7F, 0x45], 0, &catalog);
        assert_eq!(unknown.kind, DeviceKind::Generic);
        assert!(unknown.descriptor.is_none());
    }
}
