//! Convenience commands per device family, composed over the device queue

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use insteon_transport::protocol::insteon;

use crate::device::DeviceCommandQueue;
use crate::error::ModemError;

/// Full brightness
pub const LEVEL_MAX: u8 = 0xFF;

// === Lighting ===

/// Turn on at `level` using the device's ramp rate; returns the ACKed level
pub async fn light_on(queue: &DeviceCommandQueue, level: u8) -> Result<u8, ModemError> {
    Ok(queue.send_standard(insteon::LIGHT_ON, level).await?.cmd2)
}

pub async fn light_on_fast(queue: &DeviceCommandQueue) -> Result<(), ModemError> {
    queue.send_standard(insteon::LIGHT_ON_FAST, LEVEL_MAX).await?;
    Ok(())
}

pub async fn light_off(queue: &DeviceCommandQueue) -> Result<(), ModemError> {
    queue.send_standard(insteon::LIGHT_OFF, 0x00).await?;
    Ok(())
}

pub async fn light_off_fast(queue: &DeviceCommandQueue) -> Result<(), ModemError> {
    queue.send_standard(insteon::LIGHT_OFF_FAST, 0x00).await?;
    Ok(())
}

pub async fn beep(queue: &DeviceCommandQueue) -> Result<(), ModemError> {
    queue.send_standard(insteon::BEEP, 0x00).await?;
    Ok(())
}

/// Current level from a status request
pub async fn status(queue: &DeviceCommandQueue) -> Result<u8, ModemError> {
    Ok(queue.status().await?.level)
}

// === IOLinc ===

/// Switch the IOLinc relay
pub async fn set_relay(queue: &DeviceCommandQueue, on: bool) -> Result<(), ModemError> {
    if on {
        queue.send_standard(insteon::LIGHT_ON, LEVEL_MAX).await?;
    } else {
        queue.send_standard(insteon::LIGHT_OFF, 0x00).await?;
    }
    Ok(())
}

// === Operating flags ===

/// Bit index → flag name for one device family's operating flags byte.
///
/// Layouts differ between products and firmware, so they are supplied by
/// configuration and validated here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct FlagLayout {
    bits: BTreeMap<u8, String>,
}

impl FlagLayout {
    pub fn new(bits: BTreeMap<u8, String>) -> Result<Self, ModemError> {
        let mut seen = Vec::with_capacity(bits.len());
        for (&bit, name) in &bits {
            if bit >= 8 {
                return Err(ModemError::InvalidParameter(format!(
                    "flag bit {bit} out of range 0-7"
                )));
            }
            let name = name.trim();
            if name.is_empty() {
                return Err(ModemError::InvalidParameter(format!(
                    "flag bit {bit} has no name"
                )));
            }
            if seen.contains(&name) {
                return Err(ModemError::InvalidParameter(format!(
                    "duplicate flag name {name}"
                )));
            }
            seen.push(name);
        }
        Ok(Self { bits })
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Name → set/clear for every named bit
    pub fn decode(&self, byte: u8) -> BTreeMap<String, bool> {
        self.bits
            .iter()
            .map(|(&bit, name)| (name.trim().to_string(), byte & (1 << bit) != 0))
            .collect()
    }
}

// Config files key tables by string, so bit indices arrive as "0".."7"
impl TryFrom<BTreeMap<String, String>> for FlagLayout {
    type Error = ModemError;

    fn try_from(raw: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let bits = raw
            .into_iter()
            .map(|(bit, name)| {
                bit.trim()
                    .parse::<u8>()
                    .map(|bit| (bit, name))
                    .map_err(|_| ModemError::InvalidParameter(format!("bad flag bit '{bit}'")))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Self::new(bits)
    }
}

impl From<FlagLayout> for BTreeMap<String, String> {
    fn from(layout: FlagLayout) -> Self {
        layout
            .bits
            .into_iter()
            .map(|(bit, name)| (bit.to_string(), name))
            .collect()
    }
}

/// Read the operating flags byte and decode it with `layout`
pub async fn read_operating_flags(
    queue: &DeviceCommandQueue,
    layout: &FlagLayout,
) -> Result<BTreeMap<String, bool>, ModemError> {
    Ok(layout.decode(queue.operating_flags().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(pairs: &[(u8, &str)]) -> Result<FlagLayout, ModemError> {
        FlagLayout::new(pairs.iter().map(|(b, n)| (*b, n.to_string())).collect())
    }

    #[test]
    fn test_flag_layout_decode() {
        let l = layout(&[(0, "program_lock"), (1, "led_on_tx"), (4, "led_off")]).unwrap();
        let flags = l.decode(0b0001_0001);
        assert_eq!(flags["program_lock"], true);
        assert_eq!(flags["led_on_tx"], false);
        assert_eq!(flags["led_off"], true);
        assert_eq!(flags.len(), 3);
    }

    #[test]
    fn test_flag_layout_validation() {
        assert!(layout(&[(8, "x")]).is_err());
        assert!(layout(&[(0, " ")]).is_err());
        assert!(layout(&[(0, "a"), (1, "a")]).is_err());
        assert!(layout(&[]).unwrap().is_empty());
    }
}
