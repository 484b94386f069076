//! Thermostat cluster attribute identifiers and payload decoding.
//!
//! Payloads arrive as raw little-endian bytes. Each attribute has a fixed
//! width and every decode checks it before interpreting the bytes.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    error::AttributeError,
    types::{SystemMode, ThermostatState},
};

/// Encoding of a null `LocalTemperature`.
pub const NULL_TEMPERATURE: i16 = i16::MIN;
/// Absolute zero in centidegrees; lowest representable temperature.
pub const MIN_TEMPERATURE: i16 = -27315;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermostatAttribute {
    LocalTemperature,
    OccupiedHeatingSetpoint,
    SystemMode,
}

impl ThermostatAttribute {
    pub const fn id(self) -> u32 {
        match self {
            Self::LocalTemperature => 0x0000,
            Self::OccupiedHeatingSetpoint => 0x0012,
            Self::SystemMode => 0x001C,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0x0000 => Some(Self::LocalTemperature),
            0x0012 => Some(Self::OccupiedHeatingSetpoint),
            0x001C => Some(Self::SystemMode),
            _ => None,
        }
    }

    pub const fn payload_size(self) -> usize {
        match self {
            Self::LocalTemperature | Self::OccupiedHeatingSetpoint => 2,
            Self::SystemMode => 1,
        }
    }
}

/// A decoded attribute change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeUpdate {
    LocalTemperature(Option<i16>),
    HeatingSetpoint(i16),
    SystemMode(SystemMode),
}

impl AttributeUpdate {
    pub fn attribute(&self) -> ThermostatAttribute {
        match self {
            Self::LocalTemperature(_) => ThermostatAttribute::LocalTemperature,
            Self::HeatingSetpoint(_) => ThermostatAttribute::OccupiedHeatingSetpoint,
            Self::SystemMode(_) => ThermostatAttribute::SystemMode,
        }
    }

    /// Wire encoding, as delivered by the attribute store notification.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Self::LocalTemperature(value) => value
                .unwrap_or(NULL_TEMPERATURE)
                .to_le_bytes()
                .to_vec(),
            Self::HeatingSetpoint(value) => value.to_le_bytes().to_vec(),
            Self::SystemMode(mode) => vec![mode.as_u8()],
        }
    }
}

pub fn decode_attribute(attribute_id: u32, raw: &[u8]) -> Result<AttributeUpdate, AttributeError> {
    let attribute = ThermostatAttribute::from_id(attribute_id)
        .ok_or(AttributeError::UnsupportedAttribute(attribute_id))?;
    let expected = attribute.payload_size();
    if raw.len() != expected {
        return Err(AttributeError::PayloadSize {
            attribute: attribute_id,
            expected,
            actual: raw.len(),
        });
    }

    match attribute {
        ThermostatAttribute::LocalTemperature => {
            let value = i16::from_le_bytes([raw[0], raw[1]]);
            if value == NULL_TEMPERATURE {
                return Ok(AttributeUpdate::LocalTemperature(None));
            }
            check_temperature(attribute_id, value)?;
            Ok(AttributeUpdate::LocalTemperature(Some(value)))
        }
        ThermostatAttribute::OccupiedHeatingSetpoint => {
            let value = i16::from_le_bytes([raw[0], raw[1]]);
            if value == NULL_TEMPERATURE {
                return Err(AttributeError::NullSetpoint);
            }
            check_temperature(attribute_id, value)?;
            Ok(AttributeUpdate::HeatingSetpoint(value))
        }
        ThermostatAttribute::SystemMode => Ok(AttributeUpdate::SystemMode(
            SystemMode::try_from(raw[0])?,
        )),
    }
}

fn check_temperature(attribute: u32, value: i16) -> Result<(), AttributeError> {
    if value < MIN_TEMPERATURE {
        return Err(AttributeError::OutOfRange { attribute, value });
    }
    Ok(())
}

/// The external store holding mode, setpoint and measured temperature.
///
/// Implementations hold their own lock for the whole snapshot read so the
/// three values are mutually consistent.
pub trait AttributeStore {
    fn snapshot(&self, endpoint: u16) -> ThermostatState;
}

/// In-memory attribute store for running without a thermostat application.
///
/// The lock is held for snapshots and across change notifications, so every
/// attribute access is serialized.
pub struct LocalAttributeStore {
    endpoint: u16,
    values: Mutex<ThermostatState>,
}

impl LocalAttributeStore {
    pub fn new(endpoint: u16, initial: ThermostatState) -> Self {
        Self {
            endpoint,
            values: Mutex::new(initial),
        }
    }

    /// Store a value and, when it changed, notify with the encoded payload.
    pub fn write_and_notify<F>(&self, update: AttributeUpdate, notify: F) -> bool
    where
        F: FnOnce(u16, u32, &[u8]),
    {
        let mut values = self.values.lock();
        let previous = *values;
        match update {
            AttributeUpdate::LocalTemperature(value) => values.current_temperature = value,
            AttributeUpdate::HeatingSetpoint(value) => values.heating_setpoint = value,
            AttributeUpdate::SystemMode(mode) => values.mode = mode,
        }
        if *values == previous {
            return false;
        }

        debug!(?update, "attribute store updated");
        notify(self.endpoint, update.attribute().id(), &update.encode());
        true
    }
}

impl AttributeStore for LocalAttributeStore {
    fn snapshot(&self, endpoint: u16) -> ThermostatState {
        if endpoint != self.endpoint {
            warn!(endpoint, "snapshot requested for unknown endpoint");
        }
        *self.values.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_only_notifies_on_change() {
        let initial = ThermostatState {
            mode: SystemMode::Heat,
            current_temperature: Some(2000),
            heating_setpoint: 2200,
        };
        let store = LocalAttributeStore::new(1, initial);
        let mut seen = Vec::new();

        let changed = store.write_and_notify(AttributeUpdate::HeatingSetpoint(2200), |_, id, _| {
            seen.push(id)
        });
        assert!(!changed);

        let changed = store.write_and_notify(AttributeUpdate::HeatingSetpoint(1800), |_, id, raw| {
            seen.push(id);
            assert_eq!(raw, 1800_i16.to_le_bytes().as_slice());
        });
        assert!(changed);
        assert_eq!(seen, vec![0x0012]);
        assert_eq!(store.snapshot(1).heating_setpoint, 1800);
    }

    #[test]
    fn decodes_signed_temperature() {
        let raw = (-150_i16).to_le_bytes();
        assert_eq!(
            decode_attribute(0x0000, &raw),
            Ok(AttributeUpdate::LocalTemperature(Some(-150)))
        );
    }

    #[test]
    fn null_temperature_clears_reading() {
        assert_eq!(
            decode_attribute(0x0000, &[0x00, 0x80]),
            Ok(AttributeUpdate::LocalTemperature(None))
        );
    }

    #[test]
    fn rejects_wrong_payload_width() {
        assert_eq!(
            decode_attribute(0x0012, &[0x98]),
            Err(AttributeError::PayloadSize {
                attribute: 0x0012,
                expected: 2,
                actual: 1,
            })
        );
        assert_eq!(
            decode_attribute(0x001C, &[0x04, 0x00]),
            Err(AttributeError::PayloadSize {
                attribute: 0x001C,
                expected: 1,
                actual: 2,
            })
        );
    }

    #[test]
    fn rejects_unknown_attribute_and_mode() {
        assert_eq!(
            decode_attribute(0x0029, &[0x00]),
            Err(AttributeError::UnsupportedAttribute(0x0029))
        );
        assert_eq!(
            decode_attribute(0x001C, &[0x02]),
            Err(AttributeError::InvalidMode(0x02))
        );
    }

    #[test]
    fn rejects_below_absolute_zero_and_null_setpoint() {
        let raw = (-30000_i16).to_le_bytes();
        assert_eq!(
            decode_attribute(0x0000, &raw),
            Err(AttributeError::OutOfRange {
                attribute: 0x0000,
                value: -30000,
            })
        );
        assert_eq!(
            decode_attribute(0x0012, &[0x00, 0x80]),
            Err(AttributeError::NullSetpoint)
        );
    }

    #[test]
    fn encode_matches_decode() {
        let updates = [
            AttributeUpdate::LocalTemperature(Some(2047)),
            AttributeUpdate::LocalTemperature(None),
            AttributeUpdate::HeatingSetpoint(2200),
            AttributeUpdate::SystemMode(SystemMode::Heat),
        ];
        for update in updates {
            let raw = update.encode();
            assert_eq!(decode_attribute(update.attribute().id(), &raw), Ok(update));
        }
    }
}
