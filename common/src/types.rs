use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AttributeError;

/// Thermostat system mode as carried by the `SystemMode` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemMode {
    Off,
    Auto,
    Cool,
    Heat,
    EmergencyHeat,
    Precooling,
    FanOnly,
    Dry,
    Sleep,
}

impl SystemMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Auto => "AUTO",
            Self::Cool => "COOL",
            Self::Heat => "HEAT",
            Self::EmergencyHeat => "EMERGENCY_HEAT",
            Self::Precooling => "PRECOOLING",
            Self::FanOnly => "FAN_ONLY",
            Self::Dry => "DRY",
            Self::Sleep => "SLEEP",
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Off => 0x00,
            Self::Auto => 0x01,
            Self::Cool => 0x03,
            Self::Heat => 0x04,
            Self::EmergencyHeat => 0x05,
            Self::Precooling => 0x06,
            Self::FanOnly => 0x07,
            Self::Dry => 0x08,
            Self::Sleep => 0x09,
        }
    }
}

impl TryFrom<u8> for SystemMode {
    type Error = AttributeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Off),
            0x01 => Ok(Self::Auto),
            0x03 => Ok(Self::Cool),
            0x04 => Ok(Self::Heat),
            0x05 => Ok(Self::EmergencyHeat),
            0x06 => Ok(Self::Precooling),
            0x07 => Ok(Self::FanOnly),
            0x08 => Ok(Self::Dry),
            0x09 => Ok(Self::Sleep),
            other => Err(AttributeError::InvalidMode(other)),
        }
    }
}

/// Last commanded drive direction. There is no position sensor, so this is
/// only "which way the motor was last told to move".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActuatorPosition {
    Open,
    Closed,
}

impl ActuatorPosition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }
}

/// Cached copy of the attribute store values the control loop works from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermostatState {
    pub mode: SystemMode,
    /// Hundredths of a degree Celsius; `None` until the first reading arrives.
    pub current_temperature: Option<i16>,
    /// Hundredths of a degree Celsius.
    pub heating_setpoint: i16,
}

impl Default for ThermostatState {
    fn default() -> Self {
        Self {
            mode: SystemMode::Off,
            current_temperature: None,
            heating_setpoint: 2000,
        }
    }
}

/// Renders a centidegree value as `whole,tenths` with the hundredths rounded
/// half-up, e.g. 2347 -> `23,5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Centidegrees(pub i16);

impl Centidegrees {
    /// Whole degrees and tenths after rounding, sign carried separately.
    pub fn split(self) -> (bool, u32, u32) {
        let negative = self.0 < 0;
        let tenths = (self.0.unsigned_abs() as u32 + 5) / 10;
        (negative, tenths / 10, tenths % 10)
    }
}

impl fmt::Display for Centidegrees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (negative, whole, tenth) = self.split();
        let sign = if negative && (whole, tenth) != (0, 0) {
            "-"
        } else {
            ""
        };
        write!(f, "{sign}{whole},{tenth}")
    }
}

/// Optional temperature rendering used by status lines.
pub struct MaybeCentidegrees(pub Option<i16>);

impl fmt::Display for MaybeCentidegrees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => Centidegrees(value).fmt(f),
            None => f.write_str("--"),
        }
    }
}
