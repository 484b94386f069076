use thiserror::Error;

/// A required peripheral is not usable. Fatal to startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("motor output lines not ready")]
    MotorOutputsNotReady,
    #[error("ADC controller `{0}` not ready")]
    AdcNotReady(String),
    #[error("could not set up ADC channel {channel} ({code})")]
    ChannelSetup { channel: u8, code: i32 },
}

/// A single analog read failed at the hardware level. Recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SampleError {
    #[error("ADC sequence init failed ({0})")]
    Sequence(i32),
    #[error("ADC read failed ({0})")]
    Read(i32),
}

/// Raw counts cannot be converted to millivolts on this channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("value in mV not available")]
pub struct ConversionUnsupported;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("no temperature reading received yet")]
    MissingReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("unhandled thermostat attribute {0:#06x}")]
    UnsupportedAttribute(u32),
    #[error("attribute {attribute:#06x} payload is {actual} bytes, expected {expected}")]
    PayloadSize {
        attribute: u32,
        expected: usize,
        actual: usize,
    },
    #[error("unknown system mode {0:#04x}")]
    InvalidMode(u8),
    #[error("heating setpoint cannot be null")]
    NullSetpoint,
    #[error("attribute {attribute:#06x} value {value} out of range")]
    OutOfRange { attribute: u32, value: i16 },
}
