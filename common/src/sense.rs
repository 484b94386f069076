//! Current sense reader for the motor supply.
//!
//! Wraps one analog channel and turns a single blocking conversion into a
//! millivolt reading. Conversion to millivolts is optional on some hardware
//! paths; in that case the raw value is reported as such.

use tracing::{debug, info, warn};

use crate::error::{ConversionUnsupported, InitError, SampleError};

/// One analog input channel as exposed by the platform.
pub trait AdcChannel {
    /// Controller name for log lines.
    fn name(&self) -> &str;
    fn channel_id(&self) -> u8;
    fn is_ready(&self) -> bool;
    /// Configure the channel. Called once during startup.
    fn setup(&mut self) -> Result<(), InitError>;
    fn is_differential(&self) -> bool;
    /// One blocking conversion, returning the 16-bit sample buffer.
    fn read_raw(&mut self) -> Result<u16, SampleError>;
    fn raw_to_millivolts(&self, raw: i32) -> Result<i32, ConversionUnsupported>;
}

/// Result of a successful conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Millivolts(i32),
    /// Millivolt conversion is unavailable; value is in raw counts.
    Raw(i32),
}

/// Bring a channel up, failing fast if the controller is missing.
pub fn prepare_channel<A: AdcChannel>(adc: &mut A) -> Result<(), InitError> {
    if !adc.is_ready() {
        return Err(InitError::AdcNotReady(adc.name().to_string()));
    }
    adc.setup()?;
    Ok(())
}

/// Sample once and convert, applying the channel's polarity.
pub fn sample<A: AdcChannel>(adc: &mut A) -> Result<Reading, SampleError> {
    let buf = adc.read_raw()?;
    // Differential samples are signed two's complement.
    let raw = if adc.is_differential() {
        i32::from(buf as i16)
    } else {
        i32::from(buf)
    };

    match adc.raw_to_millivolts(raw) {
        Ok(mv) => Ok(Reading::Millivolts(mv)),
        Err(err) => {
            warn!(channel = adc.channel_id(), raw, "{err}");
            Ok(Reading::Raw(raw))
        }
    }
}

pub struct CurrentSense<A> {
    adc: A,
}

impl<A: AdcChannel> CurrentSense<A> {
    pub fn init(mut adc: A) -> Result<Self, InitError> {
        prepare_channel(&mut adc)?;
        info!(adc = adc.name(), channel = adc.channel_id(), "motor ADC initialized");
        Ok(Self { adc })
    }

    pub fn read(&mut self) -> Result<Reading, SampleError> {
        let reading = sample(&mut self.adc)?;
        debug!(
            adc = self.adc.name(),
            channel = self.adc.channel_id(),
            ?reading,
            "current sense sample"
        );
        Ok(reading)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;

    use super::*;

    /// Scripted ADC: each read pops the next queued result.
    pub struct ScriptedAdc {
        pub ready: bool,
        pub setup_code: Option<i32>,
        pub differential: bool,
        pub convertible: bool,
        pub samples: VecDeque<Result<u16, SampleError>>,
    }

    impl ScriptedAdc {
        pub fn new() -> Self {
            Self {
                ready: true,
                setup_code: None,
                differential: false,
                convertible: true,
                samples: VecDeque::new(),
            }
        }

        pub fn with_millivolts(readings: &[u16]) -> Self {
            let mut adc = Self::new();
            adc.samples.extend(readings.iter().map(|mv| Ok(*mv)));
            adc
        }
    }

    impl AdcChannel for ScriptedAdc {
        fn name(&self) -> &str {
            "adc@scripted"
        }

        fn channel_id(&self) -> u8 {
            1
        }

        fn is_ready(&self) -> bool {
            self.ready
        }

        fn setup(&mut self) -> Result<(), InitError> {
            match self.setup_code {
                Some(code) => Err(InitError::ChannelSetup { channel: 1, code }),
                None => Ok(()),
            }
        }

        fn is_differential(&self) -> bool {
            self.differential
        }

        fn read_raw(&mut self) -> Result<u16, SampleError> {
            self.samples.pop_front().unwrap_or(Err(SampleError::Read(-5)))
        }

        // Identity conversion keeps scripted values readable as millivolts.
        fn raw_to_millivolts(&self, raw: i32) -> Result<i32, ConversionUnsupported> {
            if self.convertible {
                Ok(raw)
            } else {
                Err(ConversionUnsupported)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fake::ScriptedAdc, *};

    #[test]
    fn unsigned_sample_converts_to_millivolts() {
        let mut sense = CurrentSense::init(ScriptedAdc::with_millivolts(&[1500])).unwrap();
        assert_eq!(sense.read(), Ok(Reading::Millivolts(1500)));
    }

    #[test]
    fn differential_sample_is_signed() {
        let mut adc = ScriptedAdc::with_millivolts(&[0xFF38]);
        adc.differential = true;
        let mut sense = CurrentSense::init(adc).unwrap();
        assert_eq!(sense.read(), Ok(Reading::Millivolts(-200)));
    }

    #[test]
    fn unsupported_conversion_reports_raw_counts() {
        let mut adc = ScriptedAdc::with_millivolts(&[2048]);
        adc.convertible = false;
        let mut sense = CurrentSense::init(adc).unwrap();
        assert_eq!(sense.read(), Ok(Reading::Raw(2048)));
    }

    #[test]
    fn hardware_failure_propagates() {
        let mut adc = ScriptedAdc::new();
        adc.samples.push_back(Err(SampleError::Read(-11)));
        let mut sense = CurrentSense::init(adc).unwrap();
        assert_eq!(sense.read(), Err(SampleError::Read(-11)));
    }

    #[test]
    fn init_fails_fast_on_missing_controller() {
        let mut adc = ScriptedAdc::new();
        adc.ready = false;
        assert_eq!(
            CurrentSense::init(adc).err(),
            Some(InitError::AdcNotReady("adc@scripted".to_string()))
        );

        let mut adc = ScriptedAdc::new();
        adc.setup_code = Some(-22);
        assert_eq!(
            CurrentSense::init(adc).err(),
            Some(InitError::ChannelSetup {
                channel: 1,
                code: -22
            })
        );
    }
}
