//! Analog ambient temperature sensor.

use tracing::{debug, info};

use crate::{
    attributes::AttributeUpdate,
    config::AmbientSensorConfig,
    error::{InitError, SampleError},
    sense::{prepare_channel, sample, AdcChannel, Reading},
};

/// Linear sensor response to centidegrees, saturating to the `i16` range.
pub fn millivolts_to_centidegrees(mv: i32, config: &AmbientSensorConfig) -> i16 {
    let above_offset = i64::from(mv) - i64::from(config.offset_mv);
    let centidegrees = above_offset * 100 / i64::from(config.mv_per_degree.max(1));
    centidegrees.clamp(i64::from(i16::MIN + 1), i64::from(i16::MAX)) as i16
}

pub struct AmbientSensor<A> {
    adc: A,
    config: AmbientSensorConfig,
}

impl<A: AdcChannel> AmbientSensor<A> {
    pub fn init(mut adc: A, config: AmbientSensorConfig) -> Result<Self, InitError> {
        prepare_channel(&mut adc)?;
        info!(adc = adc.name(), channel = adc.channel_id(), "temperature ADC initialized");
        Ok(Self { adc, config })
    }

    /// Sample the sensor. A reading without millivolt conversion cannot be
    /// scaled and is reported as a null temperature.
    pub fn measure(&mut self) -> Result<Option<i16>, SampleError> {
        match sample(&mut self.adc)? {
            Reading::Millivolts(mv) => {
                let temperature = millivolts_to_centidegrees(mv, &self.config);
                debug!(mv, temperature, "ambient temperature measured");
                Ok(Some(temperature))
            }
            Reading::Raw(_) => Ok(None),
        }
    }

    /// Sample and wrap as a `LocalTemperature` update.
    pub fn measure_update(&mut self) -> Result<AttributeUpdate, SampleError> {
        self.measure().map(AttributeUpdate::LocalTemperature)
    }

    pub fn sample_interval_ms(&self) -> u64 {
        self.config.sample_interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sense::fake::ScriptedAdc;

    #[test]
    fn converts_linear_response() {
        let config = AmbientSensorConfig::default();
        assert_eq!(millivolts_to_centidegrees(750, &config), 2500);
        assert_eq!(millivolts_to_centidegrees(500, &config), 0);
        assert_eq!(millivolts_to_centidegrees(400, &config), -1000);
        assert_eq!(millivolts_to_centidegrees(723, &config), 2230);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let config = AmbientSensorConfig::default();
        assert_eq!(millivolts_to_centidegrees(100_000, &config), i16::MAX);
        assert_eq!(millivolts_to_centidegrees(-100_000, &config), i16::MIN + 1);

        let extreme = AmbientSensorConfig {
            offset_mv: i32::MIN,
            ..AmbientSensorConfig::default()
        };
        assert_eq!(millivolts_to_centidegrees(1_000, &extreme), i16::MAX);
    }

    #[test]
    fn unconvertible_sample_is_null() {
        let mut adc = ScriptedAdc::with_millivolts(&[700]);
        adc.convertible = false;
        let mut sensor = AmbientSensor::init(adc, AmbientSensorConfig::default()).unwrap();
        assert_eq!(
            sensor.measure_update(),
            Ok(AttributeUpdate::LocalTemperature(None))
        );
    }

    #[test]
    fn measurement_becomes_temperature_update() {
        let adc = ScriptedAdc::with_millivolts(&[700]);
        let mut sensor = AmbientSensor::init(adc, AmbientSensorConfig::default()).unwrap();
        assert_eq!(
            sensor.measure_update(),
            Ok(AttributeUpdate::LocalTemperature(Some(2000)))
        );
    }
}
