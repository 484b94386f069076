//! Simulated valve, motor current and room for running on a workstation.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::{info, warn};

use thermovalve_common::{
    motor::MOTOR_LINES, ActuatorPosition, AdcChannel, AmbientSensorConfig, ConversionUnsupported,
    InitError, MotorPattern, OutputLines, SampleError, SimulationConfig,
};

/// 12-bit converter against a 3.3 V reference.
const ADC_REF_MV: i32 = 3_300;
const ADC_MAX_COUNT: i32 = 4_095;

pub type SharedPlant = Arc<Mutex<Plant>>;

/// Valve travel and room temperature model driven by the motor lines.
#[derive(Debug)]
pub struct Plant {
    travel_time_ms: u64,
    running_current_mv: i32,
    stalled_current_mv: i32,
    heating_rate: f32,
    cooling_rate: f32,
    outdoor_temperature: f32,
    lines: [bool; MOTOR_LINES],
    /// Milliseconds of travel away from fully closed.
    travel_ms: u64,
    room_temperature: f32,
}

impl Plant {
    pub fn new(config: &SimulationConfig) -> Self {
        let outdoor = f32::from(config.outdoor_temperature);
        Self {
            travel_time_ms: config.travel_time_ms,
            running_current_mv: config.running_current_mv,
            stalled_current_mv: config.stalled_current_mv,
            heating_rate: config.heating_rate,
            cooling_rate: config.cooling_rate,
            outdoor_temperature: outdoor,
            lines: [false; MOTOR_LINES],
            travel_ms: 0,
            room_temperature: config.initial_temperature.map(f32::from).unwrap_or(outdoor),
        }
    }

    pub fn shared(config: &SimulationConfig) -> SharedPlant {
        Arc::new(Mutex::new(Self::new(config)))
    }

    fn direction(&self) -> Option<ActuatorPosition> {
        if self.lines == MotorPattern::DriveOpen.levels() {
            Some(ActuatorPosition::Open)
        } else if self.lines == MotorPattern::DriveClosed.levels() {
            Some(ActuatorPosition::Closed)
        } else {
            None
        }
    }

    pub fn opening(&self) -> f32 {
        self.travel_ms as f32 / self.travel_time_ms as f32
    }

    pub fn is_fully_open(&self) -> bool {
        self.travel_ms >= self.travel_time_ms
    }

    pub fn is_fully_closed(&self) -> bool {
        self.travel_ms == 0
    }

    pub fn step(&mut self, dt: Duration) {
        let dt_ms = dt.as_millis() as u64;
        match self.direction() {
            Some(ActuatorPosition::Open) => {
                self.travel_ms = (self.travel_ms + dt_ms).min(self.travel_time_ms);
            }
            Some(ActuatorPosition::Closed) => {
                self.travel_ms = self.travel_ms.saturating_sub(dt_ms);
            }
            None => {}
        }

        let minutes = dt.as_secs_f32() / 60.0;
        let opening = self.opening();
        let delta = self.heating_rate * opening - self.cooling_rate * (1.0 - opening);
        self.room_temperature =
            (self.room_temperature + delta * minutes).max(self.outdoor_temperature);
    }

    /// Supply current sense voltage; drops when the motor pushes against an
    /// end stop.
    pub fn motor_current_mv(&self) -> i32 {
        match self.direction() {
            Some(ActuatorPosition::Open) if self.is_fully_open() => self.stalled_current_mv,
            Some(ActuatorPosition::Closed) if self.is_fully_closed() => self.stalled_current_mv,
            Some(_) => self.running_current_mv,
            None => 0,
        }
    }

    pub fn room_temperature(&self) -> i16 {
        self.room_temperature
            .round()
            .clamp(f32::from(i16::MIN + 1), f32::from(i16::MAX)) as i16
    }
}

pub struct SimMotorLines {
    plant: SharedPlant,
}

impl SimMotorLines {
    pub fn new(plant: SharedPlant) -> Self {
        Self { plant }
    }
}

impl OutputLines for SimMotorLines {
    fn is_ready(&self) -> bool {
        true
    }

    fn configure(&mut self) -> Result<(), InitError> {
        info!("simulated motor lines configured");
        Ok(())
    }

    fn set_output(&mut self, line: usize, level: bool) {
        let mut plant = self.plant.lock();
        match plant.lines.get_mut(line) {
            Some(slot) => *slot = level,
            None => warn!(line, "write to unknown motor line"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum AdcSource {
    MotorCurrent,
    Ambient { offset_mv: i32, mv_per_degree: i32 },
}

pub struct SimAdc {
    name: &'static str,
    channel: u8,
    source: AdcSource,
    plant: SharedPlant,
}

impl SimAdc {
    pub fn motor_current(plant: SharedPlant) -> Self {
        Self {
            name: "adc@sim",
            channel: 0,
            source: AdcSource::MotorCurrent,
            plant,
        }
    }

    pub fn ambient(plant: SharedPlant, config: &AmbientSensorConfig) -> Self {
        Self {
            name: "adc@sim",
            channel: 1,
            source: AdcSource::Ambient {
                offset_mv: config.offset_mv,
                mv_per_degree: config.mv_per_degree,
            },
            plant,
        }
    }

    fn input_mv(&self) -> i32 {
        let plant = self.plant.lock();
        match self.source {
            AdcSource::MotorCurrent => plant.motor_current_mv(),
            AdcSource::Ambient {
                offset_mv,
                mv_per_degree,
            } => offset_mv + i32::from(plant.room_temperature()) * mv_per_degree / 100,
        }
    }
}

impl AdcChannel for SimAdc {
    fn name(&self) -> &str {
        self.name
    }

    fn channel_id(&self) -> u8 {
        self.channel
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn setup(&mut self) -> Result<(), InitError> {
        Ok(())
    }

    fn is_differential(&self) -> bool {
        false
    }

    fn read_raw(&mut self) -> Result<u16, SampleError> {
        let mv = self.input_mv().clamp(0, ADC_REF_MV);
        Ok((mv * ADC_MAX_COUNT / ADC_REF_MV) as u16)
    }

    fn raw_to_millivolts(&self, raw: i32) -> Result<i32, ConversionUnsupported> {
        Ok(raw * ADC_REF_MV / ADC_MAX_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant(travel_time_ms: u64) -> Plant {
        Plant::new(&SimulationConfig {
            travel_time_ms,
            ..SimulationConfig::default()
        })
    }

    #[test]
    fn current_drops_at_end_of_travel() {
        let mut plant = plant(1_000);
        plant.lines = MotorPattern::DriveOpen.levels();
        assert_eq!(plant.motor_current_mv(), 1_500);

        for _ in 0..20 {
            plant.step(Duration::from_millis(50));
        }
        assert!(plant.is_fully_open());
        assert_eq!(plant.motor_current_mv(), 1_200);

        plant.lines = MotorPattern::Halt.levels();
        assert_eq!(plant.motor_current_mv(), 0);
    }

    #[test]
    fn open_valve_warms_room() {
        let mut plant = plant(1_000);
        plant.travel_ms = 1_000;
        plant.step(Duration::from_secs(60));
        assert_eq!(plant.room_temperature(), 2060);
    }

    #[test]
    fn ambient_channel_encodes_room_temperature() {
        let shared = Plant::shared(&SimulationConfig::default());
        let mut adc = SimAdc::ambient(shared, &AmbientSensorConfig::default());
        let raw = adc.read_raw().unwrap();
        let mv = adc.raw_to_millivolts(i32::from(raw)).unwrap();
        assert!((698..=700).contains(&mv));
    }
}
