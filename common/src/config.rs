use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{SystemMode, ThermostatState};

/// Current-sense level below which the motor is considered stalled.
pub const STALL_THRESHOLD_MILLIVOLTS: i32 = 1330;
/// Interval between sense-and-decide cycles while the motor is driving.
pub const POLL_PERIOD: Duration = Duration::from_millis(200);
/// Endpoint hosting the thermostat cluster.
pub const THERMOSTAT_ENDPOINT: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub endpoint: u16,
    pub stall_threshold_mv: i32,
    pub poll_period_ms: u64,
    /// Used when millivolt conversion is unavailable. `None` skips the stall
    /// judgement for that cycle.
    pub raw_stall_threshold: Option<i32>,
    /// 0 disables periodic re-evaluation.
    pub reevaluate_interval_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            endpoint: THERMOSTAT_ENDPOINT,
            stall_threshold_mv: STALL_THRESHOLD_MILLIVOLTS,
            poll_period_ms: POLL_PERIOD.as_millis() as u64,
            raw_stall_threshold: None,
            reevaluate_interval_ms: 60_000,
        }
    }
}

impl ActuatorConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn sanitize(&mut self) {
        self.poll_period_ms = self.poll_period_ms.clamp(20, 5_000);
        self.stall_threshold_mv = self.stall_threshold_mv.clamp(0, 5_000);
        if let Some(raw) = self.raw_stall_threshold {
            self.raw_stall_threshold = Some(raw.max(0));
        }
        if self.reevaluate_interval_ms != 0 {
            self.reevaluate_interval_ms = self.reevaluate_interval_ms.max(1_000);
        }
    }
}

/// Mode and setpoint the local attribute store starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermostatDefaults {
    pub mode: SystemMode,
    pub heating_setpoint: i16,
}

impl Default for ThermostatDefaults {
    fn default() -> Self {
        Self {
            mode: SystemMode::Heat,
            heating_setpoint: 2200,
        }
    }
}

impl ThermostatDefaults {
    pub fn sanitize(&mut self) {
        self.heating_setpoint = self.heating_setpoint.clamp(700, 3000);
    }

    pub fn initial_state(&self, current_temperature: Option<i16>) -> ThermostatState {
        ThermostatState {
            mode: self.mode,
            current_temperature,
            heating_setpoint: self.heating_setpoint,
        }
    }
}

/// Analog ambient sensor with a linear millivolt response (TMP36-style).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientSensorConfig {
    pub sample_interval_ms: u64,
    pub offset_mv: i32,
    pub mv_per_degree: i32,
}

impl Default for AmbientSensorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 5_000,
            offset_mv: 500,
            mv_per_degree: 10,
        }
    }
}

impl AmbientSensorConfig {
    pub fn sanitize(&mut self) {
        self.sample_interval_ms = self.sample_interval_ms.max(100);
        if self.mv_per_degree <= 0 {
            self.mv_per_degree = 10;
        }
    }
}

/// An attribute write applied by the host simulation at a fixed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "attribute", content = "value", rename_all = "camelCase")]
pub enum ScriptedChange {
    SystemMode(SystemMode),
    HeatingSetpoint(i16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationStep {
    #[serde(rename = "afterMs")]
    pub after_ms: u64,
    pub change: ScriptedChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub initial_temperature: Option<i16>,
    pub travel_time_ms: u64,
    pub running_current_mv: i32,
    pub stalled_current_mv: i32,
    /// Centidegrees per minute gained while the valve is open.
    pub heating_rate: f32,
    /// Centidegrees per minute lost while the valve is closed.
    pub cooling_rate: f32,
    pub outdoor_temperature: i16,
    pub steps: Vec<SimulationStep>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_temperature: Some(2000),
            travel_time_ms: 3_000,
            running_current_mv: 1_500,
            stalled_current_mv: 1_200,
            heating_rate: 60.0,
            cooling_rate: 30.0,
            outdoor_temperature: 1000,
            steps: vec![
                SimulationStep {
                    after_ms: 20_000,
                    change: ScriptedChange::HeatingSetpoint(1800),
                },
                SimulationStep {
                    after_ms: 40_000,
                    change: ScriptedChange::HeatingSetpoint(2400),
                },
                SimulationStep {
                    after_ms: 60_000,
                    change: ScriptedChange::SystemMode(SystemMode::Off),
                },
            ],
        }
    }
}

impl SimulationConfig {
    pub fn sanitize(&mut self) {
        self.travel_time_ms = self.travel_time_ms.clamp(200, 60_000);
        self.heating_rate = self.heating_rate.clamp(0.0, 1_000.0);
        self.cooling_rate = self.cooling_rate.clamp(0.0, 1_000.0);
        self.steps.sort_by_key(|step| step.after_ms);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub thermostat: ThermostatDefaults,
    #[serde(default)]
    pub ambient: AmbientSensorConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl RuntimeConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let mut runtime: Self = serde_json::from_slice(raw)?;
        runtime.sanitize();
        Ok(runtime)
    }

    pub fn sanitize(&mut self) {
        self.actuator.sanitize();
        self.thermostat.sanitize();
        self.ambient.sanitize();
        self.simulation.sanitize();
    }
}
