use serde::Serialize;
use tracing::info;

use crate::{
    motor::MotorPattern,
    stall::MonitorState,
    types::{ActuatorPosition, Centidegrees, MaybeCentidegrees, SystemMode, ThermostatState},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActuatorStatus {
    pub mode: SystemMode,
    #[serde(rename = "currentTemperature")]
    pub current_temperature: Option<i16>,
    #[serde(rename = "heatingSetpoint")]
    pub heating_setpoint: i16,
    pub position: ActuatorPosition,
    pub motor: MotorPattern,
    pub monitor: MonitorState,
    #[serde(rename = "cycleInFlight")]
    pub cycle_in_flight: bool,
}

/// Emit the thermostat status lines.
pub fn log_thermostat_status(state: &ThermostatState) {
    info!("Thermostat:");
    info!("Mode - {}", state.mode.as_str());
    info!(
        "Temperature - {}'C",
        MaybeCentidegrees(state.current_temperature)
    );
    info!(
        "HeatingSetpoint - {}'C",
        Centidegrees(state.heating_setpoint)
    );
}
