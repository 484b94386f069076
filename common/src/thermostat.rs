use crate::{
    attributes::AttributeUpdate,
    error::ControlError,
    types::{ActuatorPosition, SystemMode, ThermostatState},
};

/// On/off valve control from mode, temperature and heating setpoint.
#[derive(Debug, Clone)]
pub struct ThermostatControl {
    state: ThermostatState,
    position: ActuatorPosition,
}

impl ThermostatControl {
    pub fn new(state: ThermostatState, position: ActuatorPosition) -> Self {
        Self { state, position }
    }

    pub fn state(&self) -> &ThermostatState {
        &self.state
    }

    pub fn mode(&self) -> SystemMode {
        self.state.mode
    }

    pub fn current_temperature(&self) -> Option<i16> {
        self.state.current_temperature
    }

    pub fn heating_setpoint(&self) -> i16 {
        self.state.heating_setpoint
    }

    pub fn position(&self) -> ActuatorPosition {
        self.position
    }

    /// Update one cached value. Returns whether it changed.
    pub fn apply(&mut self, update: AttributeUpdate) -> bool {
        let previous = self.state;
        match update {
            AttributeUpdate::LocalTemperature(value) => self.state.current_temperature = value,
            AttributeUpdate::HeatingSetpoint(value) => self.state.heating_setpoint = value,
            AttributeUpdate::SystemMode(mode) => self.state.mode = mode,
        }
        previous != self.state
    }

    /// Where the valve should be for the cached values.
    pub fn desired_position(&self) -> Result<ActuatorPosition, ControlError> {
        if self.state.mode != SystemMode::Heat {
            return Ok(ActuatorPosition::Closed);
        }

        let temperature = self
            .state
            .current_temperature
            .ok_or(ControlError::MissingReading)?;

        if temperature < self.state.heating_setpoint {
            Ok(ActuatorPosition::Open)
        } else {
            Ok(ActuatorPosition::Closed)
        }
    }

    /// Returns the direction to drive when it differs from the last command,
    /// and records it as the new position. `Ok(None)` means hold.
    pub fn evaluate(&mut self) -> Result<Option<ActuatorPosition>, ControlError> {
        let desired = self.desired_position()?;
        if desired == self.position {
            return Ok(None);
        }
        self.position = desired;
        Ok(Some(desired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heat(temperature: Option<i16>, setpoint: i16) -> ThermostatState {
        ThermostatState {
            mode: SystemMode::Heat,
            current_temperature: temperature,
            heating_setpoint: setpoint,
        }
    }

    #[test]
    fn heat_below_setpoint_opens() {
        let mut control = ThermostatControl::new(heat(Some(2000), 2200), ActuatorPosition::Closed);
        assert_eq!(control.evaluate(), Ok(Some(ActuatorPosition::Open)));
        assert_eq!(control.position(), ActuatorPosition::Open);
    }

    #[test]
    fn heat_at_or_above_setpoint_closes() {
        let mut control = ThermostatControl::new(heat(Some(2200), 2200), ActuatorPosition::Open);
        assert_eq!(control.evaluate(), Ok(Some(ActuatorPosition::Closed)));

        control.apply(AttributeUpdate::LocalTemperature(Some(2500)));
        assert_eq!(control.evaluate(), Ok(None));
    }

    #[test]
    fn any_other_mode_closes_regardless_of_temperature() {
        for mode in [
            SystemMode::Off,
            SystemMode::Auto,
            SystemMode::Cool,
            SystemMode::EmergencyHeat,
            SystemMode::FanOnly,
        ] {
            let state = ThermostatState {
                mode,
                current_temperature: Some(500),
                heating_setpoint: 2500,
            };
            let mut control = ThermostatControl::new(state, ActuatorPosition::Open);
            assert_eq!(control.evaluate(), Ok(Some(ActuatorPosition::Closed)));
            assert_eq!(control.position(), ActuatorPosition::Closed);
        }
    }

    #[test]
    fn unchanged_outcome_is_a_no_op() {
        let mut control = ThermostatControl::new(heat(Some(2000), 2200), ActuatorPosition::Closed);
        assert_eq!(control.evaluate(), Ok(Some(ActuatorPosition::Open)));

        for temperature in [2010, 2100, 2199] {
            control.apply(AttributeUpdate::LocalTemperature(Some(temperature)));
            assert_eq!(control.evaluate(), Ok(None));
        }
        control.apply(AttributeUpdate::HeatingSetpoint(2300));
        assert_eq!(control.evaluate(), Ok(None));
    }

    #[test]
    fn missing_reading_in_heat_holds() {
        let mut control = ThermostatControl::new(heat(None, 2200), ActuatorPosition::Closed);
        assert_eq!(control.evaluate(), Err(ControlError::MissingReading));
        assert_eq!(control.position(), ActuatorPosition::Closed);
    }

    #[test]
    fn missing_reading_ignored_outside_heat() {
        let state = ThermostatState {
            mode: SystemMode::Off,
            current_temperature: None,
            heating_setpoint: 2200,
        };
        let mut control = ThermostatControl::new(state, ActuatorPosition::Open);
        assert_eq!(control.evaluate(), Ok(Some(ActuatorPosition::Closed)));
    }

    #[test]
    fn apply_reports_changes() {
        let mut control = ThermostatControl::new(heat(Some(2000), 2200), ActuatorPosition::Closed);
        assert!(!control.apply(AttributeUpdate::HeatingSetpoint(2200)));
        assert!(control.apply(AttributeUpdate::SystemMode(SystemMode::Off)));
        assert_eq!(control.mode(), SystemMode::Off);
    }
}
