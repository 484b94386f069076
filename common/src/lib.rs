pub mod actuator;
pub mod ambient;
pub mod attributes;
pub mod config;
pub mod error;
pub mod motor;
pub mod sense;
pub mod stall;
pub mod status;
pub mod thermostat;
pub mod types;

pub use actuator::{Actuator, StallTimer};
pub use ambient::AmbientSensor;
pub use attributes::{AttributeStore, AttributeUpdate, LocalAttributeStore, ThermostatAttribute};
pub use config::{
    ActuatorConfig, AmbientSensorConfig, RuntimeConfig, SimulationConfig, ThermostatDefaults,
};
pub use error::{ConversionUnsupported, InitError, SampleError};
pub use motor::{MotorPattern, OutputLines};
pub use sense::{AdcChannel, Reading};
pub use stall::{CycleTicket, MonitorState, StallDecision};
pub use status::ActuatorStatus;
pub use thermostat::ThermostatControl;
pub use types::{ActuatorPosition, Centidegrees, SystemMode, ThermostatState};
