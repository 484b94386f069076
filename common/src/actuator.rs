//! Stall-protected valve actuator.
//!
//! Two contexts call in here: the attribute-change path (serialized by the
//! attribute store) and the stall worker. Control state, motor outputs and
//! the stall monitor sit behind one mutex so a halt and a drive never
//! interleave at the output lines. The current sense channel has its own
//! lock and is only sampled with the core lock released.

use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    attributes::{decode_attribute, AttributeStore, AttributeUpdate},
    config::ActuatorConfig,
    error::{AttributeError, InitError},
    motor::{MotorDriver, OutputLines},
    sense::{AdcChannel, CurrentSense},
    stall::{CycleTicket, StallDecision, StallMonitor},
    status::{log_thermostat_status, ActuatorStatus},
    thermostat::ThermostatControl,
    types::{ActuatorPosition, SystemMode, ThermostatState},
};

/// One-shot timer that schedules the next sense-and-decide cycle.
///
/// Expiry must end up in [`Actuator::on_timer_fired`]; the returned ticket
/// is then handed to a worker that calls [`Actuator::run_stall_cycle`].
pub trait StallTimer {
    /// (Re)start the timer; a pending expiry is replaced.
    fn start(&self, period: Duration);
    fn stop(&self);
}

struct Core<O> {
    control: ThermostatControl,
    motor: MotorDriver<O>,
    monitor: StallMonitor,
}

pub struct Actuator<O, A, T> {
    config: ActuatorConfig,
    timer: T,
    core: Mutex<Core<O>>,
    sense: Mutex<CurrentSense<A>>,
}

impl<O, A, T> Actuator<O, A, T>
where
    O: OutputLines,
    A: AdcChannel,
    T: StallTimer,
{
    /// Check the peripherals, halt the motor, load the attribute snapshot and
    /// evaluate it once.
    pub fn init<S>(
        config: ActuatorConfig,
        lines: O,
        adc: A,
        timer: T,
        store: &S,
    ) -> Result<Self, InitError>
    where
        S: AttributeStore + ?Sized,
    {
        let motor = MotorDriver::init(lines).inspect_err(|err| error!("{err}"))?;
        let sense = CurrentSense::init(adc).inspect_err(|err| error!("{err}"))?;

        let snapshot = store.snapshot(config.endpoint);
        info!(endpoint = config.endpoint, ?snapshot, "thermostat attributes loaded");

        let actuator = Self {
            core: Mutex::new(Core {
                control: ThermostatControl::new(snapshot, ActuatorPosition::Closed),
                motor,
                monitor: StallMonitor::new(&config),
            }),
            sense: Mutex::new(sense),
            timer,
            config,
        };

        actuator.log_status();
        actuator.reevaluate();
        Ok(actuator)
    }

    pub fn config(&self) -> &ActuatorConfig {
        &self.config
    }

    /// Attribute store notification with the raw payload.
    pub fn handle_attribute_change(&self, endpoint: u16, attribute_id: u32, raw: &[u8]) {
        if endpoint != self.config.endpoint {
            debug!(endpoint, attribute_id, "ignoring attribute on foreign endpoint");
            return;
        }

        match decode_attribute(attribute_id, raw) {
            Ok(update) => {
                self.apply_update(update);
            }
            Err(AttributeError::UnsupportedAttribute(id)) => {
                info!("Unhandled thermostat attribute {id:#x}");
            }
            Err(err) => warn!("dropping attribute change: {err}"),
        }
    }

    /// Update the cache with a decoded change and evaluate.
    pub fn apply_update(&self, update: AttributeUpdate) -> Option<ActuatorPosition> {
        let (commanded, state) = {
            let mut core = self.core.lock();
            let changed = core.control.apply(update);
            info!(?update, changed, "thermostat attribute changed");
            let commanded = self.evaluate_locked(&mut core);
            (commanded, *core.control.state())
        };
        log_thermostat_status(&state);
        commanded
    }

    /// Periodic evaluation without an attribute change.
    pub fn reevaluate(&self) -> Option<ActuatorPosition> {
        let mut core = self.core.lock();
        self.evaluate_locked(&mut core)
    }

    fn evaluate_locked(&self, core: &mut Core<O>) -> Option<ActuatorPosition> {
        match core.control.evaluate() {
            Ok(Some(direction)) => {
                core.motor.drive(direction);
                core.monitor.arm();
                self.timer.start(self.config.poll_period());
                info!(direction = direction.as_str(), "driving actuator");
                Some(direction)
            }
            Ok(None) => None,
            Err(err) => {
                debug!("evaluation skipped: {err}");
                None
            }
        }
    }

    /// Timer expiry. Returns the cycle the worker should run, if any.
    pub fn on_timer_fired(&self) -> Option<CycleTicket> {
        let mut core = self.core.lock();
        let ticket = core.monitor.timer_fired();
        if ticket.is_none() && core.monitor.is_active() {
            debug!("stall timer fired with a cycle pending; absorbed");
        }
        ticket
    }

    /// The work queue refused a ticket from [`Actuator::on_timer_fired`].
    /// Restarts the timer so the current drive keeps being polled.
    pub fn cycle_dropped(&self, ticket: CycleTicket) {
        let mut core = self.core.lock();
        if core.monitor.cycle_dropped(ticket) {
            self.timer.start(self.config.poll_period());
            warn!(generation = ticket.generation(), "stall cycle not queued; timer restarted");
        }
    }

    /// One sense-and-decide cycle. Runs on the worker, never in timer context.
    pub fn run_stall_cycle(&self, ticket: CycleTicket) -> StallDecision {
        let sample = self.sense.lock().read();
        match &sample {
            Ok(reading) => info!(?reading, "stall check"),
            Err(err) => warn!("stall check inconclusive: {err}"),
        }

        let mut core = self.core.lock();
        let decision = core.monitor.complete(ticket, sample);
        match decision {
            StallDecision::Halt => {
                core.motor.halt();
                info!(
                    position = core.control.position().as_str(),
                    "Stall detected."
                );
            }
            StallDecision::Rearm => self.timer.start(self.config.poll_period()),
            StallDecision::Superseded => {
                debug!(generation = ticket.generation(), "stale stall cycle discarded");
            }
        }
        decision
    }

    /// Halt the motor and stop polling.
    pub fn shutdown(&self) {
        let mut core = self.core.lock();
        core.motor.halt();
        core.monitor.disarm();
        self.timer.stop();
        info!("actuator halted for shutdown");
    }

    pub fn mode(&self) -> SystemMode {
        self.core.lock().control.mode()
    }

    pub fn current_temperature(&self) -> Option<i16> {
        self.core.lock().control.current_temperature()
    }

    pub fn heating_setpoint(&self) -> i16 {
        self.core.lock().control.heating_setpoint()
    }

    pub fn position(&self) -> ActuatorPosition {
        self.core.lock().control.position()
    }

    pub fn thermostat_state(&self) -> ThermostatState {
        *self.core.lock().control.state()
    }

    pub fn status(&self) -> ActuatorStatus {
        let core = self.core.lock();
        let state = core.control.state();
        ActuatorStatus {
            mode: state.mode,
            current_temperature: state.current_temperature,
            heating_setpoint: state.heating_setpoint,
            position: core.control.position(),
            motor: core.motor.pattern(),
            monitor: core.monitor.state(),
            cycle_in_flight: core.monitor.cycle_in_flight(),
        }
    }

    pub fn log_status(&self) {
        log_thermostat_status(&self.thermostat_state());
    }
}
