use std::{io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{
    sync::mpsc,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use thermovalve_common::{
    config::{ScriptedChange, SimulationStep},
    Actuator, AmbientSensor, AttributeStore, AttributeUpdate, CycleTicket, LocalAttributeStore,
    RuntimeConfig, StallTimer,
};

use crate::sim::{Plant, SharedPlant, SimAdc, SimMotorLines};

type HostActuator = Actuator<SimMotorLines, SimAdc, TokioStallTimer>;

const PLANT_STEP: Duration = Duration::from_millis(50);
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
enum TimerCommand {
    Start(Duration),
    Stop,
}

/// One-shot stall timer backed by a tokio task.
pub struct TokioStallTimer {
    commands: mpsc::UnboundedSender<TimerCommand>,
}

impl TokioStallTimer {
    fn new() -> (Self, mpsc::UnboundedReceiver<TimerCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { commands }, rx)
    }
}

impl StallTimer for TokioStallTimer {
    fn start(&self, period: Duration) {
        if self.commands.send(TimerCommand::Start(period)).is_err() {
            warn!("stall timer task is gone; cannot arm");
        }
    }

    fn stop(&self) {
        if self.commands.send(TimerCommand::Stop).is_err() {
            warn!("stall timer task is gone; cannot stop");
        }
    }
}

struct ConfigStore {
    runtime_path: PathBuf,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("THERMOVALVE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.thermovalve"));

        Self {
            runtime_path: data_dir.join("runtime.json"),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.runtime_path).await {
            Ok(raw) => RuntimeConfig::from_json(&raw)
                .with_context(|| format!("invalid config at {}", self.runtime_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

struct Host {
    actuator: Arc<HostActuator>,
    plant: SharedPlant,
    attributes: Arc<LocalAttributeStore>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let host = start(&runtime)?;
    info!("actuator controller running; ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    host.actuator.shutdown();

    let snapshot = host.attributes.snapshot(runtime.actuator.endpoint);
    let opening = host.plant.lock().opening();
    info!(?snapshot, opening, "controller stopped");
    Ok(())
}

fn start(runtime: &RuntimeConfig) -> anyhow::Result<Host> {
    let plant = Plant::shared(&runtime.simulation);
    let attributes = Arc::new(LocalAttributeStore::new(
        runtime.actuator.endpoint,
        runtime
            .thermostat
            .initial_state(runtime.simulation.initial_temperature),
    ));

    let (timer, timer_commands) = TokioStallTimer::new();
    let actuator = Arc::new(
        Actuator::init(
            runtime.actuator.clone(),
            SimMotorLines::new(plant.clone()),
            SimAdc::motor_current(plant.clone()),
            timer,
            attributes.as_ref(),
        )
        .context("actuator initialization failed")?,
    );
    let ambient = AmbientSensor::init(
        SimAdc::ambient(plant.clone(), &runtime.ambient),
        runtime.ambient.clone(),
    )
    .context("ambient sensor initialization failed")?;

    // Capacity 1: at most one sense-and-decide cycle queued.
    let (work_tx, work_rx) = mpsc::channel(1);
    spawn_stall_timer(actuator.clone(), timer_commands, work_tx);
    spawn_stall_worker(actuator.clone(), work_rx);
    spawn_plant_loop(plant.clone());
    spawn_ambient_loop(actuator.clone(), attributes.clone(), ambient);
    spawn_reevaluate_loop(actuator.clone());
    spawn_status_loop(actuator.clone());
    spawn_scripted_changes(
        actuator.clone(),
        attributes.clone(),
        runtime.simulation.steps.clone(),
    );

    Ok(Host {
        actuator,
        plant,
        attributes,
    })
}

fn notify(actuator: &HostActuator, attributes: &LocalAttributeStore, update: AttributeUpdate) {
    attributes.write_and_notify(update, |endpoint, attribute_id, raw| {
        actuator.handle_attribute_change(endpoint, attribute_id, raw)
    });
}

fn spawn_stall_timer(
    actuator: Arc<HostActuator>,
    mut commands: mpsc::UnboundedReceiver<TimerCommand>,
    work: mpsc::Sender<CycleTicket>,
) {
    tokio::spawn(async move {
        let mut deadline: Option<Instant> = None;

        loop {
            let pending = deadline;
            let expiry = async move {
                match pending {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(TimerCommand::Start(period)) => deadline = Some(Instant::now() + period),
                    Some(TimerCommand::Stop) => deadline = None,
                    None => break,
                },
                () = expiry => {
                    deadline = None;
                    if let Some(ticket) = actuator.on_timer_fired() {
                        if work.try_send(ticket).is_err() {
                            debug!("stall work queue full; ticket not queued");
                            actuator.cycle_dropped(ticket);
                        }
                    }
                }
            }
        }
    });
}

fn spawn_stall_worker(actuator: Arc<HostActuator>, mut work: mpsc::Receiver<CycleTicket>) {
    tokio::spawn(async move {
        while let Some(ticket) = work.recv().await {
            let decision = actuator.run_stall_cycle(ticket);
            debug!(?decision, "stall cycle complete");
        }
    });
}

fn spawn_plant_loop(plant: SharedPlant) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PLANT_STEP);
        loop {
            interval.tick().await;
            plant.lock().step(PLANT_STEP);
        }
    });
}

fn spawn_ambient_loop(
    actuator: Arc<HostActuator>,
    attributes: Arc<LocalAttributeStore>,
    mut sensor: AmbientSensor<SimAdc>,
) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_millis(sensor.sample_interval_ms()));
        loop {
            interval.tick().await;
            match sensor.measure_update() {
                Ok(update) => notify(&actuator, &attributes, update),
                Err(err) => warn!("ambient temperature sample failed: {err}"),
            }
        }
    });
}

fn spawn_reevaluate_loop(actuator: Arc<HostActuator>) {
    let interval_ms = actuator.config().reevaluate_interval_ms;
    if interval_ms == 0 {
        return;
    }

    tokio::spawn(async move {
        let period = Duration::from_millis(interval_ms);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            interval.tick().await;
            actuator.reevaluate();
        }
    });
}

fn spawn_status_loop(actuator: Arc<HostActuator>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATUS_LOG_INTERVAL);
        loop {
            interval.tick().await;
            match serde_json::to_string(&actuator.status()) {
                Ok(body) => info!(status = %body, "actuator status"),
                Err(err) => warn!("actuator status serialization failed: {err}"),
            }
        }
    });
}

fn spawn_scripted_changes(
    actuator: Arc<HostActuator>,
    attributes: Arc<LocalAttributeStore>,
    steps: Vec<SimulationStep>,
) {
    if steps.is_empty() {
        return;
    }

    tokio::spawn(async move {
        let started = Instant::now();
        for step in steps {
            sleep_until(started + Duration::from_millis(step.after_ms)).await;
            let update = match step.change {
                ScriptedChange::SystemMode(mode) => AttributeUpdate::SystemMode(mode),
                ScriptedChange::HeatingSetpoint(value) => AttributeUpdate::HeatingSetpoint(value),
            };
            info!(?update, after_ms = step.after_ms, "applying scripted attribute change");
            notify(&actuator, &attributes, update);
        }
    });
}

#[cfg(test)]
mod tests {
    use thermovalve_common::{
        ActuatorPosition, MonitorState, MotorPattern, SimulationConfig, SystemMode,
    };

    use super::*;

    fn runtime(travel_time_ms: u64) -> RuntimeConfig {
        RuntimeConfig {
            simulation: SimulationConfig {
                travel_time_ms,
                steps: Vec::new(),
                ..SimulationConfig::default()
            },
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn timer_commands_without_task_are_dropped() {
        let (timer, commands) = TokioStallTimer::new();
        drop(commands);

        timer.start(Duration::from_millis(200));
        timer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stall_at_end_of_travel_halts_motor() {
        let host = start(&runtime(1_000)).unwrap();

        let status = host.actuator.status();
        assert_eq!(status.motor, MotorPattern::DriveOpen);
        assert_eq!(status.monitor, MonitorState::Active);

        tokio::time::sleep(Duration::from_secs(3)).await;

        let status = host.actuator.status();
        assert_eq!(status.motor, MotorPattern::Halt);
        assert_eq!(status.monitor, MonitorState::Idle);
        assert_eq!(status.position, ActuatorPosition::Open);
        assert!(host.plant.lock().is_fully_open());
    }

    #[tokio::test(start_paused = true)]
    async fn setpoint_drop_closes_valve_until_stall() {
        let host = start(&runtime(1_000)).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        notify(
            &host.actuator,
            &host.attributes,
            AttributeUpdate::HeatingSetpoint(1800),
        );
        assert_eq!(host.actuator.position(), ActuatorPosition::Closed);
        assert_eq!(host.actuator.status().motor, MotorPattern::DriveClosed);

        tokio::time::sleep(Duration::from_secs(3)).await;

        let status = host.actuator.status();
        assert_eq!(status.motor, MotorPattern::Halt);
        assert_eq!(status.monitor, MonitorState::Idle);
        assert!(host.plant.lock().is_fully_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn mode_off_from_store_closes_valve() {
        let host = start(&runtime(1_000)).unwrap();

        notify(
            &host.actuator,
            &host.attributes,
            AttributeUpdate::SystemMode(SystemMode::Off),
        );

        assert_eq!(host.actuator.mode(), SystemMode::Off);
        assert_eq!(host.actuator.position(), ActuatorPosition::Closed);
    }
}
