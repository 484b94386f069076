use core::convert::TryInto;
use std::{
    sync::{mpsc, Arc, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    gpio::{ADCPin, AnyOutputPin, Gpio34, Gpio35, Output, PinDriver},
    prelude::Peripherals,
};
use esp_idf_svc::{
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    timer::{EspTaskTimerService, EspTimer},
};
use log::{debug, info, warn};

use thermovalve_common::{
    motor::MOTOR_LINES, Actuator, AdcChannel, AmbientSensor, AttributeUpdate,
    ConversionUnsupported, CycleTicket, InitError, LocalAttributeStore, OutputLines,
    RuntimeConfig, SampleError, StallTimer,
};

const NVS_NAMESPACE: &str = "thermovalve";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
/// H-bridge inputs, in motor line order.
const MOTOR_PINS: [i32; MOTOR_LINES] = [16, 17, 18, 19];
/// Full-scale input at 11 dB attenuation with the default 12-bit width.
const ADC_FULL_SCALE_MV: i32 = 3_100;
const ADC_MAX_COUNT: i32 = 4_095;
const MAIN_LOOP_PERIOD: Duration = Duration::from_secs(1);

type SharedAdc = &'static AdcDriver<'static, ADC1>;
type DeviceActuator = Actuator<GpioMotorLines, OneshotAdc<Gpio34>, EspStallTimer>;

struct GpioMotorLines {
    pins: Vec<PinDriver<'static, AnyOutputPin, Output>>,
}

impl GpioMotorLines {
    fn take(pins: &[i32]) -> Self {
        let mut drivers = Vec::with_capacity(pins.len());
        for &pin in pins {
            match unsafe { PinDriver::output(AnyOutputPin::new(pin)) } {
                Ok(driver) => drivers.push(driver),
                Err(err) => warn!("motor output GPIO{pin} unavailable: {err}"),
            }
        }
        Self { pins: drivers }
    }
}

impl OutputLines for GpioMotorLines {
    fn is_ready(&self) -> bool {
        self.pins.len() == MOTOR_LINES
    }

    fn configure(&mut self) -> Result<(), InitError> {
        // PinDriver::output already switched the pads to push-pull outputs.
        Ok(())
    }

    fn set_output(&mut self, line: usize, level: bool) {
        let Some(pin) = self.pins.get_mut(line) else {
            warn!("write to unknown motor line {line}");
            return;
        };
        if let Err(err) = pin.set_level(level.into()) {
            warn!("failed to drive motor line {line}: {err}");
        }
    }
}

struct OneshotAdc<P: ADCPin<Adc = ADC1>> {
    name: &'static str,
    channel_id: u8,
    adc: SharedAdc,
    channel: Option<AdcChannelDriver<'static, P, SharedAdc>>,
    pin: Option<P>,
}

impl<P: ADCPin<Adc = ADC1>> OneshotAdc<P> {
    fn new(adc: SharedAdc, pin: P, channel_id: u8) -> Self {
        Self {
            name: "adc1",
            channel_id,
            adc,
            channel: None,
            pin: Some(pin),
        }
    }
}

impl<P: ADCPin<Adc = ADC1>> AdcChannel for OneshotAdc<P> {
    fn name(&self) -> &str {
        self.name
    }

    fn channel_id(&self) -> u8 {
        self.channel_id
    }

    fn is_ready(&self) -> bool {
        self.channel.is_some() || self.pin.is_some()
    }

    fn setup(&mut self) -> Result<(), InitError> {
        let Some(pin) = self.pin.take() else {
            return Ok(());
        };
        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        let channel = AdcChannelDriver::new(self.adc, pin, &config).map_err(|err| {
            InitError::ChannelSetup {
                channel: self.channel_id,
                code: err.code(),
            }
        })?;
        self.channel = Some(channel);
        Ok(())
    }

    fn is_differential(&self) -> bool {
        false
    }

    fn read_raw(&mut self) -> Result<u16, SampleError> {
        let channel = self
            .channel
            .as_mut()
            .ok_or(SampleError::Sequence(esp_idf_svc::sys::ESP_ERR_INVALID_STATE))?;
        self.adc
            .read_raw(channel)
            .map_err(|err| SampleError::Read(err.code()))
    }

    fn raw_to_millivolts(&self, raw: i32) -> Result<i32, ConversionUnsupported> {
        if !(0..=ADC_MAX_COUNT).contains(&raw) {
            return Err(ConversionUnsupported);
        }
        Ok(raw * ADC_FULL_SCALE_MV / ADC_MAX_COUNT)
    }
}

/// One-shot stall timer on the esp_timer task.
struct EspStallTimer {
    timer: Mutex<EspTimer<'static>>,
}

impl StallTimer for EspStallTimer {
    fn start(&self, period: Duration) {
        let Ok(timer) = self.timer.lock() else {
            warn!("stall timer lock poisoned; cannot arm");
            return;
        };
        if let Err(err) = timer.after(period) {
            warn!("failed to arm stall timer: {err}");
        }
    }

    fn stop(&self) {
        if let Ok(timer) = self.timer.lock() {
            if let Err(err) = timer.cancel() {
                warn!("failed to cancel stall timer: {err}");
            }
        }
    }
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(RuntimeConfig::from_json(value.as_bytes())?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let nvs_store = NvsStore {
        partition: EspDefaultNvsPartition::take()?,
    };
    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    info!(
        "NVS config loaded: endpoint={}, stall_threshold={}mV, poll={}ms",
        runtime.actuator.endpoint,
        runtime.actuator.stall_threshold_mv,
        runtime.actuator.poll_period_ms,
    );

    let Peripherals { adc1, pins, .. } = Peripherals::take()?;
    let adc: SharedAdc = Box::leak(Box::new(
        AdcDriver::new(adc1).context("failed to take ADC1")?,
    ));
    info!("motor outputs on GPIO{MOTOR_PINS:?}, current sense on GPIO34");

    let attributes = Arc::new(LocalAttributeStore::new(
        runtime.actuator.endpoint,
        runtime.thermostat.initial_state(None),
    ));

    // The timer is created before the actuator it calls back into.
    let slot: Arc<OnceLock<Arc<DeviceActuator>>> = Arc::new(OnceLock::new());
    let (work_tx, work_rx) = mpsc::sync_channel::<CycleTicket>(1);

    let timer_service = EspTaskTimerService::new()?;
    let timer = {
        let slot = slot.clone();
        timer_service.timer(move || {
            let Some(actuator) = slot.get() else {
                return;
            };
            if let Some(ticket) = actuator.on_timer_fired() {
                if work_tx.try_send(ticket).is_err() {
                    debug!("stall work queue full; ticket not queued");
                    actuator.cycle_dropped(ticket);
                }
            }
        })?
    };

    let actuator = Arc::new(
        Actuator::init(
            runtime.actuator.clone(),
            GpioMotorLines::take(&MOTOR_PINS),
            OneshotAdc::new(adc, pins.gpio34, 6),
            EspStallTimer {
                timer: Mutex::new(timer),
            },
            attributes.as_ref(),
        )
        .context("actuator initialization failed")?,
    );
    slot.set(actuator.clone())
        .map_err(|_| anyhow!("actuator registered twice"))?;

    let ambient = AmbientSensor::init(
        OneshotAdc::<Gpio35>::new(adc, pins.gpio35, 7),
        runtime.ambient.clone(),
    )
    .context("ambient sensor initialization failed")?;

    spawn_stall_worker(actuator.clone(), work_rx)?;
    spawn_ambient_loop(actuator.clone(), attributes.clone(), ambient)?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let reevaluate_every = Duration::from_millis(runtime.actuator.reevaluate_interval_ms);
    let mut last_reevaluate_ms = monotonic_ms();
    loop {
        feed_watchdog();
        let now_ms = monotonic_ms();
        if !reevaluate_every.is_zero()
            && now_ms.saturating_sub(last_reevaluate_ms) >= reevaluate_every.as_millis() as u64
        {
            last_reevaluate_ms = now_ms;
            actuator.reevaluate();
        }
        thread::sleep(MAIN_LOOP_PERIOD);
    }
}

fn spawn_stall_worker(
    actuator: Arc<DeviceActuator>,
    work: mpsc::Receiver<CycleTicket>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("stall-worker".into())
        .stack_size(6 * 1024)
        .spawn(move || {
            for ticket in work {
                let decision = actuator.run_stall_cycle(ticket);
                debug!("stall cycle complete: {decision:?}");
            }
        })
        .context("failed to spawn stall worker thread")?;
    Ok(())
}

fn spawn_ambient_loop(
    actuator: Arc<DeviceActuator>,
    attributes: Arc<LocalAttributeStore>,
    mut sensor: AmbientSensor<OneshotAdc<Gpio35>>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("ambient".into())
        .stack_size(6 * 1024)
        .spawn(move || {
            let period = Duration::from_millis(sensor.sample_interval_ms());
            loop {
                match sensor.measure_update() {
                    Ok(update) => notify(&actuator, &attributes, update),
                    Err(err) => warn!("ambient temperature sample failed: {err}"),
                }
                thread::sleep(period);
            }
        })
        .context("failed to spawn ambient thread")?;
    Ok(())
}

fn notify(actuator: &DeviceActuator, attributes: &LocalAttributeStore, update: AttributeUpdate) {
    attributes.write_and_notify(update, |endpoint, attribute_id, raw| {
        actuator.handle_attribute_change(endpoint, attribute_id, raw)
    });
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
