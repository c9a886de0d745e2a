use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use anyhow::Result;
use message::{FlightFrame, FramedMessage, MessageCode};

use crate::arbiter::{CommandArbiter, Directive};
use crate::attitude::AttitudeEstimator;
use crate::calibration::CalibrationStore;
use crate::config::{QuadParameters, SensorScale};
use crate::esc::Actuator;
use crate::link::Link;
use crate::mixer::MotorMixer;
use crate::pid::ControllerBank;
use crate::sensor::SensorFeed;
use crate::storage::Storage;
use crate::telemetry::{Report, TelemetryScheduler, Variables};
use crate::types::{Angles, ArmState, FlightCommand, ImuSample, Mode, MotorOutputs, RawSample, SensorOffsets};
use crate::watchdog::{SoftWatchdog, Watchdog};

/// Outcome of one flight tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    pub state: ArmState,
    pub directive: Directive,
    /// Outputs to apply to the motors, `None` when nothing must be driven
    pub drive: Option<MotorOutputs>,
    pub orientation: Angles,
}

/// Flight state owned by the control loop
pub struct FlightCore {
    bank: ControllerBank,
    estimator: AttitudeEstimator,
    arbiter: CommandArbiter,
    mixer: MotorMixer,
    scale: SensorScale,
    offsets: SensorOffsets,
    mode: Mode,
    sample: Option<ImuSample>,
    last_tick_ms: Option<u64>,
    orientation: Angles,
    set_point: Angles,
    correction: Angles,
    motors: MotorOutputs,
}

impl FlightCore {
    pub fn new(params: &QuadParameters) -> Self {
        Self {
            bank: ControllerBank::new(&params.control),
            estimator: AttitudeEstimator::new(params.estimator.beta),
            arbiter: CommandArbiter::new(&params.failsafe),
            mixer: MotorMixer,
            scale: params.sensor,
            offsets: SensorOffsets::default(),
            mode: Mode::default(),
            sample: None,
            last_tick_ms: None,
            orientation: Angles::LEVEL,
            set_point: Angles::LEVEL,
            correction: Angles::LEVEL,
            motors: [0.0; 4],
        }
    }

    pub fn bank(&self) -> &ControllerBank {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut ControllerBank {
        &mut self.bank
    }

    pub fn estimator(&self) -> &AttitudeEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut AttitudeEstimator {
        &mut self.estimator
    }

    pub fn offsets(&self) -> SensorOffsets {
        self.offsets
    }

    pub fn set_offsets(&mut self, offsets: SensorOffsets) {
        self.offsets = offsets;
    }

    pub fn scale(&self) -> &SensorScale {
        &self.scale
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if mode != self.mode {
            log::info!("Mode {:?} -> {:?}", self.mode, mode);
            self.mode = mode;
        }
    }

    pub fn arm_state(&self) -> ArmState {
        self.arbiter.state()
    }

    pub fn orientation(&self) -> Angles {
        self.orientation
    }

    /// Last outputs applied to the motors
    pub fn motors(&self) -> MotorOutputs {
        self.motors
    }

    /// Record the motors as idle. Returns the outputs to drive when they
    /// were not idle already.
    pub fn idle(&mut self) -> Option<MotorOutputs> {
        const IDLE: MotorOutputs = [0.0; 4];
        if self.motors == IDLE {
            return None;
        }
        self.motors = IDLE;
        Some(IDLE)
    }

    pub fn report(&self, heartbeat: bool, link: bool) -> Report {
        Report {
            orientation: self.orientation,
            motors: self.motors,
            arm_state: self.arm_state(),
            mode: self.mode,
            heartbeat,
            link,
        }
    }

    pub fn variables(&self) -> Variables {
        Variables {
            orientation: self.orientation,
            set_point: self.set_point,
            correction: self.correction,
            arm_state: self.arm_state(),
        }
    }

    /// Run one control step at `now_ms`. Without a new sample the previous
    /// one is reused; until a first sample arrives no correction is computed.
    pub fn tick(&mut self, now_ms: u64, raw: Option<RawSample>, command: Option<FlightCommand>) -> TickReport {
        let dt = self.last_tick_ms.map_or(0.0, |last| now_ms.saturating_sub(last) as f64 / 1000.0);
        self.last_tick_ms = Some(now_ms);

        if let Some(raw) = raw {
            self.sample = Some(self.scale.convert(&raw, &self.offsets));
        }
        if command.is_some() && self.mode == Mode::ShowVariables {
            self.set_mode(Mode::Flight);
        }

        let was_armed = self.arbiter.state().is_armed();
        let directive = self.arbiter.tick(now_ms, command);
        let state = self.arbiter.state();
        if state.is_armed() && !was_armed {
            self.bank.reset();
        }

        if let Some(sample) = self.sample {
            self.orientation = self.estimator.update(&sample, dt);
        }

        let drive = match directive {
            Directive::Idle => None,
            Directive::Attitude {
                throttle,
                set_point,
                ..
            } => {
                self.set_point = set_point;
                self.sample.map(|sample| {
                    let correction = self.bank.correction(
                        &set_point,
                        &self.orientation,
                        &sample.rates(),
                        self.estimator.vertical_g(&sample),
                        dt,
                    );
                    self.correction = correction.axes;
                    self.mixer.mix(throttle + correction.thrust, &correction.axes)
                })
            },
            Directive::Motors {
                outputs,
                ..
            } => Some(self.mixer.limit(outputs)),
        };
        if let Some(outputs) = drive {
            self.motors = outputs;
        }

        TickReport {
            state,
            directive,
            drive,
            orientation: self.orientation,
        }
    }
}

/// Decode a flight command frame, `None` for unknown tags
fn flight_command(message: &FramedMessage) -> Result<Option<FlightCommand>> {
    let frame: FlightFrame = message.decode()?;
    Ok(FlightCommand::from_fields(frame.tag, frame.fields.into()))
}

/// Control loop: pilot link, calibration protocol, flight core and motors
pub struct FlightController<S, L, A> {
    core: FlightCore,
    store: CalibrationStore<S>,
    link: L,
    actuator: A,
    sensors: Receiver<RawSample>,
    watchdog: SoftWatchdog,
    telemetry: TelemetryScheduler,
    /// Frames were received since the last telemetry report
    link_active: bool,
    tick: Duration,
}

impl<S: Storage, L: Link, A: Actuator> FlightController<S, L, A> {
    pub fn new(params: &QuadParameters, storage: S, link: L, actuator: A, sensors: Receiver<RawSample>) -> Self {
        Self {
            core: FlightCore::new(params),
            store: CalibrationStore::new(storage, params.calibration.clone()),
            link,
            actuator,
            sensors,
            watchdog: SoftWatchdog::new(params.calibration.watchdog()),
            telemetry: TelemetryScheduler::new(params.runtime.telemetry_ms),
            link_active: false,
            tick: Duration::from_millis(params.runtime.tick_ms),
        }
    }

    pub fn core(&self) -> &FlightCore {
        &self.core
    }

    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.store.read(&mut self.core);
        let start = Instant::now();
        let mut next = start;

        log::info!("Flight controller started");
        while !shutdown.load(Ordering::Relaxed) {
            let timeout = next.saturating_duration_since(Instant::now());
            self.link.wait(timeout)?;
            let now = Instant::now();
            // Frames arriving early stay queued until the tick
            if now < next {
                continue;
            }
            next += self.tick;
            if next < now {
                next = now + self.tick;
            }
            self.step(now.duration_since(start).as_millis() as u64);
        }

        log::info!("Flight controller stopped");
        Ok(())
    }

    /// Handle pending frames. Only the newest flight command frame is
    /// decoded, older ones are superseded.
    fn poll_link(&mut self) -> Option<FlightCommand> {
        let mut newest = None;
        loop {
            let message = match self.link.receive() {
                Ok(Some(message)) => {
                    self.link_active = true;
                    message
                },
                Ok(None) => break,
                Err(e) => {
                    log::error!("{:#}", e);
                    break;
                },
            };
            if message.command() == MessageCode::FlightCommand as u8 {
                newest = Some(message);
            } else if let Some(response) =
                self.store.dispatch(&message, &mut self.core, &mut self.sensors, &mut self.watchdog)
            {
                self.send(&response);
            }
        }

        match flight_command(&newest?) {
            Ok(Some(command)) => Some(command),
            Ok(None) => {
                log::debug!("Ignoring flight command with unknown tag");
                None
            },
            Err(e) => {
                log::debug!("Ignoring flight command: {:#}", e);
                None
            },
        }
    }

    fn send(&mut self, message: &FramedMessage) {
        if let Err(e) = self.link.send(message) {
            log::warn!("{:#}", e);
        }
    }

    #[cfg_attr(feature = "profiling", function_timer::time("flight_controller"))]
    pub fn step(&mut self, now_ms: u64) -> TickReport {
        self.watchdog.feed();
        let command = self.poll_link();
        let report = self.core.tick(now_ms, self.sensors.latest(), command);

        let drive = match report.drive {
            Some(outputs) => Some(outputs),
            None if !report.state.is_armed() => self.core.idle(),
            None => None,
        };
        if let Some(outputs) = drive {
            if let Err(e) = self.actuator.drive(&outputs) {
                log::error!("Cannot drive motors: {:#}", e);
            }
        }

        if let Some(heartbeat) = self.telemetry.poll(now_ms) {
            let link = std::mem::take(&mut self.link_active);
            match self.core.report(heartbeat, link).to_message() {
                Ok(message) => self.send(&message),
                Err(e) => log::error!("Cannot encode telemetry: {:#}", e),
            }
            if self.core.mode() == Mode::ShowVariables {
                match self.core.variables().to_message() {
                    Ok(message) => self.send(&message),
                    Err(e) => log::error!("Cannot encode variables: {:#}", e),
                }
            }
        }
        report
    }
}
