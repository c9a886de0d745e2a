//! Persistent tuning and the calibration protocol.
//!
//! Storage layout: one marker byte at offset 0 followed by two record slots.
//! The marker names the slot holding the valid record; anything else means
//! no record was ever written. A save fills the inactive slot and flips the
//! marker last, so losing power mid-save leaves the previous record in place.

use anyhow::{bail, Context, Error, Result};
use message::{Beta, FramedMessage, GainBank, Gains, MessageCode, WIRE};
use speedy::{Readable, Writable};

use crate::config::CalibrationParameters;
use crate::flight_controller::FlightCore;
use crate::sensor::{self, SensorFeed};
use crate::storage::Storage;
use crate::types::{Mode, SensorOffsets, Tunings};
use crate::watchdog::Watchdog;

pub const RECORD_SIZE: usize = 2 * 72 + 8 + 2 * 6;
const MARKER_OFFSET: usize = 0;
/// (marker, offset) of each record slot
const SLOTS: [(u8, usize); 2] = [(0x42, 1), (0x43, 1 + RECORD_SIZE)];

#[derive(Readable, Writable, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Triplet {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl From<[i16; 3]> for Triplet {
    fn from(v: [i16; 3]) -> Self {
        Self {
            x: v[0],
            y: v[1],
            z: v[2],
        }
    }
}

impl From<Triplet> for [i16; 3] {
    fn from(t: Triplet) -> Self {
        [t.x, t.y, t.z]
    }
}

/// Persisted tuning snapshot
#[derive(Readable, Writable, Clone, Copy, Debug, Default, PartialEq)]
pub struct CalibrationRecord {
    /// Roll, pitch, yaw rate gains
    pub rate: GainBank,
    /// Roll, pitch angle gains and force gains
    pub angle: GainBank,
    pub beta: f64,
    pub accel_offsets: Triplet,
    pub gyro_offsets: Triplet,
}

impl CalibrationRecord {
    pub fn capture(core: &FlightCore) -> Self {
        let offsets = core.offsets();
        Self {
            rate: gain_bank(core.bank().rate_tunings()),
            angle: gain_bank(core.bank().angle_tunings()),
            beta: core.estimator().beta(),
            accel_offsets: offsets.accel.into(),
            gyro_offsets: offsets.gyro.into(),
        }
    }

    pub fn apply(&self, core: &mut FlightCore) {
        core.bank_mut().set_rate_tunings(bank_tunings(self.rate));
        core.bank_mut().set_angle_tunings(bank_tunings(self.angle));
        core.estimator_mut().set_beta(self.beta);
        core.set_offsets(SensorOffsets {
            accel: self.accel_offsets.into(),
            gyro: self.gyro_offsets.into(),
        });
    }
}

fn bank_tunings(bank: GainBank) -> [Tunings; 3] {
    <[Gains; 3]>::from(bank).map(Tunings::from)
}

fn gain_bank(tunings: [Tunings; 3]) -> GainBank {
    GainBank::from(tunings.map(Gains::from))
}

/// Where the live tuning comes from after a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    Stored,
    Defaults,
}

/// Calibration protocol requests
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    Save,
    Load,
    RequestRatePid,
    RequestAnglePid,
    RequestFusionBeta,
    SendFusionBeta(f64),
    SendRatePid([Tunings; 3]),
    SendAnglePid([Tunings; 3]),
    StartDiagnosticMode,
    StartSensorSelfCalibration,
}

impl TryFrom<&FramedMessage> for Request {
    type Error = Error;

    fn try_from(message: &FramedMessage) -> Result<Self> {
        let code = message.code()?;
        let expect_empty = |request: Request| -> Result<Request> {
            if message.is_empty() {
                Ok(request)
            } else {
                bail!("{:?} carries an unexpected payload of {} bytes", code, message.len())
            }
        };
        match code {
            MessageCode::SaveCalibration => expect_empty(Request::Save),
            MessageCode::LoadCalibration => expect_empty(Request::Load),
            MessageCode::RequestRatePid => expect_empty(Request::RequestRatePid),
            MessageCode::RequestAnglePid => expect_empty(Request::RequestAnglePid),
            MessageCode::RequestFusionBeta => expect_empty(Request::RequestFusionBeta),
            MessageCode::SendFusionBeta => Ok(Request::SendFusionBeta(message.decode::<Beta>()?.beta)),
            MessageCode::SendRatePid => Ok(Request::SendRatePid(bank_tunings(message.decode()?))),
            MessageCode::SendAnglePid => Ok(Request::SendAnglePid(bank_tunings(message.decode()?))),
            MessageCode::StartDiagnosticMode => expect_empty(Request::StartDiagnosticMode),
            MessageCode::StartSensorSelfCalibration => expect_empty(Request::StartSensorSelfCalibration),
            MessageCode::FlightCommand | MessageCode::Telemetry | MessageCode::DebugVariables => {
                bail!("{:?} is not a calibration request", code)
            },
        }
    }
}

/// Owner of the persisted calibration record
pub struct CalibrationStore<S> {
    storage: S,
    params: CalibrationParameters,
}

impl<S: Storage> CalibrationStore<S> {
    pub fn new(storage: S, params: CalibrationParameters) -> Self {
        Self {
            storage,
            params,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn active_slot(&mut self) -> Result<Option<usize>> {
        let mut marker = [0u8];
        self.storage.read(MARKER_OFFSET, &mut marker).context("Reading calibration marker")?;
        Ok(SLOTS.iter().position(|(valid, _)| *valid == marker[0]))
    }

    /// The stored record, `None` when no valid record exists
    pub fn load(&mut self) -> Result<Option<CalibrationRecord>> {
        let Some(slot) = self.active_slot()? else {
            return Ok(None);
        };
        let mut buffer = [0u8; RECORD_SIZE];
        self.storage.read(SLOTS[slot].1, &mut buffer).context("Reading calibration record")?;
        CalibrationRecord::read_from_buffer_with_ctx(WIRE, &buffer)
            .map(Some)
            .context("Decoding calibration record")
    }

    /// Write `record` to the inactive slot, then commit it with the marker
    pub fn store(&mut self, record: &CalibrationRecord) -> Result<()> {
        let target = match self.active_slot()? {
            Some(0) => 1,
            _ => 0,
        };
        let (marker, offset) = SLOTS[target];
        let bytes = record.write_to_vec_with_ctx(WIRE).context("Encoding calibration record")?;
        self.storage.write(offset, &bytes).context("Writing calibration record")?;
        self.storage.write(MARKER_OFFSET, &[marker]).context("Committing calibration record")
    }

    /// Restore the stored tuning into `core`. Without a valid record the
    /// live tuning is left untouched.
    pub fn read(&mut self, core: &mut FlightCore) -> RecordSource {
        match self.load() {
            Ok(Some(record)) => {
                record.apply(core);
                log::info!("Loaded calibration");
                RecordSource::Stored
            },
            Ok(None) => {
                log::warn!("No valid calibration stored, keeping defaults");
                RecordSource::Defaults
            },
            Err(e) => {
                log::warn!("{:#}, keeping defaults", e);
                RecordSource::Defaults
            },
        }
    }

    /// Persist the live tuning. The watchdog is held off for the whole write.
    pub fn write(&mut self, core: &FlightCore, watchdog: &mut dyn Watchdog) -> Result<()> {
        let record = CalibrationRecord::capture(core);
        watchdog.disable();
        let result = self.store(&record);
        watchdog.enable(self.params.watchdog());
        result
    }

    /// Handle one protocol request. Returns the response to send, if any.
    /// Unknown or malformed requests are ignored.
    pub fn dispatch(
        &mut self,
        message: &FramedMessage,
        core: &mut FlightCore,
        sensors: &mut dyn SensorFeed,
        watchdog: &mut dyn Watchdog,
    ) -> Option<FramedMessage> {
        let request = match Request::try_from(message) {
            Ok(request) => request,
            Err(e) => {
                log::debug!("Ignoring frame {:#04x}: {:#}", message.command(), e);
                return None;
            },
        };
        log::debug!("Calibration request {:?}", request);

        match request {
            Request::Save => {
                match self.write(core, watchdog) {
                    Ok(()) => log::info!("Saved calibration"),
                    Err(e) => log::error!("Cannot save calibration: {:#}", e),
                }
                None
            },
            Request::Load => {
                self.read(core);
                None
            },
            Request::RequestRatePid => respond(
                MessageCode::RequestRatePid,
                &gain_bank(core.bank().rate_tunings()),
            ),
            Request::RequestAnglePid => respond(
                MessageCode::RequestAnglePid,
                &gain_bank(core.bank().angle_tunings()),
            ),
            Request::RequestFusionBeta => respond(
                MessageCode::RequestFusionBeta,
                &Beta {
                    beta: core.estimator().beta(),
                },
            ),
            Request::SendFusionBeta(beta) => {
                core.estimator_mut().set_beta(beta);
                None
            },
            Request::SendRatePid(tunings) => {
                core.bank_mut().set_rate_tunings(tunings);
                None
            },
            Request::SendAnglePid(tunings) => {
                core.bank_mut().set_angle_tunings(tunings);
                None
            },
            Request::StartDiagnosticMode => {
                core.set_mode(Mode::ShowVariables);
                None
            },
            Request::StartSensorSelfCalibration => {
                watchdog.enable(self.params.extended_watchdog());
                let scale = *core.scale();
                match sensor::self_calibrate(sensors, self.params.samples, &scale, self.params.sample_timeout()) {
                    Ok(offsets) => {
                        log::info!("Sensor offsets {:?}", offsets);
                        core.set_offsets(offsets);
                    },
                    Err(e) => log::error!("Sensor self-calibration failed: {:#}", e),
                }
                watchdog.enable(self.params.watchdog());
                None
            },
        }
    }
}

fn respond<P: message::Payload>(code: MessageCode, payload: &P) -> Option<FramedMessage> {
    FramedMessage::encode(code, payload)
        .inspect_err(|e| log::error!("Cannot encode {:?} response: {:#}", code, e))
        .ok()
}
