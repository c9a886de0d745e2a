use anyhow::{anyhow, bail, Context, Error, Result};

pub use speedy::Endianness;
pub use speedy::Readable;
pub use speedy::Writable;

/// Every number on the link is little-endian
pub const WIRE: Endianness = Endianness::LittleEndian;

/// Largest payload a frame can carry (length is a single byte)
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Command codes understood on the pilot link
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageCode {
    FlightCommand = 0x10,
    Telemetry = 0x11,
    DebugVariables = 0x12,
    SaveCalibration = 0x20,
    LoadCalibration = 0x21,
    RequestRatePid = 0x22,
    RequestAnglePid = 0x23,
    RequestFusionBeta = 0x24,
    SendFusionBeta = 0x25,
    SendRatePid = 0x26,
    SendAnglePid = 0x27,
    StartDiagnosticMode = 0x28,
    StartSensorSelfCalibration = 0x29,
}

impl TryFrom<u8> for MessageCode {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        use MessageCode::*;
        let code = match code {
            0x10 => FlightCommand,
            0x11 => Telemetry,
            0x12 => DebugVariables,
            0x20 => SaveCalibration,
            0x21 => LoadCalibration,
            0x22 => RequestRatePid,
            0x23 => RequestAnglePid,
            0x24 => RequestFusionBeta,
            0x25 => SendFusionBeta,
            0x26 => SendRatePid,
            0x27 => SendAnglePid,
            0x28 => StartDiagnosticMode,
            0x29 => StartSensorSelfCalibration,
            other => bail!("Unknown command code {:#04x}", other),
        };
        Ok(code)
    }
}

/// Fixed-layout payload carried by a frame
pub trait Payload: for<'a> Readable<'a, Endianness> + Writable<Endianness> {
    /// Encoded size in bytes
    const SIZE: usize;
}

/// One request/response unit: command code, payload and its length
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramedMessage {
    command: u8,
    payload: Vec<u8>,
}

impl FramedMessage {
    pub fn new(command: u8, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            bail!("Payload of {} bytes does not fit in a frame", payload.len());
        }
        Ok(Self {
            command,
            payload,
        })
    }

    /// Frame without payload
    pub fn empty(code: MessageCode) -> Self {
        Self {
            command: code as u8,
            payload: Vec::new(),
        }
    }

    pub fn encode<P: Payload>(code: MessageCode, payload: &P) -> Result<Self> {
        let payload = payload.write_to_vec_with_ctx(WIRE).context("Encoding payload")?;
        Self::new(code as u8, payload)
    }

    /// Decode the payload, which must have exactly the size `P` expects
    pub fn decode<P: Payload>(&self) -> Result<P> {
        if self.payload.len() != P::SIZE {
            bail!(
                "Frame {:#04x} carries {} bytes, expected {}",
                self.command,
                self.payload.len(),
                P::SIZE
            );
        }
        P::read_from_buffer_with_ctx(WIRE, &self.payload).context("Decoding payload")
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn code(&self) -> Result<MessageCode> {
        MessageCode::try_from(self.command)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// `[command][length][payload]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.payload.len() + 2);
        bytes.push(self.command);
        bytes.push(self.payload.len() as u8);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&command, rest) = bytes.split_first().ok_or_else(|| anyhow!("Empty frame"))?;
        let (&length, payload) = rest.split_first().ok_or_else(|| anyhow!("Frame without length"))?;
        if payload.len() != length as usize {
            bail!("Frame announces {} bytes but carries {}", length, payload.len());
        }
        Self::new(command, payload.to_vec())
    }
}

/// Gain triple of one PID axis
#[derive(Readable, Writable, Copy, Clone, Debug, Default, PartialEq)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Payload for Gains {
    const SIZE: usize = 3 * 8;
}

/// Three gain triples sent as 9 consecutive doubles.
/// Rate bank: roll, pitch, yaw. Angle bank: roll, pitch, force.
#[derive(Readable, Writable, Copy, Clone, Debug, Default, PartialEq)]
pub struct GainBank {
    pub first: Gains,
    pub second: Gains,
    pub third: Gains,
}

impl Payload for GainBank {
    const SIZE: usize = 3 * Gains::SIZE;
}

impl From<[Gains; 3]> for GainBank {
    fn from(gains: [Gains; 3]) -> Self {
        Self {
            first: gains[0],
            second: gains[1],
            third: gains[2],
        }
    }
}

impl From<GainBank> for [Gains; 3] {
    fn from(bank: GainBank) -> Self {
        [bank.first, bank.second, bank.third]
    }
}

#[derive(Readable, Writable, Copy, Clone, Debug, Default, PartialEq)]
pub struct Beta {
    pub beta: f64,
}

impl Payload for Beta {
    const SIZE: usize = 8;
}

#[derive(Readable, Writable, Copy, Clone, Debug, Default, PartialEq)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Payload for Vector {
    const SIZE: usize = 3 * 8;
}

/// Four numeric fields, either attitude or motor values
#[derive(Readable, Writable, Copy, Clone, Debug, Default, PartialEq)]
pub struct Quad {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Payload for Quad {
    const SIZE: usize = 4 * 8;
}

impl From<[f64; 4]> for Quad {
    fn from(v: [f64; 4]) -> Self {
        Self {
            a: v[0],
            b: v[1],
            c: v[2],
            d: v[3],
        }
    }
}

impl From<Quad> for [f64; 4] {
    fn from(q: Quad) -> Self {
        [q.a, q.b, q.c, q.d]
    }
}

/// Pilot command: `'A'` attitude-arm or `'M'` motor-arm, plus four fields
#[derive(Readable, Writable, Copy, Clone, Debug, Default, PartialEq)]
pub struct FlightFrame {
    pub tag: u8,
    pub fields: Quad,
}

impl Payload for FlightFrame {
    const SIZE: usize = 1 + Quad::SIZE;
}

pub mod status {
    pub const ARMED: u8 = 0b001;
    pub const HEARTBEAT: u8 = 0b010;
    pub const DIAGNOSTIC: u8 = 0b100;
    /// A frame was received since the previous report
    pub const LINK: u8 = 0b1000;
}

#[derive(Readable, Writable, Copy, Clone, Debug, Default, PartialEq)]
pub struct Telemetry {
    pub orientation: Vector,
    pub motors: Quad,
    /// Bits from [`status`]
    pub status: u8,
}

impl Payload for Telemetry {
    const SIZE: usize = Vector::SIZE + Quad::SIZE + 1;
}

#[derive(Readable, Writable, Copy, Clone, Debug, Default, PartialEq)]
pub struct DebugVariables {
    pub orientation: Vector,
    pub set_point: Vector,
    pub correction: Vector,
    pub arm_state: u8,
}

impl Payload for DebugVariables {
    const SIZE: usize = 3 * Vector::SIZE + 1;
}
