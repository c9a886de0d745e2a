use message::{Gains, Quad};
use serde::{Deserialize, Serialize};

/// Euler angles in radians, or angular rates in rad/s
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
pub struct Angles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Angles {
    pub const LEVEL: Angles = Angles {
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
    };

    pub fn new(roll: f64, pitch: f64, yaw: f64) -> Self {
        Self {
            roll,
            pitch,
            yaw,
        }
    }
}

impl From<Angles> for message::Vector {
    fn from(angles: Angles) -> Self {
        Self {
            x: angles.roll,
            y: angles.pitch,
            z: angles.yaw,
        }
    }
}

/// Proportional Integral Derivative gains, always handled as one unit
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
pub struct Tunings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Tunings {
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
        }
    }
}

impl From<Gains> for Tunings {
    fn from(gains: Gains) -> Self {
        Self::new(gains.kp, gains.ki, gains.kd)
    }
}

impl From<Tunings> for Gains {
    fn from(tunings: Tunings) -> Self {
        Gains {
            kp: tunings.kp,
            ki: tunings.ki,
            kd: tunings.kd,
        }
    }
}

/// Motor actuation in percent: front left, front right, rear right, rear left
pub type MotorOutputs = [f64; 4];

/// Vehicle safety mode, owned by the command arbiter
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ArmState {
    #[default]
    Disarmed,
    ArmedAttitude,
    ArmedMotor,
}

impl ArmState {
    pub fn is_armed(&self) -> bool {
        !matches!(self, ArmState::Disarmed)
    }
}

impl From<ArmState> for u8 {
    fn from(state: ArmState) -> Self {
        match state {
            ArmState::Disarmed => 0,
            ArmState::ArmedAttitude => FlightCommand::ATTITUDE_TAG,
            ArmState::ArmedMotor => FlightCommand::MOTOR_TAG,
        }
    }
}

/// Pilot command, consumed within the tick it was received in
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FlightCommand {
    Attitude {
        throttle: f64,
        set_point: Angles,
    },
    Motors(MotorOutputs),
}

impl FlightCommand {
    pub const ATTITUDE_TAG: u8 = b'A';
    pub const MOTOR_TAG: u8 = b'M';

    /// `None` for unknown tags
    pub fn from_fields(tag: u8, fields: [f64; 4]) -> Option<Self> {
        match tag {
            Self::ATTITUDE_TAG => Some(FlightCommand::Attitude {
                throttle: fields[0],
                set_point: Angles::new(fields[1], fields[2], fields[3]),
            }),
            Self::MOTOR_TAG => Some(FlightCommand::Motors(fields)),
            _ => None,
        }
    }

    pub fn arm_state(&self) -> ArmState {
        match self {
            FlightCommand::Attitude { .. } => ArmState::ArmedAttitude,
            FlightCommand::Motors(_) => ArmState::ArmedMotor,
        }
    }
}

impl From<FlightCommand> for message::FlightFrame {
    fn from(command: FlightCommand) -> Self {
        match command {
            FlightCommand::Attitude {
                throttle,
                set_point,
            } => Self {
                tag: FlightCommand::ATTITUDE_TAG,
                fields: Quad::from([throttle, set_point.roll, set_point.pitch, set_point.yaw]),
            },
            FlightCommand::Motors(outputs) => Self {
                tag: FlightCommand::MOTOR_TAG,
                fields: Quad::from(outputs),
            },
        }
    }
}

/// Inertial sample as read from the sensor, in raw counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawSample {
    pub gyro: [i16; 3],
    pub accel: [i16; 3],
}

/// Inertial sample in rad/s and g, offsets removed
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImuSample {
    pub gyro: [f64; 3],
    pub accel: [f64; 3],
}

impl ImuSample {
    pub fn rates(&self) -> Angles {
        Angles::new(self.gyro[0], self.gyro[1], self.gyro[2])
    }
}

/// Zero offsets of the inertial sensor, in raw counts
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SensorOffsets {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Flight,
    /// Emit controller variables along with every telemetry report
    ShowVariables,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tags_are_not_commands() {
        assert_eq!(FlightCommand::from_fields(b'X', [1.0; 4]), None);
        assert_eq!(FlightCommand::from_fields(0, [1.0; 4]), None);
    }

    #[test]
    fn attitude_fields_map_to_throttle_and_set_point() {
        let command = FlightCommand::from_fields(b'A', [50.0, 0.1, 0.2, 0.3]).unwrap();
        assert_eq!(
            command,
            FlightCommand::Attitude {
                throttle: 50.0,
                set_point: Angles::new(0.1, 0.2, 0.3),
            }
        );
        assert_eq!(command.arm_state(), ArmState::ArmedAttitude);
    }

    #[test]
    fn flight_frame_keeps_field_order() {
        let frame = message::FlightFrame::from(FlightCommand::Motors([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(frame.tag, b'M');
        assert_eq!(<[f64; 4]>::from(frame.fields), [1.0, 2.0, 3.0, 4.0]);
    }
}
