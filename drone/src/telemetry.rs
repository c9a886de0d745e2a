use anyhow::Result;
use message::{status, DebugVariables, FramedMessage, MessageCode, Quad, Telemetry};

use crate::types::{Angles, ArmState, Mode, MotorOutputs};

/// Decides when a telemetry report is due and toggles the heartbeat
#[derive(Debug, Clone)]
pub struct TelemetryScheduler {
    period_ms: u64,
    last_ms: u64,
    heartbeat: bool,
}

impl TelemetryScheduler {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_ms: 0,
            heartbeat: false,
        }
    }

    /// Heartbeat value of the report due at `now_ms`, if one is due
    pub fn poll(&mut self, now_ms: u64) -> Option<bool> {
        if now_ms.saturating_sub(self.last_ms) < self.period_ms {
            return None;
        }
        self.last_ms = now_ms;
        self.heartbeat = !self.heartbeat;
        Some(self.heartbeat)
    }
}

/// Snapshot of the vehicle reported to the ground
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub orientation: Angles,
    pub motors: MotorOutputs,
    pub arm_state: ArmState,
    pub mode: Mode,
    pub heartbeat: bool,
    pub link: bool,
}

impl Report {
    pub fn to_message(&self) -> Result<FramedMessage> {
        let mut flags = 0;
        if self.arm_state.is_armed() {
            flags |= status::ARMED;
        }
        if self.heartbeat {
            flags |= status::HEARTBEAT;
        }
        if self.mode == Mode::ShowVariables {
            flags |= status::DIAGNOSTIC;
        }
        if self.link {
            flags |= status::LINK;
        }
        FramedMessage::encode(
            MessageCode::Telemetry,
            &Telemetry {
                orientation: self.orientation.into(),
                motors: Quad::from(self.motors),
                status: flags,
            },
        )
    }
}

/// Controller variables shown in diagnostic mode
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variables {
    pub orientation: Angles,
    pub set_point: Angles,
    pub correction: Angles,
    pub arm_state: ArmState,
}

impl Variables {
    pub fn to_message(&self) -> Result<FramedMessage> {
        FramedMessage::encode(
            MessageCode::DebugVariables,
            &DebugVariables {
                orientation: self.orientation.into(),
                set_point: self.set_point.into(),
                correction: self.correction.into(),
                arm_state: self.arm_state.into(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_every_period_with_toggling_heartbeat() {
        let mut scheduler = TelemetryScheduler::new(250);
        assert_eq!(scheduler.poll(0), None);
        assert_eq!(scheduler.poll(249), None);
        assert_eq!(scheduler.poll(250), Some(true));
        assert_eq!(scheduler.poll(400), None);
        assert_eq!(scheduler.poll(500), Some(false));
        assert_eq!(scheduler.poll(1000), Some(true));
    }

    #[test]
    fn report_encodes_status_flags() {
        let report = Report {
            orientation: Angles::new(0.1, 0.2, 0.3),
            motors: [10.0, 20.0, 30.0, 40.0],
            arm_state: ArmState::ArmedMotor,
            mode: Mode::Flight,
            heartbeat: true,
            link: false,
        };
        let telemetry: Telemetry = report.to_message().unwrap().decode().unwrap();
        assert_eq!(telemetry.status, status::ARMED | status::HEARTBEAT);
        assert_eq!(telemetry.orientation.y, 0.2);
        assert_eq!(<[f64; 4]>::from(telemetry.motors), [10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn variables_carry_arm_state() {
        let variables = Variables {
            orientation: Angles::LEVEL,
            set_point: Angles::new(0.0, 0.1, 0.0),
            correction: Angles::new(1.0, 2.0, 3.0),
            arm_state: ArmState::ArmedAttitude,
        };
        let decoded: DebugVariables = variables.to_message().unwrap().decode().unwrap();
        assert_eq!(decoded.arm_state, b'A');
        assert_eq!(decoded.correction.z, 3.0);
    }
}
