use anyhow::Result;

use crate::mixer::{MOTOR_MAX, MOTOR_MIN};
use crate::types::MotorOutputs;

/// Idle pulse length in PWM timer cycles, full throttle is twice as long
const PULSE_IDLE: f64 = 14_285.0;

/// Motor outputs of the platform
pub trait Actuator {
    /// Apply four percentages, already clamped to the actuation range
    fn drive(&mut self, outputs: &MotorOutputs) -> Result<()>;
}

/// Convert a motor percentage to an ESC pulse length
pub fn pulse_length(percent: f64) -> u32 {
    let percent = if percent.is_nan() {
        MOTOR_MIN
    } else {
        percent.clamp(MOTOR_MIN, MOTOR_MAX)
    };
    (PULSE_IDLE + percent / MOTOR_MAX * PULSE_IDLE) as u32
}

/// ESC adapter keeping the pulse lengths it would emit; used when no PWM
/// hardware is linked
#[derive(Debug, Default)]
pub struct PulseEsc {
    pulses: [u32; 4],
}

impl PulseEsc {
    pub fn pulses(&self) -> [u32; 4] {
        self.pulses
    }
}

impl Actuator for PulseEsc {
    fn drive(&mut self, outputs: &MotorOutputs) -> Result<()> {
        let pulses = outputs.map(pulse_length);
        if pulses != self.pulses {
            log::debug!("ESC pulses {:?}", pulses);
            self.pulses = pulses;
        }
        Ok(())
    }
}
