use crate::types::{Angles, MotorOutputs};

pub const MOTOR_MIN: f64 = 0.0;
pub const MOTOR_MAX: f64 = 100.0;

/// Sign of the roll, pitch and yaw correction for each motor of the X frame.
/// Front left and rear right spin clockwise.
const QUAD_X: [[f64; 3]; 4] = [
    [1.0, 1.0, -1.0],   // front left
    [-1.0, 1.0, 1.0],   // front right
    [-1.0, -1.0, -1.0], // rear right
    [1.0, -1.0, 1.0],   // rear left
];

/// Maps throttle and attitude correction to motor percentages
#[derive(Debug, Clone, Copy, Default)]
pub struct MotorMixer;

impl MotorMixer {
    pub fn mix(&self, throttle: f64, correction: &Angles) -> MotorOutputs {
        QUAD_X.map(|[roll, pitch, yaw]| {
            clamp(throttle + roll * correction.roll + pitch * correction.pitch + yaw * correction.yaw)
        })
    }

    /// Clamp raw per-motor values to the actuation range
    pub fn limit(&self, outputs: MotorOutputs) -> MotorOutputs {
        outputs.map(clamp)
    }
}

fn clamp(value: f64) -> f64 {
    if value.is_nan() {
        MOTOR_MIN
    } else {
        value.clamp(MOTOR_MIN, MOTOR_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_only_is_even() {
        assert_eq!(MotorMixer.mix(42.0, &Angles::LEVEL), [42.0; 4]);
    }

    #[test]
    fn roll_correction_raises_left_side() {
        let outputs = MotorMixer.mix(50.0, &Angles::new(5.0, 0.0, 0.0));
        assert_eq!(outputs, [55.0, 45.0, 45.0, 55.0]);
    }

    #[test]
    fn pitch_correction_raises_front() {
        let outputs = MotorMixer.mix(50.0, &Angles::new(0.0, 5.0, 0.0));
        assert_eq!(outputs, [55.0, 55.0, 45.0, 45.0]);
    }

    #[test]
    fn yaw_correction_favours_counter_clockwise_motors() {
        let outputs = MotorMixer.mix(50.0, &Angles::new(0.0, 0.0, 5.0));
        assert_eq!(outputs, [45.0, 55.0, 45.0, 55.0]);
    }

    #[test]
    fn corrections_never_change_total_thrust_when_unsaturated() {
        let outputs = MotorMixer.mix(50.0, &Angles::new(3.0, -2.0, 7.0));
        assert!((outputs.iter().sum::<f64>() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn outputs_are_clamped() {
        assert_eq!(MotorMixer.mix(95.0, &Angles::new(20.0, 0.0, 0.0)), [100.0, 75.0, 75.0, 100.0]);
        assert_eq!(MotorMixer.mix(-10.0, &Angles::LEVEL), [0.0; 4]);
        assert_eq!(MotorMixer.limit([f64::NAN, 120.0, -3.0, 12.5]), [0.0, 100.0, 0.0, 12.5]);
    }
}
