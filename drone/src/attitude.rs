//! Attitude estimation from gyroscope and accelerometer samples.
//!
//! Madgwick gradient-descent filter (IMU variant, no magnetometer): the
//! gyroscope is integrated as a quaternion rate and the accelerometer pulls
//! the estimate toward gravity with a strength of `beta`.

use crate::types::{Angles, ImuSample};

type Quaternion = [f64; 4];

#[derive(Debug, Clone)]
pub struct AttitudeEstimator {
    beta: f64,
    q: Quaternion,
    initialized: bool,
}

impl AttitudeEstimator {
    pub fn new(beta: f64) -> Self {
        Self {
            beta,
            q: [1.0, 0.0, 0.0, 0.0],
            initialized: false,
        }
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn set_beta(&mut self, beta: f64) {
        self.beta = beta;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Seed the estimate from the gravity vector of a first sample. Yaw starts at zero.
    pub fn init(&mut self, sample: &ImuSample) -> Angles {
        let [ax, ay, az] = sample.accel;
        let roll = f64::atan2(ay, az);
        let pitch = f64::atan2(-ax, (ay * ay + az * az).sqrt());

        let (sr, cr) = (roll / 2.0).sin_cos();
        let (sp, cp) = (pitch / 2.0).sin_cos();
        self.q = [cr * cp, sr * cp, cr * sp, -sr * sp];
        normalize(&mut self.q);
        self.initialized = true;
        self.orientation()
    }

    /// Integrate one sample over `dt` seconds
    pub fn update(&mut self, sample: &ImuSample, dt: f64) -> Angles {
        if !self.initialized {
            return self.init(sample);
        }

        let [gx, gy, gz] = sample.gyro;
        let [q0, q1, q2, q3] = self.q;

        let mut q_dot = [
            0.5 * (-q1 * gx - q2 * gy - q3 * gz),
            0.5 * (q0 * gx + q2 * gz - q3 * gy),
            0.5 * (q0 * gy - q1 * gz + q3 * gx),
            0.5 * (q0 * gz + q1 * gy - q2 * gx),
        ];

        let norm = sample.accel.iter().map(|a| a * a).sum::<f64>().sqrt();
        if norm > 0.0 && norm.is_finite() {
            let [ax, ay, az] = sample.accel.map(|a| a / norm);

            let q0q0 = q0 * q0;
            let q1q1 = q1 * q1;
            let q2q2 = q2 * q2;
            let q3q3 = q3 * q3;

            // Gradient of the gravity objective function
            let mut step = [
                4.0 * q0 * q2q2 + 2.0 * q2 * ax + 4.0 * q0 * q1q1 - 2.0 * q1 * ay,
                4.0 * q1 * q3q3 - 2.0 * q3 * ax + 4.0 * q0q0 * q1 - 2.0 * q0 * ay - 4.0 * q1
                    + 8.0 * q1 * q1q1
                    + 8.0 * q1 * q2q2
                    + 4.0 * q1 * az,
                4.0 * q0q0 * q2 + 2.0 * q0 * ax + 4.0 * q2 * q3q3 - 2.0 * q3 * ay - 4.0 * q2
                    + 8.0 * q2 * q1q1
                    + 8.0 * q2 * q2q2
                    + 4.0 * q2 * az,
                4.0 * q1q1 * q3 - 2.0 * q1 * ax + 4.0 * q2q2 * q3 - 2.0 * q2 * ay,
            ];
            if normalize(&mut step) {
                for (dot, s) in q_dot.iter_mut().zip(step) {
                    *dot -= self.beta * s;
                }
            }
        }

        let mut q = self.q;
        for (q, dot) in q.iter_mut().zip(q_dot) {
            *q += dot * dt;
        }
        // Keep the last valid estimate rather than propagating NaN
        if normalize(&mut q) {
            self.q = q;
        }
        self.orientation()
    }

    pub fn orientation(&self) -> Angles {
        let [q0, q1, q2, q3] = self.q;
        Angles {
            roll: f64::atan2(q0 * q1 + q2 * q3, 0.5 - q1 * q1 - q2 * q2),
            pitch: f64::asin((-2.0 * (q1 * q3 - q0 * q2)).clamp(-1.0, 1.0)),
            yaw: f64::atan2(q1 * q2 + q0 * q3, 0.5 - q2 * q2 - q3 * q3),
        }
    }

    /// Acceleration along the estimated vertical, in g
    pub fn vertical_g(&self, sample: &ImuSample) -> f64 {
        let [q0, q1, q2, q3] = self.q;
        let up = [
            2.0 * (q1 * q3 - q0 * q2),
            2.0 * (q0 * q1 + q2 * q3),
            q0 * q0 - q1 * q1 - q2 * q2 + q3 * q3,
        ];
        up.iter().zip(sample.accel).map(|(u, a)| u * a).sum()
    }
}

/// Returns false and leaves `v` untouched when it cannot be normalized
fn normalize(v: &mut [f64; 4]) -> bool {
    let norm = v.iter().map(|x| x.powi(2)).sum::<f64>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x /= norm;
        }
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_6;

    fn sample(gyro: [f64; 3], accel: [f64; 3]) -> ImuSample {
        ImuSample {
            gyro,
            accel,
        }
    }

    fn tilted(roll: f64) -> [f64; 3] {
        [0.0, roll.sin(), roll.cos()]
    }

    #[test]
    fn level_at_rest_stays_level() {
        let mut estimator = AttitudeEstimator::new(0.1);
        let rest = sample([0.0; 3], [0.0, 0.0, 1.0]);
        estimator.init(&rest);
        for _ in 0..1000 {
            estimator.update(&rest, 0.005);
        }
        let angles = estimator.orientation();
        assert!(angles.roll.abs() < 1e-9);
        assert!(angles.pitch.abs() < 1e-9);
        assert!(angles.yaw.abs() < 1e-9);
        assert!((estimator.vertical_g(&rest) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn init_takes_roll_and_pitch_from_gravity() {
        let mut estimator = AttitudeEstimator::new(0.1);
        let angles = estimator.init(&sample([0.0; 3], tilted(FRAC_PI_6)));
        assert!(estimator.is_initialized());
        assert!((angles.roll - FRAC_PI_6).abs() < 1e-9);
        assert!(angles.pitch.abs() < 1e-9);

        let angles = estimator.init(&sample([0.0; 3], [-FRAC_PI_6.sin(), 0.0, FRAC_PI_6.cos()]));
        assert!(angles.roll.abs() < 1e-9);
        assert!((angles.pitch - FRAC_PI_6).abs() < 1e-9);
    }

    #[test]
    fn first_update_initializes() {
        let mut estimator = AttitudeEstimator::new(0.1);
        let angles = estimator.update(&sample([1.0; 3], tilted(FRAC_PI_6)), 0.01);
        assert!((angles.roll - FRAC_PI_6).abs() < 1e-9);
    }

    #[test]
    fn gyroscope_integrates_yaw() {
        let mut estimator = AttitudeEstimator::new(0.1);
        let turning = sample([0.0, 0.0, 0.1], [0.0, 0.0, 1.0]);
        estimator.init(&turning);
        for _ in 0..1000 {
            estimator.update(&turning, 0.01);
        }
        assert!((estimator.orientation().yaw - 1.0).abs() < 1e-3);
    }

    #[test]
    fn accelerometer_corrects_toward_gravity() {
        let mut estimator = AttitudeEstimator::new(0.5);
        estimator.init(&sample([0.0; 3], [0.0, 0.0, 1.0]));
        let still = sample([0.0; 3], tilted(FRAC_PI_6));
        for _ in 0..2000 {
            estimator.update(&still, 0.01);
        }
        assert!((estimator.orientation().roll - FRAC_PI_6).abs() < 1.0f64.to_radians());
    }

    #[test]
    fn zero_beta_ignores_accelerometer() {
        let mut estimator = AttitudeEstimator::new(0.0);
        estimator.init(&sample([0.0; 3], [0.0, 0.0, 1.0]));
        for _ in 0..100 {
            estimator.update(&sample([0.0; 3], tilted(FRAC_PI_6)), 0.01);
        }
        assert!(estimator.orientation().roll.abs() < 1e-9);
    }

    #[test]
    fn null_acceleration_is_gyro_only() {
        let mut estimator = AttitudeEstimator::new(0.5);
        estimator.init(&sample([0.0; 3], [0.0, 0.0, 1.0]));
        estimator.update(&sample([0.0; 3], [0.0; 3]), 0.01);
        assert!(estimator.orientation().roll.abs() < 1e-12);
    }
}
