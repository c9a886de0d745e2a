use crate::config::ControlParameters;
use crate::types::{Angles, Tunings};

/// Proportional Integral Derivative controller for one axis
#[derive(Debug, Clone)]
pub struct Pid {
    tunings: Tunings,
    /// Bound on the accumulated error, in error units times seconds
    integral_limit: f64,
    integral: f64,
    previous_error: Option<f64>,
    output: f64,
}

impl Pid {
    pub fn new(tunings: Tunings, integral_limit: f64) -> Self {
        let integral_limit = if integral_limit.is_nan() {
            0.0
        } else {
            integral_limit.abs()
        };
        Self {
            tunings,
            integral_limit,
            integral: 0.0,
            previous_error: None,
            output: 0.0,
        }
    }

    pub fn tunings(&self) -> Tunings {
        self.tunings
    }

    /// Replace the whole gain triple. The running state is kept.
    pub fn set_tunings(&mut self, tunings: Tunings) {
        self.tunings = tunings;
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = None;
        self.output = 0.0;
    }

    /// Compute the manipulated value. `dt` is in seconds; a null or negative
    /// step only runs the proportional term.
    pub fn update(&mut self, set_point: f64, process: f64, dt: f64) -> f64 {
        let error = set_point - process;
        let mut derivative = 0.0;

        if dt > 0.0 {
            let integral = self.integral + error * dt;
            // NaN would slip through clamp
            if !integral.is_nan() {
                self.integral = integral.clamp(-self.integral_limit, self.integral_limit);
            }
            if let Some(previous) = self.previous_error {
                derivative = (error - previous) / dt;
            }
        }
        self.previous_error = Some(error);

        let Tunings {
            kp,
            ki,
            kd,
        } = self.tunings;
        self.output = kp * error + ki * self.integral + kd * derivative;
        self.output
    }
}

/// Output of the cascaded attitude controllers
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Correction {
    /// Per-axis correction fed to the mixer
    pub axes: Angles,
    /// Throttle correction from the force controller
    pub thrust: f64,
}

/// The six controllers of the vehicle: three rate axes, two angle axes and
/// the vertical force axis
#[derive(Debug, Clone)]
pub struct ControllerBank {
    rate: [Pid; 3],
    angle: [Pid; 2],
    force: Pid,
}

impl ControllerBank {
    pub fn new(params: &ControlParameters) -> Self {
        let rate = &params.rate;
        let angle = &params.angle;
        Self {
            rate: [
                Pid::new(rate.roll, params.rate_integral_limit),
                Pid::new(rate.pitch, params.rate_integral_limit),
                Pid::new(rate.yaw, params.rate_integral_limit),
            ],
            angle: [
                Pid::new(angle.roll, params.angle_integral_limit),
                Pid::new(angle.pitch, params.angle_integral_limit),
            ],
            force: Pid::new(angle.force, params.force_integral_limit),
        }
    }

    /// Roll, pitch and yaw rate gains
    pub fn rate_tunings(&self) -> [Tunings; 3] {
        [self.rate[0].tunings(), self.rate[1].tunings(), self.rate[2].tunings()]
    }

    pub fn set_rate_tunings(&mut self, tunings: [Tunings; 3]) {
        for (pid, tunings) in self.rate.iter_mut().zip(tunings) {
            pid.set_tunings(tunings);
        }
    }

    /// Roll angle, pitch angle and force gains
    pub fn angle_tunings(&self) -> [Tunings; 3] {
        [self.angle[0].tunings(), self.angle[1].tunings(), self.force.tunings()]
    }

    pub fn set_angle_tunings(&mut self, tunings: [Tunings; 3]) {
        self.angle[0].set_tunings(tunings[0]);
        self.angle[1].set_tunings(tunings[1]);
        self.force.set_tunings(tunings[2]);
    }

    pub fn rate(&self) -> &[Pid; 3] {
        &self.rate
    }

    pub fn angle(&self) -> &[Pid; 2] {
        &self.angle
    }

    pub fn force(&self) -> &Pid {
        &self.force
    }

    pub fn reset(&mut self) {
        self.rate.iter_mut().chain(self.angle.iter_mut()).for_each(Pid::reset);
        self.force.reset();
    }

    /// Cascade control: the angle controllers produce roll and pitch rate
    /// set-points for the rate controllers. Yaw is commanded as a rate.
    /// The force controller holds the body vertical acceleration at 1 g.
    pub fn correction(
        &mut self,
        set_point: &Angles,
        orientation: &Angles,
        rates: &Angles,
        vertical_g: f64,
        dt: f64,
    ) -> Correction {
        let roll_rate = self.angle[0].update(set_point.roll, orientation.roll, dt);
        let pitch_rate = self.angle[1].update(set_point.pitch, orientation.pitch, dt);

        let axes = Angles {
            roll: self.rate[0].update(roll_rate, rates.roll, dt),
            pitch: self.rate[1].update(pitch_rate, rates.pitch, dt),
            yaw: self.rate[2].update(set_point.yaw, rates.yaw, dt),
        };
        let thrust = self.force.update(1.0, vertical_g, dt);

        Correction {
            axes,
            thrust,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_only() {
        let mut pid = Pid::new(Tunings::new(2.0, 0.0, 0.0), 10.0);
        assert_eq!(pid.update(1.0, 0.25, 0.01), 1.5);
        assert_eq!(pid.output(), 1.5);
    }

    #[test]
    fn integrator_stays_bounded_under_constant_error() {
        let mut pid = Pid::new(Tunings::new(0.0, 1.0, 0.0), 0.5);
        for _ in 0..100_000 {
            pid.update(10.0, 0.0, 0.01);
            assert!(pid.integral().abs() <= 0.5);
        }
        assert_eq!(pid.integral(), 0.5);

        for _ in 0..100_000 {
            pid.update(-10.0, 0.0, 0.01);
            assert!(pid.integral().abs() <= 0.5);
        }
        assert_eq!(pid.integral(), -0.5);
    }

    #[test]
    fn derivative_follows_error_change() {
        let mut pid = Pid::new(Tunings::new(0.0, 0.0, 1.0), 1.0);
        assert_eq!(pid.update(0.0, 0.0, 0.1), 0.0);
        let output = pid.update(1.0, 0.0, 0.1);
        assert!((output - 10.0).abs() < 1e-9);
    }

    #[test]
    fn null_step_skips_integral_and_derivative() {
        let mut pid = Pid::new(Tunings::new(1.0, 1.0, 1.0), 1.0);
        assert_eq!(pid.update(1.0, 0.0, 0.0), 1.0);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn nan_limit_disables_integral() {
        let mut pid = Pid::new(Tunings::new(0.0, 1.0, 0.0), f64::NAN);
        pid.update(1.0, 0.0, 1.0);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn tunings_are_replaced_as_a_unit() {
        let mut bank = ControllerBank::new(&ControlParameters::default());
        let rate = [Tunings::new(1.0, 2.0, 3.0), Tunings::new(4.0, 5.0, 6.0), Tunings::new(7.0, 8.0, 9.0)];
        bank.set_rate_tunings(rate);
        assert_eq!(bank.rate_tunings(), rate);

        let angle = [Tunings::new(0.1, 0.2, 0.3), Tunings::new(0.4, 0.5, 0.6), Tunings::new(0.7, 0.8, 0.9)];
        bank.set_angle_tunings(angle);
        assert_eq!(bank.angle_tunings(), angle);
        assert_eq!(bank.force().tunings(), angle[2]);
    }

    #[test]
    fn angle_error_drives_rate_loop() {
        let mut params = ControlParameters::default();
        params.angle.roll = Tunings::new(2.0, 0.0, 0.0);
        params.rate.roll = Tunings::new(3.0, 0.0, 0.0);
        params.angle.force = Tunings::default();
        let mut bank = ControllerBank::new(&params);

        let correction = bank.correction(&Angles::new(0.5, 0.0, 0.0), &Angles::LEVEL, &Angles::LEVEL, 1.0, 0.01);
        // 0.5 rad error -> 1 rad/s rate set-point -> 3.0 correction
        assert!((correction.axes.roll - 3.0).abs() < 1e-9);
        assert_eq!(correction.thrust, 0.0);
    }

    #[test]
    fn level_hover_needs_no_correction() {
        let mut bank = ControllerBank::new(&ControlParameters::default());
        let correction = bank.correction(&Angles::LEVEL, &Angles::LEVEL, &Angles::LEVEL, 1.0, 0.01);
        assert_eq!(correction, Correction::default());
    }

    #[test]
    fn reset_clears_running_state() {
        let mut bank = ControllerBank::new(&ControlParameters::default());
        bank.correction(&Angles::new(0.3, 0.3, 0.3), &Angles::LEVEL, &Angles::LEVEL, 0.5, 0.01);
        bank.reset();
        assert!(bank.rate().iter().chain(bank.angle().iter()).all(|pid| pid.integral() == 0.0));
        assert_eq!(bank.force().integral(), 0.0);
    }
}
