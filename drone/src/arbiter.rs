//! Arming and failsafe state machine.
//!
//! The arbiter keeps the last accepted [`FlightCommand`] as the active
//! session; no session means disarmed. A session older than the staleness
//! threshold is ended on the next tick, with a degrade that depends on the
//! mode it was armed in.

use crate::config::FailsafeParameters;
use crate::types::{Angles, ArmState, FlightCommand, MotorOutputs};

/// What the flight tick must do this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Directive {
    /// Disarmed: no controller or mixer computation
    Idle,
    Attitude {
        throttle: f64,
        set_point: Angles,
        /// Last computation of a session that just timed out
        failsafe: bool,
    },
    Motors {
        outputs: MotorOutputs,
        failsafe: bool,
    },
}

#[derive(Debug, Clone)]
pub struct CommandArbiter {
    session: Option<FlightCommand>,
    last_accepted_ms: u64,
    staleness_ms: u64,
    throttle_step: f64,
}

impl CommandArbiter {
    pub fn new(params: &FailsafeParameters) -> Self {
        Self {
            session: None,
            last_accepted_ms: 0,
            staleness_ms: params.staleness_ms,
            throttle_step: params.throttle_step,
        }
    }

    pub fn state(&self) -> ArmState {
        self.session.as_ref().map_or(ArmState::Disarmed, FlightCommand::arm_state)
    }

    /// Time since the last accepted command
    pub fn age(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_accepted_ms)
    }

    /// Run one tick: accept the command if any, then check its freshness
    pub fn tick(&mut self, now_ms: u64, command: Option<FlightCommand>) -> Directive {
        if let Some(command) = command {
            self.accept(now_ms, command);
        }

        let Some(session) = self.session else {
            return Directive::Idle;
        };
        let stale = self.age(now_ms) > self.staleness_ms;
        if stale {
            log::warn!("No command for {} ms, disarming from {:?}", self.age(now_ms), session.arm_state());
            self.session = None;
        }

        match session {
            FlightCommand::Attitude {
                throttle,
                ..
            } if stale => Directive::Attitude {
                throttle: (throttle - self.throttle_step).max(0.0),
                set_point: Angles::LEVEL,
                failsafe: true,
            },
            FlightCommand::Attitude {
                throttle,
                set_point,
            } => Directive::Attitude {
                throttle,
                set_point,
                failsafe: false,
            },
            FlightCommand::Motors(_) if stale => Directive::Motors {
                outputs: [0.0; 4],
                failsafe: true,
            },
            FlightCommand::Motors(outputs) => Directive::Motors {
                outputs,
                failsafe: false,
            },
        }
    }

    fn accept(&mut self, now_ms: u64, command: FlightCommand) {
        let previous = self.state();
        if previous != command.arm_state() {
            log::info!("Arm state {:?} -> {:?}", previous, command.arm_state());
        }
        self.session = Some(command);
        self.last_accepted_ms = now_ms;
    }
}
