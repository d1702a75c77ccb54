//! Signal-compliant driving

use super::agent::{Behavior, MotionCommand, SignalObservation, TickContext};
use super::config::DrivingConfig;
use super::types::Phase;

/// Speed factor an ordinary vehicle applies for a signal observation
pub fn compliance_factor(config: &DrivingConfig, observation: SignalObservation) -> MotionCommand {
    match observation {
        SignalObservation::NotQueried | SignalObservation::NoneAhead => MotionCommand::CRUISE,
        SignalObservation::Unanswered => MotionCommand::new(config.uncertain_factor),
        SignalObservation::Seen {
            phase: Phase::Red,
            distance,
        } if distance < config.red_stop_distance => MotionCommand::STOP,
        SignalObservation::Seen {
            phase: Phase::Yellow,
            distance,
        } if distance < config.yellow_slow_distance => MotionCommand::new(config.yellow_factor),
        SignalObservation::Seen { .. } => MotionCommand::CRUISE,
    }
}

/// An ordinary vehicle: queries signals when close to one and obeys them
#[derive(Debug, Clone)]
pub struct OrdinaryBehavior {
    config: DrivingConfig,
}

impl OrdinaryBehavior {
    pub fn new(config: DrivingConfig) -> Self {
        Self { config }
    }
}

impl Behavior for OrdinaryBehavior {
    fn label(&self) -> &'static str {
        "car"
    }

    fn wants_signal(&self, ctx: &TickContext) -> bool {
        ctx.near_signal
    }

    fn decide(&mut self, _ctx: &TickContext, observation: SignalObservation) -> MotionCommand {
        compliance_factor(&self.config, observation)
    }
}
