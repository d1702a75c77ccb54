//! Priority (emergency) vehicle driving
//!
//! In priority mode the vehicle never queries or obeys signals. It asks the
//! controller to turn its axis green at the intersection ahead and only slows
//! down for a vehicle right in front of it. Outside priority mode it drives
//! exactly like an ordinary vehicle.

use tokio::time::Instant;

use super::agent::{Behavior, MotionCommand, PreemptionPlan, SignalObservation, TickContext};
use super::config::{DrivingConfig, PriorityConfig};
use super::ordinary::compliance_factor;
use super::types::{Axis, IntersectionId};

/// Preemption already sent for the current approach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SentRequest {
    intersection: IntersectionId,
    at: Instant,
}

#[derive(Debug, Clone)]
pub struct PriorityBehavior {
    driving: DrivingConfig,
    priority: PriorityConfig,
    /// Always in priority mode, whatever the global flag says
    pinned: bool,
    sent: Option<SentRequest>,
}

impl PriorityBehavior {
    pub fn new(driving: DrivingConfig, priority: PriorityConfig) -> Self {
        Self {
            driving,
            priority,
            pinned: false,
            sent: None,
        }
    }

    /// A behavior that stays in priority mode for its whole life
    pub fn pinned(driving: DrivingConfig, priority: PriorityConfig) -> Self {
        Self {
            pinned: true,
            ..Self::new(driving, priority)
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn in_priority_mode(&self, ctx: &TickContext) -> bool {
        self.pinned || ctx.priority_mode
    }

    /// Intersection a request is outstanding for, if any
    pub fn outstanding_request(&self) -> Option<IntersectionId> {
        self.sent.map(|s| s.intersection)
    }
}

impl Behavior for PriorityBehavior {
    fn label(&self) -> &'static str {
        "priority"
    }

    fn wants_signal(&self, ctx: &TickContext) -> bool {
        !self.in_priority_mode(ctx) && ctx.near_signal
    }

    fn plan_preemption(&mut self, ctx: &TickContext, now: Instant) -> Option<PreemptionPlan> {
        let ahead = ctx.intersection_ahead.map(|(id, _)| id);

        // Passed the intersection, or the override window is over
        if let Some(sent) = self.sent {
            let elapsed = now.saturating_duration_since(sent.at);
            if ahead != Some(sent.intersection) || elapsed >= self.priority.preempt_duration {
                self.sent = None;
            }
        }

        if !self.in_priority_mode(ctx) || self.sent.is_some() {
            return None;
        }

        let (intersection, distance) = ctx.intersection_ahead?;
        if distance >= self.priority.preempt_distance {
            return None;
        }
        Some(PreemptionPlan {
            intersection,
            axis: Axis::of_heading(&ctx.heading),
            duration: self.priority.preempt_duration,
        })
    }

    fn confirm_preemption(&mut self, plan: &PreemptionPlan, now: Instant) {
        self.sent = Some(SentRequest {
            intersection: plan.intersection,
            at: now,
        });
    }

    fn decide(&mut self, ctx: &TickContext, observation: SignalObservation) -> MotionCommand {
        if !self.in_priority_mode(ctx) {
            return compliance_factor(&self.driving, observation);
        }
        match ctx.vehicle_ahead {
            Some(gap) if gap < self.priority.collision_gap => {
                MotionCommand::new(self.priority.collision_factor)
            }
            _ => MotionCommand::new(self.priority.priority_factor),
        }
    }
}
