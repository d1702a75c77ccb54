//! Decision logic of ordinary and priority vehicles

use std::time::Duration;

use tokio::time::Instant;
use traffic_priority::simulation::ordinary::compliance_factor;
use traffic_priority::simulation::{
    Axis, Behavior, DrivingConfig, IntersectionId, MotionCommand, OrdinaryBehavior, Phase,
    PriorityBehavior, PriorityConfig, SignalObservation, SimId, TickContext, Vec2, VehicleId,
};

fn ctx() -> TickContext {
    TickContext {
        id: VehicleId(SimId(1)),
        position: Vec2::new(600.0, 240.0),
        heading: Vec2::new(1.0, 0.0),
        near_signal: true,
        priority_mode: false,
        intersection_ahead: Some((IntersectionId(SimId(3)), 133.0)),
        vehicle_ahead: None,
    }
}

fn seen(phase: Phase, distance: f32) -> SignalObservation {
    SignalObservation::Seen { phase, distance }
}

#[test]
fn test_ordinary_compliance() {
    let config = DrivingConfig::default();
    let f = |o| compliance_factor(&config, o).factor;

    assert_eq!(f(SignalObservation::NotQueried), 1.0);
    assert_eq!(f(SignalObservation::NoneAhead), 1.0);
    assert_eq!(f(SignalObservation::Unanswered), config.uncertain_factor);

    assert_eq!(f(seen(Phase::Red, 69.9)), 0.0);
    assert_eq!(f(seen(Phase::Red, 70.0)), 1.0);
    assert_eq!(f(seen(Phase::Yellow, 75.0)), config.yellow_factor);
    assert_eq!(f(seen(Phase::Yellow, 80.0)), 1.0);
    assert_eq!(f(seen(Phase::Green, 1.0)), 1.0);

    assert!(compliance_factor(&config, seen(Phase::Red, 10.0)).is_stop());
    assert!(!compliance_factor(&config, SignalObservation::Unanswered).is_stop());
}

#[test]
fn test_ordinary_queries_only_near_signals() {
    let behavior = OrdinaryBehavior::new(DrivingConfig::default());
    let mut c = ctx();
    assert!(behavior.wants_signal(&c));
    c.near_signal = false;
    assert!(!behavior.wants_signal(&c));
}

#[test]
fn test_priority_mode_ignores_signals() {
    let mut behavior = PriorityBehavior::new(DrivingConfig::default(), PriorityConfig::default());
    let mut c = ctx();
    c.priority_mode = true;

    assert!(!behavior.wants_signal(&c));
    let cmd = behavior.decide(&c, SignalObservation::NotQueried);
    assert_eq!(cmd, MotionCommand::new(PriorityConfig::default().priority_factor));

    // Imminent collision: slow, never stop
    c.vehicle_ahead = Some(30.0);
    let cmd = behavior.decide(&c, SignalObservation::NotQueried);
    assert_eq!(cmd.factor, PriorityConfig::default().collision_factor);
    assert!(!cmd.is_stop());

    c.vehicle_ahead = Some(80.0);
    assert_eq!(
        behavior.decide(&c, SignalObservation::NotQueried).factor,
        PriorityConfig::default().priority_factor
    );
}

#[test]
fn test_priority_outside_mode_behaves_like_ordinary() {
    let mut behavior = PriorityBehavior::new(DrivingConfig::default(), PriorityConfig::default());
    let c = ctx();
    assert!(behavior.wants_signal(&c));
    assert!(behavior.decide(&c, seen(Phase::Red, 20.0)).is_stop());
    assert!(behavior.plan_preemption(&c, Instant::now()).is_none());

    let pinned = PriorityBehavior::pinned(DrivingConfig::default(), PriorityConfig::default());
    assert!(pinned.is_pinned());
    assert!(pinned.in_priority_mode(&c));
    assert!(!pinned.wants_signal(&c));
}

#[test]
fn test_preemption_requested_once_per_approach() {
    let config = PriorityConfig::default();
    let mut behavior = PriorityBehavior::new(DrivingConfig::default(), config.clone());
    let t0 = Instant::now();
    let mut c = ctx();
    c.priority_mode = true;

    // Too far away
    assert!(behavior.plan_preemption(&c, t0).is_none());

    c.intersection_ahead = Some((IntersectionId(SimId(3)), 120.0));
    let plan = behavior.plan_preemption(&c, t0).unwrap();
    assert_eq!(plan.intersection, IntersectionId(SimId(3)));
    assert_eq!(plan.axis, Axis::EastWest);
    assert_eq!(plan.duration, config.preempt_duration);

    // Not confirmed (send failed): planned again next tick
    assert!(behavior.plan_preemption(&c, t0).is_some());
    behavior.confirm_preemption(&plan, t0);
    assert_eq!(behavior.outstanding_request(), Some(IntersectionId(SimId(3))));

    c.intersection_ahead = Some((IntersectionId(SimId(3)), 60.0));
    assert!(behavior.plan_preemption(&c, t0 + Duration::from_secs(1)).is_none());

    // Override window elapsed while still approaching: request again
    let later = t0 + config.preempt_duration;
    assert!(behavior.plan_preemption(&c, later).is_some());
}

#[test]
fn test_preemption_flag_resets_after_passing() {
    let mut behavior = PriorityBehavior::new(DrivingConfig::default(), PriorityConfig::default());
    let t0 = Instant::now();
    let mut c = ctx();
    c.priority_mode = true;
    c.intersection_ahead = Some((IntersectionId(SimId(3)), 50.0));

    let plan = behavior.plan_preemption(&c, t0).unwrap();
    behavior.confirm_preemption(&plan, t0);

    // Passed intersection 3, next one is still far
    c.heading = Vec2::new(0.0, 1.0);
    c.intersection_ahead = Some((IntersectionId(SimId(6)), 240.0));
    assert!(behavior.plan_preemption(&c, t0).is_none());
    assert_eq!(behavior.outstanding_request(), None);

    c.intersection_ahead = Some((IntersectionId(SimId(6)), 100.0));
    let plan = behavior.plan_preemption(&c, t0).unwrap();
    assert_eq!(plan.intersection, IntersectionId(SimId(6)));
    assert_eq!(plan.axis, Axis::NorthSouth);
}
