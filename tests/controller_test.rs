//! Signal phase controller tests

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, Instant};
use traffic_priority::simulation::protocol::{self, Envelope, Reply};
use traffic_priority::simulation::{
    Axis, CyclePhase, Intersection, Phase, SignalController, SimConfig, SimWorld, Vec2,
};

fn controller() -> (SignalController, SimWorld, Vec<Intersection>) {
    let config = SimConfig::default();
    let (world, _) = SimWorld::create_city(&config, 1).unwrap();
    let (_handle, inbox) = protocol::channel(8);
    let intersections = world.intersections();
    (
        SignalController::new(world.clone(), Arc::new(config), inbox),
        world,
        intersections,
    )
}

fn phase_of(world: &SimWorld, intersection: &Intersection, axis: Axis) -> Phase {
    world.signal(intersection.signal_for(axis)).unwrap().phase
}

fn assert_never_both_green(world: &SimWorld, intersections: &[Intersection]) {
    for i in intersections {
        let ns = phase_of(world, i, Axis::NorthSouth);
        let ew = phase_of(world, i, Axis::EastWest);
        assert!(
            !(ns == Phase::Green && ew == Phase::Green),
            "intersection {} has both axes green",
            i.id
        );
    }
}

#[test]
fn test_cycle_phase_order() {
    let mut phase = CyclePhase::START;
    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(phase);
        phase = phase.next();
    }
    assert_eq!(
        seen,
        vec![
            CyclePhase::Green(Axis::NorthSouth),
            CyclePhase::Yellow(Axis::NorthSouth),
            CyclePhase::Green(Axis::EastWest),
            CyclePhase::Yellow(Axis::EastWest),
            CyclePhase::Green(Axis::NorthSouth),
        ]
    );

    let timings = SimConfig::default().timings;
    assert_eq!(CyclePhase::START.duration(&timings), timings.green);
    assert_eq!(CyclePhase::START.next().duration(&timings), timings.yellow);
}

#[test]
fn test_yellow_only_demotes_green() {
    let yellow = CyclePhase::Yellow(Axis::EastWest);
    assert_eq!(yellow.base_phase(Axis::EastWest, Phase::Green), Phase::Yellow);
    assert_eq!(yellow.base_phase(Axis::EastWest, Phase::Yellow), Phase::Yellow);
    assert_eq!(yellow.base_phase(Axis::EastWest, Phase::Red), Phase::Red);
    assert_eq!(yellow.base_phase(Axis::NorthSouth, Phase::Green), Phase::Red);
}

#[test]
fn test_base_cycle_layout() {
    let (mut ctl, world, intersections) = controller();
    let now = Instant::now();

    ctl.apply_layout(now);
    for i in &intersections {
        assert_eq!(phase_of(&world, i, Axis::NorthSouth), Phase::Green);
        assert_eq!(phase_of(&world, i, Axis::EastWest), Phase::Red);
    }

    ctl.advance_phase(now);
    for i in &intersections {
        assert_eq!(phase_of(&world, i, Axis::NorthSouth), Phase::Yellow);
        assert_eq!(phase_of(&world, i, Axis::EastWest), Phase::Red);
    }

    ctl.advance_phase(now);
    for i in &intersections {
        assert_eq!(phase_of(&world, i, Axis::NorthSouth), Phase::Red);
        assert_eq!(phase_of(&world, i, Axis::EastWest), Phase::Green);
    }

    ctl.advance_phase(now);
    assert_eq!(ctl.phase(), CyclePhase::Yellow(Axis::EastWest));
    for i in &intersections {
        assert_eq!(phase_of(&world, i, Axis::NorthSouth), Phase::Red);
        assert_eq!(phase_of(&world, i, Axis::EastWest), Phase::Yellow);
    }
}

#[test]
fn test_preemption_holds_for_its_duration_then_reverts() {
    let (mut ctl, world, intersections) = controller();
    let t = Instant::now();
    let d = Duration::from_secs(6);
    let target = &intersections[1];

    ctl.apply_layout(t);
    ctl.preempt(target.id, Axis::EastWest, d, t);

    for offset_ms in [0u64, 1, 2_500, 5_999] {
        let now = t + Duration::from_millis(offset_ms);
        ctl.expire(now);
        assert_eq!(phase_of(&world, target, Axis::EastWest), Phase::Green);
        assert_eq!(phase_of(&world, target, Axis::NorthSouth), Phase::Red);
    }

    // Other intersections keep the base cycle
    for i in intersections.iter().filter(|i| i.id != target.id) {
        assert_eq!(phase_of(&world, i, Axis::NorthSouth), Phase::Green);
        assert_eq!(phase_of(&world, i, Axis::EastWest), Phase::Red);
    }

    ctl.expire(t + d);
    assert!(ctl.preemptions().is_empty());
    assert_eq!(phase_of(&world, target, Axis::NorthSouth), Phase::Green);
    assert_eq!(phase_of(&world, target, Axis::EastWest), Phase::Red);
}

#[test]
fn test_out_of_range_preemption_is_dropped() {
    let (mut ctl, world, intersections) = controller();
    let t = Instant::now();
    let target = &intersections[2];
    ctl.apply_layout(t);

    assert!(!ctl.preempt(target.id, Axis::EastWest, Duration::MAX, t));
    assert!(ctl.preemptions().is_empty());
    assert_eq!(phase_of(&world, target, Axis::NorthSouth), Phase::Green);
    assert_eq!(phase_of(&world, target, Axis::EastWest), Phase::Red);

    // A huge request over the wire is never acknowledged and changes nothing
    let (tx, mut rx) = oneshot::channel();
    ctl.handle(
        Envelope {
            sender: "test".to_string(),
            body: format!("PREEMPT_REQ {} EW 1e19", target.id),
            reply_to: Some(tx),
        },
        t,
    );
    assert!(rx.try_recv().is_err());
    assert!(ctl.preemptions().is_empty());
    assert_eq!(phase_of(&world, target, Axis::EastWest), Phase::Red);

    assert!(ctl.preempt(target.id, Axis::EastWest, Duration::from_secs(6), t));
    assert_eq!(ctl.preemptions().len(), 1);
}

#[test]
fn test_same_intersection_last_writer_wins() {
    let (mut ctl, world, intersections) = controller();
    let t = Instant::now();
    let target = &intersections[0];

    ctl.apply_layout(t);
    ctl.preempt(target.id, Axis::NorthSouth, Duration::from_secs(6), t);
    ctl.preempt(
        target.id,
        Axis::EastWest,
        Duration::from_secs(2),
        t + Duration::from_secs(1),
    );
    assert_eq!(ctl.preemptions().len(), 1);
    assert_eq!(phase_of(&world, target, Axis::EastWest), Phase::Green);
    assert_eq!(phase_of(&world, target, Axis::NorthSouth), Phase::Red);

    // The replacement expires at t+3; nothing of the first request survives
    ctl.expire(t + Duration::from_secs(3));
    assert!(ctl.preemptions().is_empty());
    assert_eq!(phase_of(&world, target, Axis::NorthSouth), Phase::Green);
}

#[test]
fn test_forced_red_stays_red_through_yellow() {
    let (mut ctl, world, intersections) = controller();
    let t = Instant::now();
    let target = &intersections[2];

    ctl.apply_layout(t);
    ctl.advance_phase(t);
    ctl.advance_phase(t);
    assert_eq!(ctl.phase(), CyclePhase::Green(Axis::EastWest));

    ctl.preempt(target.id, Axis::NorthSouth, Duration::from_secs(1), t);
    ctl.advance_phase(t + Duration::from_millis(500));
    ctl.expire(t + Duration::from_secs(1));

    // Yellow never turns a red signal back to yellow or green
    assert_eq!(phase_of(&world, target, Axis::EastWest), Phase::Red);
    assert_eq!(phase_of(&world, target, Axis::NorthSouth), Phase::Red);
    assert_eq!(phase_of(&world, &intersections[0], Axis::EastWest), Phase::Yellow);
}

#[test]
fn test_never_two_greens_under_random_sequences() {
    let (mut ctl, world, intersections) = controller();
    let mut rng = StdRng::seed_from_u64(42);
    let mut now = Instant::now();

    ctl.apply_layout(now);
    for _ in 0..2_000 {
        match rng.random_range(0..4) {
            0 => ctl.advance_phase(now),
            1 => {
                let i = &intersections[rng.random_range(0..intersections.len())];
                let axis = if rng.random_bool(0.5) {
                    Axis::NorthSouth
                } else {
                    Axis::EastWest
                };
                let d = Duration::from_millis(rng.random_range(100..8_000));
                ctl.preempt(i.id, axis, d, now);
            }
            2 => ctl.expire(now),
            _ => {
                let _ = ctl.answer_state(Vec2::new(500.0, 240.0), Vec2::new(1.0, 0.0), now);
            }
        }
        assert_never_both_green(&world, &intersections);
        now += Duration::from_millis(rng.random_range(0..1_500));
    }
}

#[test]
fn test_handle_answers_queries_and_drops_malformed() {
    let (mut ctl, world, intersections) = controller();
    let now = Instant::now();
    ctl.apply_layout(now);

    // Heading east on the top road, short of intersection 1
    let (tx, mut rx) = oneshot::channel();
    ctl.handle(
        Envelope {
            sender: "test".to_string(),
            body: "STATE_REQ 650 240 1 0".to_string(),
            reply_to: Some(tx),
        },
        now,
    );
    let reply: Reply = rx.try_recv().unwrap().parse().unwrap();
    let expected = world
        .signal(intersections[1].signal_for(Axis::EastWest))
        .unwrap();
    match reply {
        Reply::State(Some(report)) => {
            assert_eq!(report.id, expected.id);
            assert_eq!(report.phase, Phase::Red);
            assert_eq!(report.position, expected.position);
        }
        other => panic!("unexpected reply {:?}", other),
    }

    // Nothing lies ahead when driving off the map
    let (tx, mut rx) = oneshot::channel();
    ctl.handle(
        Envelope {
            sender: "test".to_string(),
            body: "STATE_REQ 1000 700 1 0".to_string(),
            reply_to: Some(tx),
        },
        now,
    );
    assert_eq!(rx.try_recv().unwrap(), "STATE_REP NONE NONE 0 0");

    // Malformed: no reply, no state change
    let (tx, mut rx) = oneshot::channel();
    ctl.handle(
        Envelope {
            sender: "test".to_string(),
            body: "PREEMPT_REQ 0 SIDEWAYS 6".to_string(),
            reply_to: Some(tx),
        },
        now,
    );
    assert!(rx.try_recv().is_err());
    assert!(ctl.preemptions().is_empty());

    let (tx, mut rx) = oneshot::channel();
    let body = format!("PREEMPT_REQ {} EW 6", intersections[0].id);
    ctl.handle(
        Envelope {
            sender: "test".to_string(),
            body,
            reply_to: Some(tx),
        },
        now,
    );
    assert_eq!(rx.try_recv().unwrap(), "PREEMPT_ACK");
    assert_eq!(
        phase_of(&world, &intersections[0], Axis::EastWest),
        Phase::Green
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_cycles_on_schedule() {
    let config = SimConfig::default();
    let (world, _) = SimWorld::create_city(&config, 1).unwrap();
    let intersections = world.intersections();
    let (_handle, inbox) = protocol::channel(8);
    let (shutdown_tx, shutdown) = watch::channel(false);
    let ctl = SignalController::new(world.clone(), Arc::new(config), inbox);
    let task = tokio::spawn(ctl.run(shutdown));
    let i = &intersections[0];

    sleep(Duration::from_millis(10)).await;
    assert_eq!(phase_of(&world, i, Axis::NorthSouth), Phase::Green);

    // Green 4.0s, yellow 1.3s
    sleep(Duration::from_millis(4_000)).await;
    assert_eq!(phase_of(&world, i, Axis::NorthSouth), Phase::Yellow);

    sleep(Duration::from_millis(1_300)).await;
    assert_eq!(phase_of(&world, i, Axis::NorthSouth), Phase::Red);
    assert_eq!(phase_of(&world, i, Axis::EastWest), Phase::Green);

    sleep(Duration::from_millis(4_000)).await;
    assert_eq!(phase_of(&world, i, Axis::EastWest), Phase::Yellow);

    sleep(Duration::from_millis(1_300)).await;
    assert_eq!(phase_of(&world, i, Axis::NorthSouth), Phase::Green);
    assert_eq!(phase_of(&world, i, Axis::EastWest), Phase::Red);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_run_applies_and_expires_preemption() {
    let config = SimConfig::default();
    let (world, _) = SimWorld::create_city(&config, 1).unwrap();
    let intersections = world.intersections();
    let (handle, inbox) = protocol::channel(8);
    let (shutdown_tx, shutdown) = watch::channel(false);
    let ctl = SignalController::new(world.clone(), Arc::new(config), inbox);
    let task = tokio::spawn(ctl.run(shutdown));
    let target = &intersections[3];
    let other = &intersections[0];

    // t = 1.0s: base cycle is NS green
    sleep(Duration::from_secs(1)).await;
    handle
        .request_preemption("test", target.id, Axis::EastWest, Duration::from_secs(2))
        .unwrap();
    sleep(Duration::from_millis(1)).await;
    assert_eq!(phase_of(&world, target, Axis::EastWest), Phase::Green);
    assert_eq!(phase_of(&world, target, Axis::NorthSouth), Phase::Red);
    assert_eq!(phase_of(&world, other, Axis::NorthSouth), Phase::Green);

    // Still forced just before expiry
    sleep(Duration::from_millis(1_990)).await;
    assert_eq!(phase_of(&world, target, Axis::EastWest), Phase::Green);

    // t = 3.0s: expired without renewal, back to NS green
    sleep(Duration::from_millis(20)).await;
    assert_eq!(phase_of(&world, target, Axis::NorthSouth), Phase::Green);
    assert_eq!(phase_of(&world, target, Axis::EastWest), Phase::Red);

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}
