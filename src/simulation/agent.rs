//! Vehicle agent loop
//!
//! Every vehicle runs the same tick: observe the world, optionally talk to
//! the signal controller, let its [`Behavior`] pick a speed factor, then
//! move. Only the behavior differs between ordinary and priority vehicles.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use super::config::SimConfig;
use super::geometry::{nearest_ahead, WaypointRing};
use super::protocol::{ControllerHandle, ProtocolError};
use super::types::{Axis, IntersectionId, Phase, Vec2, VehicleId};
use super::vehicle::{MoveOutcome, Route};
use super::world::SimWorld;

/// What a vehicle sees of the world at the start of a tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickContext {
    pub id: VehicleId,
    pub position: Vec2,
    pub heading: Vec2,
    /// Some signal lies within the proximity threshold
    pub near_signal: bool,
    /// Global priority mode flag
    pub priority_mode: bool,
    /// Closest intersection ahead and the distance to its centre
    pub intersection_ahead: Option<(IntersectionId, f32)>,
    /// Distance to the closest other vehicle ahead
    pub vehicle_ahead: Option<f32>,
}

/// Outcome of the signal query for this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalObservation {
    /// The behavior did not ask
    NotQueried,
    /// Timed out or the reply could not be used
    Unanswered,
    /// No signal lies ahead
    NoneAhead,
    Seen { phase: Phase, distance: f32 },
}

/// Speed decision for one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCommand {
    pub factor: f32,
}

impl MotionCommand {
    pub const STOP: MotionCommand = MotionCommand { factor: 0.0 };
    pub const CRUISE: MotionCommand = MotionCommand { factor: 1.0 };

    pub fn new(factor: f32) -> Self {
        Self { factor }
    }

    pub fn is_stop(&self) -> bool {
        self.factor == 0.0
    }
}

/// A preemption the behavior wants to send this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreemptionPlan {
    pub intersection: IntersectionId,
    pub axis: Axis,
    pub duration: Duration,
}

/// Per-kind decision logic plugged into the shared agent loop
pub trait Behavior: Send + 'static {
    /// Short label used in logs and message sender names
    fn label(&self) -> &'static str;

    /// Whether to query the controller this tick
    fn wants_signal(&self, ctx: &TickContext) -> bool;

    /// Speed factor for this tick
    fn decide(&mut self, ctx: &TickContext, observation: SignalObservation) -> MotionCommand;

    fn plan_preemption(&mut self, _ctx: &TickContext, _now: Instant) -> Option<PreemptionPlan> {
        None
    }

    /// Called once a planned preemption was handed to the transport
    fn confirm_preemption(&mut self, _plan: &PreemptionPlan, _now: Instant) {}
}

/// Whether the agent keeps running after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The entity is gone or left the simulated area
    Finished,
}

/// A vehicle's decision loop
pub struct VehicleAgent<B: Behavior> {
    id: VehicleId,
    name: String,
    behavior: B,
    world: SimWorld,
    controller: ControllerHandle,
    config: Arc<SimConfig>,
    ring: WaypointRing,
}

impl<B: Behavior> VehicleAgent<B> {
    pub fn new(
        id: VehicleId,
        behavior: B,
        world: SimWorld,
        controller: ControllerHandle,
        config: Arc<SimConfig>,
    ) -> Self {
        let name = format!("{}-{}", behavior.label(), id);
        let ring = config.layout.ring();
        Self {
            id,
            name,
            behavior,
            world,
            controller,
            config,
            ring,
        }
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    /// Gather everything the behavior needs in one critical section
    pub fn observe(&self) -> Option<TickContext> {
        let proximity = self.config.driving.proximity;
        self.world.with_lock(|state| {
            let me = state.vehicle(self.id)?;
            let (position, heading) = (me.position, me.heading);

            let near_signal = state
                .signals()
                .any(|s| s.position.distance(&position) < proximity);

            let centers = state
                .intersections()
                .into_iter()
                .map(|i| (i.id, i.center));
            let intersection_ahead = nearest_ahead(&position, &heading, centers);

            let others = state
                .vehicles()
                .filter(|v| v.id != self.id)
                .map(|v| (v.id, v.position));
            let vehicle_ahead = nearest_ahead(&position, &heading, others).map(|(_, d)| d);

            Some(TickContext {
                id: self.id,
                position,
                heading,
                near_signal,
                priority_mode: state.priority_mode,
                intersection_ahead,
                vehicle_ahead,
            })
        })
    }

    async fn observe_signal(&self, ctx: &TickContext) -> SignalObservation {
        let reply = self
            .controller
            .query_state(
                &self.name,
                ctx.position,
                ctx.heading,
                self.config.driving.query_timeout,
            )
            .await;

        match reply {
            Ok(Some(report)) => SignalObservation::Seen {
                phase: report.phase,
                distance: ctx.position.distance(&report.position),
            },
            Ok(None) => SignalObservation::NoneAhead,
            Err(ProtocolError::Timeout(_)) => {
                debug!("{}: state query timed out", self.name);
                SignalObservation::Unanswered
            }
            Err(e) => {
                warn!("{}: state query failed: {}", self.name, e);
                SignalObservation::Unanswered
            }
        }
    }

    /// Run one tick at `now`
    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        let Some(ctx) = self.observe() else {
            return TickOutcome::Finished;
        };

        if let Some(plan) = self.behavior.plan_preemption(&ctx, now) {
            match self.controller.request_preemption(
                &self.name,
                plan.intersection,
                plan.axis,
                plan.duration,
            ) {
                Ok(()) => {
                    debug!(
                        "{}: requested {} green at intersection {}",
                        self.name, plan.axis, plan.intersection
                    );
                    self.behavior.confirm_preemption(&plan, now);
                }
                Err(e) => warn!("{}: preemption request not sent: {}", self.name, e),
            }
        }

        let observation = if self.behavior.wants_signal(&ctx) {
            self.observe_signal(&ctx).await
        } else {
            SignalObservation::NotQueried
        };

        let command = self.behavior.decide(&ctx, observation);
        let dt = self.config.driving.tick;
        let radius = self.config.driving.waypoint_radius;
        let layout = &self.config.layout;
        let ring = &self.ring;

        let (outcome, new_target) = self.world.with_lock(|state| {
            let Some(vehicle) = state.vehicle_mut(self.id) else {
                return (TickOutcome::Finished, None);
            };
            vehicle.update_wait(command.is_stop(), now);
            let new_target = match vehicle.advance(dt, command.factor, ring, radius) {
                MoveOutcome::NewWaypoint => Some(vehicle.target),
                MoveOutcome::Moved => None,
            };

            if vehicle.route == Route::Transit && !layout.contains(&vehicle.position) {
                let id = vehicle.id;
                state.remove_vehicle(id);
                return (TickOutcome::Finished, new_target);
            }
            (TickOutcome::Continue, new_target)
        });

        if let Some(target) = new_target {
            debug!("{} heading to ({:.0}, {:.0})", self.id, target.x, target.y);
        }
        outcome
    }

    /// Tick every `DrivingConfig::tick` until shutdown or until the vehicle
    /// is finished
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let dt = self.config.driving.tick;
        debug!("{} started", self.name);
        loop {
            if self.tick(Instant::now()).await == TickOutcome::Finished {
                info!("{} left the simulation", self.name);
                return;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(dt) => {}
            }
        }
        debug!("{} stopped", self.name);
    }
}
