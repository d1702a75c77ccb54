//! Vehicle entities: motion state and waiting-time accounting
//!
//! Standalone data; each vehicle is written only by its own agent.

use std::time::Duration;

use tokio::time::Instant;

use super::geometry::{heading_towards, WaypointRing};
use super::types::{Vec2, VehicleClass, VehicleId};

/// How a vehicle picks its next waypoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Cycles around the waypoint ring forever
    Loop,
    /// Drives straight across and leaves the simulated area
    Transit,
}

/// Result of moving a vehicle by one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// The waypoint was reached and a new one selected
    NewWaypoint,
}

/// A vehicle in the traffic simulation
#[derive(Debug, Clone, PartialEq)]
pub struct SimVehicle {
    pub id: VehicleId,
    pub position: Vec2,
    /// Unit vector
    pub heading: Vec2,
    /// Cruise speed in world units per second
    pub speed: f32,
    pub target: Vec2,
    pub class: VehicleClass,
    pub route: Route,
    /// Flushed waiting time, excluding any stop still in progress
    pub waiting_total: Duration,
    /// Set iff the vehicle is currently stopped
    pub stopped_since: Option<Instant>,
}

impl SimVehicle {
    pub fn new(
        id: VehicleId,
        position: Vec2,
        target: Vec2,
        speed: f32,
        class: VehicleClass,
        route: Route,
    ) -> Self {
        Self {
            id,
            position,
            heading: heading_towards(&position, &target),
            speed,
            target,
            class,
            route,
            waiting_total: Duration::ZERO,
            stopped_since: None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped_since.is_some()
    }

    /// Record whether the vehicle is stopped at `now`.
    ///
    /// Starting a stop stamps the time once; resuming flushes the elapsed
    /// interval into the total and clears the stamp.
    pub fn update_wait(&mut self, stopped: bool, now: Instant) {
        match (stopped, self.stopped_since) {
            (true, None) => self.stopped_since = Some(now),
            (false, Some(since)) => {
                self.waiting_total += now.saturating_duration_since(since);
                self.stopped_since = None;
            }
            _ => {}
        }
    }

    /// Total waiting time including the stop in progress, if any
    pub fn waiting_time(&self, now: Instant) -> Duration {
        let partial = self
            .stopped_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or(Duration::ZERO);
        self.waiting_total + partial
    }

    /// Move along the heading by `speed * dt * factor`.
    ///
    /// Loop vehicles that come within `waypoint_radius` of their target
    /// switch to the next ring point and turn towards it.
    pub fn advance(
        &mut self,
        dt: Duration,
        factor: f32,
        ring: &WaypointRing,
        waypoint_radius: f32,
    ) -> MoveOutcome {
        self.position += self.heading * (self.speed * dt.as_secs_f32() * factor);

        if self.route == Route::Loop && self.position.distance(&self.target) < waypoint_radius {
            self.target = ring.next_waypoint(&self.target);
            self.heading = heading_towards(&self.position, &self.target);
            return MoveOutcome::NewWaypoint;
        }
        MoveOutcome::Moved
    }
}
