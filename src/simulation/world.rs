//! Shared world model
//!
//! One registry of signals and vehicles behind a single mutex. Every access
//! goes through a closure so the lock is released on every exit path and
//! can never be held across an `.await`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use log::info;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::config::SimConfig;
use super::geometry::heading_towards;
use super::signal::{Intersection, SimSignal};
use super::types::{Axis, IntersectionId, SignalId, SimId, Vec2, VehicleClass, VehicleId};
use super::vehicle::{Route, SimVehicle};

/// Identifier of any entity in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityId {
    Signal(SignalId),
    Vehicle(VehicleId),
}

/// Snapshot of any entity in the registry
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Signal(SimSignal),
    Vehicle(SimVehicle),
}

/// The registry guarded by the world lock
#[derive(Debug, Default)]
pub struct WorldState {
    signals: BTreeMap<SignalId, SimSignal>,
    vehicles: BTreeMap<VehicleId, SimVehicle>,
    /// Global priority mode, toggled by user input
    pub priority_mode: bool,
    next_id: usize,
}

impl WorldState {
    fn next_sim_id(&mut self) -> SimId {
        let id = SimId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn allocate_signal_id(&mut self) -> SignalId {
        SignalId(self.next_sim_id())
    }

    pub fn allocate_vehicle_id(&mut self) -> VehicleId {
        VehicleId(self.next_sim_id())
    }

    pub fn allocate_intersection_id(&mut self) -> IntersectionId {
        IntersectionId(self.next_sim_id())
    }

    pub fn signal(&self, id: SignalId) -> Option<&SimSignal> {
        self.signals.get(&id)
    }

    pub fn signal_mut(&mut self, id: SignalId) -> Option<&mut SimSignal> {
        self.signals.get_mut(&id)
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&SimVehicle> {
        self.vehicles.get(&id)
    }

    pub fn vehicle_mut(&mut self, id: VehicleId) -> Option<&mut SimVehicle> {
        self.vehicles.get_mut(&id)
    }

    pub fn signals(&self) -> impl Iterator<Item = &SimSignal> {
        self.signals.values()
    }

    pub fn signals_mut(&mut self) -> impl Iterator<Item = &mut SimSignal> {
        self.signals.values_mut()
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &SimVehicle> {
        self.vehicles.values()
    }

    pub fn upsert_signal(&mut self, signal: SimSignal) {
        self.signals.insert(signal.id, signal);
    }

    pub fn upsert_vehicle(&mut self, vehicle: SimVehicle) {
        self.vehicles.insert(vehicle.id, vehicle);
    }

    pub fn remove_vehicle(&mut self, id: VehicleId) -> Option<SimVehicle> {
        self.vehicles.remove(&id)
    }

    /// Intersections derived from complete signal pairs, ordered by id
    pub fn intersections(&self) -> Vec<Intersection> {
        let mut pairs: BTreeMap<IntersectionId, (Option<&SimSignal>, Option<&SimSignal>)> =
            BTreeMap::new();
        for signal in self.signals.values() {
            let entry = pairs.entry(signal.intersection).or_default();
            match signal.axis {
                Axis::NorthSouth => entry.0 = Some(signal),
                Axis::EastWest => entry.1 = Some(signal),
            }
        }
        pairs
            .into_values()
            .filter_map(|pair| match pair {
                (Some(ns), Some(ew)) => Intersection::from_pair(ns, ew),
                _ => None,
            })
            .collect()
    }
}

/// Shared handle to the world model
///
/// Cloning the handle shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct SimWorld {
    state: Arc<Mutex<WorldState>>,
}

/// Vehicles created by the world-build call
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub ordinary: Vec<VehicleId>,
    pub priority: Vec<VehicleId>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether some task holds the registry lock right now
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Run `f` with the registry locked
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut WorldState) -> R) -> R {
        let mut guard = self.state.lock();
        f(&mut guard)
    }

    pub fn get(&self, id: EntityId) -> Option<Entity> {
        self.with_lock(|state| match id {
            EntityId::Signal(id) => state.signal(id).cloned().map(Entity::Signal),
            EntityId::Vehicle(id) => state.vehicle(id).cloned().map(Entity::Vehicle),
        })
    }

    pub fn signal(&self, id: SignalId) -> Option<SimSignal> {
        self.with_lock(|state| state.signal(id).cloned())
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<SimVehicle> {
        self.with_lock(|state| state.vehicle(id).cloned())
    }

    pub fn upsert_signal(&self, signal: SimSignal) {
        self.with_lock(|state| state.upsert_signal(signal));
    }

    pub fn upsert_vehicle(&self, vehicle: SimVehicle) {
        self.with_lock(|state| state.upsert_vehicle(vehicle));
    }

    pub fn remove_vehicle(&self, id: VehicleId) -> Option<SimVehicle> {
        self.with_lock(|state| state.remove_vehicle(id))
    }

    pub fn for_each_signal(&self, f: impl FnMut(&SimSignal)) {
        self.with_lock(|state| state.signals().for_each(f));
    }

    pub fn for_each_vehicle(&self, f: impl FnMut(&SimVehicle)) {
        self.with_lock(|state| state.vehicles().for_each(f));
    }

    pub fn intersections(&self) -> Vec<Intersection> {
        self.with_lock(|state| state.intersections())
    }

    pub fn priority_mode(&self) -> bool {
        self.with_lock(|state| state.priority_mode)
    }

    pub fn set_priority_mode(&self, active: bool) {
        self.with_lock(|state| state.priority_mode = active);
    }

    /// Flip the global priority mode and return the new value
    pub fn toggle_priority_mode(&self) -> bool {
        self.with_lock(|state| {
            state.priority_mode = !state.priority_mode;
            state.priority_mode
        })
    }

    /// Waiting time of every vehicle, including stops still in progress
    pub fn waiting_times(&self, now: Instant) -> Vec<(VehicleId, Duration)> {
        self.with_lock(|state| {
            state
                .vehicles()
                .map(|v| (v.id, v.waiting_time(now)))
                .collect()
        })
    }

    /// Add an intersection with its two signals and return its id.
    ///
    /// `arrival` is the heading of traffic that reaches the intersection on
    /// the loop route and `departure` the heading it leaves with. The arrival
    /// signal sits just before the centre; the departure signal sits far
    /// behind departing traffic so it never governs a vehicle on the route.
    pub fn add_intersection(
        &self,
        center: Vec2,
        arrival: Vec2,
        departure: Vec2,
        config: &SimConfig,
    ) -> IntersectionId {
        let layout = &config.layout;
        self.with_lock(|state| {
            let id = state.allocate_intersection_id();
            for (heading, offset) in [
                (arrival, layout.arrival_offset),
                (departure, layout.departure_offset),
            ] {
                let axis = Axis::of_heading(&heading);
                // Keep each signal on its own road line so the centre can be derived.
                let position = match axis {
                    Axis::NorthSouth => Vec2::new(center.x, center.y - heading.y.signum() * offset),
                    Axis::EastWest => Vec2::new(center.x - heading.x.signum() * offset, center.y),
                };
                let signal_id = state.allocate_signal_id();
                state.upsert_signal(SimSignal::new(signal_id, id, position, axis));
            }
            id
        })
    }

    /// Add a vehicle and return its id
    pub fn add_vehicle(
        &self,
        position: Vec2,
        target: Vec2,
        speed: f32,
        class: VehicleClass,
        route: Route,
    ) -> VehicleId {
        self.with_lock(|state| {
            let id = state.allocate_vehicle_id();
            state.upsert_vehicle(SimVehicle::new(id, position, target, speed, class, route));
            id
        })
    }

    /// Build the default city: four signalled intersections on a loop route,
    /// `ordinary_cars` ordinary vehicles and one priority vehicle.
    pub fn create_city(config: &SimConfig, ordinary_cars: usize) -> Result<(Self, Roster)> {
        ensure!(ordinary_cars >= 1, "the city needs at least one ordinary vehicle");
        config.validate()?;

        let world = SimWorld::new();
        let centers = config.layout.intersection_centers();
        let n = centers.len();

        for i in 0..n {
            let prev = centers[(i + n - 1) % n];
            let center = centers[i];
            let next = centers[(i + 1) % n];
            world.add_intersection(
                center,
                heading_towards(&prev, &center),
                heading_towards(&center, &next),
                config,
            );
        }

        let mut roster = Roster::default();

        // Ordinary vehicles spread over the legs of the loop
        for i in 0..ordinary_cars {
            let leg = i % n;
            let lap = (i / n) as f32;
            let start = centers[leg];
            let target = centers[(leg + 1) % n];
            let along = (0.3 * lap).min(0.6);
            let position = start + (target - start) * along;
            roster.ordinary.push(world.add_vehicle(
                position,
                target,
                config.ordinary_speed,
                VehicleClass::Ordinary,
                Route::Loop,
            ));
        }

        // The priority vehicle starts on the opposite side of the loop
        roster.priority.push(world.add_vehicle(
            centers[2],
            centers[3],
            config.priority_speed,
            VehicleClass::Priority,
            Route::Loop,
        ));

        info!(
            "World built: {} intersections, {} ordinary vehicles, {} priority vehicles",
            n,
            roster.ordinary.len(),
            roster.priority.len()
        );
        Ok((world, roster))
    }
}
