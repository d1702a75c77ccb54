//! Transient priority vehicles
//!
//! Emergency vehicles that enter at a map edge on one of the road lines,
//! drive straight across with priority and are removed once they leave the
//! simulated area.

use std::sync::Arc;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::agent::VehicleAgent;
use super::config::{LayoutConfig, SimConfig};
use super::priority::PriorityBehavior;
use super::protocol::ControllerHandle;
use super::types::{Vec2, VehicleClass, VehicleId};
use super::vehicle::Route;
use super::world::SimWorld;

/// Start and exit point of one straight crossing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub entry: Vec2,
    pub exit: Vec2,
}

/// Every edge-to-edge crossing along the road lines, both directions
pub fn crossings(layout: &LayoutConfig) -> Vec<Crossing> {
    let (w, h) = (layout.width, layout.height);
    let mut all = Vec::with_capacity(8);
    for x in layout.roads_x {
        let top = Vec2::new(x, 0.0);
        let bottom = Vec2::new(x, h);
        all.push(Crossing { entry: top, exit: bottom });
        all.push(Crossing { entry: bottom, exit: top });
    }
    for y in layout.roads_y {
        let left = Vec2::new(0.0, y);
        let right = Vec2::new(w, y);
        all.push(Crossing { entry: left, exit: right });
        all.push(Crossing { entry: right, exit: left });
    }
    all
}

pub struct Spawner {
    world: SimWorld,
    controller: ControllerHandle,
    config: Arc<SimConfig>,
    /// Optional seeded RNG for reproducible runs
    rng: Option<StdRng>,
    crossings: Vec<Crossing>,
    active: Vec<VehicleId>,
    spawned: usize,
    agents: JoinSet<()>,
}

impl Spawner {
    pub fn new(world: SimWorld, controller: ControllerHandle, config: Arc<SimConfig>) -> Self {
        Self::new_internal(world, controller, config, None)
    }

    /// Create a spawner whose choices are reproducible
    pub fn new_with_seed(
        world: SimWorld,
        controller: ControllerHandle,
        config: Arc<SimConfig>,
        seed: u64,
    ) -> Self {
        Self::new_internal(world, controller, config, Some(StdRng::seed_from_u64(seed)))
    }

    fn new_internal(
        world: SimWorld,
        controller: ControllerHandle,
        config: Arc<SimConfig>,
        rng: Option<StdRng>,
    ) -> Self {
        let crossings = crossings(&config.layout);
        Self {
            world,
            controller,
            config,
            rng,
            crossings,
            active: Vec::new(),
            spawned: 0,
            agents: JoinSet::new(),
        }
    }

    fn random_bool(&mut self, p: f64) -> bool {
        match &mut self.rng {
            Some(rng) => rng.random_bool(p),
            None => rand::rng().random_bool(p),
        }
    }

    fn choose_crossing(&mut self) -> Option<Crossing> {
        match &mut self.rng {
            Some(rng) => self.crossings.choose(rng).copied(),
            None => self.crossings.choose(&mut rand::rng()).copied(),
        }
    }

    /// Spawned vehicles still in the world
    pub fn active(&mut self) -> usize {
        let world = &self.world;
        self.active.retain(|id| world.vehicle(*id).is_some());
        self.active.len()
    }

    /// Total number of vehicles spawned so far
    pub fn spawned(&self) -> usize {
        self.spawned
    }

    /// Create a pinned priority vehicle on `crossing` and start its agent
    pub fn spawn_on(&mut self, crossing: Crossing, shutdown: &watch::Receiver<bool>) -> VehicleId {
        let id = self.world.add_vehicle(
            crossing.entry,
            crossing.exit,
            self.config.spawn.speed,
            VehicleClass::Priority,
            Route::Transit,
        );
        let behavior = PriorityBehavior::pinned(
            self.config.driving.clone(),
            self.config.priority.clone(),
        );
        let agent = VehicleAgent::new(
            id,
            behavior,
            self.world.clone(),
            self.controller.clone(),
            self.config.clone(),
        );
        info!(
            "Spawned emergency vehicle {} at ({:.0}, {:.0})",
            id, crossing.entry.x, crossing.entry.y
        );
        self.agents.spawn(agent.run(shutdown.clone()));
        self.active.push(id);
        self.spawned += 1;
        id
    }

    /// Roll for a spawn; returns the new vehicle if one was created
    pub fn try_spawn(&mut self, shutdown: &watch::Receiver<bool>) -> Option<VehicleId> {
        if self.active() >= self.config.spawn.max_active {
            return None;
        }
        if !self.random_bool(self.config.spawn.chance) {
            return None;
        }
        let crossing = self.choose_crossing()?;
        Some(self.spawn_on(crossing, shutdown))
    }

    /// Roll every spawn interval until shutdown, then wait for the spawned
    /// agents to stop
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> usize {
        let period = self.config.spawn.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.try_spawn(&shutdown);
                }
                Some(_) = self.agents.join_next(), if !self.agents.is_empty() => {}
            }
        }

        while self.agents.join_next().await.is_some() {}
        debug!("Spawner stopped after {} vehicles", self.spawned);
        self.spawned
    }
}
