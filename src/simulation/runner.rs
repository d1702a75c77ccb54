//! Wires the world, the controller and every agent together and runs them
//! for a fixed time

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep, Instant};

use super::agent::VehicleAgent;
use super::config::{check_period, SimConfig};
use super::controller::SignalController;
use super::ordinary::OrdinaryBehavior;
use super::priority::PriorityBehavior;
use super::protocol::{self, ControllerHandle, Envelope};
use super::report::{render_loop, WorldSnapshot};
use super::spawner::Spawner;
use super::world::{Roster, SimWorld};

/// Capacity of the controller's mailbox
const MAILBOX_CAPACITY: usize = 256;

/// Run options that are not part of the driving configuration
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub ordinary_cars: usize,
    /// Seed for the spawner's RNG
    pub seed: Option<u64>,
    /// Initial value of the global priority mode
    pub priority_mode: bool,
    /// Flip the global priority mode at this period
    pub toggle_every: Option<Duration>,
    /// Log a HUD line at this period
    pub refresh: Option<Duration>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            ordinary_cars: 4,
            seed: None,
            priority_mode: false,
            toggle_every: None,
            refresh: Some(Duration::from_secs(1)),
        }
    }
}

/// What a finished run leaves behind
#[derive(Debug, Clone)]
pub struct RunReport {
    pub elapsed: Duration,
    pub snapshot: WorldSnapshot,
    /// Emergency vehicles created by the spawner
    pub spawned: usize,
}

pub struct Simulation {
    world: SimWorld,
    roster: Roster,
    config: Arc<SimConfig>,
    options: SimulationOptions,
    controller: ControllerHandle,
    inbox: mpsc::Receiver<Envelope>,
}

impl Simulation {
    /// Validate the configuration and build the city
    pub fn build(config: SimConfig, options: SimulationOptions) -> Result<Self> {
        if let Some(every) = options.toggle_every {
            check_period("priority toggle period", every)?;
        }
        if let Some(refresh) = options.refresh {
            check_period("refresh period", refresh)?;
        }
        let (world, roster) = SimWorld::create_city(&config, options.ordinary_cars)
            .context("failed to build the city")?;
        world.set_priority_mode(options.priority_mode);
        let (controller, inbox) = protocol::channel(MAILBOX_CAPACITY);
        Ok(Self {
            world,
            roster,
            config: Arc::new(config),
            options,
            controller,
            inbox,
        })
    }

    pub fn world(&self) -> &SimWorld {
        &self.world
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn config(&self) -> &Arc<SimConfig> {
        &self.config
    }

    /// Run every task for `duration`, then shut them down and report
    pub async fn run_for(self, duration: Duration) -> Result<RunReport> {
        let Simulation {
            world,
            roster,
            config,
            options,
            controller,
            inbox,
        } = self;
        let (shutdown_tx, shutdown) = watch::channel(false);
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        let signal_controller = SignalController::new(world.clone(), config.clone(), inbox);
        tasks.spawn(signal_controller.run(shutdown.clone()));

        for id in roster.ordinary.iter().copied() {
            let behavior = OrdinaryBehavior::new(config.driving.clone());
            let agent =
                VehicleAgent::new(id, behavior, world.clone(), controller.clone(), config.clone());
            tasks.spawn(agent.run(shutdown.clone()));
        }
        for id in roster.priority.iter().copied() {
            let behavior = PriorityBehavior::new(config.driving.clone(), config.priority.clone());
            let agent =
                VehicleAgent::new(id, behavior, world.clone(), controller.clone(), config.clone());
            tasks.spawn(agent.run(shutdown.clone()));
        }

        if let Some(refresh) = options.refresh {
            tasks.spawn(render_loop(world.clone(), refresh, shutdown.clone()));
        }
        if let Some(every) = options.toggle_every {
            tasks.spawn(toggle_loop(world.clone(), every, shutdown.clone()));
        }

        let spawner = if config.spawn.enabled {
            let spawner = match options.seed {
                Some(seed) => {
                    Spawner::new_with_seed(world.clone(), controller.clone(), config.clone(), seed)
                }
                None => Spawner::new(world.clone(), controller.clone(), config.clone()),
            };
            Some(tokio::spawn(spawner.run(shutdown.clone())))
        } else {
            None
        };
        // Agents hold their own handles; the controller stops once they are all gone.
        drop(controller);

        info!(
            "Simulation running for {:.1}s with {} ordinary and {} priority vehicles",
            duration.as_secs_f32(),
            roster.ordinary.len(),
            roster.priority.len()
        );
        sleep(duration).await;

        shutdown_tx
            .send(true)
            .context("every simulation task stopped before shutdown")?;
        while let Some(result) = tasks.join_next().await {
            result.context("simulation task failed")?;
        }
        let spawned = match spawner {
            Some(handle) => handle.await.context("spawner task failed")?,
            None => 0,
        };

        let elapsed = started.elapsed();
        info!("Simulation stopped after {:.2}s", elapsed.as_secs_f32());
        Ok(RunReport {
            elapsed,
            snapshot: WorldSnapshot::capture(&world, Instant::now()),
            spawned,
        })
    }
}

/// Flip the global priority mode every `every` until shutdown
pub async fn toggle_loop(world: SimWorld, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let active = world.toggle_priority_mode();
                info!("Priority mode {}", if active { "ON" } else { "OFF" });
            }
        }
    }
}
