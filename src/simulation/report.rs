//! Read-only consumers of the world model
//!
//! Snapshots are taken in one critical section and formatted afterwards, so
//! rendering never holds the world lock.

use std::time::Duration;

use log::info;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};

use super::config::LayoutConfig;
use super::signal::SimSignal;
use super::types::{Axis, Phase, VehicleClass, VehicleId};
use super::vehicle::SimVehicle;
use super::world::SimWorld;

/// Copy of every entity at one instant
#[derive(Debug, Clone)]
pub struct WorldSnapshot {
    pub signals: Vec<SimSignal>,
    pub vehicles: Vec<SimVehicle>,
    pub priority_mode: bool,
    /// Waiting time per vehicle, including stops in progress
    pub waiting: Vec<(VehicleId, Duration)>,
}

impl WorldSnapshot {
    pub fn capture(world: &SimWorld, now: Instant) -> Self {
        world.with_lock(|state| {
            let vehicles: Vec<SimVehicle> = state.vehicles().cloned().collect();
            let waiting = vehicles
                .iter()
                .map(|v| (v.id, v.waiting_time(now)))
                .collect();
            Self {
                signals: state.signals().cloned().collect(),
                vehicles,
                priority_mode: state.priority_mode,
                waiting,
            }
        })
    }

    /// Number of green signals on `axis`
    pub fn greens(&self, axis: Axis) -> usize {
        self.signals
            .iter()
            .filter(|s| s.axis == axis && s.phase == Phase::Green)
            .count()
    }

    pub fn total_waiting(&self) -> Duration {
        self.waiting.iter().map(|(_, w)| *w).sum()
    }

    pub fn stopped(&self) -> usize {
        self.vehicles.iter().filter(|v| v.is_stopped()).count()
    }

    /// One-line heads-up display
    pub fn hud_line(&self) -> String {
        let waits: Vec<String> = self
            .waiting
            .iter()
            .map(|(id, w)| format!("{}={:.1}s", id, w.as_secs_f32()))
            .collect();
        format!(
            "NS green: {} | EW green: {} | priority mode: {} | waiting: {}",
            self.greens(Axis::NorthSouth),
            self.greens(Axis::EastWest),
            if self.priority_mode { "ON" } else { "OFF" },
            waits.join(" ")
        )
    }

    pub fn print_summary(&self, elapsed: Duration) {
        println!("=== Traffic Priority Summary ===");
        println!("Time: {:.2}s", elapsed.as_secs_f32());
        println!(
            "Signals: {}, Vehicles: {}",
            self.signals.len(),
            self.vehicles.len()
        );
        println!(
            "Priority mode: {}",
            if self.priority_mode { "ON" } else { "OFF" }
        );
        println!();

        println!("--- Signals ---");
        for signal in &self.signals {
            println!(
                "  Signal {} (intersection {}, {}): {}",
                signal.id, signal.intersection, signal.axis, signal.phase
            );
        }

        println!("--- Vehicles ---");
        for vehicle in &self.vehicles {
            let wait = self
                .waiting
                .iter()
                .find(|(id, _)| *id == vehicle.id)
                .map(|(_, w)| *w)
                .unwrap_or_default();
            println!(
                "  {} {:?} at ({:.1}, {:.1}) -> ({:.0}, {:.0}), waited {:.2}s{}",
                vehicle.id,
                vehicle.class,
                vehicle.position.x,
                vehicle.position.y,
                vehicle.target.x,
                vehicle.target.y,
                wait.as_secs_f32(),
                if vehicle.is_stopped() { " [stopped]" } else { "" }
            );
        }
        println!(
            "Total waiting time: {:.2}s",
            self.total_waiting().as_secs_f32()
        );
        println!();
    }

    /// ASCII map of roads, signals and vehicles
    pub fn draw_map(&self, layout: &LayoutConfig) {
        println!("\n=== World Map ===");
        println!("Legend: G/Y/R=Signal phase, C=Car, E=Priority vehicle, +=Intersection");
        println!();
        for line in self.render_map(layout) {
            println!("{}", line);
        }
        println!();
    }

    /// Map rows, top to bottom
    pub fn render_map(&self, layout: &LayoutConfig) -> Vec<String> {
        // World units per character
        const SCALE_X: f32 = 10.0;
        const SCALE_Y: f32 = 20.0;

        let width = (layout.width / SCALE_X).ceil() as usize + 1;
        let height = (layout.height / SCALE_Y).ceil() as usize + 1;
        let mut grid = vec![vec![' '; width]; height];

        let to_grid = |x: f32, y: f32| -> (usize, usize) {
            let col = (x.max(0.0) / SCALE_X).round() as usize;
            let row = (y.max(0.0) / SCALE_Y).round() as usize;
            (row.min(height - 1), col.min(width - 1))
        };

        for y in layout.roads_y {
            let (row, _) = to_grid(0.0, y);
            for cell in grid[row].iter_mut() {
                *cell = '-';
            }
        }
        for x in layout.roads_x {
            let (_, col) = to_grid(x, 0.0);
            for row in grid.iter_mut() {
                row[col] = if row[col] == '-' { '+' } else { '|' };
            }
        }

        for signal in &self.signals {
            let (row, col) = to_grid(signal.position.x, signal.position.y);
            grid[row][col] = match signal.phase {
                Phase::Green => 'G',
                Phase::Yellow => 'Y',
                Phase::Red => 'R',
            };
        }

        for vehicle in &self.vehicles {
            let (row, col) = to_grid(vehicle.position.x, vehicle.position.y);
            grid[row][col] = match vehicle.class {
                VehicleClass::Ordinary => 'C',
                VehicleClass::Priority => 'E',
            };
        }

        grid.into_iter().map(|row| row.into_iter().collect()).collect()
    }
}

/// Log a HUD line every `refresh` until shutdown
pub async fn render_loop(world: SimWorld, refresh: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let snapshot = WorldSnapshot::capture(&world, Instant::now());
                info!("{}", snapshot.hud_line());
            }
        }
    }
}
