//! Simulation configuration
//!
//! Every timing and threshold used by the controller and the agents lives
//! here and is threaded into constructors; nothing reads module globals.

use std::time::Duration;

use anyhow::{ensure, Result};

use super::geometry::WaypointRing;
use super::protocol::MAX_PREEMPT;
use super::types::Vec2;

/// Upper bound for every configured period, so deadlines stay in clock range
pub const MAX_PERIOD: Duration = Duration::from_secs(3_600);

/// Phase durations of the base signal cycle
#[derive(Debug, Clone)]
pub struct SignalTimings {
    pub green: Duration,
    pub yellow: Duration,
}

impl Default for SignalTimings {
    fn default() -> Self {
        Self {
            green: Duration::from_secs_f32(4.0),
            yellow: Duration::from_secs_f32(1.3),
        }
    }
}

/// Per-tick driving behavior shared by every vehicle
#[derive(Debug, Clone)]
pub struct DrivingConfig {
    /// Fixed time step of a vehicle loop
    pub tick: Duration,
    /// How long a state query waits for its reply
    pub query_timeout: Duration,
    /// Distance to any signal below which the vehicle starts querying
    pub proximity: f32,
    /// A red signal closer than this stops the vehicle
    pub red_stop_distance: f32,
    /// A yellow signal closer than this slows the vehicle
    pub yellow_slow_distance: f32,
    pub yellow_factor: f32,
    /// Speed factor applied when a query goes unanswered
    pub uncertain_factor: f32,
    /// Distance at which the current waypoint counts as reached
    pub waypoint_radius: f32,
}

impl Default for DrivingConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            query_timeout: Duration::from_millis(50),
            proximity: 120.0,
            red_stop_distance: 70.0,
            yellow_slow_distance: 80.0,
            yellow_factor: 0.35,
            uncertain_factor: 0.6,
            waypoint_radius: 8.0,
        }
    }
}

/// Behavior specific to priority vehicles
#[derive(Debug, Clone)]
pub struct PriorityConfig {
    /// Speed factor while priority mode is active
    pub priority_factor: f32,
    /// Distance to the intersection ahead below which preemption is requested
    pub preempt_distance: f32,
    pub preempt_duration: Duration,
    /// Another vehicle ahead closer than this is an imminent collision
    pub collision_gap: f32,
    pub collision_factor: f32,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            priority_factor: 1.25,
            preempt_distance: 130.0,
            preempt_duration: Duration::from_secs(6),
            collision_gap: 45.0,
            collision_factor: 0.2,
        }
    }
}

/// Geometry of the simulated area
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub width: f32,
    pub height: f32,
    /// Vertical road centre lines
    pub roads_x: [f32; 2],
    /// Horizontal road centre lines
    pub roads_y: [f32; 2],
    /// Distance within which a position matches a ring point
    pub ring_tolerance: f32,
    /// Offset of the arrival signal before the intersection centre
    pub arrival_offset: f32,
    /// Offset of the departure signal behind the intersection centre
    pub departure_offset: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            width: 1100.0,
            height: 720.0,
            roads_x: [366.0, 733.0],
            roads_y: [240.0, 480.0],
            ring_tolerance: 4.0,
            arrival_offset: 18.0,
            departure_offset: 120.0,
        }
    }
}

impl LayoutConfig {
    /// Intersection centres in driving order of the loop route (clockwise)
    pub fn intersection_centers(&self) -> [Vec2; 4] {
        let [x0, x1] = self.roads_x;
        let [y0, y1] = self.roads_y;
        [
            Vec2::new(x0, y0),
            Vec2::new(x1, y0),
            Vec2::new(x1, y1),
            Vec2::new(x0, y1),
        ]
    }

    /// The loop route runs along the road centre lines, turning at each
    /// intersection centre
    pub fn ring(&self) -> WaypointRing {
        WaypointRing::new(self.intersection_centers(), self.ring_tolerance)
    }

    /// Whether a point lies inside the simulated area
    pub fn contains(&self, p: &Vec2) -> bool {
        p.x >= 0.0 && p.x <= self.width && p.y >= 0.0 && p.y <= self.height
    }
}

/// Spawning of transient priority vehicles
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Probability of a spawn at each interval
    pub chance: f64,
    pub max_active: usize,
    pub speed: f32,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(1),
            chance: 0.08,
            max_active: 2,
            speed: 150.0,
        }
    }
}

/// Complete simulation configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub timings: SignalTimings,
    pub driving: DrivingConfig,
    pub priority: PriorityConfig,
    pub layout: LayoutConfig,
    pub spawn: SpawnConfig,
    pub ordinary_speed: f32,
    pub priority_speed: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            timings: SignalTimings::default(),
            driving: DrivingConfig::default(),
            priority: PriorityConfig::default(),
            layout: LayoutConfig::default(),
            spawn: SpawnConfig::default(),
            ordinary_speed: 90.0,
            priority_speed: 150.0,
        }
    }
}

impl SimConfig {
    /// Reject values the controller or the agents cannot work with
    pub fn validate(&self) -> Result<()> {
        for (name, period) in [
            ("green duration", self.timings.green),
            ("yellow duration", self.timings.yellow),
            ("vehicle tick", self.driving.tick),
            ("query timeout", self.driving.query_timeout),
            ("spawn interval", self.spawn.interval),
        ] {
            check_period(name, period)?;
        }

        let d = &self.driving;
        ensure!(
            d.uncertain_factor > 0.0 && d.uncertain_factor < 1.0,
            "uncertain factor must lie in (0, 1), got {}",
            d.uncertain_factor
        );
        ensure!(
            d.yellow_factor > 0.0 && d.yellow_factor < 1.0,
            "yellow factor must lie in (0, 1), got {}",
            d.yellow_factor
        );
        ensure!(
            d.yellow_slow_distance >= d.red_stop_distance,
            "yellow slow distance ({}) must not be shorter than red stop distance ({})",
            d.yellow_slow_distance,
            d.red_stop_distance
        );

        let p = &self.priority;
        ensure!(
            p.priority_factor > 0.0,
            "priority factor must be positive"
        );
        ensure!(
            p.collision_factor > 0.0,
            "collision factor must be positive, priority vehicles never stop"
        );
        ensure!(
            !p.preempt_duration.is_zero() && p.preempt_duration <= MAX_PREEMPT,
            "preemption duration must lie in (0, {}s], got {:?}",
            MAX_PREEMPT.as_secs(),
            p.preempt_duration
        );

        let l = &self.layout;
        ensure!(
            l.departure_offset > d.yellow_slow_distance,
            "departure signal offset {} must exceed the yellow slow distance {}",
            l.departure_offset,
            d.yellow_slow_distance
        );
        ensure!(
            l.arrival_offset < d.red_stop_distance,
            "arrival signal offset {} must be shorter than the red stop distance {}",
            l.arrival_offset,
            d.red_stop_distance
        );
        ensure!(
            (0.0..=1.0).contains(&self.spawn.chance),
            "spawn chance must lie in [0, 1]"
        );
        ensure!(
            self.ordinary_speed > 0.0 && self.priority_speed > 0.0,
            "vehicle speeds must be positive"
        );
        Ok(())
    }
}

/// A period must be positive and at most [`MAX_PERIOD`]
pub fn check_period(name: &str, period: Duration) -> Result<()> {
    ensure!(!period.is_zero(), "{} must be positive", name);
    ensure!(
        period <= MAX_PERIOD,
        "{} must not exceed {}s, got {:?}",
        name,
        MAX_PERIOD.as_secs(),
        period
    );
    Ok(())
}
