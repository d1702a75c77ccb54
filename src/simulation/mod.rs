//! Traffic signal and priority vehicle simulation
//!
//! Signal controllers and vehicle agents run as independent tasks over one
//! shared world model. Vehicles never write signals; they ask the controller
//! over the request/response protocol in [`protocol`].

pub mod agent;
pub mod config;
pub mod controller;
pub mod geometry;
pub mod ordinary;
pub mod priority;
pub mod protocol;
pub mod report;
pub mod runner;
pub mod signal;
pub mod spawner;
pub mod types;
pub mod vehicle;
pub mod world;

// Re-export public types for external use
// These may not be used within this crate but are part of the public API
#[allow(unused_imports)]
pub use agent::{
    Behavior, MotionCommand, PreemptionPlan, SignalObservation, TickContext, TickOutcome,
    VehicleAgent,
};
#[allow(unused_imports)]
pub use config::{
    DrivingConfig, LayoutConfig, PriorityConfig, SignalTimings, SimConfig, SpawnConfig,
};
#[allow(unused_imports)]
pub use controller::{CyclePhase, PreemptionRecord, PreemptionTable, SignalController};
#[allow(unused_imports)]
pub use ordinary::OrdinaryBehavior;
#[allow(unused_imports)]
pub use priority::PriorityBehavior;
#[allow(unused_imports)]
pub use protocol::{ControllerHandle, Envelope, ProtocolError, Reply, Request, SignalReport};
#[allow(unused_imports)]
pub use report::WorldSnapshot;
#[allow(unused_imports)]
pub use runner::{RunReport, Simulation, SimulationOptions};
#[allow(unused_imports)]
pub use signal::{Intersection, SimSignal};
#[allow(unused_imports)]
pub use types::{Axis, IntersectionId, Phase, SignalId, SimId, Vec2, VehicleClass, VehicleId};
#[allow(unused_imports)]
pub use vehicle::{Route, SimVehicle};
pub use world::{Entity, EntityId, Roster, SimWorld};
