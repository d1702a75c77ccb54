//! Signal entities and the intersections they form
//!
//! Standalone data; the phase controller is the only code that changes a
//! signal's phase.

use super::types::{Axis, IntersectionId, Phase, SignalId, Vec2};

/// A traffic signal governing one axis of one intersection
#[derive(Debug, Clone, PartialEq)]
pub struct SimSignal {
    pub id: SignalId,
    pub intersection: IntersectionId,
    /// Reference position the vehicles measure their distance to
    pub position: Vec2,
    pub axis: Axis,
    pub phase: Phase,
}

impl SimSignal {
    /// New signals start red until the controller applies its first layout
    pub fn new(id: SignalId, intersection: IntersectionId, position: Vec2, axis: Axis) -> Self {
        Self {
            id,
            intersection,
            position,
            axis,
            phase: Phase::Red,
        }
    }
}

/// An intersection derived from its pair of signals
#[derive(Debug, Clone, PartialEq)]
pub struct Intersection {
    pub id: IntersectionId,
    /// Meeting point of the two signal lines
    pub center: Vec2,
    pub north_south: SignalId,
    pub east_west: SignalId,
}

impl Intersection {
    /// Build from the pair of signals sharing one intersection id.
    ///
    /// The NS signal sits on the vertical road line and the EW signal on the
    /// horizontal one, so the centre is their crossing point.
    pub fn from_pair(north_south: &SimSignal, east_west: &SimSignal) -> Option<Self> {
        if north_south.intersection != east_west.intersection
            || north_south.axis != Axis::NorthSouth
            || east_west.axis != Axis::EastWest
        {
            return None;
        }
        Some(Self {
            id: north_south.intersection,
            center: Vec2::new(north_south.position.x, east_west.position.y),
            north_south: north_south.id,
            east_west: east_west.id,
        })
    }

    pub fn signal_for(&self, axis: Axis) -> SignalId {
        match axis {
            Axis::NorthSouth => self.north_south,
            Axis::EastWest => self.east_west,
        }
    }
}
