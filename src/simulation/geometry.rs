//! Geometry and waypoint helpers
//!
//! Pure functions only; nothing here touches the world model.

use ordered_float::OrderedFloat;

use super::types::Vec2;

/// Dot products at or below this count as "not ahead"
const AHEAD_EPSILON: f32 = 1e-6;

pub fn distance(p: &Vec2, q: &Vec2) -> f32 {
    p.distance(q)
}

/// Unit vector along `v`, or the zero vector when `v` is zero
pub fn normalize(v: Vec2) -> Vec2 {
    let len = v.length();
    if len == 0.0 {
        Vec2::ZERO
    } else {
        Vec2::new(v.x / len, v.y / len)
    }
}

/// Heading from `from` towards `to`
pub fn heading_towards(from: &Vec2, to: &Vec2) -> Vec2 {
    normalize(*to - *from)
}

/// A fixed cyclic route of four points
#[derive(Debug, Clone, PartialEq)]
pub struct WaypointRing {
    points: [Vec2; 4],
    tolerance: f32,
}

impl WaypointRing {
    pub fn new(points: [Vec2; 4], tolerance: f32) -> Self {
        Self { points, tolerance }
    }

    pub fn points(&self) -> &[Vec2; 4] {
        &self.points
    }

    /// The point following `current` on the ring.
    ///
    /// If `current` is not within tolerance of any ring point, the closest
    /// ring point is returned instead (first one wins on equal distance).
    pub fn next_waypoint(&self, current: &Vec2) -> Vec2 {
        if let Some(i) = self
            .points
            .iter()
            .position(|p| p.distance(current) < self.tolerance)
        {
            return self.points[(i + 1) % self.points.len()];
        }

        self.points
            .iter()
            .copied()
            .min_by_key(|p| OrderedFloat(p.distance(current)))
            .unwrap_or(*current)
    }
}

/// Whether `target` lies strictly ahead of `position` along `heading`
pub fn is_ahead(position: &Vec2, heading: &Vec2, target: &Vec2) -> bool {
    (*target - *position).dot(heading) > AHEAD_EPSILON
}

/// Closest candidate lying ahead of `position` along `heading`.
///
/// Returns the candidate's key and its distance. Candidates whose
/// displacement is perpendicular to or behind the heading are skipped; equal
/// distances keep the first candidate in iteration order.
pub fn nearest_ahead<K, I>(position: &Vec2, heading: &Vec2, candidates: I) -> Option<(K, f32)>
where
    I: IntoIterator<Item = (K, Vec2)>,
{
    candidates
        .into_iter()
        .filter(|(_, p)| is_ahead(position, heading, p))
        .map(|(key, p)| (key, position.distance(&p)))
        .min_by_key(|(_, d)| OrderedFloat(*d))
}
