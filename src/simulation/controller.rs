//! Signal phase controller
//!
//! Owns the base cycle and the preemption table and is the only writer of
//! signal phases. One task multiplexes the phase timer and the mailbox with
//! `select!`, so cycle steps and request handling never interleave
//! mid-update; every write goes through the world lock in one batch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use super::config::{SignalTimings, SimConfig};
use super::geometry::nearest_ahead;
use super::protocol::{Envelope, Reply, Request, SignalReport};
use super::signal::SimSignal;
use super::types::{Axis, IntersectionId, Phase, Vec2};
use super::world::{SimWorld, WorldState};

/// Step of the base cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Green(Axis),
    Yellow(Axis),
}

impl CyclePhase {
    /// NS green opens every cycle
    pub const START: CyclePhase = CyclePhase::Green(Axis::NorthSouth);

    pub fn next(self) -> CyclePhase {
        match self {
            CyclePhase::Green(axis) => CyclePhase::Yellow(axis),
            CyclePhase::Yellow(axis) => CyclePhase::Green(axis.orthogonal()),
        }
    }

    pub fn duration(self, timings: &SignalTimings) -> Duration {
        match self {
            CyclePhase::Green(_) => timings.green,
            CyclePhase::Yellow(_) => timings.yellow,
        }
    }

    /// Phase the base cycle gives a signal on `axis` that currently shows
    /// `current`. Yellow only demotes a green; it never promotes a red.
    pub fn base_phase(self, axis: Axis, current: Phase) -> Phase {
        match self {
            CyclePhase::Green(open) if open == axis => Phase::Green,
            CyclePhase::Yellow(open) if open == axis => match current {
                Phase::Green => Phase::Yellow,
                other => other,
            },
            _ => Phase::Red,
        }
    }
}

/// Override forcing one axis green at one intersection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreemptionRecord {
    pub axis: Axis,
    pub expires_at: Instant,
}

/// Live preemptions keyed by intersection
#[derive(Debug, Clone, Default)]
pub struct PreemptionTable {
    records: BTreeMap<IntersectionId, PreemptionRecord>,
}

impl PreemptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an override; a second one for the same intersection replaces
    /// the first
    pub fn insert(&mut self, intersection: IntersectionId, axis: Axis, expires_at: Instant) {
        self.records
            .insert(intersection, PreemptionRecord { axis, expires_at });
    }

    pub fn get(&self, intersection: IntersectionId) -> Option<&PreemptionRecord> {
        self.records.get(&intersection)
    }

    /// Drop every record whose expiry is at or before `now`
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.expires_at > now);
        before - self.records.len()
    }

    /// Earliest expiry among the records
    pub fn next_expiry(&self) -> Option<Instant> {
        self.records.values().map(|r| r.expires_at).min()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IntersectionId, &PreemptionRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The signal phase controller
pub struct SignalController {
    world: SimWorld,
    config: Arc<SimConfig>,
    phase: CyclePhase,
    preemptions: PreemptionTable,
    inbox: mpsc::Receiver<Envelope>,
}

impl SignalController {
    pub fn new(world: SimWorld, config: Arc<SimConfig>, inbox: mpsc::Receiver<Envelope>) -> Self {
        Self {
            world,
            config,
            phase: CyclePhase::START,
            preemptions: PreemptionTable::new(),
            inbox,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn preemptions(&self) -> &PreemptionTable {
        &self.preemptions
    }

    /// Step to the next phase of the base cycle and apply it
    pub fn advance_phase(&mut self, now: Instant) {
        self.phase = self.phase.next();
        debug!("Cycle entering {:?}", self.phase);
        self.apply_layout(now);
    }

    /// Record a preemption and apply it immediately. Returns false when the
    /// expiry is out of the clock's range and the request was dropped.
    pub fn preempt(
        &mut self,
        intersection: IntersectionId,
        axis: Axis,
        duration: Duration,
        now: Instant,
    ) -> bool {
        let Some(expires_at) = now.checked_add(duration) else {
            warn!(
                "Dropping preemption of intersection {}: {:?} is out of range",
                intersection, duration
            );
            return false;
        };
        self.preemptions.insert(intersection, axis, expires_at);
        info!(
            "Preemption: intersection {} forced {} green for {:.1}s",
            intersection,
            axis,
            duration.as_secs_f32()
        );
        self.apply_layout(now);
        true
    }

    /// Re-apply the whole layout if any preemption has run out
    pub fn expire(&mut self, now: Instant) {
        if self.preemptions.next_expiry().is_some_and(|t| t <= now) {
            self.apply_layout(now);
        }
    }

    /// Write the base cycle phase to every signal, then overlay the live
    /// preemptions. Expired records are purged first.
    pub fn apply_layout(&mut self, now: Instant) {
        let purged = self.preemptions.purge_expired(now);
        if purged > 0 {
            info!("{} preemption(s) expired, resuming base cycle", purged);
        }

        let phase = self.phase;
        let preemptions = &self.preemptions;
        self.world.with_lock(|state| {
            for signal in state.signals_mut() {
                signal.phase = match preemptions.get(signal.intersection) {
                    Some(record) if record.axis == signal.axis => Phase::Green,
                    Some(_) => Phase::Red,
                    None => phase.base_phase(signal.axis, signal.phase),
                };
            }
        });
    }

    /// Answer a state query from the current layout
    pub fn answer_state(&mut self, position: Vec2, heading: Vec2, now: Instant) -> Reply {
        self.expire(now);
        let report = self.world.with_lock(|state| nearest_signal(state, position, heading));
        Reply::State(report)
    }

    /// Handle one mailbox message. Malformed bodies are dropped unanswered.
    pub fn handle(&mut self, envelope: Envelope, now: Instant) {
        let request = match envelope.body.parse::<Request>() {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    "Discarding malformed message from {}: {} ({:?})",
                    envelope.sender, e, envelope.body
                );
                return;
            }
        };

        let reply = match request {
            Request::State { position, heading } => self.answer_state(position, heading, now),
            Request::Preempt {
                intersection,
                axis,
                duration,
            } => {
                debug!("Preemption request from {}", envelope.sender);
                if !self.preempt(intersection, axis, duration, now) {
                    return;
                }
                Reply::PreemptAck
            }
        };

        if let Some(reply_to) = envelope.reply_to {
            // The caller may have timed out already; the reply is advisory.
            let _ = reply_to.send(reply.to_string());
        }
    }

    /// Run the cycle and answer requests until shutdown or until every
    /// handle to the mailbox is gone
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let start = Instant::now();
        self.apply_layout(start);
        let mut phase_deadline = start + self.phase.duration(&self.config.timings);
        info!("Signal controller started in {:?}", self.phase);

        loop {
            let wake = match self.preemptions.next_expiry() {
                Some(expiry) => expiry.min(phase_deadline),
                None => phase_deadline,
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep_until(wake) => {
                    let now = Instant::now();
                    if now >= phase_deadline {
                        self.advance_phase(now);
                        phase_deadline += self.phase.duration(&self.config.timings);
                    } else {
                        self.expire(now);
                    }
                }
                envelope = self.inbox.recv() => match envelope {
                    Some(envelope) => self.handle(envelope, Instant::now()),
                    None => break,
                },
            }
        }
        info!("Signal controller stopped");
    }
}

/// Closest signal ahead of the querying vehicle
fn nearest_signal(state: &WorldState, position: Vec2, heading: Vec2) -> Option<SignalReport> {
    let candidates = state.signals().map(|s| (s, s.position));
    nearest_ahead(&position, &heading, candidates).map(|(signal, _): (&SimSignal, f32)| {
        SignalReport {
            id: signal.id,
            phase: signal.phase,
            position: signal.position,
        }
    })
}
