//! Request/response protocol between vehicle agents and the signal controller
//!
//! Messages travel as whitespace-separated text bodies:
//!
//! ```text
//! STATE_REQ <x> <y> <dx> <dy>
//! STATE_REP <signal_id|NONE> <GREEN|YELLOW|RED|NONE> <x> <y>
//! PREEMPT_REQ <intersection_id> <NS|EW> <seconds>
//! PREEMPT_ACK
//! ```
//!
//! Every call carries its own reply slot, so a reply that arrives after the
//! caller gave up is dropped instead of answering a later call.

use std::fmt;
use std::str::{FromStr, SplitWhitespace};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use super::types::{Axis, IntersectionId, Phase, SignalId, SimId, Vec2};

const STATE_REQ: &str = "STATE_REQ";
const STATE_REP: &str = "STATE_REP";
const PREEMPT_REQ: &str = "PREEMPT_REQ";
const PREEMPT_ACK: &str = "PREEMPT_ACK";
const NONE: &str = "NONE";

/// Longest override a PREEMPT_REQ may ask for
pub const MAX_PREEMPT: Duration = Duration::from_secs(3_600);

/// Failures of the protocol layer. None of them is fatal to an agent.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("empty message body")]
    Empty,

    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    #[error("{kind} is missing field {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("controller mailbox is full")]
    Busy,

    #[error("controller is not accepting messages")]
    Disconnected,
}

/// A request from a vehicle agent
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    State { position: Vec2, heading: Vec2 },
    Preempt {
        intersection: IntersectionId,
        axis: Axis,
        duration: Duration,
    },
}

/// The signal a state query resolved to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalReport {
    pub id: SignalId,
    pub phase: Phase,
    pub position: Vec2,
}

/// A reply from the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `None` when no signal lies ahead
    State(Option<SignalReport>),
    PreemptAck,
}

/// Pulls typed fields off a message body
struct Fields<'a> {
    kind: &'static str,
    tokens: SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn new(kind: &'static str, tokens: SplitWhitespace<'a>) -> Self {
        Self { kind, tokens }
    }

    fn raw(&mut self, field: &'static str) -> Result<&'a str, ProtocolError> {
        self.tokens.next().ok_or(ProtocolError::MissingField {
            kind: self.kind,
            field,
        })
    }

    fn parse<T: FromStr>(&mut self, field: &'static str) -> Result<T, ProtocolError> {
        let raw = self.raw(field)?;
        raw.parse().map_err(|_| ProtocolError::InvalidField {
            field,
            value: raw.to_string(),
        })
    }

    fn finite(&mut self, field: &'static str) -> Result<f32, ProtocolError> {
        let raw = self.raw(field)?;
        match raw.parse::<f32>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(ProtocolError::InvalidField {
                field,
                value: raw.to_string(),
            }),
        }
    }
}

fn split_kind(body: &str) -> Result<(&str, SplitWhitespace<'_>), ProtocolError> {
    let mut tokens = body.split_whitespace();
    let kind = tokens.next().ok_or(ProtocolError::Empty)?;
    Ok((kind, tokens))
}

impl FromStr for Request {
    type Err = ProtocolError;

    fn from_str(body: &str) -> Result<Self, Self::Err> {
        let (kind, tokens) = split_kind(body)?;
        match kind {
            STATE_REQ => {
                let mut f = Fields::new(STATE_REQ, tokens);
                let position = Vec2::new(f.finite("x")?, f.finite("y")?);
                let heading = Vec2::new(f.finite("dx")?, f.finite("dy")?);
                Ok(Request::State { position, heading })
            }
            PREEMPT_REQ => {
                let mut f = Fields::new(PREEMPT_REQ, tokens);
                let intersection = IntersectionId(SimId(f.parse("intersection")?));
                let axis = f.parse("axis")?;
                let seconds = f.finite("seconds")?;
                let duration = Duration::try_from_secs_f32(seconds)
                    .ok()
                    .filter(|d| *d <= MAX_PREEMPT)
                    .ok_or_else(|| ProtocolError::InvalidField {
                        field: "seconds",
                        value: seconds.to_string(),
                    })?;
                Ok(Request::Preempt {
                    intersection,
                    axis,
                    duration,
                })
            }
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::State { position, heading } => write!(
                f,
                "{STATE_REQ} {} {} {} {}",
                position.x, position.y, heading.x, heading.y
            ),
            Request::Preempt {
                intersection,
                axis,
                duration,
            } => write!(
                f,
                "{PREEMPT_REQ} {} {} {}",
                intersection,
                axis,
                duration.as_secs_f32()
            ),
        }
    }
}

impl FromStr for Reply {
    type Err = ProtocolError;

    fn from_str(body: &str) -> Result<Self, Self::Err> {
        let (kind, tokens) = split_kind(body)?;
        match kind {
            STATE_REP => {
                let mut f = Fields::new(STATE_REP, tokens);
                let id = f.raw("signal")?;
                let phase = f.raw("phase")?;
                if id == NONE {
                    return Ok(Reply::State(None));
                }
                let id = id.parse().map_err(|_| ProtocolError::InvalidField {
                    field: "signal",
                    value: id.to_string(),
                })?;
                let phase = phase.parse().map_err(|_| ProtocolError::InvalidField {
                    field: "phase",
                    value: phase.to_string(),
                })?;
                let position = Vec2::new(f.finite("x")?, f.finite("y")?);
                Ok(Reply::State(Some(SignalReport {
                    id: SignalId(SimId(id)),
                    phase,
                    position,
                })))
            }
            PREEMPT_ACK => Ok(Reply::PreemptAck),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::State(Some(report)) => write!(
                f,
                "{STATE_REP} {} {} {} {}",
                report.id, report.phase, report.position.x, report.position.y
            ),
            Reply::State(None) => write!(f, "{STATE_REP} {NONE} {NONE} 0 0"),
            Reply::PreemptAck => f.write_str(PREEMPT_ACK),
        }
    }
}

/// A message on its way to the controller
#[derive(Debug)]
pub struct Envelope {
    /// Name of the sending agent, for logs
    pub sender: String,
    pub body: String,
    /// Where to put the reply; `None` for fire-and-forget requests
    pub reply_to: Option<oneshot::Sender<String>>,
}

/// Create the controller's mailbox and a handle for sending to it
pub fn channel(capacity: usize) -> (ControllerHandle, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ControllerHandle { tx }, rx)
}

/// Cloneable handle through which agents talk to the controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Envelope>,
}

impl ControllerHandle {
    /// Send a raw body and wait up to `timeout` for the raw reply
    pub async fn call(
        &self,
        sender: &str,
        body: String,
        timeout: Duration,
    ) -> Result<String, ProtocolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            sender: sender.to_string(),
            body,
            reply_to: Some(reply_tx),
        };

        let exchange = async {
            self.tx
                .send(envelope)
                .await
                .map_err(|_| ProtocolError::Disconnected)?;
            // A dropped reply slot means the controller discarded the request.
            reply_rx.await.map_err(|_| ProtocolError::Disconnected)
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ProtocolError::Timeout(timeout))?
    }

    /// Queue a raw body without waiting for any reply
    pub fn post(&self, sender: &str, body: String) -> Result<(), ProtocolError> {
        self.tx
            .try_send(Envelope {
                sender: sender.to_string(),
                body,
                reply_to: None,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => ProtocolError::Busy,
                TrySendError::Closed(_) => ProtocolError::Disconnected,
            })
    }

    /// Ask which signal lies ahead and what it shows
    pub async fn query_state(
        &self,
        sender: &str,
        position: Vec2,
        heading: Vec2,
        timeout: Duration,
    ) -> Result<Option<SignalReport>, ProtocolError> {
        let body = Request::State { position, heading }.to_string();
        let raw = self.call(sender, body, timeout).await?;
        match raw.parse()? {
            Reply::State(report) => Ok(report),
            Reply::PreemptAck => Err(ProtocolError::UnknownKind(PREEMPT_ACK.to_string())),
        }
    }

    /// Fire-and-forget preemption request
    pub fn request_preemption(
        &self,
        sender: &str,
        intersection: IntersectionId,
        axis: Axis,
        duration: Duration,
    ) -> Result<(), ProtocolError> {
        let body = Request::Preempt {
            intersection,
            axis,
            duration,
        }
        .to_string();
        self.post(sender, body)
    }
}
