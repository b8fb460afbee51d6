//! Change-gated telemetry snapshots and the sink they are pushed through.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::SinkError;
use crate::session::{GameState, Position, SessionState};
use crate::tracker::arms::ArmAngles;

/// Event name used for every snapshot.
pub const TELEMETRY_EVENT: &str = "telemetry";

/// Player-facing status. Mirrors `GameState` plus the player-position conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetryStatus {
    Idle,
    Walking,
    Calibrating,
    CameraError,
    SubjectLost,
    NoPlayer,
    /// Calibrating, but the player has to move to the middle of the frame
    StepCenter,
}

impl From<GameState> for TelemetryStatus {
    fn from(state: GameState) -> Self {
        match state {
            GameState::Idle => Self::Idle,
            GameState::Walking => Self::Walking,
            GameState::Calibrating => Self::Calibrating,
            GameState::CameraError => Self::CameraError,
        }
    }
}

/// Value snapshot of everything the game observes.
///
/// Momentum and calibration progress are rounded to two decimals so that
/// exponential decay settles and the change gate stops firing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub state: TelemetryStatus,
    pub zone: Position,
    pub step_count: u32,
    pub momentum: f32,
    pub turn: Position,
    pub arm_angles: ArmAngles,
    pub calibration_progress: f32,
}

fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

impl TelemetryEvent {
    pub fn snapshot(session: &SessionState, calibration_progress: f32) -> Self {
        let state = if session.game_state == GameState::Calibrating && session.off_center {
            TelemetryStatus::StepCenter
        } else if session.game_state == GameState::CameraError
            || session.game_state == GameState::Calibrating
        {
            session.game_state.into()
        } else if session.subject_missing {
            TelemetryStatus::NoPlayer
        } else if session.subject_lost {
            TelemetryStatus::SubjectLost
        } else {
            session.game_state.into()
        };
        Self {
            state,
            zone: session.position,
            step_count: session.step_count,
            momentum: round2(session.momentum),
            turn: session.turn,
            arm_angles: session.arm_angles,
            calibration_progress: round2(calibration_progress),
        }
    }
}

/// `Some(current)` when it differs from the last emitted snapshot.
pub fn changed(previous: Option<&TelemetryEvent>, current: &TelemetryEvent) -> Option<TelemetryEvent> {
    match previous {
        Some(prev) if prev == current => None,
        _ => Some(*current),
    }
}

/// Delta-compression gate remembering the last emitted snapshot.
#[derive(Debug, Default)]
pub struct TelemetryGate {
    last: Option<TelemetryEvent>,
}

impl TelemetryGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, current: TelemetryEvent) -> Option<TelemetryEvent> {
        let out = changed(self.last.as_ref(), &current)?;
        self.last = Some(out);
        Some(out)
    }

    /// Forget the last emission so the next snapshot is always sent.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn last(&self) -> Option<&TelemetryEvent> {
        self.last.as_ref()
    }
}

/// Outbound `emit(name, payload)` abstraction. Must never block.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, name: &str, event: &TelemetryEvent) -> Result<(), SinkError>;
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn emit(&self, name: &str, event: &TelemetryEvent) -> Result<(), SinkError> {
        (**self).emit(name, event)
    }
}

/// A named snapshot as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedEvent {
    pub name: String,
    pub event: TelemetryEvent,
}

/// Fan-out sink; slow subscribers lag and lose old events instead of blocking.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<NamedEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NamedEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl TelemetrySink for BroadcastSink {
    fn emit(&self, name: &str, event: &TelemetryEvent) -> Result<(), SinkError> {
        let msg = NamedEvent {
            name: name.to_string(),
            event: *event,
        };
        match self.tx.send(msg) {
            Ok(n) => {
                trace!(subscribers = n, "telemetry broadcast");
                Ok(())
            }
            Err(_) => Err(SinkError::Unavailable),
        }
    }
}
