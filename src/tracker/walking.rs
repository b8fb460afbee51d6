use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::config::{ArbiterKind, Config};
use crate::session::{GameState, SessionState};
use crate::tracker::momentum::MomentumTracker;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum TransitionCause {
    /// Enough consecutive steps to start walking
    ConsecutiveSteps { count: u32 },
    /// No motion and no step for longer than the stop timeout
    StepTimeout,
    MomentumRise { momentum: f32 },
    MomentumDecay { momentum: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateChange {
    pub from: GameState,
    pub to: GameState,
    pub cause: TransitionCause,
}

/// Decides IDLE vs WALKING once per gameplay frame.
///
/// Momentum is updated on every frame regardless of `kind`, but only the
/// configured arbiter writes `game_state`.
pub struct WalkingArbiter {
    kind: ArbiterKind,
    required_steps: u32,
    stop_timeout: Duration,
    momentum: MomentumTracker,
}

impl WalkingArbiter {
    pub fn new(kind: ArbiterKind, required_steps: u32, stop_timeout: Duration, momentum: MomentumTracker) -> Self {
        Self {
            kind,
            required_steps,
            stop_timeout,
            momentum,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.gait.arbiter,
            config.gait.required_steps,
            config.gait.stop_timeout(),
            MomentumTracker::from_config(&config.momentum),
        )
    }

    pub fn kind(&self) -> ArbiterKind {
        self.kind
    }

    pub fn update(&self, session: &mut SessionState, motion_active: bool, now: Duration) -> Option<StateChange> {
        session.set_momentum(self.momentum.update(session.momentum, motion_active));

        let timed_out = session
            .since_last_step(now)
            .map_or(true, |elapsed| elapsed > self.stop_timeout);
        if !motion_active && timed_out {
            session.consecutive_steps = 0;
        }

        let walking = match self.kind {
            ArbiterKind::Steps => session.consecutive_steps >= self.required_steps,
            ArbiterKind::Momentum => self.momentum.is_active(session.momentum),
        };
        let target = if walking { GameState::Walking } else { GameState::Idle };
        if target == session.game_state {
            return None;
        }

        let cause = match (self.kind, target) {
            (ArbiterKind::Steps, GameState::Walking) => TransitionCause::ConsecutiveSteps {
                count: session.consecutive_steps,
            },
            (ArbiterKind::Steps, _) => TransitionCause::StepTimeout,
            (ArbiterKind::Momentum, GameState::Walking) => TransitionCause::MomentumRise {
                momentum: session.momentum,
            },
            (ArbiterKind::Momentum, _) => TransitionCause::MomentumDecay {
                momentum: session.momentum,
            },
        };
        let change = StateChange {
            from: session.game_state,
            to: target,
            cause,
        };
        info!(from = %change.from, to = %change.to, ?cause, "state change");
        session.game_state = target;
        Some(change)
    }
}
