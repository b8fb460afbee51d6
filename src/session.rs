//! Mutable per-run state shared by the pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::tracker::arms::ArmAngles;
use crate::tracker::smooth::Smoother;

/// Gameplay state. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameState {
    Idle,
    Walking,
    Calibrating,
    CameraError,
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Walking => "WALKING",
            Self::Calibrating => "CALIBRATING",
            Self::CameraError => "CAMERA_ERROR",
        };
        f.write_str(s)
    }
}

/// Horizontal classification used for both the body zone and the lean/turn signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Position {
    Left,
    #[default]
    Center,
    Right,
}

pub struct SessionState {
    pub game_state: GameState,
    pub position: Position,
    pub turn: Position,
    pub step_count: u32,
    pub consecutive_steps: u32,
    /// Always within 0.0..=1.0
    pub momentum: f32,
    pub last_step_time: Option<Duration>,
    pub prev_signal_value: Option<f32>,
    pub smoothing: Smoother,
    pub subject_locked: bool,
    pub last_locked_time: Option<Duration>,
    /// Set while the lock has been broken for longer than the grace period
    pub subject_lost: bool,
    /// Set when the latest frame had no usable subject
    pub subject_missing: bool,
    /// Set while a calibrating player stands outside the center gate
    pub off_center: bool,
    pub arm_angles: ArmAngles,
}

impl SessionState {
    pub fn new(smoothing: Smoother) -> Self {
        Self {
            game_state: GameState::Idle,
            position: Position::Center,
            turn: Position::Center,
            step_count: 0,
            consecutive_steps: 0,
            momentum: 0.0,
            last_step_time: None,
            prev_signal_value: None,
            smoothing,
            subject_locked: false,
            last_locked_time: None,
            subject_lost: false,
            subject_missing: false,
            off_center: false,
            arm_angles: ArmAngles::default(),
        }
    }

    /// Counts a step accepted by a gait detector.
    pub fn record_step(&mut self, now: Duration) -> u32 {
        self.step_count += 1;
        self.consecutive_steps += 1;
        self.last_step_time = Some(now);
        self.step_count
    }

    /// Time since the last counted step, `None` if no step this epoch.
    pub fn since_last_step(&self, now: Duration) -> Option<Duration> {
        self.last_step_time.map(|t| now.saturating_sub(t))
    }

    pub fn set_momentum(&mut self, value: f32) {
        self.momentum = value.clamp(0.0, 1.0);
    }

    /// Wholesale reset applied by a recalibration request.
    pub fn reset(&mut self) {
        self.game_state = GameState::Idle;
        self.position = Position::Center;
        self.turn = Position::Center;
        self.step_count = 0;
        self.consecutive_steps = 0;
        self.momentum = 0.0;
        self.last_step_time = None;
        self.prev_signal_value = None;
        self.smoothing.reset();
        self.subject_locked = false;
        self.last_locked_time = None;
        self.subject_lost = false;
        self.subject_missing = false;
        self.off_center = false;
        self.arm_angles = ArmAngles::default();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(Smoother::default())
    }
}
