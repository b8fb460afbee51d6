//! Step detection strategies behind one `GaitDetector` capability.

pub mod bounce;
pub mod swing;

use serde::Serialize;
use std::time::Duration;

use crate::calibration::CalibrationBaseline;
use crate::config::{Config, GaitStrategy};
use crate::pose::LandmarkFrame;
use crate::session::SessionState;

pub use bounce::BounceDetector;
pub use swing::{ArmState, SwingDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

/// Vertical body-midpoint motion for the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalMotion {
    pub current: f32,
    pub previous: Option<f32>,
    pub raw_delta: f32,
    pub smoothed_delta: f32,
}

impl VerticalMotion {
    /// Image Y grows downward.
    pub fn moving_down(&self) -> bool {
        self.previous.is_some_and(|prev| self.current > prev)
    }
}

pub struct GaitInput<'a> {
    pub frame: &'a LandmarkFrame,
    pub baseline: &'a CalibrationBaseline,
    pub motion: VerticalMotion,
    pub min_visibility: f32,
}

impl GaitInput<'_> {
    pub fn now(&self) -> Duration {
        self.frame.timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Bounce above threshold but the body is rising
    UpwardMotion,
    /// Another bounce inside the step cooldown
    Cooldown { elapsed: Duration },
    /// Same foot twice in a row
    SameSide,
    /// Swing completed before the minimum step interval
    TooSoon { elapsed: Duration },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GaitEvent {
    StepCounted { step_count: u32, foot: Option<Side> },
    StepRejected { reason: RejectReason, foot: Option<Side> },
    ArmTransition { arm: Side, from: ArmState, to: ArmState },
    /// Step counted without the expected hip rise. Informational only.
    HipRiseLow { rise: f32 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GaitUpdate {
    pub events: Vec<GaitEvent>,
    /// Motion energy above threshold this frame; feeds momentum and the stop timeout
    pub motion_active: bool,
}

impl GaitUpdate {
    pub fn steps_counted(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, GaitEvent::StepCounted { .. }))
            .count()
    }
}

pub trait GaitDetector: Send {
    fn name(&self) -> &'static str;

    /// Inspect one calibrated, locked frame and count any step it completes.
    fn update(&mut self, input: &GaitInput<'_>, session: &mut SessionState) -> GaitUpdate;

    /// Drop frame-to-frame memory after the subject was lost.
    fn interrupt(&mut self) {}

    /// Forget everything for a new calibration epoch.
    fn reset(&mut self);
}

pub fn detector_from_config(config: &Config) -> Box<dyn GaitDetector> {
    match config.gait.strategy {
        GaitStrategy::Bounce => Box::new(BounceDetector::from_config(&config.bounce)),
        GaitStrategy::Swing => Box::new(SwingDetector::from_config(&config.swing)),
    }
}
