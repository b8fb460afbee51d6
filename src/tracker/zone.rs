use std::time::Duration;

use crate::calibration::CalibrationBaseline;
use crate::config::LockConfig;
use crate::pose::LandmarkFrame;
use crate::session::{Position, SessionState};

/// CENTER zone limits. `left_limit < right_limit` by construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneBounds {
    pub left_limit: f32,
    pub right_limit: f32,
}

impl ZoneBounds {
    /// Bounds `center ± offset`. A non-positive offset is widened to the smallest step.
    pub fn around(center: f32, offset: f32) -> Self {
        let offset = offset.abs().max(f32::EPSILON);
        Self {
            left_limit: center - offset,
            right_limit: center + offset,
        }
    }

    /// Explicit limits, swapped if given in the wrong order.
    pub fn new(left_limit: f32, right_limit: f32) -> Self {
        Self {
            left_limit: left_limit.min(right_limit),
            right_limit: left_limit.max(right_limit),
        }
    }

    pub fn center(&self) -> f32 {
        (self.left_limit + self.right_limit) / 2.0
    }
}

/// A value exactly on a limit is CENTER.
pub fn classify_zone(x: f32, bounds: &ZoneBounds) -> Position {
    if x < bounds.left_limit {
        Position::Left
    } else if x > bounds.right_limit {
        Position::Right
    } else {
        Position::Center
    }
}

/// Whether the current skeleton still matches the calibrated player.
///
/// Position tolerance is an absolute distance between shoulder midpoints;
/// scale tolerance is relative to the baseline shoulder width.
pub fn is_locked(
    frame: &LandmarkFrame,
    baseline: &CalibrationBaseline,
    position_tolerance: f32,
    scale_tolerance: f32,
    min_visibility: f32,
) -> bool {
    let shoulders = match frame.shoulders(min_visibility) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let pos_diff = (shoulders.center_x - baseline.shoulder_center_x).abs();
    if pos_diff > position_tolerance {
        return false;
    }
    let reference = baseline.shoulder_width.max(f32::EPSILON);
    let scale_diff = (shoulders.width - baseline.shoulder_width).abs() / reference;
    scale_diff <= scale_tolerance
}

/// Result of a lock check for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Locked,
    /// Lock broken but still inside the grace period
    Grace,
    Lost,
}

/// Tracks lock liveness over time using the session's `last_locked_time`.
#[derive(Debug, Clone)]
pub struct SubjectLock {
    position_tolerance: f32,
    scale_tolerance: f32,
    grace: Duration,
    min_visibility: f32,
}

impl SubjectLock {
    pub fn new(position_tolerance: f32, scale_tolerance: f32, grace: Duration, min_visibility: f32) -> Self {
        Self {
            position_tolerance,
            scale_tolerance,
            grace,
            min_visibility,
        }
    }

    pub fn from_config(config: &LockConfig, min_visibility: f32) -> Self {
        Self::new(
            config.position_tolerance,
            config.scale_tolerance,
            config.grace(),
            min_visibility,
        )
    }

    pub fn check(
        &self,
        frame: &LandmarkFrame,
        baseline: &CalibrationBaseline,
        session: &mut SessionState,
    ) -> LockStatus {
        let now = frame.timestamp;
        if is_locked(
            frame,
            baseline,
            self.position_tolerance,
            self.scale_tolerance,
            self.min_visibility,
        ) {
            session.subject_locked = true;
            session.last_locked_time = Some(now);
            return LockStatus::Locked;
        }

        session.subject_locked = false;
        // The calibration capture counts as the last lock for a fresh epoch.
        let last = session.last_locked_time.unwrap_or(baseline.captured_at);
        if now.saturating_sub(last) > self.grace {
            LockStatus::Lost
        } else {
            LockStatus::Grace
        }
    }

    /// How long the lock has been broken at `now`.
    pub fn unlocked_for(&self, session: &SessionState, baseline: &CalibrationBaseline, now: Duration) -> Duration {
        now.saturating_sub(session.last_locked_time.unwrap_or(baseline.captured_at))
    }
}
