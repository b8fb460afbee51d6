use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{GaitDetector, GaitEvent, GaitInput, GaitUpdate, RejectReason, Side};
use crate::config::SwingConfig;
use crate::pose::LandmarkIndex;
use crate::session::SessionState;

/// Per-arm swing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArmState {
    Neutral,
    SwingingForward,
    SwingingBack,
}

struct SwingThresholds {
    ratio: f32,
    min_velocity: f32,
    neutral_epsilon: f32,
}

/// Swing state machine for one arm.
///
/// In the mirrored camera image a forward swing moves the wrist toward
/// smaller X for both arms, so "forward" means a negative ratio and velocity.
struct ArmTracker {
    side: Side,
    state: ArmState,
    prev_wrist_x: Option<f32>,
    prev_time: Option<Duration>,
    /// Wrist speed measured on the latest frame
    speed: f32,
}

impl ArmTracker {
    fn new(side: Side) -> Self {
        Self {
            side,
            state: ArmState::Neutral,
            prev_wrist_x: None,
            prev_time: None,
            speed: 0.0,
        }
    }

    fn velocity(&self, wrist_x: f32, now: Duration) -> f32 {
        match (self.prev_wrist_x, self.prev_time) {
            (Some(prev_x), Some(prev_t)) => {
                let dt = now.saturating_sub(prev_t).as_secs_f32();
                if dt > 0.0 {
                    (wrist_x - prev_x) / dt
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    /// Advance one frame. Returns the transition taken, if any; entering
    /// SWINGING_BACK is a completed swing.
    fn advance(
        &mut self,
        wrist_x: f32,
        shoulder_x: f32,
        shoulder_width: f32,
        now: Duration,
        t: &SwingThresholds,
    ) -> Option<(ArmState, ArmState)> {
        let swing_ratio = if shoulder_width > 0.0 {
            (wrist_x - shoulder_x) / shoulder_width
        } else {
            0.0
        };
        let velocity = self.velocity(wrist_x, now);
        self.speed = velocity.abs();
        self.prev_wrist_x = Some(wrist_x);
        self.prev_time = Some(now);

        let next = match self.state {
            ArmState::Neutral if swing_ratio < -t.ratio && velocity < -t.min_velocity => {
                ArmState::SwingingForward
            }
            ArmState::SwingingForward if swing_ratio > 0.0 => ArmState::SwingingBack,
            ArmState::SwingingBack if swing_ratio.abs() < t.neutral_epsilon => ArmState::Neutral,
            state => state,
        };
        if next == self.state {
            return None;
        }
        debug!(arm = ?self.side, from = ?self.state, to = ?next, swing_ratio, velocity, "arm swing transition");
        let from = self.state;
        self.state = next;
        Some((from, next))
    }

    fn clear_motion(&mut self) {
        self.state = ArmState::Neutral;
        self.prev_wrist_x = None;
        self.prev_time = None;
        self.speed = 0.0;
    }
}

/// Counts steps from alternating arm swings.
///
/// A left-arm swing is a right-foot step and vice versa. Same-foot repeats and
/// swings inside the minimum interval are rejected.
pub struct SwingDetector {
    thresholds: SwingThresholds,
    min_step_interval: Duration,
    hip_rise_threshold: Option<f32>,
    left: ArmTracker,
    right: ArmTracker,
    last_step_side: Option<Side>,
}

impl SwingDetector {
    pub fn new(
        threshold: f32,
        min_velocity: f32,
        min_step_interval: Duration,
        neutral_epsilon: f32,
        hip_rise_threshold: Option<f32>,
    ) -> Self {
        Self {
            thresholds: SwingThresholds {
                ratio: threshold,
                min_velocity,
                neutral_epsilon,
            },
            min_step_interval,
            hip_rise_threshold,
            left: ArmTracker::new(Side::Left),
            right: ArmTracker::new(Side::Right),
            last_step_side: None,
        }
    }

    pub fn from_config(config: &SwingConfig) -> Self {
        Self::new(
            config.threshold,
            config.min_velocity,
            config.min_step_interval(),
            config.neutral_epsilon,
            config.hip_rise(),
        )
    }

    pub fn arm_state(&self, arm: Side) -> ArmState {
        match arm {
            Side::Left => self.left.state,
            Side::Right => self.right.state,
        }
    }

    pub fn last_step_side(&self) -> Option<Side> {
        self.last_step_side
    }

    fn validate_step(
        &mut self,
        foot: Side,
        input: &GaitInput<'_>,
        session: &mut SessionState,
        events: &mut Vec<GaitEvent>,
    ) {
        let now = input.now();
        if self.last_step_side == Some(foot) {
            debug!(?foot, "swing rejected: same foot twice");
            events.push(GaitEvent::StepRejected {
                reason: RejectReason::SameSide,
                foot: Some(foot),
            });
            return;
        }
        if let Some(elapsed) = session.since_last_step(now) {
            if elapsed <= self.min_step_interval {
                debug!(?foot, elapsed_ms = elapsed.as_millis() as u64, "swing rejected: too soon");
                events.push(GaitEvent::StepRejected {
                    reason: RejectReason::TooSoon { elapsed },
                    foot: Some(foot),
                });
                return;
            }
        }

        // Hip visibility is unreliable; a weak rise only warns.
        if let (Some(threshold), Some(baseline_hip_y)) = (self.hip_rise_threshold, input.baseline.hip_y) {
            if let Ok((_, hip_y)) = input.frame.hip_center(input.min_visibility) {
                let rise = baseline_hip_y - hip_y;
                if rise < threshold {
                    warn!(rise, threshold, "hips did not rise, counting step anyway");
                    events.push(GaitEvent::HipRiseLow { rise });
                }
            }
        }

        self.last_step_side = Some(foot);
        let step_count = session.record_step(now);
        debug!(step_count, ?foot, "step counted (swing)");
        events.push(GaitEvent::StepCounted {
            step_count,
            foot: Some(foot),
        });
    }
}

impl GaitDetector for SwingDetector {
    fn name(&self) -> &'static str {
        "swing"
    }

    fn update(&mut self, input: &GaitInput<'_>, session: &mut SessionState) -> GaitUpdate {
        let frame = input.frame;
        let vis = input.min_visibility;
        let (Ok(ls), Ok(rs), Ok(lw), Ok(rw)) = (
            frame.require(LandmarkIndex::LeftShoulder, vis),
            frame.require(LandmarkIndex::RightShoulder, vis),
            frame.require(LandmarkIndex::LeftWrist, vis),
            frame.require(LandmarkIndex::RightWrist, vis),
        ) else {
            return GaitUpdate::default();
        };
        let shoulder_width = (rs.x - ls.x).abs();
        let now = input.now();

        let mut events = Vec::new();
        let left = self
            .left
            .advance(lw.x, ls.x, shoulder_width, now, &self.thresholds);
        let right = self
            .right
            .advance(rw.x, rs.x, shoulder_width, now, &self.thresholds);

        for (arm, transition) in [(Side::Left, left), (Side::Right, right)] {
            let Some((from, to)) = transition else {
                continue;
            };
            events.push(GaitEvent::ArmTransition { arm, from, to });
            if to == ArmState::SwingingBack {
                self.validate_step(arm.opposite(), input, session, &mut events);
            }
        }

        // A wrist held still mid-swing is not motion, whatever its arm state.
        let min_velocity = self.thresholds.min_velocity;
        let motion_active = self.left.speed > min_velocity
            || self.right.speed > min_velocity
            || events
                .iter()
                .any(|e| matches!(e, GaitEvent::StepCounted { .. }));
        GaitUpdate {
            events,
            motion_active,
        }
    }

    fn interrupt(&mut self) {
        self.left.clear_motion();
        self.right.clear_motion();
    }

    fn reset(&mut self) {
        self.interrupt();
        self.last_step_side = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationBaseline;
    use crate::pose::keypoint::test_support::upright;
    use crate::pose::LandmarkFrame;
    use crate::tracker::gait::VerticalMotion;

    // upright(_, 0.5, _) puts the shoulders at x = 0.4 and 0.6 (width 0.2).
    fn frame(t: f32, left_wrist_x: f32, right_wrist_x: f32) -> LandmarkFrame {
        let mut f = upright(t, 0.5, 0.4);
        f.landmarks[LandmarkIndex::LeftWrist.index()].x = left_wrist_x;
        f.landmarks[LandmarkIndex::RightWrist.index()].x = right_wrist_x;
        f
    }

    fn detector() -> SwingDetector {
        SwingDetector::new(0.3, 0.3, Duration::from_millis(300), 0.1, None)
    }

    fn feed(d: &mut SwingDetector, session: &mut SessionState, baseline: &CalibrationBaseline, f: &LandmarkFrame) -> GaitUpdate {
        let input = GaitInput {
            frame: f,
            baseline,
            motion: VerticalMotion {
                current: 0.4,
                previous: Some(0.4),
                raw_delta: 0.0,
                smoothed_delta: 0.0,
            },
            min_visibility: 0.5,
        };
        d.update(&input, session)
    }

    /// One full left-arm swing starting at `t`: neutral, forward, back, neutral.
    fn left_swing(t: f32) -> Vec<LandmarkFrame> {
        vec![
            frame(t, 0.40, 0.60),
            frame(t + 0.1, 0.32, 0.60),
            frame(t + 0.2, 0.42, 0.60),
            frame(t + 0.3, 0.40, 0.60),
        ]
    }

    fn right_swing(t: f32) -> Vec<LandmarkFrame> {
        vec![
            frame(t, 0.40, 0.60),
            frame(t + 0.1, 0.40, 0.52),
            frame(t + 0.2, 0.40, 0.62),
            frame(t + 0.3, 0.40, 0.60),
        ]
    }

    #[test]
    fn test_left_swing_counts_right_foot() {
        let mut d = detector();
        let mut session = SessionState::default();
        let baseline = CalibrationBaseline::fallback(Duration::ZERO);
        let frames = left_swing(1.0);

        feed(&mut d, &mut session, &baseline, &frames[0]);
        let forward = feed(&mut d, &mut session, &baseline, &frames[1]);
        assert_eq!(d.arm_state(Side::Left), ArmState::SwingingForward);
        assert!(forward.motion_active);
        assert_eq!(forward.steps_counted(), 0);

        let back = feed(&mut d, &mut session, &baseline, &frames[2]);
        assert_eq!(d.arm_state(Side::Left), ArmState::SwingingBack);
        assert!(back.events.contains(&GaitEvent::StepCounted {
            step_count: 1,
            foot: Some(Side::Right)
        }));

        feed(&mut d, &mut session, &baseline, &frames[3]);
        assert_eq!(d.arm_state(Side::Left), ArmState::Neutral);
        assert_eq!(session.step_count, 1);
        assert_eq!(d.last_step_side(), Some(Side::Right));
    }

    #[test]
    fn test_slow_drift_is_not_a_swing() {
        let mut d = detector();
        let mut session = SessionState::default();
        let baseline = CalibrationBaseline::fallback(Duration::ZERO);
        // wrist creeps forward at 0.1 units/s
        for i in 0..12 {
            let x = 0.40 - 0.01 * i as f32;
            feed(&mut d, &mut session, &baseline, &frame(i as f32 * 0.1, x, 0.60));
        }
        assert_eq!(d.arm_state(Side::Left), ArmState::Neutral);
    }

    #[test]
    fn test_same_arm_twice_rejected() {
        let mut d = detector();
        let mut session = SessionState::default();
        let baseline = CalibrationBaseline::fallback(Duration::ZERO);
        let mut updates = Vec::new();
        for f in left_swing(1.0).iter().chain(left_swing(2.0).iter()) {
            updates.push(feed(&mut d, &mut session, &baseline, f));
        }
        assert_eq!(session.step_count, 1);
        assert!(updates[6].events.contains(&GaitEvent::StepRejected {
            reason: RejectReason::SameSide,
            foot: Some(Side::Right)
        }));
    }

    #[test]
    fn test_alternating_arms_both_count() {
        let mut d = detector();
        let mut session = SessionState::default();
        let baseline = CalibrationBaseline::fallback(Duration::ZERO);
        for f in left_swing(1.0).iter().chain(right_swing(2.0).iter()) {
            feed(&mut d, &mut session, &baseline, f);
        }
        assert_eq!(session.step_count, 2);
        assert_eq!(d.last_step_side(), Some(Side::Left));
    }

    #[test]
    fn test_alternating_too_fast_rejected() {
        let mut d = SwingDetector::new(0.3, 0.3, Duration::from_secs(2), 0.1, None);
        let mut session = SessionState::default();
        let baseline = CalibrationBaseline::fallback(Duration::ZERO);
        let mut events = Vec::new();
        for f in left_swing(1.0).iter().chain(right_swing(2.0).iter()) {
            events.extend(feed(&mut d, &mut session, &baseline, f).events);
        }
        assert_eq!(session.step_count, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            GaitEvent::StepRejected {
                reason: RejectReason::TooSoon { .. },
                foot: Some(Side::Left),
            }
        )));
    }

    #[test]
    fn test_hip_rise_only_warns() {
        let mut d = SwingDetector::new(0.3, 0.3, Duration::from_millis(300), 0.1, Some(0.02));
        let mut session = SessionState::default();
        let mut baseline = CalibrationBaseline::fallback(Duration::ZERO);
        // hips in the test frames sit at y = 0.7, same as the baseline: no rise
        baseline.hip_y = Some(0.7);
        let mut events = Vec::new();
        for f in left_swing(1.0) {
            events.extend(feed(&mut d, &mut session, &baseline, &f).events);
        }
        assert_eq!(session.step_count, 1);
        assert!(events.iter().any(|e| matches!(e, GaitEvent::HipRiseLow { .. })));
    }

    #[test]
    fn test_missing_wrist_is_ignored() {
        let mut d = detector();
        let mut session = SessionState::default();
        let baseline = CalibrationBaseline::fallback(Duration::ZERO);
        let mut f = frame(0.0, 0.3, 0.6);
        f.landmarks[LandmarkIndex::RightWrist.index()].visibility = 0.0;
        assert_eq!(feed(&mut d, &mut session, &baseline, &f), GaitUpdate::default());
    }

    #[test]
    fn test_held_arm_is_not_motion() {
        let mut d = detector();
        let mut session = SessionState::default();
        let baseline = CalibrationBaseline::fallback(Duration::ZERO);
        feed(&mut d, &mut session, &baseline, &frame(1.0, 0.40, 0.60));
        let forward = feed(&mut d, &mut session, &baseline, &frame(1.1, 0.40, 0.52));
        assert!(forward.motion_active);
        for i in 2..20 {
            let held = feed(&mut d, &mut session, &baseline, &frame(1.0 + i as f32 * 0.1, 0.40, 0.52));
            assert!(!held.motion_active);
        }
        // the arm never came back, so it is still mid-swing
        assert_eq!(d.arm_state(Side::Right), ArmState::SwingingForward);
        assert_eq!(session.step_count, 0);
    }

    #[test]
    fn test_reset_forgets_side() {
        let mut d = detector();
        let mut session = SessionState::default();
        let baseline = CalibrationBaseline::fallback(Duration::ZERO);
        for f in left_swing(1.0) {
            feed(&mut d, &mut session, &baseline, &f);
        }
        d.reset();
        assert_eq!(d.last_step_side(), None);
        assert_eq!(d.arm_state(Side::Left), ArmState::Neutral);
    }
}
