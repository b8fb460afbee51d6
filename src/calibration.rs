//! Timed baseline capture for a calibration epoch.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{CalibrationConfig, CalibrationSignal};
use crate::error::FrameError;
use crate::pose::{LandmarkFrame, LandmarkIndex};
use crate::session::Position;
use crate::tracker::zone::{classify_zone, ZoneBounds};

/// Neutral center used when the window closes without a single valid sample.
pub const DEFAULT_CENTER: f32 = 0.5;
pub const DEFAULT_SHOULDER_WIDTH: f32 = 0.2;

/// Neutral reference captured while the player stands still.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationBaseline {
    /// Mean of the configured calibration signal (shoulder or hip midpoint X)
    pub center_x: f32,
    /// Mean shoulder midpoint X; the subject lock reference
    pub shoulder_center_x: f32,
    /// Mean shoulder midpoint Y
    pub center_y: f32,
    pub shoulder_width: f32,
    pub hip_x: f32,
    /// `None` when hips were never visible during the window
    pub hip_y: Option<f32>,
    /// Largest frame-to-frame vertical shoulder delta while standing still
    pub noise_floor: f32,
    /// Epoch bounce threshold when auto-threshold is enabled
    pub bounce_threshold: Option<f32>,
    pub sample_count: usize,
    pub captured_at: Duration,
}

impl CalibrationBaseline {
    pub fn fallback(captured_at: Duration) -> Self {
        Self {
            center_x: DEFAULT_CENTER,
            shoulder_center_x: DEFAULT_CENTER,
            center_y: DEFAULT_CENTER,
            shoulder_width: DEFAULT_SHOULDER_WIDTH,
            hip_x: DEFAULT_CENTER,
            hip_y: None,
            noise_floor: 0.0,
            bounce_threshold: None,
            sample_count: 0,
            captured_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationPhase {
    NotStarted,
    InProgress { started_at: Duration },
    Complete,
}

/// Outcome of feeding one frame to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationTick {
    /// Window opened on this frame
    Started,
    /// Still collecting; `skipped` is set when the frame contributed no sample
    Collecting { progress: f32, skipped: Option<FrameError> },
    /// Window closed on this frame
    Completed(CalibrationBaseline),
    /// Controller already holds a baseline
    Idle,
}

#[derive(Debug, Default)]
struct Accumulator {
    signal_sum: f64,
    shoulder_x_sum: f64,
    center_y_sum: f64,
    width_sum: f64,
    count: usize,
    hip_x_sum: f64,
    hip_y_sum: f64,
    hip_count: usize,
    noise_floor: f32,
    prev_y: Option<f32>,
}

pub struct CalibrationController {
    duration: Duration,
    signal: CalibrationSignal,
    zone_offset: f32,
    min_visibility: f32,
    auto_threshold: Option<(f32, f32, f32)>,
    center_gate: ZoneBounds,
    phase: CalibrationPhase,
    acc: Accumulator,
    baseline: Option<CalibrationBaseline>,
    bounds: Option<ZoneBounds>,
}

impl CalibrationController {
    pub fn new(config: &CalibrationConfig, zone_offset: f32, min_visibility: f32) -> Self {
        let auto_threshold = config.auto_threshold.then_some((
            config.noise_multiplier,
            config.threshold_min,
            config.threshold_max,
        ));
        Self {
            duration: config.duration(),
            signal: config.signal,
            zone_offset,
            min_visibility,
            auto_threshold,
            center_gate: ZoneBounds::new(config.center_left, config.center_right),
            phase: CalibrationPhase::NotStarted,
            acc: Accumulator::default(),
            baseline: None,
            bounds: None,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn is_complete(&self) -> bool {
        self.phase == CalibrationPhase::Complete
    }

    pub fn baseline(&self) -> Option<&CalibrationBaseline> {
        self.baseline.as_ref()
    }

    pub fn bounds(&self) -> Option<ZoneBounds> {
        self.bounds
    }

    /// `min(elapsed / duration, 1.0)`; 1.0 once complete.
    pub fn progress(&self, now: Duration) -> f32 {
        match self.phase {
            CalibrationPhase::NotStarted => 0.0,
            CalibrationPhase::InProgress { started_at } => {
                let elapsed = now.saturating_sub(started_at).as_secs_f32();
                (elapsed / self.duration.as_secs_f32()).min(1.0)
            }
            CalibrationPhase::Complete => 1.0,
        }
    }

    /// Discard any capture and wait for the next frame to start a new window.
    pub fn restart(&mut self) {
        self.phase = CalibrationPhase::NotStarted;
        self.acc = Accumulator::default();
        self.baseline = None;
        self.bounds = None;
    }

    pub fn process(&mut self, frame: &LandmarkFrame) -> CalibrationTick {
        let now = frame.timestamp;
        let started = match self.phase {
            CalibrationPhase::Complete => return CalibrationTick::Idle,
            CalibrationPhase::NotStarted => {
                self.phase = CalibrationPhase::InProgress { started_at: now };
                info!(duration_secs = self.duration.as_secs_f32(), "calibration started");
                true
            }
            CalibrationPhase::InProgress { .. } => false,
        };

        let skipped = self.accumulate(frame).err();
        if let Some(ref reason) = skipped {
            debug!(%reason, "calibration frame skipped");
        }

        if self.progress(now) >= 1.0 {
            let baseline = self.finish(now);
            return CalibrationTick::Completed(baseline);
        }
        if started {
            CalibrationTick::Started
        } else {
            CalibrationTick::Collecting {
                progress: self.progress(now),
                skipped,
            }
        }
    }

    fn accumulate(&mut self, frame: &LandmarkFrame) -> Result<(), FrameError> {
        let shoulders = frame.shoulders(self.min_visibility)?;
        // nose when visible, otherwise the shoulders stand in for it
        let x = frame
            .require(LandmarkIndex::Nose, self.min_visibility)
            .map_or(shoulders.center_x, |nose| nose.x);
        if classify_zone(x, &self.center_gate) != Position::Center {
            return Err(FrameError::OffCenter { x });
        }
        let hips = frame.hip_center(self.min_visibility);
        let signal_x = match self.signal {
            CalibrationSignal::Shoulders => shoulders.center_x,
            CalibrationSignal::Hips => hips.clone()?.0,
        };
        let hips = hips.ok();

        let acc = &mut self.acc;
        acc.signal_sum += signal_x as f64;
        acc.shoulder_x_sum += shoulders.center_x as f64;
        acc.center_y_sum += shoulders.center_y as f64;
        acc.width_sum += shoulders.width as f64;
        acc.count += 1;
        if let Some((hx, hy)) = hips {
            acc.hip_x_sum += hx as f64;
            acc.hip_y_sum += hy as f64;
            acc.hip_count += 1;
        }
        if let Some(prev) = acc.prev_y {
            acc.noise_floor = acc.noise_floor.max((shoulders.center_y - prev).abs());
        }
        acc.prev_y = Some(shoulders.center_y);
        Ok(())
    }

    fn finish(&mut self, now: Duration) -> CalibrationBaseline {
        let acc = std::mem::take(&mut self.acc);
        let mut baseline = if acc.count == 0 {
            warn!("calibration collected no valid samples, using default baseline");
            CalibrationBaseline::fallback(now)
        } else {
            let n = acc.count as f64;
            let (hip_x, hip_y) = if acc.hip_count > 0 {
                let h = acc.hip_count as f64;
                ((acc.hip_x_sum / h) as f32, Some((acc.hip_y_sum / h) as f32))
            } else {
                (DEFAULT_CENTER, None)
            };
            CalibrationBaseline {
                center_x: (acc.signal_sum / n) as f32,
                shoulder_center_x: (acc.shoulder_x_sum / n) as f32,
                center_y: (acc.center_y_sum / n) as f32,
                shoulder_width: (acc.width_sum / n) as f32,
                hip_x,
                hip_y,
                noise_floor: acc.noise_floor,
                bounce_threshold: None,
                sample_count: acc.count,
                captured_at: now,
            }
        };
        if let Some((multiplier, min, max)) = self.auto_threshold {
            baseline.bounce_threshold = Some((baseline.noise_floor * multiplier).clamp(min, max));
        }

        let bounds = ZoneBounds::around(baseline.center_x, self.zone_offset);
        info!(
            center_x = baseline.center_x,
            shoulder_width = baseline.shoulder_width,
            samples = baseline.sample_count,
            left_limit = bounds.left_limit,
            right_limit = bounds.right_limit,
            bounce_threshold = ?baseline.bounce_threshold,
            "calibration complete"
        );
        self.phase = CalibrationPhase::Complete;
        self.baseline = Some(baseline.clone());
        self.bounds = Some(bounds);
        baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::keypoint::test_support::upright;

    fn controller(signal: CalibrationSignal) -> CalibrationController {
        let config = CalibrationConfig {
            signal,
            ..CalibrationConfig::default()
        };
        CalibrationController::new(&config, 0.15, 0.5)
    }

    fn approx_eq_f32(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_phases() {
        let mut c = controller(CalibrationSignal::Shoulders);
        assert_eq!(c.phase(), CalibrationPhase::NotStarted);
        assert_eq!(c.process(&upright(10.0, 0.5, 0.4)), CalibrationTick::Started);
        assert_eq!(
            c.phase(),
            CalibrationPhase::InProgress {
                started_at: Duration::from_secs(10)
            }
        );
        assert!(matches!(
            c.process(&upright(11.5, 0.5, 0.4)),
            CalibrationTick::Collecting { progress, skipped: None } if approx_eq_f32(progress, 0.5, 1e-4)
        ));
        assert!(matches!(c.process(&upright(13.0, 0.5, 0.4)), CalibrationTick::Completed(_)));
        assert!(c.is_complete());
        assert_eq!(c.process(&upright(14.0, 0.5, 0.4)), CalibrationTick::Idle);
        assert_eq!(c.progress(Duration::from_secs(99)), 1.0);
    }

    #[test]
    fn test_hip_signal_bounds() {
        let mut c = controller(CalibrationSignal::Hips);
        // 30 samples per second over the 3 second window, hips centered on 0.48
        for i in 0..=90 {
            let mut frame = upright(i as f32 / 30.0, 0.5, 0.4);
            frame.landmarks[LandmarkIndex::LeftHip.index()].x = 0.43;
            frame.landmarks[LandmarkIndex::RightHip.index()].x = 0.53;
            c.process(&frame);
        }
        assert!(c.is_complete());
        let bounds = c.bounds().unwrap();
        assert!(approx_eq_f32(bounds.left_limit, 0.33, 1e-4));
        assert!(approx_eq_f32(bounds.right_limit, 0.63, 1e-4));
        let baseline = c.baseline().unwrap();
        assert!(approx_eq_f32(baseline.hip_x, 0.48, 1e-4));
        assert!(baseline.sample_count >= 90);
    }

    #[test]
    fn test_zero_samples_fallback() {
        let mut c = controller(CalibrationSignal::Shoulders);
        for i in 0..=4 {
            c.process(&LandmarkFrame::empty(Duration::from_secs(i)));
        }
        assert!(c.is_complete());
        let baseline = c.baseline().unwrap();
        assert_eq!(baseline.sample_count, 0);
        assert_eq!(baseline.center_x, DEFAULT_CENTER);
        let bounds = c.bounds().unwrap();
        assert!(approx_eq_f32(bounds.left_limit, 0.35, 1e-6));
        assert!(approx_eq_f32(bounds.right_limit, 0.65, 1e-6));
    }

    #[test]
    fn test_skipped_frames_reported() {
        let mut c = controller(CalibrationSignal::Shoulders);
        c.process(&upright(0.0, 0.5, 0.4));
        assert!(matches!(
            c.process(&LandmarkFrame::empty(Duration::from_secs(1))),
            CalibrationTick::Collecting {
                skipped: Some(FrameError::NoSubjectDetected),
                ..
            }
        ));
    }

    #[test]
    fn test_off_center_frames_are_not_sampled() {
        let mut c = controller(CalibrationSignal::Shoulders);
        c.process(&upright(0.0, 0.5, 0.4));
        // player wandered to the left edge
        assert!(matches!(
            c.process(&upright(1.0, 0.2, 0.4)),
            CalibrationTick::Collecting {
                skipped: Some(FrameError::OffCenter { .. }),
                ..
            }
        ));
        c.process(&upright(2.0, 0.2, 0.4));
        assert!(matches!(c.process(&upright(3.0, 0.2, 0.4)), CalibrationTick::Completed(_)));
        let baseline = c.baseline().unwrap();
        assert_eq!(baseline.sample_count, 1);
        assert!(approx_eq_f32(baseline.center_x, 0.5, 1e-6));
    }

    #[test]
    fn test_hip_signal_keeps_shoulder_reference() {
        let mut c = controller(CalibrationSignal::Hips);
        for i in 0..=3 {
            let mut frame = upright(i as f32, 0.5, 0.4);
            frame.landmarks[LandmarkIndex::LeftHip.index()].x = 0.50;
            frame.landmarks[LandmarkIndex::RightHip.index()].x = 0.60;
            c.process(&frame);
        }
        let baseline = c.baseline().unwrap();
        assert!(approx_eq_f32(baseline.center_x, 0.55, 1e-5));
        assert!(approx_eq_f32(baseline.shoulder_center_x, 0.5, 1e-5));
    }

    #[test]
    fn test_auto_threshold() {
        let config = CalibrationConfig {
            auto_threshold: true,
            ..CalibrationConfig::default()
        };
        let mut c = CalibrationController::new(&config, 0.15, 0.5);
        let ys = [0.400, 0.404, 0.400, 0.402];
        for (i, y) in ys.iter().enumerate() {
            c.process(&upright(i as f32, 0.5, *y));
        }
        let baseline = c.baseline().unwrap();
        assert!(approx_eq_f32(baseline.noise_floor, 0.004, 1e-5));
        // 0.004 * 1.5 = 0.006 lies inside [0.0015, 0.01]
        assert!(approx_eq_f32(baseline.bounce_threshold.unwrap(), 0.006, 1e-5));
    }

    #[test]
    fn test_restart() {
        let mut c = controller(CalibrationSignal::Shoulders);
        for i in 0..=3 {
            c.process(&upright(i as f32, 0.3, 0.4));
        }
        assert!(c.is_complete());
        c.restart();
        assert_eq!(c.phase(), CalibrationPhase::NotStarted);
        assert!(c.baseline().is_none());
        assert!(c.bounds().is_none());
        for i in 10..=13 {
            c.process(&upright(i as f32, 0.6, 0.4));
        }
        assert!(approx_eq_f32(c.baseline().unwrap().center_x, 0.6, 1e-5));
    }
}
