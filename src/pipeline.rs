//! Per-frame orchestration: calibration, lock, zone, gait, arbiter, telemetry.
//!
//! One call to [`Pipeline::process`] is one cycle. A pending recalibration is
//! applied before anything else looks at the frame, so a cycle never mixes
//! state from two calibration epochs. Until calibration completes the frame
//! only feeds the calibration window. After that, gameplay runs in a fixed
//! order:
//!
//! 1. frames without a usable body signal are skipped as "no player"
//! 2. the subject lock decides whether this is still the calibrated player
//! 3. zone, turn and arm angles are read off the landmarks
//! 4. the vertical delta is smoothed and handed to the gait detector
//! 5. the walking arbiter turns steps or momentum into IDLE / WALKING
//!
//! Every cycle ends with a telemetry snapshot offered to the change gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationController, CalibrationTick};
use crate::config::{CalibrationSignal, Config};
use crate::error::FrameError;
use crate::pose::{LandmarkFrame, LandmarkIndex};
use crate::session::{GameState, Position, SessionState};
use crate::telemetry::{TelemetryEvent, TelemetryGate};
use crate::tracker::arms::arm_angles;
use crate::tracker::gait::{detector_from_config, GaitDetector, GaitEvent, GaitInput, VerticalMotion};
use crate::tracker::smooth::Smoother;
use crate::tracker::walking::{StateChange, WalkingArbiter};
use crate::tracker::zone::{classify_zone, LockStatus, SubjectLock, ZoneBounds};

/// Cross-thread recalibration request.
///
/// Set from any thread; consumed by the pipeline at the start of its next cycle.
#[derive(Debug, Clone, Default)]
pub struct RecalibrateHandle(Arc<AtomicBool>);

impl RecalibrateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Recalibrated,
    CalibrationStarted,
    CalibrationCompleted { center_x: f32, bounds: ZoneBounds, samples: usize },
    FrameSkipped(FrameError),
    SubjectLost { since: Duration },
    SubjectReacquired,
    ZoneChanged { from: Position, to: Position },
    Gait(GaitEvent),
    StateChanged(StateChange),
    CameraError,
    CameraRestored,
}

/// What one cycle produced. `telemetry` is set only when the snapshot changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub events: Vec<PipelineEvent>,
    pub telemetry: Option<TelemetryEvent>,
}

impl FrameReport {
    pub fn has(&self, pred: impl Fn(&PipelineEvent) -> bool) -> bool {
        self.events.iter().any(pred)
    }
}

pub struct Pipeline {
    signal: CalibrationSignal,
    min_visibility: f32,
    arm_deadzone: f32,
    turn_bounds: ZoneBounds,
    calibration: CalibrationController,
    session: SessionState,
    gait: Box<dyn GaitDetector>,
    arbiter: WalkingArbiter,
    lock: SubjectLock,
    gate: TelemetryGate,
    recalibrate: RecalibrateHandle,
    /// State to return to once the source delivers again
    resume_state: Option<GameState>,
    last_timestamp: Duration,
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        let min_visibility = config.landmarks.min_visibility;
        let mut session = SessionState::new(Smoother::from_config(&config.smoothing));
        session.game_state = GameState::Calibrating;
        Self {
            signal: config.calibration.signal,
            min_visibility,
            arm_deadzone: config.arms.deadzone,
            turn_bounds: ZoneBounds::new(config.turn.left_trigger, config.turn.right_trigger),
            calibration: CalibrationController::new(&config.calibration, config.zone.offset, min_visibility),
            session,
            gait: detector_from_config(config),
            arbiter: WalkingArbiter::from_config(config),
            lock: SubjectLock::from_config(&config.lock, min_visibility),
            gate: TelemetryGate::new(),
            recalibrate: RecalibrateHandle::new(),
            resume_state: None,
            last_timestamp: Duration::ZERO,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn calibration(&self) -> &CalibrationController {
        &self.calibration
    }

    pub fn gait_strategy(&self) -> &'static str {
        self.gait.name()
    }

    pub fn recalibrate_handle(&self) -> RecalibrateHandle {
        self.recalibrate.clone()
    }

    /// Discard the baseline and every gameplay counter. The next frame opens a
    /// new calibration window and always produces telemetry.
    pub fn recalibrate(&mut self) -> PipelineEvent {
        info!(step_count = self.session.step_count, "recalibration requested");
        self.calibration.restart();
        self.session.reset();
        self.session.game_state = GameState::Calibrating;
        self.gait.reset();
        self.gate.reset();
        self.resume_state = None;
        PipelineEvent::Recalibrated
    }

    /// The source produced no frame after exhausting its retries.
    pub fn source_unavailable(&mut self) -> FrameReport {
        let mut report = FrameReport::default();
        if self.resume_state.is_none() {
            warn!(state = %self.session.game_state, "camera unavailable");
            self.resume_state = Some(self.session.game_state);
            self.session.game_state = GameState::CameraError;
            report.events.push(PipelineEvent::CameraError);
        }
        report.telemetry = self.snapshot();
        report
    }

    pub fn process(&mut self, frame: &LandmarkFrame) -> FrameReport {
        let mut report = FrameReport::default();
        if self.recalibrate.take() {
            report.events.push(self.recalibrate());
        }
        if let Some(state) = self.resume_state.take() {
            // a walk interrupted by the outage has to be re-earned
            self.session.game_state = match state {
                GameState::Calibrating => GameState::Calibrating,
                _ => GameState::Idle,
            };
            info!(state = %self.session.game_state, "camera restored");
            report.events.push(PipelineEvent::CameraRestored);
        }
        self.last_timestamp = frame.timestamp;
        self.session.subject_missing = !frame.has_subject();

        if self.calibration.is_complete() {
            self.gameplay(frame, &mut report);
        } else {
            self.calibrate(frame, &mut report);
        }
        report.telemetry = self.snapshot();
        report
    }

    fn snapshot(&mut self) -> Option<TelemetryEvent> {
        let progress = self.calibration.progress(self.last_timestamp);
        self.gate.offer(TelemetryEvent::snapshot(&self.session, progress))
    }

    fn calibrate(&mut self, frame: &LandmarkFrame, report: &mut FrameReport) {
        let tick = self.calibration.process(frame);
        self.session.off_center = matches!(
            tick,
            CalibrationTick::Collecting {
                skipped: Some(FrameError::OffCenter { .. }),
                ..
            }
        );
        match tick {
            CalibrationTick::Started => report.events.push(PipelineEvent::CalibrationStarted),
            CalibrationTick::Collecting {
                skipped: Some(reason),
                ..
            } => report.events.push(PipelineEvent::FrameSkipped(reason)),
            CalibrationTick::Collecting { skipped: None, .. } | CalibrationTick::Idle => {}
            CalibrationTick::Completed(baseline) => {
                self.session.game_state = GameState::Idle;
                self.gate.reset();
                if let Some(bounds) = self.calibration.bounds() {
                    report.events.push(PipelineEvent::CalibrationCompleted {
                        center_x: baseline.center_x,
                        bounds,
                        samples: baseline.sample_count,
                    });
                }
            }
        }
    }

    fn gameplay(&mut self, frame: &LandmarkFrame, report: &mut FrameReport) {
        let Some(baseline) = self.calibration.baseline().cloned() else {
            return;
        };
        let Some(bounds) = self.calibration.bounds() else {
            return;
        };
        if !frame.has_subject() {
            report.events.push(PipelineEvent::FrameSkipped(FrameError::NoSubjectDetected));
            return;
        }
        // Too few usable landmarks reads the same as an empty frame: no player,
        // and the lock and motion history stay as they were.
        let (x, y) = match frame
            .shoulders(self.min_visibility)
            .and_then(|_| self.body_signal(frame))
        {
            Ok(v) => v,
            Err(reason) => {
                debug!(%reason, "gameplay frame skipped");
                self.session.subject_missing = true;
                report.events.push(PipelineEvent::FrameSkipped(reason));
                return;
            }
        };

        match self.lock.check(frame, &baseline, &mut self.session) {
            LockStatus::Locked if self.session.subject_lost => {
                self.session.subject_lost = false;
                info!("subject reacquired");
                report.events.push(PipelineEvent::SubjectReacquired);
            }
            LockStatus::Locked | LockStatus::Grace => {}
            LockStatus::Lost => {
                let since = self.lock.unlocked_for(&self.session, &baseline, frame.timestamp);
                if !self.session.subject_lost {
                    warn!(since_ms = since.as_millis() as u64, "subject lost");
                    self.session.subject_lost = true;
                    // no vertical delta may span the gap
                    self.session.prev_signal_value = None;
                    self.session.smoothing.reset();
                    self.gait.interrupt();
                    report.events.push(PipelineEvent::SubjectLost { since });
                }
                report
                    .events
                    .push(PipelineEvent::FrameSkipped(FrameError::SubjectLost { since }));
                return;
            }
        }

        let position = classify_zone(x, &bounds);
        if position != self.session.position {
            debug!(from = ?self.session.position, to = ?position, "zone changed");
            report.events.push(PipelineEvent::ZoneChanged {
                from: self.session.position,
                to: position,
            });
            self.session.position = position;
        }
        self.session.turn = match frame.require(LandmarkIndex::Nose, self.min_visibility) {
            Ok(nose) => classify_zone(nose.x, &self.turn_bounds),
            Err(_) => Position::Center,
        };
        self.session.arm_angles = arm_angles(frame, self.arm_deadzone, self.min_visibility);

        let previous = self.session.prev_signal_value;
        let raw_delta = previous.map_or(0.0, |p| (y - p).abs());
        let smoothed_delta = self.session.smoothing.update(raw_delta);
        self.session.prev_signal_value = Some(y);
        let input = GaitInput {
            frame,
            baseline: &baseline,
            motion: VerticalMotion {
                current: y,
                previous,
                raw_delta,
                smoothed_delta,
            },
            min_visibility: self.min_visibility,
        };
        let update = self.gait.update(&input, &mut self.session);
        report.events.extend(update.events.into_iter().map(PipelineEvent::Gait));

        if let Some(change) = self.arbiter.update(&mut self.session, update.motion_active, frame.timestamp) {
            report.events.push(PipelineEvent::StateChanged(change));
        }
    }

    /// Midpoint of the calibrated body signal as (x, y).
    fn body_signal(&self, frame: &LandmarkFrame) -> Result<(f32, f32), FrameError> {
        match self.signal {
            CalibrationSignal::Shoulders => {
                let s = frame.shoulders(self.min_visibility)?;
                Ok((s.center_x, s.center_y))
            }
            CalibrationSignal::Hips => frame.hip_center(self.min_visibility),
        }
    }
}
