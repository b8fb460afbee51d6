//! The single sequential frame worker.
//!
//! Acquisition blocks, so it runs inside `block_in_place` and every cycle ends
//! with a yield. This requires the multi-threaded tokio runtime.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::SourceConfig;
use crate::error::SinkError;
use crate::pipeline::{FrameReport, Pipeline, RecalibrateHandle};
use crate::pose::LandmarkSource;
use crate::telemetry::{TelemetrySink, TELEMETRY_EVENT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    Cancelled,
    EndOfStream,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub emitted: u64,
    pub source_errors: u64,
    pub dropped_emissions: u64,
    pub stop: StopReason,
}

pub struct FrameLoop<S, K> {
    pipeline: Pipeline,
    source: S,
    sink: K,
    max_retries: u32,
    retry_delay: Duration,
}

impl<S: LandmarkSource, K: TelemetrySink> FrameLoop<S, K> {
    pub fn new(pipeline: Pipeline, source: S, sink: K, config: &SourceConfig) -> Self {
        Self {
            pipeline,
            source,
            sink,
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    pub fn recalibrate_handle(&self) -> RecalibrateHandle {
        self.pipeline.recalibrate_handle()
    }

    /// Run until the source ends or `cancel` fires. Session state is dropped on return.
    pub async fn run(mut self, cancel: CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut failures: u32 = 0;
        info!(strategy = self.pipeline.gait_strategy(), "frame loop started");

        let stop = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            let acquired = tokio::task::block_in_place(|| self.source.acquire());
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            match acquired {
                Ok(Some(frame)) => {
                    if failures > 0 {
                        debug!(failures, "source recovered");
                        failures = 0;
                    }
                    summary.frames += 1;
                    let report = self.pipeline.process(&frame);
                    self.publish(report, &mut summary);
                }
                Ok(None) => {
                    info!(frames = summary.frames, "source exhausted");
                    break StopReason::EndOfStream;
                }
                Err(e) => {
                    failures += 1;
                    summary.source_errors += 1;
                    warn!(attempt = failures, max = self.max_retries, error = %e, "frame acquisition failed");
                    if failures >= self.max_retries {
                        let report = self.pipeline.source_unavailable();
                        self.publish(report, &mut summary);
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break StopReason::Cancelled,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
            tokio::task::yield_now().await;
        };

        summary.stop = stop;
        info!(
            frames = summary.frames,
            emitted = summary.emitted,
            reason = ?stop,
            "frame loop stopped"
        );
        summary
    }

    fn publish(&self, report: FrameReport, summary: &mut RunSummary) {
        let Some(event) = report.telemetry else {
            return;
        };
        match self.sink.emit(TELEMETRY_EVENT, &event) {
            Ok(()) => summary.emitted += 1,
            Err(SinkError::Unavailable) => {
                trace!("telemetry dropped: no subscribers");
                summary.dropped_emissions += 1;
            }
            Err(e) => {
                debug!(error = %e, "telemetry dropped");
                summary.dropped_emissions += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::SourceError;
    use crate::pose::keypoint::test_support::upright;
    use crate::pose::LandmarkFrame;
    use crate::telemetry::{TelemetryEvent, TelemetryStatus};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays a fixed script of acquisition results, then ends.
    struct ScriptedSource {
        script: VecDeque<Result<Option<LandmarkFrame>, SourceError>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Option<LandmarkFrame>, SourceError>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl LandmarkSource for ScriptedSource {
        fn acquire(&mut self) -> Result<Option<LandmarkFrame>, SourceError> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    /// Never yields a frame.
    struct DeadSource;

    impl LandmarkSource for DeadSource {
        fn acquire(&mut self) -> Result<Option<LandmarkFrame>, SourceError> {
            Err(SourceError::Unavailable("no camera".into()))
        }
    }

    #[derive(Default)]
    struct CollectSink {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    impl CollectSink {
        fn states(&self) -> Vec<TelemetryStatus> {
            self.events.lock().unwrap().iter().map(|e| e.state).collect()
        }
    }

    impl TelemetrySink for CollectSink {
        fn emit(&self, name: &str, event: &TelemetryEvent) -> Result<(), SinkError> {
            assert_eq!(name, TELEMETRY_EVENT);
            self.events.lock().unwrap().push(*event);
            Ok(())
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.calibration.duration_secs = 1.0;
        config.source.max_retries = 2;
        config.source.retry_delay_secs = 0.001;
        config
    }

    fn frames(times: &[f32]) -> Vec<Result<Option<LandmarkFrame>, SourceError>> {
        times.iter().map(|&t| Ok(Some(upright(t, 0.5, 0.5)))).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runs_to_end_of_stream() {
        let config = config();
        let sink = Arc::new(CollectSink::default());
        let source = ScriptedSource::new(frames(&[0.0, 0.5, 1.0, 1.1, 1.2]));
        let frame_loop = FrameLoop::new(Pipeline::new(&config), source, Arc::clone(&sink), &config.source);
        let summary = frame_loop.run(CancellationToken::new()).await;

        assert_eq!(summary.stop, StopReason::EndOfStream);
        assert_eq!(summary.frames, 5);
        // two calibrating snapshots, then IDLE once; steady frames are gated
        assert_eq!(
            sink.states(),
            vec![
                TelemetryStatus::Calibrating,
                TelemetryStatus::Calibrating,
                TelemetryStatus::Idle
            ]
        );
        assert_eq!(summary.emitted, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_camera_error_after_retries() {
        let config = config();
        let sink = Arc::new(CollectSink::default());
        let mut script = frames(&[0.0, 0.5, 1.0]);
        for _ in 0..3 {
            script.push(Err(SourceError::Unavailable("dropped".into())));
        }
        script.extend(frames(&[2.0]));
        let frame_loop = FrameLoop::new(
            Pipeline::new(&config),
            ScriptedSource::new(script),
            Arc::clone(&sink),
            &config.source,
        );
        let summary = frame_loop.run(CancellationToken::new()).await;

        assert_eq!(summary.source_errors, 3);
        let states = sink.states();
        // error reported once despite the third failure
        assert_eq!(states.iter().filter(|s| **s == TelemetryStatus::CameraError).count(), 1);
        assert_eq!(states.last(), Some(&TelemetryStatus::Idle));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_stops_retry_wait() {
        let mut config = config();
        config.source.retry_delay_secs = 30.0;
        let sink = Arc::new(CollectSink::default());
        let frame_loop = FrameLoop::new(Pipeline::new(&config), DeadSource, Arc::clone(&sink), &config.source);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(frame_loop.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let summary = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.stop, StopReason::Cancelled);
        assert_eq!(summary.frames, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_before_start_emits_nothing() {
        let config = config();
        let sink = Arc::new(CollectSink::default());
        let frame_loop = FrameLoop::new(
            Pipeline::new(&config),
            ScriptedSource::new(frames(&[0.0, 0.5])),
            Arc::clone(&sink),
            &config.source,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = frame_loop.run(cancel).await;
        assert_eq!(summary.stop, StopReason::Cancelled);
        assert!(sink.states().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recalibration_between_cycles() {
        let config = config();
        let sink = Arc::new(CollectSink::default());
        let frame_loop = FrameLoop::new(
            Pipeline::new(&config),
            ScriptedSource::new(frames(&[0.0, 0.5, 1.0])),
            Arc::clone(&sink),
            &config.source,
        );
        let handle = frame_loop.recalibrate_handle();
        handle.trigger();
        let summary = frame_loop.run(CancellationToken::new()).await;
        assert_eq!(summary.frames, 3);
        assert!(!handle.is_pending());
        assert_eq!(sink.states().last(), Some(&TelemetryStatus::Idle));
    }
}
