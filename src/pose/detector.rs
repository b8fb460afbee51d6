use std::time::{Duration, Instant};
use tracing::debug;

use super::keypoint::{Landmark, LandmarkFrame};
use crate::error::SourceError;

/// Raw image buffer handed from the grabber to the pose engine.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Video frame acquisition. `grab` may block until a frame is available.
pub trait FrameGrabber: Send {
    /// Next frame; `SourceError::EndOfStream` once a finite input is exhausted.
    fn grab(&mut self) -> Result<RawFrame, SourceError>;
}

/// External pose estimator: one skeleton per frame, empty when nobody is in view.
pub trait PoseEngine: Send {
    fn detect(&mut self, frame: &RawFrame, timestamp_ms: u64) -> Result<Vec<Landmark>, SourceError>;
}

/// Source of landmark frames consumed by the frame loop.
pub trait LandmarkSource: Send {
    /// Next frame, `Ok(None)` at end of stream. May block.
    fn acquire(&mut self) -> Result<Option<LandmarkFrame>, SourceError>;
}

/// Grabber + pose engine with a monotonic millisecond clock.
pub struct EngineSource<G, E> {
    grabber: G,
    engine: E,
    start: Instant,
    last_ms: u64,
}

impl<G: FrameGrabber, E: PoseEngine> EngineSource<G, E> {
    pub fn new(grabber: G, engine: E) -> Self {
        Self {
            grabber,
            engine,
            start: Instant::now(),
            last_ms: 0,
        }
    }

    fn next_timestamp(&mut self) -> u64 {
        // engines reject timestamps that go backwards
        let now = self.start.elapsed().as_millis() as u64;
        self.last_ms = self.last_ms.max(now);
        self.last_ms
    }
}

impl<G: FrameGrabber, E: PoseEngine> LandmarkSource for EngineSource<G, E> {
    fn acquire(&mut self) -> Result<Option<LandmarkFrame>, SourceError> {
        let frame = match self.grabber.grab() {
            Ok(frame) => frame,
            Err(SourceError::EndOfStream) => return Ok(None),
            Err(e) => return Err(e),
        };
        let timestamp_ms = self.next_timestamp();
        let landmarks = self.engine.detect(&frame, timestamp_ms)?;
        if landmarks.is_empty() {
            debug!(timestamp_ms, "no pose detected");
        }
        Ok(Some(LandmarkFrame::new(
            Duration::from_millis(timestamp_ms),
            landmarks,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::LandmarkIndex;

    struct CountingGrabber {
        remaining: usize,
    }

    impl FrameGrabber for CountingGrabber {
        fn grab(&mut self) -> Result<RawFrame, SourceError> {
            if self.remaining == 0 {
                return Err(SourceError::EndOfStream);
            }
            self.remaining -= 1;
            Ok(RawFrame {
                width: 4,
                height: 4,
                data: vec![0; 16],
            })
        }
    }

    struct BrokenGrabber;

    impl FrameGrabber for BrokenGrabber {
        fn grab(&mut self) -> Result<RawFrame, SourceError> {
            Err(SourceError::Unavailable("device unplugged".into()))
        }
    }

    /// Alternates between a full skeleton and nobody in view.
    #[derive(Default)]
    struct BlinkingEngine {
        calls: usize,
        timestamps: Vec<u64>,
    }

    impl PoseEngine for BlinkingEngine {
        fn detect(&mut self, _frame: &RawFrame, timestamp_ms: u64) -> Result<Vec<Landmark>, SourceError> {
            self.calls += 1;
            self.timestamps.push(timestamp_ms);
            if self.calls % 2 == 0 {
                Ok(Vec::new())
            } else {
                Ok(vec![Landmark::new(0.5, 0.5, 0.9); LandmarkIndex::COUNT])
            }
        }
    }

    #[test]
    fn test_engine_source_until_end() {
        let mut source = EngineSource::new(CountingGrabber { remaining: 3 }, BlinkingEngine::default());
        let a = source.acquire().unwrap().unwrap();
        let b = source.acquire().unwrap().unwrap();
        let c = source.acquire().unwrap().unwrap();
        assert!(a.has_subject());
        assert!(!b.has_subject());
        assert!(c.has_subject());
        assert!(a.timestamp <= b.timestamp && b.timestamp <= c.timestamp);
        assert!(source.acquire().unwrap().is_none());
        assert_eq!(source.engine.calls, 3);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let mut source = EngineSource::new(CountingGrabber { remaining: 50 }, BlinkingEngine::default());
        while source.acquire().unwrap().is_some() {}
        let ts = &source.engine.timestamps;
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_grabber_error_propagates() {
        let mut source = EngineSource::new(BrokenGrabber, BlinkingEngine::default());
        assert!(matches!(source.acquire(), Err(SourceError::Unavailable(_))));
        assert_eq!(source.engine.calls, 0);
    }
}
