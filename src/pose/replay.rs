//! JSON-lines landmark recordings for offline runs.
//!
//! One frame per line: `{"timestamp_ms": 1234, "landmarks": [{"x": .., "y": .., "visibility": ..}, ..]}`.
//! An empty `landmarks` array records a frame with nobody in view.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, trace};

use super::detector::LandmarkSource;
use super::keypoint::{Landmark, LandmarkFrame};
use crate::error::SourceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub timestamp_ms: u64,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
}

impl From<&LandmarkFrame> for RecordedFrame {
    fn from(frame: &LandmarkFrame) -> Self {
        Self {
            timestamp_ms: frame.timestamp.as_millis() as u64,
            landmarks: frame.landmarks.clone(),
        }
    }
}

impl From<RecordedFrame> for LandmarkFrame {
    fn from(rec: RecordedFrame) -> Self {
        LandmarkFrame::new(Duration::from_millis(rec.timestamp_ms), rec.landmarks)
    }
}

pub struct ReplaySource<R> {
    reader: R,
    line_no: usize,
    buf: String,
    pace: bool,
    /// Wall clock and recording time of the first frame
    origin: Option<(Instant, u64)>,
    last_ms: u64,
}

impl ReplaySource<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, pace: bool) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        info!(path = %path.display(), pace, "replaying recording");
        Ok(Self::from_reader(BufReader::new(file), pace))
    }
}

impl<R: BufRead + Send> ReplaySource<R> {
    pub fn from_reader(reader: R, pace: bool) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
            pace,
            origin: None,
            last_ms: 0,
        }
    }

    fn next_record(&mut self) -> Result<Option<RecordedFrame>, SourceError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map(Some)
                .map_err(|source| SourceError::Decode {
                    line: self.line_no,
                    source,
                });
        }
    }

    /// Sleep until the recording's relative time has elapsed on the wall clock.
    fn wait_for(&mut self, timestamp_ms: u64) {
        let (started, first_ms) = *self.origin.get_or_insert((Instant::now(), timestamp_ms));
        let due = Duration::from_millis(timestamp_ms.saturating_sub(first_ms));
        let elapsed = started.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
    }
}

impl<R: BufRead + Send> LandmarkSource for ReplaySource<R> {
    fn acquire(&mut self) -> Result<Option<LandmarkFrame>, SourceError> {
        let Some(mut rec) = self.next_record()? else {
            return Ok(None);
        };
        // recordings stitched together can step backwards
        rec.timestamp_ms = rec.timestamp_ms.max(self.last_ms);
        self.last_ms = rec.timestamp_ms;
        if self.pace {
            self.wait_for(rec.timestamp_ms);
        }
        trace!(line = self.line_no, timestamp_ms = rec.timestamp_ms, "replay frame");
        Ok(Some(rec.into()))
    }
}
