use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::FrameError;

/// MediaPipe Pose landmark indices used by the controller.
///
/// The engine emits 33 points; only the upper-body joints the pipeline reads
/// are named here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum LandmarkIndex {
    Nose = 0,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftHip = 23,
    RightHip = 24,
}

impl LandmarkIndex {
    pub const COUNT: usize = 33;

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Nose),
            11 => Some(Self::LeftShoulder),
            12 => Some(Self::RightShoulder),
            13 => Some(Self::LeftElbow),
            14 => Some(Self::RightElbow),
            15 => Some(Self::LeftWrist),
            16 => Some(Self::RightWrist),
            23 => Some(Self::LeftHip),
            24 => Some(Self::RightHip),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Normalized X (0.0..1.0)
    pub x: f32,
    /// Normalized Y (0.0..1.0, grows downward)
    pub y: f32,
    /// Relative depth, unused by the 2D pipeline
    #[serde(default)]
    pub z: f32,
    #[serde(default = "full_visibility")]
    pub visibility: f32,
}

fn full_visibility() -> f32 {
    1.0
}

impl Landmark {
    pub fn new(x: f32, y: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z: 0.0,
            visibility,
        }
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility >= threshold
    }
}

impl Default for Landmark {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            visibility: 0.0,
        }
    }
}

/// One processed frame from the pose engine.
///
/// An empty `landmarks` vector means no subject was detected.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkFrame {
    /// Monotonic capture time relative to the start of the run.
    pub timestamp: Duration,
    pub landmarks: Vec<Landmark>,
}

impl LandmarkFrame {
    pub fn new(timestamp: Duration, landmarks: Vec<Landmark>) -> Self {
        Self {
            timestamp,
            landmarks,
        }
    }

    pub fn empty(timestamp: Duration) -> Self {
        Self::new(timestamp, Vec::new())
    }

    pub fn has_subject(&self) -> bool {
        !self.landmarks.is_empty()
    }

    pub fn get(&self, index: LandmarkIndex) -> Option<&Landmark> {
        self.landmarks.get(index.index())
    }

    /// Landmark at `index`, or the reason it cannot be used this frame.
    pub fn require(&self, index: LandmarkIndex, min_visibility: f32) -> Result<&Landmark, FrameError> {
        if !self.has_subject() {
            return Err(FrameError::NoSubjectDetected);
        }
        match self.get(index) {
            Some(lm) if lm.is_visible(min_visibility) => Ok(lm),
            Some(lm) => Err(FrameError::InsufficientLandmarks {
                index: index.index(),
                visibility: lm.visibility,
            }),
            None => Err(FrameError::InsufficientLandmarks {
                index: index.index(),
                visibility: 0.0,
            }),
        }
    }

    pub fn shoulders(&self, min_visibility: f32) -> Result<ShoulderLine, FrameError> {
        let left = self.require(LandmarkIndex::LeftShoulder, min_visibility)?;
        let right = self.require(LandmarkIndex::RightShoulder, min_visibility)?;
        Ok(ShoulderLine {
            center_x: (left.x + right.x) / 2.0,
            center_y: (left.y + right.y) / 2.0,
            width: (right.x - left.x).abs(),
        })
    }

    /// Hip midpoint as (x, y).
    pub fn hip_center(&self, min_visibility: f32) -> Result<(f32, f32), FrameError> {
        let left = self.require(LandmarkIndex::LeftHip, min_visibility)?;
        let right = self.require(LandmarkIndex::RightHip, min_visibility)?;
        Ok(((left.x + right.x) / 2.0, (left.y + right.y) / 2.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShoulderLine {
    pub center_x: f32,
    pub center_y: f32,
    pub width: f32,
}
