pub mod detector;
pub mod keypoint;
pub mod replay;

pub use detector::{EngineSource, FrameGrabber, LandmarkSource, PoseEngine, RawFrame};
pub use keypoint::{Landmark, LandmarkFrame, LandmarkIndex, ShoulderLine};
pub use replay::{RecordedFrame, ReplaySource};
