pub mod arms;
pub mod gait;
pub mod momentum;
pub mod smooth;
pub mod walking;
pub mod zone;

pub use arms::ArmAngles;
pub use gait::{GaitDetector, GaitEvent, Side};
pub use momentum::MomentumTracker;
pub use smooth::Smoother;
pub use walking::{StateChange, TransitionCause, WalkingArbiter};
pub use zone::{classify_zone, is_locked, LockStatus, SubjectLock, ZoneBounds};
