use serde::{Deserialize, Serialize};

use crate::pose::{Landmark, LandmarkFrame, LandmarkIndex};

/// Offset that maps a horizontal arm (shoulder.y == wrist.y) to about 90 degrees.
const LIFT_OFFSET: f32 = 0.4;
/// Degrees per normalized unit of lift; makes hands-above-head reach 180.
const LIFT_GAIN: f32 = 240.0;

/// Per-arm angles reported to the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArmAngles {
    /// 0 = down, 180 = straight up
    pub left: u8,
    pub right: u8,
    /// Forearm lateral angle, -90 (left) .. 90 (right)
    pub left_wiper: i16,
    pub right_wiper: i16,
}

/// Arm lift with a deadzone so walking arm swing reads as 0.
pub fn arm_lift_angle(shoulder: &Landmark, wrist: &Landmark, deadzone: f32) -> u8 {
    let lift = (shoulder.y - wrist.y) + LIFT_OFFSET;
    if lift < deadzone {
        return 0;
    }
    (lift * LIFT_GAIN).clamp(0.0, 180.0) as u8
}

/// Lateral forearm angle around the elbow in degrees, 0 = forearm straight up.
/// A hanging forearm reads close to 180.
pub fn arm_wiper_angle(elbow: &Landmark, wrist: &Landmark) -> i16 {
    let dx = wrist.x - elbow.x;
    let dy = wrist.y - elbow.y;
    dx.atan2(-dy).to_degrees().round() as i16
}

/// Angles for both arms. An arm that is lowered or not visible reads as 0 on both axes.
pub fn arm_angles(frame: &LandmarkFrame, deadzone: f32, min_visibility: f32) -> ArmAngles {
    let side = |shoulder, elbow, wrist| -> (u8, i16) {
        let (Ok(s), Ok(e), Ok(w)) = (
            frame.require(shoulder, min_visibility),
            frame.require(elbow, min_visibility),
            frame.require(wrist, min_visibility),
        ) else {
            return (0, 0);
        };
        let lift = arm_lift_angle(s, w, deadzone);
        if lift == 0 {
            return (0, 0);
        }
        (lift, arm_wiper_angle(e, w).clamp(-90, 90))
    };
    let (left, left_wiper) = side(
        LandmarkIndex::LeftShoulder,
        LandmarkIndex::LeftElbow,
        LandmarkIndex::LeftWrist,
    );
    let (right, right_wiper) = side(
        LandmarkIndex::RightShoulder,
        LandmarkIndex::RightElbow,
        LandmarkIndex::RightWrist,
    );
    ArmAngles {
        left,
        right,
        left_wiper,
        right_wiper,
    }
}
