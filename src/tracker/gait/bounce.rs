use std::time::Duration;
use tracing::{debug, trace};

use super::{GaitDetector, GaitEvent, GaitInput, GaitUpdate, RejectReason};
use crate::config::BounceConfig;
use crate::session::SessionState;

/// Counts a step on each downward body bounce.
///
/// Fires when the smoothed vertical delta is above threshold, the body is
/// moving down and the cooldown since the last step has passed.
pub struct BounceDetector {
    threshold: f32,
    cooldown: Duration,
}

impl BounceDetector {
    pub fn new(threshold: f32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
        }
    }

    pub fn from_config(config: &BounceConfig) -> Self {
        Self::new(config.threshold, config.cooldown())
    }
}

impl GaitDetector for BounceDetector {
    fn name(&self) -> &'static str {
        "bounce"
    }

    fn update(&mut self, input: &GaitInput<'_>, session: &mut SessionState) -> GaitUpdate {
        let threshold = input.baseline.bounce_threshold.unwrap_or(self.threshold);
        let motion = input.motion;
        let now = input.now();

        if motion.smoothed_delta <= threshold {
            return GaitUpdate::default();
        }

        let mut update = GaitUpdate {
            events: Vec::new(),
            motion_active: true,
        };
        if !motion.moving_down() {
            trace!(delta = motion.smoothed_delta, "bounce ignored: upward motion");
            update.events.push(GaitEvent::StepRejected {
                reason: RejectReason::UpwardMotion,
                foot: None,
            });
            return update;
        }

        match session.since_last_step(now) {
            Some(elapsed) if elapsed <= self.cooldown => {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "bounce ignored: cooldown");
                update.events.push(GaitEvent::StepRejected {
                    reason: RejectReason::Cooldown { elapsed },
                    foot: None,
                });
            }
            _ => {
                let step_count = session.record_step(now);
                debug!(step_count, delta = motion.smoothed_delta, "step counted (bounce)");
                update.events.push(GaitEvent::StepCounted {
                    step_count,
                    foot: None,
                });
            }
        }
        update
    }

    fn reset(&mut self) {}
}
