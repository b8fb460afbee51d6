use crate::config::MomentumConfig;

/// Decaying motion-energy accumulator.
///
/// Active frames add `increment`, quiet frames multiply by `decay`; the result
/// is clamped to 0.0..=1.0 on every update.
#[derive(Debug, Clone)]
pub struct MomentumTracker {
    increment: f32,
    decay: f32,
    activation: f32,
}

impl MomentumTracker {
    pub fn new(increment: f32, decay: f32, activation: f32) -> Self {
        Self {
            increment,
            decay,
            activation,
        }
    }

    pub fn from_config(config: &MomentumConfig) -> Self {
        Self::new(config.increment, config.decay, config.activation)
    }

    pub fn update(&self, momentum: f32, active: bool) -> f32 {
        let next = if active {
            momentum + self.increment
        } else {
            momentum * self.decay
        };
        next.clamp(0.0, 1.0)
    }

    pub fn is_active(&self, momentum: f32) -> bool {
        momentum > self.activation
    }
}

impl Default for MomentumTracker {
    fn default() -> Self {
        Self::from_config(&MomentumConfig::default())
    }
}
