use std::collections::VecDeque;

use crate::config::{SmoothConfig, SmoothKind};

/// Mean over a bounded FIFO of the most recent samples.
#[derive(Debug, Clone)]
pub struct RollingAverage {
    capacity: usize,
    buffer: VecDeque<f32>,
}

impl RollingAverage {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: VecDeque::with_capacity(capacity),
        }
    }

    pub fn update(&mut self, raw: f32) -> f32 {
        if self.capacity == 0 {
            return raw;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(raw);
        self.buffer.iter().sum::<f32>() / self.buffer.len() as f32
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.buffer.iter().copied()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Exponential moving average.
///
/// `decay` is the weight kept from the previous value; the first sample passes through.
#[derive(Debug, Clone)]
pub struct ExponentialAverage {
    decay: f32,
    prev: Option<f32>,
}

impl ExponentialAverage {
    pub fn new(decay: f32) -> Self {
        Self { decay, prev: None }
    }

    pub fn update(&mut self, raw: f32) -> f32 {
        let value = match self.prev {
            Some(prev) => self.decay * prev + (1.0 - self.decay) * raw,
            None => raw,
        };
        self.prev = Some(value);
        value
    }

    pub fn value(&self) -> Option<f32> {
        self.prev
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

/// Scalar jitter filter selected by `[smoothing] kind`.
#[derive(Debug, Clone)]
pub enum Smoother {
    Window(RollingAverage),
    Exponential(ExponentialAverage),
}

impl Smoother {
    pub fn from_config(config: &SmoothConfig) -> Self {
        match config.kind {
            SmoothKind::Window => Self::Window(RollingAverage::new(config.window)),
            SmoothKind::Exponential => Self::Exponential(ExponentialAverage::new(config.decay)),
        }
    }

    pub fn update(&mut self, raw: f32) -> f32 {
        match self {
            Self::Window(w) => w.update(raw),
            Self::Exponential(e) => e.update(raw),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Window(w) => w.reset(),
            Self::Exponential(e) => e.reset(),
        }
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Self::from_config(&SmoothConfig::default())
    }
}
