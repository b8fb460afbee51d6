use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub smoothing: SmoothConfig,
    #[serde(default)]
    pub zone: ZoneConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub landmarks: LandmarkConfig,
    #[serde(default)]
    pub gait: GaitConfig,
    #[serde(default)]
    pub bounce: BounceConfig,
    #[serde(default)]
    pub swing: SwingConfig,
    #[serde(default)]
    pub momentum: MomentumConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub arms: ArmConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Which body midpoint feeds calibration and zone classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSignal {
    Shoulders,
    Hips,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
    /// Capture window length (seconds)
    #[serde(default = "default_calibration_duration")]
    pub duration_secs: f32,
    #[serde(default = "default_calibration_signal")]
    pub signal: CalibrationSignal,
    /// Derive the bounce threshold from standing-still noise
    #[serde(default)]
    pub auto_threshold: bool,
    #[serde(default = "default_noise_multiplier")]
    pub noise_multiplier: f32,
    #[serde(default = "default_threshold_min")]
    pub threshold_min: f32,
    #[serde(default = "default_threshold_max")]
    pub threshold_max: f32,
    /// The player must stand with the nose inside `center_left..=center_right`
    /// for a frame to count toward the baseline
    #[serde(default = "default_center_left")]
    pub center_left: f32,
    #[serde(default = "default_center_right")]
    pub center_right: f32,
}

fn default_calibration_duration() -> f32 { 3.0 }
fn default_calibration_signal() -> CalibrationSignal { CalibrationSignal::Shoulders }
fn default_noise_multiplier() -> f32 { 1.5 }
fn default_threshold_min() -> f32 { 0.0015 }
fn default_threshold_max() -> f32 { 0.01 }
fn default_center_left() -> f32 { 0.3 }
fn default_center_right() -> f32 { 0.7 }

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_calibration_duration(),
            signal: default_calibration_signal(),
            auto_threshold: false,
            noise_multiplier: default_noise_multiplier(),
            threshold_min: default_threshold_min(),
            threshold_max: default_threshold_max(),
            center_left: default_center_left(),
            center_right: default_center_right(),
        }
    }
}

impl CalibrationConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f32(self.duration_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothKind {
    /// Mean of the last `window` samples
    Window,
    /// Exponential moving average with `decay`
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmoothConfig {
    #[serde(default = "default_smooth_kind")]
    pub kind: SmoothKind,
    #[serde(default = "default_smooth_window")]
    pub window: usize,
    /// Weight of the previous value in the EMA (0.0..1.0)
    #[serde(default = "default_smooth_decay")]
    pub decay: f32,
}

fn default_smooth_kind() -> SmoothKind { SmoothKind::Window }
fn default_smooth_window() -> usize { 5 }
fn default_smooth_decay() -> f32 { 0.85 }

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            kind: default_smooth_kind(),
            window: default_smooth_window(),
            decay: default_smooth_decay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    /// Half width of the CENTER zone around the calibrated center
    #[serde(default = "default_zone_offset")]
    pub offset: f32,
}

fn default_zone_offset() -> f32 { 0.15 }

impl Default for ZoneConfig {
    fn default() -> Self {
        Self { offset: default_zone_offset() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TurnConfig {
    /// Nose X below this leans LEFT
    #[serde(default = "default_turn_left")]
    pub left_trigger: f32,
    /// Nose X above this leans RIGHT
    #[serde(default = "default_turn_right")]
    pub right_trigger: f32,
}

fn default_turn_left() -> f32 { 0.4 }
fn default_turn_right() -> f32 { 0.6 }

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            left_trigger: default_turn_left(),
            right_trigger: default_turn_right(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LandmarkConfig {
    #[serde(default = "default_min_visibility")]
    pub min_visibility: f32,
}

fn default_min_visibility() -> f32 { 0.5 }

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self { min_visibility: default_min_visibility() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaitStrategy {
    Bounce,
    Swing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterKind {
    /// WALKING after N consecutive steps
    Steps,
    /// WALKING while momentum is above the activation level
    Momentum,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GaitConfig {
    #[serde(default = "default_gait_strategy")]
    pub strategy: GaitStrategy,
    #[serde(default = "default_arbiter")]
    pub arbiter: ArbiterKind,
    /// Steps needed before IDLE -> WALKING
    #[serde(default = "default_required_steps")]
    pub required_steps: u32,
    /// Quiet time after the last step before WALKING -> IDLE (seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: f32,
}

fn default_gait_strategy() -> GaitStrategy { GaitStrategy::Bounce }
fn default_arbiter() -> ArbiterKind { ArbiterKind::Steps }
fn default_required_steps() -> u32 { 3 }
fn default_stop_timeout() -> f32 { 0.5 }

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            strategy: default_gait_strategy(),
            arbiter: default_arbiter(),
            required_steps: default_required_steps(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

impl GaitConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BounceConfig {
    /// Minimum smoothed vertical delta per frame
    #[serde(default = "default_bounce_threshold")]
    pub threshold: f32,
    /// Minimum time between counted steps (seconds)
    #[serde(default = "default_step_cooldown")]
    pub cooldown_secs: f32,
}

fn default_bounce_threshold() -> f32 { 0.003 }
fn default_step_cooldown() -> f32 { 0.3 }

impl Default for BounceConfig {
    fn default() -> Self {
        Self {
            threshold: default_bounce_threshold(),
            cooldown_secs: default_step_cooldown(),
        }
    }
}

impl BounceConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f32(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwingConfig {
    /// Wrist offset from shoulder, in shoulder widths
    #[serde(default = "default_swing_threshold")]
    pub threshold: f32,
    /// Minimum wrist speed (normalized units per second)
    #[serde(default = "default_swing_min_velocity")]
    pub min_velocity: f32,
    /// Minimum time between counted steps (seconds)
    #[serde(default = "default_min_step_interval")]
    pub min_step_interval_secs: f32,
    /// |ratio| below this returns an arm to NEUTRAL
    #[serde(default = "default_neutral_epsilon")]
    pub neutral_epsilon: f32,
    /// Warn when a counted swing shows no hip rise
    #[serde(default = "default_true")]
    pub hip_rise_check: bool,
    #[serde(default = "default_hip_rise_threshold")]
    pub hip_rise_threshold: f32,
}

fn default_swing_threshold() -> f32 { 0.3 }
fn default_swing_min_velocity() -> f32 { 0.3 }
fn default_min_step_interval() -> f32 { 0.3 }
fn default_neutral_epsilon() -> f32 { 0.1 }
fn default_hip_rise_threshold() -> f32 { 0.02 }
fn default_true() -> bool { true }

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            threshold: default_swing_threshold(),
            min_velocity: default_swing_min_velocity(),
            min_step_interval_secs: default_min_step_interval(),
            neutral_epsilon: default_neutral_epsilon(),
            hip_rise_check: true,
            hip_rise_threshold: default_hip_rise_threshold(),
        }
    }
}

impl SwingConfig {
    pub fn min_step_interval(&self) -> Duration {
        Duration::from_secs_f32(self.min_step_interval_secs)
    }

    pub fn hip_rise(&self) -> Option<f32> {
        self.hip_rise_check.then_some(self.hip_rise_threshold)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MomentumConfig {
    #[serde(default = "default_momentum_increment")]
    pub increment: f32,
    /// Per-frame multiplier while idle (0.0..1.0)
    #[serde(default = "default_momentum_decay")]
    pub decay: f32,
    #[serde(default = "default_momentum_activation")]
    pub activation: f32,
}

fn default_momentum_increment() -> f32 { 0.15 }
fn default_momentum_decay() -> f32 { 0.92 }
fn default_momentum_activation() -> f32 { 0.1 }

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            increment: default_momentum_increment(),
            decay: default_momentum_decay(),
            activation: default_momentum_activation(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Allowed shoulder-midpoint drift (normalized units). Wider than `zone.offset`
    /// so leaning into a side zone keeps the lock.
    #[serde(default = "default_lock_position_tolerance")]
    pub position_tolerance: f32,
    /// Allowed shoulder-width change (fraction of baseline)
    #[serde(default = "default_lock_scale_tolerance")]
    pub scale_tolerance: f32,
    #[serde(default = "default_lock_grace")]
    pub grace_secs: f32,
}

fn default_lock_position_tolerance() -> f32 { 0.35 }
fn default_lock_scale_tolerance() -> f32 { 0.25 }
fn default_lock_grace() -> f32 { 0.5 }

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            position_tolerance: default_lock_position_tolerance(),
            scale_tolerance: default_lock_scale_tolerance(),
            grace_secs: default_lock_grace(),
        }
    }
}

impl LockConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs_f32(self.grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArmConfig {
    /// Lift below this reads as arm down
    #[serde(default = "default_arm_deadzone")]
    pub deadzone: f32,
}

fn default_arm_deadzone() -> f32 { 0.30 }

impl Default for ArmConfig {
    fn default() -> Self {
        Self { deadzone: default_arm_deadzone() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// JSON-lines landmark recording for the replay source
    #[serde(default = "default_replay_path")]
    pub replay_path: String,
    /// Sleep to match recorded timestamps
    #[serde(default = "default_pace")]
    pub pace: bool,
    /// Consecutive acquisition failures before CAMERA_ERROR
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f32,
}

fn default_replay_path() -> String { "recording.jsonl".to_string() }
fn default_pace() -> bool { true }
fn default_max_retries() -> u32 { 5 }
fn default_retry_delay() -> f32 { 0.1 }

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            replay_path: default_replay_path(),
            pace: default_pace(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

impl SourceConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f32(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Per-client backlog before old events are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_listen_addr() -> String { "0.0.0.0:5000".to_string() }
fn default_channel_capacity() -> usize { 64 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// tracing EnvFilter directive, overridden by RUST_LOG
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String { "info".to_string() }

impl Default for LogConfig {
    fn default() -> Self {
        Self { filter: default_log_filter() }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn unit_open(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("{} is outside (0, 1)", value)))
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, format!("{} must be positive", value)))
    }
}

fn non_negative(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, format!("{} must not be negative", value)))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::from)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to defaults when it is missing or invalid.
    ///
    /// The load error is handed back so the caller can report it once logging is up.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load(path) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("calibration.duration_secs", self.calibration.duration_secs)?;
        positive("calibration.noise_multiplier", self.calibration.noise_multiplier)?;
        non_negative("calibration.threshold_min", self.calibration.threshold_min)?;
        if self.calibration.threshold_min > self.calibration.threshold_max {
            return Err(invalid("calibration.threshold_max", "smaller than threshold_min"));
        }
        if self.calibration.center_left >= self.calibration.center_right {
            return Err(invalid("calibration.center_left", "must be below center_right"));
        }
        if self.smoothing.kind == SmoothKind::Window && self.smoothing.window == 0 {
            return Err(invalid("smoothing.window", "must hold at least one sample"));
        }
        unit_open("smoothing.decay", self.smoothing.decay)?;
        positive("zone.offset", self.zone.offset)?;
        if self.turn.left_trigger >= self.turn.right_trigger {
            return Err(invalid("turn.left_trigger", "must be below right_trigger"));
        }
        non_negative("landmarks.min_visibility", self.landmarks.min_visibility)?;
        non_negative("gait.stop_timeout_secs", self.gait.stop_timeout_secs)?;
        non_negative("bounce.threshold", self.bounce.threshold)?;
        non_negative("bounce.cooldown_secs", self.bounce.cooldown_secs)?;
        positive("swing.threshold", self.swing.threshold)?;
        non_negative("swing.min_velocity", self.swing.min_velocity)?;
        non_negative("swing.min_step_interval_secs", self.swing.min_step_interval_secs)?;
        positive("swing.neutral_epsilon", self.swing.neutral_epsilon)?;
        non_negative("swing.hip_rise_threshold", self.swing.hip_rise_threshold)?;
        positive("momentum.increment", self.momentum.increment)?;
        unit_open("momentum.decay", self.momentum.decay)?;
        unit_open("momentum.activation", self.momentum.activation)?;
        positive("lock.position_tolerance", self.lock.position_tolerance)?;
        if self.lock.position_tolerance <= self.zone.offset {
            return Err(invalid("lock.position_tolerance", "must exceed zone.offset"));
        }
        positive("lock.scale_tolerance", self.lock.scale_tolerance)?;
        non_negative("lock.grace_secs", self.lock.grace_secs)?;
        non_negative("source.retry_delay_secs", self.source.retry_delay_secs)?;
        if self.server.channel_capacity == 0 {
            return Err(invalid("server.channel_capacity", "must be at least 1"));
        }
        Ok(())
    }
}
