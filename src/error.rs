use std::time::Duration;

use thiserror::Error;

/// Per-frame anomalies. The pipeline absorbs these; they never abort a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameError {
    #[error("no subject detected")]
    NoSubjectDetected,
    #[error("landmark {index} missing or below visibility ({visibility:.2})")]
    InsufficientLandmarks { index: usize, visibility: f32 },
    #[error("subject lost for {since:?}")]
    SubjectLost { since: Duration },
    #[error("player off center during calibration (x = {x:.2})")]
    OffCenter { x: f32 },
}

/// Frame acquisition or pose engine failure.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("end of stream")]
    EndOfStream,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed recording line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Telemetry sink failure. Never fatal to the frame loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("no telemetry subscribers")]
    Unavailable,
    #[error("telemetry sink closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
