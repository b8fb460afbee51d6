pub mod calibration;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pose;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod tracker;
