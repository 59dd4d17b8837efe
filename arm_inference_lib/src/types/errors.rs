use std::time::Duration;
use thiserror::Error;

use crate::types::performance_types::PerformanceSummary;

/// Invalid inputs detected before any motion or network I/O begins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("actuator sets differ (only in start: {only_in_start:?}, only in goal: {only_in_goal:?})")]
    ActuatorSetMismatch {
        only_in_start: Vec<String>,
        only_in_goal: Vec<String>,
    },
    #[error("step count must be at least 1, got {0}")]
    InvalidStepCount(u32),
    #[error("frame rate must be at least 1 fps, got {0}")]
    InvalidFrameRate(u32),
    #[error("inference duration must be at least 1 s, got {0}")]
    InvalidDuration(u32),
    #[error("no calibration range for actuator '{0}'")]
    MissingCalibration(String),
    #[error("calibration range for '{name}' is empty ({range_min}..{range_max})")]
    InvalidCalibration {
        name: String,
        range_min: i32,
        range_max: i32,
    },
    #[error("invalid arm configuration: {0}")]
    InvalidArmConfig(String),
}

/// Failures while opening a session to the inference endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("invalid endpoint '{0}': expected a ws:// or wss:// URI")]
    InvalidEndpoint(String),
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    #[error("timed out after {0:?} establishing session")]
    Timeout(Duration),
    #[error("protocol violation during handshake: {0}")]
    Protocol(String),
}

/// Per-call inference failures. Every variant is recoverable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("no action within {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("service rejected request: {0}")]
    Rejected(String),
}

/// Actuator bus failures. Never recovered inside the control loop.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("actuator gateway is not connected")]
    NotConnected,
    #[error("actuator gateway is already connected")]
    AlreadyConnected,
    #[error("connection to actuator bus lost: {0}")]
    ConnectionLost(String),
    #[error("unknown actuator '{0}'")]
    UnknownActuator(String),
    #[error("actuator bus I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal outcome of a control loop that did not drain cleanly.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("control loop cannot start: {0}")]
    NotReady(String),
    #[error("actuator gateway failed at step {step}")]
    Gateway {
        step: u64,
        summary: Box<PerformanceSummary>,
        #[source]
        source: GatewayError,
    },
}

#[derive(Debug, Error)]
pub enum HomingError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
