//! # Simulator Error Types
//!
//! One error enum per concern. Configuration errors exclude a single entity,
//! routing errors fall back to straight lines, publish errors are logged by
//! the scheduler and never reach the motion or sensor code.

use fleet_domain::DomainError;
use thiserror::Error;

/// Fleet file, environment and per-entity validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read fleet file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse fleet file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid environment variable {name}: {reason}")]
    InvalidEnv { name: &'static str, reason: String },

    #[error("entity {device_id}: route needs at least {required} waypoint(s), got {actual}")]
    EmptyRoute {
        device_id: String,
        required: usize,
        actual: usize,
    },

    #[error("entity {device_id}: cruise speed must be positive, got {speed_kmh} km/h")]
    NonPositiveSpeed { device_id: String, speed_kmh: f64 },

    #[error("entity {device_id}: waypoint {index} is invalid: {source}")]
    InvalidWaypoint {
        device_id: String,
        index: usize,
        #[source]
        source: DomainError,
    },

    #[error("entity {device_id}: waypoint {index} needs [lat, lon], got {len} value(s)")]
    MalformedWaypoint {
        device_id: String,
        index: usize,
        len: usize,
    },

    #[error("entity {device_id}: {source}")]
    Entity {
        device_id: String,
        #[source]
        source: DomainError,
    },

    #[error("entity {device_id}: tick interval {secs}s is outside 1 ms to 1 day")]
    InvalidTickInterval { device_id: String, secs: f64 },

    #[error("duplicate device id: {0}")]
    DuplicateDevice(String),

    #[error("invalid engine setting {name}: {reason}")]
    InvalidTunable { name: &'static str, reason: String },
}

/// Routing collaborator errors; always recovered by straight-line fallback
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("routing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("routing service returned status {0}")]
    Status(u16),

    #[error("malformed route geometry: {0}")]
    Geometry(String),

    #[error("route has {0} point(s), need at least 2")]
    TooFewPoints(usize),
}

/// Publish collaborator errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint returned status {0}")]
    Status(u16),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publish timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("giving up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<PublishError>,
    },
}

impl From<reqwest::Error> for PublishError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl PublishError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Status(code) => *code >= 500 || *code == 429,
            Self::Serialization(_) | Self::RetriesExhausted { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(PublishError::Transport("reset".into()).is_retryable());
        assert!(PublishError::Timeout { timeout_ms: 10 }.is_retryable());
        assert!(PublishError::Status(503).is_retryable());
        assert!(PublishError::Status(429).is_retryable());
        assert!(!PublishError::Status(400).is_retryable());
    }

    #[test]
    fn test_config_error_messages_name_the_entity() {
        let err = ConfigError::NonPositiveSpeed {
            device_id: "356938035643815".into(),
            speed_kmh: 0.0,
        };
        assert!(err.to_string().contains("356938035643815"));
    }
}
