//! Error types for the Datadog sinks.

use thiserror::Error;

/// A span rejected at ingest because a required field is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("span has no trace id")]
    MissingTraceId,
    #[error("span has no span id")]
    MissingSpanId,
    #[error("span has no start timestamp")]
    MissingStartTimestamp,
    #[error("span has no end timestamp")]
    MissingEndTimestamp,
}

/// Failure to deliver one request to the backend.
///
/// Delivery errors are logged and counted by the sinks; the data in the
/// failed request is discarded.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Payload could not be encoded as JSON
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Transport-layer error (connect, timeout, TLS)
    #[error("transport error: {0}")]
    Transport(String),
    /// Body compression failed
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
    /// Backend answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    /// The delivery task itself panicked or was cancelled
    #[error("delivery task failed: {0}")]
    TaskFailed(String),
}

/// Lifecycle and ingest errors surfaced to callers of a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid span: {0}")]
    Validation(#[from] ValidationError),
    /// `ingest` or `flush` was called before `start`.
    #[error("sink has not been started")]
    NotStarted,
    /// `start` was called a second time.
    #[error("sink was already started")]
    AlreadyStarted,
}

impl SinkError {
    /// Returns `true` if the error was caused by the submitted data rather
    /// than by the sink's lifecycle.
    #[inline]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Errors loading or validating sink configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_converts_into_sink_error() {
        let err: SinkError = ValidationError::MissingTraceId.into();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "invalid span: span has no trace id");
        assert!(!SinkError::NotStarted.is_validation());
    }

    #[test]
    fn status_error_mentions_code_and_body() {
        let err = DeliveryError::Status {
            status: 403,
            body: "forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "unexpected status 403: forbidden");
    }
}
