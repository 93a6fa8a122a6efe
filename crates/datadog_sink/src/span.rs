use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::ValidationError;

/// Tag key carrying the span's resource.
pub const RESOURCE_TAG: &str = "resource";

/// Default for an empty span name or absent resource.
pub const UNKNOWN: &str = "unknown";

/// Type discriminator sent with every span.
pub const SPAN_TYPE: &str = "web";

/// Error code sent for spans flagged as errors.
pub const SPAN_ERROR_CODE: i64 = 2;

/// A finished span as received from instrumented services
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: i64,
    pub id: i64,
    /// Parent span id (<= 0 if root span)
    pub parent_id: i64,
    pub service: String,
    pub name: String,
    /// Start time (Unix microseconds)
    pub start_timestamp: i64,
    /// End time (Unix microseconds)
    pub end_timestamp: i64,
    pub error: bool,
    /// Span tags. The `resource` key is reserved.
    pub tags: HashMap<String, String>,
}

impl Span {
    /// Creates a span with the given identifiers and no tags
    pub fn new(
        trace_id: i64,
        id: i64,
        parent_id: i64,
        service: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id,
            id,
            parent_id,
            service: service.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets start and end timestamps (microseconds)
    pub fn with_timestamps(mut self, start: i64, end: i64) -> Self {
        self.start_timestamp = start;
        self.end_timestamp = end;
        self
    }

    /// Adds a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Marks the span as failed
    pub fn with_error(mut self, error: bool) -> Self {
        self.error = error;
        self
    }

    /// Duration in microseconds. May be negative for malformed spans.
    pub fn duration_micros(&self) -> i64 {
        self.end_timestamp - self.start_timestamp
    }
}

/// A span in the shape the `/v0.3/traces` endpoint accepts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireSpan {
    pub duration: i64,
    pub error: i64,
    pub meta: HashMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub name: String,
    /// 0 for root spans, omitted on the wire
    #[serde(skip_serializing_if = "is_zero")]
    pub parent_id: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource: String,
    pub service: String,
    pub span_id: i64,
    pub start: i64,
    pub trace_id: i64,
    #[serde(rename = "type")]
    pub span_type: &'static str,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Checks a span before it is accepted into the ring
pub trait SpanValidator: Send + Sync {
    fn validate(&self, span: &Span) -> Result<(), ValidationError>;
}

/// Rejects spans missing ids or timestamps
#[derive(Debug, Default, Clone, Copy)]
pub struct RequiredFields;

impl SpanValidator for RequiredFields {
    fn validate(&self, span: &Span) -> Result<(), ValidationError> {
        if span.trace_id == 0 {
            return Err(ValidationError::MissingTraceId);
        }
        if span.id == 0 {
            return Err(ValidationError::MissingSpanId);
        }
        if span.start_timestamp == 0 {
            return Err(ValidationError::MissingStartTimestamp);
        }
        if span.end_timestamp == 0 {
            return Err(ValidationError::MissingEndTimestamp);
        }
        Ok(())
    }
}
