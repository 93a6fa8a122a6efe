//! Events and service checks forwarded alongside metrics.

use serde::{Deserialize, Serialize};

/// An event as accepted by the `/intake` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "msg_title")]
    pub title: String,
    #[serde(rename = "msg_text")]
    pub text: String,
    /// Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(rename = "host", default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(rename = "aggregation_key", default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(rename = "source_type_name", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "alert_type", default, skip_serializing_if = "Option::is_none")]
    pub alert_level: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Service check status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
}

/// A service check as accepted by `/api/v1/check_run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCheck {
    #[serde(rename = "check")]
    pub name: String,
    pub status: i32,
    #[serde(rename = "host_name", default)]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ServiceCheck {
    pub fn new(name: impl Into<String>, status: CheckStatus) -> Self {
        Self {
            name: name.into(),
            status: status as i32,
            hostname: String::new(),
            timestamp: None,
            tags: Vec::new(),
            message: None,
        }
    }
}

/// Fills a missing hostname and appends the sink tags.
pub(crate) fn apply_defaults(
    hostname: &mut String,
    tags: &mut Vec<String>,
    default_host: &str,
    sink_tags: &[String],
) {
    if hostname.is_empty() {
        *hostname = default_host.to_string();
    }
    tags.extend_from_slice(sink_tags);
}
