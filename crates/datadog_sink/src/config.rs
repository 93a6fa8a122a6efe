//! Configuration for the metric and span sinks.
//!
//! [`MetricSinkConfig`] and [`SpanSinkConfig`] are what the sinks consume.
//! [`SinkConfig`] is the on-disk YAML shape shared with the host process and
//! projects into the two sink configs.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default number of spans the span ring holds between flushes.
pub const DEFAULT_SPAN_BUFFER_SIZE: usize = 1 << 14;

/// Default upper bound on metrics per `/api/v1/series` request.
pub const DEFAULT_FLUSH_MAX_PER_BODY: usize = 25_000;

/// Default flush interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for [`DatadogMetricSink`](crate::DatadogMetricSink).
#[derive(Debug, Clone)]
pub struct MetricSinkConfig {
    /// Base URL of the Datadog API, e.g. `https://app.datadoghq.com`.
    pub api_hostname: String,
    /// API key appended to every request as `api_key=`.
    pub api_key: String,
    /// Hostname reported for metrics without a `host:` tag.
    pub hostname: String,
    /// Tags added to every metric, event and check.
    pub tags: Vec<String>,
    /// Flush period. Counters are divided by this to become rates.
    ///
    /// Default: 10s
    pub interval: Duration,
    /// Maximum number of metrics in a single series request.
    ///
    /// Default: 25000
    pub flush_max_per_body: usize,
}

impl Default for MetricSinkConfig {
    fn default() -> Self {
        Self {
            api_hostname: "https://app.datadoghq.com".to_string(),
            api_key: String::new(),
            hostname: String::new(),
            tags: Vec::new(),
            interval: DEFAULT_INTERVAL,
            flush_max_per_body: DEFAULT_FLUSH_MAX_PER_BODY,
        }
    }
}

impl MetricSinkConfig {
    /// Sets the API base URL and key.
    pub fn with_api(mut self, hostname: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_hostname = hostname.into();
        self.api_key = key.into();
        self
    }

    /// Sets the default hostname.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Sets the sink-level tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the flush interval, truncated to whole seconds with a 1s floor.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Duration::from_secs(interval.as_secs().max(1));
        self
    }

    /// Sets the per-request metric limit.
    pub fn with_flush_max_per_body(mut self, max: usize) -> Self {
        self.flush_max_per_body = max;
        self
    }

    pub(crate) fn series_url(&self) -> String {
        format!("{}/api/v1/series?api_key={}", self.api_hostname, self.api_key)
    }

    pub(crate) fn events_url(&self) -> String {
        format!("{}/intake?api_key={}", self.api_hostname, self.api_key)
    }

    pub(crate) fn checks_url(&self) -> String {
        format!("{}/api/v1/check_run?api_key={}", self.api_hostname, self.api_key)
    }
}

/// Configuration for [`DatadogSpanSink`](crate::DatadogSpanSink).
#[derive(Debug, Clone)]
pub struct SpanSinkConfig {
    /// Base URL of the trace agent, e.g. `http://localhost:8126`.
    pub trace_address: String,
    /// Ring capacity. Zero selects [`DEFAULT_SPAN_BUFFER_SIZE`].
    pub buffer_size: usize,
    /// Tags forced onto every span, overriding span-level values.
    pub common_tags: HashMap<String, String>,
}

impl Default for SpanSinkConfig {
    fn default() -> Self {
        Self {
            trace_address: "http://localhost:8126".to_string(),
            buffer_size: DEFAULT_SPAN_BUFFER_SIZE,
            common_tags: HashMap::new(),
        }
    }
}

impl SpanSinkConfig {
    /// Sets the trace agent address.
    pub fn with_trace_address(mut self, address: impl Into<String>) -> Self {
        self.trace_address = address.into();
        self
    }

    /// Sets the ring capacity.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the common tags.
    pub fn with_common_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.common_tags = tags;
        self
    }

    /// Capacity actually used for the ring.
    pub fn effective_buffer_size(&self) -> usize {
        if self.buffer_size == 0 {
            DEFAULT_SPAN_BUFFER_SIZE
        } else {
            self.buffer_size
        }
    }

    pub(crate) fn traces_url(&self) -> String {
        format!("{}/v0.3/traces", self.trace_address)
    }
}

/// Sink section of the host process configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Datadog API base URL.
    #[serde(default)]
    pub datadog_api_hostname: String,

    /// Datadog API key.
    #[serde(default)]
    pub datadog_api_key: String,

    /// Trace agent base URL.
    #[serde(default)]
    pub datadog_trace_api_address: String,

    /// Hostname reported with metrics, events and checks.
    #[serde(default)]
    pub hostname: String,

    /// `key:value` tags applied to everything this process emits.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Flush interval. Default: 10s.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Maximum metrics per series request. Default: 25000.
    #[serde(default = "default_flush_max_per_body")]
    pub flush_max_per_body: usize,

    /// Span ring capacity. 0 selects the default (16384).
    #[serde(default)]
    pub ssf_buffer_size: usize,
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_flush_max_per_body() -> usize {
    DEFAULT_FLUSH_MAX_PER_BODY
}

impl SinkConfig {
    /// Reads, parses and validates a YAML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&data)
    }

    /// Parses and validates YAML config text.
    pub fn from_yaml_str(data: &str) -> Result<Self, ConfigError> {
        let cfg: SinkConfig = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datadog_api_hostname.is_empty() {
            return Err(ConfigError::Invalid("datadog_api_hostname is required".into()));
        }
        if self.datadog_api_key.is_empty() {
            return Err(ConfigError::Invalid("datadog_api_key is required".into()));
        }
        if self.interval < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(format!(
                "interval must be at least 1s, got {:?}",
                self.interval
            )));
        }
        if self.interval.subsec_nanos() != 0 {
            return Err(ConfigError::Invalid(format!(
                "interval must be a whole number of seconds, got {:?}",
                self.interval
            )));
        }
        if self.flush_max_per_body == 0 {
            return Err(ConfigError::Invalid("flush_max_per_body must be > 0".into()));
        }
        Ok(())
    }

    /// Projects the metric sink configuration.
    pub fn metric_sink_config(&self) -> MetricSinkConfig {
        MetricSinkConfig {
            api_hostname: self.datadog_api_hostname.clone(),
            api_key: self.datadog_api_key.clone(),
            hostname: self.hostname.clone(),
            tags: self.tags.clone(),
            interval: self.interval,
            flush_max_per_body: self.flush_max_per_body,
        }
    }

    /// Projects the span sink configuration.
    pub fn span_sink_config(&self) -> SpanSinkConfig {
        SpanSinkConfig {
            trace_address: self.datadog_trace_api_address.clone(),
            buffer_size: self.ssf_buffer_size,
            common_tags: parse_tag_map(&self.tags),
        }
    }
}

/// Splits `key:value` tags at the first colon. A bare key maps to "".
pub fn parse_tag_map(tags: &[String]) -> HashMap<String, String> {
    tags.iter()
        .map(|tag| match tag.split_once(':') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (tag.clone(), String::new()),
        })
        .collect()
}
