//! Metric samples and their conversion to Datadog series records.
//!
//! Finalization is a pure transform with no shared state: it can run on any
//! worker and never touches the span ring.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

/// Tag prefix that overrides the reported host.
const HOST_TAG_PREFIX: &str = "host:";
/// Tag prefix that overrides the reported device.
const DEVICE_TAG_PREFIX: &str = "device:";

/// Kind of an aggregated metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    /// Service-check status. Not representable as a series point.
    Status,
}

/// An aggregated metric sample as produced by the aggregation stage.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    /// Unix seconds
    pub timestamp: i64,
    pub metric_type: MetricType,
    /// `key:value` tags in producer order
    pub tags: Vec<String>,
    /// Sinks this sample is routed to. `None` routes to every sink.
    pub sinks: Option<HashSet<String>>,
}

impl MetricSample {
    /// Creates a sample routed to every sink.
    pub fn new(
        name: impl Into<String>,
        value: f64,
        timestamp: i64,
        metric_type: MetricType,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
            metric_type,
            tags: Vec::new(),
            sinks: None,
        }
    }

    /// Sets the tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts routing to the named sinks.
    pub fn routed_to<I, S>(mut self, sinks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sinks = Some(sinks.into_iter().map(Into::into).collect());
        self
    }
}

/// A metric in the shape `/api/v1/series` accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMetric {
    #[serde(rename = "metric")]
    pub name: String,
    /// A single `[timestamp, value]` point
    pub points: [[f64; 2]; 1],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub metric_type: &'static str,
    #[serde(rename = "host", skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(rename = "device_name", skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Only set for `rate` metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<i32>,
}

impl WireMetric {
    pub fn timestamp(&self) -> f64 {
        self.points[0][0]
    }

    pub fn value(&self) -> f64 {
        self.points[0][1]
    }
}

/// Sink-level predicate deciding whether a sample is delivered at all.
pub trait MetricFilter: Send + Sync {
    fn is_acceptable(&self, sample: &MetricSample, sink_name: &str) -> bool;
}

/// Accepts unrouted samples and samples whose routing names this sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouteBySinkName;

impl MetricFilter for RouteBySinkName {
    fn is_acceptable(&self, sample: &MetricSample, sink_name: &str) -> bool {
        sample
            .sinks
            .as_ref()
            .map_or(true, |sinks| sinks.contains(sink_name))
    }
}

impl<F> MetricFilter for F
where
    F: Fn(&MetricSample, &str) -> bool + Send + Sync,
{
    fn is_acceptable(&self, sample: &MetricSample, sink_name: &str) -> bool {
        self(sample, sink_name)
    }
}

/// Converts aggregated samples into series records for one sink.
pub struct MetricFinalizer<'a> {
    pub sink_name: &'a str,
    pub tags: &'a [String],
    pub hostname: &'a str,
    pub interval: Duration,
    pub filter: &'a dyn MetricFilter,
}

impl MetricFinalizer<'_> {
    /// Finalizes `samples`, skipping rejected and unsupported ones.
    pub fn finalize(&self, samples: &[MetricSample]) -> Vec<WireMetric> {
        // Rates and the wire interval use the same whole-second divisor.
        let interval_secs = self.interval.as_secs().max(1);
        let mut out = Vec::with_capacity(samples.len());

        for sample in samples {
            if !self.filter.is_acceptable(sample, self.sink_name) {
                continue;
            }

            let (metric_type, value, interval) = match sample.metric_type {
                MetricType::Counter => (
                    "rate",
                    sample.value / interval_secs as f64,
                    Some(interval_secs as i32),
                ),
                MetricType::Gauge => ("gauge", sample.value, None),
                other => {
                    warn!(
                        metric_type = ?other,
                        metric = %sample.name,
                        "Encountered an unknown metric type"
                    );
                    continue;
                }
            };

            // Owned copy: the per-record tag list is extended below.
            let mut tags = self.tags.to_vec();
            let mut hostname = None;
            let mut device_name = None;
            for tag in &sample.tags {
                // An empty suffix is no override, but the tag is still consumed.
                if let Some(host) = tag.strip_prefix(HOST_TAG_PREFIX) {
                    hostname = non_empty(host);
                } else if let Some(device) = tag.strip_prefix(DEVICE_TAG_PREFIX) {
                    device_name = non_empty(device);
                } else {
                    tags.push(tag.clone());
                }
            }

            out.push(WireMetric {
                name: sample.name.clone(),
                points: [[sample.timestamp as f64, value]],
                tags,
                metric_type,
                hostname: hostname.or_else(|| non_empty(self.hostname)),
                device_name,
                interval,
            });
        }

        out
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
