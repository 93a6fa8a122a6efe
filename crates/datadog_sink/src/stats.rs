//! Self-reported operational telemetry.
//!
//! Sinks report their own flush durations and record counts through a
//! [`StatsClient`] wired in by `start`. Reports are always sent after the span
//! ring lock has been released, and clients must not block, so reporting can
//! never stall the buffers it describes.
//!
//! [`SinkMetrics`] holds the always-on lock-free counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use tokio::sync::mpsc;

pub const METRIC_FLUSH_DURATION: &str = "sink.metric_flush_total_duration_ns";
pub const METRICS_FLUSHED: &str = "sink.metrics_flushed_total";
pub const SPAN_FLUSH_DURATION: &str = "sink.span_flush_total_duration_ns";
pub const SPANS_FLUSHED: &str = "sink.spans_flushed_total";
pub const SPANS_DROPPED: &str = "sink.spans_dropped_total";
pub const TIMESTAMP_ERROR: &str = "worker.trace.sink.timestamp_error";

/// How a [`SelfSample`] should be aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Count,
    /// Value is in nanoseconds
    Timing,
}

/// One operational data point emitted by a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SelfSample {
    pub name: &'static str,
    pub value: f64,
    pub kind: SampleKind,
    pub tags: BTreeMap<String, String>,
}

impl SelfSample {
    pub fn count(name: &'static str, value: f64, tags: BTreeMap<String, String>) -> Self {
        Self {
            name,
            value,
            kind: SampleKind::Count,
            tags,
        }
    }

    pub fn timing(name: &'static str, elapsed: Duration, tags: BTreeMap<String, String>) -> Self {
        Self {
            name,
            value: elapsed.as_nanos() as f64,
            kind: SampleKind::Timing,
            tags,
        }
    }

    /// Builds a tag map from `(key, value)` pairs.
    pub fn tags<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Outbound client for self-reported samples. Must not block.
pub trait StatsClient: Send + Sync {
    fn report(&self, samples: Vec<SelfSample>);
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatsClient;

impl StatsClient for NullStatsClient {
    fn report(&self, _samples: Vec<SelfSample>) {}
}

/// Forwards reports over a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelStatsClient {
    tx: mpsc::Sender<Vec<SelfSample>>,
}

impl ChannelStatsClient {
    /// Creates a client and the receiving end of its channel.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Vec<SelfSample>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl StatsClient for ChannelStatsClient {
    fn report(&self, samples: Vec<SelfSample>) {
        if samples.is_empty() {
            return;
        }
        if self.tx.try_send(samples).is_err() {
            tracing::trace!("stats channel full or closed, dropping report");
        }
    }
}

/// Lock-free sink counters (atomics, safe to read at any time).
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Spans accepted by `ingest` (hit by every producer)
    pub spans_ingested: CachePadded<AtomicU64>,
    /// Unflushed spans overwritten by newer ones
    pub spans_overwritten: CachePadded<AtomicU64>,
    /// Records handed to the transport
    pub records_flushed: AtomicU64,
    /// Requests that failed delivery
    pub requests_failed: AtomicU64,
    /// Completed flush cycles, including empty ones
    pub flushes: AtomicU64,
}

impl SinkMetrics {
    pub fn spans_ingested(&self) -> u64 {
        self.spans_ingested.load(Ordering::Relaxed)
    }

    pub fn spans_overwritten(&self) -> u64 {
        self.spans_overwritten.load(Ordering::Relaxed)
    }

    pub fn records_flushed(&self) -> u64 {
        self.records_flushed.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub(crate) fn record_ingest(&self, overwrote: bool) {
        self.spans_ingested.fetch_add(1, Ordering::Relaxed);
        if overwrote {
            self.spans_overwritten.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_flush(&self, records: usize, failed_requests: usize) {
        self.records_flushed.fetch_add(records as u64, Ordering::Relaxed);
        self.requests_failed
            .fetch_add(failed_requests as u64, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Test client that keeps every reported sample
#[cfg(test)]
#[derive(Default)]
pub struct RecordingStatsClient {
    samples: std::sync::Mutex<Vec<SelfSample>>,
}

#[cfg(test)]
impl RecordingStatsClient {
    pub fn samples(&self) -> Vec<SelfSample> {
        self.samples.lock().unwrap().clone()
    }

    pub fn named(&self, name: &str) -> Vec<SelfSample> {
        self.samples()
            .into_iter()
            .filter(|s| s.name == name)
            .collect()
    }
}

#[cfg(test)]
impl StatsClient for RecordingStatsClient {
    fn report(&self, samples: Vec<SelfSample>) {
        self.samples.lock().unwrap().extend(samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_is_in_nanoseconds() {
        let s = SelfSample::timing(SPAN_FLUSH_DURATION, Duration::from_millis(3), BTreeMap::new());
        assert_eq!(s.value, 3_000_000.0);
        assert_eq!(s.kind, SampleKind::Timing);
    }

    #[test]
    fn tag_helper() {
        let tags = SelfSample::tags([("sink", "datadog"), ("service", "api")]);
        assert_eq!(tags["sink"], "datadog");
        assert_eq!(tags.len(), 2);
    }

    #[tokio::test]
    async fn channel_client_drops_when_full() {
        let (client, mut rx) = ChannelStatsClient::new(1);
        let sample = SelfSample::count(METRICS_FLUSHED, 1.0, BTreeMap::new());

        client.report(vec![sample.clone()]);
        client.report(vec![sample.clone()]);
        client.report(Vec::new());

        assert_eq!(rx.recv().await, Some(vec![sample]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn metrics_counters() {
        let m = SinkMetrics::default();
        m.record_ingest(false);
        m.record_ingest(true);
        m.record_flush(10, 1);

        assert_eq!(m.spans_ingested(), 2);
        assert_eq!(m.spans_overwritten(), 1);
        assert_eq!(m.records_flushed(), 10);
        assert_eq!(m.requests_failed(), 1);
        assert_eq!(m.flushes(), 1);
    }
}
