use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::SpanSinkConfig;
use crate::error::SinkError;
use crate::ring::SharedRing;
use crate::sink::{FlushOutcome, FlushSummary, SpanSink, StartedClient, SINK_NAME};
use crate::span::{RequiredFields, Span, SpanValidator};
use crate::stats::{
    SelfSample, SinkMetrics, StatsClient, SPANS_DROPPED, SPANS_FLUSHED, SPAN_FLUSH_DURATION,
    TIMESTAMP_ERROR,
};
use crate::trace::{group_traces, timestamp_error};
use crate::transport::{Method, PostOptions, PostRequest, Transport};

// The trace endpoint does not support deflate bodies.
const TRACES_OPTIONS: PostOptions = PostOptions {
    action: "flush_traces",
    compress: false,
    discard_body: true,
};

/// Span sink buffering spans in a ring and sending them to a trace agent.
///
/// Producers call [`ingest`](SpanSink::ingest) concurrently; each call holds
/// the ring lock only for a slot write. When more spans arrive than the ring
/// holds, the oldest unflushed spans are silently overwritten. A flush swaps
/// the ring out under the lock, then groups and delivers without it.
pub struct DatadogSpanSink<T: Transport> {
    config: SpanSinkConfig,
    transport: Arc<T>,
    validator: Box<dyn SpanValidator>,
    ring: SharedRing,
    stats: StartedClient,
    metrics: Arc<SinkMetrics>,
    /// Overwritten since the last flush
    dropped: AtomicU64,
}

impl<T: Transport> DatadogSpanSink<T> {
    pub fn new(config: SpanSinkConfig, transport: Arc<T>) -> Self {
        let ring = SharedRing::new(config.effective_buffer_size());
        Self {
            config,
            transport,
            validator: Box::new(RequiredFields),
            ring,
            stats: StartedClient::default(),
            metrics: Arc::new(SinkMetrics::default()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Replaces the default span validator.
    pub fn with_validator(mut self, validator: Box<dyn SpanValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &SpanSinkConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Spans currently buffered.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    async fn flush_spans(&self, stats: &dyn StatsClient) -> FlushOutcome {
        let flush_start = Instant::now();
        // Only the swap happens under the lock.
        let spans = self.ring.drain_and_reset().into_spans();

        let mut samples = Vec::new();
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            samples.push(SelfSample::count(
                SPANS_DROPPED,
                dropped as f64,
                SelfSample::tags([("sink", SINK_NAME)]),
            ));
        }

        let mut timestamp_errors: BTreeMap<&'static str, u64> = BTreeMap::new();
        for span in &spans {
            if let Some(kind) = timestamp_error(span) {
                *timestamp_errors.entry(kind).or_default() += 1;
            }
        }
        for (kind, count) in timestamp_errors {
            samples.push(SelfSample::count(
                TIMESTAMP_ERROR,
                count as f64,
                SelfSample::tags([("sink", SINK_NAME), ("type", kind)]),
            ));
        }

        let groups = group_traces(spans, &self.config.common_tags);
        if groups.is_empty() {
            info!("No traces to flush to Datadog, skipping.");
            stats.report(samples);
            self.metrics.record_flush(0, 0);
            return FlushOutcome::Empty;
        }

        if groups.negative_durations() > 0 {
            debug!(spans = groups.negative_durations(), "Clamped negative span durations to zero");
        }

        let span_count = groups.span_count();
        let trace_count = groups.len();
        let services = groups.services().clone();
        let payload = groups.into_payload();

        let result = match PostRequest::json(
            Method::Put,
            self.config.traces_url(),
            &payload,
            TRACES_OPTIONS,
        ) {
            Ok(request) => self.transport.send(request).await,
            Err(e) => Err(e),
        };
        let failed = match result {
            Ok(()) => {
                info!(
                    traces = trace_count,
                    spans = span_count,
                    "Completed flushing traces to Datadog"
                );
                0
            }
            Err(e) => {
                warn!(traces = trace_count, error = %e, "Error flushing traces to Datadog");
                1
            }
        };

        for (service, count) in &services {
            samples.push(SelfSample::count(
                SPANS_FLUSHED,
                *count as f64,
                SelfSample::tags([("sink", SINK_NAME), ("service", service.as_str())]),
            ));
        }
        samples.push(SelfSample::timing(
            SPAN_FLUSH_DURATION,
            flush_start.elapsed(),
            SelfSample::tags([("sink", SINK_NAME)]),
        ));
        stats.report(samples);
        self.metrics.record_flush(span_count, failed);

        FlushOutcome::Flushed(FlushSummary {
            records: span_count,
            requests: 1,
            failed_requests: failed,
        })
    }
}

impl<T: Transport> SpanSink for DatadogSpanSink<T> {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn start(&self, client: Arc<dyn StatsClient>) -> Result<(), SinkError> {
        self.stats.set(client)
    }

    fn ingest(&self, span: Span) -> Result<(), SinkError> {
        self.stats.get()?;
        self.validator.validate(&span)?;

        let overwrote = self.ring.push(span);
        if overwrote {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.metrics.record_ingest(overwrote);
        Ok(())
    }

    async fn flush(&self) -> Result<FlushOutcome, SinkError> {
        let stats = Arc::clone(self.stats.get()?);
        Ok(self
            .flush_spans(stats.as_ref())
            .instrument(info_span!("flush_traces", sink = SINK_NAME))
            .await)
    }
}
