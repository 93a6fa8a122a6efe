use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use crate::chunk::dispatch_chunks;
use crate::config::MetricSinkConfig;
use crate::error::{DeliveryError, SinkError};
use crate::event::{apply_defaults, Event, ServiceCheck};
use crate::metric::{MetricFilter, MetricFinalizer, MetricSample, RouteBySinkName, WireMetric};
use crate::sink::{FlushOutcome, FlushSummary, MetricSink, StartedClient, SINK_NAME};
use crate::stats::{SelfSample, SinkMetrics, StatsClient, METRICS_FLUSHED, METRIC_FLUSH_DURATION};
use crate::transport::{Method, PostOptions, PostRequest, Transport};

const SERIES_OPTIONS: PostOptions = PostOptions {
    action: "flush",
    compress: true,
    discard_body: true,
};

const EVENTS_OPTIONS: PostOptions = PostOptions {
    action: "flush_events",
    compress: true,
    discard_body: true,
};

// The check_run endpoint rejects deflate bodies.
const CHECKS_OPTIONS: PostOptions = PostOptions {
    action: "flush_checks",
    compress: false,
    discard_body: true,
};

#[derive(Serialize)]
struct SeriesBody<'a> {
    series: &'a [WireMetric],
}

#[derive(Serialize)]
struct EventsBody<'a> {
    events: ApiEvents<'a>,
}

#[derive(Serialize)]
struct ApiEvents<'a> {
    api: &'a [Event],
}

/// Metric sink posting to the Datadog series API.
///
/// Each flush finalizes the samples, splits them into chunks of at most
/// `flush_max_per_body` metrics and posts every chunk concurrently.
pub struct DatadogMetricSink<T: Transport> {
    config: MetricSinkConfig,
    transport: Arc<T>,
    filter: Arc<dyn MetricFilter>,
    stats: StartedClient,
    metrics: Arc<SinkMetrics>,
}

impl<T: Transport> DatadogMetricSink<T> {
    pub fn new(config: MetricSinkConfig, transport: Arc<T>) -> Self {
        Self {
            config,
            transport,
            filter: Arc::new(RouteBySinkName),
            stats: StartedClient::default(),
            metrics: Arc::new(SinkMetrics::default()),
        }
    }

    /// Replaces the default routing predicate.
    pub fn with_filter(mut self, filter: Arc<dyn MetricFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn config(&self) -> &MetricSinkConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Converts samples to series records without sending them.
    pub fn finalize(&self, samples: &[MetricSample]) -> Vec<WireMetric> {
        MetricFinalizer {
            sink_name: SINK_NAME,
            tags: &self.config.tags,
            hostname: &self.config.hostname,
            interval: self.config.interval,
            filter: self.filter.as_ref(),
        }
        .finalize(samples)
    }

    async fn flush_metrics(
        &self,
        stats: &dyn StatsClient,
        samples: Vec<MetricSample>,
    ) -> FlushOutcome {
        let metrics = self.finalize(&samples);
        if metrics.is_empty() {
            info!("No metrics to flush to Datadog, skipping.");
            self.metrics.record_flush(0, 0);
            return FlushOutcome::Empty;
        }

        let count = metrics.len();
        let flush_start = Instant::now();
        let transport = Arc::clone(&self.transport);
        let url = self.config.series_url();

        let dispatch = dispatch_chunks(metrics, self.config.flush_max_per_body, move |chunk| {
            let transport = Arc::clone(&transport);
            let url = url.clone();
            async move {
                let body = SeriesBody { series: &chunk };
                let request = PostRequest::json(Method::Post, url, &body, SERIES_OPTIONS)?;
                transport.send(request).await
            }
        })
        .await;

        let tags = SelfSample::tags([("sink", SINK_NAME)]);
        stats.report(vec![
            SelfSample::timing(METRIC_FLUSH_DURATION, flush_start.elapsed(), tags.clone()),
            SelfSample::count(METRICS_FLUSHED, count as f64, tags),
        ]);
        self.metrics.record_flush(count, dispatch.failed);
        info!(
            metrics = count,
            chunks = dispatch.chunks,
            failed = dispatch.failed,
            "Completed flush to Datadog"
        );

        FlushOutcome::Flushed(FlushSummary {
            records: count,
            requests: dispatch.chunks,
            failed_requests: dispatch.failed,
        })
    }

    /// Sends events and service checks.
    ///
    /// Missing hostnames are filled with the sink hostname and sink tags are
    /// appended. Events and checks are delivered independently.
    pub async fn flush_events_checks(
        &self,
        mut events: Vec<Event>,
        mut checks: Vec<ServiceCheck>,
    ) -> Result<FlushOutcome, SinkError> {
        self.stats.get()?;
        for event in &mut events {
            apply_defaults(
                &mut event.hostname,
                &mut event.tags,
                &self.config.hostname,
                &self.config.tags,
            );
        }
        for check in &mut checks {
            apply_defaults(
                &mut check.hostname,
                &mut check.tags,
                &self.config.hostname,
                &self.config.tags,
            );
        }

        let mut summary = FlushSummary::default();

        if !events.is_empty() {
            let body = EventsBody {
                events: ApiEvents { api: &events },
            };
            let result = self.post(self.config.events_url(), &body, EVENTS_OPTIONS).await;
            summary.requests += 1;
            summary.records += events.len();
            match result {
                Ok(()) => info!(events = events.len(), "Completed flushing events to Datadog"),
                Err(e) => {
                    summary.failed_requests += 1;
                    warn!(events = events.len(), error = %e, "Error flushing events to Datadog");
                }
            }
        }

        if !checks.is_empty() {
            let result = self.post(self.config.checks_url(), &checks, CHECKS_OPTIONS).await;
            summary.requests += 1;
            summary.records += checks.len();
            match result {
                Ok(()) => info!(
                    checks = checks.len(),
                    "Completed flushing service checks to Datadog"
                ),
                Err(e) => {
                    summary.failed_requests += 1;
                    warn!(checks = checks.len(), error = %e, "Error flushing checks to Datadog");
                }
            }
        }

        if summary.requests == 0 {
            return Ok(FlushOutcome::Empty);
        }
        Ok(FlushOutcome::Flushed(summary))
    }

    async fn post<P: Serialize + ?Sized>(
        &self,
        url: String,
        payload: &P,
        options: PostOptions,
    ) -> Result<(), DeliveryError> {
        let request = PostRequest::json(Method::Post, url, payload, options)?;
        self.transport.send(request).await
    }
}

impl<T: Transport> MetricSink for DatadogMetricSink<T> {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn start(&self, client: Arc<dyn StatsClient>) -> Result<(), SinkError> {
        self.stats.set(client)
    }

    async fn flush(&self, samples: Vec<MetricSample>) -> Result<FlushOutcome, SinkError> {
        let stats = Arc::clone(self.stats.get()?);
        Ok(self
            .flush_metrics(stats.as_ref(), samples)
            .instrument(info_span!("flush_metrics", sink = SINK_NAME))
            .await)
    }
}
