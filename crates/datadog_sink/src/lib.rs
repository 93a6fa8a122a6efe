//! Datadog Sink
//!
//! Buffering and flush engine that forwards a host process's aggregated
//! metrics, events, service checks and trace spans to Datadog.
//!
//! Two sinks share one lifecycle (`new → start → flush*`):
//!
//! - [`DatadogMetricSink`] finalizes each interval's samples into Datadog
//!   series points and posts them in parallel, bounded chunks.
//! - [`DatadogSpanSink`] buffers spans from many producers in a fixed-size
//!   ring that overwrites the oldest entries, then groups them by trace id and
//!   sends them to a trace agent on each flush.
//!
//! Delivery failures are logged and counted, never retried, and never fail a
//! flush. Network I/O goes through the [`Transport`] trait, so tests and demos
//! can run without a backend.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use datadog_sink::{
//!     DatadogSpanSink, HttpTransport, NullStatsClient, Span, SpanSink, SpanSinkConfig,
//! };
//!
//! # async fn run() -> Result<(), datadog_sink::SinkError> {
//! let config = SpanSinkConfig::default().with_trace_address("http://localhost:8126");
//! let sink = DatadogSpanSink::new(config, Arc::new(HttpTransport::default()));
//! sink.start(Arc::new(NullStatsClient))?;
//!
//! let span = Span::new(1, 1, 0, "api", "GET /users")
//!     .with_timestamps(1_700_000_000_000_000, 1_700_000_000_250_000);
//! sink.ingest(span)?;
//! sink.flush().await?;
//! # Ok(())
//! # }
//! ```

mod invariants;

pub mod chunk;
pub mod config;
pub mod error;
pub mod event;
pub mod metric;
pub mod metric_sink;
pub mod ring;
pub mod sink;
pub mod span;
pub mod span_sink;
pub mod stats;
pub mod trace;
pub mod transport;

// Re-export main types
pub use chunk::{dispatch_chunks, ChunkPlan, DispatchSummary};
pub use config::{
    parse_tag_map, MetricSinkConfig, SinkConfig, SpanSinkConfig, DEFAULT_FLUSH_MAX_PER_BODY,
    DEFAULT_INTERVAL, DEFAULT_SPAN_BUFFER_SIZE,
};
pub use error::{ConfigError, DeliveryError, SinkError, ValidationError};
pub use event::{CheckStatus, Event, ServiceCheck};
pub use metric::{
    MetricFilter, MetricFinalizer, MetricSample, MetricType, RouteBySinkName, WireMetric,
};
pub use metric_sink::DatadogMetricSink;
pub use ring::{SharedRing, SpanRing};
pub use sink::{FlushOutcome, FlushSummary, MetricSink, SpanSink, SINK_NAME};
pub use span::{RequiredFields, Span, SpanValidator, WireSpan};
pub use span_sink::DatadogSpanSink;
pub use stats::{
    ChannelStatsClient, NullStatsClient, SampleKind, SelfSample, SinkMetrics, StatsClient,
};
pub use trace::{group_traces, timestamp_error, TraceGroups};
pub use transport::{
    HttpTransport, Method, NullTransport, PostOptions, PostRequest, StdoutTransport, Transport,
};
