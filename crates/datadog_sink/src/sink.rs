//! Lifecycle contracts the flush scheduler drives.
//!
//! Both sinks go `Created → Started → {Flushing}*`. `start` wires in the
//! shared [`StatsClient`] exactly once; `flush` is called periodically by an
//! external scheduler and is always safe on an empty buffer. Only `ingest`
//! may run concurrently with itself and with `flush`.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use crate::error::SinkError;
use crate::metric::MetricSample;
use crate::span::Span;
use crate::stats::StatsClient;

/// Name both Datadog sinks report.
pub const SINK_NAME: &str = "datadog";

/// What one flush cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered; no request was made.
    Empty,
    Flushed(FlushSummary),
}

impl FlushOutcome {
    /// Records handed to the transport, 0 for an empty flush.
    pub fn records(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Flushed(summary) => summary.records,
        }
    }
}

/// Counts for a flush that sent at least one request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    pub records: usize,
    pub requests: usize,
    /// Requests whose data was lost. The flush itself still succeeded.
    pub failed_requests: usize,
}

/// A sink for aggregated metrics.
pub trait MetricSink: Send + Sync {
    fn name(&self) -> &str;

    /// Wires in the stats client. Must be called exactly once before `flush`.
    fn start(&self, client: Arc<dyn StatsClient>) -> Result<(), SinkError>;

    /// Finalizes and delivers one interval's worth of samples.
    fn flush(
        &self,
        samples: Vec<MetricSample>,
    ) -> impl Future<Output = Result<FlushOutcome, SinkError>> + Send;
}

/// A sink for trace spans.
pub trait SpanSink: Send + Sync {
    fn name(&self) -> &str;

    /// Wires in the stats client. Must be called exactly once before
    /// `ingest` or `flush`.
    fn start(&self, client: Arc<dyn StatsClient>) -> Result<(), SinkError>;

    /// Buffers a span. Never blocks on network I/O.
    fn ingest(&self, span: Span) -> Result<(), SinkError>;

    /// Delivers everything buffered since the previous flush.
    fn flush(&self) -> impl Future<Output = Result<FlushOutcome, SinkError>> + Send;
}

/// Stats client slot filled by `start`.
#[derive(Default)]
pub(crate) struct StartedClient(OnceLock<Arc<dyn StatsClient>>);

impl StartedClient {
    pub(crate) fn set(&self, client: Arc<dyn StatsClient>) -> Result<(), SinkError> {
        self.0.set(client).map_err(|_| SinkError::AlreadyStarted)
    }

    pub(crate) fn get(&self) -> Result<&Arc<dyn StatsClient>, SinkError> {
        self.0.get().ok_or(SinkError::NotStarted)
    }
}
