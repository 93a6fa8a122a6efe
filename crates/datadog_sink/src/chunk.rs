//! Splitting a record batch into size-bounded chunks and delivering them
//! concurrently.
//!
//! The backend caps how many records a single request may carry. A batch of
//! `N` records is split into `workers = ⌈N / max⌉` chunks of
//! `chunk_size = ⌈N / workers⌉` (the last chunk takes the remainder), and
//! every chunk is delivered by its own task. The dispatcher joins on all of
//! them; a failed chunk never cancels or affects its siblings.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::DeliveryError;
use crate::invariants::debug_assert_chunks_cover;

/// How a batch of `total` records is cut into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total: usize,
    pub workers: usize,
    pub chunk_size: usize,
}

impl ChunkPlan {
    /// Plans chunks of at most `max_per_chunk` records. A zero limit is
    /// treated as 1.
    pub fn new(total: usize, max_per_chunk: usize) -> Self {
        let max = max_per_chunk.max(1);
        let plan = if total == 0 {
            Self {
                total,
                workers: 0,
                chunk_size: 0,
            }
        } else {
            let workers = total.div_ceil(max);
            Self {
                total,
                workers,
                chunk_size: total.div_ceil(workers),
            }
        };
        debug_assert_chunks_cover!(plan, total, max);
        plan
    }

    /// Size of each chunk, in order.
    pub fn sizes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.workers).map(move |i| {
            if i + 1 < self.workers {
                self.chunk_size
            } else {
                self.total - self.chunk_size * (self.workers - 1)
            }
        })
    }

    /// Splits `records` into owned chunks following this plan.
    pub fn split<T>(&self, mut records: Vec<T>) -> Vec<Vec<T>> {
        debug_assert_eq!(records.len(), self.total);
        let mut chunks = Vec::with_capacity(self.workers);
        for i in 0..self.workers {
            if i + 1 < self.workers {
                let rest = records.split_off(self.chunk_size);
                chunks.push(std::mem::replace(&mut records, rest));
            } else {
                chunks.push(std::mem::take(&mut records));
            }
        }
        chunks
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Chunks handed to delivery tasks
    pub chunks: usize,
    /// Chunks whose delivery failed
    pub failed: usize,
    /// Records in failed chunks
    pub records_lost: usize,
}

/// Delivers `records` in chunks of at most `max_per_chunk`, one task per
/// chunk, and waits for every task to finish.
///
/// Failures are logged with the chunk's item count and counted in the
/// returned summary; they are never retried.
pub async fn dispatch_chunks<T, F, Fut>(
    records: Vec<T>,
    max_per_chunk: usize,
    deliver: F,
) -> DispatchSummary
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), DeliveryError>> + Send + 'static,
{
    let plan = ChunkPlan::new(records.len(), max_per_chunk);
    debug!(workers = plan.workers, "Worker count chosen");
    debug!(chunk_size = plan.chunk_size, "Chunk size chosen");

    let mut tasks: JoinSet<(usize, Result<(), DeliveryError>)> = JoinSet::new();
    for chunk in plan.split(records) {
        let count = chunk.len();
        let delivery = deliver(chunk);
        tasks.spawn(async move { (count, delivery.await) });
    }

    let mut summary = DispatchSummary {
        chunks: plan.workers,
        ..DispatchSummary::default()
    };
    while let Some(joined) = tasks.join_next().await {
        let (count, err) = match joined {
            Ok((_, Ok(()))) => continue,
            Ok((count, Err(e))) => (Some(count), e),
            Err(e) => (None, DeliveryError::TaskFailed(e.to_string())),
        };
        summary.failed += 1;
        summary.records_lost += count.unwrap_or(0);
        warn!(items = ?count, error = %err, "Error delivering chunk");
    }
    summary
}
