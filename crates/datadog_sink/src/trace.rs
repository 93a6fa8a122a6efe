//! Grouping flushed spans into per-trace arrays for `/v0.3/traces`.

use std::collections::HashMap;

use crate::span::{Span, WireSpan, RESOURCE_TAG, SPAN_ERROR_CODE, SPAN_TYPE, UNKNOWN};

/// Start timestamps below this are reported as `tooEarly`.
const TOO_EARLY: i64 = 1497;
/// Start timestamps above this are reported as `tooLate`.
const TOO_LATE: i64 = 1_497_629_343_000_000;

/// Spans of one flush, keyed by trace id.
///
/// Iteration order over traces is unspecified; spans inside a trace keep the
/// order they were grouped in.
#[derive(Debug, Default)]
pub struct TraceGroups {
    traces: HashMap<i64, Vec<WireSpan>>,
    /// Flushed span count per service
    services: HashMap<String, u64>,
    /// Spans whose end preceded their start
    negative_durations: usize,
}

impl TraceGroups {
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn span_count(&self) -> usize {
        self.traces.values().map(Vec::len).sum()
    }

    pub fn get(&self, trace_id: i64) -> Option<&[WireSpan]> {
        self.traces.get(&trace_id).map(Vec::as_slice)
    }

    pub fn trace_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.traces.keys().copied()
    }

    pub fn services(&self) -> &HashMap<String, u64> {
        &self.services
    }

    pub fn negative_durations(&self) -> usize {
        self.negative_durations
    }

    /// Two-dimensional payload: one inner array per trace.
    pub fn into_payload(self) -> Vec<Vec<WireSpan>> {
        self.traces.into_values().collect()
    }
}

/// Converts spans to wire form and groups them by trace id.
///
/// `common_tags` overwrite span tags of the same name. The `resource` tag is
/// lifted out of the metadata. Parent ids `<= 0` become 0, and a negative
/// duration is clamped to 0.
pub fn group_traces(spans: Vec<Span>, common_tags: &HashMap<String, String>) -> TraceGroups {
    let mut groups = TraceGroups::default();

    for span in spans {
        let mut meta = span.tags;
        for (k, v) in common_tags {
            meta.insert(k.clone(), v.clone());
        }

        let resource = meta
            .remove(RESOURCE_TAG)
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string());

        let name = if span.name.is_empty() {
            UNKNOWN.to_string()
        } else {
            span.name
        };

        let mut duration = span.end_timestamp - span.start_timestamp;
        if duration < 0 {
            groups.negative_durations += 1;
            duration = 0;
        }

        *groups.services.entry(span.service.clone()).or_default() += 1;

        let wire = WireSpan {
            duration,
            error: if span.error { SPAN_ERROR_CODE } else { 0 },
            meta,
            metrics: Default::default(),
            name,
            parent_id: span.parent_id.max(0),
            resource,
            service: span.service,
            span_id: span.id,
            start: span.start_timestamp,
            trace_id: span.trace_id,
            span_type: SPAN_TYPE,
        };
        groups.traces.entry(span.trace_id).or_default().push(wire);
    }

    groups
}

/// Which bound a span's start timestamp violates, if any.
pub fn timestamp_error(span: &Span) -> Option<&'static str> {
    if span.start_timestamp < TOO_EARLY {
        Some("tooEarly")
    } else if span.start_timestamp > TOO_LATE {
        Some("tooLate")
    } else {
        None
    }
}
