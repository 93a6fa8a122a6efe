use datadog_sink::{
    CheckStatus, DatadogMetricSink, DatadogSpanSink, DeliveryError, Event, FlushOutcome,
    MetricSample, MetricSink, MetricSinkConfig, MetricType, NullStatsClient, PostRequest,
    SelfSample, ServiceCheck, Span, SpanSink, SpanSinkConfig, StatsClient, Transport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const NOW_SECS: i64 = 1_700_000_000;
const NOW_MICROS: i64 = NOW_SECS * 1_000_000;

struct CapturingTransport {
    requests: Mutex<Vec<PostRequest>>,
    delay: Duration,
}

impl CapturingTransport {
    fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            delay,
        }
    }

    fn requests(&self) -> Vec<PostRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn bodies(&self, path: &str) -> Vec<serde_json::Value> {
        self.requests()
            .iter()
            .filter(|r| r.url.contains(path))
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }
}

impl Transport for CapturingTransport {
    async fn send(&self, request: PostRequest) -> Result<(), DeliveryError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.requests.lock().unwrap().push(request);
        Ok(())
    }

    fn name(&self) -> &str {
        "capturing"
    }
}

// Fails every other request
struct FlakyTransport {
    calls: AtomicUsize,
    delivered: Mutex<Vec<PostRequest>>,
}

impl Transport for FlakyTransport {
    async fn send(&self, request: PostRequest) -> Result<(), DeliveryError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
            return Err(DeliveryError::Transport("connection reset".into()));
        }
        self.delivered.lock().unwrap().push(request);
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

#[derive(Default)]
struct CountingStats {
    samples: Mutex<Vec<SelfSample>>,
}

impl CountingStats {
    fn total(&self, name: &str) -> f64 {
        self.samples
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.value)
            .sum()
    }
}

impl StatsClient for CountingStats {
    fn report(&self, samples: Vec<SelfSample>) {
        self.samples.lock().unwrap().extend(samples);
    }
}

fn metric_config() -> MetricSinkConfig {
    MetricSinkConfig::default()
        .with_api("https://app.datadoghq.com", "secret")
        .with_hostname("agent-1")
        .with_tags(vec!["region:eu".into()])
        .with_interval(Duration::from_secs(10))
}

fn span(trace_id: i64, id: i64, service: &str) -> Span {
    Span::new(trace_id, id, 0, service, "request").with_timestamps(NOW_MICROS, NOW_MICROS + 1_000)
}

#[tokio::test]
async fn test_metric_flush_end_to_end() {
    let transport = Arc::new(CapturingTransport::new());
    let sink = DatadogMetricSink::new(metric_config(), Arc::clone(&transport));
    let stats = Arc::new(CountingStats::default());
    sink.start(stats.clone()).unwrap();

    let samples = vec![
        MetricSample::new("requests", 50.0, NOW_SECS, MetricType::Counter).with_tags(["route:/a"]),
        MetricSample::new("memory", 512.0, NOW_SECS, MetricType::Gauge).with_tags(["host:db-7"]),
        MetricSample::new("elsewhere", 1.0, NOW_SECS, MetricType::Gauge).routed_to(["signalfx"]),
    ];
    let outcome = sink.flush(samples).await.unwrap();
    assert_eq!(outcome.records(), 2);

    let bodies = transport.bodies("/api/v1/series");
    assert_eq!(bodies.len(), 1);
    let series = bodies[0]["series"].as_array().unwrap();

    let rate = series.iter().find(|m| m["metric"] == "requests").unwrap();
    assert_eq!(rate["type"], "rate");
    assert_eq!(rate["points"][0][1], 5.0);
    assert_eq!(rate["interval"], 10);
    assert_eq!(rate["host"], "agent-1");

    let gauge = series.iter().find(|m| m["metric"] == "memory").unwrap();
    assert_eq!(gauge["type"], "gauge");
    assert_eq!(gauge["host"], "db-7");
    assert!(gauge.get("interval").is_none());
    assert_eq!(gauge["tags"], serde_json::json!(["region:eu"]));

    assert_eq!(stats.total("sink.metrics_flushed_total"), 2.0);
    assert_eq!(sink.metrics().records_flushed(), 2);
}

#[tokio::test]
async fn test_metric_chunks_deliver_every_record_once() {
    let transport = Arc::new(CapturingTransport::with_delay(Duration::from_millis(5)));
    let config = metric_config().with_flush_max_per_body(7);
    let sink = DatadogMetricSink::new(config, Arc::clone(&transport));
    sink.start(Arc::new(NullStatsClient)).unwrap();

    let samples: Vec<_> = (0..50)
        .map(|i| MetricSample::new(format!("m{i}"), f64::from(i), 1_700_000_000, MetricType::Gauge))
        .collect();
    let outcome = sink.flush(samples).await.unwrap();

    let FlushOutcome::Flushed(summary) = outcome else {
        panic!("expected a flushed outcome");
    };
    assert_eq!(summary.requests, 8);
    assert_eq!(summary.failed_requests, 0);

    let mut names: Vec<String> = transport
        .bodies("/api/v1/series")
        .iter()
        .flat_map(|b| b["series"].as_array().unwrap().clone())
        .map(|m| m["metric"].as_str().unwrap().to_string())
        .collect();
    assert!(transport
        .bodies("/api/v1/series")
        .iter()
        .all(|b| b["series"].as_array().unwrap().len() <= 7));
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 50);
}

#[tokio::test]
async fn test_partial_failure_keeps_siblings() {
    let transport = Arc::new(FlakyTransport {
        calls: AtomicUsize::new(0),
        delivered: Mutex::new(Vec::new()),
    });
    let config = metric_config().with_flush_max_per_body(10);
    let sink = DatadogMetricSink::new(config, Arc::clone(&transport));
    sink.start(Arc::new(NullStatsClient)).unwrap();

    let samples: Vec<_> = (0..40)
        .map(|i| MetricSample::new(format!("m{i}"), 1.0, 1_700_000_000, MetricType::Gauge))
        .collect();
    let FlushOutcome::Flushed(summary) = sink.flush(samples).await.unwrap() else {
        panic!("expected a flushed outcome");
    };

    assert_eq!(summary.requests, 4);
    assert_eq!(summary.failed_requests, 2);
    assert_eq!(transport.delivered.lock().unwrap().len(), 2);
    assert_eq!(sink.metrics().requests_failed(), 2);
}

#[tokio::test]
async fn test_events_and_checks_go_to_their_endpoints() {
    let transport = Arc::new(CapturingTransport::new());
    let sink = DatadogMetricSink::new(metric_config(), Arc::clone(&transport));
    sink.start(Arc::new(NullStatsClient)).unwrap();

    let event = Event {
        title: "deploy".into(),
        text: "done".into(),
        ..Event::default()
    };
    let check = ServiceCheck::new("db.up", CheckStatus::Warning);
    sink.flush_events_checks(vec![event], vec![check]).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    let intake = requests.iter().find(|r| r.url.contains("/intake")).unwrap();
    assert!(intake.options.compress);
    let checks = requests.iter().find(|r| r.url.contains("/check_run")).unwrap();
    assert!(!checks.options.compress);

    let events = &transport.bodies("/intake")[0]["events"]["api"];
    assert_eq!(events[0]["host"], "agent-1");
    assert_eq!(events[0]["tags"], serde_json::json!(["region:eu"]));
    let checks = &transport.bodies("/check_run")[0];
    assert_eq!(checks[0]["status"], 1);
    assert_eq!(checks[0]["host_name"], "agent-1");
}

#[tokio::test]
async fn test_span_sink_concurrent_producers() {
    let transport = Arc::new(CapturingTransport::new());
    let config = SpanSinkConfig::default()
        .with_trace_address("http://localhost:8126")
        .with_buffer_size(1024)
        .with_common_tags(HashMap::from([("env".into(), "test".into())]));
    let sink = Arc::new(DatadogSpanSink::new(config, Arc::clone(&transport)));
    sink.start(Arc::new(NullStatsClient)).unwrap();

    let producers = 4;
    let per_producer = 100;
    let handles: Vec<_> = (0..producers)
        .map(|p| {
            let sink = Arc::clone(&sink);
            std::thread::spawn(move || {
                for i in 0..per_producer {
                    let id = (p * per_producer + i + 1) as i64;
                    sink.ingest(span(p as i64 + 1, id, "api")).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(sink.buffered(), producers * per_producer);

    let outcome = sink.flush().await.unwrap();
    assert_eq!(outcome.records(), producers * per_producer);

    let body = &transport.bodies("/v0.3/traces")[0];
    let traces = body.as_array().unwrap();
    assert_eq!(traces.len(), producers);
    for trace in traces {
        let spans = trace.as_array().unwrap();
        assert_eq!(spans.len(), per_producer);
        let trace_id = &spans[0]["trace_id"];
        assert!(spans.iter().all(|s| &s["trace_id"] == trace_id));
        assert!(spans.iter().all(|s| s["meta"]["env"] == "test"));
        assert!(spans.iter().all(|s| s["type"] == "web"));
    }
}

#[tokio::test]
async fn test_span_ring_overflow_keeps_newest() {
    let transport = Arc::new(CapturingTransport::new());
    let config = SpanSinkConfig::default().with_buffer_size(16);
    let sink = DatadogSpanSink::new(config, Arc::clone(&transport));
    let stats = Arc::new(CountingStats::default());
    sink.start(stats.clone()).unwrap();

    for id in 1..=40 {
        sink.ingest(span(1, id, "api")).unwrap();
    }
    assert_eq!(sink.buffered(), 16);

    sink.flush().await.unwrap();
    let body = &transport.bodies("/v0.3/traces")[0];
    let mut ids: Vec<i64> = body[0]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["span_id"].as_i64().unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (25..=40).collect::<Vec<_>>());
    assert_eq!(stats.total("sink.spans_dropped_total"), 24.0);
    assert_eq!(stats.total("sink.spans_flushed_total"), 16.0);
}

#[tokio::test]
async fn test_repeated_flush_cycles() {
    let transport = Arc::new(CapturingTransport::new());
    let config = SpanSinkConfig::default().with_buffer_size(8);
    let sink = DatadogSpanSink::new(config, Arc::clone(&transport));
    sink.start(Arc::new(NullStatsClient)).unwrap();

    for cycle in 1..=3 {
        sink.ingest(span(cycle, cycle, "api")).unwrap();
        assert_eq!(sink.flush().await.unwrap().records(), 1);
        assert_eq!(sink.flush().await.unwrap(), FlushOutcome::Empty);
    }
    assert_eq!(transport.requests().len(), 3);
    assert_eq!(sink.metrics().flushes(), 6);
}
