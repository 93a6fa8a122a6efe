//! # Datadog Sink Demo
//!
//! Drives both sinks the way a host process would: several producer tasks
//! ingest spans concurrently while a scheduler flushes metrics and traces
//! on a fixed interval.
//!
//! ## Features Demonstrated
//!
//! - Span ingest from many producers into the bounded ring, with overwrite
//!   of the oldest spans when producers outrun the flush interval
//! - Periodic flushes driven by a `tokio::time::interval` scheduler
//! - Counter → rate finalization and chunked series delivery
//! - Self-reported stats through `ChannelStatsClient`
//! - Events and service checks
//!
//! By default every request is printed to stdout instead of being sent.
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (2 producers, 3 cycles)
//! cargo run -p datadog_sink --bin demo --release -- --quick
//!
//! # Print request bodies too
//! cargo run -p datadog_sink --bin demo --release -- --verbose
//!
//! # Send to a real backend using a YAML config file
//! cargo run -p datadog_sink --bin demo --release -- --live --config sink.yaml
//! ```

use anyhow::{bail, Context, Result};
use datadog_sink::{
    ChannelStatsClient, CheckStatus, DatadogMetricSink, DatadogSpanSink, Event, FlushOutcome,
    HttpTransport, MetricSample, MetricSink, MetricType, SampleKind, SelfSample, ServiceCheck,
    SinkConfig, Span, SpanSink, StatsClient, StdoutTransport, Transport,
};
use rand::Rng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICES: [&str; 4] = ["checkout", "inventory", "payments", "search"];
const OPERATIONS: [&str; 4] = ["GET /items", "POST /orders", "db.query", "cache.get"];

struct DemoArgs {
    quick: bool,
    verbose: bool,
    live: bool,
    config: Option<PathBuf>,
}

impl DemoArgs {
    fn parse() -> Result<Self> {
        let mut args = DemoArgs {
            quick: false,
            verbose: false,
            live: false,
            config: None,
        };
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--quick" => args.quick = true,
                "--verbose" => args.verbose = true,
                "--live" => args.live = true,
                "--config" => {
                    let path = iter.next().context("--config requires a path")?;
                    args.config = Some(PathBuf::from(path));
                }
                other => bail!("unknown argument: {other}"),
            }
        }
        if args.live && args.config.is_none() {
            bail!("--live requires --config <path>");
        }
        Ok(args)
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log filter: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
    Ok(())
}

fn demo_config() -> Result<SinkConfig> {
    let yaml = r#"
datadog_api_hostname: "https://app.datadoghq.com"
datadog_api_key: "demo-key"
datadog_trace_api_address: "http://localhost:8126"
hostname: "demo-host"
tags: ["env:demo", "team:observability"]
interval: 1s
flush_max_per_body: 50
ssf_buffer_size: 256
"#;
    Ok(SinkConfig::from_yaml_str(yaml)?)
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

fn random_span(trace_id: i64, id: i64) -> Span {
    let mut rng = rand::thread_rng();
    let start = now_micros() - rng.gen_range(0..5_000_000);
    let service = SERVICES[rng.gen_range(0..SERVICES.len())];
    let operation = OPERATIONS[rng.gen_range(0..OPERATIONS.len())];
    let parent = if id % 5 == 0 { 0 } else { id - 1 };

    Span::new(trace_id, id, parent, service, operation)
        .with_timestamps(start, start + rng.gen_range(50..250_000))
        .with_tag("resource", operation)
        .with_error(rng.gen_bool(0.1))
}

fn interval_samples(cycle: i64, count: usize) -> Vec<MetricSample> {
    let mut rng = rand::thread_rng();
    let ts = now_micros() / 1_000_000;
    (0..count)
        .map(|i| {
            let service = SERVICES[i % SERVICES.len()];
            if i % 2 == 0 {
                let value = f64::from(rng.gen_range(0u32..1_000));
                MetricSample::new("demo.requests", value, ts, MetricType::Counter)
                    .with_tags([format!("service:{service}"), format!("cycle:{cycle}")])
            } else {
                let depth = rng.gen_range(0.0..64.0);
                MetricSample::new("demo.queue_depth", depth, ts, MetricType::Gauge)
                    .with_tags([format!("service:{service}"), format!("host:worker-{}", i % 3)])
            }
        })
        .collect()
}

async fn run<T: Transport>(transport: Arc<T>, config: SinkConfig, args: &DemoArgs) -> Result<()> {
    let (producers, cycles, spans_per_tick) = if args.quick { (2, 3, 20) } else { (4, 6, 80) };

    let (stats, mut stats_rx) = ChannelStatsClient::new(64);
    let stats: Arc<dyn StatsClient> = Arc::new(stats);

    let metric_sink = DatadogMetricSink::new(config.metric_sink_config(), Arc::clone(&transport));
    let span_sink = Arc::new(DatadogSpanSink::new(config.span_sink_config(), transport));
    metric_sink.start(Arc::clone(&stats))?;
    span_sink.start(stats)?;

    info!(
        producers,
        cycles,
        ring_capacity = span_sink.capacity(),
        "Starting demo"
    );

    let reporter = tokio::spawn(async move {
        let mut timings = 0usize;
        let mut counts = 0.0;
        while let Some(batch) = stats_rx.recv().await {
            for sample in batch {
                match sample.kind {
                    SampleKind::Timing => timings += 1,
                    SampleKind::Count => counts += sample.value,
                }
                log_sample(&sample);
            }
        }
        (timings, counts)
    });

    let next_id = Arc::new(AtomicI64::new(1));
    let (stop_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let mut producer_handles = Vec::new();
    for p in 0..producers {
        let sink = Arc::clone(&span_sink);
        let next_id = Arc::clone(&next_id);
        let mut stop = stop_tx.subscribe();
        producer_handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(100));
            let mut rejected = 0u64;
            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    _ = ticker.tick() => {
                        let trace_id = next_id.fetch_add(1, Ordering::Relaxed) * 100 + p as i64;
                        for _ in 0..spans_per_tick {
                            let id = next_id.fetch_add(1, Ordering::Relaxed);
                            if let Err(e) = sink.ingest(random_span(trace_id, id)) {
                                rejected += 1;
                                warn!(producer = p, error = %e, "Span rejected");
                            }
                        }
                    }
                }
            }
            rejected
        }));
    }

    let mut scheduler = tokio::time::interval(config.interval);
    scheduler.tick().await;
    for cycle in 1..=cycles {
        scheduler.tick().await;

        let metrics = metric_sink.flush(interval_samples(cycle, 120)).await?;
        let spans = span_sink.flush().await?;
        report_cycle(cycle, &metrics, &spans);

        if cycle == cycles {
            let event = Event {
                title: "demo finished".into(),
                text: format!("{cycles} flush cycles completed"),
                alert_level: Some("info".into()),
                ..Event::default()
            };
            let check = ServiceCheck::new("demo.healthy", CheckStatus::Ok);
            metric_sink.flush_events_checks(vec![event], vec![check]).await?;
        }
    }

    let _ = stop_tx.send(());
    let mut rejected = 0;
    for handle in producer_handles {
        rejected += handle.await?;
    }
    // Drain whatever the producers wrote after the last cycle.
    let tail = span_sink.flush().await?;

    let span_metrics = span_sink.metrics();
    println!();
    println!("Demo summary");
    println!("  spans ingested:     {}", span_metrics.spans_ingested());
    println!("  spans overwritten:  {}", span_metrics.spans_overwritten());
    println!("  spans rejected:     {rejected}");
    println!("  spans flushed:      {}", span_metrics.records_flushed());
    println!("  final drain:        {}", tail.records());
    println!("  metrics flushed:    {}", metric_sink.metrics().records_flushed());
    println!(
        "  failed requests:    {}",
        span_metrics.requests_failed() + metric_sink.metrics().requests_failed()
    );

    drop(metric_sink);
    drop(span_sink);
    let (timings, counts) = reporter.await?;
    println!("  stats reported:     {timings} timings, {counts} counted");
    Ok(())
}

fn report_cycle(cycle: i64, metrics: &FlushOutcome, spans: &FlushOutcome) {
    info!(
        cycle,
        metrics = metrics.records(),
        spans = spans.records(),
        "Flush cycle complete"
    );
}

fn log_sample(sample: &SelfSample) {
    tracing::debug!(stat = sample.name, value = sample.value, tags = ?sample.tags, "stat");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let args = DemoArgs::parse()?;

    let config = match &args.config {
        Some(path) => {
            SinkConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => demo_config()?,
    };

    if args.live {
        let transport = HttpTransport::with_timeout(Duration::from_secs(10))?;
        run(Arc::new(transport), config, &args).await
    } else {
        run(Arc::new(StdoutTransport::new(args.verbose)), config, &args).await
    }
}
