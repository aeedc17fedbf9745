use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use color_eyre::eyre::{Result, eyre};
use serde::Serialize;
use serde_json::Value;

// Sampler events and span closes worth counting in a capture.
const COUNTED: [&str; 7] = [
    "engine.throttled",
    "engine.degenerate_delta",
    "resolver.cached",
    "resolver.stale_identity",
    "resolver.instance_gone",
    "resolver.resolve",
    "source.query",
];

/// One `read_usage` call as seen by the capture loop.
#[derive(Debug, Clone, Copy)]
pub struct ReadSample {
    /// The engine's window had elapsed, so the call could reach the backend.
    pub live: bool,
    pub elapsed: Duration,
    pub cpu_percent: f64,
}

/// Reader settings echoed into the summary.
#[derive(Debug, Serialize)]
pub struct CaptureSettings {
    pub backend: String,
    pub cpu_scale: String,
    pub refresh_interval_ms: u64,
}

pub fn init_tracing_json(output_path: &Path) -> Result<()> {
    use tracing_subscriber::fmt::format::FmtSpan;

    ensure_parent_dir(output_path)?;
    let writer = Mutex::new(File::create(output_path)?);

    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| eyre!("cannot install capture subscriber: {e}"))
}

/// Writes `summary_path` (JSON) and returns the same numbers as markdown.
pub fn write_capture_summary(
    event_log: &Path,
    summary_path: &Path,
    settings: CaptureSettings,
    samples: &[ReadSample],
) -> Result<String> {
    if samples.is_empty() {
        return Err(eyre!("capture recorded no reads"));
    }

    let (live, throttled): (Vec<ReadSample>, Vec<ReadSample>) =
        samples.iter().partition(|s| s.live);
    let events = count_events(event_log)?;
    let backend_queries = events.get("source.query").copied().unwrap_or(0);

    let summary = CaptureSummary {
        generated_at_unix_s: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| eyre!("clock before UNIX_EPOCH: {e}"))?
            .as_secs(),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        settings,
        reads: samples.len(),
        live_reads: live.len(),
        throttled_reads: throttled.len(),
        backend_queries,
        queries_per_live_read: if live.is_empty() {
            0.0
        } else {
            backend_queries as f64 / live.len() as f64
        },
        live_latency: Latency::of(&live),
        throttled_latency: Latency::of(&throttled),
        cpu_percent: CpuRange::of(samples),
        events,
        event_log: event_log.display().to_string(),
    };

    ensure_parent_dir(summary_path)?;
    fs::write(summary_path, serde_json::to_string_pretty(&summary)?)?;
    Ok(render_markdown(&summary))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

/// Counts sampler events, and closes of the sampler spans, by name.
fn count_events(path: &Path) -> Result<BTreeMap<String, usize>> {
    let mut counts: BTreeMap<String, usize> =
        COUNTED.iter().map(|name| (name.to_string(), 0)).collect();

    for line in BufReader::new(File::open(path)?).lines() {
        let line = line?;
        let Ok(record) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        if let Some(name) = record_name(&record)
            && let Some(count) = counts.get_mut(name)
        {
            *count += 1;
        }
    }
    Ok(counts)
}

// Plain events carry their name as the message; span closes say "close"
// and name the span instead.
fn record_name(record: &Value) -> Option<&str> {
    let message = record.pointer("/fields/message").and_then(Value::as_str)?;
    if message == "close" {
        record.pointer("/span/name").and_then(Value::as_str)
    } else {
        Some(message)
    }
}

fn micros(d: Duration) -> f64 {
    (d.as_secs_f64() * 1_000_000.0 * 100.0).round() / 100.0
}

fn render_markdown(summary: &CaptureSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Sampling capture");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- `{}` backend on `{}`/`{}`, `{}` scale, {} ms window",
        summary.settings.backend,
        summary.os,
        summary.arch,
        summary.settings.cpu_scale,
        summary.settings.refresh_interval_ms
    );
    let _ = writeln!(
        out,
        "- {} reads: {} live, {} served from the window; {} backend queries ({:.2} per live read)",
        summary.reads,
        summary.live_reads,
        summary.throttled_reads,
        summary.backend_queries,
        summary.queries_per_live_read
    );
    let _ = writeln!(
        out,
        "- CPU: min {:.2}%, mean {:.2}%, max {:.2}%",
        summary.cpu_percent.min, summary.cpu_percent.mean, summary.cpu_percent.max
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "| Read | Count | mean µs | max µs |");
    let _ = writeln!(out, "| --- | ---: | ---: | ---: |");
    for (kind, latency) in [
        ("live", &summary.live_latency),
        ("throttled", &summary.throttled_latency),
    ] {
        let _ = writeln!(
            out,
            "| {kind} | {} | {:.2} | {:.2} |",
            latency.count, latency.mean_us, latency.max_us
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "| Event | Count |");
    let _ = writeln!(out, "| --- | ---: |");
    for (name, count) in &summary.events {
        let _ = writeln!(out, "| `{name}` | {count} |");
    }
    out
}

#[derive(Debug, Serialize)]
struct CaptureSummary {
    generated_at_unix_s: u64,
    os: &'static str,
    arch: &'static str,
    settings: CaptureSettings,
    reads: usize,
    live_reads: usize,
    throttled_reads: usize,
    backend_queries: usize,
    queries_per_live_read: f64,
    live_latency: Latency,
    throttled_latency: Latency,
    cpu_percent: CpuRange,
    events: BTreeMap<String, usize>,
    event_log: String,
}

#[derive(Debug, Default, Serialize)]
struct Latency {
    count: usize,
    mean_us: f64,
    max_us: f64,
}

impl Latency {
    fn of(samples: &[ReadSample]) -> Self {
        if samples.is_empty() {
            return Latency::default();
        }
        let total: Duration = samples.iter().map(|s| s.elapsed).sum();
        let max = samples.iter().map(|s| s.elapsed).max().unwrap_or_default();
        Latency {
            count: samples.len(),
            mean_us: micros(total / samples.len() as u32),
            max_us: micros(max),
        }
    }
}

#[derive(Debug, Serialize)]
struct CpuRange {
    min: f64,
    mean: f64,
    max: f64,
}

impl CpuRange {
    fn of(samples: &[ReadSample]) -> Self {
        let values = samples.iter().map(|s| s.cpu_percent);
        CpuRange {
            min: values.clone().fold(f64::INFINITY, f64::min),
            mean: values.clone().sum::<f64>() / samples.len().max(1) as f64,
            max: values.fold(f64::NEG_INFINITY, f64::max),
        }
    }
}
