#[cfg(feature = "perf-tracing")]
mod perf;

use std::hint::black_box;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::eyre;
use procusage::config::{self, load_config, load_config_from_path};
use procusage::format::format_reading;
use procusage::source::SourceKind;
use procusage::usage::{CpuScale, UsageReader};

#[derive(Parser)]
#[command(
    name = "procusage",
    about = "Sample CPU and memory usage of this process"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Snapshot backend: direct, sysinfo, typeperf
    #[arg(long)]
    backend: Option<String>,

    /// Minimum time between live refreshes, in milliseconds
    #[arg(long)]
    refresh_interval_ms: Option<u64>,

    /// CPU percentage scale: machine, core
    #[arg(long)]
    cpu_scale: Option<String>,

    /// Time between samples, in milliseconds
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Number of samples to take
    #[arg(long, default_value_t = 20)]
    count: usize,

    /// Spin the CPU for this many milliseconds before every sample.
    #[arg(long, default_value_t = 0)]
    busy_ms: u64,

    /// Print JSON lines instead of text
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Record span timings of every sample (needs the `perf-tracing` feature).
    #[arg(long, default_value_t = false)]
    perf_capture: bool,

    /// Sampler event log written during a capture (JSON lines).
    #[arg(long, default_value = "target/perf/sampling_events.jsonl")]
    perf_output: PathBuf,

    /// Summary written after a perf capture.
    #[arg(long, default_value = "target/perf/sampling_summary.json")]
    perf_summary: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    if cli.interval_ms == 0 {
        return Err(eyre!("--interval-ms must be greater than 0"));
    }
    let config = load_config_for_cli(&cli)?;

    if cli.perf_capture {
        return run_perf_capture(config, &cli).await;
    }

    let reader = UsageReader::from_config(&config);
    if !cli.json {
        println!("{}", describe(&config, &reader));
    }
    let mut ticks = tokio::time::interval(Duration::from_millis(cli.interval_ms));

    for _ in 0..cli.count {
        ticks.tick().await;
        burn_cpu(Duration::from_millis(cli.busy_ms));
        let reading = reader.read_usage()?;
        if cli.json {
            println!("{}", serde_json::to_string(&reading)?);
        } else {
            println!("{}", format_reading(&reading));
        }
    }

    Ok(())
}

fn load_config_for_cli(cli: &Cli) -> Result<config::Config> {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Some(ref backend) = cli.backend {
        let kind = SourceKind::from_name(backend)
            .ok_or_else(|| eyre!("unknown --backend `{backend}` (expected direct, sysinfo or typeperf)"))?;
        config.backend.kind = kind.label().to_string();
    }
    if let Some(ms) = cli.refresh_interval_ms {
        config.sampling.min_refresh_interval_ms = ms;
    }
    if let Some(ref scale) = cli.cpu_scale {
        let scale = CpuScale::from_name(scale)
            .ok_or_else(|| eyre!("unknown --cpu-scale `{scale}` (expected machine or core)"))?;
        config.sampling.cpu_scale = scale.label().to_string();
    }

    Ok(config)
}

fn describe(config: &config::Config, reader: &UsageReader) -> String {
    let engine = reader.engine();
    let mut line = format!(
        "backend={} scale={} window={}ms",
        SourceKind::from_name(&config.backend.kind)
            .unwrap_or_default()
            .label(),
        engine.scale().label(),
        engine.min_refresh_interval().as_millis()
    );
    if SourceKind::from_name(&config.backend.kind) == Some(SourceKind::Typeperf) {
        line.push_str(&format!(" instance={}#n", reader.resolver().base_name()));
    }
    line
}

fn burn_cpu(duration: Duration) {
    let deadline = Instant::now() + duration;
    let mut acc = 0u64;
    while Instant::now() < deadline {
        acc = black_box(acc.wrapping_mul(6364136223846793005).wrapping_add(1));
    }
}

async fn run_perf_capture(config: config::Config, cli: &Cli) -> Result<()> {
    #[cfg(not(feature = "perf-tracing"))]
    {
        let _ = (config, cli);
        Err(eyre!(
            "--perf-capture requires the `perf-tracing` feature; run with `cargo run --features perf-tracing -- --perf-capture`"
        ))
    }

    #[cfg(feature = "perf-tracing")]
    {
        if cli.count == 0 {
            return Err(eyre!("--count must be greater than 0"));
        }

        if cli.perf_output.exists() {
            std::fs::remove_file(&cli.perf_output)?;
        }
        perf::init_tracing_json(&cli.perf_output)?;

        let reader = UsageReader::from_config(&config);
        let mut ticks = tokio::time::interval(Duration::from_millis(cli.interval_ms));
        let mut samples = Vec::with_capacity(cli.count);

        for _ in 0..cli.count {
            ticks.tick().await;
            burn_cpu(Duration::from_millis(cli.busy_ms));
            let started = Instant::now();
            let live = reader.engine().should_refresh(started);
            let reading = reader.read_usage()?;
            samples.push(perf::ReadSample {
                live,
                elapsed: started.elapsed(),
                cpu_percent: reading.cpu_percent,
            });
        }

        let engine = reader.engine();
        let settings = perf::CaptureSettings {
            backend: config.backend.kind.clone(),
            cpu_scale: engine.scale().label().to_string(),
            refresh_interval_ms: engine.min_refresh_interval().as_millis() as u64,
        };
        let markdown =
            perf::write_capture_summary(&cli.perf_output, &cli.perf_summary, settings, &samples)?;

        println!("{markdown}");
        println!("Event log: {}", cli.perf_output.display());
        println!("Summary: {}", cli.perf_summary.display());
        Ok(())
    }
}
