use anyhow::Context;
use baraddur::{Engine, EngineEvent, EngineOptions, ExecutionOutcome, JobState, ScanMode, Settings};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    filter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Scan directories recursively and execute scripts on regex matches
#[derive(Parser)]
#[command(name = "baraddur", author, version)]
struct Cli {
    /// Directory to scan
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Path to config file. Defaults to ~/.baraddur/config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// One of "error", "info", "debug" or "trace"
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// How to print the scripts' outputs
    #[arg(short, long, value_enum, default_value_t = OutputMode::Colored)]
    output: OutputMode,

    /// Run only the job with this index
    #[arg(short, long)]
    job: Option<usize>,

    /// Scan without executing scripts
    #[arg(short, long)]
    dry_run: bool,

    /// Force every job to scan once and complete
    #[arg(long, conflicts_with = "watch")]
    once: bool,

    /// Force every job to keep scanning until stopped
    #[arg(long)]
    watch: bool,

    /// Override worker_concurrency from the config
    #[arg(short, long)]
    workers: Option<NonZeroUsize>,

    /// Override scanner_concurrency from the config
    #[arg(long)]
    scanners: Option<NonZeroUsize>,

    /// Default per-execution timeout (e.g. "30s")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// How long shutdown may take before remaining work is cut off
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputMode {
    Colored,
    NoColor,
    None,
}

/// Info and below go to stdout, warnings and above to stderr
fn init_tracing(log_level: &str) {
    let directive = match log_level {
        "error" | "info" | "debug" | "trace" => log_level,
        other => {
            eprintln!("Invalid log-level argument: \"{other}\". Defaulting to \"info\".");
            "info"
        }
    };

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(filter::filter_fn(|meta| {
            *meta.level() >= tracing::Level::INFO
        }));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter::filter_fn(|meta| {
            *meta.level() <= tracing::Level::WARN
        }));

    tracing_subscriber::registry()
        .with(EnvFilter::new(format!("baraddur={directive}")))
        .with(stdout_layer)
        .with(stderr_layer)
        .init();
}

fn render(event: EngineEvent, output: OutputMode) {
    match event {
        EngineEvent::Result(result) => {
            match &result.outcome {
                ExecutionOutcome::Exited { code: Some(0) } => info!(
                    job = %result.job,
                    target = %result.target.display(),
                    duration = %humantime::format_duration(result.duration),
                    "script succeeded"
                ),
                outcome => warn!(
                    job = %result.job,
                    target = %result.target.display(),
                    %outcome,
                    "script did not succeed"
                ),
            }

            if output == OutputMode::None {
                return;
            }
            if !result.stdout.is_empty() {
                match output {
                    OutputMode::Colored => print!("{}", result.stdout.green()),
                    _ => print!("{}", result.stdout),
                }
            }
            if !result.stderr.is_empty() {
                match output {
                    OutputMode::Colored => eprint!("{}", result.stderr.red()),
                    _ => eprint!("{}", result.stderr),
                }
            }
        }
        EngineEvent::Warning(warning) => match &warning.path {
            Some(path) => warn!(job = %warning.job, path = %path.display(), "{}", warning.message),
            None => warn!(job = %warning.job, "{}", warning.message),
        },
        EngineEvent::JobState { job, state } => {
            info!(%job, %state, "job state");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let mut settings =
        Settings::load_from(cli.config.as_deref()).context("couldn't load config")?;
    if let Some(workers) = cli.workers {
        settings.worker_concurrency = workers;
    }
    if let Some(scanners) = cli.scanners {
        settings.scanner_concurrency = scanners;
    }

    let mode = if cli.once {
        Some(ScanMode::Once)
    } else if cli.watch {
        Some(ScanMode::Watch)
    } else {
        None
    };
    let options = EngineOptions {
        root: cli.root.clone(),
        dry_run: cli.dry_run,
        job_filter: cli.job,
        mode,
        default_timeout: cli.timeout,
        grace: cli.grace,
        ..EngineOptions::default()
    };

    info!(root = %cli.root.display(), "starting baraddur");
    let (engine, mut events) = Engine::start(settings, options)?;

    let mut graceful_requested = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => render(event, cli.output),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if graceful_requested {
                    warn!("forced shutdown, terminating running scripts");
                    engine.shutdown(false);
                } else {
                    graceful_requested = true;
                    info!("shutting down, waiting for running scripts (Ctrl-C again to force)");
                    engine.shutdown(true);
                }
            }
        }
    }

    let statuses = engine.stop(true).await;
    for status in &statuses {
        info!(job = %status.job, state = %status.state, "job finished");
    }
    info!("baraddur done");

    let failed = statuses
        .iter()
        .filter(|status| status.state == JobState::Failed)
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} job(s) failed");
    }
    Ok(())
}
