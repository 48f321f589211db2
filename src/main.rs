//! # driftwatch CLI
//!
//! Reads one `multi-server.v1` request from stdin (or `--request <file>`),
//! scans every host plan, and writes newline-delimited JSON events to
//! stdout: `progress` lines while hosts are scanned, then exactly one
//! `result` or `error` line. Diagnostics go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! driftwatch < request.json
//! driftwatch --config ./driftwatch.toml --workers 4 --request request.json
//! DRIFTWATCH_LOG=driftwatch=debug driftwatch < request.json
//! ```
//!
//! Exit code is `0` when a result line was written and `1` otherwise.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

use driftwatch::cache::{self, DiffCache};
use driftwatch::config::{self, Config};
use driftwatch::logging;
use driftwatch::orchestrator::Orchestrator;
use driftwatch::progress::{EventSink, NdjsonSink};
use driftwatch::protocol::{self, Event};
use driftwatch::scanner::ScanBudget;

/// driftwatch: configuration drift detection across hosts.
#[derive(Parser)]
#[command(
    name = "driftwatch",
    about = "Detect configuration drift across a fleet of hosts",
    version,
    long_about = "Reads a multi-server.v1 scan request on stdin, compares configuration \
    files across hosts against a baseline host, and streams progress and the final drift \
    catalog as newline-delimited JSON on stdout."
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Diff cache directory. A `cache_dir` in the request takes precedence.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Number of hosts scanned concurrently (overrides `scan.workers`).
    #[arg(long)]
    workers: Option<usize>,

    /// Read the request from this file instead of stdin.
    #[arg(long)]
    request: Option<PathBuf>,

    /// Debug-level diagnostics on stderr.
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let sink = NdjsonSink::stdout();
    match run(&cli, &sink).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{:#}", e);
            error!(error = %message, "run aborted");
            sink.emit(Event::Error { message });
            ExitCode::from(1)
        }
    }
}

async fn run(cli: &Cli, sink: &dyn EventSink) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    if let Some(workers) = cli.workers {
        config.scan.workers = workers;
    }
    config.validate()?;

    let input = read_request(cli.request.as_deref())?;
    let request = protocol::parse_request(&input)?;
    let time_budget = request.time_budget();
    let plans = protocol::resolve_plans(request.plans)?;

    let cache = open_cache(&config, request.cache_dir.as_deref(), cli.cache_dir.as_deref())?;
    let budget = match time_budget {
        Some(limit) => ScanBudget::with_time_limit(limit),
        None => ScanBudget::new(),
    };

    let orchestrator = Orchestrator::from_config(&config, cache)?;
    let response = orchestrator.run(&plans, &budget, sink).await?;
    info!(
        hosts = response.summary.host_count,
        drifting = response.summary.drifting_configs,
        "run complete"
    );
    sink.emit(Event::Result {
        payload: Box::new(response),
    });
    Ok(())
}

fn read_request(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display())),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("Failed to read request from stdin")?;
            Ok(input)
        }
    }
}

/// Cache directory precedence: request, `--cache-dir`, `cache.dir`, then the
/// data directory default. Only the default location picks up legacy entries.
fn open_cache(
    config: &Config,
    from_request: Option<&Path>,
    from_cli: Option<&Path>,
) -> Result<DiffCache> {
    if !config.cache.enabled {
        info!("diff cache disabled by configuration");
        return Ok(DiffCache::disabled());
    }
    let explicit = from_request.or(from_cli).or(config.cache.dir.as_deref());
    let dir = cache::resolve_cache_dir(explicit)?;
    if explicit.is_none() {
        if let Some(legacy) = cache::legacy_cache_dir() {
            cache::migrate_legacy(&legacy, &dir);
        }
    }
    Ok(DiffCache::new(dir))
}
