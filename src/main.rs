//! # AI Coding Monitor
//!
//! Watches YouTube for videos about AI-assisted programming, scores each one
//! for relevance, and keeps a deduplicated archive of everything it finds.
//!
//! ## Features
//!
//! - Monitors channel uploads and free-text searches through the YouTube Data API v3
//! - Scores videos against a configurable keyword table and tags them by category
//! - Stores each video once, in an append-only JSON Lines log
//! - Writes per-cycle summaries, a Markdown digest and a daily JSON report
//! - Re-scores the archive on demand when the keyword table changes
//!
//! ## Usage
//!
//! ```sh
//! ai_coding_monitor --config monitor.yaml run --once
//! ai_coding_monitor -d ./data -r ./reports run
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Fetching**: Run every configured query against the API (retrying transient failures once)
//! 2. **Scoring**: Weight keyword matches in title and description into a 0-100 score
//! 3. **Storing**: Insert unseen video ids; known ids are counted as duplicates
//! 4. **Reporting**: Log the cycle summary and archive it under the reports directory
//!
//! The scheduler repeats the pipeline every `interval_hours` until Ctrl-C or SIGTERM.

use chrono::{Duration, Utc};
use clap::Parser;
use std::error::Error;
use std::io::ErrorKind;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod cycle;
mod fetcher;
mod models;
mod outputs;
mod scheduler;
mod scorer;
mod store;
mod utils;

use cli::{Cli, Command};
use config::{ConfigError, MonitorConfig};
use cycle::DiscoveryCycle;
use fetcher::{RetrySearch, YouTubeClient};
use outputs::OutputReporter;
use outputs::markdown::{RecordLine, SummaryText};
use scheduler::Scheduler;
use scorer::Scorer;
use store::{JsonlStore, VideoFilter, VideoStore};
use utils::ensure_writable_dir;

/// Exit status for configuration problems detected before any work starts.
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("ai_coding_monitor starting up");

    // Parse CLI
    let args = Cli::parse();
    debug!(config = %args.config.display(), data_dir = %args.data_dir.display(), command = ?args.command, "Parsed CLI arguments");

    // ---- Configuration ----
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "Configuration rejected");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    let scorer = match Scorer::new(&config.scoring) {
        Ok(scorer) => scorer,
        Err(e) => {
            error!(error = %e, "Keyword table rejected");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    info!(
        queries = config.queries.len(),
        categories = scorer.categories().count(),
        "Loaded configuration"
    );

    // ---- Store ----
    if let Err(e) = ensure_writable_dir(&args.data_dir).await {
        error!(
            path = %args.data_dir.display(),
            error = %e,
            "Data directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }
    let store = Arc::new(JsonlStore::open(&args.data_dir)?);
    info!(path = %store.path().display(), records = store.len(), "Opened video store");

    match args.command {
        Command::Run { once } => {
            let Some(api_key) = args.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
                error!("No YouTube API key (set YOUTUBE_API_KEY or pass --api-key)");
                return Ok(ExitCode::from(EXIT_CONFIG));
            };
            let client = match args.api_base.as_deref() {
                Some(base) => YouTubeClient::with_base_url(api_key, base)?,
                None => YouTubeClient::new(api_key)?,
            };
            let fetcher = RetrySearch::new(
                client,
                config.retry.max_retries,
                std::time::Duration::from_millis(config.retry.delay_ms),
            );

            let mut reporter = OutputReporter::new(args.reports_dir.clone());
            if let Some(dir) = &args.reports_dir {
                ensure_writable_dir(dir).await?;
                reporter = reporter.with_daily_reports(store.clone());
            }

            let cancel = CancellationToken::new();
            tokio::spawn(shutdown_signal(cancel.clone()));

            let cycle = DiscoveryCycle::new(fetcher, Arc::clone(&store), scorer, reporter);
            let mut scheduler = Scheduler::new(cycle, config, cancel);

            if once {
                let summary = scheduler.run_once().await?;
                print!("{}", SummaryText(&summary));
            } else {
                scheduler.run_continuous().await;
            }
        }

        Command::Rescore => {
            let outcome = store.rescore(&scorer)?;
            info!(examined = outcome.examined, updated = outcome.updated, "Rescore finished");
            println!("rescored {} videos, {} changed", outcome.examined, outcome.updated);
        }

        Command::List {
            min_score,
            category,
            days,
            limit,
        } => {
            let mut filter = VideoFilter::new().limit(limit);
            if let Some(score) = min_score {
                filter = filter.min_score(score);
            }
            if let Some(category) = category {
                filter = filter.category(category);
            }
            let since = days.and_then(|d| Utc::now().checked_sub_signed(Duration::days(i64::from(d))));
            if let Some(since) = since {
                filter = filter.since(since);
            }

            let cursor = store.query(&filter)?;
            debug!(results = cursor.total(), "Store query complete");
            for record in cursor {
                println!("{}", RecordLine(&record));
                println!("     {}", record.watch_url());
            }
        }

        Command::Report { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let report = outputs::daily::build_daily_report(&*store, date, Utc::now())?;
            match &args.reports_dir {
                Some(dir) => {
                    let path = outputs::json::write_daily_report(&report, dir).await?;
                    println!("{} videos on {}; report written to {}", report.total_videos, date, path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }

        Command::Compact => {
            let before = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);
            let records = store.compact()?;
            let after = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);
            info!(records, bytes_before = before, bytes_after = after, "Compacted store log");
            println!("compacted {records} records ({before} -> {after} bytes)");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(ExitCode::SUCCESS)
}

/// Load, override and validate the configuration.
///
/// A missing file is tolerated when the queries come from the environment,
/// and for commands that only need the keyword table.
fn load_config(args: &Cli) -> Result<MonitorConfig, ConfigError> {
    let has_overrides = args
        .channels
        .iter()
        .chain(&args.search_terms)
        .any(|v| !v.trim().is_empty());
    let needs_queries = matches!(args.command, Command::Run { .. });

    let mut config = match MonitorConfig::load(&args.config) {
        Ok(config) => config,
        Err(ConfigError::Io { source, .. })
            if source.kind() == ErrorKind::NotFound && (has_overrides || !needs_queries) =>
        {
            warn!(path = %args.config.display(), "Config file not found; using defaults");
            MonitorConfig::default()
        }
        Err(e) => return Err(e),
    };
    config.apply_query_overrides(&args.channels, &args.search_terms);

    if needs_queries {
        config.validate()?;
    } else {
        config.scoring.validate()?;
    }
    Ok(config)
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl-C, finishing current step and shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current step and shutting down");
        },
    }
    token.cancel();
}
