//! Command-line interface definitions for the AI coding video monitor.
//!
//! Every global option can also be supplied through an environment variable,
//! which is how the monitor is usually configured when run as a service.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the monitor.
///
/// # Examples
///
/// ```sh
/// # One cycle, then print a summary
/// ai_coding_monitor --config monitor.yaml run --once
///
/// # Run every interval until interrupted
/// YOUTUBE_API_KEY=... ai_coding_monitor -d ./data -r ./reports run
///
/// # Override the configured queries
/// SEARCH_TERMS="claude code,cursor ai" ai_coding_monitor run --once
///
/// # Videos scoring 70 or more in the last 3 days
/// ai_coding_monitor list --min-score 70 --days 3
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "MONITOR_CONFIG", default_value = "monitor.yaml")]
    pub config: PathBuf,

    /// Directory holding the video store
    #[arg(short, long, env = "MONITOR_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory for run summaries, digests and daily reports (disabled when unset)
    #[arg(short, long, env = "MONITOR_REPORTS_DIR")]
    pub reports_dir: Option<PathBuf>,

    /// YouTube Data API key
    #[arg(long, env = "YOUTUBE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the YouTube API base URL
    #[arg(long, env = "YOUTUBE_API_BASE")]
    pub api_base: Option<String>,

    /// Channel ids to monitor, replacing the configured queries (comma separated)
    #[arg(long, env = "MONITOR_CHANNELS", value_delimiter = ',')]
    pub channels: Vec<String>,

    /// Search terms to monitor, replacing the configured queries (comma separated)
    #[arg(long, env = "SEARCH_TERMS", value_delimiter = ',')]
    pub search_terms: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run discovery cycles
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Recompute score and tags of every stored video with the current keyword table
    Rescore,

    /// Print stored videos, newest first
    List {
        /// Only videos scoring at least this much
        #[arg(long)]
        min_score: Option<u8>,

        /// Only videos with this category tag
        #[arg(long)]
        category: Option<String>,

        /// Only videos discovered in the last N days
        #[arg(long)]
        days: Option<u32>,

        /// Maximum number of videos to print
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },

    /// Write the daily report for a UTC date (today by default)
    Report {
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Rewrite the store log without superseded entries
    Compact,
}
