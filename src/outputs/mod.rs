//! Reporting of cycle results.
//!
//! Reports are read-only views over a [`RunSummary`] and the store. Nothing
//! in this module writes to the store, so a failed report never affects
//! what has been recorded.
//!
//! # Submodules
//!
//! - [`json`]: Writes run summaries and daily reports as JSON files
//! - [`markdown`]: Renders summaries for the terminal and appends the daily digest
//! - [`daily`]: Builds the per-day report from stored records
//!
//! # Output Structure
//!
//! ```text
//! reports_dir/
//! ├── runs/
//! │   └── 2025-05-06/
//! │       ├── 060000.json        # One summary per cycle
//! │       └── 120000.json
//! ├── 2025-05-06.md              # Notable videos, appended per cycle
//! └── daily_report_2025-05-06.json
//! ```

pub mod daily;
pub mod json;
pub mod markdown;

use crate::models::{RunSummary, VideoRecord};
use crate::store::{StoreError, VideoStore};
use chrono::Utc;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to read store for report: {0}")]
    Store(#[from] StoreError),
}

impl ReportError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        ReportError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Receives the outcome of every cycle.
pub trait ReportHook {
    /// `notable` holds the newly inserted records at or above the notability threshold.
    async fn report(&self, summary: &RunSummary, notable: &[VideoRecord]) -> Result<(), ReportError>;
}

/// Logs every cycle and, when a reports directory is set, archives it on disk.
///
/// With a store attached the day's report is regenerated after every cycle.
#[derive(Clone, Default)]
pub struct OutputReporter {
    reports_dir: Option<PathBuf>,
    store: Option<Arc<dyn VideoStore>>,
}

impl OutputReporter {
    pub fn new(reports_dir: Option<PathBuf>) -> Self {
        Self {
            reports_dir,
            store: None,
        }
    }

    pub fn with_daily_reports(mut self, store: Arc<dyn VideoStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn reports_dir(&self) -> Option<&Path> {
        self.reports_dir.as_deref()
    }
}

impl fmt::Debug for OutputReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputReporter")
            .field("reports_dir", &self.reports_dir)
            .field("daily_reports", &self.store.is_some())
            .finish()
    }
}

impl ReportHook for OutputReporter {
    #[instrument(level = "info", skip_all, fields(new = summary.new_count, notable = notable.len()))]
    async fn report(&self, summary: &RunSummary, notable: &[VideoRecord]) -> Result<(), ReportError> {
        info!(
            queries_succeeded = summary.queries_succeeded,
            queries_skipped = summary.queries_skipped(),
            fetched = summary.fetched,
            new = summary.new_count,
            duplicates = summary.duplicate_count,
            skipped_records = summary.skipped_records.len(),
            cancelled = summary.cancelled,
            "Cycle complete"
        );
        for skipped in &summary.skipped_queries {
            warn!(query = %skipped.query, reason = %skipped.reason, detail = %skipped.detail, "Query skipped");
        }
        for record in notable {
            info!(
                id = %record.id,
                score = record.relevance_score,
                title = %record.title,
                url = %record.watch_url(),
                "Notable video"
            );
        }

        let Some(dir) = self.reports_dir.as_deref() else {
            return Ok(());
        };
        json::write_run_summary(summary, dir).await?;
        markdown::append_digest(dir, summary, notable).await?;

        if let Some(store) = self.store.as_deref() {
            let date = summary.started_at.date_naive();
            let report = daily::build_daily_report(store, date, Utc::now())?;
            json::write_daily_report(&report, dir).await?;
        }
        Ok(())
    }
}
