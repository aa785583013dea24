//! JSON output for run summaries and daily reports.
//!
//! # Output Structure
//!
//! ```text
//! reports_dir/
//! ├── runs/
//! │   └── 2025-05-06/
//! │       └── 120000.json
//! └── daily_report_2025-05-06.json
//! ```
//!
//! Run archives are keyed by the cycle's UTC start time, so two cycles never
//! share a file unless they start within the same second.

use super::ReportError;
use super::daily::DailyReport;
use crate::models::RunSummary;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Write a [`RunSummary`] to `{reports_dir}/runs/{date}/{HHMMSS}.json`.
#[instrument(level = "info", skip_all, fields(reports_dir = %reports_dir.display()))]
pub async fn write_run_summary(summary: &RunSummary, reports_dir: &Path) -> Result<PathBuf, ReportError> {
    let json = serde_json::to_string_pretty(summary)?;

    let run_dir = reports_dir
        .join("runs")
        .join(summary.started_at.format("%Y-%m-%d").to_string());
    if let Err(e) = fs::create_dir_all(&run_dir).await {
        error!(run_dir = %run_dir.display(), error = %e, "Failed to create run archive dir");
        return Err(ReportError::io(&run_dir, e));
    }

    let path = run_dir.join(format!("{}.json", summary.started_at.format("%H%M%S")));
    fs::write(&path, json)
        .await
        .map_err(|e| ReportError::io(&path, e))?;
    info!(path = %path.display(), "Wrote run summary");
    Ok(path)
}

/// Write a [`DailyReport`] to `{reports_dir}/daily_report_{date}.json`, replacing any earlier one.
#[instrument(level = "info", skip_all, fields(date = %report.date))]
pub async fn write_daily_report(report: &DailyReport, reports_dir: &Path) -> Result<PathBuf, ReportError> {
    let json = serde_json::to_string_pretty(report)?;

    fs::create_dir_all(reports_dir)
        .await
        .map_err(|e| ReportError::io(reports_dir, e))?;

    let path = reports_dir.join(format!("daily_report_{}.json", report.date));
    fs::write(&path, json)
        .await
        .map_err(|e| ReportError::io(&path, e))?;
    info!(path = %path.display(), total_videos = report.total_videos, "Wrote daily report");
    Ok(path)
}
