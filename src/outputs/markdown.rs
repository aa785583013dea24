//! Human-readable renderings.
//!
//! - [`SummaryText`]: plain-text cycle summary printed by `run --once`
//! - [`RecordLine`]: one line per record, used by `list`
//! - [`append_digest`]: appends a cycle's notable videos to `{reports_dir}/{date}.md`
//!
//! The digest uses append semantics so that every cycle of a day adds its own
//! section to the same file.

use super::ReportError;
use crate::models::{RunSummary, VideoRecord};
use crate::utils::truncate_for_log;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

/// Plain-text summary of a cycle.
pub struct SummaryText<'a>(pub &'a RunSummary);

impl fmt::Display for SummaryText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        writeln!(f, "Cycle started {}", s.started_at.to_rfc3339())?;
        if s.cancelled {
            writeln!(f, "  (stopped early)")?;
        }
        writeln!(
            f,
            "  queries: {} succeeded, {} skipped",
            s.queries_succeeded,
            s.queries_skipped()
        )?;
        writeln!(
            f,
            "  videos:  {} fetched, {} new, {} already known, {} below floor, {} skipped",
            s.fetched,
            s.new_count,
            s.duplicate_count,
            s.below_floor_count,
            s.skipped_records.len()
        )?;

        for skipped in &s.skipped_queries {
            writeln!(f, "  skipped {} ({}): {}", skipped.query, skipped.reason, skipped.detail)?;
        }
        for skipped in &s.skipped_records {
            writeln!(f, "  dropped video {:?} from {}: {}", skipped.video_id, skipped.query, skipped.reason)?;
        }

        if !s.categories.is_empty() {
            let categories = s
                .categories
                .iter()
                .map(|(name, count)| format!("{name}={count}"))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "  categories: {categories}")?;
        }

        if !s.top_new.is_empty() {
            writeln!(f, "  top new videos:")?;
            for record in &s.top_new {
                writeln!(f, "    {}", RecordLine(record))?;
            }
        }
        Ok(())
    }
}

/// `score  id  [tags]  title` on a single line.
pub struct RecordLine<'a>(pub &'a VideoRecord);

impl fmt::Display for RecordLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.0;
        let tags = r.categories.iter().cloned().collect::<Vec<_>>().join(",");
        write!(
            f,
            "{:>3}  {}  [{}]  {}",
            r.relevance_score,
            r.id,
            tags,
            truncate_for_log(&r.title, 80)
        )
    }
}

/// One digest section per cycle.
struct DigestSection<'a> {
    summary: &'a RunSummary,
    notable: &'a [VideoRecord],
}

impl fmt::Display for DigestSection<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "## Cycle at {} UTC\n",
            self.summary.started_at.format("%H:%M:%S")
        )?;
        writeln!(
            f,
            "{} new videos, {} notable.\n",
            self.summary.new_count,
            self.notable.len()
        )?;
        for record in self.notable {
            let channel = if record.channel_title.is_empty() {
                &record.channel_id
            } else {
                &record.channel_title
            };
            write!(
                f,
                "- **{}** [{}]({}) <small>{}</small>",
                record.relevance_score,
                Escaped(&record.title),
                record.watch_url(),
                Escaped(channel)
            )?;
            if !record.categories.is_empty() {
                let tags = record
                    .categories
                    .iter()
                    .map(|c| format!("`{c}`"))
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(f, " {tags}")?;
            }
            writeln!(f)?;
        }
        writeln!(f)
    }
}

/// Inline text with Markdown punctuation backslash-escaped.
struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            if matches!(c, '\\' | '[' | ']' | '(' | ')' | '*' | '_' | '`' | '<' | '>') {
                f.write_char('\\')?;
            }
            f.write_char(c)?;
        }
        Ok(())
    }
}

/// Append the cycle's notable videos to the day's digest, creating it with a heading if needed.
#[instrument(level = "info", skip_all, fields(reports_dir = %reports_dir.display(), notable = notable.len()))]
pub async fn append_digest(
    reports_dir: &Path,
    summary: &RunSummary,
    notable: &[VideoRecord],
) -> Result<PathBuf, ReportError> {
    let date = summary.started_at.format("%Y-%m-%d").to_string();
    let path = reports_dir.join(format!("{date}.md"));

    fs::create_dir_all(reports_dir)
        .await
        .map_err(|e| ReportError::io(reports_dir, e))?;

    let mut text = String::new();
    if !fs::try_exists(&path).await.unwrap_or(false) {
        text.push_str(&format!("# AI coding videos discovered on {date}\n\n"));
    }
    text.push_str(&DigestSection { summary, notable }.to_string());

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| ReportError::io(&path, e))?;
    file.write_all(text.as_bytes())
        .await
        .map_err(|e| ReportError::io(&path, e))?;
    file.flush().await.map_err(|e| ReportError::io(&path, e))?;

    info!(path = %path.display(), "Updated digest");
    Ok(path)
}
