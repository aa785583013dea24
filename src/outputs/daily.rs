//! Per-day report built from stored records.
//!
//! A day is the UTC calendar day of `discovered_at`, so the report for a
//! given date is stable no matter where or when it is generated.

use crate::models::{VideoRecord, category_counts, top_by_score};
use crate::store::{StoreError, VideoFilter, VideoStore};
use crate::utils::day_bounds;
use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Number of records listed under `top_videos`.
pub const TOP_VIDEOS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    /// Videos first discovered on `date`.
    pub total_videos: usize,
    /// Videos per category tag.
    pub categories: BTreeMap<String, usize>,
    /// Best-scoring videos of the day, best first.
    pub top_videos: Vec<VideoRecord>,
    /// Distinct channel names, sorted.
    pub channels: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl DailyReport {
    pub fn empty(date: NaiveDate, generated_at: DateTime<Utc>) -> Self {
        Self {
            date,
            total_videos: 0,
            categories: BTreeMap::new(),
            top_videos: Vec::new(),
            channels: Vec::new(),
            generated_at,
        }
    }
}

/// Summarize everything discovered on `date`.
#[instrument(level = "info", skip(store))]
pub fn build_daily_report<S>(
    store: &S,
    date: NaiveDate,
    generated_at: DateTime<Utc>,
) -> Result<DailyReport, StoreError>
where
    S: VideoStore + ?Sized,
{
    let (start, end) = day_bounds(date);
    let records: Vec<_> = store
        .query(&VideoFilter::new().discovered_between(start, end))?
        .collect();
    debug!(count = records.len(), "Loaded records for day");

    let categories = category_counts(records.iter().map(|r| &**r));
    let top_videos = top_by_score(records.iter().map(|r| &**r), TOP_VIDEOS);

    let channels = records
        .iter()
        .map(|r| {
            if r.channel_title.is_empty() {
                r.channel_id.clone()
            } else {
                r.channel_title.clone()
            }
        })
        .filter(|c| !c.is_empty())
        .sorted()
        .dedup()
        .collect();

    Ok(DailyReport {
        date,
        total_videos: records.len(),
        categories,
        top_videos,
        channels,
        generated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::test_support::{base_time, record};

    #[test]
    fn test_report_covers_only_that_day() {
        let store = MemoryStore::new();
        store.upsert(record("a", 40, &["claude"], 0)).unwrap();
        store.upsert(record("b", 90, &["claude", "tutorial"], 60)).unwrap();
        let mut other = record("c", 70, &["copilot"], 0);
        other.channel_title = "Other".to_string();
        store.upsert(other).unwrap();
        // 12:00 + 13h is the next UTC day.
        store.upsert(record("late", 100, &["tools"], 13 * 60)).unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();
        let report = build_daily_report(&store, date, base_time()).unwrap();

        assert_eq!(report.total_videos, 3);
        let top: Vec<&str> = report.top_videos.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(top, vec!["b", "c", "a"]);
        assert_eq!(report.categories.get("claude"), Some(&2));
        assert_eq!(report.categories.get("tools"), None);
        assert_eq!(report.channels, vec!["Channel", "Other"]);
    }

    #[test]
    fn test_top_videos_is_capped() {
        let store = MemoryStore::new();
        for i in 0..15u8 {
            store.upsert(record(&format!("v{i:02}"), i, &[], i as i64)).unwrap();
        }
        let date = NaiveDate::from_ymd_opt(2025, 5, 6).unwrap();
        let report = build_daily_report(&store, date, base_time()).unwrap();

        assert_eq!(report.total_videos, 15);
        assert_eq!(report.top_videos.len(), TOP_VIDEOS);
        assert_eq!(report.top_videos[0].id, "v14");
    }

    #[test]
    fn test_empty_day() {
        let store = MemoryStore::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let report = build_daily_report(&store, date, base_time()).unwrap();
        assert_eq!(report, DailyReport::empty(date, base_time()));
    }
}
