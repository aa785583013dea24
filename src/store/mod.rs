//! Deduplicating video store.
//!
//! The [`VideoStore`] trait is the only way the rest of the application
//! touches persisted videos. It guarantees:
//!
//! - one record per video id; the first insert wins and later upserts of the
//!   same id report [`UpsertResult::Duplicate`] without touching the record
//! - an `Inserted` result is durable before `upsert` returns
//! - readers never observe a partially written record
//!
//! # Implementations
//!
//! | Store | Module | Persistence |
//! |-------|--------|-------------|
//! | [`JsonlStore`] | [`jsonl`] | Append-only JSON Lines log on disk |
//! | [`MemoryStore`] | [`memory`] | None (tests, dry runs) |
//!
//! Both share the in-memory [`RecordIndex`], which answers `exists`, `get`
//! and `query` without I/O.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

use crate::models::VideoRecord;
use crate::scorer::{Relevance, Scorer};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt store entry at {path}:{line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize record {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of [`VideoStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    Inserted,
    Duplicate,
}

/// Counts reported by a rescore pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescoreOutcome {
    pub examined: usize,
    pub updated: usize,
}

pub trait VideoStore: Send + Sync {
    /// Whether a record with this id has been stored.
    fn exists(&self, id: &str) -> bool;

    fn get(&self, id: &str) -> Option<Arc<VideoRecord>>;

    /// Insert a record unless its id is already known.
    fn upsert(&self, record: VideoRecord) -> Result<UpsertResult, StoreError>;

    /// Records matching `filter`, newest discovery first.
    fn query(&self, filter: &VideoFilter) -> Result<RecordCursor, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every accepted write durable.
    fn flush(&self) -> Result<(), StoreError>;

    /// Recompute score and tags of every record from its stored text.
    ///
    /// This is the only operation that changes an existing record.
    fn rescore(&self, scorer: &Scorer) -> Result<RescoreOutcome, StoreError>;
}

/// Selection criteria for [`VideoStore::query`]. All criteria are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoFilter {
    pub min_score: Option<u8>,
    pub category: Option<String>,
    /// Inclusive lower bound on discovery time.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on discovery time.
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl VideoFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_score(mut self, score: u8) -> Self {
        self.min_score = Some(score);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn discovered_between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &VideoRecord) -> bool {
        if let Some(min) = self.min_score {
            if record.relevance_score < min {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if !record.has_category(category) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.discovered_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.discovered_at >= until {
                return false;
            }
        }
        true
    }
}

/// Finite, restartable sequence of query results.
///
/// The cursor holds a snapshot of shared record handles taken when the query
/// ran; iterating never touches the store again. Clone it or call
/// [`RecordCursor::rewind`] to walk the results a second time.
#[derive(Debug, Clone)]
pub struct RecordCursor {
    records: Arc<[Arc<VideoRecord>]>,
    pos: usize,
}

impl RecordCursor {
    fn new(records: Vec<Arc<VideoRecord>>) -> Self {
        Self {
            records: records.into(),
            pos: 0,
        }
    }

    /// Total number of results, independent of the current position.
    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for RecordCursor {
    type Item = Arc<VideoRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.records.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.records.len() - self.pos;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RecordCursor {}

/// In-memory id index shared by the store implementations.
#[derive(Debug, Default)]
pub struct RecordIndex {
    records: HashMap<String, Arc<VideoRecord>>,
}

impl RecordIndex {
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<VideoRecord>> {
        self.records.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Insert a record for an unknown id. Returns false, and keeps the
    /// existing record, when the id is already present.
    pub fn insert(&mut self, record: VideoRecord) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.records.insert(record.id.clone(), Arc::new(record));
        true
    }

    /// Replace score and tags of an existing record.
    pub fn apply_rescore(&mut self, id: &str, score: u8, categories: BTreeSet<String>) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                let record = Arc::make_mut(record);
                record.relevance_score = score;
                record.categories = categories;
                true
            }
            None => false,
        }
    }

    pub fn select(&self, filter: &VideoFilter) -> RecordCursor {
        let mut selected: Vec<Arc<VideoRecord>> = self
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            b.discovered_at
                .cmp(&a.discovered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            selected.truncate(limit);
        }
        RecordCursor::new(selected)
    }

    /// Records whose recomputed relevance differs from what is stored.
    pub fn rescore_plan(&self, scorer: &Scorer) -> Vec<(String, Relevance)> {
        let mut changes: Vec<(String, Relevance)> = self
            .records
            .values()
            .filter_map(|record| {
                let relevance = scorer.score_text(&record.title, &record.description);
                let changed = relevance.score != record.relevance_score
                    || relevance.tags != record.categories;
                changed.then(|| (record.id.clone(), relevance))
            })
            .collect();
        changes.sort_by(|a, b| a.0.cmp(&b.0));
        changes
    }

    /// All records, oldest discovery first.
    pub fn chronological(&self) -> Vec<Arc<VideoRecord>> {
        let mut all: Vec<Arc<VideoRecord>> = self.records.values().cloned().collect();
        all.sort_by(|a, b| {
            a.discovered_at
                .cmp(&b.discovered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::models::VideoRecord;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 6, 12, 0, 0).unwrap()
    }

    /// A record discovered `minutes` after [`base_time`].
    pub fn record(id: &str, score: u8, categories: &[&str], minutes: i64) -> VideoRecord {
        VideoRecord {
            id: id.to_string(),
            title: format!("Video {id}"),
            description: String::new(),
            channel_id: "UC123".to_string(),
            channel_title: "Channel".to_string(),
            published_at: Some(base_time() - Duration::days(1)),
            discovered_at: base_time() + Duration::minutes(minutes),
            relevance_score: score,
            categories: categories.iter().map(|c| c.to_string()).collect(),
            source_query: "search:ai coding".to_string(),
        }
    }
}
