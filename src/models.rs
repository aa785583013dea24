//! Data models shared by the discovery pipeline.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Query`]: One configured channel or search term
//! - [`RawVideo`]: A search result as returned by the video platform
//! - [`VideoRecord`]: A scored, persisted video
//! - [`RunSummary`]: The outcome of one discovery cycle
//!
//! Timestamps are always UTC. Category tags are kept in a `BTreeSet` so the
//! serialized form of a record is stable between runs.

use crate::fetcher::FetchErrorKind;
use crate::scorer::Relevance;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Whether a query targets a channel's uploads or a free-text search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Channel,
    Search,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::Channel => f.write_str("channel"),
            QueryKind::Search => f.write_str("search"),
        }
    }
}

/// A single entry of the query configuration.
///
/// Displayed as `kind:value`, e.g. `search:claude programming`. That string is
/// also what ends up in [`VideoRecord::source_query`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub kind: QueryKind,
    pub value: String,
}

impl Query {
    pub fn search(term: impl Into<String>) -> Self {
        Self {
            kind: QueryKind::Search,
            value: term.into(),
        }
    }

    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self {
            kind: QueryKind::Channel,
            value: channel_id.into(),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// A video as returned by the fetcher, before scoring.
///
/// Only `id` is mandatory; every text field may legitimately be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawVideo {
    /// Platform video id.
    pub id: String,
    pub title: String,
    pub description: String,
    pub channel_id: String,
    pub channel_title: String,
    /// Publication time reported by the platform, when known.
    pub published_at: Option<DateTime<Utc>>,
    /// Uploader-supplied tags. Informational only, never scored.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RawVideo {
    /// Check the fields the pipeline cannot do without.
    ///
    /// Returns a human-readable reason when the record must be skipped.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("video id is missing".to_string());
        }
        if self.id.chars().any(char::is_whitespace) {
            return Err(format!("video id {:?} contains whitespace", self.id));
        }
        Ok(())
    }
}

/// A scored video as kept by the store.
///
/// `id` and `discovered_at` never change once the record exists. Score and
/// categories only change through an explicit rescore pass, which is why the
/// raw title and description are retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub channel_id: String,
    #[serde(default)]
    pub channel_title: String,
    pub published_at: Option<DateTime<Utc>>,
    /// When this system first saw the video.
    pub discovered_at: DateTime<Utc>,
    /// Relevance score in `0..=100`.
    pub relevance_score: u8,
    /// Matched category tags.
    pub categories: BTreeSet<String>,
    /// The query that produced the first sighting, as `kind:value`.
    pub source_query: String,
}

impl VideoRecord {
    /// Build a record from a fetched video and its relevance.
    pub fn from_raw(
        raw: RawVideo,
        relevance: Relevance,
        query: &Query,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: raw.id,
            title: raw.title,
            description: raw.description,
            channel_id: raw.channel_id,
            channel_title: raw.channel_title,
            published_at: raw.published_at,
            discovered_at,
            relevance_score: relevance.score,
            categories: relevance.tags,
            source_query: query.to_string(),
        }
    }

    /// Public watch page of the video.
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

/// A query that produced no results this cycle because fetching failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedQuery {
    pub query: String,
    pub reason: FetchErrorKind,
    pub detail: String,
}

/// A fetched video that could not be scored or stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub video_id: String,
    pub query: String,
    pub reason: String,
}

/// Outcome of one discovery cycle.
///
/// Produced once per cycle and handed to the report hook; nothing in the
/// pipeline persists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Queries whose fetch completed, successfully or not.
    pub queries_issued: usize,
    pub queries_succeeded: usize,
    pub skipped_queries: Vec<SkippedQuery>,
    /// Raw results returned by all successful queries.
    pub fetched: usize,
    pub new_count: usize,
    pub duplicate_count: usize,
    /// Fetched videos scored below the storage floor.
    pub below_floor_count: usize,
    pub skipped_records: Vec<SkippedRecord>,
    /// Set when a stop signal ended the cycle before every query ran.
    pub cancelled: bool,
    /// Category tag counts across newly inserted records.
    pub categories: BTreeMap<String, usize>,
    /// Highest-scoring newly inserted records, best first.
    pub top_new: Vec<VideoRecord>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            queries_issued: 0,
            queries_succeeded: 0,
            skipped_queries: Vec::new(),
            fetched: 0,
            new_count: 0,
            duplicate_count: 0,
            below_floor_count: 0,
            skipped_records: Vec::new(),
            cancelled: false,
            categories: BTreeMap::new(),
            top_new: Vec::new(),
        }
    }

    pub fn queries_skipped(&self) -> usize {
        self.skipped_queries.len()
    }

    /// Close the summary: tally categories and keep the `top_n` best new records.
    pub fn finish(&mut self, inserted: &[VideoRecord], top_n: usize, finished_at: DateTime<Utc>) {
        self.categories = category_counts(inserted);
        self.top_new = top_by_score(inserted, top_n);
        self.finished_at = Some(finished_at);
    }
}

/// How many of `records` carry each category tag.
pub fn category_counts<'a>(records: impl IntoIterator<Item = &'a VideoRecord>) -> BTreeMap<String, usize> {
    records
        .into_iter()
        .flat_map(|r| r.categories.iter().cloned())
        .counts()
        .into_iter()
        .collect()
}

/// The `n` highest-scoring records, best first. Ties go to the smaller id.
pub fn top_by_score<'a>(records: impl IntoIterator<Item = &'a VideoRecord>, n: usize) -> Vec<VideoRecord> {
    records
        .into_iter()
        .sorted_by(|a, b| {
            b.relevance_score
                .cmp(&a.relevance_score)
                .then_with(|| a.id.cmp(&b.id))
        })
        .take(n)
        .cloned()
        .collect()
}
