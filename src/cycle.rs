//! One discovery cycle: fetch every configured query, score, deduplicate and store.
//!
//! ```text
//! queries ──fetch──▶ RawVideo ──validate──▶ score ──floor──▶ upsert ──▶ RunSummary
//!    │                                                         │
//!    └─ fetch error: query skipped                             └─ store error: record skipped
//! ```
//!
//! A failing query or record never aborts the cycle. The only cycle-level
//! failure is being unable to flush the store at the end.

use crate::config::MonitorConfig;
use crate::fetcher::VideoSource;
use crate::models::{Query, RawVideo, RunSummary, SkippedQuery, SkippedRecord, VideoRecord};
use crate::outputs::ReportHook;
use crate::scorer::Scorer;
use crate::store::{StoreError, UpsertResult, VideoStore};
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, StreamExt};
use std::pin::pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{self, JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("store task failed: {0}")]
    Task(#[from] JoinError),
}

pub struct DiscoveryCycle<F, S, R> {
    fetcher: F,
    store: Arc<S>,
    scorer: Scorer,
    reporter: R,
}

impl<F, S, R> DiscoveryCycle<F, S, R>
where
    F: VideoSource,
    S: VideoStore + Send + Sync + 'static,
    R: ReportHook,
{
    pub fn new(fetcher: F, store: Arc<S>, scorer: Scorer, reporter: R) -> Self {
        Self {
            fetcher,
            store,
            scorer,
            reporter,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run every configured query once.
    ///
    /// Queries are fetched with up to `config.concurrency` requests in flight,
    /// but results are ingested one query at a time in configured order.
    /// `cancel` is checked before each query is started.
    #[instrument(level = "info", skip_all, fields(queries = config.queries.len()))]
    pub async fn run(
        &self,
        config: &MonitorConfig,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, CycleError> {
        let started_at = Utc::now();
        let published_after = started_at
            .checked_sub_signed(config.lookback())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let max_results = config.max_results_per_query;
        let mut summary = RunSummary::new(started_at);
        let mut inserted: Vec<VideoRecord> = Vec::new();

        info!(%published_after, concurrency = config.concurrency, "Starting discovery cycle");

        let mut fetches = pin!(stream::iter(config.queries.iter())
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|query| async move {
                let result = self.fetcher.search(query, published_after, max_results).await;
                (query, result)
            })
            .buffered(config.concurrency.max(1)));

        while let Some((query, result)) = fetches.next().await {
            summary.queries_issued += 1;
            match result {
                Ok(videos) => {
                    summary.queries_succeeded += 1;
                    summary.fetched += videos.len();
                    debug!(%query, count = videos.len(), "Query returned videos");
                    for raw in videos {
                        self.ingest(raw, query, config, &mut summary, &mut inserted)
                            .await;
                    }
                }
                Err(e) => {
                    warn!(%query, reason = %e.kind, error = %e.message, "Query failed; skipping");
                    summary.skipped_queries.push(SkippedQuery {
                        query: query.to_string(),
                        reason: e.kind,
                        detail: e.message,
                    });
                }
            }
        }

        if summary.queries_issued < config.queries.len() && cancel.is_cancelled() {
            warn!(
                issued = summary.queries_issued,
                configured = config.queries.len(),
                "Stop requested; remaining queries abandoned"
            );
            summary.cancelled = true;
        }

        let store = Arc::clone(&self.store);
        task::spawn_blocking(move || store.flush()).await??;
        summary.finish(&inserted, config.top_n, Utc::now());

        let notable: Vec<VideoRecord> = inserted
            .into_iter()
            .filter(|r| r.relevance_score >= config.notability_threshold)
            .collect();

        info!(
            succeeded = summary.queries_succeeded,
            skipped = summary.queries_skipped(),
            new = summary.new_count,
            duplicates = summary.duplicate_count,
            notable = notable.len(),
            "Discovery cycle finished"
        );

        if let Err(e) = self.reporter.report(&summary, &notable).await {
            warn!(error = %e, "Reporting failed; stored records are unaffected");
        }
        Ok(summary)
    }

    async fn ingest(
        &self,
        raw: RawVideo,
        query: &Query,
        config: &MonitorConfig,
        summary: &mut RunSummary,
        inserted: &mut Vec<VideoRecord>,
    ) {
        if let Err(reason) = raw.validate() {
            warn!(%query, %reason, "Dropping malformed video");
            summary.skipped_records.push(SkippedRecord {
                video_id: raw.id,
                query: query.to_string(),
                reason,
            });
            return;
        }

        if self.store.exists(&raw.id) {
            summary.duplicate_count += 1;
            return;
        }

        let relevance = self.scorer.score(&raw);
        if relevance.score < config.store_min_score {
            debug!(id = %raw.id, score = relevance.score, "Below storage floor");
            summary.below_floor_count += 1;
            return;
        }

        let record = VideoRecord::from_raw(raw, relevance, query, Utc::now());
        // Appends fsync, so they run off the async workers.
        let store = Arc::clone(&self.store);
        let pending = record.clone();
        let written = match task::spawn_blocking(move || store.upsert(pending)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("store task failed: {e}")),
        };
        match written {
            Ok(UpsertResult::Inserted) => {
                debug!(id = %record.id, score = record.relevance_score, "Stored new video");
                summary.new_count += 1;
                inserted.push(record);
            }
            Ok(UpsertResult::Duplicate) => summary.duplicate_count += 1,
            Err(reason) => {
                warn!(id = %record.id, error = %reason, "Store write failed; skipping video");
                summary.skipped_records.push(SkippedRecord {
                    video_id: record.id,
                    query: query.to_string(),
                    reason,
                });
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::fetcher::{FetchError, FetchErrorKind};
    use crate::store::{JsonlStore, MemoryStore};

    #[tokio::test]
    async fn test_new_video_is_inserted() {
        let q = Query::search("claude programming");
        let source = FakeSource::default().with(&q, Ok(vec![video("abc", "Claude AI coding tutorial")]));
        let cycle = harness(source, Arc::new(MemoryStore::new()));

        let summary = cycle.run(&config(vec![q]), &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.new_count, 1);
        assert_eq!(summary.duplicate_count, 0);
        let stored = cycle.store().get("abc").unwrap();
        assert!(stored.has_category("claude"));
        assert!(stored.relevance_score > 0);
        assert_eq!(stored.source_query, "search:claude programming");
    }

    #[tokio::test]
    async fn test_second_sighting_is_duplicate_and_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlStore::open(dir.path()).unwrap());
        let q = Query::search("claude programming");
        let cfg = config(vec![q.clone()]);

        let first = harness(
            FakeSource::default().with(&q, Ok(vec![video("abc", "Claude AI coding tutorial")])),
            Arc::clone(&store),
        );
        first.run(&cfg, &CancellationToken::new()).await.unwrap();
        let before = std::fs::read(dir.path().join("videos.jsonl")).unwrap();
        let record_before = store.get("abc").unwrap();

        // Same id, different text: the stored record must not change.
        let second = harness(
            FakeSource::default().with(&q, Ok(vec![video("abc", "Completely different title")])),
            Arc::clone(&store),
        );
        let summary = second.run(&cfg, &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.new_count, 0);
        assert_eq!(summary.duplicate_count, 1);
        assert_eq!(std::fs::read(dir.path().join("videos.jsonl")).unwrap(), before);
        assert_eq!(store.get("abc").unwrap(), record_before);
    }

    #[tokio::test]
    async fn test_rate_limited_query_is_skipped() {
        let queries = vec![
            Query::search("claude programming"),
            Query::search("cursor ai"),
            Query::channel("UCxyz"),
        ];
        let source = FakeSource::default()
            .with(&queries[0], Ok(vec![video("a1", "Claude AI coding tutorial")]))
            .with(&queries[1], Err(FetchError::rate_limited("quota exceeded")))
            .with(&queries[2], Ok(vec![video("c1", "Copilot review")]));
        let cycle = harness(source, Arc::new(MemoryStore::new()));

        let summary = cycle.run(&config(queries), &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.queries_issued, 3);
        assert_eq!(summary.queries_succeeded, 2);
        assert_eq!(summary.queries_skipped(), 1);
        assert_eq!(summary.skipped_queries[0].query, "search:cursor ai");
        assert_eq!(summary.skipped_queries[0].reason, FetchErrorKind::RateLimited);
        assert_eq!(summary.new_count, 2);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_duplicates_within_one_cycle() {
        let queries = vec![Query::search("claude"), Query::search("claude code")];
        let source = FakeSource::default()
            .with(&queries[0], Ok(vec![video("abc", "Claude AI coding tutorial")]))
            .with(&queries[1], Ok(vec![video("abc", "Claude AI coding tutorial")]));
        let cycle = harness(source, Arc::new(MemoryStore::new()));

        let summary = cycle.run(&config(queries), &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.new_count, 1);
        assert_eq!(summary.duplicate_count, 1);
        assert_eq!(cycle.store().get("abc").unwrap().source_query, "search:claude");
    }

    #[tokio::test]
    async fn test_bad_records_are_skipped_and_counted() {
        let q = Query::search("ai coding");
        let source = FakeSource::default().with(
            &q,
            Ok(vec![
                video("", "no id"),
                video("bad", "Claude AI coding tutorial"),
                video("good", "Claude AI coding tutorial"),
            ]),
        );
        let store = Arc::new(FlakyStore {
            reject: "bad",
            ..Default::default()
        });
        let cycle = harness(source, store);

        let summary = cycle.run(&config(vec![q]), &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.new_count, 1);
        assert_eq!(summary.skipped_records.len(), 2);
        assert_eq!(summary.skipped_records[1].video_id, "bad");
        assert!(summary.skipped_records[1].reason.contains("disk full"));
        assert!(cycle.store().exists("good"));
    }

    #[tokio::test]
    async fn test_flush_failure_fails_cycle() {
        let q = Query::search("ai coding");
        let store = Arc::new(FlakyStore {
            fail_flush: true,
            ..Default::default()
        });
        let cycle = harness(FakeSource::default(), store);

        let err = cycle.run(&config(vec![q]), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CycleError::Store(_)));
        assert!(cycle.reporter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_floor() {
        let q = Query::search("ai");
        let source = FakeSource::default().with(
            &q,
            Ok(vec![video("hit", "Claude AI coding tutorial"), video("miss", "Cooking pasta")]),
        );
        let cycle = harness(source, Arc::new(MemoryStore::new()));
        let mut cfg = config(vec![q]);
        cfg.store_min_score = 1;

        let summary = cycle.run(&cfg, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.new_count, 1);
        assert_eq!(summary.below_floor_count, 1);
        assert!(!cycle.store().exists("miss"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_store_writes_off_the_workers() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonlStore::open(dir.path()).unwrap());
        let q = Query::search("claude programming");
        let videos = (0..5)
            .map(|i| video(&format!("v{i}"), "Claude AI coding tutorial"))
            .collect();
        let cycle = harness(FakeSource::default().with(&q, Ok(videos)), Arc::clone(&store));

        let summary = cycle.run(&config(vec![q]), &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.new_count, 5);
        drop(cycle);
        drop(store);
        assert_eq!(JsonlStore::open(dir.path()).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_out_of_range_lookback_does_not_panic() {
        let q = Query::search("ai coding");
        let cycle = harness(
            FakeSource::default().with(&q, Ok(vec![video("abc", "AI coding")])),
            Arc::new(MemoryStore::new()),
        );
        let mut cfg = config(vec![q]);
        cfg.lookback_days = u32::MAX;

        let summary = cycle.run(&cfg, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.new_count, 1);
    }

    #[tokio::test]
    async fn test_hook_receives_only_notable_records() {
        let q = Query::search("ai");
        let source = FakeSource::default().with(
            &q,
            Ok(vec![
                video("hit", "Claude AI coding tutorial"),
                video("meh", "Cooking pasta"),
            ]),
        );
        let cycle = harness(source, Arc::new(MemoryStore::new()));
        let mut cfg = config(vec![q]);
        cfg.notability_threshold = 1;

        let summary = cycle.run(&cfg, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.new_count, 2);

        let calls = cycle.reporter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let notable: Vec<&str> = calls[0].1.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(notable, vec!["hit"]);
        assert_eq!(calls[0].0, summary);
    }

    #[tokio::test]
    async fn test_hook_failure_does_not_fail_cycle() {
        let q = Query::search("ai");
        let source = FakeSource::default().with(&q, Ok(vec![video("abc", "Claude AI coding tutorial")]));
        let hook = RecordingHook {
            fail: true,
            ..Default::default()
        };
        let cycle = DiscoveryCycle::new(source, Arc::new(MemoryStore::new()), scorer(), hook);

        let summary = cycle.run(&config(vec![q]), &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.new_count, 1);
        assert!(cycle.store().exists("abc"));
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let cycle = harness(FakeSource::default(), Arc::new(MemoryStore::new()));

        let summary = cycle
            .run(&config(vec![Query::search("a"), Query::search("b")]), &token)
            .await
            .unwrap();
        assert_eq!(summary.queries_issued, 0);
        assert!(summary.cancelled);
        assert!(cycle.fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_queries() {
        let token = CancellationToken::new();
        let source = FakeSource {
            cancel_after: Some((1, token.clone())),
            ..Default::default()
        };
        let cycle = harness(source, Arc::new(MemoryStore::new()));
        let queries = vec![Query::search("a"), Query::search("b"), Query::search("c")];

        let summary = cycle.run(&config(queries), &token).await.unwrap();
        assert_eq!(cycle.fetcher.calls(), vec!["search:a"]);
        assert_eq!(summary.queries_issued, 1);
        assert_eq!(summary.queries_succeeded, 1);
        assert!(summary.cancelled);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_keep_order() {
        let queries: Vec<Query> = (0..5).map(|i| Query::search(format!("q{i}"))).collect();
        let mut source = FakeSource::default();
        for (i, q) in queries.iter().enumerate() {
            source = source.with(q, Ok(vec![video(&format!("v{i}"), "Claude AI coding tutorial")]));
        }
        let cycle = harness(source, Arc::new(MemoryStore::new()));
        let mut cfg = config(queries);
        cfg.concurrency = 3;

        let summary = cycle.run(&cfg, &CancellationToken::new()).await.unwrap();
        assert_eq!(summary.queries_succeeded, 5);
        assert_eq!(summary.new_count, 5);
        assert_eq!(cycle.store().get("v3").unwrap().source_query, "search:q3");
    }
}
