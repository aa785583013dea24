//! Append-only JSON Lines video store.
//!
//! Every accepted write becomes one line in `<data_dir>/videos.jsonl`:
//!
//! ```text
//! {"op":"insert","record":{"id":"abc","title":"…",…}}
//! {"op":"rescore","id":"abc","relevance_score":72,"categories":["claude"]}
//! ```
//!
//! Opening the store replays the log into a [`RecordIndex`]. Lines are only
//! ever appended, and each append is synced to disk before the index is
//! updated, so a record becomes visible only once it is durable.
//!
//! # Crash recovery
//!
//! A final line without its trailing newline is the signature of a write cut
//! short by a crash. If it does not parse it is dropped (and truncated away);
//! any other unparsable line is reported as [`StoreError::Corrupt`].

use super::{RecordCursor, RecordIndex, RescoreOutcome, StoreError, UpsertResult, VideoFilter, VideoStore};
use crate::models::VideoRecord;
use crate::scorer::Scorer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, instrument, warn};

const LOG_FILE: &str = "videos.jsonl";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogEntry {
    Insert {
        record: VideoRecord,
    },
    Rescore {
        id: String,
        relevance_score: u8,
        categories: BTreeSet<String>,
    },
}

#[derive(Debug)]
struct Inner {
    index: RecordIndex,
    file: File,
    /// Length of the log up to the last complete entry.
    len: u64,
}

#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl JsonlStore {
    /// Open (or create) the store in `data_dir`.
    #[instrument(level = "info", skip_all, fields(data_dir = %data_dir.as_ref().display()))]
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).map_err(|source| StoreError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let path = data_dir.join(LOG_FILE);

        let replay = if path.exists() {
            replay(&path)?
        } else {
            Replay::default()
        };

        if replay.torn_tail {
            warn!(path = %path.display(), valid_bytes = replay.len, "Dropping incomplete trailing entry");
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|source| io_err(&path, source))?;
            file.set_len(replay.len).map_err(|source| io_err(&path, source))?;
            file.sync_all().map_err(|source| io_err(&path, source))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| io_err(&path, source))?;

        let mut len = replay.len;
        if replay.missing_newline {
            file.write_all(b"\n").map_err(|source| io_err(&path, source))?;
            file.sync_data().map_err(|source| io_err(&path, source))?;
            len += 1;
        }

        info!(
            path = %path.display(),
            records = replay.index.len(),
            entries = replay.entries,
            "Opened video store"
        );

        Ok(Self {
            path,
            inner: RwLock::new(Inner {
                index: replay.index,
                file,
                len,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the log with exactly one insert entry per record.
    ///
    /// The new log is written next to the old one and renamed over it, so an
    /// interrupted compaction leaves the original untouched.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub fn compact(&self) -> Result<usize, StoreError> {
        let mut inner = self.write();
        let tmp_path = self.path.with_extension("jsonl.tmp");

        let mut buf = Vec::new();
        let records = inner.index.chronological();
        for record in &records {
            let entry = LogEntry::Insert {
                record: VideoRecord::clone(record),
            };
            serde_json::to_writer(&mut buf, &entry).map_err(|source| StoreError::Serialize {
                id: record.id.clone(),
                source,
            })?;
            buf.push(b'\n');
        }

        let mut tmp = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp_path)
            .map_err(|source| io_err(&tmp_path, source))?;
        tmp.write_all(&buf).map_err(|source| io_err(&tmp_path, source))?;
        tmp.sync_all().map_err(|source| io_err(&tmp_path, source))?;
        drop(tmp);

        // Opened before the rename so `inner.file` never outlives the old log.
        let file = OpenOptions::new()
            .append(true)
            .open(&tmp_path)
            .map_err(|source| io_err(&tmp_path, source))?;
        fs::rename(&tmp_path, &self.path).map_err(|source| io_err(&self.path, source))?;

        inner.file = file;
        inner.len = buf.len() as u64;

        info!(records = records.len(), bytes = inner.len, "Compacted video store");
        Ok(records.len())
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        // The index is only updated after a successful append, so a panic in
        // another holder cannot leave it inconsistent with the log.
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one entry and sync it. On failure the log is cut back to its
    /// previous length so the next append starts on a clean line.
    fn append(&self, inner: &mut Inner, entry: &LogEntry, id: &str) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry).map_err(|source| StoreError::Serialize {
            id: id.to_string(),
            source,
        })?;
        line.push(b'\n');

        let written = inner
            .file
            .write_all(&line)
            .and_then(|_| inner.file.sync_data());
        if let Err(source) = written {
            if let Err(e) = inner.file.set_len(inner.len) {
                warn!(path = %self.path.display(), error = %e, "Failed to roll back partial append");
            }
            return Err(io_err(&self.path, source));
        }
        inner.len += line.len() as u64;
        Ok(())
    }
}

impl VideoStore for JsonlStore {
    fn exists(&self, id: &str) -> bool {
        self.read().index.contains(id)
    }

    fn get(&self, id: &str) -> Option<Arc<VideoRecord>> {
        self.read().index.get(id)
    }

    fn upsert(&self, record: VideoRecord) -> Result<UpsertResult, StoreError> {
        let mut inner = self.write();
        if inner.index.contains(&record.id) {
            debug!(id = %record.id, "Duplicate video");
            return Ok(UpsertResult::Duplicate);
        }

        let id = record.id.clone();
        let entry = LogEntry::Insert { record };
        self.append(&mut inner, &entry, &id)?;
        if let LogEntry::Insert { record } = entry {
            inner.index.insert(record);
        }
        Ok(UpsertResult::Inserted)
    }

    fn query(&self, filter: &VideoFilter) -> Result<RecordCursor, StoreError> {
        Ok(self.read().index.select(filter))
    }

    fn len(&self) -> usize {
        self.read().index.len()
    }

    fn flush(&self) -> Result<(), StoreError> {
        let inner = self.write();
        inner
            .file
            .sync_all()
            .map_err(|source| io_err(&self.path, source))
    }

    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    fn rescore(&self, scorer: &Scorer) -> Result<RescoreOutcome, StoreError> {
        let mut inner = self.write();
        let examined = inner.index.len();
        let plan = inner.index.rescore_plan(scorer);

        let mut updated = 0;
        for (id, relevance) in plan {
            let entry = LogEntry::Rescore {
                id: id.clone(),
                relevance_score: relevance.score,
                categories: relevance.tags,
            };
            self.append(&mut inner, &entry, &id)?;
            if let LogEntry::Rescore {
                relevance_score,
                categories,
                ..
            } = entry
            {
                inner.index.apply_rescore(&id, relevance_score, categories);
            }
            updated += 1;
        }

        info!(examined, updated, "Rescored stored videos");
        Ok(RescoreOutcome { examined, updated })
    }
}

#[derive(Debug, Default)]
struct Replay {
    index: RecordIndex,
    entries: usize,
    len: u64,
    torn_tail: bool,
    missing_newline: bool,
}

fn replay(path: &Path) -> Result<Replay, StoreError> {
    let file = File::open(path).map_err(|source| io_err(path, source))?;
    let mut reader = BufReader::new(file);
    let mut out = Replay::default();
    let mut line = Vec::new();
    let mut line_no = 0usize;

    loop {
        line.clear();
        // Raw bytes: a torn tail may end inside a multi-byte character.
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|source| io_err(path, source))?;
        if n == 0 {
            break;
        }
        line_no += 1;
        let complete = line.ends_with(b"\n");
        let text = line.trim_ascii();

        if text.is_empty() {
            out.len += n as u64;
            continue;
        }

        match serde_json::from_slice::<LogEntry>(text) {
            Ok(entry) => {
                apply(&mut out.index, entry, line_no);
                out.entries += 1;
                out.len += n as u64;
                out.missing_newline = !complete;
            }
            Err(_) if !complete => {
                out.torn_tail = true;
                break;
            }
            Err(source) => {
                return Err(StoreError::Corrupt {
                    path: path.to_path_buf(),
                    line: line_no,
                    source,
                });
            }
        }
    }
    Ok(out)
}

fn apply(index: &mut RecordIndex, entry: LogEntry, line_no: usize) {
    match entry {
        LogEntry::Insert { record } => {
            let id = record.id.clone();
            if !index.insert(record) {
                warn!(%id, line = line_no, "Ignoring repeated insert entry");
            }
        }
        LogEntry::Rescore {
            id,
            relevance_score,
            categories,
        } => {
            if !index.apply_rescore(&id, relevance_score, categories) {
                warn!(%id, line = line_no, "Ignoring rescore entry for unknown video");
            }
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryConfig, KeywordPattern, ScoringConfig};
    use crate::store::test_support::record;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> JsonlStore {
        JsonlStore::open(dir.path()).unwrap()
    }

    fn log_text(dir: &TempDir) -> String {
        fs::read_to_string(dir.path().join(LOG_FILE)).unwrap()
    }

    #[test]
    fn test_upsert_then_duplicate() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        assert!(!store.exists("abc"));
        assert_eq!(store.upsert(record("abc", 40, &["claude"], 0)).unwrap(), UpsertResult::Inserted);
        assert!(store.exists("abc"));

        let before = log_text(&dir);
        assert_eq!(
            store.upsert(record("abc", 99, &["copilot"], 5)).unwrap(),
            UpsertResult::Duplicate
        );
        assert_eq!(log_text(&dir), before);
        assert_eq!(store.get("abc").unwrap().relevance_score, 40);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.upsert(record("a", 10, &[], 0)).unwrap();
            store.upsert(record("b", 20, &["tools"], 1)).unwrap();
            store.flush().unwrap();
        }
        let store = open(&dir);
        assert_eq!(store.len(), 2);
        assert!(store.exists("a"));
        assert_eq!(*store.get("b").unwrap(), record("b", 20, &["tools"], 1));
        assert_eq!(
            store.upsert(record("a", 10, &[], 0)).unwrap(),
            UpsertResult::Duplicate
        );
    }

    #[test]
    fn test_query_on_file_store() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.upsert(record("old", 90, &["claude"], 0)).unwrap();
        store.upsert(record("new", 30, &["claude"], 60)).unwrap();
        store.upsert(record("mid", 70, &[], 30)).unwrap();

        let ids: Vec<String> = store
            .query(&VideoFilter::new().min_score(50))
            .unwrap()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, vec!["mid", "old"]);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.upsert(record("a", 10, &[], 0)).unwrap();
        }
        let path = dir.path().join(LOG_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"op":"insert","record":{"id":"b","ti"#).unwrap();
        drop(file);

        let store = open(&dir);
        assert_eq!(store.len(), 1);
        store.upsert(record("c", 10, &[], 2)).unwrap();
        drop(store);

        let store = open(&dir);
        assert!(store.exists("a"));
        assert!(!store.exists("b"));
        assert!(store.exists("c"));
    }

    #[test]
    fn test_tail_torn_inside_multibyte_char_is_dropped() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.upsert(record("a", 10, &[], 0)).unwrap();
        }
        let mut rocket = record("b", 10, &[], 1);
        rocket.title = "Claude \u{1F680} tutorial".to_string();
        let line = serde_json::to_vec(&LogEntry::Insert { record: rocket }).unwrap();
        let emoji = "\u{1F680}".as_bytes();
        let cut = line
            .windows(emoji.len())
            .position(|w| w == emoji)
            .unwrap()
            + 2;

        let path = dir.path().join(LOG_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&line[..cut]).unwrap();
        drop(file);

        let store = open(&dir);
        assert_eq!(store.len(), 1);
        assert!(!store.exists("b"));
        store.upsert(record("c", 10, &[], 2)).unwrap();
        drop(store);

        let store = open(&dir);
        assert!(store.exists("a") && store.exists("c"));
        assert!(log_text(&dir).lines().all(|l| !l.contains("Claude")));
    }

    #[test]
    fn test_non_ascii_records_replay() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            let mut r = record("jp", 10, &[], 0);
            r.title = "Claude \u{1F680} プログラミング".to_string();
            store.upsert(r).unwrap();
        }
        let store = open(&dir);
        assert_eq!(store.get("jp").unwrap().title, "Claude \u{1F680} プログラミング");
    }

    #[test]
    fn test_corrupt_line_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE);
        let good = serde_json::to_string(&LogEntry::Insert {
            record: record("a", 1, &[], 0),
        })
        .unwrap();
        fs::write(&path, format!("{good}\nnot json\n{good}\n")).unwrap();

        match JsonlStore::open(dir.path()) {
            Err(StoreError::Corrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corruption error, got {other:?}"),
        }
    }

    #[test]
    fn test_complete_tail_without_newline_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOG_FILE);
        let good = serde_json::to_string(&LogEntry::Insert {
            record: record("a", 1, &[], 0),
        })
        .unwrap();
        fs::write(&path, &good).unwrap();

        let store = open(&dir);
        store.upsert(record("b", 1, &[], 1)).unwrap();
        drop(store);

        let store = open(&dir);
        assert!(store.exists("a") && store.exists("b"));
    }

    fn rescoring_table() -> ScoringConfig {
        let mut categories = BTreeMap::new();
        categories.insert(
            "video".to_string(),
            CategoryConfig {
                threshold: 0,
                keywords: vec![KeywordPattern::token("video", 1)],
            },
        );
        ScoringConfig {
            title_multiplier: 1,
            description_multiplier: 1,
            normalization: 1.0,
            generic: vec![],
            categories,
        }
    }

    #[test]
    fn test_rescore_appends_and_replays() {
        let dir = TempDir::new().unwrap();
        let scorer = Scorer::new(&rescoring_table()).unwrap();
        {
            let store = open(&dir);
            // Title "Video a" scores 100 and tags "video" under the test table.
            store.upsert(record("a", 5, &[], 0)).unwrap();
            let mut already = record("b", 100, &["video"], 1);
            already.title = "Video b".to_string();
            store.upsert(already).unwrap();

            let outcome = store.rescore(&scorer).unwrap();
            assert_eq!(outcome, RescoreOutcome { examined: 2, updated: 1 });
            assert_eq!(store.get("a").unwrap().relevance_score, 100);
        }

        assert_eq!(log_text(&dir).lines().count(), 3);
        let store = open(&dir);
        let a = store.get("a").unwrap();
        assert_eq!(a.relevance_score, 100);
        assert!(a.has_category("video"));
        assert_eq!(a.discovered_at, record("a", 5, &[], 0).discovered_at);
    }

    #[test]
    fn test_compact_rewrites_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let scorer = Scorer::new(&rescoring_table()).unwrap();
        let store = open(&dir);
        store.upsert(record("a", 5, &[], 0)).unwrap();
        store.upsert(record("b", 5, &[], 1)).unwrap();
        store.rescore(&scorer).unwrap();
        assert_eq!(log_text(&dir).lines().count(), 4);

        assert_eq!(store.compact().unwrap(), 2);
        assert_eq!(log_text(&dir).lines().count(), 2);
        assert!(!dir.path().join("videos.jsonl.tmp").exists());

        store.upsert(record("c", 5, &[], 2)).unwrap();
        assert_eq!(log_text(&dir).lines().count(), 3);
        drop(store);

        let store = open(&dir);
        assert_eq!(store.len(), 3);
        assert_eq!(store.get("b").unwrap().relevance_score, 100);
    }

    #[test]
    fn test_concurrent_same_id_first_writer_wins() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open(&dir));

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.upsert(record("same", i, &[], 0)).unwrap())
            })
            .collect();
        let results: Vec<UpsertResult> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| **r == UpsertResult::Inserted).count(), 1);
        assert_eq!(log_text(&dir).lines().count(), 1);
        drop(store);
        assert_eq!(open(&dir).len(), 1);
    }
}
