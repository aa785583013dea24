//! Volatile store with the same semantics as the file store.

use super::{RecordCursor, RecordIndex, RescoreOutcome, StoreError, UpsertResult, VideoFilter, VideoStore};
use crate::models::VideoRecord;
use crate::scorer::Scorer;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<RecordIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RecordIndex> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RecordIndex> {
        self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl VideoStore for MemoryStore {
    fn exists(&self, id: &str) -> bool {
        self.read().contains(id)
    }

    fn get(&self, id: &str) -> Option<Arc<VideoRecord>> {
        self.read().get(id)
    }

    fn upsert(&self, record: VideoRecord) -> Result<UpsertResult, StoreError> {
        if self.write().insert(record) {
            Ok(UpsertResult::Inserted)
        } else {
            Ok(UpsertResult::Duplicate)
        }
    }

    fn query(&self, filter: &VideoFilter) -> Result<RecordCursor, StoreError> {
        Ok(self.read().select(filter))
    }

    fn len(&self) -> usize {
        self.read().len()
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn rescore(&self, scorer: &Scorer) -> Result<RescoreOutcome, StoreError> {
        let mut index = self.write();
        let examined = index.len();
        let plan = index.rescore_plan(scorer);
        let updated = plan.len();
        for (id, relevance) in plan {
            index.apply_rescore(&id, relevance.score, relevance.tags);
        }
        Ok(RescoreOutcome { examined, updated })
    }
}
