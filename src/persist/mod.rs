// graph_ingest/src/persist/mod.rs
// Durable load-job records and the size-aware writer in front of them.

pub mod persister;
pub mod sqlite;
pub mod truncate;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IngestError, Result};
use crate::loader::LoadStatus;

pub use persister::{PersistOutcome, SizeBoundedPersister, TruncationTier};
pub use sqlite::SqliteStatusStore;

/// DynamoDB-style hard ceiling on one stored item.
pub const DEFAULT_ITEM_LIMIT: usize = 400 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
#[serde(rename_all = "camelCase")]
pub struct LoadRecord {
    pub load_id:              String,
    pub start_time:           String,
    pub source_path:          String,
    pub load_status:          LoadStatus,
    #[serde(default)]
    pub total_records:        u64,
    #[serde(default)]
    pub time_spent:           u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload:              Option<Value,>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader_response:      Option<String,>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_error_count: Option<usize,>,
}

impl LoadRecord {
    /// The record written when a job is accepted and polling begins.
    pub fn in_progress(load_id: &str, source_path: &str, start_time: String,) -> Self {
        Self {
            load_id: load_id.to_string(),
            start_time,
            source_path: source_path.to_string(),
            load_status: LoadStatus::InProgress,
            total_records: 0,
            time_spent: 0,
            payload: None,
            loader_response: None,
            original_error_count: None,
        }
    }

    pub fn item_size(&self,) -> Result<usize,> {
        Ok(serde_json::to_vec(self,)?.len(),)
    }
}

/// The fields a poller sets once a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq,)]
pub struct TerminalUpdate {
    pub load_id:              String,
    pub load_status:          LoadStatus,
    pub total_records:        u64,
    pub time_spent:           u64,
    pub source_path:          String,
    pub payload:              Option<Value,>,
    pub loader_response:      String,
    pub original_error_count: Option<usize,>,
}

impl TerminalUpdate {
    /// Merge onto the existing record, or start a fresh one stamped `start_time`.
    pub fn apply(&self, existing: Option<&LoadRecord,>, start_time: &str,) -> LoadRecord {
        LoadRecord {
            load_id:              self.load_id.clone(),
            start_time:           existing
                .map(|r| r.start_time.clone(),)
                .unwrap_or_else(|| start_time.to_string(),),
            source_path:          self.source_path.clone(),
            load_status:          self.load_status.clone(),
            total_records:        self.total_records,
            time_spent:           self.time_spent,
            payload:              self.payload.clone(),
            loader_response:      Some(self.loader_response.clone(),),
            original_error_count: self.original_error_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq,)]
pub enum CasOutcome {
    Applied,
    /// The stored status was not one of the expected prior statuses.
    Conflict { current: LoadStatus, },
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn put(&self, record: &LoadRecord,) -> Result<(),>;

    async fn get(&self, load_id: &str,) -> Result<Option<LoadRecord,>,>;

    /// Applies `update` only if the stored status is absent or one of `expected`.
    async fn update_if(&self, update: &TerminalUpdate, expected: &[LoadStatus],) -> Result<CasOutcome,>;
}

pub(crate) fn check_item_size(record: &LoadRecord, limit: usize,) -> Result<(),> {
    let size = record.item_size()?;
    if size > limit {
        return Err(IngestError::ItemTooLarge(size,),);
    }
    Ok((),)
}

pub struct InMemoryStatusStore {
    records:    Mutex<HashMap<String, LoadRecord,>,>,
    item_limit: usize,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::with_item_limit(DEFAULT_ITEM_LIMIT,)
    }

    pub fn with_item_limit(item_limit: usize,) -> Self {
        Self {
            records: Mutex::new(HashMap::new(),),
            item_limit,
        }
    }

    pub fn len(&self,) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner(),).len()
    }

    pub fn is_empty(&self,) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn put(&self, record: &LoadRecord,) -> Result<(),> {
        check_item_size(record, self.item_limit,)?;
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner(),)
            .insert(record.load_id.clone(), record.clone(),);
        Ok((),)
    }

    async fn get(&self, load_id: &str,) -> Result<Option<LoadRecord,>,> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner(),)
            .get(load_id,)
            .cloned(),)
    }

    async fn update_if(&self, update: &TerminalUpdate, expected: &[LoadStatus],) -> Result<CasOutcome,> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner(),);
        let existing = records.get(&update.load_id,);
        if let Some(current,) = existing.map(|r| &r.load_status,) {
            if !expected.contains(current,) {
                return Ok(CasOutcome::Conflict {
                    current: current.clone(),
                },);
            }
        }
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S",).to_string();
        let record = update.apply(existing, &now,);
        check_item_size(&record, self.item_limit,)?;
        records.insert(record.load_id.clone(), record,);
        Ok(CasOutcome::Applied,)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(status: LoadStatus,) -> TerminalUpdate {
        TerminalUpdate {
            load_id: "job-1".into(),
            load_status: status,
            total_records: 5,
            time_spent: 2,
            source_path: "output/v/".into(),
            payload: None,
            loader_response: "{}".into(),
            original_error_count: None,
        }
    }

    #[tokio::test]
    async fn terminal_update_is_compare_and_set() {
        let store = InMemoryStatusStore::new();
        store
            .put(&LoadRecord::in_progress("job-1", "output/v/", "2024-01-01 00:00:00".into(),),)
            .await
            .unwrap();

        let live = [LoadStatus::NotStarted, LoadStatus::InProgress];
        let first = store.update_if(&update(LoadStatus::Completed,), &live,).await.unwrap();
        assert_eq!(first, CasOutcome::Applied);

        let second = store.update_if(&update(LoadStatus::Other("LOAD_FAILED".into(),),), &live,).await.unwrap();
        assert_eq!(second, CasOutcome::Conflict { current: LoadStatus::Completed });

        let stored = store.get("job-1",).await.unwrap().unwrap();
        assert_eq!(stored.start_time, "2024-01-01 00:00:00");
        assert_eq!(stored.load_status, LoadStatus::Completed);
    }

    #[tokio::test]
    async fn oversized_items_are_rejected() {
        let store = InMemoryStatusStore::with_item_limit(64,);
        let record = LoadRecord::in_progress("job-with-a-rather-long-identifier", "output/v/", "now".into(),);
        assert!(matches!(store.put(&record,).await, Err(IngestError::ItemTooLarge(_))));
    }
}
