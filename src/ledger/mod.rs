// graph_ingest/src/ledger/mod.rs
// Auditable record of transform outcomes and load-submission failures.

pub mod sqlite;

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use sqlite::SqliteLedger;

/// One line of the per-file transform log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
#[serde(rename_all = "camelCase")]
pub struct TransformLogEntry {
    pub id:               String,
    pub timestamp:        String,
    pub file_name:        String,
    pub original_headers: Vec<String,>,
    pub node_label:       String,
    pub unique_id:        String,
    pub new_headers:      Vec<String,>,
    pub edges:            Vec<String,>,
    pub output_key:       String,
    pub row_count:        usize,
    pub edge_output_key:  String,
    pub edge_count:       usize,
    pub status_code:      u16,
    pub status_message:   String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogEntry {
    pub error_code:    String,
    pub error_message: String,
    pub file_name:     String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number:   Option<u64,>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LedgerEntry {
    TransformSucceeded(TransformLogEntry,),
    #[serde(rename_all = "camelCase")]
    TransformFailed {
        id:             String,
        timestamp:      String,
        file_name:      String,
        status_code:    u16,
        status_message: String,
    },
    #[serde(rename_all = "camelCase")]
    DeadLettered {
        id:             String,
        timestamp:      String,
        message_id:     String,
        receive_count:  u32,
        status_message: String,
    },
    #[serde(rename_all = "camelCase")]
    SubmissionFailed {
        id:          String,
        timestamp:   String,
        source_path: String,
        error:       ErrorLogEntry,
    },
}

impl LedgerEntry {
    pub fn id(&self,) -> &str {
        match self {
            LedgerEntry::TransformSucceeded(entry,) => &entry.id,
            LedgerEntry::TransformFailed { id, .. }
            | LedgerEntry::DeadLettered { id, .. }
            | LedgerEntry::SubmissionFailed { id, .. } => id,
        }
    }

    pub fn kind(&self,) -> &'static str {
        match self {
            LedgerEntry::TransformSucceeded(_,) => "transformSucceeded",
            LedgerEntry::TransformFailed { .. } => "transformFailed",
            LedgerEntry::DeadLettered { .. } => "deadLettered",
            LedgerEntry::SubmissionFailed { .. } => "submissionFailed",
        }
    }

    pub fn is_failure(&self,) -> bool {
        !matches!(self, LedgerEntry::TransformSucceeded(_))
    }
}

#[async_trait]
pub trait ErrorLedger: Send + Sync {
    async fn record(&self, entry: LedgerEntry,) -> Result<(),>;
}

#[derive(Debug, Default,)]
pub struct InMemoryLedger {
    entries: Mutex<Vec<LedgerEntry,>,>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self,) -> Vec<LedgerEntry,> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner(),).clone()
    }

    pub fn failures(&self,) -> Vec<LedgerEntry,> {
        self.entries().into_iter().filter(LedgerEntry::is_failure,).collect()
    }
}

#[async_trait]
impl ErrorLedger for InMemoryLedger {
    async fn record(&self, entry: LedgerEntry,) -> Result<(),> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner(),)
            .push(entry,);
        Ok((),)
    }
}
