// graph_ingest/src/loader/mod.rs
// Bulk-load submission and status polling against the graph engine's loader.

pub mod neptune;
pub mod orchestrator;
pub mod signing;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use neptune::NeptuneLoaderClient;
pub use orchestrator::{BulkLoadOrchestrator, LoadOutcome, LoadTrigger};
pub use signing::{NoopSigner, RequestSigner, SigV4Signer};

/// Job status as reported by the loader. Only `NotStarted` and `InProgress` are non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize,)]
#[serde(from = "String", into = "String")]
pub enum LoadStatus {
    NotStarted,
    InProgress,
    Completed,
    CompletedWithErrors,
    FailedInvalidRequest,
    /// Any other `LOAD_*` status, e.g. `LOAD_FAILED`, `LOAD_CANCELLED_BY_USER`.
    Other(String,),
}

impl LoadStatus {
    pub fn as_str(&self,) -> &str {
        match self {
            LoadStatus::NotStarted => "LOAD_NOT_STARTED",
            LoadStatus::InProgress => "LOAD_IN_PROGRESS",
            LoadStatus::Completed => "LOAD_COMPLETED",
            LoadStatus::CompletedWithErrors => "LOAD_COMPLETED_WITH_ERRORS",
            LoadStatus::FailedInvalidRequest => "LOAD_FAILED_INVALID_REQUEST",
            LoadStatus::Other(status,) => status,
        }
    }

    pub fn is_terminal(&self,) -> bool {
        !matches!(self, LoadStatus::NotStarted | LoadStatus::InProgress)
    }
}

impl From<String,> for LoadStatus {
    fn from(status: String,) -> Self {
        match status.as_str() {
            "LOAD_NOT_STARTED" => LoadStatus::NotStarted,
            "LOAD_IN_PROGRESS" => LoadStatus::InProgress,
            "LOAD_COMPLETED" => LoadStatus::Completed,
            "LOAD_COMPLETED_WITH_ERRORS" => LoadStatus::CompletedWithErrors,
            "LOAD_FAILED_INVALID_REQUEST" => LoadStatus::FailedInvalidRequest,
            _ => LoadStatus::Other(status,),
        }
    }
}

impl From<LoadStatus,> for String {
    fn from(status: LoadStatus,) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_,>,) -> fmt::Result {
        f.write_str(self.as_str(),)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,)]
#[serde(rename_all = "UPPERCASE")]
pub enum Parallelism {
    Low,
    Medium,
    High,
    Oversubscribe,
}

/// Body of a loader submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    pub source:                 String,
    pub format:                 String,
    pub iam_role_arn:           String,
    pub region:                 String,
    pub fail_on_error:          bool,
    pub queue_request:          bool,
    pub parallelism:            Parallelism,
    pub user_provided_edge_ids: bool,
}

impl LoadRequest {
    /// Defaults: load as much as possible, queue behind running jobs, engine-generated edge ids.
    pub fn opencypher(source: String, iam_role_arn: String, region: String,) -> Self {
        Self {
            source,
            format: "opencypher".to_string(),
            iam_role_arn,
            region,
            fail_on_error: false,
            queue_request: true,
            parallelism: Parallelism::Medium,
            user_provided_edge_ids: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq,)]
pub enum SubmitOutcome {
    Accepted { load_id: String, },
    /// The engine answered with a non-2xx status.
    Rejected { status: u16, body: String, },
}

/// One observation of a running job.
#[derive(Debug, Clone, PartialEq,)]
pub struct LoadSnapshot {
    pub status:        LoadStatus,
    pub total_records: u64,
    pub time_spent:    u64,
    pub payload:       Value,
}

impl LoadSnapshot {
    /// Reads `overallStatus` out of the loader's `payload` object.
    pub fn from_payload(payload: Value,) -> Self {
        let overall = payload.get("overallStatus",);
        let status = overall
            .and_then(|o| o.get("status",),)
            .and_then(Value::as_str,)
            .map(|s| LoadStatus::from(s.to_string(),),)
            .unwrap_or(LoadStatus::Other("UNKNOWN".to_string(),),);
        let total_records = overall
            .and_then(|o| o.get("totalRecords",),)
            .and_then(Value::as_u64,)
            .unwrap_or(0,);
        let time_spent = overall
            .and_then(|o| o.get("totalTimeSpent",),)
            .and_then(Value::as_u64,)
            .unwrap_or(0,);
        Self {
            status,
            total_records,
            time_spent,
            payload,
        }
    }
}

#[async_trait]
pub trait LoaderClient: Send + Sync {
    /// Submitting twice starts two jobs, so implementations only resend when
    /// the first attempt never reached the engine.
    async fn start_load(&self, request: &LoadRequest,) -> Result<SubmitOutcome,>;

    async fn load_status(&self, load_id: &str,) -> Result<LoadSnapshot,>;
}
