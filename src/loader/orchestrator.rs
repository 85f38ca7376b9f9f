// graph_ingest/src/loader/orchestrator.rs
// Submits a bulk load, polls it to a terminal state and persists the outcome.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{LoadRequest, LoadSnapshot, LoadStatus, LoaderClient, SubmitOutcome};
use crate::clock::{Clock, Waiter};
use crate::config::LoaderConfig;
use crate::error::{IngestError, Result};
use crate::ledger::{ErrorLedger, ErrorLogEntry, LedgerEntry};
use crate::notification::ArrivalNotification;
use crate::persist::{LoadRecord, PersistOutcome, SizeBoundedPersister, StatusStore};

/// What started this load: an explicit request or a new arrival in the output area.
#[derive(Debug, Clone, PartialEq,)]
pub enum LoadTrigger {
    Prefix(String,),
    Arrival(ArrivalNotification,),
}

impl LoadTrigger {
    pub fn prefix(&self,) -> Result<String,> {
        let prefix = match self {
            LoadTrigger::Prefix(prefix,) => prefix.clone(),
            LoadTrigger::Arrival(notification,) => notification.first_object()?.key,
        };
        if prefix.trim().is_empty() {
            return Err(IngestError::Configuration("Prefix parameter is required".to_string(),),);
        }
        Ok(prefix,)
    }
}

#[derive(Debug, Clone, PartialEq,)]
pub enum LoadOutcome {
    Finished {
        load_id:     String,
        source_path: String,
        snapshot:    LoadSnapshot,
        polls:       usize,
        persisted:   PersistOutcome,
    },
    /// The engine refused the submission; a failed record was written under a generated id.
    Rejected {
        load_id:     String,
        source_path: String,
        message:     String,
    },
    /// The poll budget ran out; the record stays `LOAD_IN_PROGRESS` for a later `resume`.
    Suspended {
        load_id:     String,
        source_path: String,
        last_status: LoadStatus,
        polls:       usize,
    },
    /// `resume` found the record already terminal.
    AlreadyTerminal(LoadRecord,),
}

impl LoadOutcome {
    pub fn load_id(&self,) -> &str {
        match self {
            LoadOutcome::Finished { load_id, .. }
            | LoadOutcome::Rejected { load_id, .. }
            | LoadOutcome::Suspended { load_id, .. } => load_id,
            LoadOutcome::AlreadyTerminal(record,) => &record.load_id,
        }
    }
}

enum PollResult {
    Terminal { snapshot: LoadSnapshot, polls: usize, },
    Suspended { last_status: LoadStatus, polls: usize, },
}

pub struct BulkLoadOrchestrator {
    client:    Arc<dyn LoaderClient,>,
    store:     Arc<dyn StatusStore,>,
    persister: SizeBoundedPersister,
    ledger:    Arc<dyn ErrorLedger,>,
    clock:     Arc<dyn Clock,>,
    waiter:    Arc<dyn Waiter,>,
    config:    LoaderConfig,
}

impl BulkLoadOrchestrator {
    pub fn new(
        client: Arc<dyn LoaderClient,>,
        store: Arc<dyn StatusStore,>,
        persister: SizeBoundedPersister,
        ledger: Arc<dyn ErrorLedger,>,
        clock: Arc<dyn Clock,>,
        waiter: Arc<dyn Waiter,>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            client,
            store,
            persister,
            ledger,
            clock,
            waiter,
            config,
        }
    }

    fn timestamp(&self,) -> String {
        self.clock.now().format("%Y-%m-%d %H:%M:%S",).to_string()
    }

    /// Submit, poll until terminal (or out of budget), persist.
    pub async fn run(&self, trigger: &LoadTrigger,) -> Result<LoadOutcome,> {
        let prefix = trigger.prefix()?;
        let source_uri = self.config.source_uri(&prefix,);
        info!(source = %source_uri, "Load from path");

        let request = LoadRequest::opencypher(
            source_uri.clone(),
            self.config.iam_role_arn.clone(),
            self.config.region.clone(),
        );

        let load_id = match self.client.start_load(&request,).await? {
            SubmitOutcome::Accepted { load_id, } => load_id,
            SubmitOutcome::Rejected { status, body, } => {
                return Ok(self.record_rejection(&prefix, &source_uri, status, body,).await,);
            },
        };
        info!(load_id = %load_id, "Bulk load job started");

        self.store
            .put(&LoadRecord::in_progress(&load_id, &prefix, self.timestamp(),),)
            .await?;

        self.poll_and_persist(&load_id, &prefix, LoadStatus::NotStarted,)
            .await
    }

    /// Continue polling a job whose earlier invocation ran out of time.
    pub async fn resume(&self, load_id: &str,) -> Result<LoadOutcome,> {
        let record = self
            .store
            .get(load_id,)
            .await?
            .ok_or_else(|| IngestError::StatusStore(format!("Load ID: {} not found", load_id),),)?;
        if record.load_status.is_terminal() {
            info!(load_id, status = %record.load_status, "Load already terminal, nothing to resume");
            return Ok(LoadOutcome::AlreadyTerminal(record,),);
        }
        self.poll_and_persist(load_id, &record.source_path, record.load_status.clone(),)
            .await
    }

    async fn poll_and_persist(&self, load_id: &str, source_path: &str, initial: LoadStatus,) -> Result<LoadOutcome,> {
        match self.poll_until_terminal(load_id, initial,).await? {
            PollResult::Suspended { last_status, polls, } => {
                warn!(load_id, %last_status, polls, "Poll budget exhausted, leaving job in progress");
                Ok(LoadOutcome::Suspended {
                    load_id: load_id.to_string(),
                    source_path: source_path.to_string(),
                    last_status,
                    polls,
                },)
            },
            PollResult::Terminal { snapshot, polls, } => {
                let persisted = self
                    .persister
                    .persist(
                        load_id,
                        &snapshot.status,
                        snapshot.total_records,
                        snapshot.time_spent,
                        source_path,
                        Some(&snapshot.payload,),
                    )
                    .await;
                info!(
                    load_id,
                    status = %snapshot.status,
                    total_records = snapshot.total_records,
                    time_spent = snapshot.time_spent,
                    "Bulk load finished"
                );
                Ok(LoadOutcome::Finished {
                    load_id: load_id.to_string(),
                    source_path: source_path.to_string(),
                    snapshot,
                    polls,
                    persisted,
                },)
            },
        }
    }

    async fn poll_until_terminal(&self, load_id: &str, initial: LoadStatus,) -> Result<PollResult,> {
        let started = self.clock.now();
        let mut status = initial;
        let mut last = None;
        let mut polls = 0;

        while !status.is_terminal() {
            if polls > 0 {
                if let Some(budget,) = self.config.poll_budget {
                    let elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
                    if elapsed + self.config.poll_interval > budget {
                        return Ok(PollResult::Suspended {
                            last_status: status,
                            polls,
                        },);
                    }
                }
                // Fixed interval, no backoff.
                self.waiter.wait(self.config.poll_interval,).await;
            }
            let snapshot = self.client.load_status(load_id,).await?;
            polls += 1;
            info!(
                load_id,
                status = %snapshot.status,
                total_records = snapshot.total_records,
                "Load status"
            );
            status = snapshot.status.clone();
            last = Some(snapshot,);
        }

        match last {
            Some(snapshot,) => Ok(PollResult::Terminal { snapshot, polls, },),
            None => Err(IngestError::Loader(format!(
                "Polling for {} started from terminal status {}",
                load_id, status
            ),),),
        }
    }

    async fn record_rejection(&self, prefix: &str, source_uri: &str, status: u16, body: String,) -> LoadOutcome {
        error!(status, body = %body, "Error starting bulk load");
        let failed_load_id = Uuid::new_v4().to_string();
        let failed = LoadStatus::FailedInvalidRequest;
        let error_entry = ErrorLogEntry {
            error_code:    "INVALID_REQUEST".to_string(),
            error_message: body.clone(),
            file_name:     prefix.to_string(),
            line_number:   None,
        };

        let record = LoadRecord {
            load_id:              failed_load_id.clone(),
            start_time:           self.timestamp(),
            source_path:          prefix.to_string(),
            load_status:          failed.clone(),
            total_records:        0,
            time_spent:           0,
            payload:              Some(json!({
                "overallStatus": {
                    "status": failed.as_str(),
                    "totalRecords": 0,
                    "totalTimeSpent": 0,
                    "fullUri": source_uri,
                },
                "errors": {
                    "loadId": failed_load_id,
                    "errorLogs": [error_entry],
                },
            }),),
            loader_response:      Some(body.clone(),),
            original_error_count: None,
        };

        match self.store.put(&record,).await {
            Ok((),) => info!(load_id = %failed_load_id, "Logged failed operation"),
            Err(e,) => error!(error = %e, "Failed to log error to status store"),
        }

        let entry = LedgerEntry::SubmissionFailed {
            id:          failed_load_id.clone(),
            timestamp:   self.clock.now().format("%Y-%m-%dT%H:%M:%SZ",).to_string(),
            source_path: prefix.to_string(),
            error:       error_entry,
        };
        if let Err(e,) = self.ledger.record(entry,).await {
            error!(error = %e, "Failed to record submission failure in ledger");
        }

        LoadOutcome::Rejected {
            load_id:     failed_load_id,
            source_path: prefix.to_string(),
            message:     format!("Error: {}", body),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::*;
    use crate::clock::{ManualClock, RecordingWaiter};
    use crate::config::PersistLimits;
    use crate::ledger::InMemoryLedger;
    use crate::persist::InMemoryStatusStore;

    struct ScriptedLoader {
        submit:   Mutex<Option<SubmitOutcome,>,>,
        statuses: Mutex<VecDeque<&'static str,>,>,
        polls:    Mutex<usize,>,
    }

    impl ScriptedLoader {
        fn new(submit: SubmitOutcome, statuses: &[&'static str],) -> Self {
            Self {
                submit:   Mutex::new(Some(submit,),),
                statuses: Mutex::new(statuses.iter().copied().collect(),),
                polls:    Mutex::new(0,),
            }
        }

        fn polls(&self,) -> usize {
            *self.polls.lock().unwrap()
        }
    }

    fn status_payload(status: &str,) -> Value {
        json!({
            "overallStatus": {"status": status, "totalRecords": 120, "totalTimeSpent": 9},
            "errors": {"loadId": "job-1", "errorLogs": [
                {"errorCode": "PARSING_ERROR", "errorMessage": "bad row", "fileName": "v_Product_120.csv", "lineNumber": 3}
            ]},
        })
    }

    #[async_trait::async_trait]
    impl LoaderClient for ScriptedLoader {
        async fn start_load(&self, _request: &LoadRequest,) -> Result<SubmitOutcome,> {
            self.submit
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| IngestError::Loader("submitted twice".into(),),)
        }

        async fn load_status(&self, _load_id: &str,) -> Result<LoadSnapshot,> {
            *self.polls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop_front().unwrap()
            } else {
                statuses.front().copied().unwrap()
            };
            Ok(LoadSnapshot::from_payload(status_payload(status,),),)
        }
    }

    struct Harness {
        loader:       Arc<ScriptedLoader,>,
        store:        Arc<InMemoryStatusStore,>,
        ledger:       Arc<InMemoryLedger,>,
        waiter:       Arc<RecordingWaiter,>,
        orchestrator: BulkLoadOrchestrator,
    }

    fn harness(loader: ScriptedLoader, poll_budget: Option<Duration,>,) -> Harness {
        let loader = Arc::new(loader,);
        let store = Arc::new(InMemoryStatusStore::new(),);
        let ledger = Arc::new(InMemoryLedger::new(),);
        let clock = Arc::new(ManualClock::default(),);
        let waiter = Arc::new(RecordingWaiter::new(clock.clone(),),);
        let config = LoaderConfig {
            bucket: "data-loader".into(),
            poll_budget,
            ..LoaderConfig::default()
        };
        let orchestrator = BulkLoadOrchestrator::new(
            loader.clone(),
            store.clone(),
            SizeBoundedPersister::new(store.clone(), PersistLimits::default(),),
            ledger.clone(),
            clock,
            waiter.clone(),
            config,
        );
        Harness {
            loader,
            store,
            ledger,
            waiter,
            orchestrator,
        }
    }

    fn accepted() -> SubmitOutcome {
        SubmitOutcome::Accepted {
            load_id: "job-1".into(),
        }
    }

    #[tokio::test]
    async fn polls_until_terminal_then_persists() {
        let h = harness(
            ScriptedLoader::new(accepted(), &["LOAD_IN_PROGRESS", "LOAD_IN_PROGRESS", "LOAD_COMPLETED_WITH_ERRORS"],),
            None,
        );

        let outcome = h
            .orchestrator
            .run(&LoadTrigger::Prefix("output/v/".into(),),)
            .await
            .unwrap();

        let LoadOutcome::Finished { polls, persisted, snapshot, .. } = outcome else {
            panic!("expected a finished load, got {outcome:?}");
        };
        assert_eq!(polls, 3);
        assert_eq!(h.loader.polls(), 3);
        assert_eq!(h.waiter.waits(), vec![Duration::from_secs(5); 2]);
        assert_eq!(persisted, PersistOutcome::Stored);
        assert_eq!(snapshot.status, LoadStatus::CompletedWithErrors);

        let record = h.store.get("job-1",).await.unwrap().unwrap();
        assert_eq!(record.load_status, LoadStatus::CompletedWithErrors);
        assert_eq!(record.total_records, 120);
        assert_eq!(record.source_path, "output/v/");
        assert!(record.payload.is_some());
    }

    #[tokio::test]
    async fn arrival_notification_supplies_prefix() {
        let h = harness(ScriptedLoader::new(accepted(), &["LOAD_COMPLETED"],), None,);
        let trigger = LoadTrigger::Arrival(ArrivalNotification::for_key("data-loader", "output/v/v_Product_3.csv",),);

        let outcome = h.orchestrator.run(&trigger,).await.unwrap();

        assert!(matches!(outcome, LoadOutcome::Finished { polls: 1, .. }));
        assert!(h.waiter.waits().is_empty());
        let record = h.store.get("job-1",).await.unwrap().unwrap();
        assert_eq!(record.source_path, "output/v/v_Product_3.csv");
    }

    #[tokio::test]
    async fn empty_prefix_is_refused() {
        let h = harness(ScriptedLoader::new(accepted(), &["LOAD_COMPLETED"],), None,);
        let err = h
            .orchestrator
            .run(&LoadTrigger::Prefix(String::new(),),)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Prefix parameter is required"));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn rejected_submission_is_recorded() {
        let body = r#"{"code":"BadRequestException","detailedMessage":"Invalid role"}"#;
        let h = harness(
            ScriptedLoader::new(
                SubmitOutcome::Rejected {
                    status: 400,
                    body:   body.into(),
                },
                &["LOAD_COMPLETED"],
            ),
            None,
        );

        let outcome = h
            .orchestrator
            .run(&LoadTrigger::Prefix("output/v/".into(),),)
            .await
            .unwrap();

        let LoadOutcome::Rejected { load_id, message, .. } = outcome else {
            panic!("expected a rejection, got {outcome:?}");
        };
        assert!(message.contains("Invalid role"));
        assert_eq!(h.loader.polls(), 0);

        let record = h.store.get(&load_id,).await.unwrap().unwrap();
        assert_eq!(record.load_status, LoadStatus::FailedInvalidRequest);
        assert_eq!(record.total_records, 0);
        assert_eq!(record.loader_response.as_deref(), Some(body));
        let payload = record.payload.unwrap();
        assert_eq!(payload["overallStatus"]["status"], "LOAD_FAILED_INVALID_REQUEST");
        assert_eq!(payload["errors"]["errorLogs"][0]["errorCode"], "INVALID_REQUEST");

        let failures = h.ledger.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id(), load_id);
    }

    #[tokio::test]
    async fn budget_suspends_and_resume_finishes() {
        let h = harness(
            ScriptedLoader::new(accepted(), &["LOAD_IN_PROGRESS", "LOAD_IN_PROGRESS", "LOAD_IN_PROGRESS", "LOAD_COMPLETED"],),
            Some(Duration::from_secs(8,),),
        );

        let outcome = h
            .orchestrator
            .run(&LoadTrigger::Prefix("output/v/".into(),),)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            LoadOutcome::Suspended { polls: 2, last_status: LoadStatus::InProgress, .. }
        ));
        let record = h.store.get("job-1",).await.unwrap().unwrap();
        assert_eq!(record.load_status, LoadStatus::InProgress);

        let resumed = h.orchestrator.resume("job-1",).await.unwrap();
        assert!(matches!(resumed, LoadOutcome::Finished { polls: 2, .. }));
        let record = h.store.get("job-1",).await.unwrap().unwrap();
        assert_eq!(record.load_status, LoadStatus::Completed);

        let again = h.orchestrator.resume("job-1",).await.unwrap();
        assert!(matches!(again, LoadOutcome::AlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn resume_of_unknown_job_fails() {
        let h = harness(ScriptedLoader::new(accepted(), &["LOAD_COMPLETED"],), None,);
        let err = h.orchestrator.resume("missing",).await.unwrap_err();
        assert!(err.to_string().contains("Load ID: missing not found"));
    }
}
