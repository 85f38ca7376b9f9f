// graph_ingest/tests/integration_tests.rs

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use graph_ingest::clock::{ManualClock, RecordingWaiter};
use graph_ingest::config::{ConsumerConfig, LoaderConfig, PersistLimits};
use graph_ingest::consumer::{Disposition, QueueConsumer, drain_directory};
use graph_ingest::error::{IngestError, Result};
use graph_ingest::ledger::{ErrorLedger, InMemoryLedger, LedgerEntry, SqliteLedger};
use graph_ingest::loader::{
    BulkLoadOrchestrator, LoadOutcome, LoadRequest, LoadSnapshot, LoadStatus, LoadTrigger, LoaderClient, SubmitOutcome,
};
use graph_ingest::notification::ArrivalNotification;
use graph_ingest::persist::{PersistOutcome, SizeBoundedPersister, SqliteStatusStore, StatusStore, TruncationTier};
use graph_ingest::queue::{InMemoryQueue, QueueClient};
use graph_ingest::response::{render_lookup, render_outcome};
use graph_ingest::schema::StaticSchemaResolver;
use graph_ingest::storage::{InMemoryObjectStore, LocalObjectStore, ObjectStore};
use serde_json::{Value, json};
use tempfile::NamedTempFile;

const PRODUCT_SCHEMA: &str = r#"{
    "originalHeaders": ["id", "supplier_id", "created_date"],
    "transformedHeaders": ["id:ID", "supplier_id:String", "created_date:Date"],
    "label": "Product",
    "uniqueIdColumn": "id",
    "edge_definitions": ["supplier_id,SUPPLIED_BY,id"]
}"#;

fn notification(key: &str,) -> String {
    serde_json::to_string(&ArrivalNotification::for_key("data", key,),).expect("Failed to encode notification",)
}

struct Pipeline {
    clock:    Arc<ManualClock,>,
    queue:    Arc<InMemoryQueue,>,
    ledger:   Arc<InMemoryLedger,>,
    consumer: QueueConsumer,
}

fn pipeline(store: Arc<dyn ObjectStore,>, config: ConsumerConfig,) -> Pipeline {
    let clock = Arc::new(ManualClock::default(),);
    let queue = Arc::new(InMemoryQueue::new(clock.clone(),),);
    let ledger = Arc::new(InMemoryLedger::new(),);
    let consumer = QueueConsumer::new(
        queue.clone(),
        store,
        Arc::new(StaticSchemaResolver::from_json(PRODUCT_SCHEMA,).expect("Failed to parse schema",),),
        ledger.clone(),
        clock.clone(),
        Arc::new(RecordingWaiter::new(clock.clone(),),),
        config,
    );
    Pipeline {
        clock,
        queue,
        ledger,
        consumer,
    }
}

#[tokio::test]
async fn test_message_deleted_only_after_successful_transform() {
    // 1. One well-formed file and one with a ragged row
    let store = Arc::new(InMemoryObjectStore::new(),);
    store
        .put_object("incoming/good.csv", "id,supplier_id,created_date\n1,5,01/15/2024\n2,,not-a-date\n",)
        .await
        .unwrap();
    store
        .put_object("incoming/bad.csv", "id,supplier_id,created_date\n1,5,2024-01-15,extra\n",)
        .await
        .unwrap();
    let p = pipeline(store.clone(), ConsumerConfig::default(),);
    p.queue.send(&notification("incoming/good.csv",),).await.unwrap();
    p.queue.send(&notification("incoming/bad.csv",),).await.unwrap();

    // 2. First poll: only the good file is acknowledged
    let processed = p.consumer.poll().await.expect("Poll failed",);
    assert_eq!(processed.len(), 1);
    assert_eq!(p.queue.len(), 1);

    let vertices = store.get_object("output/v/v_Product_2.csv",).await.unwrap();
    assert_eq!(
        vertices,
        "id:ID,supplier_id:String,created_date:Date,:LABEL\n1,5,2024-01-15,Product\n2,,,Product\n"
    );

    // 3. The failed message stays hidden until its lease lapses
    assert!(p.consumer.poll().await.unwrap().is_empty());
    assert_eq!(p.queue.visible_len(), 0);

    // 4. After the visibility timeout it is redelivered and fails again
    p.clock.advance(Duration::from_secs(31,),);
    assert!(p.consumer.poll().await.unwrap().is_empty());
    assert_eq!(p.queue.len(), 1);

    let failures = p.ledger.failures();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| f.kind() == "transformFailed"));
}

#[tokio::test]
async fn test_poison_message_is_dead_lettered() {
    let store = Arc::new(InMemoryObjectStore::new(),);
    let config = ConsumerConfig {
        max_receive_count: Some(2,),
        ..ConsumerConfig::default()
    };
    let p = pipeline(store, config,);
    p.queue.send(&notification("incoming/never-arrives.csv",),).await.unwrap();

    // Deliveries 1 and 2 fail the transform, delivery 3 crosses the bound.
    for _ in 0..3 {
        assert!(p.consumer.poll().await.unwrap().is_empty());
        p.clock.advance(Duration::from_secs(31,),);
    }

    assert!(p.queue.is_empty());
    let dead = p.queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message.receive_count, 3);

    let entries = p.ledger.entries();
    assert_eq!(entries.len(), 3);
    assert!(matches!(entries[2], LedgerEntry::DeadLettered { receive_count: 3, .. }));
}

#[tokio::test]
async fn test_local_store_pipeline_writes_vertex_and_edge_files() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir",);
    let store = Arc::new(LocalObjectStore::new(dir.path(),),);
    store
        .put_object("incoming/Product List.csv", "id,supplier_id,created_date\n1,5,2024-01-15\n2,7,2024-02-01\n",)
        .await
        .unwrap();
    let p = pipeline(store, ConsumerConfig::default(),);
    p.queue.send(&notification("incoming/Product List.csv",),).await.unwrap();

    let response = p.consumer.handle_invocation().await;
    assert_eq!(response.status_code, 200);
    let body: Value = serde_json::from_str(&response.body,).unwrap();
    assert_eq!(body["processed_message_count"], 1);

    assert!(dir.path().join("output/v/v_Product_2.csv",).is_file());
    let edges = std::fs::read_to_string(dir.path().join("output-edges/e_Product_2.csv",),).unwrap();
    assert_eq!(edges, ":START_ID,:TYPE,:END_ID\n5,SUPPLIED_BY,1\n7,SUPPLIED_BY,2\n");

    let entries = p.ledger.entries();
    let LedgerEntry::TransformSucceeded(entry,) = &entries[0] else {
        panic!("expected a success entry");
    };
    assert_eq!(entry.file_name, "Product List.csv");
    assert_eq!(entry.edges, vec!["supplier_id,SUPPLIED_BY,id"]);
    assert_eq!(entry.status_code, 200);
}

#[tokio::test]
async fn test_local_drain_archives_only_transformed_inputs() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir",);
    let store = Arc::new(LocalObjectStore::new(dir.path(),),);
    store
        .put_object("incoming/good.csv", "id,supplier_id,created_date\n1,5,2024-01-15\n",)
        .await
        .unwrap();
    store
        .put_object("incoming/ragged.csv", "id,supplier_id,created_date\n1,5\n",)
        .await
        .unwrap();

    // 1. First run transforms the good file and moves it out of incoming/
    let first = pipeline(store.clone(), ConsumerConfig::default(),);
    let response = drain_directory(&first.consumer, first.queue.as_ref(), &store, "incoming/", "processed/",)
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&response.body,).unwrap();
    assert_eq!(body["processed_message_count"], 1);
    assert_eq!(store.list("incoming/",).await.unwrap(), vec!["incoming/ragged.csv"]);
    assert_eq!(store.list("processed/",).await.unwrap(), vec!["processed/good.csv"]);

    // 2. A fresh run only picks up the file that failed
    let second = pipeline(store.clone(), ConsumerConfig::default(),);
    let response = drain_directory(&second.consumer, second.queue.as_ref(), &store, "incoming/", "processed/",)
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&response.body,).unwrap();
    assert_eq!(body["processed_message_count"], 0);
    let entries = second.ledger.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind(), "transformFailed");
    assert_eq!(store.list("incoming/",).await.unwrap(), vec!["incoming/ragged.csv"]);
}

#[tokio::test]
async fn test_processed_messages_report_outputs() {
    let store = Arc::new(InMemoryObjectStore::new(),);
    store
        .put_object("incoming/solo.csv", "id,supplier_id,created_date\n1,,\n",)
        .await
        .unwrap();
    let p = pipeline(store, ConsumerConfig::default(),);
    let message_id = p.queue.send(&notification("incoming/solo.csv",),).await.unwrap();

    let processed = p.consumer.poll().await.unwrap();
    assert_eq!(processed[0].message_id, message_id);
    assert_eq!(
        processed[0].disposition,
        Disposition::Transformed {
            vertex_key: "output/v/v_Product_1.csv".into(),
            edge_key:   None,
            row_count:  1,
            edge_count: 0,
        }
    );
}

/// Loader that accepts one submission and replays a fixed status sequence.
struct ScriptedLoader {
    submit:   Mutex<Option<SubmitOutcome,>,>,
    statuses: Mutex<VecDeque<Value,>,>,
}

impl ScriptedLoader {
    fn new(submit: SubmitOutcome, statuses: Vec<Value,>,) -> Self {
        Self {
            submit:   Mutex::new(Some(submit,),),
            statuses: Mutex::new(statuses.into(),),
        }
    }
}

#[async_trait]
impl LoaderClient for ScriptedLoader {
    async fn start_load(&self, _request: &LoadRequest,) -> Result<SubmitOutcome,> {
        self.submit
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| IngestError::Loader("no scripted submission left".into(),),)
    }

    async fn load_status(&self, _load_id: &str,) -> Result<LoadSnapshot,> {
        let payload = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| IngestError::Loader("no scripted status left".into(),),)?;
        Ok(LoadSnapshot::from_payload(payload,),)
    }
}

fn status(status: &str, errors: usize,) -> Value {
    let logs: Vec<Value,> = (0..errors)
        .map(|i| {
            json!({
                "errorCode": "PARSING_ERROR",
                "errorMessage": format!("Row {i}: {}", "value does not match the declared type ".repeat(4)),
                "fileName": "s3://data-loader/output/v/v_Product_5000.csv",
                "lineNumber": i + 2,
            })
        },)
        .collect();
    json!({
        "overallStatus": {"status": status, "totalRecords": 5000, "totalTimeSpent": 42},
        "errors": {"loadId": "job-42", "errorLogs": logs},
    })
}

async fn sqlite_orchestrator(db: &NamedTempFile, loader: ScriptedLoader,) -> (Arc<SqliteStatusStore,>, Arc<SqliteLedger,>, BulkLoadOrchestrator,) {
    let path = db.path().to_str().expect("Failed to get path string",);
    let store = Arc::new(SqliteStatusStore::open(path, "bulk_load_log",).await.expect("Failed to open status store",),);
    let ledger = Arc::new(SqliteLedger::open(path, "etl_log",).await.expect("Failed to open ledger",),);
    let clock = Arc::new(ManualClock::default(),);
    let config = LoaderConfig {
        bucket: "data-loader".into(),
        iam_role_arn: "arn:aws:iam::1:role/loader".into(),
        ..LoaderConfig::default()
    };
    let orchestrator = BulkLoadOrchestrator::new(
        Arc::new(loader,),
        store.clone(),
        SizeBoundedPersister::new(store.clone(), PersistLimits::default(),),
        ledger.clone(),
        clock.clone(),
        Arc::new(RecordingWaiter::new(clock,),),
        config,
    );
    (store, ledger, orchestrator,)
}

#[tokio::test]
async fn test_bulk_load_persists_truncated_record_in_sqlite() {
    // 1. A load that finishes with far more errors than the store should hold
    let db = NamedTempFile::new().expect("Failed to create temporary file",);
    let loader = ScriptedLoader::new(
        SubmitOutcome::Accepted {
            load_id: "job-42".into(),
        },
        vec![
            status("LOAD_NOT_STARTED", 0,),
            status("LOAD_IN_PROGRESS", 0,),
            status("LOAD_COMPLETED_WITH_ERRORS", 3000,),
        ],
    );
    let (store, _ledger, orchestrator,) = sqlite_orchestrator(&db, loader,).await;

    // 2. Run it
    let trigger = LoadTrigger::Arrival(
        ArrivalNotification::parse(&notification("output/v/v_Product_5000.csv",),).expect("Failed to parse",),
    );
    let outcome = orchestrator.run(&trigger,).await.expect("Load failed",);
    let LoadOutcome::Finished { polls, persisted, .. } = &outcome else {
        panic!("expected a finished load, got {outcome:?}");
    };
    assert_eq!(*polls, 3);
    assert_eq!(*persisted, PersistOutcome::Degraded(TruncationTier::Errors(10,),));

    // 3. The record survives reopening and keeps the true error count
    let path = db.path().to_str().unwrap();
    let reopened = SqliteStatusStore::open(path, "bulk_load_log",).await.unwrap();
    let record = reopened.get("job-42",).await.unwrap().expect("Record missing",);
    assert_eq!(record.load_status, LoadStatus::CompletedWithErrors);
    assert_eq!(record.source_path, "output/v/v_Product_5000.csv");
    assert_eq!(record.total_records, 5000);
    assert_eq!(record.original_error_count, Some(3000));
    let payload = record.payload.as_ref().expect("Payload missing",);
    assert_eq!(payload["errors"]["errorLogs"].as_array().unwrap().len(), 11);
    assert_eq!(payload["originalErrorCount"], 3000);
    assert!(store.get("job-42",).await.unwrap().is_some());

    // 4. The caller sees a summary, not the oversized detail
    let response = render_outcome(&outcome, 25.0,).unwrap();
    assert!(response.is_summary());
    assert!(response.body().contains("- Load ID: job-42"));
    assert!(response.body().contains("LOAD_COMPLETED_WITH_ERRORS"));

    let lookup = render_lookup("job-42", Some(&record,), 25.0,).unwrap();
    assert!(lookup.body().contains("job-42"));
}

#[tokio::test]
async fn test_rejected_submission_is_durable() {
    let db = NamedTempFile::new().expect("Failed to create temporary file",);
    let loader = ScriptedLoader::new(
        SubmitOutcome::Rejected {
            status: 400,
            body:   r#"{"code":"BadRequestException","detailedMessage":"Failed to start new load for the source"}"#.into(),
        },
        vec![],
    );
    let (store, ledger, orchestrator,) = sqlite_orchestrator(&db, loader,).await;

    let outcome = orchestrator
        .run(&LoadTrigger::Prefix("output/v/".into(),),)
        .await
        .expect("Rejection should not be an error",);
    let LoadOutcome::Rejected { load_id, .. } = &outcome else {
        panic!("expected a rejection, got {outcome:?}");
    };

    let record = store.get(load_id,).await.unwrap().expect("Record missing",);
    assert_eq!(record.load_status, LoadStatus::FailedInvalidRequest);
    assert_eq!(record.source_path, "output/v/");

    let entries = ledger.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind(), "submissionFailed");
    assert_eq!(entries[0].id(), load_id);

    let response = render_outcome(&outcome, 25.0,).unwrap();
    assert!(response.body().contains("Failed to start new load"));
}

#[tokio::test]
async fn test_sqlite_terminal_write_happens_once() {
    let db = NamedTempFile::new().expect("Failed to create temporary file",);
    let path = db.path().to_str().unwrap();
    let store: Arc<dyn StatusStore,> = Arc::new(SqliteStatusStore::open(path, "bulk_load_log",).await.unwrap(),);
    let first = SizeBoundedPersister::new(store.clone(), PersistLimits::default(),);
    let second = SizeBoundedPersister::new(store.clone(), PersistLimits::default(),);

    let payload = status("LOAD_COMPLETED", 0,);
    let a = first
        .persist("job-9", &LoadStatus::Completed, 5000, 42, "output/v/", Some(&payload,),)
        .await;
    let b = second
        .persist("job-9", &LoadStatus::Other("LOAD_FAILED".into(),), 0, 0, "output/v/", None,)
        .await;

    assert_eq!(a, PersistOutcome::Stored);
    assert_eq!(b, PersistOutcome::Conflict { current: LoadStatus::Completed });
    let record = store.get("job-9",).await.unwrap().unwrap();
    assert_eq!(record.load_status, LoadStatus::Completed);
}

#[tokio::test]
async fn test_ledger_entries_round_trip_through_sqlite() {
    let db = NamedTempFile::new().expect("Failed to create temporary file",);
    let ledger = SqliteLedger::open(db.path().to_str().unwrap(), "etl_log",).await.unwrap();

    ledger
        .record(LedgerEntry::TransformFailed {
            id:             "m-1-1700000000".into(),
            timestamp:      "2024-01-01T00:00:00".into(),
            file_name:      "orders.csv".into(),
            status_code:    429,
            status_message: "Schema resolver throttled".into(),
        },)
        .await
        .unwrap();

    let entries = ledger.entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(matches!(&entries[0], LedgerEntry::TransformFailed { status_code: 429, .. }));
}
