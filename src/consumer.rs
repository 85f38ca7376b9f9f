// graph_ingest/src/consumer.rs
// Drains arrival notifications from the queue and turns each source file into graph files.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::clock::{Clock, Waiter};
use crate::config::ConsumerConfig;
use crate::error::{IngestError, Result};
use crate::ledger::{ErrorLedger, LedgerEntry, TransformLogEntry};
use crate::notification::{ArrivalNotification, ObjectLocation, is_test_event};
use crate::queue::{QueueClient, QueueMessage, ReceiveRequest};
use crate::schema::{SchemaResolver, SchemaSample};
use crate::storage::{LocalObjectStore, ObjectStore};
use crate::transform::{RecordTransformer, edge_key, vertex_key};

#[derive(Debug, Clone, PartialEq, Eq,)]
pub enum Disposition {
    /// Storage test event, acknowledged without work.
    TestEvent,
    Transformed {
        vertex_key: String,
        edge_key:   Option<String,>,
        row_count:  usize,
        edge_count: usize,
    },
}

/// A message that was handled and deleted from the queue.
#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct ProcessedMessage {
    pub message_id:  String,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, PartialEq, Serialize,)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    pub body:        String,
}

impl InvocationResponse {
    pub fn from_poll(result: &Result<Vec<ProcessedMessage,>,>,) -> Self {
        match result {
            Ok(processed,) => {
                let ids: Vec<&str,> = processed.iter().map(|p| p.message_id.as_str(),).collect();
                InvocationResponse {
                    status_code: 200,
                    body:        json!({
                        "processed_message_count": processed.len(),
                        "message_ids": ids,
                    })
                    .to_string(),
                }
            },
            Err(e,) => {
                error!(error = %e, "Unhandled exception");
                InvocationResponse {
                    status_code: 500,
                    body:        json!({ "error": e.to_string() }).to_string(),
                }
            },
        }
    }
}

pub struct QueueConsumer {
    queue:       Arc<dyn QueueClient,>,
    store:       Arc<dyn ObjectStore,>,
    resolver:    Arc<dyn SchemaResolver,>,
    ledger:      Arc<dyn ErrorLedger,>,
    clock:       Arc<dyn Clock,>,
    waiter:      Arc<dyn Waiter,>,
    config:      ConsumerConfig,
    transformer: RecordTransformer,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn QueueClient,>,
        store: Arc<dyn ObjectStore,>,
        resolver: Arc<dyn SchemaResolver,>,
        ledger: Arc<dyn ErrorLedger,>,
        clock: Arc<dyn Clock,>,
        waiter: Arc<dyn Waiter,>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            resolver,
            ledger,
            clock,
            waiter,
            config,
            transformer: RecordTransformer,
        }
    }

    fn receive_request(&self,) -> ReceiveRequest {
        ReceiveRequest {
            max_messages:       self.config.max_messages,
            wait_time:          self.config.wait_time,
            visibility_timeout: self.config.visibility_timeout,
        }
    }

    /// One receive cycle. Queue-level receive failures back off and retry until
    /// `max_retries` consecutive failures, after which the cycle ends empty.
    pub async fn poll(&self,) -> Result<Vec<ProcessedMessage,>,> {
        let request = self.receive_request();
        let policy = &self.config.backoff;
        let mut retry_count = 0u32;

        let messages = loop {
            match self.queue.receive(&request,).await {
                Ok(messages,) => break messages,
                Err(e @ IngestError::Queue(_,),) => {
                    retry_count += 1;
                    warn!(
                        error = %e,
                        transient = e.is_transient(),
                        retry_count,
                        max_retries = policy.max_retries,
                        "Receive failed"
                    );
                    if retry_count > policy.max_retries {
                        error!(max_retries = policy.max_retries, "Maximum retries reached, giving up");
                        return Ok(Vec::new(),);
                    }
                    let delay = policy.delay(retry_count,);
                    info!(delay_secs = delay.as_secs_f64(), "Backing off before retry");
                    self.waiter.wait(delay,).await;
                },
                Err(e,) => return Err(e,),
            }
        };

        if messages.is_empty() {
            info!("No messages available in the queue");
            return Ok(Vec::new(),);
        }
        info!(count = messages.len(), "Received messages");

        let mut processed = Vec::new();
        for message in &messages {
            if let Some(done,) = self.handle_message(message,).await {
                processed.push(done,);
            }
        }
        Ok(processed,)
    }

    /// Outermost boundary for a scheduled run: never fails, always answers with a status.
    pub async fn handle_invocation(&self,) -> InvocationResponse {
        InvocationResponse::from_poll(&self.poll().await,)
    }

    async fn handle_message(&self, message: &QueueMessage,) -> Option<ProcessedMessage,> {
        let message_id = message.message_id.as_str();

        if is_test_event(&message.body,) {
            info!(message_id, "Skipping storage test event notification");
            return self
                .acknowledge(message, Disposition::TestEvent,)
                .await;
        }

        if let Some(max,) = self.config.max_receive_count {
            if message.receive_count > max {
                self.dead_letter(message, max,).await;
                return None;
            }
        }

        let location = match parse_location(&message.body,) {
            Ok(location,) => location,
            Err(e,) => {
                warn!(message_id, error = %e, "Failed to process message");
                self.record_failure(message, "", &e,).await;
                return None;
            },
        };

        match self.transform_object(message, &location,).await {
            Ok(entry,) => {
                let disposition = Disposition::Transformed {
                    vertex_key: entry.output_key.clone(),
                    edge_key:   (!entry.edge_output_key.is_empty()).then(|| entry.edge_output_key.clone(),),
                    row_count:  entry.row_count,
                    edge_count: entry.edge_count,
                };
                if let Err(e,) = self.ledger.record(LedgerEntry::TransformSucceeded(entry,),).await {
                    error!(message_id, error = %e, "Failed to record transform in ledger");
                }
                self.acknowledge(message, disposition,).await
            },
            Err(e,) => {
                // Left un-acked: it becomes visible again once the lease lapses.
                warn!(message_id, key = %location.key, error = %e, "Failed to process message");
                self.record_failure(message, location.file_name(), &e,).await;
                None
            },
        }
    }

    async fn acknowledge(&self, message: &QueueMessage, disposition: Disposition,) -> Option<ProcessedMessage,> {
        match self.queue.delete(&message.receipt_handle,).await {
            Ok((),) => {
                info!(message_id = %message.message_id, "Message deleted");
                Some(ProcessedMessage {
                    message_id: message.message_id.clone(),
                    disposition,
                },)
            },
            Err(e,) => {
                warn!(message_id = %message.message_id, error = %e, "Failed to delete message");
                None
            },
        }
    }

    async fn transform_object(&self, message: &QueueMessage, location: &ObjectLocation,) -> Result<TransformLogEntry,> {
        let file_name = location.file_name().to_string();
        info!(key = %location.key, "Processing file");

        let sample = SchemaSample {
            records:      self.store.read_head(&location.key, self.config.sample_lines,).await?,
            file_name:    file_name.clone(),
            graph_schema: self.config.graph_schema_path.clone(),
        };
        let schema = self.resolver.resolve(&sample,).await?;
        info!(
            label = %schema.label,
            unique_id = %schema.unique_id_column,
            edges = schema.edge_definitions.len(),
            "Resolved graph schema"
        );

        let content = self.store.get_object(&location.key,).await?;
        let output = self.transformer.transform(&content, &schema,)?;

        let output_key = vertex_key(&schema.label, output.row_count,);
        self.store.put_object(&output_key, &output.vertex_csv,).await?;
        info!(key = %output_key, rows = output.row_count, "Vertex file written");

        let edge_output_key = match &output.edge_csv {
            Some(edge_csv,) => {
                let key = edge_key(&schema.label, output.edge_count,);
                self.store.put_object(&key, edge_csv,).await?;
                info!(key = %key, edges = output.edge_count, "Edge file written");
                key
            },
            None => String::new(),
        };

        Ok(TransformLogEntry {
            id: self.entry_id(&message.message_id,),
            timestamp: self.timestamp(),
            file_name: file_name.clone(),
            original_headers: schema.original_headers.clone(),
            node_label: schema.label.clone(),
            unique_id: schema.unique_id_column.clone(),
            new_headers: schema.transformed_headers.clone(),
            edges: schema.edge_definitions.iter().map(ToString::to_string,).collect(),
            output_key,
            row_count: output.row_count,
            edge_output_key,
            edge_count: output.edge_count,
            status_code: 200,
            status_message: format!("Successfully processed {}", file_name),
        },)
    }

    async fn dead_letter(&self, message: &QueueMessage, max: u32,) {
        let reason = format!("Received {} times, limit is {}", message.receive_count, max);
        warn!(message_id = %message.message_id, receive_count = message.receive_count, "Moving poison message to dead-letter queue");
        if let Err(e,) = self.queue.dead_letter(message, &reason,).await {
            error!(message_id = %message.message_id, error = %e, "Failed to dead-letter message");
            return;
        }
        let entry = LedgerEntry::DeadLettered {
            id:             self.entry_id(&message.message_id,),
            timestamp:      self.timestamp(),
            message_id:     message.message_id.clone(),
            receive_count:  message.receive_count,
            status_message: reason,
        };
        if let Err(e,) = self.ledger.record(entry,).await {
            error!(message_id = %message.message_id, error = %e, "Failed to record dead letter in ledger");
        }
    }

    async fn record_failure(&self, message: &QueueMessage, file_name: &str, err: &IngestError,) {
        let entry = LedgerEntry::TransformFailed {
            id:             self.entry_id(&message.message_id,),
            timestamp:      self.timestamp(),
            file_name:      file_name.to_string(),
            status_code:    err.status_code(),
            status_message: format!("Error processing {}: {}", file_name, err),
        };
        if let Err(e,) = self.ledger.record(entry,).await {
            error!(message_id = %message.message_id, error = %e, "Failed to record transform failure in ledger");
        }
    }

    fn entry_id(&self, stem: &str,) -> String {
        format!("{}-{}", stem, self.clock.now().timestamp())
    }

    fn timestamp(&self,) -> String {
        self.clock.now().format("%Y-%m-%dT%H:%M:%S%.6f",).to_string()
    }
}

/// One invocation over a local directory: every file under `incoming_prefix`
/// becomes an arrival on `queue`, and inputs that transform cleanly are moved
/// under `processed_prefix` so the next run does not see them again.
pub async fn drain_directory(
    consumer: &QueueConsumer,
    queue: &dyn QueueClient,
    store: &LocalObjectStore,
    incoming_prefix: &str,
    processed_prefix: &str,
) -> Result<InvocationResponse,> {
    let mut keys_by_message = HashMap::new();
    for key in store.list(incoming_prefix,).await? {
        let body = serde_json::to_string(&ArrivalNotification::for_key("local", &key,),)?;
        let message_id = queue.send(&body,).await?;
        keys_by_message.insert(message_id, key,);
    }
    info!(pending = keys_by_message.len(), "Queued arrivals");

    let result = consumer.poll().await;
    if let Ok(processed,) = &result {
        for done in processed {
            if !matches!(done.disposition, Disposition::Transformed { .. }) {
                continue;
            }
            let Some(key,) = keys_by_message.get(&done.message_id,) else {
                continue;
            };
            match store.archive(key, incoming_prefix, processed_prefix,).await {
                Ok(target,) => info!(key = %key, target = %target, "Archived processed input"),
                Err(e,) => warn!(key = %key, error = %e, "Failed to archive processed input"),
            }
        }
    }
    Ok(InvocationResponse::from_poll(&result,),)
}

fn parse_location(body: &str,) -> Result<ObjectLocation,> {
    ArrivalNotification::parse(body,)?.first_object()
}
