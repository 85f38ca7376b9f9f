// graph_ingest/src/queue/mod.rs
// Message queue capability carrying file-arrival notifications.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::InMemoryQueue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize,)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub message_id:     String,
    /// Lease token for this delivery; only valid until the visibility timeout lapses.
    pub receipt_handle: String,
    pub body:           String,
    /// Number of times this message has been handed out, including this delivery.
    pub receive_count:  u32,
}

#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct ReceiveRequest {
    pub max_messages:       usize,
    pub wait_time:          Duration,
    pub visibility_timeout: Duration,
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn receive(&self, request: &ReceiveRequest,) -> Result<Vec<QueueMessage,>,>;

    async fn delete(&self, receipt_handle: &str,) -> Result<(),>;

    /// Moves a message to the dead-letter destination and removes it from this queue.
    async fn dead_letter(&self, message: &QueueMessage, reason: &str,) -> Result<(),>;

    async fn send(&self, body: &str,) -> Result<String,>;
}
