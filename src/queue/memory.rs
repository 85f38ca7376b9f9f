// graph_ingest/src/queue/memory.rs
// In-process queue with visibility-timeout leases and a dead-letter list.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{QueueClient, QueueMessage, ReceiveRequest};
use crate::clock::{Clock, SystemClock};
use crate::error::{IngestError, Result};

#[derive(Debug, Clone,)]
struct Entry {
    message_id:      String,
    body:            String,
    receive_count:   u32,
    receipt_handle:  Option<String,>,
    invisible_until: Option<DateTime<Utc,>,>,
}

#[derive(Debug, Clone, PartialEq, Eq,)]
pub struct DeadLetter {
    pub message: QueueMessage,
    pub reason:  String,
}

#[derive(Default,)]
struct State {
    entries:        VecDeque<Entry,>,
    dead_letters:   Vec<DeadLetter,>,
    pending_faults: VecDeque<String,>,
    receive_calls:  usize,
}

pub struct InMemoryQueue {
    clock: Arc<dyn Clock,>,
    state: Mutex<State,>,
}

impl InMemoryQueue {
    pub fn new(clock: Arc<dyn Clock,>,) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default(),),
        }
    }

    /// The next `count` receive calls fail with `message`.
    pub fn fail_next_receives(&self, count: usize, message: &str,) {
        let mut state = self.lock();
        for _ in 0..count {
            state.pending_faults.push_back(message.to_string(),);
        }
    }

    pub fn len(&self,) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self,) -> bool {
        self.len() == 0
    }

    pub fn visible_len(&self,) -> usize {
        let now = self.clock.now();
        self.lock()
            .entries
            .iter()
            .filter(|e| is_visible(e, now,),)
            .count()
    }

    pub fn dead_letters(&self,) -> Vec<DeadLetter,> {
        self.lock().dead_letters.clone()
    }

    pub fn receive_calls(&self,) -> usize {
        self.lock().receive_calls
    }

    fn lock(&self,) -> std::sync::MutexGuard<'_, State,> {
        self.state.lock().unwrap_or_else(|e| e.into_inner(),)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock,),)
    }
}

fn is_visible(entry: &Entry, now: DateTime<Utc,>,) -> bool {
    entry.invisible_until.is_none_or(|until| until <= now,)
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn receive(&self, request: &ReceiveRequest,) -> Result<Vec<QueueMessage,>,> {
        let now = self.clock.now();
        let lease = chrono::Duration::from_std(request.visibility_timeout,)
            .map_err(|e| IngestError::Configuration(format!("Invalid visibility timeout: {}", e),),)?;

        let mut state = self.lock();
        state.receive_calls += 1;
        if let Some(fault,) = state.pending_faults.pop_front() {
            return Err(IngestError::Queue(fault,),);
        }

        let mut delivered = Vec::new();
        for entry in state.entries.iter_mut() {
            if delivered.len() >= request.max_messages {
                break;
            }
            if !is_visible(entry, now,) {
                continue;
            }
            let receipt = Uuid::new_v4().to_string();
            entry.receive_count += 1;
            entry.receipt_handle = Some(receipt.clone(),);
            entry.invisible_until = Some(now + lease,);
            delivered.push(QueueMessage {
                message_id:     entry.message_id.clone(),
                receipt_handle: receipt,
                body:           entry.body.clone(),
                receive_count:  entry.receive_count,
            },);
        }
        debug!(count = delivered.len(), "Delivered messages");
        Ok(delivered,)
    }

    async fn delete(&self, receipt_handle: &str,) -> Result<(),> {
        let mut state = self.lock();
        let position = state
            .entries
            .iter()
            .position(|e| e.receipt_handle.as_deref() == Some(receipt_handle,),);
        match position {
            Some(index,) => {
                state.entries.remove(index,);
                Ok((),)
            },
            None => {
                warn!(receipt_handle, "Delete with stale receipt handle");
                Err(IngestError::Queue(format!(
                    "ReceiptHandleIsInvalid: {}",
                    receipt_handle
                ),),)
            },
        }
    }

    async fn dead_letter(&self, message: &QueueMessage, reason: &str,) -> Result<(),> {
        let mut state = self.lock();
        state.dead_letters.push(DeadLetter {
            message: message.clone(),
            reason:  reason.to_string(),
        },);
        state
            .entries
            .retain(|e| e.receipt_handle.as_deref() != Some(message.receipt_handle.as_str(),),);
        Ok((),)
    }

    async fn send(&self, body: &str,) -> Result<String,> {
        let message_id = Uuid::new_v4().to_string();
        self.lock().entries.push_back(Entry {
            message_id:      message_id.clone(),
            body:            body.to_string(),
            receive_count:   0,
            receipt_handle:  None,
            invisible_until: None,
        },);
        Ok(message_id,)
    }
}
