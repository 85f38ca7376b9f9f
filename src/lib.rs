// graph_ingest/src/lib.rs
// Public API for the graph_ingest pipeline: queue-driven transform and bulk-load orchestration.

pub mod cli;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod error;
pub mod ledger;
pub mod loader;
pub mod notification;
pub mod persist;
pub mod queue;
pub mod response;
pub mod retry;
pub mod schema;
pub mod storage;
#[cfg(test)]
mod testing;
pub mod transform;
