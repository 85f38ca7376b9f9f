// graph_ingest/src/error.rs
// Defines the error taxonomy shared by the transform and bulk-load stages.

use thiserror::Error;

#[derive(Debug, Error,)]
pub enum IngestError {
    #[error("Queue error: {0}")]
    Queue(String,),
    #[error("Object storage error: {0}")]
    Storage(String,),
    #[error("Schema resolution failed: {0}")]
    Schema(String,),
    #[error("Schema resolver throttled: {0}")]
    SchemaThrottled(String,),
    #[error("Transform failed: {0}")]
    Transform(String,),
    #[error("Bulk loader error: {0}")]
    Loader(String,),
    #[error("Status store error: {0}")]
    StatusStore(String,),
    #[error("Status store item too large: {0} bytes")]
    ItemTooLarge(usize,),
    #[error("Ledger error: {0}")]
    Ledger(String,),
    #[error("Invalid configuration: {0}")]
    Configuration(String,),
    #[error("Invalid notification: {0}")]
    Notification(String,),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error,),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error,),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error,),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error,),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error,),
    #[error("Other error: {0}")]
    Other(String,),
}

impl IngestError {
    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_transient(&self,) -> bool {
        match self {
            IngestError::SchemaThrottled(_,) => true,
            IngestError::Http(e,) => e.is_timeout() || e.is_connect(),
            IngestError::Queue(msg,) | IngestError::Loader(msg,) | IngestError::StatusStore(msg,) => {
                let m = msg.to_lowercase();
                m.contains("throttl",)
                    || m.contains("timeout",)
                    || m.contains("timed out",)
                    || m.contains("connection",)
                    || m.contains("rate exceeded",)
                    || m.contains("service unavailable",)
                    || m.contains("429",)
                    || m.contains("503",)
            },
            _ => false,
        }
    }

    /// Status code recorded in the ledger for a failed file.
    pub fn status_code(&self,) -> u16 {
        match self {
            IngestError::SchemaThrottled(_,) => 429,
            _ => 500,
        }
    }
}

pub type Result<T,> = std::result::Result<T, IngestError,>;
