// graph_ingest/src/config.rs
// Typed configuration for both pipeline stages.

use std::time::Duration;

use crate::retry::BackoffPolicy;

/// Prefix sent to the resolver alongside each sample.
pub const DEFAULT_GRAPH_SCHEMA_PATH: &str = "public/schema/graph.txt";
pub const DEFAULT_INCOMING_PREFIX: &str = "incoming/";
pub const DEFAULT_PROCESSED_PREFIX: &str = "processed/";

#[derive(Debug, Clone,)]
pub struct ConsumerConfig {
    pub max_messages:       usize,
    pub wait_time:          Duration,
    pub visibility_timeout: Duration,
    /// Receives beyond this move the message to the dead-letter destination.
    pub max_receive_count:  Option<u32,>,
    pub sample_lines:       usize,
    pub graph_schema_path:  String,
    pub backoff:            BackoffPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_messages:       10,
            wait_time:          Duration::from_secs(1,),
            visibility_timeout: Duration::from_secs(30,),
            max_receive_count:  Some(5,),
            sample_lines:       50,
            graph_schema_path:  DEFAULT_GRAPH_SCHEMA_PATH.to_string(),
            backoff:            BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone,)]
pub struct LoaderConfig {
    pub host:          String,
    pub port:          u16,
    pub bucket:        String,
    pub iam_role_arn:  String,
    pub region:        String,
    pub poll_interval: Duration,
    /// Wall-clock budget for one polling session; `None` polls until terminal.
    pub poll_budget:   Option<Duration,>,
}

impl LoaderConfig {
    pub fn endpoint(&self,) -> String {
        format!("https://{}:{}/loader", self.host, self.port)
    }

    pub fn source_uri(&self, prefix: &str,) -> String {
        format!("s3://{}/{}", self.bucket, prefix)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            host:          "localhost".to_string(),
            port:          8182,
            bucket:        String::new(),
            iam_role_arn:  String::new(),
            region:        "us-east-1".to_string(),
            poll_interval: Duration::from_secs(5,),
            poll_budget:   None,
        }
    }
}

/// Size thresholds for the status record and caller-facing responses, in KB.
#[derive(Debug, Clone, PartialEq,)]
pub struct PersistLimits {
    pub payload_threshold_kb: f64,
    pub response_limit_kb:    f64,
    pub store_item_limit:     usize,
    pub truncation_tiers:     Vec<usize,>,
}

impl Default for PersistLimits {
    fn default() -> Self {
        Self {
            payload_threshold_kb: 250.0,
            response_limit_kb:    25.0,
            store_item_limit:     400 * 1024,
            truncation_tiers:     vec![10, 3],
        }
    }
}
