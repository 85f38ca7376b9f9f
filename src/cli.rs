// graph_ingest/src/cli.rs
// Command Line Interface for the graph-ingest pipeline stages.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{
    ConsumerConfig, DEFAULT_GRAPH_SCHEMA_PATH, DEFAULT_INCOMING_PREFIX, DEFAULT_PROCESSED_PREFIX, LoaderConfig,
    PersistLimits,
};
use crate::error::Result;
use crate::retry::BackoffPolicy;

/// Transforms arriving tables into graph files and bulk-loads them.
#[derive(Parser, Debug,)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Directory standing in for the object store (incoming/, output/, output-edges/).
    #[clap(long, env = "DATA_ROOT", default_value = "data")]
    pub data_root: PathBuf,

    /// SQLite file holding the load-status and ledger tables.
    #[clap(long, env = "STATUS_DB_PATH", default_value = "graph-ingest.db")]
    pub status_db_path: String,

    /// Table holding one record per bulk load.
    #[clap(long, env = "BULK_LOAD_LOG", default_value = "bulk_load_log")]
    pub status_table: String,

    /// Table holding transform and submission ledger entries.
    #[clap(long, env = "ETL_LOG_TABLE", default_value = "etl_log")]
    pub ledger_table: String,

    /// Caller-facing responses above this size are replaced by a summary.
    #[clap(long, env = "RESPONSE_LIMIT_KB", default_value_t = 25.0)]
    pub response_limit_kb: f64,
}

#[derive(Parser, Debug,)]
pub enum Commands {
    /// Enqueue arrivals under the incoming prefix and drain them through the transformer
    Consume(ConsumeArgs,),
    /// Submit a bulk load for a prefix and poll it to completion
    Load(LoadArgs,),
    /// Continue polling a load whose earlier run ran out of budget
    Resume(ResumeArgs,),
    /// Show the stored record for a load
    Status(StatusArgs,),
}

#[derive(Parser, Debug,)]
pub struct ConsumeArgs {
    /// Prefix under which new source files arrive
    #[clap(long, env = "INCOMING_PREFIX", default_value = DEFAULT_INCOMING_PREFIX)]
    pub incoming_prefix: String,

    /// Inputs that transformed cleanly are moved here
    #[clap(long, env = "PROCESSED_PREFIX", default_value = DEFAULT_PROCESSED_PREFIX)]
    pub processed_prefix: String,

    #[clap(long, env = "MAX_RETRIES", default_value_t = 8)]
    pub max_retries: u32,

    #[clap(long, env = "BASE_BACKOFF_SECONDS", default_value_t = 10.0)]
    pub base_backoff_seconds: f64,

    #[clap(long, env = "MAX_BACKOFF_SECONDS", default_value_t = 100.0)]
    pub max_backoff_seconds: f64,

    #[clap(long, env = "JITTER_FACTOR", default_value_t = 0.25)]
    pub jitter_factor: f64,

    #[clap(long, env = "VISIBILITY_TIMEOUT", default_value_t = 30)]
    pub visibility_timeout: u64,

    #[clap(long, env = "MAX_MESSAGES", default_value_t = 10)]
    pub max_messages: usize,

    #[clap(long, env = "WAIT_TIME_SECONDS", default_value_t = 1)]
    pub wait_time_seconds: u64,

    /// Deliveries after which a message is dead-lettered; 0 disables the bound
    #[clap(long, env = "MAX_RECEIVE_COUNT", default_value_t = 5)]
    pub max_receive_count: u32,

    /// Lines of each file sent to the schema resolver
    #[clap(long, env = "SAMPLE_LINES", default_value_t = 50)]
    pub sample_lines: usize,

    #[clap(long, env = "GRAPH_SCHEMA_PATH", default_value = DEFAULT_GRAPH_SCHEMA_PATH)]
    pub graph_schema_path: String,

    /// Remote endpoint that infers a graph schema from a sample
    #[clap(long, env = "SCHEMA_RESOLVER_URL", conflicts_with = "schema_file")]
    pub schema_resolver_url: Option<String,>,

    /// JSON file with a fixed graph schema applied to every file
    #[clap(long, env = "SCHEMA_FILE")]
    pub schema_file: Option<PathBuf,>,
}

impl ConsumeArgs {
    pub fn to_config(&self,) -> Result<ConsumerConfig,> {
        Ok(ConsumerConfig {
            max_messages:       self.max_messages,
            wait_time:          Duration::from_secs(self.wait_time_seconds,),
            visibility_timeout: Duration::from_secs(self.visibility_timeout,),
            max_receive_count:  (self.max_receive_count > 0).then_some(self.max_receive_count,),
            sample_lines:       self.sample_lines,
            graph_schema_path:  self.graph_schema_path.clone(),
            backoff:            BackoffPolicy::from_secs(
                self.base_backoff_seconds,
                self.max_backoff_seconds,
                self.jitter_factor,
                self.max_retries,
            )?,
        },)
    }
}

#[derive(Parser, Debug,)]
pub struct LoaderArgs {
    #[clap(long, env = "NEPTUNE_HOST", default_value = "localhost")]
    pub neptune_host: String,

    #[clap(long, env = "NEPTUNE_PORT", default_value_t = 8182)]
    pub neptune_port: u16,

    /// Bucket the loader reads the transformed files from
    #[clap(long, env = "S3_LOADER_BUCKET")]
    pub bucket: String,

    /// Role the loader assumes to read the bucket
    #[clap(long, env = "S3_LOADER_ROLE")]
    pub iam_role_arn: String,

    #[clap(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    #[clap(long, env = "POLL_INTERVAL_SECONDS", default_value_t = 5)]
    pub poll_interval_seconds: u64,

    /// Stop polling after this long and leave the job for `resume`
    #[clap(long, env = "POLL_BUDGET_SECONDS")]
    pub poll_budget_seconds: Option<u64,>,

    /// Send loader requests without SigV4 signing, for engines without IAM auth
    #[clap(long, env = "LOADER_UNSIGNED")]
    pub unsigned: bool,
}

impl LoaderArgs {
    pub fn to_config(&self,) -> LoaderConfig {
        LoaderConfig {
            host:          self.neptune_host.clone(),
            port:          self.neptune_port,
            bucket:        self.bucket.clone(),
            iam_role_arn:  self.iam_role_arn.clone(),
            region:        self.region.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_seconds,),
            poll_budget:   self.poll_budget_seconds.map(Duration::from_secs,),
        }
    }
}

#[derive(Parser, Debug,)]
pub struct LoadArgs {
    /// Output prefix to load, e.g. output/v/
    #[clap(long)]
    pub prefix: String,

    #[clap(flatten)]
    pub loader: LoaderArgs,
}

#[derive(Parser, Debug,)]
pub struct ResumeArgs {
    #[clap(long)]
    pub load_id: String,

    #[clap(flatten)]
    pub loader: LoaderArgs,
}

#[derive(Parser, Debug,)]
pub struct StatusArgs {
    #[clap(long)]
    pub load_id: String,
}

impl Cli {
    pub fn persist_limits(&self,) -> PersistLimits {
        PersistLimits {
            response_limit_kb: self.response_limit_kb,
            ..PersistLimits::default()
        }
    }
}
