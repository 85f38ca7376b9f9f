// graph_ingest/src/main.rs
// Entry point: wires the pipeline stages to local storage, SQLite and the loader endpoint.

use std::sync::Arc;

use clap::Parser;
use graph_ingest::cli::{Cli, Commands, ConsumeArgs, LoaderArgs};
use graph_ingest::clock::{SystemClock, TokioWaiter};
use graph_ingest::consumer::{QueueConsumer, drain_directory};
use graph_ingest::error::{IngestError, Result};
use graph_ingest::ledger::SqliteLedger;
use graph_ingest::loader::{
    BulkLoadOrchestrator, LoadTrigger, NeptuneLoaderClient, NoopSigner, RequestSigner, SigV4Signer,
};
use graph_ingest::persist::{SizeBoundedPersister, SqliteStatusStore, StatusStore};
use graph_ingest::queue::InMemoryQueue;
use graph_ingest::response::{CallerResponse, render_lookup, render_outcome};
use graph_ingest::schema::{HttpSchemaResolver, SchemaResolver, StaticSchemaResolver};
use graph_ingest::storage::LocalObjectStore;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(),> {
    // Initialize tracing
    let file_appender = tracing_appender::rolling::never(".", "graph-ingest.log",);
    let (non_blocking, _guard,) = tracing_appender::non_blocking(file_appender,);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info",),),)
        .with(fmt::layer().with_writer(std::io::stderr,),)
        .with(fmt::layer().with_writer(non_blocking,).with_ansi(false,),)
        .init();

    let cli = Cli::parse();

    let response = match &cli.command {
        Commands::Consume(args,) => consume(&cli, args,).await?,
        Commands::Load(args,) => {
            let trigger = LoadTrigger::Prefix(args.prefix.clone(),);
            let orchestrator = orchestrator(&cli, &args.loader,).await?;
            load_response(&cli, orchestrator.run(&trigger,).await,)?
        },
        Commands::Resume(args,) => {
            let orchestrator = orchestrator(&cli, &args.loader,).await?;
            load_response(&cli, orchestrator.resume(&args.load_id,).await,)?
        },
        Commands::Status(args,) => {
            let store = status_store(&cli,).await?;
            let record = store.get(&args.load_id,).await?;
            render_lookup(&args.load_id, record.as_ref(), cli.response_limit_kb,)?.to_string()
        },
    };

    println!("{}", response);
    Ok((),)
}

async fn status_store(cli: &Cli,) -> Result<SqliteStatusStore,> {
    Ok(SqliteStatusStore::open(&cli.status_db_path, &cli.status_table,)
        .await?
        .with_item_limit(cli.persist_limits().store_item_limit,),)
}

async fn orchestrator(cli: &Cli, args: &LoaderArgs,) -> Result<BulkLoadOrchestrator,> {
    let config = args.to_config();
    let store: Arc<dyn StatusStore,> = Arc::new(status_store(cli,).await?,);
    let ledger = Arc::new(SqliteLedger::open(&cli.status_db_path, &cli.ledger_table,).await?,);
    let signer: Box<dyn RequestSigner,> = if args.unsigned {
        Box::new(NoopSigner,)
    } else {
        Box::new(SigV4Signer::from_environment(&config.region,).await?,)
    };
    let client = Arc::new(NeptuneLoaderClient::new(&config.endpoint(), signer,)?,);
    info!(endpoint = %config.endpoint(), signed = !args.unsigned, "Loader endpoint");

    Ok(BulkLoadOrchestrator::new(
        client,
        Arc::clone(&store,),
        SizeBoundedPersister::new(store, cli.persist_limits(),),
        ledger,
        Arc::new(SystemClock,),
        Arc::new(TokioWaiter,),
        config,
    ),)
}

/// Unexpected failures become a safe message instead of a raw error exit.
fn load_response(cli: &Cli, outcome: Result<graph_ingest::loader::LoadOutcome,>,) -> Result<String,> {
    match outcome {
        Ok(outcome,) => {
            info!(load_id = outcome.load_id(), "Load run finished");
            Ok(render_outcome(&outcome, cli.response_limit_kb,)?.to_string(),)
        },
        Err(e @ IngestError::Configuration(_,),) => Ok(CallerResponse::Message(e.to_string(),).to_string(),),
        Err(e,) => {
            error!(error = %e, "Bulk load failed");
            Ok(CallerResponse::Message(format!("Error: {}", e),).to_string(),)
        },
    }
}

fn resolver(args: &ConsumeArgs,) -> Result<Arc<dyn SchemaResolver,>,> {
    if let Some(url,) = &args.schema_resolver_url {
        return Ok(Arc::new(HttpSchemaResolver::new(url.clone(),),),);
    }
    if let Some(path,) = &args.schema_file {
        let json = std::fs::read_to_string(path,)?;
        return Ok(Arc::new(StaticSchemaResolver::from_json(&json,)?,),);
    }
    Err(IngestError::Configuration(
        "Either --schema-resolver-url or --schema-file is required".to_string(),
    ),)
}

async fn consume(cli: &Cli, args: &ConsumeArgs,) -> Result<String,> {
    let config = args.to_config()?;
    let clock = Arc::new(SystemClock,);
    let store = Arc::new(LocalObjectStore::new(cli.data_root.clone(),),);
    let queue = Arc::new(InMemoryQueue::new(clock.clone(),),);

    let consumer = QueueConsumer::new(
        queue.clone(),
        store.clone(),
        resolver(args,)?,
        Arc::new(SqliteLedger::open(&cli.status_db_path, &cli.ledger_table,).await?,),
        clock,
        Arc::new(TokioWaiter,),
        config,
    );
    let response = drain_directory(
        &consumer,
        queue.as_ref(),
        &store,
        &args.incoming_prefix,
        &args.processed_prefix,
    )
    .await?;
    Ok(serde_json::to_string(&response,)?,)
}
