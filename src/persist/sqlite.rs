// graph_ingest/src/persist/sqlite.rs
// SQLite-backed status store with conditional terminal writes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tokio::task;
use tracing::info;

use super::{CasOutcome, DEFAULT_ITEM_LIMIT, LoadRecord, StatusStore, TerminalUpdate, check_item_size};
use crate::error::{IngestError, Result};
use crate::ledger::sqlite::validate_table_name;
use crate::loader::LoadStatus;

pub struct SqliteStatusStore {
    conn:       Arc<Mutex<Connection,>,>,
    table:      String,
    item_limit: usize,
}

impl SqliteStatusStore {
    pub async fn open(path: &str, table: &str,) -> Result<Self,> {
        validate_table_name(table,)?;
        let conn_path = path.trim_start_matches("sqlite://",).to_string();
        let conn = task::spawn_blocking(move || Connection::open(conn_path,),)
            .await
            .map_err(|e| {
                IngestError::Other(format!(
                    "Failed to spawn blocking task for SQLite connection: {}",
                    e
                ),)
            },)?
            .map_err(|e| IngestError::StatusStore(format!("Failed to open status store: {}", e),),)?;

        let create = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (load_id TEXT PRIMARY KEY, load_status TEXT NOT NULL, \
             record TEXT NOT NULL)",
            table
        );
        conn.execute(&create, [],)?;
        info!(table, "Status store ready");

        Ok(Self {
            conn:       Arc::new(Mutex::new(conn,),),
            table:      table.to_string(),
            item_limit: DEFAULT_ITEM_LIMIT,
        },)
    }

    pub fn with_item_limit(mut self, item_limit: usize,) -> Self {
        self.item_limit = item_limit;
        self
    }

    async fn blocking<T, F,>(&self, f: F,) -> Result<T,>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str,) -> Result<T,> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn,);
        let table = self.table.clone();
        task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner(),);
            f(&mut conn, &table,)
        },)
        .await
        .map_err(|e| IngestError::Other(e.to_string(),),)?
    }
}

fn read_record(conn: &Connection, table: &str, load_id: &str,) -> Result<Option<LoadRecord,>,> {
    let query = format!("SELECT record FROM \"{}\" WHERE load_id = ?1", table);
    let raw: Option<String,> = conn
        .query_row(&query, params![load_id], |row| row.get(0,),)
        .optional()?;
    match raw {
        Some(json,) => Ok(Some(serde_json::from_str(&json,)?,),),
        None => Ok(None,),
    }
}

fn write_record(conn: &Connection, table: &str, record: &LoadRecord,) -> Result<(),> {
    let upsert = format!(
        "INSERT OR REPLACE INTO \"{}\" (load_id, load_status, record) VALUES (?1, ?2, ?3)",
        table
    );
    let json = serde_json::to_string(record,)?;
    conn.execute(&upsert, params![record.load_id, record.load_status.as_str(), json],)?;
    Ok((),)
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn put(&self, record: &LoadRecord,) -> Result<(),> {
        check_item_size(record, self.item_limit,)?;
        let record = record.clone();
        self.blocking(move |conn, table| write_record(conn, table, &record,),)
            .await
    }

    async fn get(&self, load_id: &str,) -> Result<Option<LoadRecord,>,> {
        let load_id = load_id.to_string();
        self.blocking(move |conn, table| read_record(conn, table, &load_id,),)
            .await
    }

    async fn update_if(&self, update: &TerminalUpdate, expected: &[LoadStatus],) -> Result<CasOutcome,> {
        let update = update.clone();
        let expected = expected.to_vec();
        let item_limit = self.item_limit;
        self.blocking(move |conn, table| {
            // IMMEDIATE takes the write lock up front so the read and write are one step.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate,)?;
            let existing = read_record(&tx, table, &update.load_id,)?;
            if let Some(current,) = existing.as_ref().map(|r| &r.load_status,) {
                if !expected.contains(current,) {
                    return Ok(CasOutcome::Conflict {
                        current: current.clone(),
                    },);
                }
            }
            let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S",).to_string();
            let record = update.apply(existing.as_ref(), &now,);
            check_item_size(&record, item_limit,)?;
            write_record(&tx, table, &record,)?;
            tx.commit()?;
            Ok(CasOutcome::Applied,)
        },)
        .await
    }
}
