// graph_ingest/src/ledger/sqlite.rs
// SQLite-backed ledger; each entry is kept as a JSON document keyed by id.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, params};
use tokio::task;
use tracing::info;

use super::{ErrorLedger, LedgerEntry};
use crate::error::{IngestError, Result};

pub struct SqliteLedger {
    conn:  Arc<Mutex<Connection,>,>,
    table: String,
}

impl SqliteLedger {
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
            .map_err(|e| IngestError::Ledger(format!("Failed to open ledger: {}", e),),)?;

        let create = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (id TEXT PRIMARY KEY, kind TEXT NOT NULL, \
             recorded_at TEXT NOT NULL, entry TEXT NOT NULL)",
            table
        );
        conn.execute(&create, [],)?;
        info!(table, "Ledger ready");

        Ok(Self {
            conn:  Arc::new(Mutex::new(conn,),),
            table: table.to_string(),
        },)
    }

    pub async fn entries(&self,) -> Result<Vec<LedgerEntry,>,> {
        let conn = Arc::clone(&self.conn,);
        let query = format!("SELECT entry FROM \"{}\" ORDER BY rowid", self.table);
        task::spawn_blocking(move || -> Result<Vec<LedgerEntry,>,> {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner(),);
            let mut stmt = conn.prepare(&query,)?;
            let raw: Vec<String,> = stmt
                .query_map([], |row| row.get(0,),)?
                .collect::<std::result::Result<_, rusqlite::Error,>>()?;
            raw.iter()
                .map(|json| serde_json::from_str(json,).map_err(IngestError::from,),)
                .collect()
        },)
        .await
        .map_err(|e| IngestError::Other(e.to_string(),),)?
    }
}

/// Table names are interpolated into SQL, so only identifier characters are allowed.
pub(crate) fn validate_table_name(table: &str,) -> Result<(),> {
    if table.is_empty()
        || !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-',)
    {
        return Err(IngestError::Configuration(format!("Invalid table name '{}'", table),),);
    }
    Ok((),)
}

#[async_trait]
impl ErrorLedger for SqliteLedger {
    async fn record(&self, entry: LedgerEntry,) -> Result<(),> {
        let conn = Arc::clone(&self.conn,);
        let insert = format!(
            "INSERT OR REPLACE INTO \"{}\" (id, kind, recorded_at, entry) VALUES (?1, ?2, ?3, ?4)",
            self.table
        );
        let json = serde_json::to_string(&entry,)?;
        let id = entry.id().to_string();
        let kind = entry.kind();
        let recorded_at = chrono::Utc::now().to_rfc3339();

        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner(),);
            conn.execute(&insert, params![id, kind, recorded_at, json],)
        },)
        .await
        .map_err(|e| IngestError::Other(e.to_string(),),)?
        .map_err(|e| IngestError::Ledger(e.to_string(),),)?;
        Ok((),)
    }
}
