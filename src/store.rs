//! Raw document sink.
//!
//! Write-only storage for raw API payloads: every insert appends one
//! annotated JSON document to one of three fixed collections. Records are
//! never read back, updated, or deleted by this crate.
//!
//! Each stored record is the caller's payload plus exactly two fields added
//! by [`annotate`]: `_ingested_at` (UTC instant, RFC 3339) and `_source`
//! (constant tag for the originating service). The caller's payload is
//! never mutated.
//!
//! [`SqliteStore`] is the real backend; [`MemoryStore`] backs tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::StoreConfig;

/// Constant tag identifying the originating service on every stored record.
pub const SOURCE_TAG: &str = "ssllabs";

/// The three fixed logical collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Info,
    Analyze,
    Endpoint,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Info, Collection::Analyze, Collection::Endpoint];

    pub fn table(&self) -> &'static str {
        match self {
            Collection::Info => "info_raw",
            Collection::Analyze => "analyze_raw",
            Collection::Endpoint => "endpoint_raw",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Shallow-copy a payload and attach the two ingestion fields.
pub fn annotate(payload: &Map<String, Value>) -> Map<String, Value> {
    let mut record = payload.clone();
    record.insert(
        "_ingested_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    record.insert("_source".to_string(), Value::String(SOURCE_TAG.to_string()));
    record
}

/// Append-only record store.
#[async_trait]
pub trait RawStore: Send + Sync {
    /// Connectivity check; used as the startup gate before any fetch.
    async fn ping(&self) -> Result<()>;

    /// Annotate the payload and insert it into the collection.
    ///
    /// Returns the assigned record id. Store-level errors are logged and
    /// re-raised unchanged; the sink never retries.
    async fn insert(&self, collection: Collection, payload: &Map<String, Value>) -> Result<String>;
}

/// SQLite-backed sink: one table per collection, the full annotated document
/// as a JSON text column.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let db_path = &config.path;

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open store at {}", db_path.display()))?;

        Ok(Self { pool })
    }

    /// Create the collection tables. Idempotent.
    pub async fn migrate(&self) -> Result<()> {
        for collection in Collection::ALL {
            let table = collection.table();

            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    ingested_at TEXT NOT NULL,
                    body TEXT NOT NULL
                )
                "#
            ))
            .execute(&self.pool)
            .await?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_ingested_at ON {table}(ingested_at)"
            ))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RawStore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("store did not answer ping")?;
        Ok(())
    }

    async fn insert(&self, collection: Collection, payload: &Map<String, Value>) -> Result<String> {
        let record = annotate(payload);
        let id = Uuid::new_v4().to_string();
        let ingested_at = record
            .get("_ingested_at")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let body = serde_json::to_string(&Value::Object(record))?;

        let insert = format!(
            "INSERT INTO {} (id, ingested_at, body) VALUES (?, ?, ?)",
            collection.table()
        );

        match sqlx::query(&insert)
            .bind(&id)
            .bind(&ingested_at)
            .bind(&body)
            .execute(&self.pool)
            .await
        {
            Ok(_) => {
                println!("inserted id={} into {}", id, collection);
                Ok(id)
            }
            Err(e) => {
                eprintln!("Error: insert into {} failed: {}", collection, e);
                Err(e.into())
            }
        }
    }
}

/// In-memory sink for tests: same annotation path, records held in a Vec.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<(Collection, Map<String, Value>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, collection: Collection) -> Vec<Map<String, Value>> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == collection)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == collection)
            .count()
    }
}

#[async_trait]
impl RawStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, collection: Collection, payload: &Map<String, Value>) -> Result<String> {
        let record = annotate(payload);
        let id = Uuid::new_v4().to_string();
        self.records.lock().unwrap().push((collection, record));
        Ok(id)
    }
}
