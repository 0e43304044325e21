//! Persistent snapshot store -- opaque JSON blobs keyed by name, in SQLite.

pub mod schema;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OptionalExtension;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Current dashboard snapshot.
pub const AIR_QUALITY_KEY: &str = "airQualityData";
/// Last known user location.
pub const LOCATION_KEY: &str = "userLocation";
/// Nearby monitoring stations.
pub const STATIONS_KEY: &str = "monitoringStations";

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Key/value access to serialized snapshots. No transactions, no schema:
/// callers validate what they read.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Read and decode a typed snapshot.
pub fn load<T: DeserializeOwned>(store: &dyn SnapshotStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("stored snapshot '{key}' is not valid"))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Encode and write a typed snapshot.
pub fn save<T: Serialize + ?Sized>(store: &dyn SnapshotStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// [`SnapshotStore`] backed by the `snapshots` table.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(path: &str) -> Result<Self> {
        Ok(Self::new(open_pool(path)?))
    }

    /// Keys currently stored, with their last write time.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT key, updated_at FROM snapshots ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut list = Vec::new();
        for r in rows {
            list.push(r?);
        }
        Ok(list)
    }
}

impl SnapshotStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let value = conn
            .query_row(
                "SELECT payload_json FROM snapshots WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to read snapshot '{key}'"))?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO snapshots (key, payload_json) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET payload_json = excluded.payload_json,
                                            updated_at = datetime('now')",
            rusqlite::params![key, value],
        )
        .with_context(|| format!("failed to write snapshot '{key}'"))?;
        Ok(())
    }
}

/// Process-local store for runs without a database file. Lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
