//! SQLite-backed persistent tier.
//!
//! Cache rows and the collection log live in two tables. Reads and sweeps
//! are indexed queries; every write is a single statement, so it either
//! lands completely or not at all. Statements run on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use super::{CacheStats, CollectionLogSink, PersistentStore};
use crate::types::{CacheRecord, CollectionLogEntry, RecordKey};
use crate::{Result, StagingError};

/// Schema version written by this build.
const SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_records (
        id TEXT PRIMARY KEY,
        data_type TEXT NOT NULL,
        cache_key TEXT NOT NULL,
        region TEXT NOT NULL,
        game_version TEXT NOT NULL,
        payload TEXT NOT NULL,
        captured_at INTEGER NOT NULL,
        expires_at INTEGER,
        is_valid INTEGER NOT NULL,
        source TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_cache_records_key
        ON cache_records (data_type, cache_key, region, game_version, captured_at);
    CREATE INDEX IF NOT EXISTS idx_cache_records_expiry
        ON cache_records (is_valid, expires_at);
    CREATE TABLE IF NOT EXISTS collection_log (
        id TEXT PRIMARY KEY,
        collection_type TEXT NOT NULL,
        target TEXT NOT NULL,
        region TEXT NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        records_collected INTEGER NOT NULL,
        execution_time_ms INTEGER,
        timestamp INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_collection_log_timestamp
        ON collection_log (timestamp);
";

const RECORD_COLUMNS: &str = "id, data_type, cache_key, region, game_version, payload, \
                              captured_at, expires_at, is_valid, source";

/// Durable store in a single SQLite database file (WAL journal).
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    ///
    /// A file that is not a database, or one written by a newer schema, is
    /// an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StagingError::Store(format!(
                    "failed to create store dir {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let mut conn = Connection::open_with_flags(&path, flags)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "wal", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "normal")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        initialize_schema(&mut conn)?;

        debug!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StagingError::Store("sqlite store lock poisoned".to_string()))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| StagingError::Store(format!("store task failed: {e}")))?
    }

    /// Every collection log entry, oldest first.
    pub async fn log_entries(&self) -> Result<Vec<CollectionLogEntry>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, collection_type, target, region, status, error_message, \
                 records_collected, execution_time_ms, timestamp \
                 FROM collection_log ORDER BY timestamp, rowid",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(LogRow {
                    id: row.get(0)?,
                    collection_type: row.get(1)?,
                    target: row.get(2)?,
                    region: row.get(3)?,
                    status: row.get(4)?,
                    error_message: row.get(5)?,
                    records_collected: row.get(6)?,
                    execution_time_ms: row.get(7)?,
                    timestamp: row.get(8)?,
                })
            })?;
            rows.map(|row| row?.into_entry()).collect()
        })
        .await
    }

    /// Number of rows, valid or not.
    pub async fn record_count(&self) -> Result<u64> {
        self.run(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM cache_records", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}

fn initialize_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", [], |row| row.get(0))
        .optional()?;
    match version {
        None => {
            tx.execute(
                "INSERT INTO store_meta (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            return Err(StagingError::Store(format!(
                "unsupported store version {v} (max supported: {SCHEMA_VERSION})"
            )));
        }
        Some(_) => {}
    }
    tx.execute_batch(SCHEMA)?;
    tx.commit()?;
    Ok(())
}

/// Nanoseconds since the epoch, saturating outside 1677..2262.
fn to_nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt()
        .unwrap_or(if t.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_nanos(nanos)
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).map_err(|e| StagingError::Store(format!("bad row id '{id}': {e}")))
}

struct RecordRow {
    id: String,
    data_type: String,
    cache_key: String,
    region: String,
    game_version: String,
    payload: String,
    captured_at: i64,
    expires_at: Option<i64>,
    is_valid: bool,
    source: String,
}

impl RecordRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            data_type: row.get(1)?,
            cache_key: row.get(2)?,
            region: row.get(3)?,
            game_version: row.get(4)?,
            payload: row.get(5)?,
            captured_at: row.get(6)?,
            expires_at: row.get(7)?,
            is_valid: row.get(8)?,
            source: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<CacheRecord> {
        Ok(CacheRecord {
            id: parse_id(&self.id)?,
            key: RecordKey {
                data_type: self.data_type.parse()?,
                cache_key: self.cache_key,
                region: self.region.parse()?,
                game_version: self.game_version.parse()?,
            },
            payload: serde_json::from_str(&self.payload)?,
            captured_at: from_nanos(self.captured_at),
            expires_at: self.expires_at.map(from_nanos),
            is_valid: self.is_valid,
            source: self.source.parse()?,
        })
    }
}

struct LogRow {
    id: String,
    collection_type: String,
    target: String,
    region: String,
    status: String,
    error_message: Option<String>,
    records_collected: i64,
    execution_time_ms: Option<i64>,
    timestamp: i64,
}

impl LogRow {
    fn into_entry(self) -> Result<CollectionLogEntry> {
        Ok(CollectionLogEntry {
            id: parse_id(&self.id)?,
            collection_type: self.collection_type.parse()?,
            target: self.target,
            region: self.region.parse()?,
            status: self.status.parse()?,
            error_message: self.error_message,
            records_collected: self.records_collected.max(0) as u64,
            execution_time_ms: self.execution_time_ms.map(|ms| ms.max(0) as u64),
            timestamp: from_nanos(self.timestamp),
        })
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn insert(&self, record: CacheRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO cache_records ({RECORD_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    record.id.to_string(),
                    record.key.data_type.as_str(),
                    record.key.cache_key,
                    record.key.region.as_str(),
                    record.key.game_version.as_str(),
                    payload,
                    to_nanos(record.captured_at),
                    record.expires_at.map(to_nanos),
                    record.is_valid,
                    record.source.as_str(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn latest_valid(
        &self,
        key: &RecordKey,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheRecord>> {
        let key = key.clone();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM cache_records \
                         WHERE data_type = ?1 AND cache_key = ?2 AND region = ?3 \
                         AND game_version = ?4 AND is_valid = 1 \
                         AND (expires_at IS NULL OR expires_at > ?5) \
                         ORDER BY captured_at DESC LIMIT 1"
                    ),
                    params![
                        key.data_type.as_str(),
                        key.cache_key,
                        key.region.as_str(),
                        key.game_version.as_str(),
                        to_nanos(now),
                    ],
                    RecordRow::from_row,
                )
                .optional()?;
            row.map(RecordRow::into_record).transpose()
        })
        .await
    }

    async fn invalidate_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE cache_records SET is_valid = 0 \
                 WHERE is_valid = 1 AND expires_at IS NOT NULL AND expires_at < ?1",
                params![to_nanos(now)],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    async fn stats(&self) -> Result<CacheStats> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT data_type, COUNT(*), MAX(captured_at) FROM cache_records \
                 WHERE is_valid = 1 GROUP BY data_type",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })?;

            let mut stats = CacheStats::default();
            for row in rows {
                let (data_type, count, latest) = row?;
                let entry = stats.cache_entries.entry(data_type.parse()?).or_default();
                entry.count = count.max(0) as u64;
                entry.latest = latest.map(from_nanos);
                stats.total_cached_items += entry.count;
            }
            Ok(stats)
        })
        .await
    }
}

#[async_trait]
impl CollectionLogSink for SqliteStore {
    async fn append(&self, entry: CollectionLogEntry) -> Result<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO collection_log (id, collection_type, target, region, status, \
                 error_message, records_collected, execution_time_ms, timestamp) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.id.to_string(),
                    entry.collection_type.as_str(),
                    entry.target,
                    entry.region.as_str(),
                    entry.status.as_str(),
                    entry.error_message,
                    entry.records_collected as i64,
                    entry.execution_time_ms.map(|ms| ms as i64),
                    to_nanos(entry.timestamp),
                ],
            )?;
            Ok(())
        })
        .await
    }
}
