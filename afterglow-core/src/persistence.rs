//! SQLite-backed asset store for archived memories.
//!
//! Two tables hold everything the archive needs:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS memories (
//!     id             TEXT PRIMARY KEY,
//!     created_at     TEXT NOT NULL,
//!     schema_version INTEGER NOT NULL,
//!     data           BLOB NOT NULL
//! );
//! CREATE TABLE IF NOT EXISTS assets (
//!     key  TEXT PRIMARY KEY,
//!     mime TEXT NOT NULL,
//!     blob BLOB NOT NULL
//! );
//! ```
//!
//! - Records are JSON inside a BLOB column, tagged with their schema version.
//! - A record and both of its image blobs are written in one transaction.
//! - Assets are immutable once written and never pruned.
//!
//! Async callers go through [`AssetSource`], which runs every call on the
//! blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{ArchiveError, Result};
use crate::types::{Asset, Blob, MemoryPayload, MemoryRecord, SCHEMA_VERSION};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id             TEXT PRIMARY KEY,
    created_at     TEXT NOT NULL,
    schema_version INTEGER NOT NULL,
    data           BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at);
CREATE TABLE IF NOT EXISTS assets (
    key  TEXT PRIMARY KEY,
    mime TEXT NOT NULL,
    blob BLOB NOT NULL
);";

// ---------------------------------------------------------------------------
// AssetStore
// ---------------------------------------------------------------------------

/// Handle to the SQLite database holding memory records and image assets.
///
/// Cloning is cheap; clones share one connection.
///
/// ```no_run
/// # use afterglow_core::persistence::AssetStore;
/// # use afterglow_core::config::PersistenceConfig;
/// let store = AssetStore::open("afterglow.db", &PersistenceConfig::default())?;
/// for record in store.get_memories()? {
///     let record = record?;
///     println!("{} {}", record.id, record.created_at);
/// }
/// # Ok::<(), afterglow_core::error::ArchiveError>(())
/// ```
#[derive(Clone)]
pub struct AssetStore {
    conn: Arc<Mutex<Connection>>,
    config: PersistenceConfig,
    db_path: PathBuf,
}

impl std::fmt::Debug for AssetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStore")
            .field("db_path", &self.db_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AssetStore {
    /// Open (or create) the store at `path` and initialize the schema.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::StorageUnavailable`] if the file cannot be
    /// opened, configured or initialized. Callers are expected to fall back to
    /// [`AssetStore::open_in_memory`].
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ArchiveError::StorageUnavailable(e.to_string()))?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags).map_err(unavailable)?;

        if config.wal_mode {
            // journal_mode returns a row, so it cannot go through execute_batch.
            let _mode: String = conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
                .map_err(unavailable)?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")
            .map_err(unavailable)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(unavailable)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            config: config.clone(),
            db_path,
        };
        store.init().map_err(unavailable_from)?;

        info!(
            path = %store.db_path.display(),
            wal = config.wal_mode,
            "Asset store opened"
        );
        Ok(store)
    }

    /// Open a store that lives only for this process.
    ///
    /// Used by tests and as the session-only fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::StorageUnavailable`] on SQLite failures.
    pub fn open_in_memory(config: &PersistenceConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            config: config.clone(),
            db_path: PathBuf::from(":memory:"),
        };
        store.init().map_err(unavailable_from)?;
        Ok(store)
    }

    /// Create the tables and index if they are missing. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Database`] on SQLite failures.
    pub fn init(&self) -> Result<()> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Persist a record together with both of its image blobs.
    ///
    /// The payload is validated before anything touches the database. The
    /// two assets and the record row are written in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::InvalidMemoryPayload`] if either blob is
    /// absent, [`ArchiveError::Serialization`] if the record cannot be
    /// encoded, or [`ArchiveError::Database`] on SQLite failures (the
    /// transaction is rolled back).
    pub fn save_memory(&self, record: &MemoryRecord, payload: &MemoryPayload) -> Result<()> {
        let start = Instant::now();

        let thumb = payload
            .thumb
            .as_ref()
            .ok_or(ArchiveError::InvalidMemoryPayload { missing: "thumb" })?;
        let render = payload
            .render
            .as_ref()
            .ok_or(ArchiveError::InvalidMemoryPayload { missing: "render" })?;

        let json =
            serde_json::to_vec(record).map_err(|e| ArchiveError::Serialization(e.to_string()))?;
        let created_at = record
            .created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        insert_asset(&tx, &record.assets.thumb_key, thumb)?;
        insert_asset(&tx, &record.assets.render_key, render)?;
        tx.execute(
            "INSERT INTO memories (id, created_at, schema_version, data)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                created_at = excluded.created_at,
                schema_version = excluded.schema_version,
                data = excluded.data",
            params![record.id.to_string(), created_at, record.schema_version, json],
        )?;
        tx.commit()?;

        debug!(
            memory = %record.id,
            thumb_bytes = thumb.bytes.len(),
            render_bytes = render.bytes.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Saved memory"
        );
        Ok(())
    }

    /// Read every record, newest first.
    ///
    /// Rows are decoded lazily as the cursor is advanced. A row that cannot
    /// be decoded yields an `Err` item and iteration continues.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Database`] if the query itself fails.
    pub fn get_memories(&self) -> Result<MemoryCursor> {
        let start = Instant::now();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, schema_version, data FROM memories
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RawRecord {
                    id: row.get(0)?,
                    schema_version: row.get(1)?,
                    data: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(
            rows = rows.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Queried memories"
        );
        Ok(MemoryCursor {
            rows: rows.into_iter(),
        })
    }

    /// Fetch one asset by key.
    ///
    /// A missing or empty key is `Ok(None)`, never an error.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Database`] on SQLite failures.
    pub fn get_asset(&self, key: &str) -> Result<Option<Asset>> {
        if key.is_empty() {
            return Ok(None);
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT mime, blob FROM assets WHERE key = ?1")?;
        let asset = stmt
            .query_row(params![key], |row| {
                Ok(Asset {
                    key: key.to_string(),
                    mime: row.get(0)?,
                    blob: row.get(1)?,
                })
            })
            .optional()?;
        Ok(asset)
    }

    /// Number of stored records, regardless of schema version.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Database`] on SQLite failures.
    pub fn memory_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Copy the database to `dest_path` with SQLite's online-backup API.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Database`] on SQLite failures.
    pub fn backup<P: AsRef<Path>>(&self, dest_path: P) -> Result<()> {
        let start = Instant::now();
        let mut dest = Connection::open(dest_path.as_ref())?;
        {
            let conn = self.conn.lock();
            let backup = rusqlite::backup::Backup::new(&conn, &mut dest)?;
            backup.run_to_completion(256, Duration::from_millis(50), None)?;
        }

        info!(
            dest = %dest_path.as_ref().display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Database backup completed"
        );
        Ok(())
    }

    /// Run `PRAGMA integrity_check`. `Ok(false)` means corruption.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .lock()
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Path of the database file (`:memory:` for in-memory stores).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Whether this store is backed by a file.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.db_path.as_os_str() != ":memory:"
    }
}

fn insert_asset(tx: &rusqlite::Transaction<'_>, key: &str, blob: &Blob) -> Result<()> {
    // Assets are immutable: a rewrite of the same key keeps the first blob.
    tx.execute(
        "INSERT OR IGNORE INTO assets (key, mime, blob) VALUES (?1, ?2, ?3)",
        params![key, blob.mime, blob.bytes],
    )?;
    Ok(())
}

fn unavailable(e: rusqlite::Error) -> ArchiveError {
    ArchiveError::StorageUnavailable(e.to_string())
}

fn unavailable_from(e: ArchiveError) -> ArchiveError {
    match e {
        ArchiveError::StorageUnavailable(_) => e,
        other => ArchiveError::StorageUnavailable(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// MemoryCursor
// ---------------------------------------------------------------------------

struct RawRecord {
    id: String,
    schema_version: u32,
    data: Vec<u8>,
}

/// One-shot, newest-first iterator over stored records.
///
/// Each row is decoded when it is reached. Call
/// [`AssetStore::get_memories`] again to re-read.
pub struct MemoryCursor {
    rows: std::vec::IntoIter<RawRecord>,
}

impl std::fmt::Debug for MemoryCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCursor")
            .field("remaining", &self.rows.len())
            .finish()
    }
}

impl MemoryCursor {
    /// A cursor with nothing in it.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rows: Vec::new().into_iter(),
        }
    }
}

impl Iterator for MemoryCursor {
    type Item = Result<MemoryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.rows.next()?;
        Some(decode_record(raw))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for MemoryCursor {}

fn decode_record(raw: RawRecord) -> Result<MemoryRecord> {
    match serde_json::from_slice::<MemoryRecord>(&raw.data) {
        Ok(record) => Ok(record),
        // A row from another schema may not even parse; report it as such.
        Err(_) if raw.schema_version != SCHEMA_VERSION => Err(ArchiveError::SchemaMismatch {
            id: raw.id,
            found: raw.schema_version,
            expected: SCHEMA_VERSION,
        }),
        Err(e) => {
            warn!(id = %raw.id, error = %e, "Undecodable memory row");
            Err(ArchiveError::Serialization(e.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// AssetSource
// ---------------------------------------------------------------------------

/// Async access to stored records and assets.
///
/// Every call is a suspension point for the caller.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Persist a record with its two blobs, all-or-nothing.
    async fn store_memory(&self, record: MemoryRecord, payload: MemoryPayload) -> Result<()>;

    /// Read all records, newest first.
    async fn load_memories(&self) -> Result<MemoryCursor>;

    /// Fetch an asset; `None` when the key is unknown.
    async fn load_asset(&self, key: &str) -> Result<Option<Asset>>;
}

#[async_trait]
impl AssetSource for AssetStore {
    async fn store_memory(&self, record: MemoryRecord, payload: MemoryPayload) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_memory(&record, &payload))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?
    }

    async fn load_memories(&self) -> Result<MemoryCursor> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get_memories())
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?
    }

    async fn load_asset(&self, key: &str) -> Result<Option<Asset>> {
        let store = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || store.get_asset(&key))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?
    }
}

/// Extension trait that adds an `.optional()` combinator to `rusqlite::Result`.
trait OptionalExt<T> {
    /// Convert `QueryReturnedNoRows` into `Ok(None)`.
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> std::result::Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
