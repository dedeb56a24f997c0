/// Durable history store backed by redb.
///
/// Uses a single redb database file with three tables:
/// - `histories`: bincode-serialized `PersistedHistory<T>` keyed by context id
/// - `history_meta`: per-context `RecordMeta` keyed by context id
/// - `histories_by_modified`: `"{millis:020}#{context_id}"` → context id,
///   the secondary index used by age-based cleanup
///
/// All database work runs on tokio's blocking pool so callers on the edit
/// path never wait on disk I/O.
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::entry::{record_id, EntryId, HistorySnapshot, PersistableEntry, PersistedHistory};

/// Records table: context_id → bincode-serialized PersistedHistory.
const HISTORY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("histories");

/// Metadata table: context_id → bincode-serialized RecordMeta.
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("history_meta");

/// Modified-time index: composite string key → context_id.
const MODIFIED_INDEX: TableDefinition<&str, &str> = TableDefinition::new("histories_by_modified");

/// Version table: `"schema"` → schema version of the tables above.
const VERSION_TABLE: TableDefinition<&str, u32> = TableDefinition::new("schema_version");

const SCHEMA_VERSION: u32 = 1;

/// Errors returned by the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history store is not initialized")]
    NotInitialized,

    #[error("storage unavailable: {context}")]
    StorageUnavailable {
        context: &'static str,
        #[source]
        source: redb::Error,
    },

    #[error("failed to create data directory {}", .path.display())]
    DataDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history store schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("failed to serialize history for '{context_id}'")]
    Serialization {
        context_id: String,
        #[source]
        source: bincode::Error,
    },

    #[error("background storage task failed")]
    Task(#[from] tokio::task::JoinError),

    #[error("queued history write for '{context_id}' failed: {message}")]
    WriteFailed { context_id: String, message: String },

    #[error("history writer for '{context_id}' stopped")]
    WriterClosed { context_id: String },
}

/// Maps a redb error into [`StoreError::StorageUnavailable`] with an operation label.
fn storage<E: Into<redb::Error>>(context: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::StorageUnavailable {
        context,
        source: e.into(),
    }
}

/// Lifecycle of a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Uninitialized,
    Initializing,
    Ready,
}

enum Connection {
    Uninitialized,
    Initializing,
    Ready(Arc<Database>),
}

/// Per-context metadata stored next to each record.
///
/// Readable without knowing the record's state type.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordMeta {
    last_modified_ms: i64,
    size_bytes: u64,
    undo_len: u32,
    redo_len: u32,
}

/// Summary of one stored history, as listed by [`HistoryStore::list_histories`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySummary {
    pub id: Uuid,
    pub context_id: String,
    pub last_modified: DateTime<Utc>,
    pub undo_len: usize,
    pub redo_len: usize,
    pub size_bytes: u64,
}

/// Aggregate view across all contexts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    /// Number of stored context records.
    pub total_entries: usize,
    /// Approximate serialized size of all records, in bytes.
    pub total_size: u64,
    /// Undo plus redo entries across all records.
    pub total_history_entries: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Borrowed form of [`PersistedHistory`] used when writing.
///
/// Field order and types must match `PersistedHistory` for bincode.
#[derive(Serialize)]
struct RecordRef<'a, T> {
    id: Uuid,
    context_id: &'a str,
    undo_stack: &'a [PersistableEntry<T>],
    redo_stack: &'a [PersistableEntry<T>],
    saved_state_id: Option<EntryId>,
    last_modified: DateTime<Utc>,
}

/// Formats a modified-index key.
///
/// The millisecond timestamp is zero-padded to 20 digits so lexicographic
/// order in the B-tree matches chronological order.
fn index_key(last_modified_ms: i64, context_id: &str) -> String {
    let millis = u64::try_from(last_modified_ms).unwrap_or(0);
    format!("{millis:020}#{context_id}")
}

/// Exclusive upper bound selecting every index key strictly older than `cutoff_ms`.
fn index_cutoff(cutoff_ms: i64) -> String {
    let millis = u64::try_from(cutoff_ms).unwrap_or(0);
    format!("{millis:020}#")
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Durable, asynchronous history store shared by all contexts.
///
/// Construct once at startup, call [`initialize`](Self::initialize), and hand
/// clones of the `Arc` to whoever needs it.
pub struct HistoryStore {
    config: StoreConfig,
    connection: Mutex<Connection>,
    init_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("database", &self.config.database_path())
            .field("status", &self.status())
            .finish()
    }
}

impl HistoryStore {
    /// Creates an uninitialized store handle.
    pub fn new(config: StoreConfig) -> Arc<Self> {
        Arc::new(Self {
            config: config.sanitized(),
            connection: Mutex::new(Connection::Uninitialized),
            init_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn status(&self) -> StoreStatus {
        match *self.lock_connection() {
            Connection::Uninitialized => StoreStatus::Uninitialized,
            Connection::Initializing => StoreStatus::Initializing,
            Connection::Ready(_) => StoreStatus::Ready,
        }
    }

    /// Opens or creates the database and ensures its tables exist.
    ///
    /// Idempotent: concurrent and repeated calls share one open database.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created or the
    /// database cannot be opened. The store stays uninitialized.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let _guard = self.init_lock.lock().await;
        if matches!(*self.lock_connection(), Connection::Ready(_)) {
            return Ok(());
        }

        *self.lock_connection() = Connection::Initializing;
        let data_dir = self.config.data_dir.clone();
        let db_path = self.config.database_path();
        let opened = tokio::task::spawn_blocking(move || open_database(data_dir, db_path))
            .await
            .map_err(StoreError::from)
            .and_then(|result| result);

        match opened {
            Ok(db) => {
                tracing::info!(
                    "History store ready at {}",
                    self.config.database_path().display()
                );
                *self.lock_connection() = Connection::Ready(Arc::new(db));
                Ok(())
            }
            Err(e) => {
                *self.lock_connection() = Connection::Uninitialized;
                Err(e)
            }
        }
    }

    /// Releases the database handle. The store returns to `Uninitialized`.
    ///
    /// In-flight operations keep their own handle and finish normally.
    pub async fn close(&self) {
        let _guard = self.init_lock.lock().await;
        *self.lock_connection() = Connection::Uninitialized;
        tracing::debug!("History store closed");
    }

    /// Overwrites the stored history for `context_id`.
    ///
    /// Entries are already stripped of inverse actions by their type.
    /// Stamps `last_modified` with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized, serialization
    /// fails, or the write transaction fails.
    pub async fn save_history<T: Serialize>(
        &self,
        context_id: &str,
        undo_stack: &[PersistableEntry<T>],
        redo_stack: &[PersistableEntry<T>],
        saved_state_id: Option<EntryId>,
    ) -> Result<(), StoreError> {
        self.save_history_at(context_id, undo_stack, redo_stack, saved_state_id, Utc::now())
            .await
    }

    /// Overwrites the stored history for `context_id` from a snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`save_history`](Self::save_history).
    pub async fn save_snapshot<T: Serialize>(
        &self,
        context_id: &str,
        snapshot: &HistorySnapshot<T>,
    ) -> Result<(), StoreError> {
        self.save_history(
            context_id,
            &snapshot.undo_stack,
            &snapshot.redo_stack,
            snapshot.saved_state_id,
        )
        .await
    }

    async fn save_history_at<T: Serialize>(
        &self,
        context_id: &str,
        undo_stack: &[PersistableEntry<T>],
        redo_stack: &[PersistableEntry<T>],
        saved_state_id: Option<EntryId>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let db = self.database()?;
        let record = RecordRef {
            id: record_id(context_id),
            context_id,
            undo_stack,
            redo_stack,
            saved_state_id,
            last_modified: now,
        };
        let bytes = bincode::serialize(&record).map_err(|source| StoreError::Serialization {
            context_id: context_id.to_string(),
            source,
        })?;
        let meta = RecordMeta {
            last_modified_ms: now.timestamp_millis(),
            size_bytes: bytes.len() as u64,
            undo_len: u32::try_from(undo_stack.len()).unwrap_or(u32::MAX),
            redo_len: u32::try_from(redo_stack.len()).unwrap_or(u32::MAX),
        };
        let meta_bytes = bincode::serialize(&meta).map_err(|source| StoreError::Serialization {
            context_id: context_id.to_string(),
            source,
        })?;

        let context_id = context_id.to_string();
        tokio::task::spawn_blocking(move || {
            write_record(&db, &context_id, &bytes, &meta, &meta_bytes)
        })
        .await??;
        Ok(())
    }

    /// Loads the stored history for `context_id`.
    ///
    /// Returns `None` if no record exists. A record that fails to decode is
    /// treated as absent and logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized or the read fails.
    pub async fn load_history<T: DeserializeOwned>(
        &self,
        context_id: &str,
    ) -> Result<Option<PersistedHistory<T>>, StoreError> {
        let db = self.database()?;
        let key = context_id.to_string();
        let bytes = tokio::task::spawn_blocking(move || read_record(&db, &key)).await??;

        let Some(bytes) = bytes else {
            return Ok(None);
        };
        match bincode::deserialize::<PersistedHistory<T>>(&bytes) {
            Ok(record) if record.context_id == context_id => Ok(Some(record)),
            Ok(record) => {
                tracing::warn!(
                    "Ignoring history record for '{context_id}' stored under '{}'",
                    record.context_id
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("Ignoring corrupt history record for '{context_id}': {e}");
                Ok(None)
            }
        }
    }

    /// Removes the stored history for `context_id`. Returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized or the write fails.
    pub async fn delete_history(&self, context_id: &str) -> Result<bool, StoreError> {
        let db = self.database()?;
        let key = context_id.to_string();
        let removed = tokio::task::spawn_blocking(move || remove_records(&db, &[key])).await??;
        tracing::debug!("Deleted history for '{context_id}'");
        Ok(removed > 0)
    }

    /// Removes every stored history. Returns how many records were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized or the write fails.
    pub async fn delete_all_history(&self) -> Result<usize, StoreError> {
        let db = self.database()?;
        let removed = tokio::task::spawn_blocking(move || clear_all(&db)).await??;
        tracing::info!("Deleted all {removed} stored histories");
        Ok(removed)
    }

    /// Removes records older than the configured `max_age_days`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized or the write fails.
    pub async fn cleanup_old_history(&self) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.max_age_days));
        self.cleanup_older_than(cutoff).await
    }

    /// Removes every record whose `last_modified` is strictly before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized or the write fails.
    pub async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let db = self.database()?;
        let cutoff_ms = cutoff.timestamp_millis();
        let removed =
            tokio::task::spawn_blocking(move || remove_older_than(&db, cutoff_ms)).await??;
        if removed > 0 {
            tracing::info!("Cleaned up {removed} histories older than {cutoff}");
        }
        Ok(removed)
    }

    /// Lists a summary of every stored history, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized or the read fails.
    pub async fn list_histories(&self) -> Result<Vec<HistorySummary>, StoreError> {
        let db = self.database()?;
        let mut summaries: Vec<HistorySummary> =
            tokio::task::spawn_blocking(move || read_all_meta(&db))
                .await??
                .into_iter()
                .map(|(context_id, meta)| HistorySummary {
                    id: record_id(&context_id),
                    context_id,
                    last_modified: from_millis(meta.last_modified_ms),
                    undo_len: meta.undo_len as usize,
                    redo_len: meta.redo_len as usize,
                    size_bytes: meta.size_bytes,
                })
                .collect();
        summaries.sort_by(|a, b| {
            a.last_modified
                .cmp(&b.last_modified)
                .then_with(|| a.context_id.cmp(&b.context_id))
        });
        Ok(summaries)
    }

    /// Aggregate counts, sizes and age range across all contexts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not initialized or the read fails.
    pub async fn get_statistics(&self) -> Result<StoreStatistics, StoreError> {
        let summaries = self.list_histories().await?;
        Ok(StoreStatistics {
            total_entries: summaries.len(),
            total_size: summaries.iter().map(|s| s.size_bytes).sum(),
            total_history_entries: summaries.iter().map(|s| s.undo_len + s.redo_len).sum(),
            oldest_entry: summaries.iter().map(|s| s.last_modified).min(),
            newest_entry: summaries.iter().map(|s| s.last_modified).max(),
        })
    }

    fn database(&self) -> Result<Arc<Database>, StoreError> {
        match &*self.lock_connection() {
            Connection::Ready(db) => Ok(Arc::clone(db)),
            _ => Err(StoreError::NotInitialized),
        }
    }

    fn lock_connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates the data directory, opens the database and ensures every table exists.
fn open_database(data_dir: PathBuf, db_path: PathBuf) -> Result<Database, StoreError> {
    std::fs::create_dir_all(&data_dir).map_err(|source| StoreError::DataDirectory {
        path: data_dir.clone(),
        source,
    })?;

    let db = Database::create(&db_path).map_err(storage("Failed to open history database"))?;

    let write_txn = db
        .begin_write()
        .map_err(storage("Failed to begin initial write transaction"))?;
    {
        let _ = write_txn
            .open_table(HISTORY_TABLE)
            .map_err(storage("Failed to create histories table"))?;
        let _ = write_txn
            .open_table(META_TABLE)
            .map_err(storage("Failed to create history_meta table"))?;
        let _ = write_txn
            .open_table(MODIFIED_INDEX)
            .map_err(storage("Failed to create modified index"))?;

        let mut version = write_txn
            .open_table(VERSION_TABLE)
            .map_err(storage("Failed to create schema_version table"))?;
        let found = version
            .get("schema")
            .map_err(storage("Failed to read schema version"))?
            .map(|guard| guard.value());
        match found {
            Some(found) if found > SCHEMA_VERSION => {
                return Err(StoreError::UnsupportedSchema {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(_) => {}
            None => {
                version
                    .insert("schema", SCHEMA_VERSION)
                    .map_err(storage("Failed to write schema version"))?;
            }
        }
    }
    write_txn
        .commit()
        .map_err(storage("Failed to commit initial transaction"))?;

    Ok(db)
}

/// Decodes a metadata row, logging and returning `None` if it is corrupt.
fn decode_meta(context_id: &str, bytes: &[u8]) -> Option<RecordMeta> {
    match bincode::deserialize(bytes) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::warn!("Corrupt history metadata for '{context_id}': {e}");
            None
        }
    }
}

/// Removes every index row pointing at `context_id`. Full scan; only used
/// when the metadata no longer says which row is current.
fn sweep_index_for(
    index: &mut Table<'_, &'static str, &'static str>,
    context_id: &str,
) -> Result<usize, StoreError> {
    let mut stale = Vec::new();
    for entry in index
        .iter()
        .map_err(storage("Failed to iterate modified index"))?
    {
        let (key_guard, value_guard) = entry.map_err(storage("Failed to read index entry"))?;
        if value_guard.value() == context_id {
            stale.push(key_guard.value().to_string());
        }
    }
    for key in &stale {
        index
            .remove(key.as_str())
            .map_err(storage("Failed to remove stale index entry"))?;
    }
    Ok(stale.len())
}

/// Writes a record, its metadata and its index key in one transaction,
/// replacing the index key of any previous record for the same context.
fn write_record(
    db: &Database,
    context_id: &str,
    bytes: &[u8],
    meta: &RecordMeta,
    meta_bytes: &[u8],
) -> Result<(), StoreError> {
    let write_txn = db
        .begin_write()
        .map_err(storage("Failed to begin write transaction"))?;
    {
        let mut meta_table = write_txn
            .open_table(META_TABLE)
            .map_err(storage("Failed to open history_meta table"))?;
        // Outer `None`: no previous row. Inner `None`: the row is corrupt.
        let previous: Option<Option<RecordMeta>> = meta_table
            .get(context_id)
            .map_err(storage("Failed to read history metadata"))?
            .map(|guard| decode_meta(context_id, guard.value()));
        meta_table
            .insert(context_id, meta_bytes)
            .map_err(storage("Failed to insert history metadata"))?;

        let mut index = write_txn
            .open_table(MODIFIED_INDEX)
            .map_err(storage("Failed to open modified index"))?;
        match previous {
            Some(Some(previous)) => {
                let old_key = index_key(previous.last_modified_ms, context_id);
                index
                    .remove(old_key.as_str())
                    .map_err(storage("Failed to remove stale index entry"))?;
            }
            Some(None) => {
                sweep_index_for(&mut index, context_id)?;
            }
            None => {}
        }
        let new_key = index_key(meta.last_modified_ms, context_id);
        index
            .insert(new_key.as_str(), context_id)
            .map_err(storage("Failed to insert index entry"))?;

        let mut table = write_txn
            .open_table(HISTORY_TABLE)
            .map_err(storage("Failed to open histories table"))?;
        table
            .insert(context_id, bytes)
            .map_err(storage("Failed to insert history record"))?;
    }
    write_txn
        .commit()
        .map_err(storage("Failed to commit history record"))?;
    Ok(())
}

fn read_record(db: &Database, context_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let read_txn = db
        .begin_read()
        .map_err(storage("Failed to begin read transaction"))?;
    let table = read_txn
        .open_table(HISTORY_TABLE)
        .map_err(storage("Failed to open histories table"))?;

    let bytes = table
        .get(context_id)
        .map_err(storage("Failed to read history record"))?
        .map(|guard| guard.value().to_vec());
    Ok(bytes)
}

fn read_all_meta(db: &Database) -> Result<Vec<(String, RecordMeta)>, StoreError> {
    let read_txn = db
        .begin_read()
        .map_err(storage("Failed to begin read transaction"))?;
    let table = read_txn
        .open_table(META_TABLE)
        .map_err(storage("Failed to open history_meta table"))?;

    let mut metas = Vec::new();
    for entry in table
        .iter()
        .map_err(storage("Failed to iterate history_meta table"))?
    {
        let (key_guard, value_guard) = entry.map_err(storage("Failed to read metadata entry"))?;
        let context_id = key_guard.value().to_string();
        if let Some(meta) = decode_meta(&context_id, value_guard.value()) {
            metas.push((context_id, meta));
        }
    }
    Ok(metas)
}

/// Removes the records, metadata and index keys of the given contexts.
/// Returns how many records existed.
fn remove_records(db: &Database, context_ids: &[String]) -> Result<usize, StoreError> {
    let write_txn = db
        .begin_write()
        .map_err(storage("Failed to begin write transaction"))?;
    let mut removed = 0;
    {
        let mut table = write_txn
            .open_table(HISTORY_TABLE)
            .map_err(storage("Failed to open histories table"))?;
        let mut meta_table = write_txn
            .open_table(META_TABLE)
            .map_err(storage("Failed to open history_meta table"))?;
        let mut index = write_txn
            .open_table(MODIFIED_INDEX)
            .map_err(storage("Failed to open modified index"))?;

        for context_id in context_ids {
            let meta: Option<Option<RecordMeta>> = meta_table
                .remove(context_id.as_str())
                .map_err(storage("Failed to remove history metadata"))?
                .map(|guard| decode_meta(context_id, guard.value()));
            match meta {
                Some(Some(meta)) => {
                    let key = index_key(meta.last_modified_ms, context_id);
                    index
                        .remove(key.as_str())
                        .map_err(storage("Failed to remove index entry"))?;
                }
                Some(None) => {
                    sweep_index_for(&mut index, context_id)?;
                }
                None => {}
            }
            let existed = table
                .remove(context_id.as_str())
                .map_err(storage("Failed to remove history record"))?
                .is_some();
            if existed {
                removed += 1;
            }
        }
    }
    write_txn
        .commit()
        .map_err(storage("Failed to commit deletion"))?;
    Ok(removed)
}

/// Removes every record last modified strictly before `cutoff_ms`.
///
/// The index scan and the removals share one write transaction, and each
/// index hit is checked against the record's metadata before anything is
/// deleted, so a record saved after the cutoff is never removed.
fn remove_older_than(db: &Database, cutoff_ms: i64) -> Result<usize, StoreError> {
    let bound = index_cutoff(cutoff_ms);
    let write_txn = db
        .begin_write()
        .map_err(storage("Failed to begin write transaction"))?;
    let mut removed = 0;
    {
        let mut table = write_txn
            .open_table(HISTORY_TABLE)
            .map_err(storage("Failed to open histories table"))?;
        let mut meta_table = write_txn
            .open_table(META_TABLE)
            .map_err(storage("Failed to open history_meta table"))?;
        let mut index = write_txn
            .open_table(MODIFIED_INDEX)
            .map_err(storage("Failed to open modified index"))?;

        let mut expired = Vec::new();
        for entry in index
            .range::<&str>(..bound.as_str())
            .map_err(storage("Failed to range query modified index"))?
        {
            let (key_guard, value_guard) = entry.map_err(storage("Failed to read index entry"))?;
            expired.push((
                key_guard.value().to_string(),
                value_guard.value().to_string(),
            ));
        }

        for (key, context_id) in expired {
            index
                .remove(key.as_str())
                .map_err(storage("Failed to remove index entry"))?;

            let meta = meta_table
                .get(context_id.as_str())
                .map_err(storage("Failed to read history metadata"))?
                .and_then(|guard| decode_meta(&context_id, guard.value()));
            let still_live = match &meta {
                Some(meta) => meta.last_modified_ms >= cutoff_ms,
                // Without metadata, a newer index row is the only evidence of a fresh save.
                None => has_index_row_from(&index, &bound, &context_id)?,
            };
            if still_live {
                tracing::debug!("Dropped stale index entry {key} for '{context_id}'");
                continue;
            }

            if let Some(meta) = meta {
                let current_key = index_key(meta.last_modified_ms, &context_id);
                index
                    .remove(current_key.as_str())
                    .map_err(storage("Failed to remove index entry"))?;
            }
            meta_table
                .remove(context_id.as_str())
                .map_err(storage("Failed to remove history metadata"))?;
            let existed = table
                .remove(context_id.as_str())
                .map_err(storage("Failed to remove history record"))?
                .is_some();
            if existed {
                removed += 1;
            }
        }
    }
    write_txn
        .commit()
        .map_err(storage("Failed to commit cleanup"))?;
    Ok(removed)
}

/// Whether any index row at or after `bound` points at `context_id`.
fn has_index_row_from(
    index: &Table<'_, &'static str, &'static str>,
    bound: &str,
    context_id: &str,
) -> Result<bool, StoreError> {
    for entry in index
        .range::<&str>(bound..)
        .map_err(storage("Failed to range query modified index"))?
    {
        let (_, value_guard) = entry.map_err(storage("Failed to read index entry"))?;
        if value_guard.value() == context_id {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Drops and recreates every data table. Returns how many records existed.
fn clear_all(db: &Database) -> Result<usize, StoreError> {
    let write_txn = db
        .begin_write()
        .map_err(storage("Failed to begin write transaction"))?;
    let mut count = 0;
    {
        let table = write_txn
            .open_table(HISTORY_TABLE)
            .map_err(storage("Failed to open histories table"))?;
        for entry in table
            .iter()
            .map_err(storage("Failed to iterate histories table"))?
        {
            entry.map_err(storage("Failed to read history entry"))?;
            count += 1;
        }
    }

    // Metadata or index rows without a record are swept too.
    write_txn
        .delete_table(META_TABLE)
        .map_err(storage("Failed to clear history_meta table"))?;
    write_txn
        .delete_table(MODIFIED_INDEX)
        .map_err(storage("Failed to clear modified index"))?;
    write_txn
        .delete_table(HISTORY_TABLE)
        .map_err(storage("Failed to clear histories table"))?;
    {
        let _ = write_txn
            .open_table(HISTORY_TABLE)
            .map_err(storage("Failed to recreate histories table"))?;
        let _ = write_txn
            .open_table(META_TABLE)
            .map_err(storage("Failed to recreate history_meta table"))?;
        let _ = write_txn
            .open_table(MODIFIED_INDEX)
            .map_err(storage("Failed to recreate modified index"))?;
    }
    write_txn
        .commit()
        .map_err(storage("Failed to commit deletion"))?;
    Ok(count)
}
