//! Persistent table store.
//!
//! Each table is one durable entry holding its full snapshot. Reads go
//! through an LRU cache of decoded snapshots; writes hit the backend first
//! and only then refresh the cache, so a failed write leaves both durable
//! and cached state untouched.

use super::backend::{StorageBackend, StoredEntry};
use super::seed::seed_rows;
use crate::error::{Result, StoreError};
use crate::types::{Record, SnapshotEncoding, Timestamp};
use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix for table keys in the backend.
pub const TABLE_KEY_PREFIX: &str = "table-";

/// Current table snapshot schema version.
pub const TABLE_SCHEMA_VERSION: u32 = 1;

/// Versioned on-disk shape of a table.
#[derive(Serialize, Deserialize)]
struct TableSnapshot {
    schema_version: u32,
    rows: Vec<Record>,
}

/// Encode a value with the given snapshot encoding.
pub(crate) fn encode<T: Serialize>(encoding: SnapshotEncoding, value: &T) -> Result<Vec<u8>> {
    match encoding {
        SnapshotEncoding::Json => Ok(serde_json::to_vec(value)?),
        SnapshotEncoding::MessagePack => Ok(rmp_serde::to_vec_named(value)?),
    }
}

/// Decode an entry using the encoding recorded alongside it.
pub(crate) fn decode<T: DeserializeOwned>(entry: &StoredEntry) -> Result<T> {
    match entry.encoding {
        SnapshotEncoding::Json => serde_json::from_slice(&entry.payload)
            .map_err(|e| StoreError::Deserialization(e.to_string())),
        SnapshotEncoding::MessagePack => Ok(rmp_serde::from_slice(&entry.payload)?),
    }
}

fn table_key(table: &str) -> String {
    format!("{}{}", TABLE_KEY_PREFIX, table)
}

/// Durable backing for named record collections.
pub struct TableStore {
    backend: Arc<dyn StorageBackend>,

    /// Encoding for newly written snapshots. Existing entries are read with
    /// whatever encoding they were written in.
    encoding: SnapshotEncoding,

    /// Whether never-initialized tables get their default dataset.
    seed: bool,

    /// Decoded snapshots of recently used tables.
    cache: Mutex<LruCache<String, Vec<Record>>>,

    /// Serializes first-touch seeding.
    seed_lock: Mutex<()>,

    /// One write lock per table, created on demand.
    table_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TableStore {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        encoding: SnapshotEncoding,
        cache_size: usize,
        seed: bool,
    ) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            backend,
            encoding,
            seed,
            cache: Mutex::new(LruCache::new(cache_size)),
            seed_lock: Mutex::new(()),
            table_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The full current snapshot of `table`.
    ///
    /// A table that has never been written is seeded (if it has a default
    /// dataset) and the seed is persisted. Emptiness never triggers seeding.
    ///
    /// Takes the table's write lock, so a cache fill never races a
    /// concurrent write.
    pub fn read(&self, table: &str) -> Result<Vec<Record>> {
        let lock = self.table_lock(table);
        let _guard = lock.lock();
        self.read_locked(table)
    }

    /// [`read`](Self::read) for callers already holding `table_lock(table)`.
    pub fn read_locked(&self, table: &str) -> Result<Vec<Record>> {
        if let Some(rows) = self.cache.lock().get(table) {
            return Ok(rows.clone());
        }

        let rows = match self.load(table)? {
            Some(rows) => rows,
            None => self.seed_if_uninitialized(table)?,
        };

        self.cache.lock().put(table.to_string(), rows.clone());
        Ok(rows)
    }

    /// Replace the whole snapshot of `table`. Callers mutating an existing
    /// snapshot hold `table_lock(table)` across the read and this write.
    pub fn write(&self, table: &str, rows: Vec<Record>) -> Result<()> {
        self.persist(table, &rows)?;
        self.cache.lock().put(table.to_string(), rows);
        Ok(())
    }

    /// Whether `table` has a durable entry.
    pub fn is_initialized(&self, table: &str) -> Result<bool> {
        if self.cache.lock().contains(table) {
            return Ok(true);
        }
        Ok(self.backend.load(&table_key(table))?.is_some())
    }

    /// Names of all tables with a durable entry.
    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self
            .backend
            .keys()?
            .into_iter()
            .filter_map(|key| key.strip_prefix(TABLE_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    /// The write lock guarding `table`'s read-modify-persist-notify sequence.
    pub fn table_lock(&self, table: &str) -> Arc<Mutex<()>> {
        self.table_locks
            .lock()
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Encoding used for new snapshots.
    pub fn encoding(&self) -> SnapshotEncoding {
        self.encoding
    }

    /// Backend shared with the session store.
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend)
    }

    fn load(&self, table: &str) -> Result<Option<Vec<Record>>> {
        let key = table_key(table);
        let entry = match self.backend.load(&key)? {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let snapshot: TableSnapshot = decode(&entry)?;
        if snapshot.schema_version != TABLE_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedVersion {
                key,
                found: snapshot.schema_version,
                supported: TABLE_SCHEMA_VERSION,
            });
        }
        Ok(Some(snapshot.rows))
    }

    fn seed_if_uninitialized(&self, table: &str) -> Result<Vec<Record>> {
        if !self.seed {
            return Ok(Vec::new());
        }

        let _guard = self.seed_lock.lock();

        // Another reader may have seeded while we waited.
        if let Some(rows) = self.load(table)? {
            return Ok(rows);
        }

        match seed_rows(table, Timestamp::now()) {
            Some(rows) => {
                self.persist(table, &rows)?;
                info!(table, rows = rows.len(), "Seeded table");
                Ok(rows)
            }
            None => Ok(Vec::new()),
        }
    }

    fn persist(&self, table: &str, rows: &[Record]) -> Result<()> {
        let snapshot = TableSnapshot {
            schema_version: TABLE_SCHEMA_VERSION,
            rows: rows.to_vec(),
        };
        let entry = StoredEntry {
            encoding: self.encoding,
            payload: encode(self.encoding, &snapshot)?,
        };
        self.backend.save(&table_key(table), &entry)?;
        debug!(table, rows = rows.len(), bytes = entry.payload.len(), "Persisted table");
        Ok(())
    }
}
