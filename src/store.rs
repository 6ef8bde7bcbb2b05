//! Main Store struct tying all components together.

use crate::error::{Result, StoreError};
use crate::schema::{SchemaRegistry, TableSchema};
use crate::session::SessionStore;
use crate::storage::{FileBackend, MemoryBackend, StorageBackend, TableStore};
use crate::subscriptions::{
    SubscriptionConfig, SubscriptionFilter, SubscriptionHandle, SubscriptionId,
    SubscriptionManager,
};
use crate::types::{SnapshotEncoding, StoreStats};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Encoding for newly written snapshots.
    pub encoding: SnapshotEncoding,

    /// Decoded table snapshots kept in memory (number of tables).
    pub table_cache_size: usize,

    /// Buffered events per subscriber before it is dropped. `None` keeps
    /// subscribers until they unsubscribe or drop their handle.
    pub subscription_buffer_size: Option<usize>,

    /// Install default datasets into never-initialized tables.
    pub seed_tables: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./store"),
            create_if_missing: true,
            encoding: SnapshotEncoding::Json,
            table_cache_size: 64,
            subscription_buffer_size: None,
            seed_tables: true,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"PLS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Directory holding the durable entries.
const DATA_DIR: &str = "data";

/// The embedded table store.
///
/// Provides a unified interface for:
/// - Querying and mutating tables (`from`)
/// - Subscribing to committed changes (`subscribe`)
/// - The client session (`auth`)
///
/// Construct one per process (or per test) and share it by reference.
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access (absent for in-memory stores).
    _lock_file: Option<File>,

    /// Table snapshots.
    pub(crate) tables: TableStore,

    /// Declared constraints.
    pub(crate) schemas: SchemaRegistry,

    /// Change notification bus.
    pub(crate) subscriptions: SubscriptionManager,

    /// Session state.
    session: SessionStore,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;
        Self::write_manifest(&config.path)?;

        let backend = Arc::new(FileBackend::new(config.path.join(DATA_DIR))?);

        info!(path = %config.path.display(), "Created store");
        Self::assemble(config, backend, Some(lock_file))
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;
        let backend = Arc::new(FileBackend::new(config.path.join(DATA_DIR))?);

        info!(path = %config.path.display(), "Opened store");
        Self::assemble(config, backend, Some(lock_file))
    }

    /// A volatile store with default settings.
    pub fn in_memory() -> Result<Self> {
        Self::with_backend(StoreConfig::default(), Arc::new(MemoryBackend::new()))
    }

    /// A store over a caller-supplied backend. `config.path` is ignored.
    pub fn with_backend(config: StoreConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        Self::assemble(config, backend, None)
    }

    fn assemble(
        config: StoreConfig,
        backend: Arc<dyn StorageBackend>,
        lock_file: Option<File>,
    ) -> Result<Self> {
        let tables = TableStore::new(
            Arc::clone(&backend),
            config.encoding,
            config.table_cache_size,
            config.seed_tables,
        );
        let session = SessionStore::load(backend, config.encoding)?;

        Ok(Self {
            config,
            _lock_file: lock_file,
            tables,
            schemas: SchemaRegistry::with_defaults(),
            subscriptions: SubscriptionManager::new(),
            session,
        })
    }

    // --- Schema ---

    /// Declare (or replace) the constraints of a table.
    pub fn define_table(&self, schema: TableSchema) {
        self.schemas.define(schema);
    }

    /// Constraints currently declared for `table`.
    pub fn schema(&self, table: &str) -> TableSchema {
        self.schemas.get(table)
    }

    // --- Subscriptions ---

    /// Subscribe to committed changes matching `filter`.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> SubscriptionHandle {
        let mut config = SubscriptionConfig::new(filter);
        config.buffer_size = self.config.subscription_buffer_size;
        self.subscriptions.subscribe(config)
    }

    /// Subscribe with full control over the subscription config.
    pub fn subscribe_with(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    /// Stop delivery to a subscription. Other subscriptions are unaffected.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    // --- Session ---

    /// The session store.
    pub fn auth(&self) -> &SessionStore {
        &self.session
    }

    // --- Store Operations ---

    /// Names of all tables that have been written.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.tables.table_names()
    }

    /// Get store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let names = self.tables.table_names()?;
        let mut row_count = 0u64;
        for name in &names {
            row_count += self.tables.read(name)?.len() as u64;
        }

        Ok(StoreStats {
            table_count: names.len() as u64,
            row_count,
            subscription_count: self.subscriptions.subscription_count() as u64,
            session_observer_count: self.session.observer_count() as u64,
            signed_in: self.session.current_session().is_some(),
        })
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}
