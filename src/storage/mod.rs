//! Durable storage for tables and the session.

mod backend;
mod seed;
mod tables;

pub use backend::{FileBackend, MemoryBackend, StorageBackend, StoredEntry};
pub use seed::{seed_rows, SEEDED_TABLES};
pub use tables::{TableStore, TABLE_KEY_PREFIX, TABLE_SCHEMA_VERSION};

pub(crate) use tables::{decode, encode};
