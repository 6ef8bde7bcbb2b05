//! # Poll Store
//!
//! An embedded, persisted table store with realtime change notifications
//! and a single client session, backing a group poll/activity tracker.
//!
//! ## Core Concepts
//!
//! - **Tables**: Named collections of schemaless records, persisted as whole
//!   snapshots; `activities` and `polls` are seeded once on first use
//! - **Records**: Every row carries a text `id` (numeric ids are stored and
//!   matched by their decimal form) and a `created_at` in integer microseconds
//!   since the Unix epoch; other `created_at` types, such as RFC 3339
//!   strings, are rejected as validation errors
//! - **Queries**: Equality/inequality filters, multi-key ordering and
//!   single-row projection over a snapshot
//! - **Mutations**: Insert/upsert/update/delete, checked against declared
//!   constraints, then persisted, then published
//! - **Subscriptions**: Per-table, per-event-kind change streams
//! - **Session**: One persisted session with observers
//!
//! ## Example
//!
//! ```ignore
//! use pollstore::{Identity, Store, StoreConfig, SubscriptionFilter, EventKind};
//! use serde_json::json;
//!
//! let store = Store::open_or_create(StoreConfig {
//!     path: "./poll-data".into(),
//!     ..Default::default()
//! })?;
//!
//! let user = store.auth().sign_in(Identity::new("ana@example.com", "Ana"))?.user;
//!
//! let inserts = store.subscribe(SubscriptionFilter::table("votes").event(EventKind::Insert));
//! store.from("votes").insert(json!({"poll_id": "1", "user_id": user.id, "option_id": "o1"}))?;
//!
//! let polls = store.from("polls").eq("is_resolved", false).order_by("created_at", false).fetch()?;
//! ```

pub mod error;
pub mod models;
pub mod query;
pub mod schema;
pub mod session;
pub mod storage;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{ErrorKind, Result, StoreError};
pub use models::{
    Activity, Participation, ParticipationStatus, Poll, PollOption, Profile, Role, Vote,
};
pub use query::{Filter, Order, Query, QueryData};
pub use schema::{default_schemas, Row, SchemaRegistry, Stored, TableSchema};
pub use session::{
    AuthEvent, Identity, ObserverId, Session, SessionChange, SessionStore, SessionWatch,
    UserMetadata,
};
pub use storage::{FileBackend, MemoryBackend, StorageBackend, StoredEntry, TableStore};
pub use store::{Store, StoreConfig};
pub use subscriptions::{
    ChangeEvent, ChangeKind, DropReason, EventKind, RowFilter, StoreEvent, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
