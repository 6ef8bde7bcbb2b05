//! Change notification bus.
//!
//! Every committed insert, update and delete produces one [`ChangeEvent`]
//! per affected record. Subscribers register interest in a table and an
//! [`EventKind`] (or all kinds) and receive events over a channel, unbounded
//! unless [`SubscriptionConfig::bounded`] caps it:
//! - in mutation order, one event per affected record
//! - across subscribers, in registration order
//! - only while subscribed; nothing is queued or replayed for absent subscribers
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionFilter::table("activities").event(EventKind::Insert));
//!
//! store.from("activities").insert(json!({"title": "Hike"}))?;
//!
//! match handle.recv()? {
//!     StoreEvent::Change(change) => println!("new activity {}", change.record.id),
//!     StoreEvent::Dropped { reason } => println!("dropped: {:?}", reason),
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ChangeEvent, ChangeKind, DropReason, EventKind, RowFilter, StoreEvent, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};
