//! Subscription types for table change notifications.

use crate::types::{Record, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The mutation that produced a change event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Which mutations a subscription listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    /// Matches every mutation.
    #[default]
    #[serde(rename = "*")]
    All,
}

impl EventKind {
    pub fn matches(self, kind: ChangeKind) -> bool {
        match self {
            EventKind::All => true,
            EventKind::Insert => kind == ChangeKind::Insert,
            EventKind::Update => kind == ChangeKind::Update,
            EventKind::Delete => kind == ChangeKind::Delete,
        }
    }
}

impl From<ChangeKind> for EventKind {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Insert => EventKind::Insert,
            ChangeKind::Update => EventKind::Update,
            ChangeKind::Delete => EventKind::Delete,
        }
    }
}

/// Row-level predicate: only records whose `field` equals `value`.
#[derive(Clone, Debug, PartialEq)]
pub struct RowFilter {
    pub field: String,
    pub value: Value,
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionFilter {
    pub table: String,
    pub event: EventKind,
    pub row: Option<RowFilter>,
}

impl SubscriptionFilter {
    /// Every mutation on `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            event: EventKind::All,
            row: None,
        }
    }

    /// Restrict to one kind of mutation.
    pub fn event(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }

    /// Restrict to records with `field == value`.
    pub fn row_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.row = Some(RowFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Whether `event` should be delivered under this filter.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if self.table != event.table || !self.event.matches(event.kind) {
            return false;
        }
        match &self.row {
            None => true,
            Some(RowFilter { field, value }) => {
                event.record.field_equals(field, value).unwrap_or(false)
            }
        }
    }
}

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before the subscriber is dropped.
    /// Default: `None` (unbounded; a subscriber is only removed when it
    /// unsubscribes or drops its handle)
    pub buffer_size: Option<usize>,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl SubscriptionConfig {
    pub fn new(filter: SubscriptionFilter) -> Self {
        Self {
            buffer_size: None,
            filter,
        }
    }

    /// Cap the subscriber's buffer; overflowing it drops the subscriber.
    pub fn bounded(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }
}

/// A committed mutation of one record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    /// The inserted row, the row after an update, or the deleted row.
    pub record: Record,
    /// The row before an update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Record>,
    pub commit_timestamp: Timestamp,
}

impl ChangeEvent {
    pub fn new(table: &str, kind: ChangeKind, record: Record) -> Self {
        Self {
            table: table.to_string(),
            kind,
            record,
            old: None,
            commit_timestamp: Timestamp::now(),
        }
    }

    pub fn with_old(mut self, old: Record) -> Self {
        self.old = Some(old);
        self
    }
}

/// Events delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A record changed.
    Change(ChangeEvent),

    /// Subscription was dropped; nothing further will arrive.
    Dropped { reason: DropReason },
}

impl StoreEvent {
    /// The change carried by this event, if any.
    pub fn change(&self) -> Option<&ChangeEvent> {
        match self {
            StoreEvent::Change(change) => Some(change),
            StoreEvent::Dropped { .. } => None,
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver was dropped.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription. Ids increase in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered, without blocking.
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.receiver.try_iter().collect()
    }

    /// Buffered changes only, without blocking.
    pub fn drain_changes(&self) -> Vec<ChangeEvent> {
        self.receiver
            .try_iter()
            .filter_map(|event| match event {
                StoreEvent::Change(change) => Some(change),
                StoreEvent::Dropped { .. } => None,
            })
            .collect()
    }
}
