//! Core types for the table store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the identifier field carried by every record.
pub const ID_FIELD: &str = "id";

/// Name of the creation timestamp field carried by every record.
pub const CREATED_AT_FIELD: &str = "created_at";

/// Unique identifier for a record within its table.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// A fresh, globally unique identifier.
    pub fn generate() -> Self {
        RecordId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::String(id.0)
    }
}

impl From<&RecordId> for Value {
    fn from(id: &RecordId) -> Self {
        Value::String(id.0.clone())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    /// This timestamp shifted back by the given number of seconds.
    pub fn minus_secs(self, secs: i64) -> Self {
        Timestamp(self.0 - secs * 1_000_000)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Encoding used for durable snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SnapshotEncoding {
    #[default]
    Json,
    MessagePack,
}

impl SnapshotEncoding {
    pub(crate) fn tag(self) -> u8 {
        match self {
            SnapshotEncoding::Json => 0,
            SnapshotEncoding::MessagePack => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SnapshotEncoding::Json),
            1 => Some(SnapshotEncoding::MessagePack),
            _ => None,
        }
    }
}

/// Why a row could not be turned into a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaterializeError {
    /// The row was not a JSON object.
    NotAnObject,
    /// A reserved field had the wrong type.
    InvalidField(&'static str),
}

/// A single row in a table.
///
/// `id` and `created_at` are always present; every other column lives in
/// `fields`. Records handed out by queries are copies of the stored row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub created_at: Timestamp,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create a record with a fresh id stamped now.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            id: RecordId::generate(),
            created_at: Timestamp::now(),
            fields,
        }
    }

    /// Turn caller input into a record, assigning `id` and `created_at`
    /// when they are absent or null.
    ///
    /// Numeric ids are kept in their decimal string form. `created_at` must
    /// be integer microseconds since the Unix epoch; any other type (an
    /// RFC 3339 string included) is rejected with
    /// [`MaterializeError::InvalidField`].
    pub fn materialize(row: Value) -> std::result::Result<Self, MaterializeError> {
        let mut fields = match row {
            Value::Object(map) => map,
            _ => return Err(MaterializeError::NotAnObject),
        };

        let id = match fields.remove(ID_FIELD) {
            None | Some(Value::Null) => RecordId::generate(),
            Some(Value::String(s)) => RecordId(s),
            Some(Value::Number(n)) => RecordId(n.to_string()),
            Some(_) => return Err(MaterializeError::InvalidField(ID_FIELD)),
        };

        let created_at = match fields.remove(CREATED_AT_FIELD) {
            None | Some(Value::Null) => Timestamp::now(),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(micros) => Timestamp(micros),
                None => return Err(MaterializeError::InvalidField(CREATED_AT_FIELD)),
            },
            Some(_) => return Err(MaterializeError::InvalidField(CREATED_AT_FIELD)),
        };

        Ok(Self {
            id,
            created_at,
            fields,
        })
    }

    /// Look up a column, including the reserved `id` and `created_at`.
    pub fn field(&self, name: &str) -> Option<Cow<'_, Value>> {
        match name {
            ID_FIELD => Some(Cow::Owned(Value::String(self.id.0.clone()))),
            CREATED_AT_FIELD => Some(Cow::Owned(Value::from(self.created_at.0))),
            _ => self.fields.get(name).map(Cow::Borrowed),
        }
    }

    /// Compare a column against `value`, or `None` if the column is absent.
    ///
    /// The id is stored as text, so a numeric `value` matches the id with
    /// the same decimal form.
    pub fn field_equals(&self, name: &str, value: &Value) -> Option<bool> {
        if name == ID_FIELD {
            return Some(match value {
                Value::String(s) => *s == self.id.0,
                Value::Number(n) => n.to_string() == self.id.0,
                _ => false,
            });
        }
        self.field(name).map(|v| *v == *value)
    }

    /// Convenience accessor for string columns.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Merge a patch into this record. The identifier is immutable and
    /// `created_at` only accepts integer timestamps.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            match key.as_str() {
                ID_FIELD => {}
                CREATED_AT_FIELD => {
                    if let Some(micros) = value.as_i64() {
                        self.created_at = Timestamp(micros);
                    }
                }
                _ => {
                    self.fields.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Keep only the named user columns.
    pub fn project(&mut self, columns: &[String]) {
        self.fields.retain(|key, _| columns.iter().any(|c| c == key));
    }

    /// The record as a single JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(ID_FIELD.to_string(), Value::String(self.id.0.clone()));
        map.insert(CREATED_AT_FIELD.to_string(), Value::from(self.created_at.0));
        Value::Object(map)
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub table_count: u64,
    pub row_count: u64,
    pub subscription_count: u64,
    pub session_observer_count: u64,
    pub signed_in: bool,
}
