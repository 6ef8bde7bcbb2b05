//! Declared table constraints and typed rows.
//!
//! Tables stay schemaless on disk. A [`TableSchema`] adds the checks the
//! store enforces on write: required columns and unique indexes.

use crate::error::{Result, StoreError};
use crate::types::{Record, RecordId, Timestamp, ID_FIELD};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Constraints declared for one table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    /// Each entry is a set of columns whose combined value must be unique.
    pub unique: Vec<Vec<String>>,
    /// Columns that must be present and non-null on insert.
    pub required: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a unique index over `columns`.
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Mark `columns` as required.
    pub fn required(mut self, columns: &[&str]) -> Self {
        self.required
            .extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Check required columns on a record about to be inserted.
    pub fn validate(&self, record: &Record) -> Result<()> {
        for field in &self.required {
            match record.field(field) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(StoreError::Validation {
                        table: self.name.clone(),
                        field: field.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Check that `incoming` rows collide neither with `existing` rows nor
    /// with each other, on the id or on any unique index.
    ///
    /// A key containing a missing or null column never conflicts.
    pub fn check_unique(&self, existing: &[Record], incoming: &[Record]) -> Result<()> {
        let mut ids: HashSet<&RecordId> = existing.iter().map(|r| &r.id).collect();
        for record in incoming {
            if !ids.insert(&record.id) {
                return Err(StoreError::Conflict {
                    table: self.name.clone(),
                    constraint: ID_FIELD.to_string(),
                    key: record.id.to_string(),
                });
            }
        }

        for columns in &self.unique {
            let mut seen: HashSet<String> = existing
                .iter()
                .filter_map(|r| unique_key(columns, r))
                .collect();
            for record in incoming {
                if let Some(key) = unique_key(columns, record) {
                    if !seen.insert(key.clone()) {
                        return Err(StoreError::Conflict {
                            table: self.name.clone(),
                            constraint: columns.join(","),
                            key,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Canonical text form of a record's values for `columns`, or `None` if any
/// of them is missing or null.
pub(crate) fn unique_key(columns: &[String], record: &Record) -> Option<String> {
    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        let value = record.field(column)?;
        if value.is_null() {
            return None;
        }
        values.push(value.into_owned());
    }
    Some(Value::Array(values).to_string())
}

/// Schemas of the application's tables.
pub fn default_schemas() -> Vec<TableSchema> {
    vec![
        TableSchema::new("activities").required(&["title"]),
        TableSchema::new("polls").required(&["title"]),
        TableSchema::new("poll_options").required(&["poll_id", "title"]),
        TableSchema::new("votes")
            .required(&["poll_id", "user_id", "option_id"])
            .unique(&["poll_id", "user_id"]),
        TableSchema::new("participations")
            .required(&["activity_id", "user_id", "status"])
            .unique(&["activity_id", "user_id"]),
        TableSchema::new("profiles").required(&["role"]),
    ]
}

/// Declared schemas by table name. Undeclared tables get an empty schema.
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, TableSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// A registry pre-loaded with [`default_schemas`].
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for schema in default_schemas() {
            registry.define(schema);
        }
        registry
    }

    /// Declare (or replace) a table's schema.
    pub fn define(&self, schema: TableSchema) {
        self.schemas.write().insert(schema.name.clone(), schema);
    }

    pub fn get(&self, table: &str) -> TableSchema {
        self.schemas
            .read()
            .get(table)
            .cloned()
            .unwrap_or_else(|| TableSchema::new(table))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// A typed view of a table's user columns.
pub trait Row: Serialize + DeserializeOwned {
    /// Table the row lives in.
    const TABLE: &'static str;
}

/// A typed row together with its store-assigned identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub id: RecordId,
    pub created_at: Timestamp,
    #[serde(flatten)]
    pub row: T,
}

impl<T: DeserializeOwned> Stored<T> {
    /// Decode a record into its typed form.
    pub fn from_record(record: &Record) -> Result<Self> {
        serde_json::from_value(record.to_value())
            .map_err(|e| StoreError::Deserialization(e.to_string()))
    }
}
