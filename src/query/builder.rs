//! Query builder and mutation surface.

use super::filter::{matches_all, sort_records, Filter, Order};
use crate::error::{Result, StoreError};
use crate::schema::{unique_key, Row, Stored};
use crate::store::Store;
use crate::subscriptions::{ChangeEvent, ChangeKind};
use crate::types::{MaterializeError, Record, ID_FIELD};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Result of [`Query::execute`].
#[derive(Clone, Debug, PartialEq)]
pub enum QueryData {
    /// Every matching row, ordered.
    Rows(Vec<Record>),
    /// The first matching row of a `single()` query.
    Single(Record),
}

impl QueryData {
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            QueryData::Rows(rows) => rows,
            QueryData::Single(record) => vec![record],
        }
    }
}

/// Nested lookup of a related row.
#[derive(Clone, Debug, PartialEq)]
struct Embed {
    alias: String,
    table: String,
    local_field: String,
}

/// A query against one table.
///
/// Filters, ordering and options accumulate through chained calls; nothing
/// touches storage until a terminal method (`execute`, `fetch*`, `update`,
/// `delete`, ...) consumes the query.
#[must_use = "a query does nothing until executed"]
pub struct Query<'a> {
    store: &'a Store,
    table: String,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    single: bool,
    limit: Option<usize>,
    columns: Option<Vec<String>>,
    embeds: Vec<Embed>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(store: &'a Store, table: &str) -> Self {
        Self {
            store,
            table: table.to_string(),
            filters: Vec::new(),
            orders: Vec::new(),
            single: false,
            limit: None,
            columns: None,
            embeds: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    // --- Pipeline ---

    /// Keep rows where `field == value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Keep rows where `field != value`.
    pub fn neq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Neq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Add a sort key. Earlier keys take precedence.
    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.orders.push(Order {
            field: field.into(),
            ascending,
        });
        self
    }

    /// Return exactly one row: the first after ordering. No match is `NotFound`.
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Return at most `n` rows.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Only return these user columns. `id` and `created_at` are always kept.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Attach the row of `table` whose id equals this row's `local_field`,
    /// under `alias` (null when there is none).
    pub fn embed(
        mut self,
        alias: impl Into<String>,
        table: impl Into<String>,
        local_field: impl Into<String>,
    ) -> Self {
        self.embeds.push(Embed {
            alias: alias.into(),
            table: table.into(),
            local_field: local_field.into(),
        });
        self
    }

    // --- Reads ---

    /// Run the query against the current snapshot.
    pub fn execute(self) -> Result<QueryData> {
        let mut rows: Vec<Record> = self
            .store
            .tables
            .read(&self.table)?
            .into_iter()
            .filter(|r| matches_all(&self.filters, r))
            .collect();

        sort_records(&mut rows, &self.orders);

        if self.single {
            rows.truncate(1);
        } else if let Some(limit) = self.limit {
            rows.truncate(limit);
        }

        if let Some(columns) = &self.columns {
            for row in &mut rows {
                row.project(columns);
            }
        }

        self.attach_embeds(&mut rows)?;

        if self.single {
            match rows.pop() {
                Some(record) => Ok(QueryData::Single(record)),
                None => Err(not_found(&self.table)),
            }
        } else {
            Ok(QueryData::Rows(rows))
        }
    }

    /// All matching rows.
    pub fn fetch(self) -> Result<Vec<Record>> {
        self.execute().map(QueryData::into_rows)
    }

    /// The first matching row, or `NotFound`.
    pub fn fetch_one(self) -> Result<Record> {
        let table = self.table.clone();
        self.single()
            .fetch()?
            .pop()
            .ok_or_else(|| not_found(&table))
    }

    /// The first matching row, if any.
    pub fn fetch_optional(self) -> Result<Option<Record>> {
        match self.fetch_one() {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Number of matching rows.
    pub fn count(self) -> Result<usize> {
        self.fetch().map(|rows| rows.len())
    }

    /// All matching rows, decoded.
    pub fn fetch_as<T: DeserializeOwned>(self) -> Result<Vec<Stored<T>>> {
        self.fetch()?.iter().map(Stored::from_record).collect()
    }

    /// The first matching row, decoded.
    pub fn fetch_one_as<T: DeserializeOwned>(self) -> Result<Stored<T>> {
        Stored::from_record(&self.fetch_one()?)
    }

    fn attach_embeds(&self, rows: &mut [Record]) -> Result<()> {
        for embed in &self.embeds {
            let by_id: HashMap<String, Record> = self
                .store
                .tables
                .read(&embed.table)?
                .into_iter()
                .map(|r| (r.id.0.clone(), r))
                .collect();

            for row in rows.iter_mut() {
                let related = row
                    .field(&embed.local_field)
                    .and_then(|v| id_text(&v))
                    .and_then(|id| by_id.get(&id))
                    .map(Record::to_value)
                    .unwrap_or(Value::Null);
                row.fields.insert(embed.alias.clone(), related);
            }
        }
        Ok(())
    }

    // --- Mutations ---

    /// Insert one row (a JSON object) or many (a JSON array of objects).
    ///
    /// Missing `id`s and `created_at`s are assigned. The batch is checked
    /// against required columns and unique indexes before anything is
    /// written; on success one INSERT event per row is published in order.
    pub fn insert(self, rows: impl Into<Value>) -> Result<Vec<Record>> {
        let incoming = self.materialize_all(rows.into())?;
        let schema = self.store.schemas.get(&self.table);
        for record in &incoming {
            schema.validate(record)?;
        }

        let lock = self.store.tables.table_lock(&self.table);
        let _guard = lock.lock();

        let mut snapshot = self.store.tables.read_locked(&self.table)?;
        if let Err(e) = schema.check_unique(&snapshot, &incoming) {
            warn!(table = %self.table, error = %e, "Rejected insert");
            return Err(e);
        }

        snapshot.extend(incoming.iter().cloned());
        self.store.tables.write(&self.table, snapshot)?;

        let events: Vec<ChangeEvent> = incoming
            .iter()
            .map(|r| ChangeEvent::new(&self.table, ChangeKind::Insert, r.clone()))
            .collect();
        self.store.subscriptions.publish(&events);

        debug!(table = %self.table, rows = incoming.len(), "Inserted");
        Ok(incoming)
    }

    /// Insert serializable rows.
    pub fn insert_rows<T: Serialize>(self, rows: &[T]) -> Result<Vec<Record>> {
        let value = serde_json::to_value(rows)?;
        self.insert(value)
    }

    /// Insert rows, or merge them into existing rows that match on
    /// `on_conflict` columns (`id` when empty).
    ///
    /// Merged rows publish UPDATE, new rows publish INSERT, in input order.
    pub fn upsert(self, rows: impl Into<Value>, on_conflict: &[&str]) -> Result<Vec<Record>> {
        let columns: Vec<String> = if on_conflict.is_empty() {
            vec![ID_FIELD.to_string()]
        } else {
            on_conflict.iter().map(|c| c.to_string()).collect()
        };
        let incoming = self.materialize_all(rows.into())?;
        let schema = self.store.schemas.get(&self.table);

        let lock = self.store.tables.table_lock(&self.table);
        let _guard = lock.lock();

        let mut snapshot = self.store.tables.read_locked(&self.table)?;
        let mut events = Vec::with_capacity(incoming.len());
        let mut out = Vec::with_capacity(incoming.len());

        for record in incoming {
            let existing = unique_key(&columns, &record).and_then(|key| {
                snapshot
                    .iter()
                    .position(|r| unique_key(&columns, r).as_deref() == Some(key.as_str()))
            });

            match existing {
                Some(index) => {
                    let old = snapshot[index].clone();
                    snapshot[index].merge(&record.fields);
                    let updated = snapshot[index].clone();
                    events.push(
                        ChangeEvent::new(&self.table, ChangeKind::Update, updated.clone())
                            .with_old(old),
                    );
                    out.push(updated);
                }
                None => {
                    schema.validate(&record)?;
                    snapshot.push(record.clone());
                    events.push(ChangeEvent::new(&self.table, ChangeKind::Insert, record.clone()));
                    out.push(record);
                }
            }
        }

        schema.check_unique(&[], &snapshot)?;
        self.store.tables.write(&self.table, snapshot)?;
        self.store.subscriptions.publish(&events);

        debug!(table = %self.table, rows = out.len(), "Upserted");
        Ok(out)
    }

    /// Merge `patch` into every row matching the accumulated filters.
    ///
    /// With no filters this targets the whole table. Returns the updated
    /// rows; one UPDATE event per row is published in table order.
    pub fn update(self, patch: impl Into<Value>) -> Result<Vec<Record>> {
        let patch = match patch.into() {
            Value::Object(map) => map,
            _ => {
                return Err(StoreError::Validation {
                    table: self.table.clone(),
                    field: "<patch>".to_string(),
                })
            }
        };
        self.warn_if_unfiltered("update");

        let schema = self.store.schemas.get(&self.table);
        let lock = self.store.tables.table_lock(&self.table);
        let _guard = lock.lock();

        let mut snapshot = self.store.tables.read_locked(&self.table)?;
        let mut events = Vec::new();
        let mut updated = Vec::new();

        for record in snapshot.iter_mut() {
            if !matches_all(&self.filters, record) {
                continue;
            }
            let old = record.clone();
            record.merge(&patch);
            events.push(ChangeEvent::new(&self.table, ChangeKind::Update, record.clone()).with_old(old));
            updated.push(record.clone());
        }

        if updated.is_empty() {
            return Ok(updated);
        }

        schema.check_unique(&[], &snapshot)?;
        self.store.tables.write(&self.table, snapshot)?;
        self.store.subscriptions.publish(&events);

        debug!(table = %self.table, rows = updated.len(), "Updated");
        Ok(updated)
    }

    /// Update with a serializable patch.
    pub fn update_with<T: Serialize>(self, patch: &T) -> Result<Vec<Record>> {
        let value = serde_json::to_value(patch)?;
        self.update(value)
    }

    /// Delete every row matching the accumulated filters and return how many
    /// were removed. With no filters this empties the table.
    ///
    /// One DELETE event per removed row is published, carrying the row.
    pub fn delete(self) -> Result<usize> {
        self.warn_if_unfiltered("delete");

        let lock = self.store.tables.table_lock(&self.table);
        let _guard = lock.lock();

        let snapshot = self.store.tables.read_locked(&self.table)?;
        let (deleted, remaining): (Vec<Record>, Vec<Record>) = snapshot
            .into_iter()
            .partition(|r| matches_all(&self.filters, r));

        if deleted.is_empty() {
            return Ok(0);
        }

        self.store.tables.write(&self.table, remaining)?;

        let events: Vec<ChangeEvent> = deleted
            .into_iter()
            .map(|r| ChangeEvent::new(&self.table, ChangeKind::Delete, r))
            .collect();
        self.store.subscriptions.publish(&events);

        debug!(table = %self.table, rows = events.len(), "Deleted");
        Ok(events.len())
    }

    fn materialize_all(&self, rows: Value) -> Result<Vec<Record>> {
        let rows = match rows {
            Value::Array(rows) => rows,
            other => vec![other],
        };
        rows.into_iter()
            .map(|row| {
                Record::materialize(row).map_err(|e| {
                    let field = match e {
                        MaterializeError::NotAnObject => "<row>",
                        MaterializeError::InvalidField(field) => field,
                    };
                    StoreError::Validation {
                        table: self.table.clone(),
                        field: field.to_string(),
                    }
                })
            })
            .collect()
    }

    fn warn_if_unfiltered(&self, operation: &str) {
        if self.filters.is_empty() {
            warn!(table = %self.table, operation, "Unfiltered mutation targets the whole table");
        }
    }
}

impl Store {
    /// Open a query against `table`.
    pub fn from(&self, table: &str) -> Query<'_> {
        Query::new(self, table)
    }

    /// Insert a typed row into its table.
    pub fn insert_row<T: Row>(&self, row: &T) -> Result<Stored<T>> {
        let value = serde_json::to_value(row)?;
        let mut inserted = self.from(T::TABLE).insert(value)?;
        let record = inserted.pop().ok_or_else(|| not_found(T::TABLE))?;
        Stored::from_record(&record)
    }

    /// Typed query against `T`'s table.
    pub fn rows<T: Row>(&self) -> Query<'_> {
        self.from(T::TABLE)
    }
}

/// Text form of an id-like value.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn not_found(table: &str) -> StoreError {
    StoreError::NotFound {
        table: table.to_string(),
    }
}
