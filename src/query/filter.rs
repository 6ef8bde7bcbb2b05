//! Row predicates and ordering.

use crate::types::Record;
use serde_json::Value;
use std::cmp::Ordering;

/// A predicate over one column.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// `record[field] == value`. A missing column never matches.
    Eq { field: String, value: Value },
    /// `record[field] != value`. A missing column always matches.
    Neq { field: String, value: Value },
}

impl Filter {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Eq { field, value } => record.field_equals(field, value).unwrap_or(false),
            Filter::Neq { field, value } => !record.field_equals(field, value).unwrap_or(false),
        }
    }
}

/// Whether `record` passes every filter.
pub fn matches_all(filters: &[Filter], record: &Record) -> bool {
    filters.iter().all(|f| f.matches(record))
}

/// One sort key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub ascending: bool,
}

impl Order {
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let a = a.field(&self.field);
        let b = b.field(&self.field);
        let ord = compare_values(a.as_deref(), b.as_deref());
        if self.ascending {
            ord
        } else {
            ord.reverse()
        }
    }
}

/// Stable multi-key sort: the first order is the primary key, later ones
/// only break ties. Rows equal on every key keep their snapshot order.
pub fn sort_records(records: &mut [Record], orders: &[Order]) {
    if orders.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        orders
            .iter()
            .map(|order| order.compare(a, b))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Total order over optional JSON values.
///
/// Missing sorts first, then null, booleans, numbers, strings. Arrays and
/// objects sort last and compare equal among themselves.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let rank = type_rank(a).cmp(&type_rank(b));
            if rank != Ordering::Equal {
                return rank;
            }
            match (a, b) {
                (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
                (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    _ => {
                        let a = a.as_f64().unwrap_or(f64::NAN);
                        let b = b.as_f64().unwrap_or(f64::NAN);
                        a.partial_cmp(&b).unwrap_or(Ordering::Equal)
                    }
                },
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => Ordering::Equal,
            }
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
