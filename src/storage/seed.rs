//! Default datasets installed the first time a table is read.

use crate::types::{Record, RecordId, Timestamp};
use serde_json::{json, Map, Value};

const SECONDS_PER_DAY: i64 = 86_400;

/// Tables that ship with seed data.
pub const SEEDED_TABLES: &[&str] = &["activities", "polls"];

/// Seed rows for `table`, or `None` if the table starts empty.
///
/// Content is fixed; timestamps are relative to `now`.
pub fn seed_rows(table: &str, now: Timestamp) -> Option<Vec<Record>> {
    match table {
        "activities" => Some(vec![
            seeded(
                "1",
                now,
                json!({
                    "title": "Morning Yoga",
                    "description": "Start your day with yoga",
                    "votes": 5,
                }),
            ),
            seeded(
                "2",
                now.minus_secs(SECONDS_PER_DAY),
                json!({
                    "title": "Tech Talk",
                    "description": "Discussing React vs Vue",
                    "votes": 12,
                }),
            ),
        ]),
        "polls" => Some(vec![seeded(
            "1",
            now,
            json!({
                "title": "Best Framework?",
                "options": ["React", "Vue", "Angular"],
            }),
        )]),
        _ => None,
    }
}

fn seeded(id: &str, created_at: Timestamp, fields: Value) -> Record {
    let fields = match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Record {
        id: RecordId::from(id),
        created_at,
        fields,
    }
}
