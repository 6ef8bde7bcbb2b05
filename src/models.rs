//! Typed rows for the application's tables.

use crate::schema::Row;
use crate::types::RecordId;
use serde::{Deserialize, Serialize};

/// A finalized group activity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<i64>,
}

impl Row for Activity {
    const TABLE: &'static str = "activities";
}

/// A poll users vote on before an admin resolves it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub is_resolved: bool,
    /// Inline option labels (seeded polls only; created polls use `poll_options`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Row for Poll {
    const TABLE: &'static str = "polls";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub poll_id: RecordId,
    pub title: String,
    #[serde(default)]
    pub votes_count: i64,
}

impl Row for PollOption {
    const TABLE: &'static str = "poll_options";
}

/// One user's vote. At most one per (poll, user).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub poll_id: RecordId,
    pub user_id: String,
    pub option_id: RecordId,
}

impl Row for Vote {
    const TABLE: &'static str = "votes";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipationStatus {
    Accepted,
    Rejected,
}

/// A user's response to an activity. At most one per (activity, user).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Participation {
    pub activity_id: RecordId,
    pub user_id: String,
    pub status: ParticipationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub is_top_performer: bool,
}

impl Row for Participation {
    const TABLE: &'static str = "participations";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Per-user profile; its id is the user id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

impl Row for Profile {
    const TABLE: &'static str = "profiles";
}
