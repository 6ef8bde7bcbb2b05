//! Composable queries over a table snapshot.
//!
//! ```ignore
//! let recent = store
//!     .from("participations")
//!     .eq("status", "accepted")
//!     .order_by("created_at", false)
//!     .embed("profile", "profiles", "user_id")
//!     .fetch()?;
//! ```

mod builder;
mod filter;

pub use builder::{Query, QueryData};
pub use filter::{compare_values, matches_all, sort_records, Filter, Order};
