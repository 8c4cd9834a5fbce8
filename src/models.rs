//! # Database models
//!
//! Diesel models for the analytics tables. One row is written per matcher
//! invocation, matched or not; `matched_process` is `NULL` for misses so the
//! read side can list recent unmatched queries.

use diesel::prelude::*;

/// One matcher invocation.
///
/// ### Table
/// - `match_events`
///
/// ### Notes
/// - `method` records which stage produced the match (`direct_mention`,
///   `vector`, `keyword`) and is `NULL` when nothing matched.
/// - `id` is optional for `Insertable` convenience; SQLite assigns it.
#[derive(Queryable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::match_events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MatchEvent {
    /// Auto-increment primary key (set by the DB on insert).
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    /// The user's raw query.
    pub query_text: String,
    /// Matched procedure id, or `NULL` for a miss.
    pub matched_process: Option<String>,
    /// Stage that produced the match.
    pub method: Option<String>,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

impl MatchEvent {
    pub fn new(query: &str, matched: Option<&str>, method: Option<&str>) -> Self {
        Self {
            id: None,
            query_text: query.to_string(),
            matched_process: matched.map(String::from),
            method: method.map(String::from),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
