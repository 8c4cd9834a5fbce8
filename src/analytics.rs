//! # Match analytics
//!
//! Records every matcher invocation (query text plus outcome) in SQLite and
//! answers the two questions the recommender cares about: which procedures
//! are requested most, and which recent queries matched nothing.
//!
//! The match path never talks to SQLite directly. It pushes [`MatchEvent`]s
//! onto an unbounded channel and a background task drains them, so a slow or
//! broken analytics store cannot add latency or failure risk to a match.

use std::sync::{Arc, Mutex};

use diesel::prelude::*;
use diesel::sql_query;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::warn;

use crate::error::Result;
use crate::models::MatchEvent;
use crate::schema::match_events;

pub struct AnalyticsStore {
    conn: SqliteConnection,
}

impl AnalyticsStore {
    /// Open (and if needed create) the analytics database at `db_url`.
    pub fn open(db_url: &str) -> Result<Self> {
        let mut conn = SqliteConnection::establish(db_url)
            .map_err(|e| crate::error::Error::Config(format!("cannot open {db_url}: {e}")))?;
        sql_query(
            "CREATE TABLE IF NOT EXISTS match_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_text TEXT NOT NULL,
                matched_process TEXT,
                method TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&mut conn)?;
        Ok(Self { conn })
    }

    /// Append one event.
    pub fn record(&mut self, event: &MatchEvent) -> Result<()> {
        diesel::insert_into(match_events::table)
            .values(event)
            .execute(&mut self.conn)?;
        Ok(())
    }

    /// The most-requested procedures, `(id, count)`, most popular first.
    ///
    /// The corpus is tens to low hundreds of procedures, so counting in
    /// process is fine.
    pub fn popular_processes(&mut self, limit: usize) -> Result<Vec<(String, i64)>> {
        let matched: Vec<Option<String>> = match_events::table
            .filter(match_events::matched_process.is_not_null())
            .select(match_events::matched_process)
            .load(&mut self.conn)?;

        let mut counts = std::collections::HashMap::new();
        for id in matched.into_iter().flatten() {
            *counts.entry(id).or_insert(0i64) += 1;
        }
        let mut ranked: Vec<(String, i64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// The most recent queries that matched no procedure, newest first.
    pub fn recent_unmatched(&mut self, limit: usize) -> Result<Vec<String>> {
        let rows: Vec<String> = match_events::table
            .filter(match_events::matched_process.is_null())
            .order(match_events::id.desc())
            .limit(limit as i64)
            .select(match_events::query_text)
            .load(&mut self.conn)?;
        Ok(rows)
    }
}

/// Spawn the background recorder task and hand back its sender.
///
/// Inserts run on the blocking thread pool so a slow disk stalls neither
/// the recorder's runtime worker nor the match path. Send failures on the
/// caller side mean the recorder is gone; callers are expected to drop the
/// event rather than propagate the error.
pub fn spawn_recorder(store: Arc<Mutex<AnalyticsStore>>) -> UnboundedSender<MatchEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<MatchEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let store = Arc::clone(&store);
            let written = tokio::task::spawn_blocking(move || {
                let mut guard = store.lock().expect("analytics lock poisoned");
                guard.record(&event)
            })
            .await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(%err, "failed to record match event"),
                Err(err) => warn!(%err, "match event recorder panicked"),
            }
        }
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, AnalyticsStore) {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("analytics.db");
        let store = AnalyticsStore::open(db.to_str().unwrap()).unwrap();
        (tmp, store)
    }

    #[test]
    fn records_and_ranks_popular_processes() {
        let (_tmp, mut store) = open_temp();
        for _ in 0..3 {
            store
                .record(&MatchEvent::new("upload?", Some("upload_asset"), Some("keyword")))
                .unwrap();
        }
        store
            .record(&MatchEvent::new("search?", Some("search_asset"), Some("vector")))
            .unwrap();
        store.record(&MatchEvent::new("???", None, None)).unwrap();

        let popular = store.popular_processes(10).unwrap();
        assert_eq!(popular[0], ("upload_asset".to_string(), 3));
        assert_eq!(popular[1], ("search_asset".to_string(), 1));
    }

    #[test]
    fn recent_unmatched_is_newest_first_and_bounded() {
        let (_tmp, mut store) = open_temp();
        for q in ["first miss", "second miss", "third miss"] {
            store.record(&MatchEvent::new(q, None, None)).unwrap();
        }
        store
            .record(&MatchEvent::new("a hit", Some("upload_asset"), Some("direct_mention")))
            .unwrap();

        let unmatched = store.recent_unmatched(2).unwrap();
        assert_eq!(unmatched, vec!["third miss".to_string(), "second miss".to_string()]);
    }

    #[tokio::test]
    async fn recorder_task_drains_the_channel() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("analytics.db");
        let store = Arc::new(Mutex::new(
            AnalyticsStore::open(db.to_str().unwrap()).unwrap(),
        ));

        let tx = spawn_recorder(Arc::clone(&store));
        tx.send(MatchEvent::new("queued", Some("upload_asset"), Some("keyword")))
            .unwrap();

        // give the background task a moment to drain
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let popular = store.lock().unwrap().popular_processes(1).unwrap();
        assert_eq!(popular[0].0, "upload_asset");
    }
}
