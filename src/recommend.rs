//! # "What next" recommendations
//!
//! Two mechanisms, curated first:
//!
//! 1. A static relationship table (YAML) maps a procedure id to hand-written
//!    follow-ups. The reserved `default` key is a backfill pool drawn from
//!    when a procedure has fewer specific entries than the requested limit.
//! 2. When the table still comes up short, a scored fallback ranks every
//!    other known procedure by stored-vector similarity plus bonuses for
//!    same category, shared keywords and recent popularity, and synthesizes
//!    the transition and reason text.
//!
//! Either way the current procedure is never recommended to itself and no
//! target appears twice.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::analytics::AnalyticsStore;
use crate::error::Result;
use crate::index::ProcessIndex;
use crate::store::ProcedureStore;

/// One follow-up suggestion: where to go, phrased how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Related {
    pub process_id: String,
    /// Lead-in line shown to the user, e.g. "Once uploaded, you can…".
    pub transition: String,
    /// Short justification, e.g. "people usually tag right after uploading".
    pub reason: String,
}

/// The curated relationship table, keyed by procedure id.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipTable {
    entries: HashMap<String, Vec<Related>>,
}

impl RelationshipTable {
    /// Load the table from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// Load the table, treating a missing file as an empty table.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            warn!(path = %path.display(), "no relationship file, relying on scored fallback");
            return Self::default();
        }
        match Self::load(path) {
            Ok(table) => table,
            Err(err) => {
                warn!(%err, path = %path.display(), "unreadable relationship file, ignoring");
                Self::default()
            }
        }
    }

    fn for_process(&self, id: &str) -> &[Related] {
        self.entries.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn default_pool(&self) -> &[Related] {
        self.entries.get("default").map(Vec::as_slice).unwrap_or(&[])
    }
}

pub struct Recommender {
    store: Arc<ProcedureStore>,
    index: Arc<RwLock<ProcessIndex>>,
    table: RelationshipTable,
    analytics: Option<Arc<Mutex<AnalyticsStore>>>,
}

impl Recommender {
    pub fn new(
        store: Arc<ProcedureStore>,
        index: Arc<RwLock<ProcessIndex>>,
        table: RelationshipTable,
        analytics: Option<Arc<Mutex<AnalyticsStore>>>,
    ) -> Self {
        Self {
            store,
            index,
            table,
            analytics,
        }
    }

    /// Up to `limit` follow-ups for `process_id`, curated entries first.
    pub async fn recommend(&self, process_id: &str, limit: usize) -> Vec<Related> {
        let snapshot = self.store.snapshot();
        let mut picks: Vec<Related> = Vec::new();

        let curated = self
            .table
            .for_process(process_id)
            .iter()
            .chain(self.table.default_pool());
        for related in curated {
            if picks.len() == limit {
                return picks;
            }
            if related.process_id == process_id
                || picks.iter().any(|p| p.process_id == related.process_id)
            {
                continue;
            }
            // a relationship entry pointing at a deleted definition is stale
            if !snapshot.contains_key(&related.process_id) {
                warn!(target = %related.process_id, "relationship target unknown, skipping");
                continue;
            }
            picks.push(related.clone());
        }

        if picks.len() < limit {
            let need = limit - picks.len();
            let exclude: Vec<&str> = picks.iter().map(|p| p.process_id.as_str()).collect();
            picks.extend(self.scored(process_id, &exclude, need).await);
        }
        picks
    }

    /// Rank every other procedure by similarity and affinity bonuses.
    async fn scored(&self, process_id: &str, exclude: &[&str], need: usize) -> Vec<Related> {
        let snapshot = self.store.snapshot();
        let Some(current) = snapshot.get(process_id) else {
            return Vec::new();
        };

        let popular = self.popular_ids(10);
        let index = self.index.read().await;

        let mut ranked: Vec<(f32, Signal, Arc<crate::procedure::Procedure>)> = Vec::new();
        for (id, candidate) in snapshot.iter() {
            if id == process_id || exclude.contains(&id.as_str()) {
                continue;
            }

            let similarity = index.similarity_between(process_id, id).unwrap_or(0.0);
            let category = if !current.category.is_empty() && candidate.category == current.category
            {
                0.2
            } else {
                0.0
            };
            let shared = candidate
                .keywords
                .iter()
                .filter(|k| current.keywords.contains(k))
                .count();
            let keywords = (shared as f32 * 0.1).min(0.3);
            let popularity = if popular.iter().any(|p| p == id) {
                0.1
            } else {
                0.0
            };

            let score = similarity + category + keywords + popularity;
            if score <= 0.0 {
                continue;
            }
            let signal = Signal::dominant(similarity, category, keywords, popularity);
            ranked.push((score, signal, Arc::clone(candidate)));
        }
        drop(index);

        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranked
            .into_iter()
            .take(need)
            .map(|(_, signal, candidate)| Related {
                process_id: candidate.id.clone(),
                transition: format!("You might also want to {}", lowercase_first(&candidate.title)),
                reason: signal.describe(current, &candidate),
            })
            .collect()
    }

    fn popular_ids(&self, limit: usize) -> Vec<String> {
        let Some(analytics) = &self.analytics else {
            return Vec::new();
        };
        let Ok(mut analytics) = analytics.lock() else {
            return Vec::new();
        };
        match analytics.popular_processes(limit) {
            Ok(rows) => rows.into_iter().map(|(id, _)| id).collect(),
            Err(err) => {
                warn!(%err, "popularity lookup failed, scoring without it");
                Vec::new()
            }
        }
    }
}

/// The strongest contributor to a fallback score, used to phrase the reason.
#[derive(Debug, Clone, Copy)]
enum Signal {
    Similarity,
    Category,
    Keywords,
    Popularity,
}

impl Signal {
    fn dominant(similarity: f32, category: f32, keywords: f32, popularity: f32) -> Self {
        let mut best = (similarity, Signal::Similarity);
        for pair in [
            (category, Signal::Category),
            (keywords, Signal::Keywords),
            (popularity, Signal::Popularity),
        ] {
            if pair.0 > best.0 {
                best = pair;
            }
        }
        best.1
    }

    fn describe(
        self,
        current: &crate::procedure::Procedure,
        candidate: &crate::procedure::Procedure,
    ) -> String {
        match self {
            Signal::Similarity => {
                format!("closely related to {}", lowercase_first(&current.title))
            }
            Signal::Category => format!(
                "another {} guide",
                candidate.category.replace('_', " ")
            ),
            Signal::Keywords => "covers overlapping topics".to_string(),
            Signal::Popularity => "frequently requested by other users".to_string(),
        }
    }
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
