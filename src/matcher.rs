//! # Query → procedure matching
//!
//! Three stages in strict precedence, each consulted only when the previous
//! one produced nothing:
//!
//! 1. **Direct mention** — the query literally contains a procedure id as a
//!    whole-word phrase (underscores read as spaces), case-insensitive.
//! 2. **Semantic similarity** — the embedding index is queried twice, with
//!    the raw query and with a stop-word-stripped variant; results are
//!    unioned, de-duplicated by id keeping first-seen order, and the best
//!    similarity is accepted if it clears the configured threshold.
//!    Embedding failures degrade this stage to an empty result.
//! 3. **Keyword scoring** — an exact match between a keyword and the
//!    stripped query scores 10; substring containment scores the keyword's
//!    word count (multi-word phrases are worth more); a shared term scores
//!    0.25. The strictly-highest total wins if it exceeds the configured
//!    floor.
//!
//! Every invocation, hit or miss, pushes a [`MatchEvent`] onto the analytics
//! channel. The channel is fire-and-forget; analytics can never slow down or
//! fail a match.
//!
//! The similarity threshold defaults to 0.75. Lowering it (0.65 is the other
//! value seen in production configs) trades precision for recall; both knobs
//! and the stop-word list live in [`ProcwiseConfig`](crate::config).

use std::sync::Arc;

use regex::Regex;
use tokio::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::index::{Hit, ProcessIndex};
use crate::models::MatchEvent;
use crate::store::{ProcedureMap, ProcedureStore};

/// Which stage produced a match. Recorded in analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    DirectMention,
    Vector,
    Keyword,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMethod::DirectMention => "direct_mention",
            MatchMethod::Vector => "vector",
            MatchMethod::Keyword => "keyword",
        }
    }
}

/// A successful match: which procedure, how confident, through which stage.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub process_id: String,
    /// Confidence in [0, 1]; keyword scores are normalized into this range.
    pub score: f32,
    pub method: MatchMethod,
}

pub struct Matcher {
    store: Arc<ProcedureStore>,
    index: Arc<RwLock<ProcessIndex>>,
    events: UnboundedSender<MatchEvent>,
    similarity_threshold: f32,
    keyword_floor: f32,
    stop_words: Vec<String>,
}

impl Matcher {
    pub fn new(
        store: Arc<ProcedureStore>,
        index: Arc<RwLock<ProcessIndex>>,
        events: UnboundedSender<MatchEvent>,
        similarity_threshold: f32,
        keyword_floor: f32,
        stop_words: Vec<String>,
    ) -> Self {
        Self {
            store,
            index,
            events,
            similarity_threshold,
            keyword_floor,
            stop_words,
        }
    }

    /// Match a raw query against the known procedures.
    ///
    /// Returns `None` when no stage accepts — a defined outcome, not an
    /// error. Always reports the invocation to analytics.
    pub async fn match_query(&self, query: &str) -> Option<MatchResult> {
        let result = self.run_stages(query).await;

        let event = match &result {
            Some(m) => MatchEvent::new(query, Some(&m.process_id), Some(m.method.as_str())),
            None => MatchEvent::new(query, None, None),
        };
        // recorder may be gone during shutdown; drop the event in that case
        let _ = self.events.send(event);

        result
    }

    async fn run_stages(&self, query: &str) -> Option<MatchResult> {
        let query_lower = query.to_lowercase();
        let snapshot = self.store.snapshot();

        if let Some(hit) = self.direct_mention(&query_lower, &snapshot) {
            return Some(hit);
        }

        let stripped = self.strip_stop_words(&query_lower);
        if let Some(hit) = self.vector_stage(&query_lower, &stripped).await {
            return Some(hit);
        }

        self.keyword_stage(&stripped, &snapshot)
    }

    fn direct_mention(&self, query_lower: &str, snapshot: &ProcedureMap) -> Option<MatchResult> {
        for id in snapshot.keys() {
            let phrase = id.replace('_', " ");
            let pattern = format!(r"\b{}\b", regex::escape(&phrase));
            let Ok(re) = Regex::new(&pattern) else {
                continue;
            };
            if re.is_match(query_lower) {
                info!(process_id = %id, "direct process mention");
                return Some(MatchResult {
                    process_id: id.clone(),
                    score: 1.0,
                    method: MatchMethod::DirectMention,
                });
            }
        }
        None
    }

    async fn vector_stage(&self, query_lower: &str, stripped: &str) -> Option<MatchResult> {
        let mut variants = vec![query_lower.to_string()];
        if !stripped.is_empty() && stripped != query_lower {
            variants.push(stripped.to_string());
        }

        let index = self.index.read().await;
        let mut union: Vec<Hit> = Vec::new();
        for variant in &variants {
            let hits = match index.query(variant, 3).await {
                Ok(hits) => hits,
                Err(err) => {
                    warn!(%err, "vector search unavailable, falling through");
                    continue;
                }
            };
            for hit in hits {
                if !union.iter().any(|h| h.process_id == hit.process_id) {
                    union.push(hit);
                }
            }
        }
        drop(index);

        let best = union
            .into_iter()
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity))?;
        debug!(process_id = %best.process_id, similarity = best.similarity, "best vector hit");

        if best.similarity > self.similarity_threshold {
            info!(
                process_id = %best.process_id,
                similarity = best.similarity,
                "vector similarity match"
            );
            return Some(MatchResult {
                process_id: best.process_id,
                score: best.similarity,
                method: MatchMethod::Vector,
            });
        }
        None
    }

    /// Score keywords against the stop-word-stripped query, so filler words
    /// can neither create nor break a phrase match.
    fn keyword_stage(&self, stripped: &str, snapshot: &ProcedureMap) -> Option<MatchResult> {
        let stripped_terms: Vec<&str> = stripped.split_whitespace().collect();

        let mut best: Option<(String, f32)> = None;
        for (id, procedure) in snapshot.iter() {
            let mut score = 0.0f32;
            for keyword in &procedure.keywords {
                if keyword == stripped {
                    score += 10.0;
                } else if stripped.contains(keyword.as_str()) {
                    score += keyword.split_whitespace().count() as f32;
                } else if keyword
                    .split_whitespace()
                    .any(|term| stripped_terms.contains(&term))
                {
                    score += 0.25;
                }
            }
            // strictly greater: ties favor whichever procedure was scored first
            if score > best.as_ref().map_or(0.0, |(_, s)| *s) {
                best = Some((id.clone(), score));
            }
        }

        let (process_id, score) = best?;
        if score > self.keyword_floor {
            info!(%process_id, score, "keyword match");
            return Some(MatchResult {
                process_id,
                score: (score / 10.0).min(1.0),
                method: MatchMethod::Keyword,
            });
        }
        None
    }

    fn strip_stop_words(&self, query_lower: &str) -> String {
        query_lower
            .split_whitespace()
            .filter(|word| !self.stop_words.iter().any(|s| s == word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
