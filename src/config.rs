//! Application configuration, loaded from a YAML file.
//!
//! `ProcwiseConfig` holds everything the engine needs: where the model API
//! lives, where the process definitions and index live on disk, and the
//! matcher tuning knobs. Every tunable has a serde default so a minimal
//! config only needs the API fields.
//!
//! # Examples
//!
//! ```no_run
//! use procwise::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::Result;

/// Everything needed to run the assistant.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct ProcwiseConfig {
    /// API key sent as a bearer token to the model service.
    pub api_key: String,

    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,

    /// Chat model used to narrate and to answer unmatched queries.
    pub model: String,

    /// Model used for the `/embeddings` endpoint.
    pub embedding_model: String,

    /// Directory scanned (recursively) for `*.json` process definitions.
    pub processes_dir: PathBuf,

    /// YAML relationship table for "what next" suggestions.
    #[serde(default)]
    pub relationships_path: Option<PathBuf>,

    /// Where the vector index is persisted; omit for memory-only mode.
    #[serde(default)]
    pub index_dir: Option<PathBuf>,

    /// SQLite database for match analytics.
    #[serde(default = "default_analytics_db_url")]
    pub analytics_db_url: String,

    /// Have the model narrate matched guides instead of returning them
    /// verbatim.
    #[serde(default)]
    pub narrate: bool,

    /// Minimum similarity a vector hit must exceed. Lowering it trades
    /// precision for recall.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Minimum keyword score a fallback hit must exceed. 2.0 is the
    /// stricter production alternative to the permissive default.
    #[serde(default)]
    pub keyword_floor: f32,

    /// Words stripped from queries before semantic and keyword matching.
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,

    /// Completion token cap per chat call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u16,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Token budget for interactive conversation history.
    #[serde(default = "default_history_tokens")]
    pub history_max_tokens: usize,

    /// Timeout for embedding requests, in seconds.
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
}

fn default_analytics_db_url() -> String {
    "procwise_analytics.db".to_string()
}

fn default_similarity_threshold() -> f32 {
    0.75
}

pub fn default_stop_words() -> Vec<String> {
    [
        "a", "an", "the", "i", "me", "my", "we", "you", "your", "it", "is", "are", "am", "was",
        "be", "been", "do", "does", "did", "can", "could", "would", "should", "will", "how",
        "what", "where", "when", "why", "who", "to", "of", "in", "on", "for", "with", "and",
        "or", "please", "need", "want", "help",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_tokens() -> u16 {
    1024
}

fn default_temperature() -> f32 {
    0.3
}

fn default_history_tokens() -> usize {
    2048
}

fn default_embed_timeout_secs() -> u64 {
    15
}

/// Load the configuration from a YAML file.
pub fn load_config(file: &str) -> Result<ProcwiseConfig> {
    let content = fs::read_to_string(file)?;
    let config: ProcwiseConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}
