//! # Procwise (library root)
//!
//! Support assistant for the **Assetflow** digital asset management
//! platform. Questions like "how do I upload a new asset?" are matched
//! against a store of curated process guides and answered from the guide
//! itself, so step text always comes from support-approved definitions and
//! never from the model's imagination.
//!
//! The pipeline:
//! - [`store`] loads JSON process definitions from disk ([`procedure`]
//!   holds the data model and validator).
//! - [`index`] keeps an ANN index over definition embeddings fetched
//!   through [`embedding`].
//! - [`matcher`] resolves a query to a definition: direct mention, then
//!   vector similarity, then keyword scoring.
//! - [`formatter`] renders the matched guide; [`recommend`] appends
//!   "what next" suggestions.
//! - [`engine`] orchestrates everything, adds LLM narration and the
//!   unmatched-query path, and records usage through [`analytics`].
//!
//! The [`commands`] module defines the CLI surface; [`config`] and
//! [`template`] cover per-user configuration and chat personas.

use directories::ProjectDirs;

pub mod analytics;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod history;
pub mod index;
pub mod matcher;
pub mod models;
pub mod procedure;
pub mod recommend;
pub mod schema;
pub mod store;
pub mod template;

pub use error::{Error, Result};

/// The per-platform configuration directory.
///
/// Uses [`directories::ProjectDirs`] with the application triple
/// `("com", "assetflow", "procwise")`, e.g. `~/.config/procwise` on Linux
/// (XDG) or `~/Library/Application Support/com.assetflow.procwise` on
/// macOS. The directory is not created here; callers that need it should
/// `fs::create_dir_all` it.
pub fn config_dir() -> Result<std::path::PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "assetflow", "procwise")
        .ok_or_else(|| Error::Config("unable to determine config directory".to_string()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
