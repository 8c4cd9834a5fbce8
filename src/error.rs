//! Error types for Procwise.
//!
//! The taxonomy mirrors how failures are meant to degrade:
//! [`Error::Definition`] is logged and the file skipped, [`Error::Embedding`]
//! degrades only the semantic stage of a match, [`Error::Index`] drops the
//! index into memory-only mode at startup, and [`Error::Completion`] is
//! surfaced to the user as a plain apology. A query that matches nothing is
//! not an error at all; it is `None`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// A procedure definition file is malformed. Never fatal to a store load.
    #[error("invalid procedure definition {path}: {message}")]
    Definition { path: String, message: String },

    /// The embedding service call failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The persistent vector index could not be initialized or persisted.
    #[error("index error: {0}")]
    Index(String),

    /// The chat completion service failed.
    #[error("completion error: {0}")]
    Completion(String),

    /// Analytics storage failed.
    #[error("analytics error: {0}")]
    Analytics(#[from] diesel::result::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Embedding(err.to_string())
    }
}

impl From<async_openai::error::OpenAIError> for Error {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        Error::Completion(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_error_names_the_file() {
        let err = Error::Definition {
            path: "processes/upload_asset.json".to_string(),
            message: "missing required field 'description'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid procedure definition processes/upload_asset.json: \
             missing required field 'description'"
        );
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("no such directory"));
    }
}
