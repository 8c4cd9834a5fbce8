//! Client for an OpenAI-compatible `/embeddings` endpoint.
//!
//! The embedding service is treated as an opaque collaborator: text in,
//! fixed-length vector out. All calls carry a bounded timeout; a failure
//! here only degrades the semantic stage of whatever operation asked for
//! the vector.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    /// Build a client against `api_base` (e.g. `https://api.openai.com/v1`).
    ///
    /// `timeout` bounds every request end to end.
    pub fn new(api_base: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Embedding(e.to_string()))?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /// Embed one text. Errors are per-call; the caller decides how to degrade.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!(
                "embedding service returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::Embedding("embedding service returned no data".to_string()))?;

        debug!(dimension = vector.len(), "embedded text");
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> EmbeddingClient {
        EmbeddingClient::new(
            &server.base_url(),
            "test-key",
            "test-embedding-model",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn embed_returns_the_vector() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/embeddings")
                .header("authorization", "Bearer test-key");
            then.status(200)
                .json_body(serde_json::json!({
                    "data": [{"embedding": [0.1, 0.2, 0.3]}]
                }));
        });

        let client = client_for(&server);
        let vector = client.embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
        mock.assert();
    }

    #[tokio::test]
    async fn service_error_becomes_embedding_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(500).body("boom");
        });

        let client = client_for(&server);
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn empty_data_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(serde_json::json!({"data": []}));
        });

        let client = client_for(&server);
        assert!(client.embed("hello").await.is_err());
    }
}
