use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EmbeddingModel;
use crate::error::{RagsyncError, Result};

/// Request structure for OpenAI embeddings API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Response structure from OpenAI embeddings API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Individual embedding data in API response
#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for any OpenAI-compatible `/embeddings` endpoint
///
/// Issues exactly one HTTP request per call; batching and retries live in
/// [`EmbeddingGenerator`](super::EmbeddingGenerator). Rate limiting (429),
/// server errors (5xx) and network failures are reported as `TransientIo`,
/// everything else as `Embedding`.
pub struct OpenAIEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root, e.g. `https://api.openai.com/v1`
    /// * `api_key` - Bearer token
    /// * `model` - Model name (e.g., "text-embedding-3-small")
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: &str, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagsyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model,
        })
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl EmbeddingModel for OpenAIEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| RagsyncError::TransientIo(format!("embeddings request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            let message = format!("embeddings API error {}: {}", status, body);
            return Err(if is_transient_status(status) {
                RagsyncError::TransientIo(message)
            } else {
                RagsyncError::Embedding(message)
            });
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagsyncError::Embedding(format!("Failed to parse response: {}", e)))?;

        if result.data.len() != texts.len() {
            return Err(RagsyncError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                result.data.len()
            )));
        }

        // The API documents `index`; order by it rather than trusting response order
        let mut data = result.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }

        log::debug!(
            "embeddings: {} texts via {} in {:?}",
            texts.len(),
            self.model,
            start.elapsed()
        );
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn embedder(server: &MockServer) -> OpenAIEmbedder {
        OpenAIEmbedder::new(
            &server.url("/v1/"),
            "test-key".to_string(),
            "text-embedding-3-small".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_embed_orders_by_index() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/embeddings")
                    .header("authorization", "Bearer test-key")
                    .json_body(json!({"model": "text-embedding-3-small", "input": ["a", "b"]}));
                then.status(200).json_body(json!({
                    "data": [
                        {"index": 1, "embedding": [0.0, 1.0]},
                        {"index": 0, "embedding": [1.0, 0.0]}
                    ]
                }));
            })
            .await;

        let vectors = embedder(&server)
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(429).body("slow down");
            })
            .await;

        let err = embedder(&server).embed(&["a".to_string()]).await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_bad_request_is_not_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(400).body("input too long");
            })
            .await;

        let err = embedder(&server).embed(&["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, RagsyncError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_count_mismatch_is_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200).json_body(json!({"data": [{"index": 0, "embedding": [1.0]}]}));
            })
            .await;

        let err = embedder(&server)
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RagsyncError::Embedding(_)));
    }
}
