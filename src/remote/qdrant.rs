//! Qdrant REST client implementing [`RemoteStore`].

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use super::{RemoteHit, RemotePoint, RemoteStore};
use crate::error::{RagsyncError, Result};
use crate::ingest::Chunk;

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

/// Qdrant returns either a bare list or `{ "points": [...] }` depending on version.
#[derive(Deserialize)]
#[serde(untagged)]
enum QueryResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
struct QueryPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

/// Point id for a chunk fingerprint: a UUID built from the first 16 bytes of its SHA-256.
///
/// Qdrant only accepts integers and UUIDs as ids, so the fingerprint itself
/// travels in the payload.
pub fn point_id(fingerprint: &str) -> Uuid {
    let digest = Sha256::digest(fingerprint.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(url: &str, collection: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagsyncError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let base_url = normalize_base_url(url)?;
        log::debug!(
            "remote: qdrant at {} collection {} (api key: {})",
            base_url,
            collection,
            api_key.is_some()
        );
        Ok(Self {
            client,
            base_url,
            collection: collection.to_string(),
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format_endpoint(&self.base_url, path));
        if let Some(api_key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = req
            .send()
            .await
            .map_err(|e| RagsyncError::TransientIo(format!("qdrant {} failed: {}", what, e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, what, &body))
    }

    async fn create_collection(&self, dimensions: usize) -> Result<()> {
        let body = json!({
            "vectors": {
                "size": dimensions,
                "distance": "Cosine"
            }
        });
        self.send(
            self.request(Method::PUT, &format!("collections/{}", self.collection)).json(&body),
            "create collection",
        )
        .await?;
        log::info!("remote: created collection {} ({} dims)", self.collection, dimensions);
        Ok(())
    }
}

fn status_error(status: StatusCode, what: &str, body: &str) -> RagsyncError {
    let message = format!("qdrant {} returned {}: {}", what, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RagsyncError::TransientIo(message)
    } else {
        RagsyncError::RemoteStore(message)
    }
}

fn normalize_base_url(url: &str) -> Result<String> {
    let mut parsed = url::Url::parse(url)
        .map_err(|e| RagsyncError::Config(format!("invalid remote url {:?}: {}", url, e)))?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[async_trait]
impl RemoteStore for QdrantStore {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn ensure_ready(&self, dimensions: usize) -> Result<()> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await
            .map_err(|e| RagsyncError::TransientIo(format!("qdrant collection check failed: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => self.create_collection(dimensions).await,
            StatusCode::OK => {
                let info: Value = response
                    .json()
                    .await
                    .map_err(|e| RagsyncError::RemoteStore(format!("bad collection info: {}", e)))?;
                match info
                    .pointer("/result/config/params/vectors/size")
                    .and_then(Value::as_u64)
                {
                    Some(size) if size as usize != dimensions => Err(RagsyncError::Config(format!(
                        "collection {} holds {}-dimensional vectors, embeddings are {}",
                        self.collection, size, dimensions
                    ))),
                    _ => Ok(()),
                }
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, "collection check", &body))
            }
        }
    }

    async fn upsert(&self, point: &RemotePoint) -> Result<()> {
        let payload = serde_json::to_value(&point.chunk)?;
        let body = json!({
            "points": [{
                "id": point_id(&point.chunk.fingerprint),
                "vector": point.vector,
                "payload": payload,
            }]
        });
        self.send(
            self.request(Method::PUT, &format!("collections/{}/points", self.collection))
                .query(&[("wait", true)])
                .json(&body),
            "upsert",
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, fingerprints: &[String]) -> Result<()> {
        if fingerprints.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = fingerprints.iter().map(|fp| point_id(fp)).collect();
        self.send(
            self.request(Method::POST, &format!("collections/{}/points/delete", self.collection))
                .query(&[("wait", true)])
                .json(&json!({ "points": ids })),
            "delete",
        )
        .await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RemoteHit>> {
        let body = json!({
            "query": vector,
            "limit": k,
            "with_payload": true,
        });
        let response = self
            .send(
                self.request(Method::POST, &format!("collections/{}/points/query", self.collection))
                    .json(&body),
                "query",
            )
            .await?;

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| RagsyncError::RemoteStore(format!("bad query response: {}", e)))?;
        let points = match parsed.result {
            QueryResult::Points(points) => points,
            QueryResult::Object { points } => points,
        };

        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            let Some(payload) = point.payload else {
                continue;
            };
            match serde_json::from_value::<Chunk>(Value::Object(payload)) {
                Ok(chunk) => hits.push(RemoteHit {
                    chunk,
                    score: point.score,
                }),
                Err(e) => log::warn!("remote: skipping point with unreadable payload: {}", e),
            }
        }
        Ok(hits)
    }
}
