//! Pinecone-backed [`VectorIndex`] over the data-plane REST API.
//!
//! Metadata written per record is exactly
//! `{projectId, path, chunkIndex, hash, text}`; per-project isolation is a
//! metadata filter on `projectId` at query time.
//!
//! Construction fails fast when `PINECONE_API_KEY` or the index host is
//! unresolved. Runtime failures are transient: HTTP 429 and 5xx are retried
//! with exponential backoff (1s, 2s, 4s, ... capped), other 4xx fail
//! immediately, and exhausted retries surface as a transient error for the
//! caller to handle.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, EmbeddedChunk, ScoredChunk};

use super::VectorIndex;

const MAX_RETRIES: u32 = 5;
const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Page size for the list endpoint.
const LIST_LIMIT: usize = 100;

#[derive(Debug)]
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: String,
}

impl PineconeIndex {
    /// Build from configuration, resolving the API key from the
    /// environment.
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let api_key = std::env::var("PINECONE_API_KEY").map_err(|_| {
            Error::Configuration(
                "Pinecone is not configured. Set PINECONE_API_KEY (and index.host in the config)."
                    .to_string(),
            )
        })?;

        let host = config
            .host
            .clone()
            .ok_or_else(|| Error::Configuration("index.host is required".to_string()))?;

        Self::new(host, api_key, config.namespace.clone())
    }

    pub fn new(host: String, api_key: String, namespace: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            api_key,
            namespace,
        })
    }

    /// POST with retry/backoff for rate limits and server errors.
    async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.host, path);
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Api-Key", &self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| Error::transient("pinecone", e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::transient(
                            "pinecone",
                            format!("{status}: {body_text}"),
                        ));
                        continue;
                    }

                    // Client error other than 429: retrying cannot help.
                    return Err(Error::rejected(
                        "pinecone",
                        format!("{status}: {body_text}"),
                    ));
                }
                Err(e) => {
                    last_err = Some(Error::transient("pinecone", e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::transient("pinecone", "request failed after retries")))
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.host, path);
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .get(&url)
                .header("Api-Key", &self.api_key)
                .query(params)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .map_err(|e| Error::transient("pinecone", e.to_string()));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::transient(
                            "pinecone",
                            format!("{status}: {body_text}"),
                        ));
                        continue;
                    }

                    return Err(Error::rejected(
                        "pinecone",
                        format!("{status}: {body_text}"),
                    ));
                }
                Err(e) => {
                    last_err = Some(Error::transient("pinecone", e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::transient("pinecone", "request failed after retries")))
    }
}

fn metadata_json(chunk: &Chunk) -> serde_json::Value {
    serde_json::json!({
        "projectId": chunk.project_id,
        "path": chunk.path,
        "chunkIndex": chunk.chunk_index,
        "hash": chunk.hash,
        "text": chunk.text,
    })
}

fn chunk_from_metadata(metadata: &serde_json::Value) -> Option<Chunk> {
    Some(Chunk {
        project_id: metadata.get("projectId")?.as_str()?.to_string(),
        path: metadata.get("path")?.as_str()?.to_string(),
        chunk_index: metadata.get("chunkIndex")?.as_i64()?,
        hash: metadata.get("hash")?.as_str()?.to_string(),
        text: metadata.get("text")?.as_str()?.to_string(),
    })
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, records: &[EmbeddedChunk]) -> Result<()> {
        let vectors: Vec<serde_json::Value> = records
            .iter()
            .map(|record| {
                serde_json::json!({
                    "id": record.chunk.record_id(),
                    "values": record.vector,
                    "metadata": metadata_json(&record.chunk),
                })
            })
            .collect();

        let body = serde_json::json!({
            "vectors": vectors,
            "namespace": self.namespace,
        });

        self.post_json("/vectors/upsert", &body).await?;
        debug!(chunks = records.len(), "pinecone upsert committed");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        project_id: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "namespace": self.namespace,
            "filter": { "projectId": { "$eq": project_id } },
        });

        let json = self.post_json("/query", &body).await?;

        let matches = json
            .get("matches")
            .and_then(|m| m.as_array())
            .ok_or_else(|| Error::transient("pinecone", "query response missing matches"))?;

        let mut results = Vec::with_capacity(matches.len());
        for entry in matches {
            let score = entry.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32;
            let Some(chunk) = entry.get("metadata").and_then(chunk_from_metadata) else {
                // Records written by other tooling may lack our metadata
                // shape; they cannot be cited, so skip them.
                continue;
            };
            results.push(ScoredChunk { chunk, score });
        }

        Ok(results)
    }

    async fn fetch_hashes(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut params: Vec<(&str, String)> =
            ids.iter().map(|id| ("ids", id.clone())).collect();
        params.push(("namespace", self.namespace.clone()));

        let json = self.get_json("/vectors/fetch", &params).await?;

        let mut hashes = HashMap::new();
        if let Some(vectors) = json.get("vectors").and_then(|v| v.as_object()) {
            for (id, record) in vectors {
                if let Some(hash) = record
                    .get("metadata")
                    .and_then(|m| m.get("hash"))
                    .and_then(|h| h.as_str())
                {
                    hashes.insert(id.clone(), hash.to_string());
                }
            }
        }
        Ok(hashes)
    }

    async fn list_ids(&self, project_id: &str) -> Result<Vec<String>> {
        // Record ids start with the escaped project segment, so a prefix
        // walk enumerates exactly one project's records even when project
        // ids contain ':' themselves.
        let prefix = crate::models::record_id_prefix(project_id);
        let mut ids = Vec::new();
        let mut pagination_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("prefix", prefix.clone()),
                ("limit", LIST_LIMIT.to_string()),
                ("namespace", self.namespace.clone()),
            ];
            if let Some(token) = &pagination_token {
                params.push(("paginationToken", token.clone()));
            }

            let json = self.get_json("/vectors/list", &params).await?;

            if let Some(vectors) = json.get("vectors").and_then(|v| v.as_array()) {
                for entry in vectors {
                    if let Some(id) = entry.get("id").and_then(|i| i.as_str()) {
                        ids.push(id.to_string());
                    }
                }
            }

            pagination_token = json
                .get("pagination")
                .and_then(|p| p.get("next"))
                .and_then(|n| n.as_str())
                .map(String::from);

            if pagination_token.is_none() {
                break;
            }
        }

        Ok(ids)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let body = serde_json::json!({
            "ids": ids,
            "namespace": self.namespace,
        });
        self.post_json("/vectors/delete", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn index_for(server: &MockServer) -> PineconeIndex {
        PineconeIndex::new(server.base_url(), "test-key".to_string(), String::new()).unwrap()
    }

    fn record(project: &str, path: &str, chunk_index: i64) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: Chunk::new(project, path, chunk_index, "let x = 1;".into()),
            vector: vec![0.1, 0.2],
        }
    }

    #[tokio::test]
    async fn test_upsert_sends_metadata_tuple() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/vectors/upsert")
                .header("Api-Key", "test-key")
                .json_body_partial(
                    r#"{"vectors":[{"id":"p1:a.ts#0","metadata":{"projectId":"p1","path":"a.ts","chunkIndex":0}}]}"#,
                );
            then.status(200).json_body(serde_json::json!({"upsertedCount": 1}));
        });

        let index = index_for(&server);
        index.upsert(&[record("p1", "a.ts", 0)]).await.unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_query_filters_by_project_and_parses_matches() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/query")
                .json_body_partial(r#"{"filter":{"projectId":{"$eq":"p1"}},"topK":5}"#);
            then.status(200).json_body(serde_json::json!({
                "matches": [{
                    "id": "p1:a.ts#0",
                    "score": 0.93,
                    "metadata": {
                        "projectId": "p1", "path": "a.ts", "chunkIndex": 0,
                        "hash": "h1", "text": "foo"
                    }
                }]
            }));
        });

        let index = index_for(&server);
        let results = index.query(&[0.1, 0.2], "p1", 5).await.unwrap();
        mock.assert();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.path, "a.ts");
        assert_eq!(results[0].chunk.text, "foo");
        assert!((results[0].score - 0.93).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_server_error_retried_then_succeeds() {
        let server = MockServer::start();
        let mut fail = server.mock(|when, then| {
            when.method(POST).path("/vectors/delete");
            then.status(503).body("overloaded");
        });

        let index = index_for(&server);
        // First attempt hits the 503 mock; delete it so the retry succeeds.
        let handle = tokio::spawn(async move {
            index.delete(&["p1:a.ts#0".to_string()]).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        fail.delete();
        server.mock(|when, then| {
            when.method(POST).path("/vectors/delete");
            then.status(200).json_body(serde_json::json!({}));
        });

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bad_request_fails_without_retry() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/query");
            then.status(400).body("malformed filter");
        });

        let index = index_for(&server);
        let err = index.query(&[0.1], "p1", 5).await.unwrap_err();
        assert!(matches!(err, Error::Rejected { .. }));
        assert!(err.to_string().contains("400"));
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn test_list_ids_uses_project_prefix() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/vectors/list")
                .query_param("prefix", "p1:");
            then.status(200).json_body(serde_json::json!({
                "vectors": [{"id": "p1:a.ts#0"}, {"id": "p1:a.ts#1"}]
            }));
        });

        let index = index_for(&server);
        let ids = index.list_ids("p1").await.unwrap();
        mock.assert();
        assert_eq!(ids, vec!["p1:a.ts#0".to_string(), "p1:a.ts#1".to_string()]);
    }

    #[tokio::test]
    async fn test_list_ids_escapes_colon_in_project() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/vectors/list")
                .query_param("prefix", "p%3Ax:");
            then.status(200).json_body(serde_json::json!({
                "vectors": [{"id": "p%3Ax:README.md#0"}]
            }));
        });

        let index = index_for(&server);
        // A project id containing ':' must not list under project "p".
        let ids = index.list_ids("p:x").await.unwrap();
        mock.assert();
        assert_eq!(ids, vec!["p%3Ax:README.md#0".to_string()]);
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        // from_config resolves credentials from the environment; simulate a
        // bare environment by pointing at a var we never set.
        std::env::remove_var("PINECONE_API_KEY");
        let config = IndexConfig {
            provider: "pinecone".into(),
            host: Some("https://example.test".into()),
            namespace: String::new(),
            batch_size: 100,
        };
        let err = PineconeIndex::from_config(&config).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
