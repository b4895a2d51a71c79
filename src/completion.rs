//! Completion capability: `complete(prompt) -> text`.
//!
//! Single-shot, no streaming and no multi-turn state; the core sends one
//! grounded prompt per question. The real implementation calls an
//! OpenAI-compatible `/v1/chat/completions` endpoint with the same
//! retry/backoff discipline as the embedding client.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::CompletionConfig;
use crate::error::{Error, Result};

/// Capability interface for text completion.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model(&self) -> &str;

    /// Complete a single prompt. The system/user split is handled here;
    /// callers pass one assembled prompt string.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompletion {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenAiCompletion {
    pub fn from_config(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Configuration("OPENAI_API_KEY not set".to_string()))?;
        Self::new(
            "https://api.openai.com".to_string(),
            api_key,
            config.model.clone(),
            config.max_retries,
            config.timeout_secs,
        )
    }

    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        max_retries: u32,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_retries,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletion {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::transient("completion", e.to_string()))?;
                        return parse_completion_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(Error::transient(
                            "completion",
                            format!("{status}: {body_text}"),
                        ));
                        continue;
                    }

                    return Err(Error::rejected(
                        "completion",
                        format!("{status}: {body_text}"),
                    ));
                }
                Err(e) => {
                    last_err = Some(Error::transient("completion", e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::transient("completion", "completion failed after retries")))
    }
}

fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(String::from)
        .ok_or_else(|| Error::transient("completion", "response missing message content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_complete_extracts_message_content() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .json_body_partial(r#"{"model":"test-model"}"#);
            then.status(200).json_body(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "It parses TOML."}}]
            }));
        });

        let client = OpenAiCompletion::new(
            server.base_url(),
            "test-key".into(),
            "test-model".into(),
            0,
            5,
        )
        .unwrap();
        let text = client.complete("system", "question").await.unwrap();
        assert_eq!(text, "It parses TOML.");
    }

    #[tokio::test]
    async fn test_auth_failure_rejected_without_retry() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).body("bad key");
        });

        let client = OpenAiCompletion::new(
            server.base_url(),
            "test-key".into(),
            "test-model".into(),
            2,
            5,
        )
        .unwrap();
        let err = client.complete("system", "question").await.unwrap_err();
        assert!(matches!(err, Error::Rejected { .. }));
        assert!(!err.is_transient());
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn test_malformed_response_is_transient() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200).json_body(serde_json::json!({"choices": []}));
        });

        let client = OpenAiCompletion::new(
            server.base_url(),
            "test-key".into(),
            "test-model".into(),
            0,
            5,
        )
        .unwrap();
        let err = client.complete("system", "question").await.unwrap_err();
        assert!(err.is_transient());
    }
}
