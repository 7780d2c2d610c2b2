//! Embedding backends selectable from configuration.
//!
//! | `embedding.provider` | Backend |
//! |----------------------|---------|
//! | `"hash"` | [`HashEmbedder`], deterministic and offline |
//! | `"openai"` | [`OpenAIEmbedder`], `POST /v1/embeddings` |
//! | `"disabled"` | [`DisabledEmbedder`], every call fails |
//!
//! Backends make a single attempt per call. Timeouts, backoff and retries
//! are applied by the core's `EmbeddingComputer`, so the OpenAI backend only
//! has to classify failures: HTTP 429, 5xx and network errors are
//! transient, any other 4xx is a permanent rejection.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use tribed_core::embedding::{DisabledEmbedder, Embedder, HashEmbedder};
use tribed_core::error::EmbeddingError;

use crate::config::EmbeddingConfig;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_HASH_DIMS: usize = 256;
const DEFAULT_HASH_VERSION: &str = "hash-v1";

/// Embedder backed by the OpenAI API. The model name is the version tag.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };

        // Slightly above the per-attempt timeout so the computer's deadline
        // fires first and reports a Timeout.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.saturating_add(1_000)))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn version(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str, version: &str) -> Result<Vec<f32>, EmbeddingError> {
        if version != self.model {
            return Err(EmbeddingError::UnsupportedVersion {
                requested: version.to_string(),
                served: self.model.clone(),
            });
        }
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| EmbeddingError::Unavailable(format!("unreadable response: {}", e)))?;
            return parse_openai_response(&json);
        }

        let body_text = response.text().await.unwrap_or_default();
        // Rate limited or server error: worth retrying
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(EmbeddingError::Unavailable(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }
        Err(EmbeddingError::Rejected(format!(
            "OpenAI API error {}: {}",
            status, body_text
        )))
    }
}

/// Extract the first `data[].embedding` array.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|data| data.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::Rejected("Invalid OpenAI response: missing embedding".into()))?;

    embedding
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Rejected("Invalid OpenAI response: non-numeric value".into()))
        })
        .collect()
}

/// Build the configured backend.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_HASH_VERSION.to_string()),
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
