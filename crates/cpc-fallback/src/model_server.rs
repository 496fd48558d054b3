//! Model server classifier
//!
//! Talks to a trained text classifier served over HTTP:
//! `POST {base_url}/predict` with `{"texts": [...]}` answers
//! `{"labels": [...]}`, one label per text.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cpc_core::{CpcError, FallbackClassifier, FallbackConfig, Result};

const NAME: &str = "model-server";

/// HTTP client for a batch prediction endpoint
pub struct ModelServerClassifier {
    client: Client,
    base_url: String,
    batch_size: usize,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    labels: Vec<String>,
}

impl ModelServerClassifier {
    /// Create a new model server client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch_size: 256,
        }
    }

    /// Create from config
    pub fn from_config(config: &FallbackConfig) -> Self {
        Self::new(config.model_server_url.clone()).with_batch_size(config.batch_size)
    }

    /// Texts sent per request
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn predict_chunk(&self, texts: &[String]) -> Result<Vec<String>> {
        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(&PredictRequest { texts })
            .send()
            .await
            .map_err(|e| CpcError::fallback(NAME, format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CpcError::fallback(
                NAME,
                format!("Server returned {status}: {error_text}"),
            ));
        }

        let result: PredictResponse = response
            .json()
            .await
            .map_err(|e| CpcError::fallback(NAME, format!("Failed to parse response: {e}")))?;

        if result.labels.len() != texts.len() {
            return Err(CpcError::fallback(
                NAME,
                format!(
                    "Server returned {} labels for {} texts",
                    result.labels.len(),
                    texts.len()
                ),
            ));
        }

        Ok(result.labels)
    }
}

#[async_trait]
impl FallbackClassifier for ModelServerClassifier {
    async fn predict(&self, texts: &[String]) -> Result<Vec<String>> {
        let mut labels = Vec::with_capacity(texts.len());
        for (i, chunk) in texts.chunks(self.batch_size).enumerate() {
            debug!(chunk = i, size = chunk.len(), "Sending prediction batch");
            labels.extend(self.predict_chunk(chunk).await?);
        }
        Ok(labels)
    }

    fn name(&self) -> &str {
        NAME
    }
}

// ============================================================================
// Tests
// ============================================================================
