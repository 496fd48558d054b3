//! LLM classifier implementations
//!
//! Prompts an OpenAI-compatible chat model or a local Ollama model once
//! per text and maps each free-form answer onto the allowed label set.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cpc_core::{ConfigError, CpcError, FallbackClassifier, FallbackConfig, FallbackProvider, Result};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

// ============================================================================
// LLM Classifier
// ============================================================================

#[derive(Debug, Clone)]
enum Backend {
    OpenAi {
        api_key: String,
        base_url: String,
        max_tokens: u32,
        temperature: f32,
    },
    Ollama {
        base_url: String,
    },
}

/// Fallback classifier backed by a chat or completion model
pub struct LlmClassifier {
    client: Client,
    backend: Backend,
    model: String,
    labels: Vec<String>,
    system_prompt: String,
    max_concurrency: usize,
    name: String,
}

impl LlmClassifier {
    fn with_backend(backend: Backend, model: String) -> Self {
        let name = match &backend {
            Backend::OpenAi { .. } => format!("openai:{model}"),
            Backend::Ollama { .. } => format!("ollama:{model}"),
        };

        Self {
            client: Client::new(),
            backend,
            model,
            labels: FallbackConfig::default().labels,
            system_prompt: include_str!("prompts/classify_system.txt").to_string(),
            max_concurrency: 4,
            name,
        }
    }

    /// Create an OpenAI chat completions classifier
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_backend(
            Backend::OpenAi {
                api_key: api_key.into(),
                base_url: DEFAULT_OPENAI_URL.to_string(),
                max_tokens: 16,
                temperature: 0.0,
            },
            model.into(),
        )
    }

    /// Create an Ollama generate classifier
    pub fn ollama(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_backend(
            Backend::Ollama {
                base_url: base_url.into().trim_end_matches('/').to_string(),
            },
            model.into(),
        )
    }

    /// Create from config
    pub fn from_config(config: &FallbackConfig) -> Result<Self> {
        let classifier = match config.provider {
            FallbackProvider::OpenAI => {
                let api_key = config
                    .openai_api_key
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingRequired("OPENAI_API_KEY".to_string()))?;

                let base_url = config
                    .openai_base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());

                Self::with_backend(
                    Backend::OpenAi {
                        api_key: api_key.clone(),
                        base_url: base_url.trim_end_matches('/').to_string(),
                        max_tokens: config.max_tokens,
                        temperature: config.temperature,
                    },
                    config.model.clone(),
                )
            }
            FallbackProvider::Ollama => Self::ollama(config.ollama_url.clone(), config.model.clone()),
            FallbackProvider::ModelServer => {
                return Err(ConfigError::InvalidValue {
                    key: "fallback.provider".to_string(),
                    value: "model-server is not an LLM provider".to_string(),
                }
                .into())
            }
        };

        if config.labels.is_empty() {
            return Err(ConfigError::MissingRequired("fallback.labels".to_string()).into());
        }

        Ok(classifier
            .with_labels(config.labels.clone())
            .with_concurrency(config.max_concurrency))
    }

    /// Set custom base URL (for Azure or compatible APIs)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        match &mut self.backend {
            Backend::OpenAi { base_url, .. } | Backend::Ollama { base_url } => *base_url = url,
        }
        self
    }

    /// Labels the model may answer with
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// Requests in flight at once
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Build the classification prompt
    pub fn build_prompt(&self, text: &str) -> String {
        format!(
            "{}\n\nLabels: {}\n\nItem:\n{}\n\nLabel:",
            self.system_prompt.trim_end(),
            self.labels.join(", "),
            text
        )
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        match &self.backend {
            Backend::OpenAi {
                api_key,
                base_url,
                max_tokens,
                temperature,
            } => {
                let request = OpenAiRequest {
                    model: self.model.clone(),
                    messages: vec![Message {
                        role: "user".to_string(),
                        content: prompt,
                    }],
                    max_tokens: *max_tokens,
                    temperature: *temperature,
                };

                let response = self
                    .client
                    .post(format!("{base_url}/chat/completions"))
                    .header("Authorization", format!("Bearer {api_key}"))
                    .header("Content-Type", "application/json")
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| CpcError::fallback(&self.name, format!("Request failed: {e}")))?;

                if !response.status().is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(CpcError::fallback(
                        &self.name,
                        format!("OpenAI error: {error_text}"),
                    ));
                }

                let result: OpenAiResponse = response.json().await.map_err(|e| {
                    CpcError::fallback(&self.name, format!("Failed to parse response: {e}"))
                })?;

                result
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .ok_or_else(|| CpcError::fallback(&self.name, "No response generated"))
            }
            Backend::Ollama { base_url } => {
                let request = OllamaRequest {
                    model: self.model.clone(),
                    prompt,
                    stream: false,
                };

                let response = self
                    .client
                    .post(format!("{base_url}/api/generate"))
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| {
                        CpcError::fallback(&self.name, format!("Ollama request failed: {e}"))
                    })?;

                if !response.status().is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(CpcError::fallback(
                        &self.name,
                        format!("Ollama error: {error_text}"),
                    ));
                }

                let result: OllamaResponse = response.json().await.map_err(|e| {
                    CpcError::fallback(&self.name, format!("Failed to parse Ollama response: {e}"))
                })?;

                Ok(result.response)
            }
        }
    }

    async fn classify_one(&self, text: &str) -> Result<String> {
        let answer = self.generate(self.build_prompt(text)).await?;
        debug!(answer = %answer.trim(), "LLM answered");

        match_label(&self.labels, &answer).ok_or_else(|| {
            CpcError::fallback(
                &self.name,
                format!("answer {:?} matches none of the allowed labels", answer.trim()),
            )
        })
    }
}

#[async_trait]
impl FallbackClassifier for LlmClassifier {
    async fn predict(&self, texts: &[String]) -> Result<Vec<String>> {
        let calls: Vec<_> = texts.iter().map(|text| self.classify_one(text)).collect();

        stream::iter(calls)
            .buffered(self.max_concurrency)
            .try_collect()
            .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Map a free-form answer onto one of the allowed labels
///
/// An exact case-insensitive match wins; otherwise the answer must mention
/// exactly one label.
pub fn match_label(labels: &[String], answer: &str) -> Option<String> {
    let cleaned = answer
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '*')
        .trim()
        .to_lowercase();

    if let Some(label) = labels.iter().find(|l| l.to_lowercase() == cleaned) {
        return Some(label.clone());
    }

    let mut mentioned = labels
        .iter()
        .filter(|l| cleaned.contains(&l.to_lowercase()));
    match (mentioned.next(), mentioned.next()) {
        (Some(label), None) => Some(label.clone()),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
