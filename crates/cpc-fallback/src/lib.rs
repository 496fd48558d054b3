//! CPC Fallback - Text classification for unresolved entities
//!
//! Provides the merge engine that re-labels `Cultural Agnostic` rule
//! results from free text, and the classifier adapters it can drive:
//! - A trained model behind an HTTP `/predict` endpoint
//! - OpenAI-compatible chat completions
//! - Ollama
//!
//! Author: hephaex@gmail.com

pub mod llm;
pub mod merge;
pub mod model_server;

pub use llm::{match_label, LlmClassifier};
pub use merge::{FallbackMergeEngine, HybridOutput, MergeSummary, TextIndex};
pub use model_server::ModelServerClassifier;

use std::sync::Arc;

use cpc_core::{FallbackClassifier, FallbackConfig, FallbackProvider, Result};

/// Create a fallback classifier from config
pub fn create_fallback_classifier(config: &FallbackConfig) -> Result<Arc<dyn FallbackClassifier>> {
    match config.provider {
        FallbackProvider::ModelServer => Ok(Arc::new(ModelServerClassifier::from_config(config))),
        FallbackProvider::OpenAI | FallbackProvider::Ollama => {
            Ok(Arc::new(LlmClassifier::from_config(config)?))
        }
    }
}
