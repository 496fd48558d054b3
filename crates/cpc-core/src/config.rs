//! CPC Configuration Management
//!
//! Handles configuration from environment variables and TOML files,
//! with defaults matching the conventional `data/` and `results/` layout.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Reference table locations
    pub tables: TablesConfig,

    /// Fallback classifier configuration
    pub fallback: FallbackConfig,

    /// Wikidata enrichment configuration
    pub enrichment: EnrichmentConfig,

    /// Rule stage execution
    pub pipeline: PipelineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_override()
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        // Reference tables
        if let Some(path) = env_value::<PathBuf>("CPC_HERITAGE_TABLE")? {
            self.tables.heritage = path;
        }
        if let Some(path) = env_value::<PathBuf>("CPC_CULTURE_TABLE")? {
            self.tables.culture = path;
        }
        if let Some(path) = env_value::<PathBuf>("CPC_INSTANCE_TABLE")? {
            self.tables.instance = path;
        }

        // Fallback
        if let Some(provider) = env_value::<FallbackProvider>("CPC_FALLBACK_PROVIDER")? {
            self.fallback.provider = provider;
        }
        if let Some(url) = env_value::<String>("CPC_FALLBACK_URL")? {
            self.fallback.model_server_url = url;
        }
        if let Some(model) = env_value::<String>("CPC_FALLBACK_MODEL")? {
            self.fallback.model = model;
        }
        if let Some(secs) = env_value::<u64>("CPC_FALLBACK_TIMEOUT_SECS")? {
            self.fallback.timeout_secs = Some(secs);
        }
        if let Some(url) = env_value::<String>("OLLAMA_URL")? {
            self.fallback.ollama_url = url;
        }
        // Always use env for sensitive values
        if let Some(key) = env_value::<String>("OPENAI_API_KEY")? {
            self.fallback.openai_api_key = Some(key);
        }

        // Enrichment
        if let Some(interval) = env_value::<u64>("CPC_ENRICH_MIN_INTERVAL_MS")? {
            self.enrichment.min_interval_ms = interval;
        }
        if let Some(concurrency) = env_value::<usize>("CPC_ENRICH_CONCURRENCY")? {
            self.enrichment.max_concurrency = concurrency;
        }

        // Logging
        if let Some(level) = env_value::<String>("LOG_LEVEL")? {
            self.logging.level = level;
        }

        Ok(self)
    }
}

/// Read and parse an environment variable, `None` when unset
fn env_value<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// Reference table locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    /// Heritage designation table (highest priority)
    pub heritage: PathBuf,

    /// Culture membership table
    pub culture: PathBuf,

    /// Instance-of table (lowest priority)
    pub instance: PathBuf,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            heritage: PathBuf::from("data/golden_heritage_qids.csv"),
            culture: PathBuf::from("data/golden_culture_qids.csv"),
            instance: PathBuf::from("data/golden_instance_qids.csv"),
        }
    }
}

/// Fallback classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Which classifier backs the fallback
    pub provider: FallbackProvider,

    /// Base URL of the model server exposing `POST /predict`
    pub model_server_url: String,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for Azure or compatible APIs)
    pub openai_base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// LLM model name
    pub model: String,

    /// Labels the LLM may answer with
    pub labels: Vec<String>,

    /// Texts per model-server request
    pub batch_size: usize,

    /// Concurrent LLM requests
    pub max_concurrency: usize,

    /// Maximum tokens for an LLM answer
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Upper bound on the whole fallback call; unset means no limit
    pub timeout_secs: Option<u64>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            provider: FallbackProvider::ModelServer,
            model_server_url: "http://localhost:8500".to_string(),
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "gpt-4o-mini".to_string(),
            labels: vec![
                "Cultural Agnostic".to_string(),
                "Cultural Representative".to_string(),
                "Cultural Exclusive".to_string(),
            ],
            batch_size: 256,
            max_concurrency: 4,
            max_tokens: 16,
            temperature: 0.0,
            timeout_secs: None,
        }
    }
}

/// Supported fallback classifier backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackProvider {
    /// Trained model behind an HTTP endpoint
    ModelServer,
    #[serde(rename = "openai")]
    OpenAI,
    Ollama,
}

impl FromStr for FallbackProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "model-server" | "model_server" | "server" => Ok(Self::ModelServer),
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::InvalidValue {
                key: "CPC_FALLBACK_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Wikidata enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Base of the `Special:EntityData` endpoint
    pub endpoint: String,

    /// Minimum interval between request starts, in milliseconds
    pub min_interval_ms: u64,

    /// Requests in flight at once
    pub max_concurrency: usize,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// User-Agent sent to Wikidata
    pub user_agent: String,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.wikidata.org/wiki".to_string(),
            min_interval_ms: 200,
            max_concurrency: 4,
            request_timeout_secs: 10,
            user_agent: concat!("cpc-enrich/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Rule stage execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Evaluate the rule cascade on the rayon thread pool
    pub parallel: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(
            config.tables.heritage,
            PathBuf::from("data/golden_heritage_qids.csv")
        );
        assert_eq!(config.fallback.provider, FallbackProvider::ModelServer);
        assert_eq!(config.enrichment.min_interval_ms, 200);
        assert!(config.fallback.timeout_secs.is_none());
        assert!(!config.pipeline.parallel);
    }

    #[test]
    fn test_fallback_provider_parse() {
        assert_eq!(
            "openai".parse::<FallbackProvider>().unwrap(),
            FallbackProvider::OpenAI
        );
        assert_eq!(
            "model-server".parse::<FallbackProvider>().unwrap(),
            FallbackProvider::ModelServer
        );
        assert_eq!(
            "Ollama".parse::<FallbackProvider>().unwrap(),
            FallbackProvider::Ollama
        );
        assert!("invalid".parse::<FallbackProvider>().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [tables]
            heritage = "tables/heritage.csv"

            [fallback]
            provider = "openai"
            timeout_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.tables.heritage, PathBuf::from("tables/heritage.csv"));
        assert_eq!(
            config.tables.culture,
            PathBuf::from("data/golden_culture_qids.csv")
        );
        assert_eq!(config.fallback.provider, FallbackProvider::OpenAI);
        assert_eq!(config.fallback.timeout_secs, Some(30));
        assert_eq!(config.fallback.batch_size, 256);
    }

    #[test]
    fn test_missing_config_file() {
        let err = AppConfig::from_file("/nonexistent/cpc.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
