//! Runtime Configuration
//!
//! Reads the fixed set of environment names that change engine behavior.

use crate::error::{InsightError, Result};
use std::path::PathBuf;

/// Sandbox execution mode requested by the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    Container,
    Restricted,
    Auto,
}

impl SandboxMode {
    fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "container" => Ok(SandboxMode::Container),
            "restricted" => Ok(SandboxMode::Restricted),
            "auto" => Ok(SandboxMode::Auto),
            other => Err(InsightError::Config(format!(
                "Invalid SANDBOX_MODE '{}': expected container|restricted|auto",
                other
            ))),
        }
    }
}

/// Engine configuration assembled from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub reasoning_api_key: String,
    pub reasoning_model: String,
    pub embedding_model: String,
    pub search_api_key: Option<String>,
    pub database_url: String,
    pub sandbox_mode: SandboxMode,
    pub sentry_interval_minutes: u64,
    pub advanced_pii: bool,
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Fails fast when the primary LLM key is absent: the pipeline cannot
    /// run without it and every other entry point depends on it.
    pub fn from_env() -> Result<Self> {
        let llm_api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| InsightError::Config("LLM_API_KEY is required".to_string()))?;

        let reasoning_api_key =
            std::env::var("REASONING_API_KEY").unwrap_or_else(|_| llm_api_key.clone());

        let sandbox_mode = match std::env::var("SANDBOX_MODE") {
            Ok(v) => SandboxMode::parse(&v)?,
            Err(_) => SandboxMode::Auto,
        };

        let sentry_interval_minutes = match std::env::var("SENTRY_INTERVAL_MINUTES") {
            Ok(v) => v.parse::<u64>().map_err(|_| {
                InsightError::Config(format!("Invalid SENTRY_INTERVAL_MINUTES '{}'", v))
            })?,
            Err(_) => 5,
        };

        let advanced_pii = std::env::var("ADVANCED_PII")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            llm_api_key,
            llm_base_url: std::env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            reasoning_api_key,
            reasoning_model: std::env::var("REASONING_MODEL")
                .unwrap_or_else(|_| "o1-mini".to_string()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            search_api_key: std::env::var("SEARCH_API_KEY").ok(),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/sample.db".to_string()),
            sandbox_mode,
            sentry_interval_minutes,
            advanced_pii,
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            ),
        })
    }

    /// Directory holding the persisted vector store.
    pub fn schema_library_dir(&self) -> PathBuf {
        self.data_dir.join("schema_library")
    }

    /// Directory that report files are written into.
    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    /// Path of the business glossary document (a YAML key-value tree).
    pub fn glossary_path(&self) -> PathBuf {
        self.data_dir.join("glossary.config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_mode_parse() {
        assert_eq!(SandboxMode::parse("container").unwrap(), SandboxMode::Container);
        assert_eq!(SandboxMode::parse("RESTRICTED").unwrap(), SandboxMode::Restricted);
        assert_eq!(SandboxMode::parse("auto").unwrap(), SandboxMode::Auto);
        assert!(SandboxMode::parse("bare-metal").is_err());
    }
}
