//! Critic Verdict
//!
//! The critic agent performs a dry-run style critique of generated SQL and
//! returns a structured verdict. Parsing tolerates markdown fences and
//! degrades to an error verdict when the response is not valid JSON.

use crate::llm::extract_json_object;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriticStatus {
    Ok,
    Error,
    Unsafe,
}

/// Structured critique of one generated SQL statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticVerdict {
    pub status: CriticStatus,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub correction_plan: String,
    #[serde(default)]
    pub corrected_sql: Option<String>,
    #[serde(default)]
    pub is_dml: bool,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Parse the critic's raw response into a verdict. Unparseable output is
/// treated as a retryable error carrying the raw text.
pub fn parse_critic_verdict(raw: &str) -> CriticVerdict {
    let cleaned = extract_json_object(raw);
    match serde_json::from_str::<CriticVerdict>(&cleaned) {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!("Failed to parse critic verdict, treating as error: {}", e);
            CriticVerdict {
                status: CriticStatus::Error,
                error_message: raw.trim().to_string(),
                correction_plan: String::new(),
                corrected_sql: None,
                is_dml: false,
                confidence: 0.0,
            }
        }
    }
}
