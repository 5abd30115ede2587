//! LLM Client
//!
//! Provider-neutral completion interface with an OpenAI-compatible HTTP
//! implementation. Transient provider failures are retried with backoff.

use crate::error::{InsightError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Default wall-clock budget for a single completion call.
pub const LLM_TIMEOUT_SECS: u64 = 60;

const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Completion interface implemented by every LLM backend.
///
/// All agent "intelligence" flows through this single method; the runtime
/// itself has no model-specific behavior.
#[async_trait]
pub trait LlmInterface: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;
}

/// OpenAI-compatible chat completion client.
pub struct HttpLlmClient {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpLlmClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LLM_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            base_url,
            model,
            client,
        }
    }

    async fn call_once(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": temperature,
            "max_tokens": max_tokens
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| InsightError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(InsightError::Llm(format!(
                "transient provider failure: HTTP {}",
                status
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(InsightError::Llm(format!(
                "LLM API returned HTTP {}: {}",
                status, detail
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InsightError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| InsightError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }

    fn is_transient(err: &InsightError) -> bool {
        matches!(err, InsightError::Llm(msg) if msg.contains("transient provider failure"))
    }
}

#[async_trait]
impl LlmInterface for HttpLlmClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..MAX_TRANSIENT_RETRIES {
            match self.call_once(system, user, max_tokens, temperature).await {
                Ok(content) => {
                    debug!("LLM completion ok ({} chars)", content.len());
                    return Ok(content);
                }
                Err(e) if Self::is_transient(&e) && attempt + 1 < MAX_TRANSIENT_RETRIES => {
                    let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "LLM provider transient failure, retrying in {:?} (attempt {}/{}): {}",
                        backoff,
                        attempt + 1,
                        MAX_TRANSIENT_RETRIES,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| InsightError::Llm("retries exhausted".to_string())))
    }
}

/// Extract a JSON object from an LLM response that may be wrapped in prose
/// or markdown code fences.
pub fn extract_json_object(response: &str) -> String {
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if start < end {
            return response[start..=end].to_string();
        }
    }

    if let Some(start) = response.find("```json") {
        let after = &response[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }
    if let Some(start) = response.find("```") {
        let after = &response[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    response.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let response = "Here's the verdict:\n```json\n{\"status\": \"ok\"}\n```";
        let extracted = extract_json_object(response);
        assert!(extracted.starts_with('{'));
        assert!(extracted.contains("\"status\""));
    }

    #[test]
    fn test_extract_json_plain() {
        let extracted = extract_json_object("{\"a\": 1}");
        assert_eq!(extracted, "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_with_prose() {
        let extracted = extract_json_object("the answer is {\"a\": 1} thanks");
        assert_eq!(extracted, "{\"a\": 1}");
    }
}
