//! Research Fetcher
//!
//! Thin adapter over a third-party web-search API used to enrich internal
//! findings with market context. Provider failures degrade to an empty
//! outcome; this component never errors at its boundary.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const SEARCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_RESULTS: usize = 5;

/// Search mode types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    General,
    News,
    Academic,
}

impl SearchMode {
    pub fn label(&self) -> &'static str {
        match self {
            SearchMode::General => "general",
            SearchMode::News => "news",
            SearchMode::Academic => "academic",
        }
    }
}

/// One external search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchFinding {
    pub url: String,
    pub relevance: f64,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// Aggregate search outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub summary: String,
    pub results: Vec<ResearchFinding>,
}

/// Web-search adapter. Without an API key every search returns empty.
pub struct ResearchFetcher {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl ResearchFetcher {
    pub fn new(api_key: Option<String>) -> Self {
        if api_key.is_none() {
            warn!("Search API key not set; external research is disabled");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            base_url: "https://api.tavily.com".to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Run a search. Unavailability of the provider, a bad response, or a
    /// missing key all come back as an empty outcome.
    pub async fn search(&self, query: &str, mode: SearchMode) -> ResearchOutcome {
        let api_key = match &self.api_key {
            Some(key) => key.clone(),
            None => return ResearchOutcome::default(),
        };

        info!("Executing web search: '{}' (mode: {})", query, mode.label());

        let body = serde_json::json!({
            "api_key": api_key,
            "query": query,
            "topic": mode.label(),
            "max_results": DEFAULT_MAX_RESULTS,
            "include_answer": true,
        });

        let response = match self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!("Search provider returned HTTP {}", response.status());
                return ResearchOutcome::default();
            }
            Err(e) => {
                warn!("Search provider unavailable: {}", e);
                return ResearchOutcome::default();
            }
        };

        let payload: serde_json::Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Unreadable search response: {}", e);
                return ResearchOutcome::default();
            }
        };

        let summary = payload["answer"].as_str().unwrap_or_default().to_string();
        let results = payload["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(ResearchFinding {
                            url: item["url"].as_str()?.to_string(),
                            relevance: item["score"].as_f64().unwrap_or(0.0),
                            snippet: item["content"].as_str().unwrap_or_default().to_string(),
                            date: item["published_date"].as_str().map(|s| s.to_string()),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        ResearchOutcome { summary, results }
    }
}

/// Heuristic: would external research enhance the answer to this query?
/// Used only when the caller has not forced research.
pub fn detect_research_need(query: &str) -> bool {
    const RESEARCH_KEYWORDS: &[&str] = &[
        "market",
        "industry",
        "trend",
        "forecast",
        "compare",
        "benchmark",
        "competitor",
        "average",
        "typical",
        "normal",
        "expected",
        "why",
        "reason",
        "cause",
        "explain",
        "context",
        "external",
    ];

    let query_lower = query.to_lowercase();
    if RESEARCH_KEYWORDS.iter().any(|kw| query_lower.contains(kw)) {
        return true;
    }
    ["vs", "versus", "compared to"]
        .iter()
        .any(|kw| query_lower.contains(kw))
}
