//! Analytics Planner
//!
//! Detects analytical intent in a query, selects a recipe, synthesizes the
//! analysis code, and runs it through the sandbox.

pub mod recipes;
pub mod viz;

use crate::sandbox::CodeSandbox;
use crate::sql_executor::QueryRows;
use recipes::{SimulationVariable, DEFAULT_SIMULATION_ITERATIONS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// The analytics recipe catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recipe {
    Forecast,
    Correlation,
    Anomaly,
    Summary,
    Simulation,
}

impl Recipe {
    pub fn label(&self) -> &'static str {
        match self {
            Recipe::Forecast => "forecast",
            Recipe::Correlation => "correlation",
            Recipe::Anomaly => "anomaly",
            Recipe::Summary => "summary",
            Recipe::Simulation => "simulation",
        }
    }
}

/// Parameters resolved for one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub recipe: Recipe,
    pub target_column: String,
    pub time_column: Option<String>,
    pub horizon_days: usize,
    pub iterations: usize,
    #[serde(default)]
    pub simulation_variables: Vec<SimulationVariable>,
}

/// Recipe-specific payload plus a status flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub recipe: Recipe,
    pub success: bool,
    pub payload: Option<Value>,
    pub error: Option<String>,
    pub visualization: Option<Value>,
}

/// Detect which recipe, if any, a query is asking for. First match in
/// catalog order wins; `None` means analytics is skipped.
pub fn detect_intent(query: &str) -> Option<Recipe> {
    let query_lower = query.to_lowercase();
    let has = |needle: &str| query_lower.contains(needle);

    if ["forecast", "predict", "projection", "future", "next month", "next quarter", "next year"]
        .iter()
        .any(|kw| has(kw))
    {
        return Some(Recipe::Forecast);
    }
    if ["correlation", "correlate", "relationship between", "impact of", "affect"]
        .iter()
        .any(|kw| has(kw))
    {
        return Some(Recipe::Correlation);
    }
    if ["anomaly", "anomalies", "outlier", "unusual", "abnormal"]
        .iter()
        .any(|kw| has(kw))
    {
        return Some(Recipe::Anomaly);
    }
    if ["summary", "statistics", "distribution", "statistical"]
        .iter()
        .any(|kw| has(kw))
    {
        return Some(Recipe::Summary);
    }
    if ["what if", "scenario", "simulate"].iter().any(|kw| has(kw)) {
        return Some(Recipe::Simulation);
    }
    None
}

/// Forecast horizon in days, parsed from the trigger phrase.
pub fn parse_horizon_days(query: &str) -> usize {
    let query_lower = query.to_lowercase();
    if query_lower.contains("next month") {
        30
    } else if query_lower.contains("next quarter") {
        90
    } else if query_lower.contains("next year") {
        365
    } else {
        30
    }
}

/// Pick the target column: a column named in the query wins, then the last
/// numeric-looking column, then a `value` fallback.
pub fn infer_target_column(query: &str, rows: &QueryRows) -> String {
    let query_lower = query.to_lowercase();
    for column in &rows.columns {
        if query_lower.contains(&column.to_lowercase()) {
            return column.clone();
        }
    }

    for (idx, column) in rows.columns.iter().enumerate().rev() {
        let numeric = rows
            .rows
            .iter()
            .any(|row| row.get(idx).map(|v| v.is_number()).unwrap_or(false));
        if numeric {
            return column.clone();
        }
    }

    "value".to_string()
}

/// Pick the time column for forecasting: a date/time-named column, else the
/// first column.
fn infer_time_column(rows: &QueryRows) -> Option<String> {
    rows.columns
        .iter()
        .find(|c| {
            let lower = c.to_lowercase();
            lower.contains("date") || lower.contains("time") || lower.contains("day")
        })
        .or_else(|| rows.columns.first())
        .cloned()
}

/// Intent detection plus recipe execution over the sandbox.
pub struct AnalyticsPlanner {
    sandbox: Arc<CodeSandbox>,
}

impl AnalyticsPlanner {
    pub fn new(sandbox: Arc<CodeSandbox>) -> Self {
        Self { sandbox }
    }

    /// Resolve recipe parameters for a query over the given result set.
    pub fn plan(
        &self,
        recipe: Recipe,
        query: &str,
        rows: &QueryRows,
        simulation_variables: Vec<SimulationVariable>,
        iterations: Option<usize>,
    ) -> AnalysisRequest {
        AnalysisRequest {
            recipe,
            target_column: infer_target_column(query, rows),
            time_column: infer_time_column(rows),
            horizon_days: parse_horizon_days(query),
            iterations: iterations.unwrap_or(DEFAULT_SIMULATION_ITERATIONS),
            simulation_variables,
        }
    }

    /// Synthesize the recipe code for a request.
    pub fn synthesize_code(&self, request: &AnalysisRequest) -> String {
        match request.recipe {
            Recipe::Forecast => recipes::forecast_code(
                request.time_column.as_deref().unwrap_or("date"),
                &request.target_column,
                request.horizon_days,
            ),
            Recipe::Correlation => recipes::correlation_code(&request.target_column),
            Recipe::Anomaly => recipes::anomaly_code(&request.target_column, 3.0),
            Recipe::Summary => recipes::summary_code(),
            Recipe::Simulation => recipes::simulation_code(
                &request.target_column,
                &request.simulation_variables,
                request.iterations,
            ),
        }
    }

    /// Run the analysis in the sandbox and shape the result.
    pub async fn execute(&self, request: &AnalysisRequest, rows: &QueryRows) -> AnalysisResult {
        let frame = match rows.to_dataframe() {
            Ok(frame) => frame,
            Err(e) => {
                return AnalysisResult {
                    recipe: request.recipe,
                    success: false,
                    payload: None,
                    error: Some(format!("could not build analysis input: {}", e)),
                    visualization: None,
                }
            }
        };

        let code = self.synthesize_code(request);
        info!("Running {} analysis in sandbox", request.recipe.label());

        let mut context = HashMap::new();
        context.insert("df".to_string(), frame);
        let outcome = self.sandbox.run(&code, &context).await;

        let visualization = outcome
            .result
            .as_ref()
            .and_then(|payload| viz::chart_for_recipe(request.recipe.label(), payload))
            .or(outcome.visualization.clone());

        AnalysisResult {
            recipe: request.recipe,
            success: outcome.success,
            payload: outcome.result,
            error: outcome.error,
            visualization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_rows() -> QueryRows {
        QueryRows {
            columns: vec!["order_date".to_string(), "total_amount".to_string()],
            rows: vec![
                vec![json!("2025-01-01"), json!(100.0)],
                vec![json!("2025-01-02"), json!(120.0)],
            ],
        }
    }

    #[test]
    fn test_intent_detection_catalog_order() {
        assert_eq!(detect_intent("forecast revenue for next month"), Some(Recipe::Forecast));
        assert_eq!(
            detect_intent("what is the correlation between price and sales"),
            Some(Recipe::Correlation)
        );
        assert_eq!(detect_intent("find unusual orders"), Some(Recipe::Anomaly));
        assert_eq!(detect_intent("statistical summary of sales"), Some(Recipe::Summary));
        assert_eq!(detect_intent("what if we raise prices 10%"), Some(Recipe::Simulation));
        assert_eq!(detect_intent("show me total revenue"), None);
    }

    #[test]
    fn test_first_match_wins_on_ties() {
        // Both forecast and anomaly keywords present; forecast is earlier
        // in the catalog.
        assert_eq!(
            detect_intent("predict future outliers in revenue"),
            Some(Recipe::Forecast)
        );
    }

    #[test]
    fn test_horizon_parsing() {
        assert_eq!(parse_horizon_days("forecast next month"), 30);
        assert_eq!(parse_horizon_days("projection for next quarter"), 90);
        assert_eq!(parse_horizon_days("predict next year"), 365);
        assert_eq!(parse_horizon_days("forecast revenue"), 30);
    }

    #[test]
    fn test_target_column_inference() {
        let rows = sample_rows();
        assert_eq!(infer_target_column("trend of total_amount", &rows), "total_amount");
        // No column named; falls back to the last numeric column.
        assert_eq!(infer_target_column("how are things", &rows), "total_amount");
    }

    #[test]
    fn test_time_column_inference() {
        assert_eq!(infer_time_column(&sample_rows()).as_deref(), Some("order_date"));
    }
}
