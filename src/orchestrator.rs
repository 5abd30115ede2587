//! Request Orchestrator
//!
//! Drives one query through the full flow: PII gate, focused context
//! assembly, self-healing SQL generation, execution, output redaction, and
//! the optional analytics and research branches. Every failure surfaces as
//! a JSON-serializable error object with a stable code; success and error
//! shapes are mutually exclusive.

use crate::analytics::{detect_intent, AnalyticsPlanner, Recipe};
use crate::agent_runtime::{Agent, Crew, Process, Task};
use crate::error::InsightError;
use crate::glossary::BusinessGlossary;
use crate::guardrails::{GuardrailsSummary, PiiScanner};
use crate::llm::LlmInterface;
use crate::pipeline::{CancelToken, PipelineContext, SelfHealingPipeline, Verdict};
use crate::report::{ReportBundle, ReportFormat, ReportRenderer};
use crate::research::{detect_research_need, ResearchFetcher, SearchMode};
use crate::sandbox::CodeSandbox;
use crate::schema_rag::SchemaIndex;
use crate::sentry::{Alert, AnomalySentry, MetricCheck, MonitoringStatus};
use crate::sql_executor::{QueryOutcome, QueryRows, SqlExecutor};
use crate::analytics::recipes::SimulationVariable;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Request mode tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Standard,
    Analytics,
    Research,
}

/// One pipeline request.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineRequest {
    pub query: String,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub force_research: bool,
    /// Hypothetical variables for the simulation recipe (structured input
    /// only; never parsed out of free text).
    #[serde(default)]
    pub simulation_variables: Vec<SimulationVariable>,
    #[serde(default)]
    pub iterations: Option<usize>,
}

/// Success shape. Mode-specific fields stay `None` outside their mode.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSuccess {
    pub sql: String,
    pub confidence: f64,
    pub attempts: u8,
    pub agents_involved: Vec<String>,
    pub data: Value,
    pub pii_redacted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_findings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_research: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unified_insights: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_performed: Option<bool>,
}

/// Error shape with a stable code. Never carries partial success data.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineError {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl PipelineError {
    fn new(code: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.to_string(),
            risk_level: None,
            detections: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PipelineResponse {
    Success(Box<PipelineSuccess>),
    Error(PipelineError),
}

impl PipelineResponse {
    pub fn success(&self) -> Option<&PipelineSuccess> {
        match self {
            PipelineResponse::Success(s) => Some(s),
            PipelineResponse::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            PipelineResponse::Error(e) => Some(e),
            PipelineResponse::Success(_) => None,
        }
    }
}

/// Recent-alert listing for the sentry control surface.
#[derive(Debug, Clone, Serialize)]
pub struct RecentAlerts {
    pub count: usize,
    pub alerts: Vec<Alert>,
    pub monitoring_status: MonitoringStatus,
}

/// Everything the orchestrator is wired with.
pub struct Orchestrator {
    schema_index: Arc<SchemaIndex>,
    glossary: Arc<BusinessGlossary>,
    scanner: Arc<PiiScanner>,
    pipeline: SelfHealingPipeline,
    executor: Arc<SqlExecutor>,
    planner: AnalyticsPlanner,
    research: ResearchFetcher,
    synthesis_llm: Arc<dyn LlmInterface>,
    renderer: Arc<dyn ReportRenderer>,
    reports_dir: PathBuf,
    sentry: Option<Arc<AnomalySentry>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schema_index: Arc<SchemaIndex>,
        glossary: Arc<BusinessGlossary>,
        scanner: Arc<PiiScanner>,
        pipeline: SelfHealingPipeline,
        executor: Arc<SqlExecutor>,
        sandbox: Arc<CodeSandbox>,
        research: ResearchFetcher,
        synthesis_llm: Arc<dyn LlmInterface>,
        renderer: Arc<dyn ReportRenderer>,
        reports_dir: PathBuf,
    ) -> Self {
        Self {
            schema_index,
            glossary,
            scanner,
            pipeline,
            executor,
            planner: AnalyticsPlanner::new(sandbox),
            research,
            synthesis_llm,
            renderer,
            reports_dir,
            sentry: None,
        }
    }

    pub fn with_sentry(mut self, sentry: Arc<AnomalySentry>) -> Self {
        self.sentry = Some(sentry);
        self
    }

    /// Handle one pipeline request end to end.
    pub async fn handle_query(&self, request: &PipelineRequest) -> PipelineResponse {
        let correlation_id = Uuid::new_v4();
        let cancel = CancelToken::new();
        match self.handle_query_inner(request, &cancel).await {
            Ok(response) => response,
            Err(e) => self.classify_failure(e, correlation_id),
        }
    }

    /// Same as `handle_query` but cancellable by the caller.
    pub async fn handle_query_cancellable(
        &self,
        request: &PipelineRequest,
        cancel: &CancelToken,
    ) -> PipelineResponse {
        let correlation_id = Uuid::new_v4();
        match self.handle_query_inner(request, cancel).await {
            Ok(response) => response,
            Err(e) => self.classify_failure(e, correlation_id),
        }
    }

    async fn handle_query_inner(
        &self,
        request: &PipelineRequest,
        cancel: &CancelToken,
    ) -> crate::error::Result<PipelineResponse> {
        // User-input rejection happens before any expensive step.
        if request.query.trim().is_empty() {
            return Ok(PipelineResponse::Error(PipelineError::new(
                "empty_query",
                "Query text must not be empty",
            )));
        }

        // PII gate on the way in.
        let (scan, proceed) = self.scanner.scan_query(&request.query, false);
        if !proceed {
            let mut err = PipelineError::new("pii_blocked", "Query blocked: Sensitive PII detected");
            err.risk_level = Some(scan.risk_level.label().to_string());
            err.detections = Some(
                scan.detections
                    .iter()
                    .map(|d| d.kind.label().to_string())
                    .collect(),
            );
            return Ok(PipelineResponse::Error(err));
        }
        if scan.contains_pii {
            info!(
                "PII detected in query (non-blocking): {}",
                scan.risk_level.label()
            );
        }

        // Focused context: schema retrieval plus glossary enrichment.
        let schema_context = self.schema_index.build_context(&request.query, 3).await?;
        let retrieved = self.schema_index.retrieve(&request.query, 3).await?;
        let allowed_tables: Vec<String> =
            retrieved.iter().map(|e| e.table_name.clone()).collect();
        let glossary_context = self.glossary.enrich_context(&request.query, "");

        let context = PipelineContext {
            schema_context,
            glossary_context,
            allowed_tables,
        };

        let artifact = self.pipeline.generate(&request.query, &context, cancel).await?;

        match artifact.verdict {
            Verdict::Unsafe => {
                let reason = artifact
                    .diagnostics
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "unsafe SQL".to_string());
                return Ok(PipelineResponse::Error(PipelineError {
                    error: format!("Unsafe SQL rejected: {}", reason),
                    code: "unsafe_sql".to_string(),
                    risk_level: None,
                    detections: None,
                    details: Some(json!({"attempts": artifact.attempts})),
                }));
            }
            Verdict::Failed => {
                return Ok(PipelineResponse::Error(PipelineError {
                    error: "Failed to produce valid SQL".to_string(),
                    code: "sql_generation_failed".to_string(),
                    risk_level: None,
                    detections: None,
                    details: Some(json!({
                        "attempts": artifact.attempts,
                        "best_effort_sql": artifact.sql,
                        "diagnostics": artifact.diagnostics,
                    })),
                }));
            }
            Verdict::Valid => {}
        }

        let sql = artifact
            .sql
            .clone()
            .ok_or_else(|| InsightError::Internal("valid artifact without SQL".to_string()))?;

        if let Some(advisory) = self.scanner.validate_sql(&sql) {
            info!("SQL advisory: {}", advisory);
        }

        // Execute and redact on the way out. Timeouts are transient and
        // retried with backoff before surfacing.
        let outcome = self.run_sql_with_retry(&sql).await;
        let rows = match outcome {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Error { error, kind } => {
                return Ok(PipelineResponse::Error(PipelineError {
                    error,
                    code: "execution_error".to_string(),
                    risk_level: None,
                    detections: None,
                    details: Some(json!({"kind": kind})),
                }));
            }
        };

        let raw_data = rows_to_json(&rows);
        let data = self.scanner.redact(&raw_data);
        let pii_redacted = data != raw_data;

        let mut success = PipelineSuccess {
            sql,
            confidence: artifact.confidence,
            attempts: artifact.attempts,
            agents_involved: artifact.agents_involved.clone(),
            data,
            pii_redacted,
            analytics_type: None,
            analysis_result: None,
            visualization: None,
            internal_findings: None,
            external_research: None,
            unified_insights: None,
            research_performed: None,
        };

        match request.mode {
            QueryMode::Standard => {}
            QueryMode::Analytics => {
                self.run_analytics_branch(request, &rows, &mut success).await;
            }
            QueryMode::Research => {
                self.run_research_branch(request, &rows, &mut success).await?;
            }
        }

        Ok(PipelineResponse::Success(Box::new(success)))
    }

    async fn run_sql_with_retry(&self, sql: &str) -> QueryOutcome {
        let mut outcome = self.executor.run(sql, 1000, 30).await;
        for attempt in 1..3u32 {
            match &outcome {
                QueryOutcome::Error { kind, .. }
                    if *kind == crate::sql_executor::SqlErrorKind::Timeout =>
                {
                    let backoff = std::time::Duration::from_millis(250 * 2u64.pow(attempt));
                    warn!("SQL timeout, retrying in {:?} (attempt {}/3)", backoff, attempt + 1);
                    tokio::time::sleep(backoff).await;
                    outcome = self.executor.run(sql, 1000, 30).await;
                }
                _ => break,
            }
        }
        outcome
    }

    async fn run_analytics_branch(
        &self,
        request: &PipelineRequest,
        rows: &QueryRows,
        success: &mut PipelineSuccess,
    ) {
        let recipe = match detect_intent(&request.query) {
            Some(recipe) => recipe,
            None => {
                info!("No analytics intent detected; skipping analytics");
                return;
            }
        };

        if recipe == Recipe::Simulation && request.simulation_variables.is_empty() {
            success.analytics_type = Some(recipe.label().to_string());
            success.analysis_result = Some(json!({
                "error": "simulation requires structured hypothetical variables"
            }));
            return;
        }

        let plan = self.planner.plan(
            recipe,
            &request.query,
            rows,
            request.simulation_variables.clone(),
            request.iterations,
        );
        let analysis = self.planner.execute(&plan, rows).await;

        success.analytics_type = Some(recipe.label().to_string());
        success.visualization = analysis.visualization.clone();
        success.analysis_result = Some(if analysis.success {
            analysis.payload.unwrap_or(Value::Null)
        } else {
            json!({"error": analysis.error})
        });
    }

    async fn run_research_branch(
        &self,
        request: &PipelineRequest,
        rows: &QueryRows,
        success: &mut PipelineSuccess,
    ) -> crate::error::Result<()> {
        let internal_findings = summarize_rows(&request.query, rows);
        success.internal_findings = Some(internal_findings.clone());

        // force_research bypasses detection entirely.
        let needs_research = request.force_research || detect_research_need(&request.query);
        if !needs_research || !self.research.is_enabled() {
            success.research_performed = Some(false);
            return Ok(());
        }

        let outcome = self
            .research
            .search(&research_focus(&request.query), SearchMode::General)
            .await;

        let unified = self
            .synthesize_insights(&request.query, &internal_findings, &outcome.summary)
            .await?;

        success.external_research = Some(serde_json::to_value(&outcome)?);
        success.unified_insights = Some(unified);
        success.research_performed = Some(true);
        Ok(())
    }

    async fn synthesize_insights(
        &self,
        query: &str,
        internal_findings: &str,
        external_research: &str,
    ) -> crate::error::Result<String> {
        let manager = Agent::new(
            "Data Operations Manager",
            "Combine internal metrics with external market context into one answer",
            "You are a senior data operations manager. You connect internal performance to \
             market trends and give actionable recommendations.",
            self.synthesis_llm.clone(),
        );

        let synthesis_task = Task::new(
            "synthesize",
            format!(
                "Synthesize a comprehensive answer to this business question: \"{}\"\n\n\
                 === INTERNAL DATABASE ANALYSIS ===\n{}\n\n\
                 === EXTERNAL MARKET RESEARCH ===\n{}\n\n\
                 Cover: internal performance, market context, comparative analysis, \
                 and recommendations.",
                query, internal_findings, external_research
            ),
            "A business intelligence summary combining internal and external data.",
            manager,
        );

        Crew::new(vec![synthesis_task], Process::Sequential)
            .kickoff()
            .await
    }

    fn classify_failure(&self, e: InsightError, correlation_id: Uuid) -> PipelineResponse {
        let (code, message) = match &e {
            InsightError::UserInput(msg) => ("invalid_request", msg.clone()),
            InsightError::Cancelled(msg) => ("cancelled", msg.clone()),
            InsightError::Llm(msg) if msg.contains("transient provider failure") => {
                ("rate_limited", "LLM provider is rate limiting; retry later".to_string())
            }
            InsightError::Llm(_) => (
                "sql_generation_failed",
                "SQL generation failed".to_string(),
            ),
            _ => ("internal", "Internal error; see server logs".to_string()),
        };

        error!("Request {} failed [{}]: {}", correlation_id, code, e);
        PipelineResponse::Error(PipelineError {
            error: message,
            code: code.to_string(),
            risk_level: None,
            detections: None,
            details: Some(json!({"correlation_id": correlation_id.to_string()})),
        })
    }

    /// Guardrails activity counters.
    pub fn guardrails_summary(&self) -> GuardrailsSummary {
        self.scanner.summary()
    }

    /// Generate report files for a completed query.
    pub fn generate_report(
        &self,
        bundle: &ReportBundle,
        formats: &[ReportFormat],
    ) -> HashMap<String, PathBuf> {
        let mut paths = HashMap::new();
        for format in formats {
            match self.renderer.render(bundle, *format, &self.reports_dir) {
                Ok(path) => {
                    paths.insert(format.extension().to_string(), path);
                }
                Err(e) => warn!("Report rendering failed for {:?}: {}", format, e),
            }
        }
        paths
    }

    /// Sentry control: recent alerts plus monitoring status.
    pub async fn list_recent_alerts(&self, limit: usize) -> Option<RecentAlerts> {
        let sentry = self.sentry.as_ref()?;
        let alerts = sentry.recent_alerts(limit).await;
        Some(RecentAlerts {
            count: alerts.len(),
            alerts,
            monitoring_status: sentry.monitoring_status(),
        })
    }

    /// Sentry control: on-demand check of one metric.
    pub async fn check_metric(&self, name: &str) -> crate::error::Result<MetricCheck> {
        let sentry = self
            .sentry
            .as_ref()
            .ok_or_else(|| InsightError::Sentry("sentry is not running".to_string()))?;
        sentry.check_metric(name).await
    }

    pub fn executor(&self) -> Arc<SqlExecutor> {
        self.executor.clone()
    }
}

/// Rows as an array of column→value objects.
fn rows_to_json(rows: &QueryRows) -> Value {
    let records: Vec<Value> = rows
        .rows
        .iter()
        .map(|row| {
            let map: serde_json::Map<String, Value> = rows
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect();
            Value::Object(map)
        })
        .collect();
    Value::Array(records)
}

/// Compact summary of the internal result set for the research branch.
fn summarize_rows(query: &str, rows: &QueryRows) -> String {
    let mut lines = vec![format!("Query: {}", query), "Internal Database Results:".to_string()];
    lines.push(rows.columns.join(" | "));
    for row in rows.rows.iter().take(10) {
        let rendered: Vec<String> = row
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        lines.push(rendered.join(" | "));
    }
    if rows.rows.len() > 10 {
        lines.push(format!("... {} more rows", rows.rows.len() - 10));
    }
    lines.join("\n")
}

/// Which external angle to research for a query.
fn research_focus(query: &str) -> String {
    let query_lower = query.to_lowercase();
    if ["revenue", "sales", "profit"].iter().any(|kw| query_lower.contains(kw)) {
        "Industry revenue benchmarks and market growth rates".to_string()
    } else if ["customer", "user", "churn"].iter().any(|kw| query_lower.contains(kw)) {
        "Customer retention benchmarks and industry averages".to_string()
    } else if ["product", "inventory", "stock"].iter().any(|kw| query_lower.contains(kw)) {
        "Product market trends and demand forecasts".to_string()
    } else {
        format!("Market context and industry trends related to: {}", query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_to_json_shape() {
        let rows = QueryRows {
            columns: vec!["name".to_string(), "amount".to_string()],
            rows: vec![vec![json!("a"), json!(10)]],
        };
        let value = rows_to_json(&rows);
        assert_eq!(value, json!([{"name": "a", "amount": 10}]));
    }

    #[test]
    fn test_research_focus_buckets() {
        assert!(research_focus("our revenue this year").contains("revenue benchmarks"));
        assert!(research_focus("customer churn").contains("retention"));
        assert!(research_focus("warehouse throughput").contains("Market context"));
    }

    #[test]
    fn test_summarize_rows_caps_preview() {
        let rows = QueryRows {
            columns: vec!["n".to_string()],
            rows: (0..15).map(|i| vec![json!(i)]).collect(),
        };
        let summary = summarize_rows("counts", &rows);
        assert!(summary.contains("... 5 more rows"));
    }
}
