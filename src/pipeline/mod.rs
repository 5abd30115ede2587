//! Self-Healing SQL Pipeline
//!
//! Turns a natural-language question plus focused schema context into a
//! validated SQL artifact through a bounded generate→critique→correct loop
//! driven by three cooperating agents.

pub mod critic;
pub mod validator;

use crate::agent_runtime::{Agent, Tool};
use crate::error::{InsightError, Result};
use crate::llm::LlmInterface;
use crate::pipeline::critic::{parse_critic_verdict, CriticStatus};
use crate::pipeline::validator::SafetyValidator;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u8 = 3;

/// Validation verdict of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Valid,
    Unsafe,
    Failed,
}

/// Immutable record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlArtifact {
    pub sql: Option<String>,
    pub attempts: u8,
    pub confidence: f64,
    pub agents_involved: Vec<String>,
    pub verdict: Verdict,
    pub diagnostics: Vec<String>,
}

impl SqlArtifact {
    fn unsafe_artifact(attempts: u8, agents: Vec<String>, reason: String) -> Self {
        Self {
            sql: None,
            attempts,
            confidence: 0.0,
            agents_involved: agents,
            verdict: Verdict::Unsafe,
            diagnostics: vec![reason],
        }
    }
}

/// Cooperative cancellation flag shared with the caller.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Inputs assembled by the orchestrator for one run.
pub struct PipelineContext {
    pub schema_context: String,
    pub glossary_context: String,
    /// Tables present in the focused context; the validator rejects SQL
    /// touching anything else.
    pub allowed_tables: Vec<String>,
}

/// The generate→critique→correct loop.
pub struct SelfHealingPipeline {
    fast_llm: Arc<dyn LlmInterface>,
    reasoning_llm: Arc<dyn LlmInterface>,
    analyst_tools: Vec<Arc<dyn Tool>>,
    max_attempts: u8,
}

impl SelfHealingPipeline {
    pub fn new(fast_llm: Arc<dyn LlmInterface>, reasoning_llm: Arc<dyn LlmInterface>) -> Self {
        Self {
            fast_llm,
            reasoning_llm,
            analyst_tools: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Reference tools surfaced to the query analyst.
    pub fn with_analyst_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.analyst_tools = tools;
        self
    }

    fn query_analyst(&self) -> Agent {
        Agent::new(
            "Business Query Analyst",
            "Analyze user queries and map them to business terms and database requirements",
            "You are an expert in translating business questions into technical requirements. \
             You understand business terminology and know how to map it to database schemas.",
            self.fast_llm.clone(),
        )
        .with_tools(self.analyst_tools.clone())
        .with_temperature(0.2)
    }

    fn architect(&self) -> Agent {
        Agent::new(
            "SQL Database Architect",
            "Generate optimized, correct SQL queries based on requirements and schemas",
            "You are a database architect with deep expertise in SQL optimization. \
             You write clean, efficient queries that follow best practices and handle edge cases.",
            self.fast_llm.clone(),
        )
        .with_temperature(0.2)
    }

    fn critic(&self) -> Agent {
        Agent::new(
            "SQL Critic & Dry-Runner",
            "Stress-test SQL with EXPLAIN-style reasoning, surface errors, and propose fixes",
            "You are a meticulous database reliability engineer. You mentally run EXPLAIN on SQL, \
             find syntax or logical issues, and propose concrete fixes with minimal tokens.",
            self.reasoning_llm.clone(),
        )
        .with_temperature(0.0)
    }

    /// Run the healing loop. Control flow is fully determined by the critic
    /// verdict schema; confidence decays 0.05 per retry before success and
    /// floors at 0.5 when retries are exhausted.
    pub async fn generate(
        &self,
        query_text: &str,
        context: &PipelineContext,
        cancel: &CancelToken,
    ) -> Result<SqlArtifact> {
        let mut agents = Vec::new();

        if self.max_attempts == 0 {
            return Ok(SqlArtifact {
                sql: None,
                attempts: 0,
                confidence: 0.5,
                agents_involved: agents,
                verdict: Verdict::Failed,
                diagnostics: vec!["no attempts configured".to_string()],
            });
        }

        let analyst = self.query_analyst();
        let analysis = analyst
            .perform(
                &format!(
                    "Analyze the user query, identify business terms, metrics, dimensions, \
                     time filters, and relationships.\nQuery: {}\n\nBusiness Glossary Context:\n{}",
                    query_text, context.glossary_context
                ),
                "Clear list of terms, metrics, dimensions, filters, and joins needed.",
            )
            .await?;
        agents.push("query_analyst".to_string());

        let architect = self.architect();
        let critic = self.critic();

        let mut feedback = String::new();
        let mut last_sql: Option<String> = None;
        let mut attempt: u8 = 0;

        while attempt < self.max_attempts {
            if cancel.is_cancelled() {
                return Err(InsightError::Cancelled("pipeline run cancelled".to_string()));
            }
            attempt += 1;
            info!("SQL generation attempt {}/{}", attempt, self.max_attempts);

            let sql_description = format!(
                "Generate optimized SQL for the request. Use only necessary tables and columns.\n\
                 Constraints:\n\
                 - Use only the schema context below; avoid unnecessary tables.\n\
                 - Add WHERE filters and GROUP BY when needed.\n\
                 - Avoid DML (no INSERT/UPDATE/DELETE/DROP).\n\
                 - Return only the SQL (no prose).\n\n\
                 User Query: {}\n\
                 Business Analysis: {}\n\
                 Schema Context (focused):\n{}\n\
                 Business Glossary: {}\n\
                 Correction Feedback: {}",
                query_text,
                analysis,
                context.schema_context,
                context.glossary_context,
                if feedback.is_empty() { "None" } else { feedback.as_str() }
            );

            let raw_sql = architect
                .perform(&sql_description, "Return only SQL, no explanations.")
                .await?;
            let sql = strip_sql_fences(&raw_sql);
            if !agents.contains(&"sql_architect".to_string()) {
                agents.push("sql_architect".to_string());
            }

            let critic_description = format!(
                "Perform a dry-run/EXPLAIN style critique of the SQL. Return JSON with keys: \
                 status ('ok'|'error'|'unsafe'), error_message, correction_plan, \
                 corrected_sql (optional), is_dml (bool), confidence (0.0-1.0).\n\
                 Mark status 'unsafe' and is_dml true for any data-modifying statement.\n\
                 If you find issues, be specific and minimal.\n\n\
                 SQL to critique:\n{}\n\n\
                 Schema Context:\n{}\n\n\
                 Business Glossary:\n{}",
                sql, context.schema_context, context.glossary_context
            );

            let critic_raw = critic
                .perform(
                    &critic_description,
                    "JSON with status, error_message, correction_plan, corrected_sql, is_dml, confidence.",
                )
                .await?;
            let verdict = parse_critic_verdict(&critic_raw);
            if !agents.contains(&"critic".to_string()) {
                agents.push("critic".to_string());
            }

            if verdict.is_dml || verdict.status == CriticStatus::Unsafe {
                warn!("Unsafe SQL blocked at attempt {}: {}", attempt, verdict.error_message);
                let reason = if verdict.error_message.is_empty() {
                    "data-modifying SQL is not allowed".to_string()
                } else {
                    verdict.error_message
                };
                return Ok(SqlArtifact::unsafe_artifact(attempt, agents, reason));
            }

            if verdict.status == CriticStatus::Ok {
                let candidate = verdict.corrected_sql.unwrap_or_else(|| sql.clone());
                let outcome = SafetyValidator::check(&candidate, &context.allowed_tables);
                if !agents.contains(&"validator".to_string()) {
                    agents.push("validator".to_string());
                }

                if outcome.approved {
                    let confidence = (0.95 - 0.05 * f64::from(attempt - 1)).max(0.0);
                    info!("SQL validated on attempt {} (confidence {:.2})", attempt, confidence);
                    return Ok(SqlArtifact {
                        sql: Some(candidate),
                        attempts: attempt,
                        confidence,
                        agents_involved: agents,
                        verdict: Verdict::Valid,
                        diagnostics: Vec::new(),
                    });
                }

                feedback = outcome
                    .reason
                    .unwrap_or_else(|| "validator rejected the SQL".to_string());
                warn!("Validator rejected attempt {}: {}", attempt, feedback);
            } else {
                feedback = if verdict.correction_plan.is_empty() {
                    verdict.error_message.clone()
                } else {
                    format!(
                        "Error: {}. Plan: {}",
                        verdict.error_message, verdict.correction_plan
                    )
                };
            }

            last_sql = Some(sql);
        }

        let confidence = (0.95 - 0.1 * f64::from(self.max_attempts)).max(0.5);
        warn!("SQL generation exhausted {} attempts", self.max_attempts);
        Ok(SqlArtifact {
            sql: last_sql,
            attempts: self.max_attempts,
            confidence,
            agents_involved: agents,
            verdict: Verdict::Failed,
            diagnostics: vec![format!("exhausted retries: {}", feedback)],
        })
    }
}

/// Strip markdown fences and surrounding prose markers from generated SQL.
fn strip_sql_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("sql").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_sql_fences() {
        assert_eq!(
            strip_sql_fences("```sql\nSELECT 1\n```"),
            "SELECT 1"
        );
        assert_eq!(strip_sql_fences("  SELECT 2  "), "SELECT 2");
    }

    #[test]
    fn test_unsafe_artifact_shape() {
        let artifact =
            SqlArtifact::unsafe_artifact(1, vec!["critic".to_string()], "DML".to_string());
        assert_eq!(artifact.verdict, Verdict::Unsafe);
        assert!(artifact.sql.is_none());
        assert_eq!(artifact.confidence, 0.0);
    }
}
