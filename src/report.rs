//! Report Generation Contract
//!
//! The engine assembles a report bundle; file rendering (PDF/PPTX
//! templating) is an external concern behind the `ReportRenderer` trait.
//! The plain renderer shipped here writes a structured text summary so the
//! contract is usable end-to-end without a template stack.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Pdf,
    Pptx,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Pptx => "pptx",
        }
    }
}

/// Everything a report is built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBundle {
    pub query: String,
    pub sql_result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_result: Option<Value>,
}

/// File rendering seam; implementations own template choices entirely.
pub trait ReportRenderer: Send + Sync {
    fn render(
        &self,
        bundle: &ReportBundle,
        format: ReportFormat,
        out_dir: &Path,
    ) -> Result<PathBuf>;
}

/// Placeholder renderer: one structured text file per requested format.
pub struct PlainReportRenderer;

impl ReportRenderer for PlainReportRenderer {
    fn render(
        &self,
        bundle: &ReportBundle,
        format: ReportFormat,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(out_dir)?;
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let path = out_dir.join(format!("report_{}.{}", stamp, format.extension()));

        let mut sections = vec![
            format!("Business question: {}", bundle.query),
            format!(
                "SQL result:\n{}",
                serde_json::to_string_pretty(&bundle.sql_result)?
            ),
        ];
        if let Some(analytics) = &bundle.analytics_result {
            sections.push(format!(
                "Statistical analysis:\n{}",
                serde_json::to_string_pretty(analytics)?
            ));
        }
        if let Some(research) = &bundle.research_result {
            sections.push(format!(
                "Market research:\n{}",
                serde_json::to_string_pretty(research)?
            ));
        }

        std::fs::write(&path, sections.join("\n\n"))?;
        Ok(path)
    }
}
