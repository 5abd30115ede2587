//! Business Glossary
//!
//! Semantic layer mapping domain vocabulary to SQL-ready constructs. SQL
//! fragments carried here are hints for the generating agent, never strings
//! concatenated into the final query.

use crate::error::{InsightError, Result};
use crate::schema_rag::SchemaIndex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// A domain term with its SQL-ready definition.
#[derive(Debug, Clone, Deserialize)]
pub struct GlossaryTerm {
    pub name: String,
    pub definition: String,
    #[serde(default)]
    pub sql_fragment: String,
    #[serde(default)]
    pub related_tables: Vec<String>,
    #[serde(default)]
    pub related_columns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GlossaryDoc {
    #[serde(default)]
    business_terms: BTreeMap<String, GlossaryTermSpec>,
    #[serde(default)]
    column_aliases: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct GlossaryTermSpec {
    definition: String,
    #[serde(default)]
    sql_fragment: String,
    #[serde(default)]
    related_tables: Vec<String>,
    #[serde(default)]
    related_columns: Vec<String>,
}

/// Immutable-after-load glossary of terms and column aliases.
pub struct BusinessGlossary {
    terms: BTreeMap<String, GlossaryTerm>,
    column_aliases: BTreeMap<String, Vec<String>>,
}

impl BusinessGlossary {
    pub fn empty() -> Self {
        Self {
            terms: BTreeMap::new(),
            column_aliases: BTreeMap::new(),
        }
    }

    /// Load from a YAML document. Column references that resolve to no
    /// indexed column are logged but do not fail the load, since the
    /// glossary may be loaded before schema indexing.
    pub fn load(path: &Path, schema_index: &SchemaIndex) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw, schema_index)
    }

    pub fn from_yaml(raw: &str, schema_index: &SchemaIndex) -> Result<Self> {
        let doc: GlossaryDoc = serde_yaml::from_str(raw)
            .map_err(|e| InsightError::Glossary(format!("invalid glossary document: {}", e)))?;

        let known_columns: HashSet<String> = schema_index.known_columns().into_iter().collect();

        let mut terms = BTreeMap::new();
        for (name, spec) in doc.business_terms {
            for column in &spec.related_columns {
                if !known_columns.is_empty() && !known_columns.contains(column) {
                    warn!(
                        "Glossary term '{}' references unknown column '{}'",
                        name, column
                    );
                }
            }
            let key = name.to_lowercase();
            terms.insert(
                key.clone(),
                GlossaryTerm {
                    name: key,
                    definition: spec.definition,
                    sql_fragment: spec.sql_fragment,
                    related_tables: spec.related_tables,
                    related_columns: spec.related_columns,
                },
            );
        }

        info!("Loaded business glossary with {} terms", terms.len());
        Ok(Self {
            terms,
            column_aliases: doc.column_aliases,
        })
    }

    /// Look up a term by canonical name (case-insensitive; spaces and
    /// underscores are interchangeable).
    pub fn lookup(&self, term: &str) -> Option<&GlossaryTerm> {
        let key = term.to_lowercase().replace(' ', "_");
        self.terms.get(&key)
    }

    /// Synonyms registered for a canonical column name.
    pub fn expand_aliases(&self, column_name: &str) -> Vec<String> {
        self.column_aliases
            .get(&column_name.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Append definitions of every term mentioned in the query to the base
    /// context. Matching is whole-word on the canonical name (in both
    /// `snake_case` and spaced form) and on column-alias synonyms.
    pub fn enrich_context(&self, query_text: &str, base_context: &str) -> String {
        let matched = self.matching_terms(query_text);
        if matched.is_empty() {
            return base_context.to_string();
        }

        let mut lines = vec!["Business Term Definitions:".to_string()];
        for term in matched {
            let mut line = format!("- {}: {}", term.name, term.definition);
            if !term.sql_fragment.is_empty() {
                line.push_str(&format!("; SQL fragment: {}", term.sql_fragment));
            }
            lines.push(line);
        }

        if base_context.is_empty() {
            lines.join("\n")
        } else {
            format!("{}\n\n{}", base_context, lines.join("\n"))
        }
    }

    fn matching_terms(&self, query_text: &str) -> Vec<&GlossaryTerm> {
        let query_lower = query_text.to_lowercase();
        let query_words: HashSet<&str> = query_lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .collect();

        let phrase_present = |phrase: &str| -> bool {
            if phrase.contains(' ') {
                // Multi-word phrases match on word boundaries within the query.
                query_lower
                    .split(|c: char| !c.is_alphanumeric())
                    .collect::<Vec<_>>()
                    .join(" ")
                    .contains(phrase)
            } else {
                query_words.contains(phrase)
            }
        };

        self.terms
            .values()
            .filter(|term| {
                let spaced = term.name.replace('_', " ");
                if phrase_present(&term.name) || phrase_present(&spaced) {
                    return true;
                }
                term.related_columns.iter().any(|col| {
                    self.expand_aliases(col)
                        .iter()
                        .any(|alias| phrase_present(&alias.to_lowercase()))
                })
            })
            .collect()
    }
}

/// Agent tool resolving business terminology to SQL-ready definitions.
pub struct BusinessTermTool {
    glossary: std::sync::Arc<BusinessGlossary>,
}

impl BusinessTermTool {
    pub fn new(glossary: std::sync::Arc<BusinessGlossary>) -> Self {
        Self { glossary }
    }
}

impl crate::agent_runtime::Tool for BusinessTermTool {
    fn name(&self) -> &str {
        "business_term_resolver"
    }

    fn description(&self) -> &str {
        "Resolves business terminology to specific SQL logic and definitions"
    }

    fn invoke(&self, args: &serde_json::Value) -> crate::error::Result<String> {
        let term = args.get("term").and_then(|v| v.as_str()).unwrap_or("");
        match self.glossary.lookup(term) {
            Some(found) => Ok(format!(
                "Term: {}\nDefinition: {}\nSQL Logic: {}",
                found.name, found.definition, found.sql_fragment
            )),
            None => Ok(format!("No definition found for term: {}", term)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runtime::Tool;
    use crate::schema_rag::embedder::HashEmbedder;
    use std::sync::Arc;

    const GLOSSARY_YAML: &str = r#"
business_terms:
  active_customer:
    definition: "A customer with at least one order in the last 90 days"
    sql_fragment: "last_order_date >= DATE('now', '-90 days')"
    related_tables: [customers, orders]
    related_columns: [last_order_date]
  revenue:
    definition: "Gross sales value before refunds"
    sql_fragment: "SUM(total_amount)"
    related_columns: [total_amount]
column_aliases:
  total_amount: [sales, turnover]
"#;

    fn empty_index() -> SchemaIndex {
        SchemaIndex::in_memory(Arc::new(HashEmbedder::default()))
    }

    #[test]
    fn test_lookup_normalizes_spacing_and_case() {
        let glossary = BusinessGlossary::from_yaml(GLOSSARY_YAML, &empty_index()).unwrap();
        assert!(glossary.lookup("Active Customer").is_some());
        assert!(glossary.lookup("active_customer").is_some());
        assert!(glossary.lookup("churned customer").is_none());
    }

    #[test]
    fn test_enrich_context_appends_matched_terms() {
        let glossary = BusinessGlossary::from_yaml(GLOSSARY_YAML, &empty_index()).unwrap();
        let enriched = glossary.enrich_context("Show revenue for active customers", "BASE");
        assert!(enriched.starts_with("BASE"));
        assert!(enriched.contains("revenue: Gross sales value"));
        assert!(enriched.contains("SQL fragment: SUM(total_amount)"));
    }

    #[test]
    fn test_enrich_context_requires_whole_word() {
        let glossary = BusinessGlossary::from_yaml(GLOSSARY_YAML, &empty_index()).unwrap();
        // "revenues" should not match the term "revenue" as a whole word.
        let enriched = glossary.enrich_context("Show revenuesummary now", "BASE");
        assert_eq!(enriched, "BASE");
    }

    #[test]
    fn test_alias_expansion() {
        let glossary = BusinessGlossary::from_yaml(GLOSSARY_YAML, &empty_index()).unwrap();
        let aliases = glossary.expand_aliases("total_amount");
        assert!(aliases.contains(&"sales".to_string()));
        assert!(glossary.expand_aliases("unknown_column").is_empty());
    }

    #[test]
    fn test_business_term_tool_resolves() {
        let glossary =
            Arc::new(BusinessGlossary::from_yaml(GLOSSARY_YAML, &empty_index()).unwrap());
        let tool = BusinessTermTool::new(glossary);
        let resolved = tool
            .invoke(&serde_json::json!({"term": "revenue"}))
            .unwrap();
        assert!(resolved.contains("SQL Logic: SUM(total_amount)"));

        let missing = tool.invoke(&serde_json::json!({"term": "nope"})).unwrap();
        assert!(missing.contains("No definition found"));
    }

    #[test]
    fn test_alias_match_pulls_in_term() {
        let glossary = BusinessGlossary::from_yaml(GLOSSARY_YAML, &empty_index()).unwrap();
        let enriched = glossary.enrich_context("What was our turnover last month?", "");
        assert!(enriched.contains("revenue:"));
    }
}
