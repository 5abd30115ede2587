//! SQL Safety Validator
//!
//! Final deterministic gate before SQL can be marked valid: the statement
//! must parse, must be a read-only query, and may only touch tables that
//! appear in the focused schema context.

use sqlparser::ast::{Expr, Query, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;

/// Outcome of the safety check.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub approved: bool,
    pub reason: Option<String>,
}

impl ValidationOutcome {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
        }
    }

    fn approved() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }
}

pub struct SafetyValidator;

impl SafetyValidator {
    /// Validate SQL against the set of tables present in the focused
    /// context. `allowed_tables` is compared case-insensitively.
    pub fn check(sql: &str, allowed_tables: &[String]) -> ValidationOutcome {
        let dialect = GenericDialect {};
        let statements = match Parser::parse_sql(&dialect, sql) {
            Ok(statements) => statements,
            Err(e) => return ValidationOutcome::rejected(format!("SQL does not parse: {}", e)),
        };

        if statements.is_empty() {
            return ValidationOutcome::rejected("empty SQL statement");
        }

        // Read-only gate: every statement must be a plain query. DML/DDL
        // keywords inside string literals are literals in the AST and do
        // not trip this.
        for statement in &statements {
            if !matches!(statement, Statement::Query(_)) {
                return ValidationOutcome::rejected(format!(
                    "non read-only statement detected: {}",
                    statement_kind(statement)
                ));
            }
        }

        let allowed: HashSet<String> = allowed_tables.iter().map(|t| t.to_lowercase()).collect();

        let mut referenced = HashSet::new();
        let mut cte_names = HashSet::new();
        for statement in &statements {
            if let Statement::Query(query) = statement {
                collect_query_tables(query, &mut referenced, &mut cte_names);
            }
        }

        for table in &referenced {
            if cte_names.contains(table) {
                continue;
            }
            if !allowed.contains(table) {
                return ValidationOutcome::rejected(format!(
                    "table '{}' is not part of the focused schema context",
                    table
                ));
            }
        }

        ValidationOutcome::approved()
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Drop { .. } => "DROP",
        Statement::AlterTable { .. } => "ALTER",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::CreateTable { .. } | Statement::CreateView { .. } => "CREATE",
        Statement::Grant { .. } => "GRANT",
        Statement::Revoke { .. } => "REVOKE",
        Statement::Call(_) => "CALL",
        _ => "non-query",
    }
}

fn collect_query_tables(
    query: &Query,
    referenced: &mut HashSet<String>,
    cte_names: &mut HashSet<String>,
) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            cte_names.insert(cte.alias.name.value.to_lowercase());
            collect_query_tables(&cte.query, referenced, cte_names);
        }
    }
    collect_set_expr_tables(&query.body, referenced, cte_names);
}

fn collect_set_expr_tables(
    body: &SetExpr,
    referenced: &mut HashSet<String>,
    cte_names: &mut HashSet<String>,
) {
    match body {
        SetExpr::Select(select) => {
            for table_with_joins in &select.from {
                collect_table_refs(table_with_joins, referenced, cte_names);
            }
            if let Some(selection) = &select.selection {
                collect_expr_tables(selection, referenced, cte_names);
            }
        }
        SetExpr::Query(query) => collect_query_tables(query, referenced, cte_names),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr_tables(left, referenced, cte_names);
            collect_set_expr_tables(right, referenced, cte_names);
        }
        _ => {}
    }
}

fn collect_table_refs(
    table_with_joins: &TableWithJoins,
    referenced: &mut HashSet<String>,
    cte_names: &mut HashSet<String>,
) {
    collect_table_factor(&table_with_joins.relation, referenced, cte_names);
    for join in &table_with_joins.joins {
        collect_table_factor(&join.relation, referenced, cte_names);
    }
}

fn collect_table_factor(
    factor: &TableFactor,
    referenced: &mut HashSet<String>,
    cte_names: &mut HashSet<String>,
) {
    match factor {
        TableFactor::Table { name, .. } => {
            // Schema-qualified names resolve to their final segment.
            if let Some(last) = name.0.last() {
                referenced.insert(last.value.to_lowercase());
            }
        }
        TableFactor::Derived { subquery, .. } => {
            collect_query_tables(subquery, referenced, cte_names);
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_table_refs(table_with_joins, referenced, cte_names);
        }
        _ => {}
    }
}

fn collect_expr_tables(
    expr: &Expr,
    referenced: &mut HashSet<String>,
    cte_names: &mut HashSet<String>,
) {
    match expr {
        Expr::Subquery(query) => collect_query_tables(query, referenced, cte_names),
        Expr::InSubquery { expr, subquery, .. } => {
            collect_expr_tables(expr, referenced, cte_names);
            collect_query_tables(subquery, referenced, cte_names);
        }
        Expr::Exists { subquery, .. } => collect_query_tables(subquery, referenced, cte_names),
        Expr::BinaryOp { left, right, .. } => {
            collect_expr_tables(left, referenced, cte_names);
            collect_expr_tables(right, referenced, cte_names);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => {
            collect_expr_tables(expr, referenced, cte_names);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["orders".to_string(), "customers".to_string()]
    }

    #[test]
    fn test_plain_select_is_approved() {
        let outcome = SafetyValidator::check(
            "SELECT SUM(total_amount) FROM orders WHERE order_date >= '2025-01-01'",
            &allowed(),
        );
        assert!(outcome.approved, "{:?}", outcome.reason);
    }

    #[test]
    fn test_with_query_is_approved() {
        let sql = "WITH recent AS (SELECT * FROM orders) SELECT COUNT(*) FROM recent";
        let outcome = SafetyValidator::check(sql, &allowed());
        assert!(outcome.approved, "{:?}", outcome.reason);
    }

    #[test]
    fn test_update_is_rejected() {
        let outcome = SafetyValidator::check("UPDATE orders SET total_amount = 0", &allowed());
        assert!(!outcome.approved);
        assert!(outcome.reason.unwrap().contains("UPDATE"));
    }

    #[test]
    fn test_drop_is_rejected() {
        let outcome = SafetyValidator::check("DROP TABLE orders", &allowed());
        assert!(!outcome.approved);
    }

    #[test]
    fn test_dml_keyword_inside_string_literal_is_fine() {
        let outcome = SafetyValidator::check(
            "SELECT * FROM orders WHERE note = 'please DELETE me'",
            &allowed(),
        );
        assert!(outcome.approved, "{:?}", outcome.reason);
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        let outcome = SafetyValidator::check("SELECT * FROM payroll", &allowed());
        assert!(!outcome.approved);
        assert!(outcome.reason.unwrap().contains("payroll"));
    }

    #[test]
    fn test_unknown_table_in_subquery_is_rejected() {
        let sql = "SELECT * FROM orders WHERE customer_id IN (SELECT id FROM payroll)";
        let outcome = SafetyValidator::check(sql, &allowed());
        assert!(!outcome.approved);
    }

    #[test]
    fn test_unparseable_sql_is_rejected() {
        let outcome = SafetyValidator::check("SELECT WHERE order_date >", &allowed());
        assert!(!outcome.approved);
    }

    #[test]
    fn test_multiple_statements_all_checked() {
        let outcome =
            SafetyValidator::check("SELECT 1; DELETE FROM orders", &allowed());
        assert!(!outcome.approved);
    }
}
