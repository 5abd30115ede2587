//! SQL Executor
//!
//! Runs read-only SQL against the configured database with a row cap and a
//! wall-clock timeout. Failures come back as classified outcomes, never as
//! raised errors.

use crate::error::{InsightError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Column, Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_ROW_LIMIT: usize = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Classification of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlErrorKind {
    RejectedStatement,
    Syntax,
    MissingRelation,
    Permission,
    Timeout,
    Execution,
}

/// Tabular result of a successful query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryRows {
    /// Convert to a dataframe for the analytics sandbox. Columns whose
    /// non-null values are all numeric become Float64; everything else is
    /// carried as text.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut series = Vec::with_capacity(self.columns.len());
        for (idx, name) in self.columns.iter().enumerate() {
            let values: Vec<&serde_json::Value> =
                self.rows.iter().map(|row| &row[idx]).collect();

            let numeric = values
                .iter()
                .all(|v| v.is_null() || v.is_number());
            if numeric && values.iter().any(|v| v.is_number()) {
                let column: Vec<Option<f64>> =
                    values.iter().map(|v| v.as_f64()).collect();
                series.push(Series::new(name, column));
            } else {
                let column: Vec<Option<String>> = values
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::Null => None,
                        serde_json::Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    })
                    .collect();
                series.push(Series::new(name, column));
            }
        }
        Ok(DataFrame::new(series)?)
    }
}

/// Structured outcome of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Rows(QueryRows),
    Error { error: String, kind: SqlErrorKind },
}

impl QueryOutcome {
    pub fn rows(&self) -> Option<&QueryRows> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::Error { .. } => None,
        }
    }

    fn error(kind: SqlErrorKind, message: impl Into<String>) -> Self {
        QueryOutcome::Error {
            error: message.into(),
            kind,
        }
    }
}

/// Read-only SQL executor over a SQLite pool.
pub struct SqlExecutor {
    pool: SqlitePool,
}

impl SqlExecutor {
    /// Connect read-only. A malformed URL or missing database surfaces an
    /// actionable error here, before any query runs.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| InsightError::Sql(format!("invalid database URL '{}': {}", database_url, e)))?
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| InsightError::Sql(format!("failed to open database: {}", e)))?;

        info!("SQL executor connected read-only to {}", database_url);
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests, shared fixtures).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Execute a read-only query with a row cap and timeout.
    pub async fn run(&self, sql: &str, row_limit: usize, timeout_s: u64) -> QueryOutcome {
        let sql = sql.trim();
        if !starts_read_only(sql) {
            return QueryOutcome::error(
                SqlErrorKind::RejectedStatement,
                "Only read-only SELECT queries are allowed",
            );
        }

        let effective_sql = enforce_limit(sql, row_limit);

        let fetched = tokio::time::timeout(
            Duration::from_secs(timeout_s),
            sqlx::query(&effective_sql).fetch_all(&self.pool),
        )
        .await;

        let rows = match fetched {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                warn!("SQL execution failed: {}", e);
                return classify_sqlx_error(&e);
            }
            Err(_) => {
                warn!("SQL execution timed out after {}s", timeout_s);
                return QueryOutcome::error(
                    SqlErrorKind::Timeout,
                    format!("query timed out after {}s", timeout_s),
                );
            }
        };

        if rows.is_empty() {
            return QueryOutcome::Rows(QueryRows {
                columns: Vec::new(),
                rows: Vec::new(),
            });
        }

        let columns: Vec<String> = rows[0]
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let mut data = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                record.push(decode_value(row, idx));
            }
            data.push(record);
        }

        QueryOutcome::Rows(QueryRows {
            columns,
            rows: data,
        })
    }
}

/// Leading non-comment token must be SELECT or WITH.
fn starts_read_only(sql: &str) -> bool {
    let stripped = strip_leading_comments(sql);
    let first = stripped
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase();
    first == "SELECT" || first == "WITH"
}

fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if rest.starts_with("--") {
            match rest.find('\n') {
                Some(pos) => rest = rest[pos + 1..].trim_start(),
                None => return "",
            }
        } else if rest.starts_with("/*") {
            match rest.find("*/") {
                Some(pos) => rest = rest[pos + 2..].trim_start(),
                None => return "",
            }
        } else {
            return rest;
        }
    }
}

/// Append an effective LIMIT when the query carries none.
fn enforce_limit(sql: &str, row_limit: usize) -> String {
    let lowered = sql.to_lowercase();
    if lowered.contains(" limit ") || lowered.ends_with(" limit") {
        sql.to_string()
    } else {
        format!("{} LIMIT {}", sql.trim_end_matches(';'), row_limit)
    }
}

fn decode_value(row: &sqlx::sqlite::SqliteRow, idx: usize) -> serde_json::Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return match v {
            Some(n) => serde_json::Value::from(n),
            None => serde_json::Value::Null,
        };
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return match v {
            Some(n) => serde_json::Value::from(n),
            None => serde_json::Value::Null,
        };
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return match v {
            Some(s) => serde_json::Value::from(s),
            None => serde_json::Value::Null,
        };
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return match v {
            Some(b) => serde_json::Value::from(b),
            None => serde_json::Value::Null,
        };
    }
    serde_json::Value::Null
}

fn classify_sqlx_error(error: &sqlx::Error) -> QueryOutcome {
    let message = error.to_string();
    let lowered = message.to_lowercase();

    let kind = if lowered.contains("syntax error") {
        SqlErrorKind::Syntax
    } else if lowered.contains("no such table") || lowered.contains("no such column") {
        SqlErrorKind::MissingRelation
    } else if lowered.contains("readonly") || lowered.contains("read-only") || lowered.contains("permission") {
        SqlErrorKind::Permission
    } else {
        SqlErrorKind::Execution
    };

    QueryOutcome::Error {
        error: message,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fixture_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE orders (order_date TEXT, total_amount REAL)")
            .execute(&pool)
            .await
            .unwrap();
        for (date, amount) in [("2025-01-01", 100.0), ("2025-01-02", 250.5), ("2025-01-03", 75.0)] {
            sqlx::query("INSERT INTO orders VALUES (?, ?)")
                .bind(date)
                .bind(amount)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn test_select_returns_columns_and_rows() {
        let executor = SqlExecutor::from_pool(fixture_pool().await);
        let outcome = executor
            .run("SELECT order_date, total_amount FROM orders ORDER BY order_date", 10, 5)
            .await;
        let rows = outcome.rows().expect("expected rows");
        assert_eq!(rows.columns, vec!["order_date", "total_amount"]);
        assert_eq!(rows.rows.len(), 3);
        assert_eq!(rows.rows[0][0], serde_json::json!("2025-01-01"));
    }

    #[tokio::test]
    async fn test_row_limit_is_enforced() {
        let executor = SqlExecutor::from_pool(fixture_pool().await);
        let outcome = executor.run("SELECT * FROM orders", 2, 5).await;
        assert_eq!(outcome.rows().unwrap().rows.len(), 2);
    }

    #[tokio::test]
    async fn test_existing_limit_is_preserved() {
        let executor = SqlExecutor::from_pool(fixture_pool().await);
        let outcome = executor.run("SELECT * FROM orders LIMIT 1", 100, 5).await;
        assert_eq!(outcome.rows().unwrap().rows.len(), 1);
    }

    #[tokio::test]
    async fn test_update_is_rejected() {
        let executor = SqlExecutor::from_pool(fixture_pool().await);
        let outcome = executor.run("UPDATE orders SET total_amount = 0", 10, 5).await;
        match outcome {
            QueryOutcome::Error { kind, .. } => assert_eq!(kind, SqlErrorKind::RejectedStatement),
            QueryOutcome::Rows(_) => panic!("update must be rejected"),
        }
    }

    #[tokio::test]
    async fn test_leading_comment_is_skipped() {
        let executor = SqlExecutor::from_pool(fixture_pool().await);
        let outcome = executor
            .run("-- revenue query\nSELECT COUNT(*) AS n FROM orders", 10, 5)
            .await;
        assert!(outcome.rows().is_some());
    }

    #[tokio::test]
    async fn test_missing_table_is_classified() {
        let executor = SqlExecutor::from_pool(fixture_pool().await);
        let outcome = executor.run("SELECT * FROM payroll", 10, 5).await;
        match outcome {
            QueryOutcome::Error { kind, .. } => assert_eq!(kind, SqlErrorKind::MissingRelation),
            QueryOutcome::Rows(_) => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn test_to_dataframe_types() {
        let rows = QueryRows {
            columns: vec!["label".to_string(), "value".to_string()],
            rows: vec![
                vec![serde_json::json!("a"), serde_json::json!(1.5)],
                vec![serde_json::json!("b"), serde_json::json!(2)],
            ],
        };
        let df = rows.to_dataframe().unwrap();
        assert_eq!(df.shape(), (2, 2));
        assert_eq!(df.column("value").unwrap().dtype(), &DataType::Float64);
    }
}
