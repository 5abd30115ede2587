use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Schema index error: {0}")]
    Schema(String),

    #[error("Glossary error: {0}")]
    Glossary(String),

    #[error("Policy violation: {0}")]
    Policy(String),

    #[error("SQL execution error: {0}")]
    Sql(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Research error: {0}")]
    Research(String),

    #[error("Sentry error: {0}")]
    Sentry(String),

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for InsightError {
    fn from(err: sqlx::Error) -> Self {
        InsightError::Sql(err.to_string())
    }
}

impl From<polars::error::PolarsError> for InsightError {
    fn from(err: polars::error::PolarsError) -> Self {
        InsightError::Internal(format!("dataframe error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, InsightError>;
