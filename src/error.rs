use thiserror::Error;

use crate::transaction::TransactionToken;

#[derive(Debug, Error)]
pub enum SqlSavepointError {
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Statement error: {0}")]
    StatementError(String),

    #[error("Incorrect transaction passed {0}")]
    InvalidTransaction(TransactionToken),

    /// An inner transaction opened after the committed one is still pending.
    #[error("Incorrect transaction level passed {level} < {depth}")]
    TransactionOrderViolation { level: usize, depth: usize },

    #[error("Pool error: {0}")]
    PoolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),
}

impl SqlSavepointError {
    #[must_use]
    pub fn is_invalid_transaction(&self) -> bool {
        matches!(self, Self::InvalidTransaction(_))
    }

    #[must_use]
    pub fn is_order_violation(&self) -> bool {
        matches!(self, Self::TransactionOrderViolation { .. })
    }

    /// True for errors reported by the server while running a statement.
    #[must_use]
    pub fn is_statement_error(&self) -> bool {
        match self {
            Self::PostgresError(e) => e.as_db_error().is_some(),
            Self::StatementError(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SqlSavepointError {
    fn from(err: serde_json::Error) -> Self {
        SqlSavepointError::ConfigError(format!("invalid connection parameters: {err}"))
    }
}
