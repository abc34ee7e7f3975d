use thiserror::Error;

use crate::types::BoundValue;

#[derive(Debug, Error)]
pub enum MultiDbError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Invalid call sequence or argument shape; a bug in the calling test.
    #[error("Usage error: {0}")]
    UsageError(String),

    #[error("Statement build error: {0}")]
    BuildError(String),

    /// A statement failed against the driver; carries the SQL and bound params for diagnosis.
    #[error("SQL execution error: {message} (query: {sql}; params: {params})")]
    ExecutionError {
        sql: String,
        params: String,
        message: String,
    },

    /// The transaction bookkeeping no longer satisfies its invariant. Never recoverable.
    #[error("Invalid transaction state (level:[{level}] connector:[{connector}])")]
    InvalidTransactionState { level: u32, connector: String },

    /// Rolling back after a failed transaction block failed as well.
    #[error("Rollback failed: {rollback} (transaction block error: {block})")]
    RollbackFailed {
        block: String,
        #[source]
        rollback: Box<MultiDbError>,
    },

    #[error("Unfinished transaction was found; rolled back ({when} test '{test}')")]
    LeakedTransaction { when: &'static str, test: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl MultiDbError {
    /// Wrap a driver failure with the statement that caused it.
    pub fn execution(sql: &str, params: &[BoundValue], message: impl Into<String>) -> Self {
        MultiDbError::ExecutionError {
            sql: sql.to_string(),
            params: serde_json::to_string(params).unwrap_or_else(|_| format!("{params:?}")),
            message: message.into(),
        }
    }

    /// Internal-consistency violations, as opposed to ordinary usage or data errors.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, MultiDbError::InvalidTransactionState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_renders_params_as_json() {
        let err = MultiDbError::execution(
            "SELECT 1 FROM t WHERE a = ? AND b IS ?",
            &["x".into(), BoundValue::Null],
            "no such table: t",
        );
        assert_eq!(
            err.to_string(),
            r#"SQL execution error: no such table: t (query: SELECT 1 FROM t WHERE a = ? AND b IS ?; params: ["x",null])"#
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn invalid_state_is_fatal() {
        let err = MultiDbError::InvalidTransactionState {
            level: 0,
            connector: "Primary".into(),
        };
        assert!(err.is_fatal());
        assert!(!MultiDbError::UsageError("x".into()).is_fatal());
    }
}
