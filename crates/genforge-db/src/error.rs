//! Error types for the persistence gateway.
//!
//! All errors are propagated via [`DbError`], which wraps the underlying
//! [`sqlx`] error with context about which part of the gateway failed.

/// Errors that can occur in the persistence gateway.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A SQLite operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The gateway has been shut down.
    #[error("database gateway is closed")]
    Closed,

    /// A stored row could not be converted into a domain value.
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A statement inside a unit of work touched an unexpected number of
    /// rows, so the unit of work was rolled back.
    #[error("expected {expected} affected row(s) in {table}, got {actual}")]
    UnexpectedRowCount {
        /// Table the statement targeted.
        table: &'static str,
        /// Rows the statement should have touched.
        expected: u64,
        /// Rows it actually touched.
        actual: u64,
    },

    /// A background database task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl DbError {
    /// Whether the error indicates a dead or closed connection, i.e. one a
    /// reconnect could fix.
    pub const fn is_connection_lost(&self) -> bool {
        match self {
            Self::Sqlite(error) => is_connection_error(error),
            Self::Closed => true,
            _ => false,
        }
    }
}

/// Classify a driver error as a lost connection.
pub(crate) const fn is_connection_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_crash_counts_as_lost_connection() {
        assert!(DbError::Sqlite(sqlx::Error::WorkerCrashed).is_connection_lost());
        assert!(DbError::Closed.is_connection_lost());
    }

    #[test]
    fn row_errors_are_not_connection_errors() {
        assert!(!DbError::Sqlite(sqlx::Error::RowNotFound).is_connection_lost());
        let err = DbError::UnexpectedRowCount {
            table: "networks",
            expected: 1,
            actual: 0,
        };
        assert!(!err.is_connection_lost());
        assert!(err.to_string().contains("networks"));
    }
}
