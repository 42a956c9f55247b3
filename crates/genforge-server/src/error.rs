//! Error types for the server binary.
//!
//! [`ServerError`] wraps every failure mode of startup and shutdown so
//! `main` can propagate with `?`.

/// Top-level error for the server binary.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: genforge_core::config::ConfigError,
    },

    /// Opening, migrating, or closing the database failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying store error.
        #[from]
        source: genforge_db::DbError,
    },

    /// Restoring state from the store failed.
    #[error("startup error: {source}")]
    Startup {
        /// The underlying service error.
        #[from]
        source: genforge_core::ServiceError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
