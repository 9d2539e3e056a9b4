/// Structured error types for pgprobe-core.
///
/// Uses `thiserror` for better API surface and error composition.
/// The binary crate (pgprobe-cli) can still use `anyhow` for convenience,
/// but library consumers get structured, composable errors.

use thiserror::Error;

/// Main error type for pgprobe-core operations
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Database connection or query failed
    #[error("database error: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    /// No connection string could be resolved (flag, env, or config file)
    #[error("DATABASE_URL is not set (flag, environment, and config file are all empty)")]
    MissingDatabaseUrl,

    /// Configuration error
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// A fan-out worker task panicked before reporting an outcome
    #[error("worker {worker} panicked: {reason}")]
    WorkerPanic { worker: usize, reason: String },

    /// Every fan-out worker failed
    #[error("all {workers} workers failed; first error: {first}")]
    AllWorkersFailed { workers: usize, first: String },
}

/// Result type alias for pgprobe-core operations
pub type Result<T> = std::result::Result<T, ProbeError>;

impl ProbeError {
    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a worker panic error
    pub fn worker_panic(worker: usize, reason: impl Into<String>) -> Self {
        Self::WorkerPanic {
            worker,
            reason: reason.into(),
        }
    }
}
