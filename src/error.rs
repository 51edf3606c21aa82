//! # Transport Error Types
//!
//! Structured error handling for the SQL transport using thiserror.
//!
//! Errors are split by how a caller should react to them:
//! - **Transient** (`Connection`, `Timeout`): the store could not be reached in time.
//!   The poll loop backs off and tries again; direct callers decide their own retry policy.
//! - **Fatal at startup** (`SchemaMismatch`, `Configuration`): the transport cannot run as configured.
//! - **Per-operation** (`Database`, `InvalidQueueName`, `Serialization`): the single call failed.

use crate::database::error_codes::PgErrorCode;
use thiserror::Error;

/// Errors produced by the SQL transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Database connection error: {message}")]
    Connection { message: String },

    #[error("Operation timed out: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Database query error: {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Table {table} exists with an incompatible schema: {reason}")]
    SchemaMismatch { table: String, reason: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Invalid queue name '{queue_name}': {reason}")]
    InvalidQueueName { queue_name: String, reason: String },

    #[error("Invalid table name '{table_name}': {reason}")]
    InvalidTableName { table_name: String, reason: String },

    #[error("Header serialization error: {message}")]
    Serialization { message: String },
}

impl TransportError {
    /// Create a connectivity error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a database query error
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an invalid queue name error
    pub fn invalid_queue_name(queue_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQueueName {
            queue_name: queue_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid table name error
    pub fn invalid_table_name(table_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTableName {
            table_name: table_name.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure is a connectivity problem that may clear up on its own.
    ///
    /// The receive loop treats transient errors like an empty queue for backoff purposes.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Wrap a sqlx error with the name of the operation that produced it
    pub fn from_sqlx(operation: &str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let retryable = db_err
                    .code()
                    .map(|code| PgErrorCode::is_connection_exception(&code))
                    .unwrap_or(false);
                if retryable {
                    Self::connection(db_err.to_string())
                } else {
                    Self::database(operation, db_err.to_string())
                }
            }
            other => other.into(),
        }
    }
}

/// Conversion from sqlx::Error to TransportError
impl From<sqlx::Error> for TransportError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => TransportError::timeout("acquire_connection", 0),
            sqlx::Error::PoolClosed => TransportError::connection("Database pool is closed"),
            sqlx::Error::Io(io_err) => TransportError::connection(io_err.to_string()),
            sqlx::Error::Tls(tls_err) => TransportError::connection(tls_err.to_string()),
            sqlx::Error::Configuration(config_err) => {
                TransportError::configuration("database", config_err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                TransportError::database("database", db_err.to_string())
            }
            sqlx::Error::RowNotFound => TransportError::database("query", "No rows found"),
            other => TransportError::database("database", other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<crate::config::ConfigurationError> for TransportError {
    fn from(err: crate::config::ConfigurationError) -> Self {
        TransportError::configuration("config", err.to_string())
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
