//! Error types for flurry.
//!
//! This module defines domain-specific error types organized by functional area.

use thiserror::Error;

/// Top-level error type encompassing all possible errors.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Connection-related errors
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Query execution errors
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Data conversion errors
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Transport protocol errors
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors related to database connections.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish connection to the database
    #[error("Failed to connect to {host}:{port}: {message}")]
    ConnectionFailed {
        host: String,
        port: u16,
        message: String,
    },

    /// Authentication failure
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid connection parameters
    #[error("Invalid connection parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Connection string parsing error
    #[error("Failed to parse connection string: {0}")]
    ParseError(String),

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection is closed
    #[error("Connection is closed")]
    ConnectionClosed,
}

/// Errors related to query execution.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Query execution failed
    #[error("Query execution failed: {0}")]
    ExecutionFailed(String),

    /// The server rejected the statement
    #[error("SQL compilation or execution error {code} (SQL state {sql_state}): {message}")]
    ServerError {
        code: String,
        sql_state: String,
        message: String,
    },

    /// Query timeout
    #[error("Query timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Invalid query state
    #[error("Invalid query state: {0}")]
    InvalidState(String),

    /// Parameter binding error
    #[error("Parameter binding error for parameter {index}: {message}")]
    ParameterBindingError { index: usize, message: String },

    /// Result set not available
    #[error("Result set not available: {0}")]
    NoResultSet(String),

    /// Prepared statement has been closed
    #[error("Prepared statement has been closed")]
    StatementClosed,

    /// Unexpected result set when row count was expected
    #[error("Expected row count but received result set")]
    UnexpectedResultSet,

    /// `execute_batch` called with nothing queued
    #[error("Batch is empty")]
    EmptyBatch,

    /// A batch entry failed after `completed` entries were applied
    #[error("Batch failed after {completed} applied entries: {message}")]
    BatchFailed { completed: usize, message: String },
}

/// Errors related to data type conversion.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Failed to convert value
    #[error("Failed to convert value at row {row}, column {column}: {message}")]
    ValueConversionFailed {
        row: usize,
        column: usize,
        message: String,
    },

    /// Column index or name does not exist
    #[error("Column {0} does not exist")]
    ColumnOutOfBounds(String),

    /// Non-nullable read of a NULL value
    #[error("Unexpected NULL at row {row}, column {column}")]
    UnexpectedNull { row: usize, column: usize },

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}

/// Errors related to the transport layer.
#[derive(Error, Debug)]
pub enum TransportError {
    /// HTTP client error (connect, TLS, body read)
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request timed out
    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Non-success HTTP status
    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },

    /// Retry budget spent
    #[error("Giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// In-band error returned by the service
    #[error("Server error {code}: {message}")]
    ServerError {
        code: String,
        sql_state: Option<String>,
        message: String,
    },

    /// Response did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Protocol misuse, e.g. querying before login
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Session token no longer accepted
    #[error("Session expired")]
    SessionExpired,

    /// The service asked for the request to be retransmitted
    #[error("Server requested retry ({code})")]
    RetryRequested { code: String },
}

impl TransportError {
    /// Whether the same request may be sent again.
    ///
    /// Retransmissions reuse the original request id, so this is safe for
    /// DML as long as the service deduplicates on it.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::HttpError(_)
            | TransportError::Timeout { .. }
            | TransportError::RetryRequested { .. } => true,
            TransportError::HttpStatus { status } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Short label sent as `retryReason` on the next attempt.
    pub fn retry_reason(&self) -> String {
        match self {
            TransportError::HttpStatus { status } => status.to_string(),
            TransportError::RetryRequested { code } => code.clone(),
            TransportError::Timeout { .. } => "timeout".to_string(),
            _ => "0".to_string(),
        }
    }
}

// Conversions from external error types
impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout { timeout_ms: 0 }
        } else if let Some(status) = err.status() {
            TransportError::HttpStatus {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            TransportError::InvalidResponse(err.to_string())
        } else {
            TransportError::HttpError(err.to_string())
        }
    }
}

impl From<TransportError> for QueryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ServerError {
                code,
                sql_state,
                message,
            } => QueryError::ServerError {
                code,
                sql_state: sql_state.unwrap_or_default(),
                message,
            },
            other => QueryError::ExecutionFailed(other.to_string()),
        }
    }
}
