//! Transport protocol abstraction trait.
//!
//! This module defines the `TransportProtocol` trait that abstracts the underlying
//! communication mechanism, so statements can be driven by the HTTP transport
//! in production and by mocks in tests.

use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use super::messages::{
    ParameterEntry, QueryRequest, ResultData, SessionInfo, StatementDescription,
};
use super::retry::RetryPolicy;

/// Connection parameters for establishing a transport connection.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Service host
    pub host: String,
    /// Service port
    pub port: u16,
    /// Use TLS/SSL
    pub use_tls: bool,
    /// Validate the server certificate
    pub validate_server_certificate: bool,
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Per-request network timeout in milliseconds
    pub network_timeout_ms: u64,
    /// Retry policy for retransmissions
    pub retry: RetryPolicy,
}

impl ConnectionParams {
    /// Create new connection parameters.
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            use_tls: true,
            validate_server_certificate: true,
            timeout_ms: 30_000, // 30 seconds default
            network_timeout_ms: 300_000,
            retry: RetryPolicy::default(),
        }
    }

    /// Set whether to use TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Set whether to validate the server certificate.
    pub fn with_validate_server_certificate(mut self, validate: bool) -> Self {
        self.validate_server_certificate = validate;
        self
    }

    /// Set connection timeout.
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set per-request network timeout.
    pub fn with_network_timeout(mut self, timeout_ms: u64) -> Self {
        self.network_timeout_ms = timeout_ms;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the base URL from parameters.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Connection timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// User credentials and login context for authentication.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Account name
    pub account: String,
    /// Username
    pub username: String,
    /// Password (will be cleared after use)
    pub password: String,
    /// Database to use after login
    pub database: Option<String>,
    /// Schema to use after login
    pub schema: Option<String>,
    /// Warehouse to use after login
    pub warehouse: Option<String>,
    /// Role to use after login
    pub role: Option<String>,
    /// Session parameters applied at login
    pub session_parameters: HashMap<String, String>,
}

impl Credentials {
    /// Create new credentials.
    pub fn new(account: String, username: String, password: String) -> Self {
        Self {
            account,
            username,
            password,
            database: None,
            schema: None,
            warehouse: None,
            role: None,
            session_parameters: HashMap::new(),
        }
    }

    /// Set the login database and schema.
    pub fn with_namespace(mut self, database: Option<String>, schema: Option<String>) -> Self {
        self.database = database;
        self.schema = schema;
        self
    }

    /// Set the login warehouse and role.
    pub fn with_compute(mut self, warehouse: Option<String>, role: Option<String>) -> Self {
        self.warehouse = warehouse;
        self.role = role;
        self
    }

    /// Set session parameters applied at login.
    pub fn with_session_parameters(mut self, parameters: HashMap<String, String>) -> Self {
        self.session_parameters = parameters;
        self
    }

    /// Login context as URL query parameters.
    pub fn login_query(&self) -> Vec<(&'static str, String)> {
        [
            ("databaseName", &self.database),
            ("schemaName", &self.schema),
            ("warehouse", &self.warehouse),
            ("roleName", &self.role),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|value| (key, value)))
        .collect()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.password.clear();
    }
}

/// Transport protocol trait for database communication.
///
/// `execute_query` runs one logical request. Implementations may transmit
/// it several times, but every transmission must carry the same request
/// identity so the service applies it at most once.
#[async_trait]
pub trait TransportProtocol: Send + Sync {
    /// Connect to the service.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the endpoint cannot be set up.
    async fn connect(&mut self, params: &ConnectionParams) -> Result<(), TransportError>;

    /// Authenticate with the service.
    ///
    /// # Returns
    ///
    /// Session information on successful authentication.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if authentication fails.
    async fn authenticate(
        &mut self,
        credentials: &Credentials,
    ) -> Result<SessionInfo, TransportError>;

    /// Execute a query request (describe or execute phase).
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if execution fails after all retries.
    async fn execute_query(&mut self, request: QueryRequest) -> Result<QueryResult, TransportError>;

    /// Close the session.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if logout fails.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still active.
    fn is_connected(&self) -> bool;
}

/// Payload of a query result.
#[derive(Debug, Clone)]
pub enum QueryPayload {
    /// Rows from a SELECT or SHOW
    ResultSet(ResultData),
    /// Rows affected by DML
    RowCount(i64),
    /// Outcome of a describe-only request
    Described(StatementDescription),
    /// DDL or session statement with a status message only
    Status(String),
}

/// Result of a query execution.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Server-side query id
    pub query_id: String,
    /// Result payload
    pub payload: QueryPayload,
    /// Session parameters echoed with the response
    pub parameters: Vec<ParameterEntry>,
}

impl QueryResult {
    /// Create a result set query result.
    pub fn result_set(query_id: impl Into<String>, data: ResultData) -> Self {
        Self::new(query_id, QueryPayload::ResultSet(data))
    }

    /// Create a row count query result.
    pub fn row_count(query_id: impl Into<String>, count: i64) -> Self {
        Self::new(query_id, QueryPayload::RowCount(count))
    }

    /// Create a describe query result.
    pub fn described(query_id: impl Into<String>, description: StatementDescription) -> Self {
        Self::new(query_id, QueryPayload::Described(description))
    }

    /// Create a status-only query result.
    pub fn status(query_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(query_id, QueryPayload::Status(message.into()))
    }

    fn new(query_id: impl Into<String>, payload: QueryPayload) -> Self {
        Self {
            query_id: query_id.into(),
            payload,
            parameters: Vec::new(),
        }
    }

    /// Attach echoed session parameters.
    pub fn with_parameters(mut self, parameters: Vec<ParameterEntry>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Check if this is a result set.
    pub fn is_result_set(&self) -> bool {
        matches!(self.payload, QueryPayload::ResultSet(_))
    }

    /// Check if this is a row count.
    pub fn is_row_count(&self) -> bool {
        matches!(self.payload, QueryPayload::RowCount(_))
    }

    /// Get the row count if this is a row count result.
    pub fn get_row_count(&self) -> Option<i64> {
        match self.payload {
            QueryPayload::RowCount(count) => Some(count),
            _ => None,
        }
    }

    /// Get the description if this is a describe result.
    pub fn description(&self) -> Option<&StatementDescription> {
        match &self.payload {
            QueryPayload::Described(description) => Some(description),
            _ => None,
        }
    }
}
