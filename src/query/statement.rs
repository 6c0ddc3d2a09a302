//! SQL statement handling and execution.
//!
//! This module provides the `Statement` type for executing SQL with
//! server-side parameter binding.

use crate::connection::session::{Session, SessionState};
use crate::error::{QueryError, TransportError};
use crate::query::results::ResultSet;
use crate::transport::{BindData, BindValue, QueryRequest, QueryResult, TransportProtocol};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// Default statement timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Type of SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    /// SELECT query
    Select,
    /// INSERT statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// MERGE statement
    Merge,
    /// DDL statement (CREATE, ALTER, DROP)
    Ddl,
    /// Session control (ALTER SESSION, USE)
    Session,
    /// Unknown or other statement type
    Other,
}

impl StatementType {
    /// Detect statement type from SQL text.
    pub fn from_sql(sql: &str) -> Self {
        let trimmed = sql.trim_start().to_uppercase();
        let mut words = trimmed.split_whitespace();
        let first = words.next().unwrap_or_default();

        match first {
            "SELECT" | "WITH" | "SHOW" | "DESCRIBE" | "DESC" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "MERGE" => Self::Merge,
            "USE" => Self::Session,
            "ALTER" if words.next() == Some("SESSION") => Self::Session,
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" => Self::Ddl,
            _ => Self::Other,
        }
    }
}

/// Parameter value for statements.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    /// NULL value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Float value
    Float(f64),
    /// String value
    String(String),
    /// Binary data
    Binary(Vec<u8>),
}

impl Parameter {
    /// Wire type of the binding.
    pub fn bind_type(&self) -> &'static str {
        match self {
            Parameter::Null => "ANY",
            Parameter::Boolean(_) => "BOOLEAN",
            Parameter::Integer(_) => "FIXED",
            Parameter::Float(_) => "REAL",
            Parameter::String(_) => "TEXT",
            Parameter::Binary(_) => "BINARY",
        }
    }

    /// Wire value of the binding; `None` is sent as JSON null.
    pub fn to_bind_string(&self) -> Option<String> {
        match self {
            Parameter::Null => None,
            Parameter::Boolean(b) => Some(b.to_string()),
            Parameter::Integer(i) => Some(i.to_string()),
            Parameter::Float(f) => Some(f.to_string()),
            Parameter::String(s) => Some(s.clone()),
            Parameter::Binary(b) => Some(hex::encode(b)),
        }
    }
}

impl From<bool> for Parameter {
    fn from(value: bool) -> Self {
        Parameter::Boolean(value)
    }
}

impl From<i32> for Parameter {
    fn from(value: i32) -> Self {
        Parameter::Integer(value as i64)
    }
}

impl From<i64> for Parameter {
    fn from(value: i64) -> Self {
        Parameter::Integer(value)
    }
}

impl From<f64> for Parameter {
    fn from(value: f64) -> Self {
        Parameter::Float(value)
    }
}

impl From<String> for Parameter {
    fn from(value: String) -> Self {
        Parameter::String(value)
    }
}

impl From<&str> for Parameter {
    fn from(value: &str) -> Self {
        Parameter::String(value.to_string())
    }
}

impl From<Vec<u8>> for Parameter {
    fn from(value: Vec<u8>) -> Self {
        Parameter::Binary(value)
    }
}

impl<T: Into<Parameter>> From<Option<T>> for Parameter {
    fn from(value: Option<T>) -> Self {
        value.map_or(Parameter::Null, Into::into)
    }
}

/// Build scalar bindings keyed by 1-based position.
pub(crate) fn scalar_bindings(
    parameters: &[Option<Parameter>],
) -> Result<BTreeMap<String, BindValue>, QueryError> {
    parameters
        .iter()
        .enumerate()
        .map(|(index, parameter)| {
            let parameter = parameter
                .as_ref()
                .ok_or_else(|| QueryError::ParameterBindingError {
                    index,
                    message: "Parameter not bound".to_string(),
                })?;
            Ok((
                (index + 1).to_string(),
                BindValue {
                    bind_type: parameter.bind_type().to_string(),
                    value: BindData::Scalar(parameter.to_bind_string()),
                },
            ))
        })
        .collect()
}

/// Submit one logical request, with timeout, and record what the server
/// echoed on the session.
pub(crate) async fn submit(
    transport: &Arc<Mutex<dyn TransportProtocol>>,
    session: &Session,
    request: QueryRequest,
    timeout_ms: u64,
) -> Result<QueryResult, QueryError> {
    session
        .validate_ready()
        .await
        .map_err(|e| QueryError::InvalidState(e.to_string()))?;

    let query_number = session.increment_query_count();
    debug!(
        session_id = session.session_id(),
        query_number,
        describe_only = request.describe_only,
        "executing statement"
    );

    session.set_state(SessionState::Executing).await;
    let outcome = timeout(Duration::from_millis(timeout_ms), async {
        let mut transport = transport.lock().await;
        transport.execute_query(request).await
    })
    .await;

    match outcome {
        Err(_) => {
            session.set_state(SessionState::Ready).await;
            Err(QueryError::Timeout { timeout_ms })
        }
        Ok(Err(TransportError::SessionExpired)) => {
            session.mark_error().await;
            Err(TransportError::SessionExpired.into())
        }
        Ok(Err(e)) => {
            session.set_state(SessionState::Ready).await;
            Err(e.into())
        }
        Ok(Ok(result)) => {
            session.set_state(SessionState::Ready).await;
            session.apply_parameters(&result.parameters).await;
            Ok(result)
        }
    }
}

/// SQL statement for query execution.
///
/// Supports parameter binding and timeout control.
pub struct Statement {
    /// Reference to the transport layer
    transport: Arc<Mutex<dyn TransportProtocol>>,
    /// Session the statement runs in
    session: Arc<Session>,
    /// SQL text (may contain `?` placeholders)
    sql: String,
    /// Bound parameters (indexed by position)
    parameters: Vec<Option<Parameter>>,
    /// Query timeout in milliseconds
    timeout_ms: u64,
    /// Statement type
    statement_type: StatementType,
    /// Whether the statement has been executed
    executed: bool,
}

impl Statement {
    /// Create a new statement.
    pub fn new(
        transport: Arc<Mutex<dyn TransportProtocol>>,
        session: Arc<Session>,
        sql: String,
    ) -> Self {
        let statement_type = StatementType::from_sql(&sql);

        Self {
            transport,
            session,
            sql,
            parameters: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            statement_type,
            executed: false,
        }
    }

    /// Get the SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Get the statement type.
    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    /// Set query timeout.
    pub fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    /// Bind a parameter at the given index.
    ///
    /// # Arguments
    /// * `index` - Parameter index (0-based)
    /// * `value` - Parameter value
    pub fn bind<T: Into<Parameter>>(&mut self, index: usize, value: T) -> Result<(), QueryError> {
        if index >= self.parameters.len() {
            self.parameters.resize(index + 1, None);
        }

        self.parameters[index] = Some(value.into());
        Ok(())
    }

    /// Bind multiple parameters.
    pub fn bind_all<T: Into<Parameter> + Clone>(&mut self, params: &[T]) -> Result<(), QueryError> {
        for (index, param) in params.iter().enumerate() {
            self.bind(index, param.clone())?;
        }
        Ok(())
    }

    /// Clear all bound parameters.
    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    fn build_request(&self) -> Result<QueryRequest, QueryError> {
        Ok(QueryRequest::new(self.sql.clone()).with_bindings(scalar_bindings(&self.parameters)?))
    }

    /// Execute the statement.
    ///
    /// Returns a `ResultSet` for queries, a row count for DML statements
    /// and a status message for everything else.
    ///
    /// # Errors
    /// Returns `QueryError` if execution fails or times out.
    pub async fn execute(&mut self) -> Result<ResultSet, QueryError> {
        if self.executed {
            return Err(QueryError::InvalidState(
                "Statement already executed".to_string(),
            ));
        }

        let request = self.build_request()?;
        let result = submit(&self.transport, &self.session, request, self.timeout_ms).await?;
        self.executed = true;

        ResultSet::from_transport_result(result)
    }

    /// Execute and return the row count (for non-SELECT statements).
    ///
    /// DDL and session statements report 0.
    ///
    /// # Errors
    /// Returns `QueryError` if execution fails or if statement is a SELECT.
    pub async fn execute_update(&mut self) -> Result<i64, QueryError> {
        let result_set = self.execute().await?;

        if result_set.has_rows() {
            return Err(QueryError::UnexpectedResultSet);
        }
        Ok(result_set.row_count().unwrap_or(0))
    }

    /// Execute and return rows (for SELECT statements).
    ///
    /// # Errors
    /// Returns `QueryError::NoResultSet` if the statement produced no rows.
    pub async fn execute_query(&mut self) -> Result<ResultSet, QueryError> {
        let result_set = self.execute().await?;

        if !result_set.has_rows() {
            return Err(QueryError::NoResultSet(
                "Expected result set, got row count".to_string(),
            ));
        }
        Ok(result_set)
    }

    /// Reset the statement for re-execution.
    ///
    /// Clears the executed flag but preserves parameters.
    pub fn reset(&mut self) {
        self.executed = false;
    }
}
