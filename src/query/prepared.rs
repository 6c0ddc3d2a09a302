//! Prepared statement handling for parameterized queries.
//!
//! A prepared statement runs in two phases. Preparing sends a
//! describe-only request that compiles the statement and reports how many
//! bind variables it has. Executing sends the statement again, optionally
//! pointing the server at the job compiled during prepare.

use crate::connection::session::Session;
use crate::error::QueryError;
use crate::query::results::ResultSet;
use crate::query::statement::{scalar_bindings, submit, Parameter, DEFAULT_TIMEOUT_MS};
use crate::transport::{
    BindData, BindValue, QueryPayload, QueryRequest, QueryResult, StatementDescription,
    TransportProtocol,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Update count reported when the server total cannot be attributed to
/// individual batch entries.
pub const SUCCESS_NO_INFO: i64 = -2;

/// A prepared statement for parameterized and batched execution.
///
/// # Example
///
/// ```no_run
/// # use flurry::Connection;
/// # async fn example(connection: &Connection) -> Result<(), Box<dyn std::error::Error>> {
/// let mut prepared = connection
///     .prepare("insert into testGSRetry(col1) values(?)")
///     .await?;
/// prepared.bind(0, 100)?;
/// prepared.add_batch()?;
/// let counts = prepared.execute_batch().await?;
/// assert_eq!(counts, vec![1]);
/// prepared.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct PreparedStatement {
    /// Transport layer for communication
    transport: Arc<Mutex<dyn TransportProtocol>>,
    /// Session the statement was prepared in
    session: Arc<Session>,
    /// SQL text
    sql: String,
    /// Query id of the describe job
    described_job_id: String,
    /// What the server learned while describing
    description: StatementDescription,
    /// Currently bound parameter values
    parameters: Vec<Option<Parameter>>,
    /// Snapshots queued by `add_batch`
    batch: Vec<Vec<Parameter>>,
    /// Query timeout in milliseconds
    timeout_ms: u64,
    /// Whether this prepared statement has been closed
    closed: bool,
}

impl PreparedStatement {
    /// Describe `sql` on the server and return the prepared statement.
    pub(crate) async fn prepare(
        transport: Arc<Mutex<dyn TransportProtocol>>,
        session: Arc<Session>,
        sql: String,
    ) -> Result<Self, QueryError> {
        let result = submit(
            &transport,
            &session,
            QueryRequest::describe(sql.clone()),
            DEFAULT_TIMEOUT_MS,
        )
        .await?;

        let description = result.description().cloned().ok_or_else(|| {
            QueryError::InvalidState("Describe request returned no description".to_string())
        })?;
        debug!(
            query_id = %result.query_id,
            number_of_binds = description.number_of_binds,
            "statement described"
        );

        Ok(Self::new(
            transport,
            session,
            sql,
            result.query_id,
            description,
        ))
    }

    pub(crate) fn new(
        transport: Arc<Mutex<dyn TransportProtocol>>,
        session: Arc<Session>,
        sql: String,
        described_job_id: String,
        description: StatementDescription,
    ) -> Self {
        let num_params = description.number_of_binds;
        Self {
            transport,
            session,
            sql,
            described_job_id,
            description,
            parameters: vec![None; num_params],
            batch: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            closed: false,
        }
    }

    /// Get the SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Get the number of bind variables in this prepared statement.
    pub fn parameter_count(&self) -> usize {
        self.description.number_of_binds
    }

    /// Get the server-side description.
    pub fn description(&self) -> &StatementDescription {
        &self.description
    }

    /// Query id of the describe job.
    pub fn described_job_id(&self) -> &str {
        &self.described_job_id
    }

    /// Number of entries queued for `execute_batch`.
    pub fn batch_size(&self) -> usize {
        self.batch.len()
    }

    /// Set query timeout.
    pub fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    /// Check if the prepared statement has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bind a parameter value at the given index.
    ///
    /// # Arguments
    /// * `index` - Zero-based parameter index
    /// * `value` - Value to bind (must implement Into<Parameter>)
    ///
    /// # Errors
    /// Returns `QueryError::ParameterBindingError` if index is out of bounds.
    pub fn bind(&mut self, index: usize, value: impl Into<Parameter>) -> Result<(), QueryError> {
        if self.closed {
            return Err(QueryError::StatementClosed);
        }
        if index >= self.parameters.len() {
            return Err(QueryError::ParameterBindingError {
                index,
                message: format!(
                    "Parameter index {} out of bounds (statement has {} parameters)",
                    index,
                    self.parameters.len()
                ),
            });
        }
        self.parameters[index] = Some(value.into());
        Ok(())
    }

    /// Clear all bound parameters.
    pub fn clear_parameters(&mut self) {
        for param in &mut self.parameters {
            *param = None;
        }
    }

    /// Queue the current bindings as one batch entry.
    ///
    /// # Errors
    /// Returns `QueryError::ParameterBindingError` if a parameter is unbound.
    pub fn add_batch(&mut self) -> Result<(), QueryError> {
        if self.closed {
            return Err(QueryError::StatementClosed);
        }
        let entry = self
            .parameters
            .iter()
            .enumerate()
            .map(|(index, param)| {
                param.clone().ok_or_else(|| QueryError::ParameterBindingError {
                    index,
                    message: format!("Parameter {} is not bound", index),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.batch.push(entry);
        Ok(())
    }

    /// Drop all queued batch entries.
    pub fn clear_batch(&mut self) {
        self.batch.clear();
    }

    /// Execute all queued entries and return one update count per entry.
    ///
    /// With bind variables the whole batch is sent as one request using
    /// array bindings. Without bind variables the statement runs once per
    /// entry. The queue is emptied before anything is sent, so a batch is
    /// never submitted twice.
    ///
    /// # Errors
    /// - `QueryError::EmptyBatch` if nothing is queued
    /// - `QueryError::BatchFailed` if an entry of an unbound batch fails;
    ///   `completed` entries were applied before it
    pub async fn execute_batch(&mut self) -> Result<Vec<i64>, QueryError> {
        if self.closed {
            return Err(QueryError::StatementClosed);
        }
        if self.batch.is_empty() {
            return Err(QueryError::EmptyBatch);
        }

        let batch = std::mem::take(&mut self.batch);
        let entries = batch.len();

        if self.parameter_count() > 0 {
            let request = self.execute_request().await.with_bindings(array_bindings(&batch));
            let result = submit(&self.transport, &self.session, request, self.timeout_ms).await?;
            let total = affected_rows(&result)?;
            return Ok(update_counts(total, entries));
        }

        let mut counts = Vec::with_capacity(entries);
        for completed in 0..entries {
            let request = self.execute_request().await;
            let outcome = submit(&self.transport, &self.session, request, self.timeout_ms)
                .await
                .and_then(|result| affected_rows(&result));
            match outcome {
                Ok(count) => counts.push(count),
                Err(e) => {
                    return Err(QueryError::BatchFailed {
                        completed,
                        message: e.to_string(),
                    })
                }
            }
        }
        Ok(counts)
    }

    /// Execute the prepared statement once with the current bindings.
    ///
    /// # Errors
    /// Returns an error if:
    /// - Not all parameters are bound
    /// - The statement has been closed
    /// - Execution fails on the server
    pub async fn execute(&mut self) -> Result<ResultSet, QueryError> {
        if self.closed {
            return Err(QueryError::StatementClosed);
        }

        let bindings = scalar_bindings(&self.parameters)?;
        let request = self.execute_request().await.with_bindings(bindings);
        let result = submit(&self.transport, &self.session, request, self.timeout_ms).await?;

        ResultSet::from_transport_result(result)
    }

    /// Execute the prepared statement and return the number of affected rows.
    ///
    /// Use this for INSERT, UPDATE, DELETE statements.
    pub async fn execute_update(&mut self) -> Result<i64, QueryError> {
        let result_set = self.execute().await?;
        if result_set.has_rows() {
            return Err(QueryError::UnexpectedResultSet);
        }
        Ok(result_set.row_count().unwrap_or(0))
    }

    /// Close the prepared statement. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), QueryError> {
        if self.closed {
            return Ok(());
        }
        self.batch.clear();
        self.closed = true;
        Ok(())
    }

    /// Execute-phase request, reusing the described job when the session
    /// has combined describe enabled.
    async fn execute_request(&self) -> QueryRequest {
        let request = QueryRequest::new(self.sql.clone());
        if self.session.combined_describe_enabled().await {
            request.with_described_job(self.described_job_id.clone())
        } else {
            request
        }
    }
}

/// Array bindings: one value per batch entry for every position.
///
/// Positions whose non-null values disagree on type are sent as `TEXT`.
fn array_bindings(batch: &[Vec<Parameter>]) -> BTreeMap<String, BindValue> {
    let width = batch.first().map_or(0, Vec::len);

    (0..width)
        .map(|position| {
            let column = batch.iter().filter_map(|entry| entry.get(position));

            let mut bind_type: Option<&'static str> = None;
            let mut values = Vec::with_capacity(batch.len());
            for param in column {
                if *param != Parameter::Null {
                    bind_type = match bind_type {
                        None => Some(param.bind_type()),
                        Some(seen) if seen == param.bind_type() => Some(seen),
                        Some(_) => Some("TEXT"),
                    };
                }
                values.push(param.to_bind_string());
            }

            (
                (position + 1).to_string(),
                BindValue {
                    bind_type: bind_type.unwrap_or("TEXT").to_string(),
                    value: BindData::Array(values),
                },
            )
        })
        .collect()
}

fn affected_rows(result: &QueryResult) -> Result<i64, QueryError> {
    match &result.payload {
        QueryPayload::RowCount(count) => Ok(*count),
        QueryPayload::Status(_) => Ok(0),
        QueryPayload::ResultSet(_) => Err(QueryError::UnexpectedResultSet),
        QueryPayload::Described(_) => Err(QueryError::InvalidState(
            "Execute request returned a description".to_string(),
        )),
    }
}

/// Spread the server total over `entries`.
fn update_counts(total: i64, entries: usize) -> Vec<i64> {
    if entries == 1 {
        vec![total]
    } else if total == entries as i64 {
        vec![1; entries]
    } else {
        vec![SUCCESS_NO_INFO; entries]
    }
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                sql = %self.sql,
                queued = self.batch.len(),
                "PreparedStatement dropped without calling close()"
            );
        }
    }
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("sql", &self.sql)
            .field("described_job_id", &self.described_job_id)
            .field("parameter_count", &self.parameter_count())
            .field("batch_size", &self.batch.len())
            .field("closed", &self.closed)
            .finish()
    }
}
