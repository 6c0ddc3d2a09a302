//! GS retry scenarios shared by the live and the fake-service suites.
//!
//! Scenario bodies return what they observed instead of asserting, so the
//! calling test can always run [`teardown`] before checking the outcome.

use flurry::connection::SessionParameter;
use flurry::{Connection, DriverError, FaultInjection, PreparedStatement, QueryError};

pub const CREATE_TABLE: &str = "create or replace table testGSRetry(col1 number)";
pub const INSERT_LITERAL: &str = "insert into testGSRetry values (100)";
pub const INSERT_BOUND: &str = "insert into testGSRetry(col1) values(?)";
pub const SELECT_ALL: &str = "select * from testGSRetry";
pub const DROP_TABLE: &str = "drop table testGSRetry";

pub const EXPECTED_VALUE: i64 = 100;

/// Update count and table contents after one GS retry pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassOutcome {
    pub update_count: i64,
    pub values: Vec<i64>,
}

/// Session configuration for a GS retry pass, in a fixed order.
pub async fn configure_gs_retry(
    connection: &Connection,
    use_combined_describe: bool,
) -> Result<(), DriverError> {
    connection
        .set_session_parameter(SessionParameter::ENABLE_QUERY_RETRIES, true)
        .await?;
    connection
        .set_session_parameter(
            SessionParameter::ENABLE_COMBINED_DESCRIBE,
            use_combined_describe,
        )
        .await?;
    connection
        .set_session_parameter(
            SessionParameter::JDBC_ENABLE_COMBINED_DESCRIBE,
            use_combined_describe,
        )
        .await?;
    connection
        .set_session_parameter(SessionParameter::QUERY_RETRY_ALLOW_SNOWFLAKE_QUERIES, true)
        .await?;
    connection
        .set_session_parameter(SessionParameter::QUERY_RETRY_MAX_ATTEMPTS, 1)
        .await?;
    connection
        .set_fault_injection(&[FaultInjection::gs_retry_after_compilation()])
        .await
}

/// Queue the current bindings and execute the batch under an injected GS
/// retry. `GS_FAULT_INJECTION` is unset on every exit path.
///
/// Returns the first update count.
pub async fn execute_batch_with_gs_retry(
    connection: &Connection,
    prepared: &mut PreparedStatement,
    use_combined_describe: bool,
) -> Result<i64, DriverError> {
    let outcome = run_batch(connection, prepared, use_combined_describe).await;
    let cleared = connection.clear_fault_injection().await;

    let update_count = outcome?;
    cleared?;
    Ok(update_count)
}

async fn run_batch(
    connection: &Connection,
    prepared: &mut PreparedStatement,
    use_combined_describe: bool,
) -> Result<i64, DriverError> {
    configure_gs_retry(connection, use_combined_describe).await?;

    prepared.add_batch()?;
    let counts = prepared.execute_batch().await?;
    counts
        .first()
        .copied()
        .ok_or_else(|| QueryError::InvalidState("Batch returned no update counts".into()).into())
}

/// Values of `col1`, in table order.
pub async fn table_values(connection: &Connection) -> Result<Vec<i64>, DriverError> {
    connection
        .query(SELECT_ALL)
        .await?
        .iter()
        .map(|row| row.get_i64(0).map_err(DriverError::from))
        .collect()
}

/// Recreate the table, prepare `sql`, optionally bind the first parameter,
/// and run one GS retry pass.
pub async fn gs_retry_pass(
    connection: &Connection,
    sql: &str,
    bind: Option<i64>,
    use_combined_describe: bool,
) -> Result<PassOutcome, DriverError> {
    connection.execute_update(CREATE_TABLE).await?;

    let mut prepared = connection.prepare(sql).await?;
    let outcome = match bind.map(|value| prepared.bind(0, value)).transpose() {
        Ok(_) => execute_batch_with_gs_retry(connection, &mut prepared, use_combined_describe).await,
        Err(e) => Err(e.into()),
    };
    prepared.close().await?;

    Ok(PassOutcome {
        update_count: outcome?,
        values: table_values(connection).await?,
    })
}

/// DML without bind variables: one pass without and one with combined
/// describe.
pub async fn dml_without_binds(connection: &Connection) -> Result<Vec<PassOutcome>, DriverError> {
    connection
        .set_session_parameter(SessionParameter::ENABLE_FIX_225928, true)
        .await?;

    let plain = gs_retry_pass(connection, INSERT_LITERAL, None, false).await?;
    let combined = gs_retry_pass(connection, INSERT_LITERAL, None, true).await?;
    Ok(vec![plain, combined])
}

/// DML with a bound parameter, without combined describe.
pub async fn dml_with_binds(connection: &Connection) -> Result<PassOutcome, DriverError> {
    connection
        .set_session_parameter(SessionParameter::ENABLE_FIX_225928, true)
        .await?;

    gs_retry_pass(connection, INSERT_BOUND, Some(EXPECTED_VALUE), false).await
}

/// Drop the table and close the connection.
///
/// The connection is closed even if the drop fails; the first error wins.
pub async fn teardown(connection: &Connection) -> Result<(), DriverError> {
    let dropped = connection.execute_update(DROP_TABLE).await;
    let closed = connection.close().await;

    dropped?;
    closed?;
    Ok(())
}
