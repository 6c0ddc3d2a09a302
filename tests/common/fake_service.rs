//! In-process fake of the query service, built on axum.
//!
//! The fake understands just enough SQL to run the GS retry scenarios
//! against one-column numeric tables: `create or replace table`, `insert`
//! (literal, scalar bind or array bind), `select *`, `drop table` and
//! `alter session set/unset`.
//!
//! Fault injection models a job that has already applied its effects
//! when the service decides, after compilation, to ask the client to
//! retry. The retransmission carries the same `requestId`:
//!
//! - with `ENABLE_FIX_225928` on, the service answers it from the
//!   completed job and nothing runs twice;
//! - with the fix off, the job runs again and the row is duplicated;
//! - an execute that reuses a described job (`describedJobId`) bypasses
//!   the fix and is duplicated as well. The combined-describe scenarios
//!   whose assertions stay disabled depend on this.
//!
//! Two transport conditions can be armed for the next insert: an HTTP
//! status sent after the row is applied, and an in-progress answer whose
//! final result is served from `getResultUrl`.

use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use uuid::Uuid;

const LOGIN_PATH: &str = "/session/v1/login-request";
const QUERY_PATH: &str = "/queries/v1/query-request";
const SESSION_PATH: &str = "/session";
const RESULT_PATH: &str = "/queries/{query_id}/result";

const TOKEN_PREFIX: &str = "Snowflake Token=\"";

const SELECT_TYPE_ID: u64 = 0x1000;
const INSERT_TYPE_ID: u64 = 0x3100;
const ALTER_SESSION_TYPE_ID: u64 = 0x4100;
const DDL_TYPE_ID: u64 = 0x6000;

const GS_RETRY_CODE: &str = "000605";
const IN_PROGRESS_CODE: &str = "333333";
const SESSION_EXPIRED_CODE: &str = "390112";
const LOGIN_FAILED_CODE: &str = "390100";
const OBJECT_NOT_FOUND_CODE: &str = "002003";
const SYNTAX_ERROR_CODE: &str = "001003";

/// One request received on the query endpoint.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub request_id: String,
    pub request_guid: String,
    pub retry: bool,
    pub retry_count: Option<u32>,
    pub retry_reason: Option<String>,
    pub sql: String,
    pub describe_only: bool,
    pub described_job_id: Option<String>,
    pub bindings: Option<Value>,
    /// Query id answered with, absent for retry signals and errors
    pub query_id: Option<String>,
}

#[derive(Debug, Default)]
struct FakeSession {
    id: i64,
    parameters: BTreeMap<String, Value>,
    /// Responses of jobs that ran, by request id
    completed: HashMap<String, Value>,
    /// Request ids a retry was already requested for
    faulted: HashSet<String>,
    next_query: u64,
}

impl FakeSession {
    fn flag(&self, name: &str) -> bool {
        match self.parameters.get(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }

    fn gs_retry_armed(&self) -> bool {
        if !self.flag("ENABLE_QUERY_RETRIES") {
            return false;
        }
        let Some(Value::String(directives)) = self.parameters.get("GS_FAULT_INJECTION") else {
            return false;
        };
        serde_json::from_str::<Vec<Value>>(directives)
            .map(|directives| {
                directives.iter().any(|d| {
                    d["location"] == "JOB_AFTER_COMPILATION" && d["action"] == "GS_RETRY"
                })
            })
            .unwrap_or(false)
    }

    fn next_query_id(&mut self) -> String {
        self.next_query += 1;
        format!("01b0-{:04}-{:06}", self.id, self.next_query)
    }

    fn parameter_entries(&self) -> Value {
        Value::Array(
            self.parameters
                .iter()
                .map(|(name, value)| json!({"name": name, "value": value}))
                .collect(),
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, FakeSession>,
    /// Token of the most recent login
    last_token: Option<String>,
    next_session: i64,
    tables: HashMap<String, Vec<Option<i64>>>,
    executions: Vec<ExecutionRecord>,
    logins: Vec<HashMap<String, String>>,
    logouts: usize,
    retries_requested: usize,
    /// Status to answer the next insert with, after applying it
    fail_next_insert: Option<StatusCode>,
    /// Answer the next insert as still running
    defer_next_insert: bool,
    /// Final responses of deferred queries, by query id
    deferred: HashMap<String, Value>,
    result_polls: usize,
}

type Context = Arc<Mutex<Inner>>;

/// A running fake service bound to a local port.
pub struct FakeService {
    pub base_url: String,
    addr: SocketAddr,
    context: Context,
    handle: JoinHandle<()>,
}

impl FakeService {
    /// Start the service on an ephemeral port of the current runtime.
    pub async fn start() -> FakeService {
        let context: Context = Arc::new(Mutex::new(Inner {
            next_session: 1000,
            ..Inner::default()
        }));

        let router = Router::new()
            .route(LOGIN_PATH, post(handle_login))
            .route(QUERY_PATH, post(handle_query))
            .route(SESSION_PATH, post(handle_logout))
            .route(RESULT_PATH, get(handle_result))
            .with_state(Arc::clone(&context));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake service");
        let addr = listener.local_addr().expect("fake service address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .expect("fake service stopped");
        });

        FakeService {
            base_url: format!("http://{}", addr),
            addr,
            context,
            handle,
        }
    }

    /// Connection string for this service, with short client backoff.
    pub fn connection_string(&self) -> String {
        format!(
            "flurry://tester:secret@{}:{}/TESTDB/PUBLIC?account=acme&warehouse=TESTWH&tls=false&retry_backoff_ms=10",
            self.addr.ip(),
            self.addr.port()
        )
    }

    /// Every request received on the query endpoint, in arrival order.
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.context.lock().unwrap().executions.clone()
    }

    /// Requests on the query endpoint whose SQL contains `needle`.
    pub fn executions_of(&self, needle: &str) -> Vec<ExecutionRecord> {
        let needle = needle.to_ascii_lowercase();
        self.executions()
            .into_iter()
            .filter(|record| record.sql.to_ascii_lowercase().contains(&needle))
            .collect()
    }

    /// Number of retry signals sent.
    pub fn retries_requested(&self) -> usize {
        self.context.lock().unwrap().retries_requested
    }

    /// Contents of a table, or `None` if it does not exist.
    pub fn table(&self, name: &str) -> Option<Vec<Option<i64>>> {
        let inner = self.context.lock().unwrap();
        inner.tables.get(&name.to_ascii_uppercase()).cloned()
    }

    /// A parameter of the most recently opened session, as the service sees it.
    pub fn session_parameter(&self, name: &str) -> Option<Value> {
        let inner = self.context.lock().unwrap();
        let token = inner.last_token.as_ref()?;
        inner
            .sessions
            .get(token)?
            .parameters
            .get(&name.to_ascii_uppercase())
            .cloned()
    }

    /// Query string of every login request.
    pub fn logins(&self) -> Vec<HashMap<String, String>> {
        self.context.lock().unwrap().logins.clone()
    }

    /// Answer the next insert with `status` after it has been applied.
    pub fn fail_next_insert_with(&self, status: u16) {
        let status = StatusCode::from_u16(status).expect("valid status code");
        self.context.lock().unwrap().fail_next_insert = Some(status);
    }

    /// Answer the next insert as in progress; its result is polled.
    pub fn defer_next_insert(&self) {
        self.context.lock().unwrap().defer_next_insert = true;
    }

    /// Number of requests on the result endpoint.
    pub fn result_polls(&self) -> usize {
        self.context.lock().unwrap().result_polls
    }

    pub fn logouts(&self) -> usize {
        self.context.lock().unwrap().logouts
    }

    pub fn open_sessions(&self) -> usize {
        self.context.lock().unwrap().sessions.len()
    }
}

impl Drop for FakeService {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn success(data: Value) -> Json<Value> {
    Json(json!({"data": data, "code": null, "message": null, "success": true}))
}

fn failure(code: &str, message: impl Into<String>, data: Value) -> Json<Value> {
    Json(json!({"data": data, "code": code, "message": message.into(), "success": false}))
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(TOKEN_PREFIX)?
        .strip_suffix('"')
        .map(str::to_string)
}

async fn handle_login(
    State(context): State<Context>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let data = &body["data"];
    let login_name = data["LOGIN_NAME"].as_str().unwrap_or_default();
    let password = data["PASSWORD"].as_str().unwrap_or_default();
    if login_name.is_empty() || password.is_empty() {
        return failure(LOGIN_FAILED_CODE, "Incorrect username or password", Value::Null);
    }

    let mut inner = context.lock().unwrap();
    inner.logins.push(query.clone());
    inner.next_session += 1;
    let id = inner.next_session;

    let mut parameters = BTreeMap::new();
    parameters.insert("AUTOCOMMIT".to_string(), Value::Bool(true));
    if let Some(Value::Object(session_parameters)) = data.get("SESSION_PARAMETERS") {
        for (name, value) in session_parameters {
            parameters.insert(name.to_ascii_uppercase(), value.clone());
        }
    }
    let session = FakeSession {
        id,
        parameters,
        ..FakeSession::default()
    };
    let entries = session.parameter_entries();

    let token = Uuid::new_v4().to_string();
    inner.sessions.insert(token.clone(), session);
    inner.last_token = Some(token.clone());

    success(json!({
        "token": token,
        "masterToken": Uuid::new_v4().to_string(),
        "sessionId": id,
        "parameters": entries,
        "sessionInfo": {
            "databaseName": query.get("databaseName"),
            "schemaName": query.get("schemaName"),
            "warehouseName": query.get("warehouse"),
            "roleName": query.get("roleName"),
        }
    }))
}

async fn handle_logout(
    State(context): State<Context>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    if query.get("delete").map(String::as_str) != Some("true") {
        return failure(SYNTAX_ERROR_CODE, "Unsupported session request", Value::Null);
    }
    let mut inner = context.lock().unwrap();
    if let Some(token) = session_token(&headers) {
        inner.sessions.remove(&token);
    }
    inner.logouts += 1;
    success(Value::Null)
}

async fn handle_query(
    State(context): State<Context>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut guard = context.lock().unwrap();
    let inner = &mut *guard;

    let mut record = ExecutionRecord {
        request_id: query.get("requestId").cloned().unwrap_or_default(),
        request_guid: query.get("request_guid").cloned().unwrap_or_default(),
        retry: query.get("retry").map(String::as_str) == Some("true"),
        retry_count: query.get("retryCount").and_then(|n| n.parse().ok()),
        retry_reason: query.get("retryReason").cloned(),
        sql: body["sqlText"].as_str().unwrap_or_default().to_string(),
        describe_only: body["describeOnly"].as_bool().unwrap_or(false),
        described_job_id: body["describedJobId"].as_str().map(str::to_string),
        bindings: body.get("bindings").cloned(),
        query_id: None,
    };

    let Some(session) = session_token(&headers).and_then(|token| inner.sessions.get_mut(&token))
    else {
        inner.executions.push(record);
        return failure(SESSION_EXPIRED_CODE, "Session no longer exists", Value::Null)
            .into_response();
    };

    let statement = match Statement::parse(&record.sql) {
        Ok(statement) => statement,
        Err(message) => {
            inner.executions.push(record);
            return failure(SYNTAX_ERROR_CODE, message, json!({"sqlState": "42000"}))
                .into_response();
        }
    };

    if record.describe_only {
        let query_id = session.next_query_id();
        record.query_id = Some(query_id.clone());
        let rowtype = match statement {
            Statement::Select { .. } => col1_rowtype(),
            _ => json!([]),
        };
        let response = success(json!({
            "queryId": query_id,
            "statementTypeId": statement.type_id(),
            "numberOfBinds": record.sql.matches('?').count(),
            "rowtype": rowtype,
            "parameters": session.parameter_entries(),
        }));
        inner.executions.push(record);
        return response.into_response();
    }

    if record.retry && session.flag("ENABLE_FIX_225928") && record.described_job_id.is_none() {
        if let Some(response) = session.completed.get(&record.request_id).cloned() {
            record.query_id = response["data"]["queryId"].as_str().map(str::to_string);
            inner.executions.push(record);
            return Json(response).into_response();
        }
    }

    let query_id = session.next_query_id();
    let outcome = statement.run(&mut inner.tables, session, record.bindings.as_ref());
    let response = match outcome {
        Ok(mut data) => {
            data["queryId"] = json!(query_id);
            data["parameters"] = session.parameter_entries();
            json!({"data": data, "code": null, "message": null, "success": true})
        }
        Err((code, message)) => {
            inner.executions.push(record);
            return failure(code, message, json!({"queryId": query_id, "sqlState": "42S02"}))
                .into_response();
        }
    };

    let request_id = record.request_id.clone();
    let is_insert = matches!(statement, Statement::Insert { .. });
    if is_insert && session.gs_retry_armed() && session.faulted.insert(request_id.clone()) {
        session.completed.insert(request_id, response);
        inner.retries_requested += 1;
        inner.executions.push(record);
        return failure(GS_RETRY_CODE, "Query retry requested", json!({"queryId": query_id}))
            .into_response();
    }

    session.completed.insert(request_id, response.clone());
    if is_insert {
        if let Some(status) = inner.fail_next_insert.take() {
            inner.executions.push(record);
            return status.into_response();
        }
        if std::mem::take(&mut inner.defer_next_insert) {
            inner.deferred.insert(query_id.clone(), response);
            record.query_id = Some(query_id.clone());
            inner.executions.push(record);
            return Json(json!({
                "data": {
                    "queryId": query_id,
                    "getResultUrl": format!("/queries/{}/result", query_id),
                },
                "code": IN_PROGRESS_CODE,
                "message": "Query execution in progress",
                "success": true,
            }))
            .into_response();
        }
    }

    record.query_id = Some(query_id);
    inner.executions.push(record);
    Json(response).into_response()
}

async fn handle_result(
    State(context): State<Context>,
    Path(query_id): Path<String>,
    headers: HeaderMap,
) -> Json<Value> {
    let mut inner = context.lock().unwrap();
    inner.result_polls += 1;
    let known = session_token(&headers).is_some_and(|token| inner.sessions.contains_key(&token));
    if !known {
        return failure(SESSION_EXPIRED_CODE, "Session no longer exists", Value::Null);
    }
    match inner.deferred.remove(&query_id) {
        Some(response) => Json(response),
        None => failure(
            OBJECT_NOT_FOUND_CODE,
            format!("Result for query {} not found", query_id),
            Value::Null,
        ),
    }
}

fn col1_rowtype() -> Value {
    json!([{"name": "COL1", "type": "fixed", "nullable": true, "precision": 38, "scale": 0}])
}

/// The statements the fake understands.
#[derive(Debug)]
enum Statement {
    CreateTable { table: String },
    DropTable { table: String, if_exists: bool },
    Insert { table: String, value: String },
    Select { table: String },
    AlterSet { name: String, value: Value },
    AlterUnset { name: String },
}

impl Statement {
    fn parse(sql: &str) -> Result<Statement, String> {
        let sql = sql.trim().trim_end_matches(';').trim();
        let lower = sql.to_ascii_lowercase();

        if let Some(rest) = strip_prefix_ci(sql, &lower, "create or replace table ") {
            return Ok(Statement::CreateTable {
                table: table_name(rest),
            });
        }
        if let Some(rest) = strip_prefix_ci(sql, &lower, "drop table if exists ") {
            return Ok(Statement::DropTable {
                table: table_name(rest),
                if_exists: true,
            });
        }
        if let Some(rest) = strip_prefix_ci(sql, &lower, "drop table ") {
            return Ok(Statement::DropTable {
                table: table_name(rest),
                if_exists: false,
            });
        }
        if let Some(rest) = strip_prefix_ci(sql, &lower, "insert into ") {
            let values_at = rest
                .to_ascii_lowercase()
                .find("values")
                .ok_or_else(|| format!("Missing VALUES clause: {}", sql))?;
            let value = rest[values_at + "values".len()..]
                .trim()
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();
            return Ok(Statement::Insert {
                table: table_name(rest),
                value,
            });
        }
        if let Some(rest) = strip_prefix_ci(sql, &lower, "select * from ") {
            return Ok(Statement::Select {
                table: table_name(rest),
            });
        }
        if let Some(rest) = strip_prefix_ci(sql, &lower, "alter session set ") {
            let (name, literal) = rest
                .split_once('=')
                .ok_or_else(|| format!("Missing value: {}", sql))?;
            return Ok(Statement::AlterSet {
                name: name.trim().to_ascii_uppercase(),
                value: parse_literal(literal.trim()),
            });
        }
        if let Some(rest) = strip_prefix_ci(sql, &lower, "alter session unset ") {
            return Ok(Statement::AlterUnset {
                name: rest.trim().to_ascii_uppercase(),
            });
        }
        Err(format!("SQL compilation error: unsupported statement '{}'", sql))
    }

    fn type_id(&self) -> u64 {
        match self {
            Statement::CreateTable { .. } | Statement::DropTable { .. } => DDL_TYPE_ID,
            Statement::Insert { .. } => INSERT_TYPE_ID,
            Statement::Select { .. } => SELECT_TYPE_ID,
            Statement::AlterSet { .. } | Statement::AlterUnset { .. } => ALTER_SESSION_TYPE_ID,
        }
    }

    /// Apply the statement and return the response data.
    fn run(
        &self,
        tables: &mut HashMap<String, Vec<Option<i64>>>,
        session: &mut FakeSession,
        bindings: Option<&Value>,
    ) -> Result<Value, (&'static str, String)> {
        let not_found = |table: &str| {
            (
                OBJECT_NOT_FOUND_CODE,
                format!("Object '{}' does not exist or not authorized.", table),
            )
        };

        match self {
            Statement::CreateTable { table } => {
                tables.insert(table.clone(), Vec::new());
                Ok(status(
                    self.type_id(),
                    format!("Table {} successfully created.", table),
                ))
            }
            Statement::DropTable { table, if_exists } => {
                if tables.remove(table).is_none() && !if_exists {
                    return Err(not_found(table));
                }
                Ok(status(
                    self.type_id(),
                    format!("{} successfully dropped.", table),
                ))
            }
            Statement::Insert { table, value } => {
                let values = if value == "?" {
                    bound_values(bindings)?
                } else {
                    vec![value.parse::<i64>().ok()]
                };
                let rows = tables.get_mut(table).ok_or_else(|| not_found(table))?;
                let inserted = values.len();
                rows.extend(values);
                Ok(json!({
                    "statementTypeId": self.type_id(),
                    "rowtype": [{"name": "number of rows inserted", "type": "fixed", "nullable": false}],
                    "rowset": [[inserted.to_string()]],
                    "total": 1,
                    "returned": 1,
                }))
            }
            Statement::Select { table } => {
                let rows = tables.get(table).ok_or_else(|| not_found(table))?;
                let rowset: Vec<Value> = rows
                    .iter()
                    .map(|value| json!([value.map(|v| v.to_string())]))
                    .collect();
                Ok(json!({
                    "statementTypeId": self.type_id(),
                    "rowtype": col1_rowtype(),
                    "rowset": rowset,
                    "total": rows.len(),
                    "returned": rows.len(),
                }))
            }
            Statement::AlterSet { name, value } => {
                session.parameters.insert(name.clone(), value.clone());
                Ok(status(
                    self.type_id(),
                    "Statement executed successfully.".to_string(),
                ))
            }
            Statement::AlterUnset { name } => {
                session.parameters.remove(name);
                Ok(status(
                    self.type_id(),
                    "Statement executed successfully.".to_string(),
                ))
            }
        }
    }
}

fn status(type_id: u64, message: String) -> Value {
    json!({
        "statementTypeId": type_id,
        "rowtype": [{"name": "status", "type": "text", "nullable": true, "length": 16777216}],
        "rowset": [[message]],
        "total": 1,
        "returned": 1,
    })
}

/// Values bound to position 1, one per batch row.
fn bound_values(bindings: Option<&Value>) -> Result<Vec<Option<i64>>, (&'static str, String)> {
    let value = bindings
        .and_then(|bindings| bindings.get("1"))
        .map(|binding| &binding["value"])
        .ok_or_else(|| (SYNTAX_ERROR_CODE, "Bind variable 1 not set".to_string()))?;

    let parse = |value: &Value| value.as_str().and_then(|s| s.parse::<i64>().ok());
    Ok(match value {
        Value::Array(values) => values.iter().map(parse).collect(),
        other => vec![parse(other)],
    })
}

fn strip_prefix_ci<'a>(sql: &'a str, lower: &str, prefix: &str) -> Option<&'a str> {
    lower.starts_with(prefix).then(|| &sql[prefix.len()..])
}

fn table_name(rest: &str) -> String {
    rest.split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn parse_literal(literal: &str) -> Value {
    if literal.len() >= 2 && literal.starts_with('\'') && literal.ends_with('\'') {
        return Value::String(unescape_string(&literal[1..literal.len() - 1]));
    }
    match literal.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => literal
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(literal.to_string())),
    }
}

/// Body of a single-quoted literal: `\x` stands for `x`, `''` for `'`.
fn unescape_string(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            '\'' if chars.peek() == Some(&'\'') => {
                chars.next();
                out.push('\'');
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statements() {
        assert!(matches!(
            Statement::parse("create or replace table testGSRetry(col1 number);"),
            Ok(Statement::CreateTable { table }) if table == "TESTGSRETRY"
        ));
        assert!(matches!(
            Statement::parse("insert into testGSRetry(col1) values(?)"),
            Ok(Statement::Insert { table, value }) if table == "TESTGSRETRY" && value == "?"
        ));
        assert!(matches!(
            Statement::parse("insert into testGSRetry values (100)"),
            Ok(Statement::Insert { value, .. }) if value == "100"
        ));
        assert!(matches!(
            Statement::parse("alter session set ENABLE_COMBINED_DESCRIBE=false"),
            Ok(Statement::AlterSet { name, value }) if name == "ENABLE_COMBINED_DESCRIBE" && value == Value::Bool(false)
        ));
        assert!(Statement::parse("merge into t using s on true").is_err());
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("1"), json!(1));
        assert_eq!(parse_literal("'it''s'"), json!("it's"));
        assert_eq!(parse_literal(r#"'{"value":"a\\"b"}'"#), json!(r#"{"value":"a\"b"}"#));
        assert_eq!(parse_literal("TRUE"), json!(true));
    }
}
