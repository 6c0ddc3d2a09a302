//! JSON message types for the query service protocol.
//!
//! Requests and responses follow the REST shape of the service: every
//! response is an envelope `{data, code, message, success}` whose `data`
//! depends on the endpoint.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Query still running, poll `getResultUrl`.
pub const QUERY_IN_PROGRESS_CODE: &str = "333333";

/// Query still running asynchronously, poll `getResultUrl`.
pub const QUERY_IN_PROGRESS_ASYNC_CODE: &str = "333334";

/// Session token expired.
pub const SESSION_EXPIRED_CODE: &str = "390112";

/// The service wants the execute phase retransmitted (GS retry).
pub const QUERY_RETRY_CODE: &str = "000605";

/// Login request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Login payload
    pub data: LoginRequestData,
}

/// Login payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LoginRequestData {
    /// Client application id
    pub client_app_id: String,
    /// Client application version
    pub client_app_version: String,
    /// Account name
    pub account_name: String,
    /// Login name
    pub login_name: String,
    /// Password
    pub password: String,
    /// Session parameters applied at login
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub session_parameters: HashMap<String, serde_json::Value>,
}

impl LoginRequest {
    /// Create a new login request.
    pub fn new(account: String, username: String, password: String) -> Self {
        Self {
            data: LoginRequestData {
                client_app_id: "flurry".to_string(),
                client_app_version: env!("CARGO_PKG_VERSION").to_string(),
                account_name: account,
                login_name: username,
                password,
                session_parameters: HashMap::new(),
            },
        }
    }

    /// Add a session parameter applied at login.
    pub fn with_session_parameter(mut self, name: &str, value: serde_json::Value) -> Self {
        self.data
            .session_parameters
            .insert(name.to_string(), value);
        self
    }
}

/// Generic response envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response<T> {
    /// Payload, absent on some errors
    pub data: Option<T>,
    /// Error or status code
    pub code: Option<String>,
    /// Error message
    pub message: Option<String>,
    /// Whether the request succeeded
    #[serde(default)]
    pub success: bool,
}

/// Login response.
pub type LoginResponse = Response<LoginResponseData>;

/// Query response.
pub type QueryResponse = Response<QueryResponseData>;

/// Login response data.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponseData {
    /// Session token
    pub token: String,
    /// Token used to renew the session token
    pub master_token: Option<String>,
    /// Session id
    pub session_id: Option<i64>,
    /// Session parameters
    #[serde(default)]
    pub parameters: Vec<ParameterEntry>,
    /// Session context
    pub session_info: Option<SessionInfoData>,
}

/// Session context returned at login.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoData {
    pub database_name: Option<String>,
    pub schema_name: Option<String>,
    pub warehouse_name: Option<String>,
    pub role_name: Option<String>,
}

/// A `{name, value}` parameter entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    /// Parameter name
    pub name: String,
    /// Parameter value
    pub value: serde_json::Value,
}

impl ParameterEntry {
    /// Create a new parameter entry.
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Query request body.
///
/// `describe_only` selects the prepare phase. The execute phase may carry
/// `described_job_id` to reuse the job compiled during prepare.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// SQL text
    pub sql_text: String,
    /// Submit without waiting for completion
    pub async_exec: bool,
    /// Per-session sequence number of the logical request
    pub sequence_id: u64,
    /// Submission time in epoch milliseconds
    pub query_submission_time: i64,
    /// Only compile and describe the statement
    pub describe_only: bool,
    /// Job compiled by an earlier describe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub described_job_id: Option<String>,
    /// Bind values keyed by 1-based position
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bindings: Option<BTreeMap<String, BindValue>>,
    /// Statement-level parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<HashMap<String, serde_json::Value>>,
    /// Driver-internal statement
    pub is_internal: bool,
}

impl QueryRequest {
    /// Create a new execute request.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql_text: sql.into(),
            async_exec: false,
            sequence_id: 0,
            query_submission_time: epoch_millis(),
            describe_only: false,
            described_job_id: None,
            bindings: None,
            parameters: None,
            is_internal: false,
        }
    }

    /// Create a describe-only (prepare) request.
    pub fn describe(sql: impl Into<String>) -> Self {
        Self {
            describe_only: true,
            ..Self::new(sql)
        }
    }

    /// Reuse a previously described job.
    pub fn with_described_job(mut self, query_id: impl Into<String>) -> Self {
        self.described_job_id = Some(query_id.into());
        self
    }

    /// Attach bindings.
    pub fn with_bindings(mut self, bindings: BTreeMap<String, BindValue>) -> Self {
        if !bindings.is_empty() {
            self.bindings = Some(bindings);
        }
        self
    }

    /// Add a statement-level parameter.
    pub fn with_parameter(mut self, name: &str, value: serde_json::Value) -> Self {
        self.parameters
            .get_or_insert_with(HashMap::new)
            .insert(name.to_string(), value);
        self
    }
}

fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// A single binding: wire type plus one value or one value per batch row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindValue {
    /// Wire type (`FIXED`, `TEXT`, ...)
    #[serde(rename = "type")]
    pub bind_type: String,
    /// Value(s) rendered as strings, NULL as JSON null
    pub value: BindData,
}

/// Scalar or array binding payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindData {
    /// One row per value (array binding)
    Array(Vec<Option<String>>),
    /// Single value
    Scalar(Option<String>),
}

impl BindData {
    /// Number of rows carried by this binding.
    pub fn len(&self) -> usize {
        match self {
            BindData::Array(values) => values.len(),
            BindData::Scalar(_) => 1,
        }
    }

    /// Whether the binding carries no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Query response data.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponseData {
    /// Session parameters echoed by the service
    #[serde(default)]
    pub parameters: Vec<ParameterEntry>,
    /// Column metadata
    #[serde(default)]
    pub rowtype: Vec<ColumnInfo>,
    /// Rows, values as strings
    #[serde(default)]
    pub rowset: Vec<Vec<Option<String>>>,
    /// Total rows of the result
    pub total: Option<i64>,
    /// Rows included in this response
    pub returned: Option<i64>,
    /// Server-side query id
    pub query_id: Option<String>,
    /// Statement type id
    pub statement_type_id: Option<u64>,
    /// Number of bind placeholders
    pub number_of_binds: Option<usize>,
    /// Polling URL while the query is in progress
    pub get_result_url: Option<String>,
    /// SQL state on error
    pub sql_state: Option<String>,
}

/// Column metadata from `rowtype`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Type name (`fixed`, `text`, ...)
    #[serde(rename = "type")]
    pub type_name: String,
    /// Nullable column
    #[serde(default)]
    pub nullable: bool,
    /// Precision (numeric types)
    pub precision: Option<i64>,
    /// Scale (numeric and time types)
    pub scale: Option<i64>,
    /// Length in characters (text types)
    pub length: Option<i64>,
}

impl ColumnInfo {
    /// Create column metadata with just name and type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            precision: None,
            scale: None,
            length: None,
        }
    }
}

/// Statement type id reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementTypeId(pub u64);

impl StatementTypeId {
    pub const SELECT: StatementTypeId = StatementTypeId(0x1000);
    pub const DML: StatementTypeId = StatementTypeId(0x3000);
    pub const INSERT: StatementTypeId = StatementTypeId(0x3100);
    pub const UPDATE: StatementTypeId = StatementTypeId(0x3200);
    pub const DELETE: StatementTypeId = StatementTypeId(0x3300);
    pub const MERGE: StatementTypeId = StatementTypeId(0x3400);
    pub const MULTI_TABLE_INSERT: StatementTypeId = StatementTypeId(0x3500);
    pub const SCL: StatementTypeId = StatementTypeId(0x4000);
    pub const ALTER_SESSION: StatementTypeId = StatementTypeId(0x4100);
    pub const DDL: StatementTypeId = StatementTypeId(0x6000);
    pub const UNKNOWN: StatementTypeId = StatementTypeId(0);

    /// INSERT, UPDATE, DELETE, MERGE and multi-table insert.
    pub fn is_dml(self) -> bool {
        (0x3000..0x4000).contains(&self.0)
    }

    /// Queries producing a result set.
    pub fn is_select(self) -> bool {
        (0x1000..0x2000).contains(&self.0)
    }

    /// Data definition statements.
    pub fn is_ddl(self) -> bool {
        (0x6000..0x7000).contains(&self.0)
    }
}

impl From<Option<u64>> for StatementTypeId {
    fn from(id: Option<u64>) -> Self {
        id.map(StatementTypeId).unwrap_or(StatementTypeId::UNKNOWN)
    }
}

/// Session information returned after successful login.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id
    pub session_id: String,
    /// Current database
    pub database_name: Option<String>,
    /// Current schema
    pub schema_name: Option<String>,
    /// Current warehouse
    pub warehouse_name: Option<String>,
    /// Current role
    pub role_name: Option<String>,
    /// Session parameters at login
    pub parameters: Vec<ParameterEntry>,
}

impl From<LoginResponseData> for SessionInfo {
    fn from(data: LoginResponseData) -> Self {
        let info = data.session_info.unwrap_or_default();
        Self {
            session_id: data
                .session_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            database_name: info.database_name,
            schema_name: info.schema_name,
            warehouse_name: info.warehouse_name,
            role_name: info.role_name,
            parameters: data.parameters,
        }
    }
}

/// Result data containing rows and metadata.
#[derive(Debug, Clone, Default)]
pub struct ResultData {
    /// Column metadata
    pub columns: Vec<ColumnInfo>,
    /// Data rows
    pub rows: Vec<Vec<Option<String>>>,
    /// Total number of rows
    pub total_rows: i64,
}

/// What the prepare phase learned about a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementDescription {
    /// Statement type
    pub statement_type: StatementTypeId,
    /// Number of bind placeholders
    pub number_of_binds: usize,
    /// Result columns (empty for DML)
    pub columns: Vec<ColumnInfo>,
}
