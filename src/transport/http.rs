//! HTTP transport implementation.
//!
//! Every logical query is posted to `/queries/v1/query-request` with a
//! `requestId` that stays fixed for all of its retransmissions, while each
//! transmission gets a fresh `request_guid`. Retransmissions are flagged
//! with `retry=true` and `retryCount` so the service can recognise a job it
//! has already run and answer from it instead of running it again.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::TransportError;

use super::messages::{
    LoginRequest, LoginResponse, QueryRequest, QueryResponse, QueryResponseData, Response,
    ResultData, SessionInfo, StatementDescription, StatementTypeId, QUERY_IN_PROGRESS_ASYNC_CODE,
    QUERY_IN_PROGRESS_CODE, QUERY_RETRY_CODE, SESSION_EXPIRED_CODE,
};
use super::protocol::{ConnectionParams, Credentials, QueryResult, TransportProtocol};
use super::retry::{RetryPolicy, RetryState};

const LOGIN_PATH: &str = "/session/v1/login-request";
const QUERY_PATH: &str = "/queries/v1/query-request";
const SESSION_PATH: &str = "/session";
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// HTTP transport implementation.
pub struct HttpTransport {
    /// HTTP client (None if not connected)
    client: Option<reqwest::Client>,
    /// `scheme://host:port` of the service
    base_url: String,
    /// Session token (None if not authenticated)
    token: Option<String>,
    /// Current session information
    session_info: Option<SessionInfo>,
    /// Retransmission policy
    retry: RetryPolicy,
    /// Sequence number of the last logical request
    sequence_id: u64,
    /// Connection state
    state: ConnectionState,
}

/// Connection state tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Client built, not logged in
    Connected,
    /// Logged in
    Authenticated,
    /// Session deleted
    Closed,
}

impl HttpTransport {
    /// Create a new HTTP transport.
    pub fn new() -> Self {
        Self {
            client: None,
            base_url: String::new(),
            token: None,
            session_info: None,
            retry: RetryPolicy::default(),
            sequence_id: 0,
            state: ConnectionState::Disconnected,
        }
    }

    fn client(&self) -> Result<&reqwest::Client, TransportError> {
        self.client
            .as_ref()
            .ok_or_else(|| TransportError::ProtocolError("Not connected".to_string()))
    }

    fn authorization(&self) -> Result<String, TransportError> {
        self.token
            .as_ref()
            .map(|token| format!("Snowflake Token=\"{}\"", token))
            .ok_or_else(|| TransportError::ProtocolError("Not authenticated".to_string()))
    }

    /// Post `body` under one request id, retransmitting per the retry policy.
    async fn post_with_retry<B, R>(
        &self,
        path: &str,
        body: &B,
        authorization: Option<&str>,
    ) -> Result<Response<R>, TransportError>
    where
        B: serde::Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let client = self.client()?;
        let url = format!("{}{}", self.base_url, path);
        let request_id = Uuid::new_v4();

        self.retry
            .run(|state: RetryState| {
                let url = &url;
                async move {
                    let mut query = vec![
                        ("requestId", request_id.to_string()),
                        ("request_guid", Uuid::new_v4().to_string()),
                    ];
                    if state.is_retry() {
                        query.push(("retry", "true".to_string()));
                        query.push(("retryCount", state.attempt.to_string()));
                        if let Some(reason) = state.reason {
                            query.push(("retryReason", reason));
                        }
                    }
                    debug!(%request_id, attempt = state.attempt, path, "posting request");

                    let mut request = client.post(url.as_str()).query(&query).json(body);
                    if let Some(authorization) = authorization {
                        request = request.header(AUTHORIZATION, authorization);
                    }
                    let envelope: Response<R> = read_envelope(request.send().await?).await?;

                    if envelope.code.as_deref() == Some(QUERY_RETRY_CODE) {
                        return Err(TransportError::RetryRequested {
                            code: QUERY_RETRY_CODE.to_string(),
                        });
                    }
                    Ok(envelope)
                }
            })
            .await
    }

    /// Poll `getResultUrl` until the query leaves the in-progress state.
    async fn poll_result(&self, mut envelope: QueryResponse) -> Result<QueryResponse, TransportError> {
        let client = self.client()?;
        let authorization = self.authorization()?;

        while matches!(
            envelope.code.as_deref(),
            Some(QUERY_IN_PROGRESS_CODE) | Some(QUERY_IN_PROGRESS_ASYNC_CODE)
        ) {
            let path = envelope
                .data
                .as_ref()
                .and_then(|data| data.get_result_url.clone())
                .ok_or_else(|| {
                    TransportError::InvalidResponse("In-progress response without result URL".to_string())
                })?;
            tokio::time::sleep(RESULT_POLL_INTERVAL).await;

            let url = format!("{}{}", self.base_url, path);
            envelope = self
                .retry
                .run(|_| {
                    let url = &url;
                    let authorization = &authorization;
                    async move {
                        let request = client
                            .get(url.as_str())
                            .header(AUTHORIZATION, authorization.as_str());
                        read_envelope(request.send().await?).await
                    }
                })
                .await?;
        }

        Ok(envelope)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn an HTTP response into a response envelope.
async fn read_envelope<R: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Response<R>, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::HttpStatus {
            status: status.as_u16(),
        });
    }
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

/// Check an envelope and return its data.
fn check_envelope<T>(envelope: Response<T>) -> Result<T, TransportError>
where
    T: HasSqlState,
{
    if envelope.code.as_deref() == Some(SESSION_EXPIRED_CODE) {
        return Err(TransportError::SessionExpired);
    }
    if !envelope.success {
        return Err(TransportError::ServerError {
            code: envelope.code.unwrap_or_else(|| "unknown".to_string()),
            sql_state: envelope.data.as_ref().and_then(HasSqlState::sql_state),
            message: envelope
                .message
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }
    envelope
        .data
        .ok_or_else(|| TransportError::InvalidResponse("Missing response data".to_string()))
}

trait HasSqlState {
    fn sql_state(&self) -> Option<String>;
}

impl HasSqlState for QueryResponseData {
    fn sql_state(&self) -> Option<String> {
        self.sql_state.clone()
    }
}

impl HasSqlState for super::messages::LoginResponseData {
    fn sql_state(&self) -> Option<String> {
        None
    }
}

/// Login path carrying the requested database, schema, warehouse and role.
fn login_path(credentials: &Credentials) -> String {
    let query = credentials
        .login_query()
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(&value)))
        .collect::<Vec<_>>();
    if query.is_empty() {
        LOGIN_PATH.to_string()
    } else {
        format!("{}?{}", LOGIN_PATH, query.join("&"))
    }
}

/// Interpret query response data for the phase that produced it.
pub(crate) fn into_query_result(
    describe_only: bool,
    data: QueryResponseData,
) -> Result<QueryResult, TransportError> {
    let query_id = data.query_id.clone().unwrap_or_default();
    let statement_type = StatementTypeId::from(data.statement_type_id);
    let parameters = data.parameters;

    let result = if describe_only {
        QueryResult::described(
            query_id,
            StatementDescription {
                statement_type,
                number_of_binds: data.number_of_binds.unwrap_or(0),
                columns: data.rowtype,
            },
        )
    } else if statement_type.is_dml() {
        QueryResult::row_count(query_id, affected_rows(&data.rowset)?)
    } else if statement_type.is_select() || statement_type == StatementTypeId::UNKNOWN {
        let total_rows = data.total.unwrap_or(data.rowset.len() as i64);
        QueryResult::result_set(
            query_id,
            ResultData {
                columns: data.rowtype,
                rows: data.rowset,
                total_rows,
            },
        )
    } else {
        let message = data
            .rowset
            .first()
            .and_then(|row| row.first().cloned().flatten())
            .unwrap_or_default();
        QueryResult::status(query_id, message)
    };

    Ok(result.with_parameters(parameters))
}

/// DML results come back as one row with a count per target
/// (inserted, updated, deleted, ...); the affected row count is their sum.
fn affected_rows(rowset: &[Vec<Option<String>>]) -> Result<i64, TransportError> {
    let Some(row) = rowset.first() else {
        return Ok(0);
    };
    row.iter().flatten().try_fold(0i64, |total, value| {
        value
            .parse::<i64>()
            .map(|count| total + count)
            .map_err(|_| TransportError::InvalidResponse(format!("Invalid DML count: {}", value)))
    })
}

#[async_trait]
impl TransportProtocol for HttpTransport {
    async fn connect(&mut self, params: &ConnectionParams) -> Result<(), TransportError> {
        if self.state != ConnectionState::Disconnected {
            return Err(TransportError::ProtocolError(
                "Already connected".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(params.timeout())
            .timeout(Duration::from_millis(params.network_timeout_ms))
            .danger_accept_invalid_certs(!params.validate_server_certificate)
            .build()
            .map_err(|e| TransportError::HttpError(e.to_string()))?;

        self.client = Some(client);
        self.base_url = params.base_url();
        self.retry = params.retry.clone();
        self.state = ConnectionState::Connected;

        Ok(())
    }

    async fn authenticate(
        &mut self,
        credentials: &Credentials,
    ) -> Result<SessionInfo, TransportError> {
        if self.state != ConnectionState::Connected {
            return Err(TransportError::ProtocolError(
                "Must connect before authenticating".to_string(),
            ));
        }

        let request = credentials.session_parameters.iter().fold(
            LoginRequest::new(
                credentials.account.clone(),
                credentials.username.clone(),
                credentials.password.clone(),
            ),
            |request, (name, value)| {
                request.with_session_parameter(name, serde_json::Value::String(value.clone()))
            },
        );
        let path = login_path(credentials);
        let response: LoginResponse = self.post_with_retry(&path, &request, None).await?;
        let data = check_envelope(response)?;

        self.token = Some(data.token.clone());
        let session_info: SessionInfo = data.into();
        self.session_info = Some(session_info.clone());
        self.state = ConnectionState::Authenticated;

        Ok(session_info)
    }

    async fn execute_query(&mut self, mut request: QueryRequest) -> Result<QueryResult, TransportError> {
        if self.state != ConnectionState::Authenticated {
            return Err(TransportError::ProtocolError(
                "Must authenticate before executing queries".to_string(),
            ));
        }

        self.sequence_id += 1;
        request.sequence_id = self.sequence_id;
        debug!(
            sequence_id = request.sequence_id,
            describe_only = request.describe_only,
            "submitting query"
        );

        let authorization = self.authorization()?;
        let envelope: QueryResponse = self
            .post_with_retry(QUERY_PATH, &request, Some(authorization.as_str()))
            .await?;
        let envelope = self.poll_result(envelope).await?;

        into_query_result(request.describe_only, check_envelope(envelope)?)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.state == ConnectionState::Disconnected || self.state == ConnectionState::Closed {
            return Ok(());
        }

        if self.state == ConnectionState::Authenticated {
            let authorization = self.authorization()?;
            let client = self.client()?;
            let response = client
                .post(format!("{}{}", self.base_url, SESSION_PATH))
                .query(&[("delete", "true")])
                .header(AUTHORIZATION, authorization)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(TransportError::HttpStatus {
                    status: response.status().as_u16(),
                });
            }
        }

        self.client = None;
        self.token = None;
        self.session_info = None;
        self.state = ConnectionState::Closed;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Authenticated
        )
    }
}
