//! Session state tracking.
//!
//! This module handles the session lifecycle and keeps a cache of the
//! session parameters the server has reported or the client has changed.

use crate::connection::parameters::{ParameterValue, SessionParameter};
use crate::error::ConnectionError;
use crate::transport::{ParameterEntry, SessionInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is logged in and ready
    Ready,

    /// Session is executing a query
    Executing,

    /// Session is being closed
    Closing,

    /// Session is closed
    Closed,

    /// Session encountered an error
    Error,
}

impl SessionState {
    /// Check if the session is active.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Executing)
    }
}

/// Database session information and state tracking.
pub struct Session {
    /// Server information from login
    info: SessionInfo,

    /// Current session state
    state: RwLock<SessionState>,

    /// Query execution counter
    query_count: AtomicU64,

    /// Session parameters keyed by upper-case name
    parameters: RwLock<HashMap<String, ParameterValue>>,
}

impl Session {
    /// Create a new session from login information.
    pub fn new(info: SessionInfo) -> Self {
        let parameters = info
            .parameters
            .iter()
            .filter_map(|entry| {
                ParameterValue::from_json(&entry.value)
                    .map(|value| (entry.name.to_ascii_uppercase(), value))
            })
            .collect();

        Self {
            info,
            state: RwLock::new(SessionState::Ready),
            query_count: AtomicU64::new(0),
            parameters: RwLock::new(parameters),
        }
    }

    /// Get the session ID.
    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }

    /// Get server information.
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Get current session state.
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Set session state.
    pub async fn set_state(&self, new_state: SessionState) {
        *self.state.write().await = new_state;
    }

    /// Increment query counter.
    pub fn increment_query_count(&self) -> u64 {
        self.query_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Get total query count.
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::SeqCst)
    }

    /// Look up a cached session parameter, ignoring case.
    pub async fn parameter(&self, name: &str) -> Option<ParameterValue> {
        self.parameters
            .read()
            .await
            .get(&name.to_ascii_uppercase())
            .cloned()
    }

    /// Record a parameter the client has set.
    pub async fn set_parameter(&self, name: &str, value: ParameterValue) {
        self.parameters
            .write()
            .await
            .insert(name.to_ascii_uppercase(), value);
    }

    /// Forget a parameter the client has unset.
    pub async fn remove_parameter(&self, name: &str) -> Option<ParameterValue> {
        self.parameters
            .write()
            .await
            .remove(&name.to_ascii_uppercase())
    }

    /// Merge parameters echoed by the server. A `null` value removes the entry.
    pub async fn apply_parameters(&self, entries: &[ParameterEntry]) {
        if entries.is_empty() {
            return;
        }
        let mut parameters = self.parameters.write().await;
        for entry in entries {
            let name = entry.name.to_ascii_uppercase();
            match ParameterValue::from_json(&entry.value) {
                Some(value) => {
                    parameters.insert(name, value);
                }
                None => {
                    parameters.remove(&name);
                }
            }
        }
    }

    /// Whether executes should reuse the job created by the describe phase.
    pub async fn combined_describe_enabled(&self) -> bool {
        self.parameter(SessionParameter::JDBC_ENABLE_COMBINED_DESCRIBE)
            .await
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    /// Close the session.
    pub async fn close(&self) {
        self.set_state(SessionState::Closed).await;
    }

    /// Check if session is closed.
    pub async fn is_closed(&self) -> bool {
        matches!(self.state().await, SessionState::Closed)
    }

    /// Mark session as having an error.
    pub async fn mark_error(&self) {
        self.set_state(SessionState::Error).await;
    }

    /// Validate session is ready for operations.
    pub async fn validate_ready(&self) -> Result<(), ConnectionError> {
        match self.state().await {
            state if state.is_active() => Ok(()),
            SessionState::Error => Err(ConnectionError::InvalidParameter {
                parameter: "session".to_string(),
                message: "Session is in error state".to_string(),
            }),
            _ => Err(ConnectionError::ConnectionClosed),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.info.session_id)
            .field("database", &self.info.database_name)
            .field("schema", &self.info.schema_name)
            .field("query_count", &self.query_count())
            .finish()
    }
}
