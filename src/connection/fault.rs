//! Server-side fault-injection directives.
//!
//! A directive is attached to a session through the `GS_FAULT_INJECTION`
//! parameter, whose value is a JSON array of directives.

use serde::{Deserialize, Serialize};

use crate::error::ConversionError;

/// Job stage right after compilation.
pub const JOB_AFTER_COMPILATION: &str = "JOB_AFTER_COMPILATION";

/// Make the server ask the client to retry the job.
pub const GS_RETRY: &str = "GS_RETRY";

/// One fault-injection directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInjection {
    pub location: String,
    pub action: String,
    pub id: Option<String>,
    pub value: Option<String>,
}

impl FaultInjection {
    pub fn new(location: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            action: action.into(),
            id: None,
            value: None,
        }
    }

    /// Retry requested by the server after the job has been compiled.
    pub fn gs_retry_after_compilation() -> Self {
        Self::new(JOB_AFTER_COMPILATION, GS_RETRY)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Parameter value for a list of directives.
    pub fn to_parameter_value(directives: &[FaultInjection]) -> Result<String, ConversionError> {
        serde_json::to_string(directives).map_err(|e| ConversionError::InvalidFormat(e.to_string()))
    }

    /// Parse a parameter value back into directives.
    pub fn parse_parameter_value(value: &str) -> Result<Vec<FaultInjection>, ConversionError> {
        serde_json::from_str(value).map_err(|e| ConversionError::InvalidFormat(e.to_string()))
    }
}
