//! Transport layer for query service communication.
//!
//! This module provides the transport protocol abstraction and the HTTP
//! implementation used to talk to the service.
//!
//! # Architecture
//!
//! The transport layer is organized into:
//! - `protocol` - Transport protocol trait definition
//! - `messages` - Protocol message types
//! - `retry` - Retransmission policy
//! - `http` - HTTP transport implementation
//!
//! # Example
//!
//! ```no_run
//! use flurry::transport::{
//!     HttpTransport, TransportProtocol, ConnectionParams, Credentials, QueryRequest
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut transport = HttpTransport::new();
//!
//! let params = ConnectionParams::new("acme.example.com".to_string(), 443);
//! transport.connect(&params).await?;
//!
//! let credentials = Credentials::new(
//!     "acme".to_string(),
//!     "tester".to_string(),
//!     "secret".to_string(),
//! );
//! let session = transport.authenticate(&credentials).await?;
//! println!("Session: {}", session.session_id);
//!
//! let result = transport.execute_query(QueryRequest::new("select 1")).await?;
//! println!("Query id: {}", result.query_id);
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod http;
pub mod messages;
pub mod protocol;
pub mod retry;

// Re-export commonly used types
pub use http::HttpTransport;
pub use messages::{
    BindData, BindValue, ColumnInfo, ParameterEntry, QueryRequest, ResultData, SessionInfo,
    StatementDescription, StatementTypeId,
};
pub use protocol::{ConnectionParams, Credentials, QueryPayload, QueryResult, TransportProtocol};
pub use retry::{RetryPolicy, RetryState};
