//! Driver metadata and entry point.

use crate::client::Database;
use crate::error::ConnectionError;
use std::str::FromStr;

/// Driver metadata and factory for `Database` instances.
#[derive(Debug, Clone)]
pub struct Driver {
    name: String,
    version: String,
    vendor: String,
    description: String,
}

impl Driver {
    pub fn new() -> Self {
        Self {
            name: "flurry".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            vendor: "flurry contributors".to_string(),
            description: "Async client driver for a JSON-over-HTTPS SQL query service"
                .to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Parse a connection string into a `Database`.
    ///
    /// # Example
    ///
    /// ```
    /// use flurry::Driver;
    ///
    /// let database = Driver::new().open("flurry://tester@acme.example.com")?;
    /// assert_eq!(database.params().port, 443);
    /// # Ok::<(), flurry::ConnectionError>(())
    /// ```
    pub fn open(&self, connection_string: &str) -> Result<Database, ConnectionError> {
        Database::from_str(connection_string)
    }

    pub fn validate_connection_string(&self, connection_string: &str) -> bool {
        Database::from_str(connection_string).is_ok()
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{} ({})", self.name, self.version, self.vendor)
    }
}
