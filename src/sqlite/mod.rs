// SQLite backend
//
// - connection: driver handle, transactions, blocking-pool execution
// - params: placeholder resolution and value conversion
// - query: result extraction into a DataTable
//
// SQLite has no stored procedures, so parameter derivation stays unsupported.

pub mod connection;
pub mod params;
pub mod query;

use async_trait::async_trait;

use crate::error::{Result, SqlCommandError};
use crate::provider::{DbConnection, NativeCommand, Provider};
use crate::types::BackendKind;

pub use connection::SqliteConnection;
pub use params::Params;
pub use query::build_data_table;

/// Provider for a `SQLite` database file (or `:memory:`, or a `file:` URI).
///
/// Every connection opens its own handle, so `:memory:` gives each call a
/// fresh, empty database.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    connection_string: String,
}

impl SqliteProvider {
    /// # Errors
    /// Returns `SqlCommandError::ArgumentError` for an empty connection string.
    pub fn new(connection_string: impl Into<String>) -> Result<Self> {
        let connection_string = connection_string.into();
        if connection_string.trim().is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "sqlite connection string is empty".into(),
            ));
        }
        Ok(Self { connection_string })
    }
}

#[async_trait]
impl Provider for SqliteProvider {
    fn backend_name(&self) -> &str {
        BackendKind::Sqlite.identifier()
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn create_connection(&self) -> Result<Box<dyn DbConnection>> {
        Ok(Box::new(SqliteConnection::new(self.connection_string.clone())))
    }

    // Always detach, whatever the directions. SQLite has no output parameters
    // so nothing readable is lost.
    fn clear_command(&self, command: &mut NativeCommand) {
        command.parameters.clear();
    }
}
