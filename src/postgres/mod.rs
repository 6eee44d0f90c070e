// PostgreSQL backend
//
// - connection: client lifecycle, transactions, procedure calls
// - params: DbValue -> ToSql conversion
// - query: result extraction and parameter metadata

pub mod connection;
pub mod params;
pub mod query;

use async_trait::async_trait;

use crate::command::CommandType;
use crate::error::{Result, SqlCommandError};
use crate::parameter::Parameter;
use crate::provider::{ConnectionState, DbConnection, NativeCommand, Provider};
use crate::types::{BackendKind, DbValue};

pub use connection::PostgresConnection;
pub use params::Params;
pub use query::{RETURN_VALUE_NAME, build_data_table, postgres_extract_value};

/// Provider for a `PostgreSQL` server. The connection string is anything
/// `tokio_postgres::Config` parses (`host=... user=...` or a `postgres://` URL).
#[derive(Debug, Clone)]
pub struct PostgresProvider {
    connection_string: String,
}

impl PostgresProvider {
    /// # Errors
    /// Returns `SqlCommandError::ArgumentError` for an empty connection string,
    /// or `SqlCommandError::PostgresError` if it can't be parsed.
    pub fn new(connection_string: impl Into<String>) -> Result<Self> {
        let connection_string = connection_string.into();
        if connection_string.trim().is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "postgres connection string is empty".into(),
            ));
        }
        connection_string.parse::<tokio_postgres::Config>()?;
        Ok(Self { connection_string })
    }
}

/// Split `schema.name`; an unqualified name has no schema.
fn split_qualified(procedure: &str) -> (Option<&str>, &str) {
    match procedure.rsplit_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, procedure),
    }
}

#[async_trait]
impl Provider for PostgresProvider {
    fn backend_name(&self) -> &str {
        BackendKind::Postgres.identifier()
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn create_connection(&self) -> Result<Box<dyn DbConnection>> {
        Ok(Box::new(PostgresConnection::new(self.connection_string.clone())))
    }

    async fn derive_parameters(
        &self,
        conn: &mut dyn DbConnection,
        command: &mut NativeCommand,
    ) -> Result<()> {
        if conn.state() != ConnectionState::Open {
            return Err(SqlCommandError::InvalidState(
                "parameter discovery needs an open connection".into(),
            ));
        }
        let (schema, name) = split_qualified(&command.command_text);
        let mut lookup = NativeCommand::new(CommandType::Text, query::DERIVE_PARAMETERS_SQL);
        lookup.parameters = vec![
            Parameter::new("name", Some(DbValue::Text(name.to_owned()))),
            Parameter::new("schema", schema.map(|s| DbValue::Text(s.to_owned()))),
        ];
        let metadata = conn.execute_query(&lookup).await?;
        command.parameters = query::shapes_from_metadata(&command.command_text, &metadata)?;
        tracing::debug!(
            procedure = %command.command_text,
            count = command.parameters.len(),
            "derived procedure parameters"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unparseable_connection_strings() {
        assert!(matches!(
            PostgresProvider::new(""),
            Err(SqlCommandError::ArgumentError(_))
        ));
        assert!(PostgresProvider::new("host=localhost user=postgres").is_ok());
        assert!(PostgresProvider::new("postgres://user@localhost/db").is_ok());
    }

    #[test]
    fn qualified_names_split_on_the_last_dot() {
        assert_eq!(split_qualified("app.add_user"), (Some("app"), "add_user"));
        assert_eq!(split_qualified("add_user"), (None, "add_user"));
    }
}
