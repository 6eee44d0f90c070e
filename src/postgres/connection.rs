use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

use crate::command::CommandType;
use crate::error::{Result, SqlCommandError};
use crate::parameter::{Parameter, ParameterDirection};
use crate::provider::{ConnectionState, DbConnection, NativeCommand, next_connection_id};
use crate::table::DataTable;
use crate::types::DbValue;

use super::params::Params;
use super::query::{ROUTINE_KIND_SQL, build_data_table, postgres_extract_value};
use super::split_qualified;

const STATEMENT_SAVEPOINT: &str = "sql_command_statement";

/// How a routine is invoked: `CALL` for procedures, `SELECT * FROM` for functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoutineKind {
    Procedure,
    Function,
}

impl RoutineKind {
    /// Whether `parameter` is passed in the argument list. Functions take no
    /// `OUT` arguments; their values come back as result columns.
    fn passes(self, parameter: &Parameter) -> bool {
        match parameter.direction {
            ParameterDirection::ReturnValue => false,
            ParameterDirection::Output => self == RoutineKind::Procedure,
            ParameterDirection::Input | ParameterDirection::InputOutput => true,
        }
    }
}

/// `PostgreSQL` connection over `tokio_postgres`, without TLS.
///
/// Inside a transaction each statement runs under a savepoint, so a failed
/// statement is undone on its own and the transaction stays usable.
pub struct PostgresConnection {
    id: u64,
    connection_string: String,
    client: Option<Client>,
    driver: Option<JoinHandle<()>>,
    in_transaction: bool,
    routine_kinds: HashMap<String, RoutineKind>,
}

impl PostgresConnection {
    pub(crate) fn new(connection_string: impl Into<String>) -> Self {
        Self {
            id: next_connection_id(),
            connection_string: connection_string.into(),
            client: None,
            driver: None,
            in_transaction: false,
            routine_kinds: HashMap::new(),
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| SqlCommandError::InvalidState("postgres connection is not open".into()))
    }

    /// Procedure or function. A requested return value settles it; otherwise
    /// the catalog is asked once per routine and connection. Unknown routines
    /// are treated as procedures so the server reports the missing name.
    async fn routine_kind(&mut self, command: &NativeCommand) -> Result<RoutineKind> {
        if command
            .parameters
            .iter()
            .any(|p| p.direction == ParameterDirection::ReturnValue)
        {
            return Ok(RoutineKind::Function);
        }
        if let Some(kind) = self.routine_kinds.get(&command.command_text) {
            return Ok(*kind);
        }

        let (schema, name) = split_qualified(&command.command_text);
        let params = Params::from_parameters(&[
            Parameter::new("name", Some(DbValue::Text(name.to_owned()))),
            Parameter::new("schema", schema.map(|s| DbValue::Text(s.to_owned()))),
        ]);
        let row = self
            .client()?
            .query_opt(ROUTINE_KIND_SQL, &params.as_refs())
            .await?;
        let kind = match row {
            Some(row) if row.try_get::<_, Option<String>>(0)?.as_deref() == Some("FUNCTION") => {
                RoutineKind::Function
            }
            _ => RoutineKind::Procedure,
        };
        tracing::debug!(routine = %command.command_text, ?kind, "resolved routine kind");
        self.routine_kinds.insert(command.command_text.clone(), kind);
        Ok(kind)
    }

    async fn run_statement(
        &self,
        command: &mut NativeCommand,
        routine: Option<RoutineKind>,
    ) -> Result<usize> {
        let client = self.client()?;
        match command.command_type {
            CommandType::Text => {
                let params = Params::from_parameters(&command.parameters);
                let affected = client
                    .execute(command.command_text.as_str(), &params.as_refs())
                    .await?;
                usize::try_from(affected).map_err(|e| {
                    SqlCommandError::ExecutionError(format!(
                        "postgres affected rows conversion error: {e}"
                    ))
                })
            }
            CommandType::StoredProcedure => {
                let kind = routine.unwrap_or(RoutineKind::Procedure);
                let call = procedure_call_sql(&command.command_text, &command.parameters, kind);
                let params = Params::from_parameters(
                    command.parameters.iter().filter(|p| kind.passes(p)),
                );
                let rows = client.query(call.as_str(), &params.as_refs()).await?;
                if let Some(row) = rows.first() {
                    read_back_outputs(row, &mut command.parameters)?;
                }
                // routines report no affected row count
                Ok(0)
            }
        }
    }
}

impl fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("id", &self.id)
            .field("open", &self.client.is_some())
            .field("in_transaction", &self.in_transaction)
            .finish_non_exhaustive()
    }
}

/// `CALL name($1, ...)` for a procedure, `SELECT * FROM name($1, ...)` for a
/// function.
pub(crate) fn procedure_call_sql(
    procedure: &str,
    parameters: &[Parameter],
    kind: RoutineKind,
) -> String {
    let argument_count = parameters.iter().filter(|p| kind.passes(p)).count();
    let placeholders = (1..=argument_count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    match kind {
        RoutineKind::Function => format!("SELECT * FROM {procedure}({placeholders})"),
        RoutineKind::Procedure => format!("CALL {procedure}({placeholders})"),
    }
}

/// Copy returned columns into output, input-output and return-value parameters:
/// by bare name when a column matches, otherwise in order.
fn read_back_outputs(row: &tokio_postgres::Row, parameters: &mut [Parameter]) -> Result<()> {
    let mut next_column = 0;
    let outputs = parameters
        .iter_mut()
        .filter(|p| p.direction != ParameterDirection::Input);
    for parameter in outputs {
        let by_name = row
            .columns()
            .iter()
            .position(|c| c.name().eq_ignore_ascii_case(parameter.bare_name()));
        let index = match by_name {
            Some(index) => index,
            None if next_column < row.columns().len() => next_column,
            None => continue,
        };
        parameter.value = Some(postgres_extract_value(row, index)?);
        next_column = index + 1;
    }
    Ok(())
}

#[async_trait]
impl DbConnection for PostgresConnection {
    fn connection_id(&self) -> u64 {
        self.id
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn state(&self) -> ConnectionState {
        match &self.client {
            Some(client) if !client.is_closed() => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }

    async fn open(&mut self) -> Result<()> {
        if self.state() == ConnectionState::Open {
            return Ok(());
        }
        let (client, connection) = tokio_postgres::connect(&self.connection_string, NoTls).await?;
        self.driver = Some(tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres connection error");
            }
        }));
        self.client = Some(client);
        self.in_transaction = false;
        tracing::debug!("postgres connection opened");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        // the server rolls back whatever transaction is still open
        drop(client);
        self.in_transaction = false;
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                tracing::warn!(error = %e, "postgres connection task failed");
            }
        }
        tracing::debug!("postgres connection closed");
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        self.client()?.batch_execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.client()?.batch_execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let result = self.client()?.batch_execute("ROLLBACK").await;
        self.in_transaction = false;
        Ok(result?)
    }

    async fn execute_non_query(&mut self, command: &mut NativeCommand) -> Result<usize> {
        let routine = match command.command_type {
            CommandType::StoredProcedure => Some(self.routine_kind(command).await?),
            CommandType::Text => None,
        };
        if !self.in_transaction {
            return self.run_statement(command, routine).await;
        }

        let client = self.client()?;
        client
            .batch_execute(&format!("SAVEPOINT {STATEMENT_SAVEPOINT}"))
            .await?;
        match self.run_statement(command, routine).await {
            Ok(affected) => {
                client
                    .batch_execute(&format!("RELEASE SAVEPOINT {STATEMENT_SAVEPOINT}"))
                    .await?;
                Ok(affected)
            }
            Err(err) => {
                client
                    .batch_execute(&format!("ROLLBACK TO SAVEPOINT {STATEMENT_SAVEPOINT}"))
                    .await?;
                Err(err)
            }
        }
    }

    async fn execute_query(&mut self, command: &NativeCommand) -> Result<DataTable> {
        if command.command_type == CommandType::StoredProcedure {
            return Err(SqlCommandError::Unsupported(
                "query a stored procedure through execute_non_query".into(),
            ));
        }
        let params = Params::from_parameters(&command.parameters);
        let rows = self
            .client()?
            .query(command.command_text.as_str(), &params.as_refs())
            .await?;
        build_data_table(&rows)
    }

    fn try_clone(&self) -> Option<Box<dyn DbConnection>> {
        Some(Box::new(PostgresConnection::new(self.connection_string.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedures_are_called_with_every_argument() {
        let procedure = [
            Parameter::new("a", None),
            Parameter::new("b", None).with_direction(ParameterDirection::InputOutput),
            Parameter::new("c", None).with_direction(ParameterDirection::Output),
        ];
        assert_eq!(
            procedure_call_sql("add_user", &procedure, RoutineKind::Procedure),
            "CALL add_user($1, $2, $3)"
        );
        assert_eq!(
            procedure_call_sql("noop", &[], RoutineKind::Procedure),
            "CALL noop()"
        );
    }

    #[test]
    fn functions_are_selected_without_out_arguments() {
        let function = [
            Parameter::new("return_value", None).with_direction(ParameterDirection::ReturnValue),
            Parameter::new("a", None),
            Parameter::new("total", None).with_direction(ParameterDirection::Output),
            Parameter::new("b", None).with_direction(ParameterDirection::InputOutput),
        ];
        assert_eq!(
            procedure_call_sql("app.total", &function, RoutineKind::Function),
            "SELECT * FROM app.total($1, $2)"
        );

        // shapes as the executor sees them, return value stripped
        assert_eq!(
            procedure_call_sql("f", &function[1..2], RoutineKind::Function),
            "SELECT * FROM f($1)"
        );
    }
}
