use std::sync::Arc;

use crate::binder::{self, ProcedureArg};
use crate::cache::ParameterCache;
use crate::command::{Command, CommandBatch, CommandType};
use crate::error::{Result, SqlCommandError};
use crate::parameter::{Parameter, ParameterDirection};
use crate::provider::{ConnectionState, DbConnection, NativeCommand, Provider, Transaction};
use crate::table::{DataRow, DataTable};
use crate::types::DbValue;

/// Result of a stored procedure (or any single) execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureResult {
    /// Backend-reported affected row count
    pub rows_affected: usize,
    /// Parameters still attached after the provider's cleanup hook, carrying
    /// output and input-output values.
    pub parameters: Vec<Parameter>,
}

impl ProcedureResult {
    /// Value of an output, input-output or return-value parameter.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&DbValue> {
        self.parameters
            .iter()
            .filter(|p| p.direction != ParameterDirection::Input)
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_ref())
    }

    /// Value of the return-value parameter, present after
    /// [`CommandExecutor::execute_function`].
    #[must_use]
    pub fn return_value(&self) -> Option<&DbValue> {
        self.parameters
            .iter()
            .find(|p| p.direction == ParameterDirection::ReturnValue)
            .and_then(|p| p.value.as_ref())
    }
}

/// Per-command results of a batch, in submission order.
///
/// Only produced when the batch committed; with `continue_on_error` some entries
/// may be errors.
#[derive(Debug)]
pub struct BatchOutcome {
    results: Vec<Result<usize>>,
}

impl BatchOutcome {
    #[must_use]
    pub fn results(&self) -> &[Result<usize>] {
        &self.results
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// `(index, error)` for every command that failed.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &SqlCommandError)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().err().map(|e| (i, e)))
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }
}

/// Runs commands, batches and stored procedures through a [`Provider`].
///
/// Every public call acquires its own connection and releases it before
/// returning, whatever the outcome. The parameter cache is shared and cheap to
/// clone along with the executor.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sql_command::prelude::*;
///
/// # async fn demo(provider: Arc<dyn Provider>) -> Result<(), SqlCommandError> {
/// let executor = CommandExecutor::new(provider, Arc::new(ParameterCache::new()));
/// let rows = executor
///     .execute_command(
///         &Command::new("INSERT INTO users (id, name) VALUES (:id, :name)")
///             .with_param("id", 1)
///             .with_param("name", "alice"),
///     )
///     .await?;
/// assert_eq!(rows, 1);
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct CommandExecutor {
    provider: Arc<dyn Provider>,
    cache: Arc<ParameterCache>,
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("backend", &self.provider.backend_name())
            .field("cached_parameter_sets", &self.cache.len())
            .finish()
    }
}

impl CommandExecutor {
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, cache: Arc<ParameterCache>) -> Self {
        Self { provider, cache }
    }

    #[must_use]
    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn cache(&self) -> &ParameterCache {
        &self.cache
    }

    /// A backend parameter named `name` holding `value`.
    #[must_use]
    pub fn build_parameter(&self, name: impl Into<String>, value: Option<DbValue>) -> Parameter {
        binder::build_parameter(self.provider.as_ref(), name, value)
    }

    /// Execute a text command in its own transaction and return the affected row count.
    ///
    /// Commits on success. Any failure rolls the transaction back before the
    /// error is returned.
    ///
    /// # Errors
    /// Returns connection, argument or execution errors.
    pub async fn execute_command(&self, command: &Command) -> Result<usize> {
        let parameters = binder::build_parameters(self.provider.as_ref(), command);
        let mut conn = self.provider.create_connection()?;
        conn.open().await?;
        let result = self
            .execute_in_own_transaction(
                conn.as_mut(),
                CommandType::Text,
                command.expression(),
                parameters,
            )
            .await;
        release(conn.as_mut(), true).await;
        result.map(|out| out.rows_affected)
    }

    /// Execute a text command on a caller-owned connection, optionally inside a
    /// caller-owned transaction. Nothing is committed here. The connection is
    /// closed afterwards only if this call had to open it.
    ///
    /// # Errors
    /// Returns `SqlCommandError::InvalidTransaction` if `transaction` was already
    /// committed or rolled back, or any execution error.
    pub async fn execute_command_in(
        &self,
        conn: &mut dyn DbConnection,
        transaction: Option<&Transaction>,
        command: &Command,
    ) -> Result<usize> {
        let parameters = binder::build_parameters(self.provider.as_ref(), command);
        self.execute_non_query(
            conn,
            transaction,
            CommandType::Text,
            command.expression(),
            parameters,
        )
        .await
        .map(|out| out.rows_affected)
    }

    /// Execute every command of `batch` on one connection under one transaction.
    ///
    /// Without `continue_on_error` the first failure rolls back the whole batch
    /// and is returned. With it, failures are recorded in the outcome and the
    /// remaining commands still run. The transaction commits once, after the
    /// last command.
    ///
    /// # Errors
    /// Returns the first command error (policy `false`), or connection and
    /// commit errors.
    pub async fn execute_batch(&self, batch: &CommandBatch) -> Result<BatchOutcome> {
        let mut conn = self.provider.create_connection()?;
        conn.open().await?;
        let result = self.run_batch(conn.as_mut(), batch).await;
        release(conn.as_mut(), true).await;
        result
    }

    async fn run_batch(
        &self,
        conn: &mut dyn DbConnection,
        batch: &CommandBatch,
    ) -> Result<BatchOutcome> {
        let transaction = Transaction::begin(conn).await?;
        let mut results = Vec::with_capacity(batch.len());

        for (index, command) in batch.commands.iter().enumerate() {
            let parameters = binder::build_parameters(self.provider.as_ref(), command);
            let result = self
                .execute_non_query(
                    conn,
                    Some(&transaction),
                    CommandType::Text,
                    command.expression(),
                    parameters,
                )
                .await
                .map(|out| out.rows_affected);

            match result {
                Err(err) if !batch.continue_on_error => {
                    rollback_quietly(&transaction, conn).await;
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(index, error = %err, "batch command failed, continuing");
                    results.push(Err(err));
                }
                Ok(rows) => results.push(Ok(rows)),
            }
        }

        if let Err(err) = transaction.commit(conn).await {
            rollback_quietly(&transaction, conn).await;
            return Err(err);
        }
        Ok(BatchOutcome { results })
    }

    /// Execute a stored procedure with positional arguments.
    ///
    /// The parameter shape comes from the cache (discovered on first use). With
    /// no arguments the procedure is called without discovery.
    ///
    /// The call runs inside its own transaction, committed on success. A
    /// procedure that commits or rolls back by itself cannot run this way on
    /// backends that forbid transaction control inside an explicit transaction
    /// (`PostgreSQL` reports "invalid transaction termination"); use
    /// [`prepare_command`](Self::prepare_command) on a caller-owned connection
    /// without a transaction for those.
    ///
    /// # Errors
    /// Returns `SqlCommandError::ArgumentError` for an empty name,
    /// `SqlCommandError::ArgumentMismatch` when `args` does not match the
    /// procedure's parameter count, discovery errors, or execution errors.
    pub async fn execute_procedure(
        &self,
        procedure: &str,
        args: &[ProcedureArg],
    ) -> Result<ProcedureResult> {
        if procedure.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "stored procedure name is required".into(),
            ));
        }
        let mut conn = self.provider.create_connection()?;
        conn.open().await?;
        let result = self
            .procedure_with_values(conn.as_mut(), procedure, args, false)
            .await;
        release(conn.as_mut(), true).await;
        result
    }

    /// Execute a function-style routine and keep its return value, readable
    /// through [`ProcedureResult::return_value`].
    ///
    /// Discovery always runs, since the return value slot comes from it. `args`
    /// covers the declared parameters only, not the return value.
    ///
    /// # Errors
    /// Same as [`execute_procedure`](Self::execute_procedure).
    pub async fn execute_function(
        &self,
        function: &str,
        args: &[ProcedureArg],
    ) -> Result<ProcedureResult> {
        if function.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "stored procedure name is required".into(),
            ));
        }
        let mut conn = self.provider.create_connection()?;
        conn.open().await?;
        let result = self
            .procedure_with_values(conn.as_mut(), function, args, true)
            .await;
        release(conn.as_mut(), true).await;
        result
    }

    async fn procedure_with_values(
        &self,
        conn: &mut dyn DbConnection,
        procedure: &str,
        args: &[ProcedureArg],
        include_return_value: bool,
    ) -> Result<ProcedureResult> {
        let mut parameters = Vec::new();
        if include_return_value || !args.is_empty() {
            let discovered = self
                .cache
                .get_parameter_set(self.provider.as_ref(), conn, procedure, include_return_value)
                .await?;
            let (mut returns, mut arguments): (Vec<_>, Vec<_>) = discovered
                .into_iter()
                .partition(|p| p.direction == ParameterDirection::ReturnValue);
            binder::bind_from_values(&mut arguments, args)?;
            returns.append(&mut arguments);
            parameters = returns;
        }
        self.execute_in_own_transaction(conn, CommandType::StoredProcedure, procedure, parameters)
            .await
    }

    /// Execute a stored procedure taking parameter values from `row` by column name.
    ///
    /// # Errors
    /// Same as [`execute_procedure`](Self::execute_procedure); a discovered
    /// parameter with a name of one character or less is an argument error.
    pub async fn execute_procedure_with_row(
        &self,
        procedure: &str,
        row: &DataRow,
    ) -> Result<ProcedureResult> {
        if procedure.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "stored procedure name is required".into(),
            ));
        }
        let mut conn = self.provider.create_connection()?;
        conn.open().await?;
        let result = self.procedure_with_row(conn.as_mut(), procedure, row).await;
        release(conn.as_mut(), true).await;
        result
    }

    async fn procedure_with_row(
        &self,
        conn: &mut dyn DbConnection,
        procedure: &str,
        row: &DataRow,
    ) -> Result<ProcedureResult> {
        let mut parameters = Vec::new();
        if !row.is_empty() {
            parameters = self
                .cache
                .get_parameter_set(self.provider.as_ref(), conn, procedure, false)
                .await?;
            binder::bind_from_row(&mut parameters, row)?;
        }
        self.execute_in_own_transaction(conn, CommandType::StoredProcedure, procedure, parameters)
            .await
    }

    /// A stored-procedure command whose discovered parameters are bound, in order,
    /// to `source_columns`. Without source columns no discovery happens and the
    /// command carries no parameters.
    ///
    /// # Errors
    /// Returns `SqlCommandError::ArgumentError` for an empty name,
    /// `SqlCommandError::ArgumentMismatch` when there are more source columns
    /// than parameters, or discovery errors.
    pub async fn create_procedure_command(
        &self,
        conn: &mut dyn DbConnection,
        procedure: &str,
        source_columns: &[&str],
    ) -> Result<NativeCommand> {
        if procedure.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "stored procedure name is required".into(),
            ));
        }
        let mut command = NativeCommand::new(CommandType::StoredProcedure, procedure);
        if source_columns.is_empty() {
            return Ok(command);
        }

        let mut parameters = self
            .cache
            .get_parameter_set(self.provider.as_ref(), conn, procedure, false)
            .await?;
        if source_columns.len() > parameters.len() {
            return Err(SqlCommandError::ArgumentMismatch {
                expected: parameters.len(),
                actual: source_columns.len(),
            });
        }
        for (parameter, column) in parameters.iter_mut().zip(source_columns) {
            parameter.source_column = Some((*column).to_owned());
        }
        binder::attach_to_command(Some(&mut command), Some(parameters))?;
        Ok(command)
    }

    /// Run a text command through the provider's data adapter.
    ///
    /// # Errors
    /// Returns connection or execution errors.
    pub async fn fill_table(&self, command: &Command) -> Result<DataTable> {
        let mut select = NativeCommand::new(CommandType::Text, command.expression());
        binder::attach_to_command(
            Some(&mut select),
            Some(binder::build_parameters(self.provider.as_ref(), command)),
        )?;
        let mut adapter = self.provider.new_data_adapter();
        adapter.select_command = Some(select);
        self.provider.fill_table(&adapter).await
    }

    /// Attach connection, transaction, text, type and parameters to a new
    /// [`NativeCommand`], opening `conn` if it is closed.
    ///
    /// The returned flag is true when this call opened the connection, in which
    /// case the caller is responsible for closing it.
    ///
    /// # Errors
    /// Returns `SqlCommandError::ArgumentError` for empty command text,
    /// `SqlCommandError::InvalidTransaction` for a severed transaction, or the
    /// connection's open error.
    pub async fn prepare_command(
        &self,
        conn: &mut dyn DbConnection,
        transaction: Option<&Transaction>,
        command_type: CommandType,
        command_text: &str,
        parameters: Option<Vec<Parameter>>,
    ) -> Result<(NativeCommand, bool)> {
        if command_text.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "command text is required".into(),
            ));
        }
        if let Some(transaction) = transaction {
            transaction.ensure_usable_on(&*conn)?;
        }

        let mut command = NativeCommand::new(command_type, command_text);
        command.transaction = transaction.cloned();
        binder::attach_to_command(Some(&mut command), parameters)?;

        let must_close = if conn.state() == ConnectionState::Open {
            false
        } else {
            conn.open().await?;
            true
        };
        Ok((command, must_close))
    }

    async fn execute_in_own_transaction(
        &self,
        conn: &mut dyn DbConnection,
        command_type: CommandType,
        command_text: &str,
        parameters: Vec<Parameter>,
    ) -> Result<ProcedureResult> {
        let transaction = Transaction::begin(conn).await?;
        let result = self
            .execute_non_query(conn, Some(&transaction), command_type, command_text, parameters)
            .await;

        match result {
            Ok(out) => match transaction.commit(conn).await {
                Ok(()) => Ok(out),
                Err(err) => {
                    rollback_quietly(&transaction, conn).await;
                    Err(err)
                }
            },
            Err(err) => {
                rollback_quietly(&transaction, conn).await;
                Err(err)
            }
        }
    }

    async fn execute_non_query(
        &self,
        conn: &mut dyn DbConnection,
        transaction: Option<&Transaction>,
        command_type: CommandType,
        command_text: &str,
        parameters: Vec<Parameter>,
    ) -> Result<ProcedureResult> {
        let (mut command, must_close) = self
            .prepare_command(conn, transaction, command_type, command_text, Some(parameters))
            .await?;

        let result = conn.execute_non_query(&mut command).await;
        self.provider.clear_command(&mut command);
        release(conn, must_close).await;

        Ok(ProcedureResult {
            rows_affected: result?,
            parameters: command.parameters,
        })
    }
}

async fn release(conn: &mut dyn DbConnection, must_close: bool) {
    if !must_close {
        return;
    }
    if let Err(err) = conn.close().await {
        tracing::warn!(error = %err, "failed to close connection");
    }
}

/// Roll back if still active. A rollback failure is logged; the caller returns
/// the error that triggered the rollback.
async fn rollback_quietly(transaction: &Transaction, conn: &mut dyn DbConnection) {
    if !transaction.is_active() {
        return;
    }
    if let Err(err) = transaction.rollback(conn).await {
        tracing::warn!(transaction = transaction.id(), error = %err, "rollback failed");
    }
}
