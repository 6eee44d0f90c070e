//! Capability contract every backend implements.
//!
//! A backend supplies a [`Provider`] (connection factory plus metadata hooks)
//! and a [`DbConnection`] (the live driver handle). Everything else, binding,
//! caching and transaction handling, lives in the engine and works against
//! these two traits only.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use crate::command::CommandType;
use crate::error::{Result, SqlCommandError};
use crate::parameter::{Parameter, ParameterDirection};
use crate::table::DataTable;

/// Whether a connection currently holds a live driver session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

/// A command as handed to a driver: text, how to interpret it, bound
/// parameters and the transaction it runs under.
#[derive(Debug, Clone, Default)]
pub struct NativeCommand {
    pub command_text: String,
    pub command_type: CommandType,
    pub parameters: Vec<Parameter>,
    pub transaction: Option<Transaction>,
}

impl NativeCommand {
    #[must_use]
    pub fn new(command_type: CommandType, command_text: impl Into<String>) -> Self {
        Self {
            command_text: command_text.into(),
            command_type,
            ..Self::default()
        }
    }

    /// Parameter by exact name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Holds the select command a provider uses to fill a [`DataTable`].
#[derive(Debug, Clone, Default)]
pub struct DataAdapter {
    pub select_command: Option<NativeCommand>,
}

/// A live (or openable) connection to one backend.
///
/// Implementations are owned by exactly one call at a time and are never
/// shared between tasks.
#[async_trait]
pub trait DbConnection: Send {
    /// Process-unique identity, fixed for the connection's lifetime. Use
    /// [`next_connection_id`] to allocate one.
    fn connection_id(&self) -> u64;

    fn connection_string(&self) -> &str;

    fn state(&self) -> ConnectionState;

    /// Open the driver session. Opening an already open connection is a no-op.
    async fn open(&mut self) -> Result<()>;

    /// Close the driver session. Closing a closed connection is a no-op.
    async fn close(&mut self) -> Result<()>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Execute a statement or procedure and return the backend-reported affected
    /// row count. Output and input-output values are written back into
    /// `command.parameters`.
    async fn execute_non_query(&mut self, command: &mut NativeCommand) -> Result<usize>;

    async fn execute_query(&mut self, command: &NativeCommand) -> Result<DataTable>;

    /// A new, closed connection to the same target. `None` when the backend
    /// cannot clone connections; parameter discovery needs this.
    fn try_clone(&self) -> Option<Box<dyn DbConnection>> {
        None
    }
}

/// Backend-specific half of the engine.
///
/// A provider is bound to one connection string and holds no live connection
/// between calls.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry identifier, e.g. `"sqlite"`.
    fn backend_name(&self) -> &str;

    fn connection_string(&self) -> &str;

    /// A new, closed connection for the stored connection string.
    ///
    /// # Errors
    /// Returns `SqlCommandError::ArgumentError` if the connection string is empty.
    fn create_connection(&self) -> Result<Box<dyn DbConnection>>;

    /// An empty input parameter of the backend's flavour.
    fn new_parameter(&self) -> Parameter {
        Parameter::default()
    }

    fn new_data_adapter(&self) -> DataAdapter {
        DataAdapter::default()
    }

    /// Populate `command.parameters` with the stored procedure's parameter shapes,
    /// in declaration order. A return value, if the backend reports one, comes
    /// first with [`ParameterDirection::ReturnValue`].
    ///
    /// # Errors
    /// The default implementation returns `SqlCommandError::Unsupported`.
    async fn derive_parameters(
        &self,
        _conn: &mut dyn DbConnection,
        command: &mut NativeCommand,
    ) -> Result<()> {
        Err(SqlCommandError::Unsupported(format!(
            "{} cannot derive parameters for '{}'",
            self.backend_name(),
            command.command_text
        )))
    }

    /// Run the adapter's select command on a fresh connection.
    ///
    /// # Errors
    /// Returns `SqlCommandError::NullArgument` when the adapter has no select
    /// command, or any connection/driver error.
    async fn fill_table(&self, adapter: &DataAdapter) -> Result<DataTable> {
        let command = adapter
            .select_command
            .as_ref()
            .ok_or(SqlCommandError::NullArgument("select_command"))?;
        let mut conn = self.create_connection()?;
        conn.open().await?;
        let result = conn.execute_query(command).await;
        let closed = conn.close().await;
        let table = result?;
        closed?;
        Ok(table)
    }

    /// Post-execution cleanup. Parameters are detached only when all of them
    /// are plain inputs, so output values stay readable by the caller.
    fn clear_command(&self, command: &mut NativeCommand) {
        if command
            .parameters
            .iter()
            .all(|p| p.direction == ParameterDirection::Input)
        {
            command.parameters.clear();
        }
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// A fresh identity for a new [`DbConnection`].
pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct TransactionState {
    id: u64,
    connection: u64,
    active: AtomicBool,
}

/// Handle to a transaction opened on a [`DbConnection`].
///
/// Clones share state: once any clone commits or rolls back, every clone is
/// severed and the engine refuses to run commands under it. A transaction is
/// bound to the connection that began it.
#[derive(Debug, Clone)]
pub struct Transaction {
    inner: Arc<TransactionState>,
}

impl Transaction {
    /// Start a transaction on `conn`.
    ///
    /// # Errors
    /// Returns any error reported by the connection.
    pub async fn begin(conn: &mut dyn DbConnection) -> Result<Self> {
        conn.begin().await?;
        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        let connection = conn.connection_id();
        tracing::debug!(transaction = id, connection, "transaction started");
        Ok(Self {
            inner: Arc::new(TransactionState {
                id,
                connection,
                active: AtomicBool::new(true),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// False once the transaction was committed or rolled back.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Identity of the connection that began this transaction.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.inner.connection
    }

    /// Fails when the transaction is severed or belongs to another connection.
    pub(crate) fn ensure_usable_on(&self, conn: &dyn DbConnection) -> Result<()> {
        if !self.is_active() {
            return Err(SqlCommandError::InvalidTransaction(
                "the transaction was rolled back or committed, please provide an open transaction"
                    .into(),
            ));
        }
        if conn.connection_id() != self.inner.connection {
            return Err(SqlCommandError::InvalidTransaction(format!(
                "transaction {} was begun on connection {}, not on connection {}",
                self.id(),
                self.inner.connection,
                conn.connection_id()
            )));
        }
        Ok(())
    }

    /// Commit. The handle is severed only when the commit succeeded.
    ///
    /// # Errors
    /// Returns `SqlCommandError::InvalidTransaction` if already severed or
    /// `conn` is not the connection that began it, or the driver's commit error.
    pub async fn commit(&self, conn: &mut dyn DbConnection) -> Result<()> {
        self.ensure_usable_on(conn)?;
        conn.commit().await?;
        self.inner.active.store(false, Ordering::Release);
        tracing::debug!(transaction = self.id(), "transaction committed");
        Ok(())
    }

    /// Roll back. The handle is severed whatever the driver reports.
    ///
    /// # Errors
    /// Returns `SqlCommandError::InvalidTransaction` if already severed or
    /// `conn` is not the connection that began it, or the driver's rollback
    /// error.
    pub async fn rollback(&self, conn: &mut dyn DbConnection) -> Result<()> {
        self.ensure_usable_on(conn)?;
        let result = conn.rollback().await;
        self.inner.active.store(false, Ordering::Release);
        tracing::warn!(transaction = self.id(), "transaction rolled back");
        result
    }
}
