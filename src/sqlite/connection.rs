use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use crate::command::CommandType;
use crate::error::{Result, SqlCommandError};
use crate::provider::{ConnectionState, DbConnection, NativeCommand, next_connection_id};
use crate::table::DataTable;

use super::params::Params;
use super::query::build_data_table;

pub(crate) type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

/// `SQLite` connection. The driver handle lives behind a mutex so blocking calls
/// can run on tokio's blocking pool.
pub struct SqliteConnection {
    id: u64,
    connection_string: String,
    conn: Option<SharedSqliteConnection>,
    in_transaction: bool,
}

impl SqliteConnection {
    pub(crate) fn new(connection_string: impl Into<String>) -> Self {
        Self {
            id: next_connection_id(),
            connection_string: connection_string.into(),
            conn: None,
            in_transaction: false,
        }
    }

    fn conn_handle(&self) -> Result<SharedSqliteConnection> {
        self.conn
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| SqlCommandError::InvalidState("sqlite connection is not open".into()))
    }

    async fn execute_batch_sql(&self, sql: &'static str) -> Result<()> {
        run_blocking(self.conn_handle()?, move |guard| {
            guard
                .execute_batch(sql)
                .map_err(SqlCommandError::SqliteError)
        })
        .await
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("id", &self.id)
            .field("connection_string", &self.connection_string)
            .field("open", &self.conn.is_some())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

fn reject_procedures(command: &NativeCommand) -> Result<()> {
    if command.command_type == CommandType::StoredProcedure {
        return Err(SqlCommandError::Unsupported(format!(
            "sqlite has no stored procedures (called '{}')",
            command.command_text
        )));
    }
    Ok(())
}

#[async_trait]
impl DbConnection for SqliteConnection {
    fn connection_id(&self) -> u64 {
        self.id
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn state(&self) -> ConnectionState {
        if self.conn.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let path = self.connection_string.clone();
        let conn = spawn_blocking(move || rusqlite::Connection::open(path))
            .await
            .map_err(|e| {
                SqlCommandError::ExecutionError(format!("sqlite spawn_blocking join error: {e}"))
            })??;
        self.conn = Some(Arc::new(Mutex::new(conn)));
        tracing::debug!(path = %self.connection_string, "sqlite connection opened");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(handle) = self.conn.take() else {
            return Ok(());
        };
        // an open transaction is rolled back by sqlite when the handle goes away
        self.in_transaction = false;
        if let Ok(mutex) = Arc::try_unwrap(handle) {
            let conn = mutex.into_inner();
            spawn_blocking(move || conn.close().map_err(|(_, err)| err))
                .await
                .map_err(|e| {
                    SqlCommandError::ExecutionError(format!(
                        "sqlite spawn_blocking join error: {e}"
                    ))
                })??;
        }
        tracing::debug!(path = %self.connection_string, "sqlite connection closed");
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(SqlCommandError::InvalidState(
                "sqlite connection already has an open transaction".into(),
            ));
        }
        self.execute_batch_sql("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.execute_batch_sql("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let result = self.execute_batch_sql("ROLLBACK").await;
        self.in_transaction = false;
        result
    }

    async fn execute_non_query(&mut self, command: &mut NativeCommand) -> Result<usize> {
        reject_procedures(command)?;
        let sql = command.command_text.clone();
        let parameters = command.parameters.clone();
        run_blocking(self.conn_handle()?, move |guard| {
            let mut stmt = guard.prepare(&sql)?;
            Params::resolve(&stmt, &parameters)?.bind(&mut stmt)?;
            Ok(stmt.raw_execute()?)
        })
        .await
    }

    async fn execute_query(&mut self, command: &NativeCommand) -> Result<DataTable> {
        reject_procedures(command)?;
        let sql = command.command_text.clone();
        let parameters = command.parameters.clone();
        run_blocking(self.conn_handle()?, move |guard| {
            let mut stmt = guard.prepare(&sql)?;
            let params = Params::resolve(&stmt, &parameters)?;
            build_data_table(&mut stmt, &params)
        })
        .await
    }

    fn try_clone(&self) -> Option<Box<dyn DbConnection>> {
        Some(Box::new(SqliteConnection::new(self.connection_string.clone())))
    }
}

pub(crate) async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| SqlCommandError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}
