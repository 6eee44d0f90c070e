//! In-memory provider that records what the engine does with it.
//!
//! Used by the crate's own tests and available to downstream crates through
//! the `test-utils` feature. Statements are not parsed: an execution succeeds
//! unless its text contains one of the configured failure markers, and it only
//! becomes "applied" once the surrounding transaction commits.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::command::CommandType;
use crate::error::{Result, SqlCommandError};
use crate::parameter::{Parameter, ParameterDirection};
use crate::provider::{ConnectionState, DbConnection, NativeCommand, Provider, next_connection_id};
use crate::table::DataTable;
use crate::types::DbValue;

/// Something the engine asked a recording connection to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open,
    Close,
    Begin,
    Commit,
    Rollback,
    Execute(String),
}

/// A command as it reached the connection.
#[derive(Debug, Clone)]
pub struct ExecutedCommand {
    pub command_text: String,
    pub command_type: CommandType,
    pub parameters: Vec<Parameter>,
    pub transaction: Option<u64>,
}

#[derive(Debug, Default)]
struct State {
    procedures: HashMap<String, Vec<Parameter>>,
    outputs: HashMap<String, DbValue>,
    failure_markers: HashSet<String>,
    events: Vec<Event>,
    executed: Vec<ExecutedCommand>,
    applied: Vec<String>,
    derive_calls: usize,
    created_parameters: usize,
    open_connections: usize,
}

/// Provider backed by shared in-memory state.
#[derive(Debug, Clone)]
pub struct RecordingProvider {
    connection_string: String,
    state: Arc<Mutex<State>>,
    clone_supported: bool,
    clear_all_parameters: bool,
}

impl RecordingProvider {
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            state: Arc::new(Mutex::new(State::default())),
            clone_supported: true,
            clear_all_parameters: false,
        }
    }

    /// Register a stored procedure and the shapes discovery should report.
    #[must_use]
    pub fn with_procedure(self, name: &str, shapes: Vec<Parameter>) -> Self {
        self.lock().procedures.insert(name.to_owned(), shapes);
        self
    }

    /// Value written into an output, input-output or return-value parameter of
    /// that name.
    #[must_use]
    pub fn with_output(self, parameter: &str, value: DbValue) -> Self {
        self.lock().outputs.insert(parameter.to_owned(), value);
        self
    }

    /// Any command whose text contains `marker` fails to execute.
    #[must_use]
    pub fn failing_on(self, marker: &str) -> Self {
        self.lock().failure_markers.insert(marker.to_owned());
        self
    }

    #[must_use]
    pub fn without_clone_support(mut self) -> Self {
        self.clone_supported = false;
        self
    }

    /// Detach every parameter after execution, whatever its direction.
    #[must_use]
    pub fn clearing_all_parameters(mut self) -> Self {
        self.clear_all_parameters = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.lock().executed.clone()
    }

    /// Statements whose transaction committed (or that ran without one).
    #[must_use]
    pub fn applied(&self) -> Vec<String> {
        self.lock().applied.clone()
    }

    #[must_use]
    pub fn derive_calls(&self) -> usize {
        self.lock().derive_calls
    }

    #[must_use]
    pub fn created_parameters(&self) -> usize {
        self.lock().created_parameters
    }

    /// Connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    fn connection(&self) -> RecordingConnection {
        RecordingConnection {
            id: next_connection_id(),
            connection_string: self.connection_string.clone(),
            state: Arc::clone(&self.state),
            clone_supported: self.clone_supported,
            open: false,
            in_transaction: false,
            pending: Vec::new(),
        }
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn backend_name(&self) -> &str {
        "recording"
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn create_connection(&self) -> Result<Box<dyn DbConnection>> {
        if self.connection_string.is_empty() {
            return Err(SqlCommandError::ArgumentError(
                "connection string is empty".into(),
            ));
        }
        Ok(Box::new(self.connection()))
    }

    fn new_parameter(&self) -> Parameter {
        self.lock().created_parameters += 1;
        Parameter::default()
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
        let mut state = self.lock();
        state.derive_calls += 1;
        let shapes = state
            .procedures
            .get(&command.command_text)
            .cloned()
            .ok_or_else(|| {
                SqlCommandError::ExecutionError(format!(
                    "could not find stored procedure '{}'",
                    command.command_text
                ))
            })?;
        command.parameters = shapes;
        Ok(())
    }

    fn clear_command(&self, command: &mut NativeCommand) {
        if self.clear_all_parameters {
            command.parameters.clear();
        } else if command
            .parameters
            .iter()
            .all(|p| p.direction == ParameterDirection::Input)
        {
            command.parameters.clear();
        }
    }
}

/// Connection handed out by [`RecordingProvider`].
#[derive(Debug)]
pub struct RecordingConnection {
    id: u64,
    connection_string: String,
    state: Arc<Mutex<State>>,
    clone_supported: bool,
    open: bool,
    in_transaction: bool,
    pending: Vec<String>,
}

impl RecordingConnection {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(SqlCommandError::InvalidState("connection is not open".into()))
        }
    }
}

#[async_trait]
impl DbConnection for RecordingConnection {
    fn connection_id(&self) -> u64 {
        self.id
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn state(&self) -> ConnectionState {
        if self.open {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    async fn open(&mut self) -> Result<()> {
        if !self.open {
            self.open = true;
            let mut state = self.lock();
            state.open_connections += 1;
            state.events.push(Event::Open);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            // closing with a live transaction discards it, like a real driver
            self.in_transaction = false;
            self.pending.clear();
            let mut state = self.lock();
            state.open_connections -= 1;
            state.events.push(Event::Close);
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.in_transaction = true;
        self.lock().events.push(Event::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.in_transaction = false;
        let pending = std::mem::take(&mut self.pending);
        let mut state = self.lock();
        state.applied.extend(pending);
        state.events.push(Event::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.in_transaction = false;
        self.pending.clear();
        self.lock().events.push(Event::Rollback);
        Ok(())
    }

    async fn execute_non_query(&mut self, command: &mut NativeCommand) -> Result<usize> {
        self.ensure_open()?;
        let text = command.command_text.clone();
        let mut state = self.lock();
        state.events.push(Event::Execute(text.clone()));
        state.executed.push(ExecutedCommand {
            command_text: text.clone(),
            command_type: command.command_type,
            parameters: command.parameters.clone(),
            transaction: command.transaction.as_ref().map(crate::provider::Transaction::id),
        });
        if state.failure_markers.iter().any(|m| text.contains(m.as_str())) {
            return Err(SqlCommandError::ExecutionError(format!(
                "statement rejected: {text}"
            )));
        }
        for parameter in &mut command.parameters {
            if matches!(
                parameter.direction,
                ParameterDirection::Output
                    | ParameterDirection::InputOutput
                    | ParameterDirection::ReturnValue
            ) {
                if let Some(value) = state.outputs.get(&parameter.name) {
                    parameter.value = Some(value.clone());
                }
            }
        }
        if self.in_transaction {
            drop(state);
            self.pending.push(text);
        } else {
            state.applied.push(text);
        }
        Ok(1)
    }

    async fn execute_query(&mut self, command: &NativeCommand) -> Result<DataTable> {
        self.ensure_open()?;
        let mut state = self.lock();
        state.events.push(Event::Execute(command.command_text.clone()));
        let mut table = DataTable::new(vec!["statement".into()]);
        for statement in &state.applied {
            table.add_row_values(vec![DbValue::Text(statement.clone())]);
        }
        Ok(table)
    }

    fn try_clone(&self) -> Option<Box<dyn DbConnection>> {
        if !self.clone_supported {
            return None;
        }
        Some(Box::new(RecordingConnection {
            id: next_connection_id(),
            connection_string: self.connection_string.clone(),
            state: Arc::clone(&self.state),
            clone_supported: self.clone_supported,
            open: false,
            in_transaction: false,
            pending: Vec::new(),
        }))
    }
}
