use crate::types::DbValue;

/// How the backend should interpret a command's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandType {
    /// Plain SQL statement
    #[default]
    Text,
    /// Stored procedure name
    StoredProcedure,
}

/// A statement (or procedure name) and its named parameters.
///
/// Parameters keep insertion order. Use `None` for a value the caller does not
/// have; it is bound as a database null.
///
/// ```rust
/// use sql_command::prelude::*;
///
/// let cmd = Command::new("INSERT INTO users (id, name) VALUES (:id, :name)")
///     .with_param("id", 1)
///     .with_optional_param("name", None);
/// assert_eq!(cmd.parameters().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Command {
    expression: String,
    parameters: Vec<(String, Option<DbValue>)>,
}

impl Command {
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            parameters: Vec::new(),
        }
    }

    /// Build a command from an expression and an ordered parameter list.
    #[must_use]
    pub fn with_parameters(
        expression: impl Into<String>,
        parameters: Vec<(String, Option<DbValue>)>,
    ) -> Self {
        Self {
            expression: expression.into(),
            parameters,
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<DbValue>) -> Self {
        self.parameters.push((name.into(), Some(value.into())));
        self
    }

    /// Add a parameter whose value may be absent; `None` binds as a database null.
    #[must_use]
    pub fn with_optional_param(mut self, name: impl Into<String>, value: Option<DbValue>) -> Self {
        self.parameters.push((name.into(), value));
        self
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    #[must_use]
    pub fn parameters(&self) -> &[(String, Option<DbValue>)] {
        &self.parameters
    }
}

/// Commands executed under one transaction.
///
/// With `continue_on_error == false` the first failure rolls back the whole
/// batch. With `true` failures are recorded and the remaining commands still
/// run; the transaction commits at the end either way.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandBatch {
    pub commands: Vec<Command>,
    pub continue_on_error: bool,
}

impl CommandBatch {
    #[must_use]
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            continue_on_error: false,
        }
    }

    #[must_use]
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl FromIterator<Command> for CommandBatch {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
