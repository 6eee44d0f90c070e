//! Turning application values into bound [`Parameter`]s.

use crate::command::Command;
use crate::error::{Result, SqlCommandError};
use crate::parameter::Parameter;
use crate::provider::{NativeCommand, Provider};
use crate::table::DataRow;
use crate::types::DbValue;

/// One positional argument for a stored procedure call.
///
/// A `Parameter` argument contributes only its value; the discovered shape
/// keeps its own name and direction.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcedureArg {
    Value(Option<DbValue>),
    Parameter(Parameter),
}

impl<T: Into<DbValue>> From<T> for ProcedureArg {
    fn from(value: T) -> Self {
        ProcedureArg::Value(Some(value.into()))
    }
}

impl ProcedureArg {
    /// An absent value; bound as a database null.
    #[must_use]
    pub fn absent() -> Self {
        ProcedureArg::Value(None)
    }
}

/// A provider parameter with `name` and `value` set.
pub fn build_parameter(
    provider: &dyn Provider,
    name: impl Into<String>,
    value: Option<DbValue>,
) -> Parameter {
    let mut parameter = provider.new_parameter();
    parameter.name = name.into();
    parameter.value = value;
    parameter
}

/// One parameter per `(name, value)` pair of `command`, in order.
pub fn build_parameters(provider: &dyn Provider, command: &Command) -> Vec<Parameter> {
    command
        .parameters()
        .iter()
        .map(|(name, value)| build_parameter(provider, name.as_str(), value.clone()))
        .collect()
}

/// Assign `values` to `parameters` by position.
///
/// # Errors
/// Returns `SqlCommandError::ArgumentMismatch` when the lengths differ.
pub fn bind_from_values(parameters: &mut [Parameter], values: &[ProcedureArg]) -> Result<()> {
    if parameters.len() != values.len() {
        return Err(SqlCommandError::ArgumentMismatch {
            expected: parameters.len(),
            actual: values.len(),
        });
    }

    for (parameter, value) in parameters.iter_mut().zip(values) {
        let assigned = match value {
            ProcedureArg::Parameter(source) => source.value.clone(),
            ProcedureArg::Value(raw) => raw.clone(),
        };
        parameter.value = Some(assigned.unwrap_or(DbValue::Null));
    }
    Ok(())
}

/// Assign values from `row` by column name.
///
/// A column named exactly like the parameter wins; otherwise a column named like
/// the parameter without its first character (`:id` → `id`) is used. Parameters
/// without a matching column keep their value.
///
/// # Errors
/// Returns `SqlCommandError::ArgumentError` if a parameter name is one character
/// or shorter.
pub fn bind_from_row(parameters: &mut [Parameter], row: &DataRow) -> Result<()> {
    for (i, parameter) in parameters.iter_mut().enumerate() {
        let name = parameter.name.as_str();
        if name.chars().count() <= 1 {
            return Err(SqlCommandError::ArgumentError(format!(
                "please provide a valid parameter name on the parameter #{i}, the name has the following value: '{name}'"
            )));
        }

        let value = row.get(name).or_else(|| {
            let mut chars = name.chars();
            chars.next();
            row.get(chars.as_str())
        });
        if let Some(value) = value {
            parameter.value = Some(value.clone());
        }
    }
    Ok(())
}

/// Apply the null-sentinel rule and append `parameters` to `command`.
///
/// # Errors
/// Returns `SqlCommandError::NullArgument` when `command` is `None`. A `None`
/// parameter list attaches nothing.
pub fn attach_to_command(
    command: Option<&mut NativeCommand>,
    parameters: Option<Vec<Parameter>>,
) -> Result<()> {
    let command = command.ok_or(SqlCommandError::NullArgument("command"))?;
    let Some(parameters) = parameters else {
        return Ok(());
    };

    for mut parameter in parameters {
        parameter.apply_null_sentinel();
        command.parameters.push(parameter);
    }
    Ok(())
}
