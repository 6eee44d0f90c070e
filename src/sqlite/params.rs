use rusqlite::Statement;
use rusqlite::types::Value;

use crate::error::{Result, SqlCommandError};
use crate::parameter::Parameter;
use crate::types::DbValue;

/// Convert a single [`DbValue`] to a rusqlite `Value`.
#[must_use]
pub fn db_value_to_sqlite_value(value: &DbValue) -> Value {
    match value {
        DbValue::Int(i) => Value::Integer(*i),
        DbValue::Float(f) => Value::Real(*f),
        DbValue::Text(s) => Value::Text(s.clone()),
        DbValue::Bool(b) => Value::Integer(i64::from(*b)),
        DbValue::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        DbValue::Null => Value::Null,
        DbValue::JSON(jval) => Value::Text(jval.to_string()),
        DbValue::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

/// Parameters resolved to statement slots, in slot order.
#[derive(Debug)]
pub struct Params(pub Vec<Value>);

impl Params {
    /// Resolve `parameters` against the placeholders of `stmt`.
    ///
    /// Named placeholders (`:id`, `@id`, `$id`) take the parameter with the same
    /// bare name. Anonymous and numbered ones (`?`, `?2`) take the parameter at
    /// that position.
    ///
    /// # Errors
    /// Returns `SqlCommandError::ArgumentError` if a placeholder has no parameter.
    pub fn resolve(stmt: &Statement<'_>, parameters: &[Parameter]) -> Result<Self> {
        let count = stmt.parameter_count();
        let mut values = Vec::with_capacity(count);
        for slot in 1..=count {
            let parameter = match stmt.parameter_name(slot) {
                Some(placeholder) if !placeholder.starts_with('?') => {
                    let bare = &placeholder[1..];
                    parameters.iter().find(|p| p.bare_name() == bare)
                }
                Some(numbered) => numbered[1..]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| parameters.get(n.saturating_sub(1))),
                None => parameters.get(slot - 1),
            };
            let parameter = parameter.ok_or_else(|| {
                SqlCommandError::ArgumentError(format!(
                    "no parameter supplied for placeholder {}",
                    stmt.parameter_name(slot)
                        .map_or_else(|| format!("#{slot}"), str::to_owned)
                ))
            })?;
            values.push(
                parameter
                    .value
                    .as_ref()
                    .map_or(Value::Null, db_value_to_sqlite_value),
            );
        }
        Ok(Params(values))
    }

    /// Bind every resolved value to its slot.
    ///
    /// # Errors
    /// Returns the driver's bind error.
    pub fn bind(&self, stmt: &mut Statement<'_>) -> Result<()> {
        for (index, value) in self.0.iter().enumerate() {
            stmt.raw_bind_parameter(index + 1, value)?;
        }
        Ok(())
    }
}
