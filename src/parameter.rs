use crate::types::DbValue;

/// Direction of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    /// Result of a function-style routine. Only present on discovered shapes
    /// when the caller asked for it.
    ReturnValue,
}

impl ParameterDirection {
    /// True for directions that carry a value into the backend.
    #[must_use]
    pub fn is_input(self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }
}

/// A named command parameter.
///
/// `value` is `None` while no application value has been supplied. Binding
/// rewrites `None` on input parameters to [`DbValue::Null`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameter {
    pub name: String,
    pub direction: ParameterDirection,
    pub value: Option<DbValue>,
    /// Column of a [`DataRow`](crate::table::DataRow) this parameter is fed from.
    pub source_column: Option<String>,
    /// Backend type name reported by parameter discovery.
    pub db_type: Option<String>,
}

impl Parameter {
    #[must_use]
    pub fn new(name: impl Into<String>, value: Option<DbValue>) -> Self {
        Self {
            name: name.into(),
            value,
            ..Self::default()
        }
    }

    /// A value-less parameter shape, as produced by discovery.
    #[must_use]
    pub fn shape(
        name: impl Into<String>,
        direction: ParameterDirection,
        db_type: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            db_type,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Rewrite an absent value on an input or input-output parameter to the database null.
    pub fn apply_null_sentinel(&mut self) {
        if self.direction.is_input() && self.value.is_none() {
            self.value = Some(DbValue::Null);
        }
    }

    /// Parameter name without a leading `:`, `@`, `$` or `?` marker.
    #[must_use]
    pub fn bare_name(&self) -> &str {
        self.name
            .strip_prefix([':', '@', '$', '?'])
            .unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sentinel_only_touches_absent_input_values() {
        let mut input = Parameter::new("name", None);
        input.apply_null_sentinel();
        assert_eq!(input.value, Some(DbValue::Null));

        let mut inout = Parameter::new("total", None).with_direction(ParameterDirection::InputOutput);
        inout.apply_null_sentinel();
        assert_eq!(inout.value, Some(DbValue::Null));

        let mut output = Parameter::new("out", None).with_direction(ParameterDirection::Output);
        output.apply_null_sentinel();
        assert_eq!(output.value, None);

        let mut set = Parameter::new("id", Some(DbValue::Int(4)));
        set.apply_null_sentinel();
        assert_eq!(set.value, Some(DbValue::Int(4)));
    }

    #[test]
    fn bare_name_strips_one_marker() {
        assert_eq!(Parameter::new(":id", None).bare_name(), "id");
        assert_eq!(Parameter::new("@id", None).bare_name(), "id");
        assert_eq!(Parameter::new("id", None).bare_name(), "id");
    }
}
