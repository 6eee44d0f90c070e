use chrono::NaiveDateTime;
use serde_json::Value;

use crate::error::{Result, SqlCommandError};
use crate::parameter::{Parameter, ParameterDirection};
use crate::table::DataTable;
use crate::types::DbValue;

/// Parameter metadata for a routine, oldest overload first. `$1` is the routine
/// name, `$2` an optional schema (defaults to the current schema).
pub(crate) const DERIVE_PARAMETERS_SQL: &str = "\
SELECT r.specific_name::text AS specific_name, \
       r.routine_type::text AS routine_type, \
       r.data_type::text AS return_type, \
       p.parameter_name::text AS parameter_name, \
       p.parameter_mode::text AS parameter_mode, \
       p.data_type::text AS parameter_type \
FROM information_schema.routines r \
LEFT JOIN information_schema.parameters p \
  ON p.specific_schema = r.specific_schema AND p.specific_name = r.specific_name \
WHERE r.routine_name = $1::text \
  AND r.routine_schema = COALESCE($2::text, current_schema()) \
ORDER BY r.specific_name, p.ordinal_position";

/// Routine type of the first overload, `FUNCTION` or `PROCEDURE`. Same
/// arguments as [`DERIVE_PARAMETERS_SQL`].
pub(crate) const ROUTINE_KIND_SQL: &str = "\
SELECT r.routine_type::text \
FROM information_schema.routines r \
WHERE r.routine_name = $1::text \
  AND r.routine_schema = COALESCE($2::text, current_schema()) \
ORDER BY r.specific_name \
LIMIT 1";

/// Name given to the leading return-value shape of a function.
pub const RETURN_VALUE_NAME: &str = "return_value";

/// Build a [`DataTable`] from raw Postgres rows.
///
/// # Errors
/// Returns errors from value extraction.
pub fn build_data_table(rows: &[tokio_postgres::Row]) -> Result<DataTable> {
    let column_names = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let mut table = DataTable::with_capacity(column_names, rows.len());

    for row in rows {
        let col_count = row.columns().len();
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(postgres_extract_value(row, i)?);
        }
        table.add_row_values(row_values);
    }
    Ok(table)
}

/// Extracts a [`DbValue`] from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns `SqlCommandError::PostgresError` if the column cannot be read as the
/// mapped type.
pub fn postgres_extract_value(row: &tokio_postgres::Row, idx: usize) -> Result<DbValue> {
    let type_name = row.columns()[idx].type_().name();

    let value = match type_name {
        "int2" => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| DbValue::Int(i64::from(v))),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| DbValue::Int(i64::from(v))),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.map(DbValue::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| DbValue::Float(f64::from(v))),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.map(DbValue::Float),
        "bool" => row.try_get::<_, Option<bool>>(idx)?.map(DbValue::Bool),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(DbValue::Timestamp),
        "timestamptz" => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?
            .map(|v| DbValue::Timestamp(v.naive_utc())),
        "json" | "jsonb" => row.try_get::<_, Option<Value>>(idx)?.map(DbValue::JSON),
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(DbValue::Blob),
        _ => row.try_get::<_, Option<String>>(idx)?.map(DbValue::Text),
    };
    Ok(value.unwrap_or(DbValue::Null))
}

fn text(row: &crate::table::DataRow, column: &str) -> Option<String> {
    row.get(column)
        .and_then(DbValue::as_text)
        .map(str::to_owned)
}

/// Turn the rows of [`DERIVE_PARAMETERS_SQL`] into parameter shapes.
///
/// Only the first overload is used. A function with a non-void result gets a
/// leading [`ParameterDirection::ReturnValue`] shape.
///
/// # Errors
/// Returns `SqlCommandError::ExecutionError` when no routine matched.
pub fn shapes_from_metadata(procedure: &str, metadata: &DataTable) -> Result<Vec<Parameter>> {
    let Some(first) = metadata.rows().first() else {
        return Err(SqlCommandError::ExecutionError(format!(
            "could not find stored procedure '{procedure}'"
        )));
    };
    let overload = text(first, "specific_name");

    let mut shapes = Vec::new();
    let is_function = text(first, "routine_type").as_deref() == Some("FUNCTION");
    if let Some(return_type) = text(first, "return_type") {
        if is_function && return_type != "void" {
            shapes.push(Parameter::shape(
                RETURN_VALUE_NAME,
                ParameterDirection::ReturnValue,
                Some(return_type),
            ));
        }
    }

    let overload_rows = metadata
        .rows()
        .iter()
        .take_while(|row| text(row, "specific_name") == overload);
    for (position, row) in overload_rows.enumerate() {
        let Some(mode) = text(row, "parameter_mode") else {
            // routine without parameters
            continue;
        };
        let direction = match mode.as_str() {
            "OUT" => ParameterDirection::Output,
            "INOUT" => ParameterDirection::InputOutput,
            _ => ParameterDirection::Input,
        };
        let name = text(row, "parameter_name").unwrap_or_else(|| format!("${}", position + 1));
        shapes.push(Parameter::shape(name, direction, text(row, "parameter_type")));
    }
    Ok(shapes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(rows: &[[Option<&str>; 6]]) -> DataTable {
        let mut table = DataTable::new(
            [
                "specific_name",
                "routine_type",
                "return_type",
                "parameter_name",
                "parameter_mode",
                "parameter_type",
            ]
            .map(String::from)
            .to_vec(),
        );
        for row in rows {
            table.add_row_values(
                row.iter()
                    .map(|c| c.map_or(DbValue::Null, |s| DbValue::Text(s.into())))
                    .collect(),
            );
        }
        table
    }

    #[test]
    fn function_gets_leading_return_value() {
        let table = metadata(&[
            [Some("f_1"), Some("FUNCTION"), Some("integer"), Some("a"), Some("IN"), Some("integer")],
            [Some("f_1"), Some("FUNCTION"), Some("integer"), None, Some("INOUT"), Some("text")],
            [Some("f_2"), Some("FUNCTION"), Some("integer"), Some("z"), Some("IN"), Some("text")],
        ]);
        let shapes = shapes_from_metadata("f", &table).unwrap();
        let summary: Vec<_> = shapes.iter().map(|p| (p.name.as_str(), p.direction)).collect();
        assert_eq!(
            summary,
            [
                (RETURN_VALUE_NAME, ParameterDirection::ReturnValue),
                ("a", ParameterDirection::Input),
                ("$2", ParameterDirection::InputOutput),
            ]
        );
    }

    #[test]
    fn procedure_without_parameters_has_no_shapes() {
        let table = metadata(&[[Some("p_1"), Some("PROCEDURE"), None, None, None, None]]);
        assert!(shapes_from_metadata("p", &table).unwrap().is_empty());
    }

    #[test]
    fn unknown_routine_is_an_execution_error() {
        let err = shapes_from_metadata("nope", &metadata(&[])).unwrap_err();
        assert!(matches!(err, SqlCommandError::ExecutionError(msg) if msg.contains("nope")));
    }
}
