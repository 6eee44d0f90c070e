use rusqlite::Statement;
use rusqlite::types::Value;

use crate::error::Result;
use crate::table::DataTable;
use crate::types::DbValue;

use super::params::Params;

/// Extract a [`DbValue`] from a `SQLite` row.
///
/// # Errors
///
/// Returns `SqlCommandError::SqliteError` if the column cannot be read.
pub fn sqlite_extract_value(row: &rusqlite::Row, idx: usize) -> Result<DbValue> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => DbValue::Null,
        Value::Integer(i) => DbValue::Int(i),
        Value::Real(f) => DbValue::Float(f),
        Value::Text(s) => DbValue::Text(s),
        Value::Blob(b) => DbValue::Blob(b),
    })
}

/// Run a prepared statement and materialize every row.
/// A statement that returns no columns (DML) still runs and yields an empty table.
///
/// # Errors
/// Returns the driver's bind, step or read error.
pub fn build_data_table(stmt: &mut Statement<'_>, params: &Params) -> Result<DataTable> {
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();
    let mut table = DataTable::with_capacity(column_names, 10);

    params.bind(stmt)?;
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            values.push(sqlite_extract_value(row, i)?);
        }
        table.add_row_values(values);
    }
    Ok(table)
}
