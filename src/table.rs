use std::collections::HashMap;
use std::sync::Arc;

use crate::types::DbValue;

/// Column layout shared by every row of a table.
#[derive(Debug, Default)]
struct Columns {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, index }
    }
}

/// A single row of a [`DataTable`].
///
/// Rows can also be built on their own, e.g. to feed stored-procedure parameters
/// from application data:
/// ```rust
/// use sql_command::prelude::*;
///
/// let row = DataRow::from_pairs([("id", DbValue::Int(7)), ("name", DbValue::Text("x".into()))]);
/// assert_eq!(row.get("id"), Some(&DbValue::Int(7)));
/// assert!(row.contains("name"));
/// ```
#[derive(Debug, Clone)]
pub struct DataRow {
    columns: Arc<Columns>,
    values: Vec<DbValue>,
}

impl DataRow {
    /// Build a standalone row from column/value pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, DbValue)>,
        K: Into<String>,
    {
        let (names, values): (Vec<String>, Vec<DbValue>) =
            pairs.into_iter().map(|(k, v)| (k.into(), v)).unzip();
        Self {
            columns: Arc::new(Columns::new(names)),
            values,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns.names
    }

    #[must_use]
    pub fn contains(&self, column_name: &str) -> bool {
        self.columns.index.contains_key(column_name)
    }

    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.columns.index.get(column_name).copied()
    }

    /// Value of a column by name, `None` when the column does not exist.
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&DbValue> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&DbValue> {
        self.values.get(index)
    }

    #[must_use]
    pub fn values(&self) -> &[DbValue] {
        &self.values
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rows returned by a query, all sharing one column layout.
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    columns: Arc<Columns>,
    rows: Vec<DataRow>,
}

impl DataTable {
    #[must_use]
    pub fn new(column_names: Vec<String>) -> Self {
        Self {
            columns: Arc::new(Columns::new(column_names)),
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_capacity(column_names: Vec<String>, capacity: usize) -> Self {
        Self {
            columns: Arc::new(Columns::new(column_names)),
            rows: Vec::with_capacity(capacity),
        }
    }

    /// Append a row; `values` must follow the table's column order.
    pub fn add_row_values(&mut self, values: Vec<DbValue>) {
        self.rows.push(DataRow {
            columns: Arc::clone(&self.columns),
            values,
        });
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns.names
    }

    #[must_use]
    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl<'a> IntoIterator for &'a DataTable {
    type Item = &'a DataRow;
    type IntoIter = std::slice::Iter<'a, DataRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_share_the_table_layout() {
        let mut table = DataTable::new(vec!["id".into(), "name".into()]);
        table.add_row_values(vec![DbValue::Int(1), DbValue::Text("a".into())]);
        table.add_row_values(vec![DbValue::Int(2), DbValue::Null]);

        assert_eq!(table.len(), 2);
        let second = &table.rows()[1];
        assert_eq!(second.get("id"), Some(&DbValue::Int(2)));
        assert_eq!(second.get("name"), Some(&DbValue::Null));
        assert_eq!(second.get("missing"), None);
        assert_eq!(second.column_names(), table.column_names());
    }
}
