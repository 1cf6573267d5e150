use std::collections::HashMap;
use std::sync::Arc;

use crate::types::SqlValue;

/// A row from a query result.
///
/// Fields keep the order the server declared them in, so "first field" lookups
/// used by the single-value helpers are well defined.
#[derive(Debug, Clone)]
pub struct Row {
    /// The column names for this row (shared across all rows in a result set)
    columns: Arc<Vec<String>>,
    values: Vec<SqlValue>,
    // Shared name -> index lookup, built once per result set
    index: Arc<HashMap<String, usize>>,
}

impl Row {
    /// Create a new row, building its own column index.
    #[must_use]
    pub fn new(columns: Arc<Vec<String>>, values: Vec<SqlValue>) -> Self {
        let index = Arc::new(build_index(&columns));
        Self {
            columns,
            values,
            index,
        }
    }

    pub(crate) fn with_index(
        columns: Arc<Vec<String>>,
        index: Arc<HashMap<String, usize>>,
        values: Vec<SqlValue>,
    ) -> Self {
        Self {
            columns,
            values,
            index,
        }
    }

    /// Build a row from `(name, value)` pairs, preserving their order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<SqlValue>,
    {
        let (columns, values): (Vec<String>, Vec<SqlValue>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self::new(Arc::new(columns), values)
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.index.get(column_name) {
            return Some(idx);
        }
        self.columns.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&SqlValue> {
        self.column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// The first declared field of the row.
    #[must_use]
    pub fn first(&self) -> Option<&SqlValue> {
        self.values.first()
    }

    /// Iterate over `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.values == other.values
    }
}

pub(crate) fn build_index(columns: &[String]) -> HashMap<String, usize> {
    columns
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_declaration_order() {
        let row = Row::from_pairs([("b", SqlValue::Int(2)), ("a", SqlValue::Int(1))]);
        assert_eq!(row.first(), Some(&SqlValue::Int(2)));
        let names: Vec<&str> = row.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(row.get("a"), Some(&SqlValue::Int(1)));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn duplicate_names_resolve_to_last_index() {
        let row = Row::from_pairs([("x", 1i64), ("x", 2i64)]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("x"), Some(&SqlValue::Int(2)));
        assert_eq!(row.get_by_index(0), Some(&SqlValue::Int(1)));
    }
}
