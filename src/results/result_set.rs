use std::collections::HashMap;
use std::sync::Arc;

use super::row::{Row, build_index};
use crate::types::SqlValue;

/// The result of one statement.
///
/// `rows` is empty for statements that return no tuples; `rows_affected` carries the
/// server's command count for DML.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// The rows returned by the statement
    pub rows: Vec<Row>,
    /// The number of rows affected (for DML statements)
    pub rows_affected: u64,
}

impl ResultSet {
    /// Create an empty result set with preallocated row capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            rows: Vec::with_capacity(capacity),
            rows_affected: 0,
        }
    }

    /// Result of a statement that only reports a row count.
    #[must_use]
    pub fn affected(rows_affected: u64) -> ResultSet {
        ResultSet {
            rows: Vec::new(),
            rows_affected,
        }
    }

    /// Build a result set from shared column names and raw value vectors.
    #[must_use]
    pub fn from_values(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> ResultSet {
        let mut builder = ResultSetBuilder::new(columns, rows.len());
        for values in rows {
            builder.push(values);
        }
        builder.finish()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Accumulates rows that share one column list and one name index.
pub(crate) struct ResultSetBuilder {
    columns: Arc<Vec<String>>,
    index: Arc<HashMap<String, usize>>,
    result: ResultSet,
}

impl ResultSetBuilder {
    pub(crate) fn new(columns: Vec<String>, capacity: usize) -> Self {
        let index = Arc::new(build_index(&columns));
        Self {
            columns: Arc::new(columns),
            index,
            result: ResultSet::with_capacity(capacity),
        }
    }

    pub(crate) fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub(crate) fn push(&mut self, values: Vec<SqlValue>) {
        self.result.rows.push(Row::with_index(
            Arc::clone(&self.columns),
            Arc::clone(&self.index),
            values,
        ));
        self.result.rows_affected += 1;
    }

    pub(crate) fn finish(self) -> ResultSet {
        self.result
    }
}
