use super::{Condition, Fields, Statement, StatementWriter};
use crate::error::SqlSavepointError;
use crate::types::SqlValue;

/// `INSERT INTO table (cols) VALUES (...)`; empty values insert a default row.
#[must_use]
pub fn insert(table: &str, values: &Fields) -> Statement {
    let mut w = StatementWriter::new("INSERT INTO ");
    w.push_ident(table);
    if values.is_empty() {
        w.push_str(" DEFAULT VALUES");
        return w.finish();
    }
    w.push_str(" (");
    for (i, (column, _)) in values.iter().enumerate() {
        if i > 0 {
            w.push_str(", ");
        }
        w.push_ident(column);
    }
    w.push_str(") VALUES (");
    for (i, (_, value)) in values.iter().enumerate() {
        if i > 0 {
            w.push_str(", ");
        }
        w.push_param(value.clone());
    }
    w.push_str(")");
    w.finish()
}

/// Multi-row insert of `rows` against the column list `keys`.
///
/// # Errors
/// Returns `SqlSavepointError::ParameterError` if there are no keys or no rows, or if a
/// row's width differs from the key count.
pub fn insert_bulk(
    table: &str,
    keys: &[&str],
    rows: &[Vec<SqlValue>],
) -> Result<Statement, SqlSavepointError> {
    if keys.is_empty() || rows.is_empty() {
        return Err(SqlSavepointError::ParameterError(
            "bulk insert needs at least one key and one row".to_string(),
        ));
    }
    let mut w = StatementWriter::new("INSERT INTO ");
    w.push_ident(table);
    w.push_str(" (");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            w.push_str(", ");
        }
        w.push_ident(key);
    }
    w.push_str(") VALUES ");
    for (r, row) in rows.iter().enumerate() {
        if row.len() != keys.len() {
            return Err(SqlSavepointError::ParameterError(format!(
                "row {r} has {} values, expected {}",
                row.len(),
                keys.len()
            )));
        }
        if r > 0 {
            w.push_str(", ");
        }
        w.push_str("(");
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                w.push_str(", ");
            }
            w.push_param(value.clone());
        }
        w.push_str(")");
    }
    Ok(w.finish())
}

/// `UPDATE table SET ... [WHERE ...]`, or `None` when there is nothing to set.
#[must_use]
pub fn update(table: &str, values: &Fields, cond: &Condition) -> Option<Statement> {
    if values.is_empty() {
        return None;
    }
    let mut w = StatementWriter::new("UPDATE ");
    w.push_ident(table);
    w.push_str(" SET ");
    for (i, (column, value)) in values.iter().enumerate() {
        if i > 0 {
            w.push_str(", ");
        }
        w.push_ident(column);
        w.push_str(" = ");
        w.push_param(value.clone());
    }
    w.push_where(cond);
    Some(w.finish())
}

#[must_use]
pub fn delete(table: &str, cond: &Condition) -> Statement {
    let mut w = StatementWriter::new("DELETE FROM ");
    w.push_ident(table);
    w.push_where(cond);
    w.finish()
}

#[must_use]
pub fn truncate(table: &str) -> Statement {
    let mut w = StatementWriter::new("TRUNCATE TABLE ");
    w.push_ident(table);
    w.finish()
}
