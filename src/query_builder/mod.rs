//! Statement construction: turns table/condition/value descriptions into statement text
//! plus positional parameters. The connection layer never inspects the text it is given.

use std::fmt::Write as _;

use crate::types::SqlValue;

mod dml;
mod select;

pub use dml::{delete, insert, insert_bulk, truncate, update};
pub use select::{Projection, Select};

/// Statement text plus its bound parameters (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    #[must_use]
    pub fn new(text: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }

    /// A statement without parameters.
    #[must_use]
    pub fn raw(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new())
    }
}

impl From<&str> for Statement {
    fn from(text: &str) -> Self {
        Statement::raw(text)
    }
}

impl From<String> for Statement {
    fn from(text: String) -> Self {
        Statement::raw(text)
    }
}

/// Ordered `column -> value` mapping used for inserts, updates and equality filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, SqlValue)>);

impl Fields {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Set `column` to `value`, replacing an earlier entry for the same column in place.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        let column = column.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(name, _)| *name == column) {
            slot.1 = value;
        } else {
            self.0.push((column, value));
        }
    }

    /// Entries of `other` override or extend `self`.
    #[must_use]
    pub fn merged(mut self, other: &Fields) -> Self {
        for (column, value) in &other.0 {
            self.set(column.clone(), value.clone());
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Fields
where
    K: Into<String>,
    V: Into<SqlValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: Into<SqlValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.set(k, v);
        }
        fields
    }
}

/// Row filter for SELECT/UPDATE/DELETE.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Condition {
    /// Every row.
    #[default]
    All,
    /// Constant predicate; `Literal(false)` matches nothing.
    Literal(bool),
    /// Conjunction of `column = value` (NULL becomes `IS NULL`).
    Eq(Fields),
    /// Caller-supplied predicate text without parameters.
    Raw(String),
}

impl From<bool> for Condition {
    fn from(value: bool) -> Self {
        if value {
            Condition::All
        } else {
            Condition::Literal(false)
        }
    }
}

impl From<Fields> for Condition {
    fn from(fields: Fields) -> Self {
        if fields.is_empty() {
            Condition::All
        } else {
            Condition::Eq(fields)
        }
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Condition
where
    K: Into<String>,
    V: Into<SqlValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        Fields::from(pairs).into()
    }
}

impl Condition {
    /// Equality fields carried by this condition, used when an upsert falls back to insert.
    #[must_use]
    pub fn fields(&self) -> Option<&Fields> {
        match self {
            Condition::Eq(fields) => Some(fields),
            _ => None,
        }
    }
}

/// Accumulates statement text and numbers parameters as they are pushed.
pub(crate) struct StatementWriter {
    text: String,
    params: Vec<SqlValue>,
}

impl StatementWriter {
    pub(crate) fn new(head: &str) -> Self {
        Self {
            text: head.to_string(),
            params: Vec::new(),
        }
    }

    pub(crate) fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
    }

    pub(crate) fn push_ident(&mut self, ident: &str) {
        self.text.push_str(&quote_ident(ident));
    }

    pub(crate) fn push_param(&mut self, value: SqlValue) {
        self.params.push(value);
        let _ = write!(self.text, "${}", self.params.len());
    }

    pub(crate) fn push_where(&mut self, cond: &Condition) {
        match cond {
            Condition::All => {}
            Condition::Literal(value) => {
                self.push_str(if *value { " WHERE TRUE" } else { " WHERE FALSE" });
            }
            Condition::Raw(predicate) => {
                self.push_str(" WHERE ");
                self.push_str(predicate);
            }
            Condition::Eq(fields) => {
                if fields.is_empty() {
                    return;
                }
                self.push_str(" WHERE ");
                for (i, (column, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        self.push_str(" AND ");
                    }
                    self.push_ident(column);
                    if value.is_null() {
                        self.push_str(" IS NULL");
                    } else {
                        self.push_str(" = ");
                        self.push_param(value.clone());
                    }
                }
            }
        }
    }

    pub(crate) fn finish(self) -> Statement {
        Statement {
            text: self.text,
            params: self.params,
        }
    }
}

/// Double-quote an identifier; dotted names are quoted per segment.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    ident
        .split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}
