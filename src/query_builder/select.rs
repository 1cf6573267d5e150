use super::{Condition, Statement, StatementWriter};

/// Columns a SELECT returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Projection {
    #[default]
    All,
    Columns(Vec<String>),
}

impl From<&str> for Projection {
    fn from(column: &str) -> Self {
        if column == "*" {
            Projection::All
        } else {
            Projection::Columns(vec![column.to_string()])
        }
    }
}

impl<const N: usize> From<[&str; N]> for Projection {
    fn from(columns: [&str; N]) -> Self {
        Projection::Columns(columns.iter().map(|c| (*c).to_string()).collect())
    }
}

impl From<Vec<String>> for Projection {
    fn from(columns: Vec<String>) -> Self {
        if columns.is_empty() {
            Projection::All
        } else {
            Projection::Columns(columns)
        }
    }
}

/// SELECT builder: `table`, filter, projection and an optional locking clause.
///
/// ```rust
/// use pg_savepoint::query_builder::Select;
///
/// let stmt = Select::from("prices").filter([("id", 3i64)]).columns("price").build();
/// assert_eq!(stmt.text, r#"SELECT "price" FROM "prices" WHERE "id" = $1"#);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    condition: Condition,
    projection: Projection,
    for_update: bool,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            condition: Condition::All,
            projection: Projection::All,
            for_update: false,
        }
    }

    #[must_use]
    pub fn filter(mut self, condition: impl Into<Condition>) -> Self {
        self.condition = condition.into();
        self
    }

    #[must_use]
    pub fn columns(mut self, projection: impl Into<Projection>) -> Self {
        self.projection = projection.into();
        self
    }

    /// Lock matched rows until the enclosing transaction ends.
    #[must_use]
    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    #[must_use]
    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    #[must_use]
    pub fn build(&self) -> Statement {
        let mut w = StatementWriter::new("SELECT ");
        match &self.projection {
            Projection::All => w.push_str("*"),
            Projection::Columns(columns) => {
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        w.push_str(", ");
                    }
                    w.push_ident(column);
                }
            }
        }
        w.push_str(" FROM ");
        w.push_ident(&self.table);
        w.push_where(&self.condition);
        if self.for_update {
            w.push_str(" FOR UPDATE");
        }
        w.finish()
    }
}

impl From<Select> for Statement {
    fn from(select: Select) -> Self {
        select.build()
    }
}

impl From<&Select> for Statement {
    fn from(select: &Select) -> Self {
        select.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::Fields;
    use crate::types::SqlValue;

    #[test]
    fn builds_plain_select() {
        let stmt = Select::from("tmpp").build();
        assert_eq!(stmt.text, r#"SELECT * FROM "tmpp""#);
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn builds_locked_select_with_null_filter() {
        let cond = Fields::new().with("foo", 12i64).with("bar", SqlValue::Null);
        let stmt = Select::from("tmpp")
            .filter(cond)
            .columns(["foo", "bar"])
            .for_update()
            .build();
        assert_eq!(
            stmt.text,
            r#"SELECT "foo", "bar" FROM "tmpp" WHERE "foo" = $1 AND "bar" IS NULL FOR UPDATE"#
        );
        assert_eq!(stmt.params, vec![SqlValue::Int(12)]);
    }

    #[test]
    fn literal_and_raw_filters() {
        let none = Select::from("t").filter(false).build();
        assert_eq!(none.text, r#"SELECT * FROM "t" WHERE FALSE"#);
        let raw = Select::from("t")
            .filter(Condition::Raw("price > 3".into()))
            .build();
        assert_eq!(raw.text, r#"SELECT * FROM "t" WHERE price > 3"#);
    }
}
