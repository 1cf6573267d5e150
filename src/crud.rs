//! Convenience operations built on [`ConnectionHandle::execute`].

use crate::error::SqlSavepointError;
use crate::handle::ConnectionHandle;
use crate::query_builder::{self, Condition, Fields, Select, Statement};
use crate::results::{ResultSet, Row};
use crate::types::SqlValue;

impl ConnectionHandle {
    /// Run raw statement text with positional parameters.
    ///
    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn query(
        &self,
        text: &str,
        params: &[SqlValue],
    ) -> Result<ResultSet, SqlSavepointError> {
        self.execute(&Statement::new(text, params.to_vec())).await
    }

    /// All rows of a query, in server order.
    ///
    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn select(&self, query: impl Into<Statement>) -> Result<Vec<Row>, SqlSavepointError> {
        Ok(self.execute(&query.into()).await?.into_rows())
    }

    /// The first row, or `None` when nothing matched.
    ///
    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn row(&self, query: impl Into<Statement>) -> Result<Option<Row>, SqlSavepointError> {
        Ok(self.select(query).await?.into_iter().next())
    }

    /// First field of the first row.
    ///
    /// `Ok(None)` means no row matched; a NULL column comes back as
    /// `Ok(Some(SqlValue::Null))`.
    ///
    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn value(
        &self,
        query: impl Into<Statement>,
    ) -> Result<Option<SqlValue>, SqlSavepointError> {
        Ok(self
            .row(query)
            .await?
            .and_then(|row| row.into_values().into_iter().next()))
    }

    /// Named field of the first row, falling back to its first field when the row has no
    /// such column.
    ///
    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn value_of(
        &self,
        query: impl Into<Statement>,
        column: &str,
    ) -> Result<Option<SqlValue>, SqlSavepointError> {
        let Some(row) = self.row(query).await? else {
            return Ok(None);
        };
        Ok(row.get(column).or_else(|| row.first()).cloned())
    }

    /// First field of every row.
    ///
    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn col(&self, query: impl Into<Statement>) -> Result<Vec<SqlValue>, SqlSavepointError> {
        Ok(self
            .select(query)
            .await?
            .into_iter()
            .filter_map(|row| row.into_values().into_iter().next())
            .collect())
    }

    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn insert(
        &self,
        table: &str,
        values: impl Into<Fields>,
    ) -> Result<u64, SqlSavepointError> {
        let stmt = query_builder::insert(table, &values.into());
        Ok(self.execute(&stmt).await?.rows_affected)
    }

    /// # Errors
    /// Returns `ParameterError` for malformed rows, connection errors or the statement's
    /// error.
    pub async fn insert_bulk(
        &self,
        table: &str,
        keys: &[&str],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64, SqlSavepointError> {
        let stmt = query_builder::insert_bulk(table, keys, rows)?;
        Ok(self.execute(&stmt).await?.rows_affected)
    }

    /// Update matching rows. An empty value set sends nothing and reports 0 rows.
    ///
    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn update(
        &self,
        table: &str,
        values: impl Into<Fields>,
        cond: impl Into<Condition>,
    ) -> Result<u64, SqlSavepointError> {
        let Some(stmt) = query_builder::update(table, &values.into(), &cond.into()) else {
            return Ok(0);
        };
        Ok(self.execute(&stmt).await?.rows_affected)
    }

    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn delete(
        &self,
        table: &str,
        cond: impl Into<Condition>,
    ) -> Result<u64, SqlSavepointError> {
        let stmt = query_builder::delete(table, &cond.into());
        Ok(self.execute(&stmt).await?.rows_affected)
    }

    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn truncate(&self, table: &str) -> Result<(), SqlSavepointError> {
        self.execute(&query_builder::truncate(table)).await?;
        Ok(())
    }

    /// Update the rows matching `cond`, or insert `values` merged with the equality
    /// fields of `cond` when none match.
    ///
    /// The matching rows are read with `FOR UPDATE` first. This is a read-then-write
    /// sequence: it is only race free inside an enclosing transaction.
    ///
    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn replace(
        &self,
        table: &str,
        values: impl Into<Fields>,
        cond: impl Into<Condition>,
    ) -> Result<(), SqlSavepointError> {
        let values = values.into();
        let cond = cond.into();
        let existing = self
            .row(Select::from(table).filter(cond.clone()).for_update())
            .await?;
        if existing.is_some() {
            self.update(table, values, cond).await?;
        } else {
            let row = match cond.fields() {
                Some(fields) => values.merged(fields),
                None => values,
            };
            self.insert(table, row).await?;
        }
        Ok(())
    }
}
