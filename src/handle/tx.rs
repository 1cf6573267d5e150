use tracing::debug;

use super::{ConnectionHandle, HandleState, send};
use crate::error::SqlSavepointError;
use crate::query_builder::Statement;
use crate::transaction::{CommitAction, TransactionToken};

impl ConnectionHandle {
    /// Open a transaction, or a savepoint when one is already open.
    ///
    /// If the opening statement fails nothing is recorded.
    ///
    /// # Errors
    /// Returns connection errors or the error of `BEGIN`/`SAVEPOINT`.
    pub async fn begin(&self) -> Result<TransactionToken, SqlSavepointError> {
        let mut guard = self.state.lock().await;
        let HandleState { conn, transactions } = &mut *guard;
        let link = self.attach(conn, transactions).await?;

        let (token, sql) = transactions.begin();
        let level = transactions.level_of(&token);
        debug!(token = %token, level = ?level, "begin");
        if let Err(e) = send(link, &Statement::raw(sql)).await {
            transactions.abandon(&token);
            return Err(e);
        }
        if level == Some(0) {
            conn.set_in_transaction(true);
        }
        Ok(token)
    }

    /// Commit the scope opened by `token`.
    ///
    /// Only the outermost scope reaches the server; inner commits are bookkeeping and
    /// their savepoints resolve with the enclosing transaction. If `COMMIT` fails the
    /// token is reinstated so the caller can still roll back.
    ///
    /// A `TransactionOrderViolation` leaves `token` removed from the stack. If the server
    /// dropped the connection while the scope was open, every scope is gone and
    /// `ConnectionError` is returned.
    ///
    /// # Errors
    /// `InvalidTransaction`, `TransactionOrderViolation`, `ConnectionError`, or the error
    /// of `COMMIT`.
    pub async fn commit(&self, token: &TransactionToken) -> Result<(), SqlSavepointError> {
        let mut guard = self.state.lock().await;
        let HandleState { conn, transactions } = &mut *guard;

        if transactions.level_of(token).is_none() {
            return Err(SqlSavepointError::InvalidTransaction(token.clone()));
        }
        // Liveness is checked while the token still counts as open.
        let link = self.attach(conn, transactions).await?;

        let level = match transactions.commit(token)? {
            CommitAction::Release => {
                debug!(token = %token, "released savepoint scope");
                return Ok(());
            }
            CommitAction::Commit { level } => level,
        };

        if let Err(e) = send(link, &Statement::raw("COMMIT")).await {
            transactions.reinstate(token.clone(), level);
            return Err(e);
        }
        conn.set_in_transaction(false);
        debug!(token = %token, "committed");
        Ok(())
    }

    /// Roll back the scope opened by `token` together with every scope nested in it.
    ///
    /// # Errors
    /// `InvalidTransaction`, `ConnectionError` when the server dropped the connection, or
    /// the error of `ROLLBACK`/`ROLLBACK TO SAVEPOINT`.
    pub async fn rollback(&self, token: &TransactionToken) -> Result<(), SqlSavepointError> {
        let mut guard = self.state.lock().await;
        let HandleState { conn, transactions } = &mut *guard;

        let Some(level) = transactions.level_of(token) else {
            return Err(SqlSavepointError::InvalidTransaction(token.clone()));
        };
        let link = self.attach(conn, transactions).await?;
        let sql = transactions.rollback(token)?;
        send(link, &Statement::raw(sql)).await?;
        if level == 0 {
            conn.set_in_transaction(false);
        }
        debug!(token = %token, "rolled back");
        Ok(())
    }
}
