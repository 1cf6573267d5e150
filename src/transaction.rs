//! Nested transaction bookkeeping.
//!
//! Postgres only knows flat `BEGIN`/`COMMIT`/`ROLLBACK`; nesting is emulated by naming a
//! savepoint after every inner `begin`. The stack here only tracks which tokens are live
//! and at which level, and tells the caller which statement to send. Sending it is the
//! connection handle's job.

use std::collections::HashMap;
use std::fmt;

use crate::error::SqlSavepointError;

const TOKEN_PREFIX: &str = "_trans_";

/// Opaque transaction identifier returned by `begin`, also used verbatim as the savepoint
/// name. Always `_trans_` followed by lowercase hex, so it is a safe SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionToken(String);

impl TransactionToken {
    fn generate() -> Self {
        Self(format!("{TOKEN_PREFIX}{:016x}", rand::random::<u64>()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild a token from its string form, rejecting anything that is not a valid
    /// savepoint name produced by this crate.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let hex = s.strip_prefix(TOKEN_PREFIX)?;
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return None;
        }
        Some(Self(s.to_string()))
    }
}

impl fmt::Display for TransactionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What `commit` requires of the server once the bookkeeping is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitAction {
    /// Outermost scope: send `COMMIT`, reinstate the token if it fails.
    Commit { level: usize },
    /// Inner scope: nothing is sent, the savepoint resolves with its enclosing transaction.
    Release,
}

/// Token -> nesting level map owned by a single connection handle.
#[derive(Debug, Default)]
pub struct TransactionStack {
    levels: HashMap<TransactionToken, usize>,
}

impl TransactionStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 0 when empty, otherwise one past the deepest live level.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.levels.values().max().map_or(0, |max| max + 1)
    }

    #[must_use]
    pub fn level_of(&self, token: &TransactionToken) -> Option<usize> {
        self.levels.get(token).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Record a new scope one level below the current depth and return its token and the
    /// statement that opens it.
    pub fn begin(&mut self) -> (TransactionToken, String) {
        let level = self.current_depth();
        let token = loop {
            let candidate = TransactionToken::generate();
            if !self.levels.contains_key(&candidate) {
                break candidate;
            }
        };
        let sql = if level == 0 {
            "BEGIN".to_string()
        } else {
            format!("SAVEPOINT {token}")
        };
        self.levels.insert(token.clone(), level);
        (token, sql)
    }

    /// Undo a `begin` whose statement failed.
    pub fn abandon(&mut self, token: &TransactionToken) {
        self.levels.remove(token);
    }

    /// Remove `token` and decide what the server must do.
    ///
    /// The token stays removed when an inner scope opened after it is still pending.
    ///
    /// # Errors
    /// `InvalidTransaction` for an unknown token (stack unchanged),
    /// `TransactionOrderViolation` when committing out of order.
    pub fn commit(&mut self, token: &TransactionToken) -> Result<CommitAction, SqlSavepointError> {
        let Some(level) = self.levels.remove(token) else {
            return Err(SqlSavepointError::InvalidTransaction(token.clone()));
        };
        let depth = self.current_depth();
        if depth > level {
            return Err(SqlSavepointError::TransactionOrderViolation { level, depth });
        }
        if level == 0 {
            Ok(CommitAction::Commit { level })
        } else {
            Ok(CommitAction::Release)
        }
    }

    /// Put a token back after its `COMMIT` failed so it can still be rolled back.
    pub fn reinstate(&mut self, token: TransactionToken, level: usize) {
        self.levels.insert(token, level);
    }

    /// Drop `token` and every scope at or below its level, returning the rollback statement.
    ///
    /// # Errors
    /// `InvalidTransaction` for an unknown token (stack unchanged).
    pub fn rollback(&mut self, token: &TransactionToken) -> Result<String, SqlSavepointError> {
        let Some(level) = self.level_of(token) else {
            return Err(SqlSavepointError::InvalidTransaction(token.clone()));
        };
        self.levels.retain(|_, l| *l < level);
        if level == 0 {
            Ok("ROLLBACK".to_string())
        } else {
            Ok(format!("ROLLBACK TO SAVEPOINT {token}"))
        }
    }

    /// Forget every scope without talking to the server.
    pub fn reset(&mut self) {
        self.levels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_grow_by_one_from_zero() {
        let mut stack = TransactionStack::new();
        assert_eq!(stack.current_depth(), 0);
        let (t0, sql0) = stack.begin();
        let (t1, sql1) = stack.begin();
        let (t2, _) = stack.begin();
        assert_eq!(sql0, "BEGIN");
        assert_eq!(sql1, format!("SAVEPOINT {t1}"));
        assert_eq!(stack.level_of(&t0), Some(0));
        assert_eq!(stack.level_of(&t1), Some(1));
        assert_eq!(stack.level_of(&t2), Some(2));
        assert_eq!(stack.current_depth(), 3);
    }

    #[test]
    fn tokens_are_safe_identifiers() {
        let mut stack = TransactionStack::new();
        for _ in 0..64 {
            let (token, _) = stack.begin();
            assert!(TransactionToken::parse(token.as_str()).is_some());
            assert!(token.as_str().starts_with("_trans_"));
        }
        assert_eq!(stack.len(), 64);
        assert!(TransactionToken::parse("_trans_; DROP TABLE x").is_none());
        assert!(TransactionToken::parse("_trans_").is_none());
    }

    #[test]
    fn unknown_token_leaves_stack_unchanged() {
        let mut stack = TransactionStack::new();
        let (t0, _) = stack.begin();
        let stranger = TransactionToken::parse("_trans_00ff").unwrap();
        assert!(stack.commit(&stranger).unwrap_err().is_invalid_transaction());
        assert!(stack.rollback(&stranger).unwrap_err().is_invalid_transaction());
        assert_eq!(stack.level_of(&t0), Some(0));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn inner_commit_is_bookkeeping_only() {
        let mut stack = TransactionStack::new();
        let (t0, _) = stack.begin();
        let (t1, _) = stack.begin();
        assert_eq!(stack.commit(&t1).unwrap(), CommitAction::Release);
        assert_eq!(stack.commit(&t0).unwrap(), CommitAction::Commit { level: 0 });
        assert!(stack.is_empty());
    }

    #[test]
    fn out_of_order_commit_drops_the_token() {
        let mut stack = TransactionStack::new();
        let (t0, _) = stack.begin();
        let (t1, _) = stack.begin();
        let err = stack.commit(&t0).unwrap_err();
        assert!(matches!(
            err,
            SqlSavepointError::TransactionOrderViolation { level: 0, depth: 2 }
        ));
        assert_eq!(stack.level_of(&t0), None);
        assert_eq!(stack.level_of(&t1), Some(1));
        assert!(stack.commit(&t0).unwrap_err().is_invalid_transaction());
    }

    #[test]
    fn rollback_discards_descendants() {
        let mut stack = TransactionStack::new();
        let (t0, _) = stack.begin();
        let (t1, _) = stack.begin();
        let (t2, _) = stack.begin();
        let sql = stack.rollback(&t1).unwrap();
        assert_eq!(sql, format!("ROLLBACK TO SAVEPOINT {t1}"));
        assert_eq!(stack.level_of(&t0), Some(0));
        assert_eq!(stack.level_of(&t1), None);
        assert_eq!(stack.level_of(&t2), None);
        assert!(stack.commit(&t2).unwrap_err().is_invalid_transaction());
        assert_eq!(stack.current_depth(), 1);
        assert_eq!(stack.rollback(&t0).unwrap(), "ROLLBACK");
        assert!(stack.is_empty());
    }

    #[test]
    fn reinstate_restores_level() {
        let mut stack = TransactionStack::new();
        let (t0, _) = stack.begin();
        let CommitAction::Commit { level } = stack.commit(&t0).unwrap() else {
            panic!("outermost commit must reach the server");
        };
        stack.reinstate(t0.clone(), level);
        assert_eq!(stack.rollback(&t0).unwrap(), "ROLLBACK");
    }

    #[test]
    fn reset_forgets_everything() {
        let mut stack = TransactionStack::new();
        let _ = stack.begin();
        let _ = stack.begin();
        stack.reset();
        assert_eq!(stack.current_depth(), 0);
        let (_, sql) = stack.begin();
        assert_eq!(sql, "BEGIN");
    }
}
