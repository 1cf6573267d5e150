//! Convenient imports for common functionality.
//!
//! This module re-exports the types most callers need to open handles, run statements
//! and manage transactions.

pub use crate::config::{ConnectionParams, PoolKey};
pub use crate::error::SqlSavepointError;
pub use crate::handle::ConnectionHandle;
pub use crate::link::ConnectionEvent;
pub use crate::pool::{PoolRegistry, SharedPool};
pub use crate::query_builder::{Condition, Fields, Select, Statement};
pub use crate::results::{ResultSet, Row};
pub use crate::transaction::TransactionToken;
pub use crate::types::SqlValue;
