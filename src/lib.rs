//! Lazily connected `PostgreSQL` handles with an optional shared pool and nested
//! transactions emulated through savepoints.
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), pg_savepoint::SqlSavepointError> {
//! use pg_savepoint::prelude::*;
//!
//! let params = ConnectionParams::new("localhost", "app", "shop").password("secret");
//! let handle = ConnectionHandle::new(&params)?;
//!
//! let outer = handle.begin().await?;
//! handle.insert("prices", [("item", SqlValue::from("apple")), ("price", 3i64.into())]).await?;
//! let inner = handle.begin().await?;
//! handle.update("prices", [("price", 4i64)], [("item", "apple")]).await?;
//! handle.rollback(&inner).await?;
//! handle.commit(&outer).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crud;
pub mod error;
pub mod handle;
pub mod link;
pub mod pool;
pub mod postgres;
pub mod prelude;
pub mod query_builder;
pub mod results;
pub mod transaction;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConnectionParams, PoolKey};
pub use error::SqlSavepointError;
pub use handle::ConnectionHandle;
pub use link::{ConnectionEvent, Connector, Link};
pub use pool::{PoolEvent, PoolRegistry, PoolStatus, SharedPool};
pub use query_builder::{Condition, Fields, Projection, Select, Statement};
pub use results::{ResultSet, Row};
pub use transaction::TransactionToken;
pub use types::SqlValue;
