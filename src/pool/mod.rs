mod shared;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::config::{ConnectionParams, PoolKey};
use crate::error::SqlSavepointError;
use crate::handle::ConnectionHandle;
use crate::link::Connector;
use crate::postgres::PgConnector;

pub use shared::{LinkManager, PoolEvent, PoolStatus, PooledLink, SharedPool};

/// Owner of the shared pools, at most one per [`PoolKey`].
///
/// Pass one registry to everything that builds pooled handles; tests can use their own
/// isolated instance. Cloning shares the same set of pools.
///
/// ```rust,no_run
/// # async fn demo() -> Result<(), pg_savepoint::SqlSavepointError> {
/// use pg_savepoint::prelude::*;
///
/// let registry = PoolRegistry::new();
/// let params = ConnectionParams::new("localhost", "app", "shop").password("secret");
/// let handle = registry.pooled(&params)?;
/// let answer = handle.value(Statement::raw("SELECT 42 AS answer")).await?;
/// assert_eq!(answer, Some(SqlValue::Int(42)));
/// handle.close(false).await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct PoolRegistry {
    pools: Arc<Mutex<HashMap<PoolKey, SharedPool>>>,
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<PoolKey> = self.lock().keys().cloned().collect();
        f.debug_struct("PoolRegistry").field("pools", &keys).finish()
    }
}

impl PoolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PoolKey, SharedPool>> {
        match self.pools.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// A pooled Postgres handle sharing the pool for `params`' identity.
    ///
    /// # Errors
    /// Returns `SqlSavepointError::ConfigError` for incomplete parameters.
    pub fn pooled(&self, params: &ConnectionParams) -> Result<ConnectionHandle, SqlSavepointError> {
        let key = params.identity()?;
        let connector: Arc<dyn Connector> = Arc::new(PgConnector::new(params)?);
        self.pooled_with(key, params.pool_size, connector)
    }

    /// A pooled handle over an arbitrary connector. The connector is only used if no
    /// live pool is registered under `key` yet.
    ///
    /// # Errors
    /// Returns `SqlSavepointError::PoolError` if the pool cannot be built.
    pub fn pooled_with(
        &self,
        key: PoolKey,
        max_size: usize,
        connector: Arc<dyn Connector>,
    ) -> Result<ConnectionHandle, SqlSavepointError> {
        let pool = self.lookup_or_create(&key, max_size, &connector)?;
        Ok(ConnectionHandle::pooled(
            self.clone(),
            key,
            max_size,
            connector,
            pool,
        ))
    }

    /// Return the live pool for `key`, creating and registering it if needed.
    ///
    /// The registry lock is held across the check and the insert, so concurrent callers
    /// for one identity always end up with the same pool. A closed pool still registered
    /// under `key` is replaced.
    ///
    /// # Errors
    /// Returns `SqlSavepointError::PoolError` if the pool cannot be built.
    pub fn lookup_or_create(
        &self,
        key: &PoolKey,
        max_size: usize,
        connector: &Arc<dyn Connector>,
    ) -> Result<SharedPool, SqlSavepointError> {
        let mut pools = self.lock();
        if let Some(pool) = pools.get(key) {
            if !pool.is_closed() {
                return Ok(pool.clone());
            }
        }
        let pool = SharedPool::build(key.clone(), max_size, Arc::clone(connector))?;
        debug!(pool = %key, max_size, "registered shared pool");
        pools.insert(key.clone(), pool.clone());
        Ok(pool)
    }

    #[must_use]
    pub fn get(&self, key: &PoolKey) -> Option<SharedPool> {
        self.lock().get(key).cloned()
    }

    /// Unregister the pool for `key` without closing it.
    pub fn remove(&self, key: &PoolKey) -> Option<SharedPool> {
        let removed = self.lock().remove(key);
        if removed.is_some() {
            debug!(pool = %key, "unregistered shared pool");
        }
        removed
    }

    /// Unregister `pool` only if it is still the one registered under its key.
    pub(crate) fn remove_if_same(&self, pool: &SharedPool) -> bool {
        let mut pools = self.lock();
        if pools.get(pool.key()).is_some_and(|p| p.same_as(pool)) {
            pools.remove(pool.key());
            debug!(pool = %pool.key(), "unregistered shared pool");
            true
        } else {
            false
        }
    }

    /// Close and unregister every pool.
    pub fn close_all(&self) {
        let drained: Vec<SharedPool> = self.lock().drain().map(|(_, pool)| pool).collect();
        for pool in drained {
            pool.close();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
