use std::sync::Arc;

use deadpool::managed::{self, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::config::PoolKey;
use crate::error::SqlSavepointError;
use crate::link::{ConnectionEvent, Connector, EVENT_CHANNEL_CAPACITY, Link};
use crate::query_builder::Statement;

/// Fault raised by a pooled connection outside any borrowing handle's call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEvent {
    pub pool: PoolKey,
    pub message: String,
}

/// Snapshot of a pool's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
}

/// A pooled link plus whether the server session is inside a transaction.
pub struct PooledLink {
    pub(crate) link: Box<dyn Link>,
    pub(crate) in_transaction: bool,
}

/// deadpool manager over any [`Connector`].
///
/// A link handed back while still inside a transaction (its handle was dropped without
/// `close`) is rolled back before the next checkout, or discarded if that fails.
pub struct LinkManager {
    key: PoolKey,
    connector: Arc<dyn Connector>,
    events: broadcast::Sender<PoolEvent>,
}

impl managed::Manager for LinkManager {
    type Type = PooledLink;
    type Error = SqlSavepointError;

    async fn create(&self) -> Result<PooledLink, SqlSavepointError> {
        let link = self.connector.connect().await?;
        tokio::spawn(observe_errors(
            self.key.clone(),
            link.subscribe(),
            self.events.clone(),
        ));
        debug!(pool = %self.key, "pooled connection created");
        Ok(PooledLink {
            link,
            in_transaction: false,
        })
    }

    async fn recycle(
        &self,
        pooled: &mut PooledLink,
        _metrics: &Metrics,
    ) -> RecycleResult<SqlSavepointError> {
        if pooled.link.is_closed() {
            return Err(RecycleError::Backend(SqlSavepointError::ConnectionError(
                "pooled connection closed".to_string(),
            )));
        }
        if pooled.in_transaction {
            warn!(pool = %self.key, "connection returned inside a transaction, rolling back");
            let rollback = Statement::raw("ROLLBACK");
            pooled
                .link
                .query(&rollback)
                .await
                .map_err(RecycleError::Backend)?;
            pooled.in_transaction = false;
        }
        Ok(())
    }
}

/// Reports connection faults for the whole life of a pooled link; never panics.
async fn observe_errors(
    key: PoolKey,
    mut rx: broadcast::Receiver<ConnectionEvent>,
    events: broadcast::Sender<PoolEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(ConnectionEvent::Error(message)) => {
                warn!(pool = %key, error = %message, "pooled connection error");
                let _ = events.send(PoolEvent {
                    pool: key.clone(),
                    message,
                });
            }
            Ok(ConnectionEvent::Notification { .. }) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
}

struct SharedPoolInner {
    key: PoolKey,
    pool: Pool<LinkManager>,
    events: broadcast::Sender<PoolEvent>,
}

/// One pool shared by every handle with the same [`PoolKey`]. Cloning is cheap.
#[derive(Clone)]
pub struct SharedPool {
    inner: Arc<SharedPoolInner>,
}

impl std::fmt::Debug for SharedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPool")
            .field("key", &self.inner.key)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl SharedPool {
    pub(crate) fn build(
        key: PoolKey,
        max_size: usize,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, SqlSavepointError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let manager = LinkManager {
            key: key.clone(),
            connector,
            events: events.clone(),
        };
        let pool = Pool::builder(manager)
            .max_size(max_size)
            .build()
            .map_err(|e| SqlSavepointError::PoolError(format!("failed to build pool {key}: {e}")))?;
        Ok(Self {
            inner: Arc::new(SharedPoolInner { key, pool, events }),
        })
    }

    #[must_use]
    pub fn key(&self) -> &PoolKey {
        &self.inner.key
    }

    /// Subscribe to faults of this pool's connections.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// True when both values refer to the same underlying pool.
    #[must_use]
    pub fn same_as(&self, other: &SharedPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let status = self.inner.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: usize::try_from(status.available).unwrap_or(0),
        }
    }

    /// Borrow a connection, waiting for one to become available.
    pub(crate) async fn get(&self) -> Result<Object<LinkManager>, SqlSavepointError> {
        self.inner.pool.get().await.map_err(|e| match e {
            PoolError::Backend(err) => err,
            other => SqlSavepointError::PoolError(format!("{}: {other}", self.inner.key)),
        })
    }

    /// Close every idle connection and refuse further checkouts.
    pub(crate) fn close(&self) {
        debug!(pool = %self.inner.key, "closing shared pool");
        self.inner.pool.close();
    }
}
