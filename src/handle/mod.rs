//! Lazily connected handle owning at most one physical connection.

mod tx;

use std::sync::Arc;

use deadpool::managed::Object;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{ConnectionParams, PoolKey};
use crate::error::SqlSavepointError;
use crate::link::{ConnectionEvent, Connector, EVENT_CHANNEL_CAPACITY, Link};
use crate::pool::{LinkManager, PoolRegistry, SharedPool};
use crate::postgres::PgConnector;
use crate::query_builder::Statement;
use crate::results::ResultSet;
use crate::transaction::TransactionStack;

enum Source {
    Direct(Arc<dyn Connector>),
    Pooled {
        registry: PoolRegistry,
        key: PoolKey,
        max_size: usize,
        connector: Arc<dyn Connector>,
    },
}

enum HeldLink {
    Direct(Box<dyn Link>),
    Pooled(Object<LinkManager>),
}

impl HeldLink {
    fn link(&mut self) -> &mut (dyn Link + 'static) {
        match self {
            HeldLink::Direct(link) => &mut **link,
            HeldLink::Pooled(object) => &mut *object.link,
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            HeldLink::Direct(link) => link.is_closed(),
            HeldLink::Pooled(object) => object.link.is_closed(),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        match self {
            HeldLink::Direct(link) => link.subscribe(),
            HeldLink::Pooled(object) => object.link.subscribe(),
        }
    }

    /// Only tracked for pooled links; a direct link dies with its transaction.
    fn in_transaction(&self) -> bool {
        match self {
            HeldLink::Direct(_) => false,
            HeldLink::Pooled(object) => object.in_transaction,
        }
    }

    fn set_in_transaction(&mut self, open: bool) {
        if let HeldLink::Pooled(object) = self {
            object.in_transaction = open;
        }
    }

    /// Pooled links go back to the pool, direct links are terminated.
    async fn release(self) {
        match self {
            HeldLink::Direct(link) => link.end().await,
            HeldLink::Pooled(object) => drop(object),
        }
    }
}

/// Aborts the event relay when the connection is released or the handle dropped.
struct Forwarder(JoinHandle<()>);

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Held {
    link: HeldLink,
    _forwarder: Forwarder,
}

pub(crate) struct Conn {
    held: Option<Held>,
    pool: Option<SharedPool>,
}

impl Conn {
    /// Record whether the server session is inside `BEGIN`, so a pooled connection
    /// returned without `close` gets rolled back before reuse.
    fn set_in_transaction(&mut self, open: bool) {
        if let Some(held) = &mut self.held {
            held.link.set_in_transaction(open);
        }
    }
}

struct HandleState {
    conn: Conn,
    transactions: TransactionStack,
}

/// Connection handle with lazy connect, transparent reconnect and nested transactions.
///
/// All work on a handle is serialized: statements from concurrent callers never
/// interleave on the wire, and concurrent first uses share a single connect.
pub struct ConnectionHandle {
    source: Source,
    state: Mutex<HandleState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("pooled", &self.is_pooled())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// A direct Postgres handle; nothing is opened until first use.
    ///
    /// # Errors
    /// Returns `SqlSavepointError::ConfigError` for incomplete parameters.
    pub fn new(params: &ConnectionParams) -> Result<Self, SqlSavepointError> {
        Ok(Self::direct(Arc::new(PgConnector::new(params)?)))
    }

    /// A handle that opens its own connection through `connector`.
    #[must_use]
    pub fn direct(connector: Arc<dyn Connector>) -> Self {
        Self::with_source(Source::Direct(connector), None)
    }

    pub(crate) fn pooled(
        registry: PoolRegistry,
        key: PoolKey,
        max_size: usize,
        connector: Arc<dyn Connector>,
        pool: SharedPool,
    ) -> Self {
        Self::with_source(
            Source::Pooled {
                registry,
                key,
                max_size,
                connector,
            },
            Some(pool),
        )
    }

    fn with_source(source: Source, pool: Option<SharedPool>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            source,
            state: Mutex::new(HandleState {
                conn: Conn { held: None, pool },
                transactions: TransactionStack::new(),
            }),
            events,
        }
    }

    #[must_use]
    pub fn is_pooled(&self) -> bool {
        matches!(self.source, Source::Pooled { .. })
    }

    /// Subscribe to connection errors and server notifications. Events are relayed only
    /// while the handle holds a connection.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// The shared pool this handle currently borrows from, if pooled.
    pub async fn pool(&self) -> Option<SharedPool> {
        self.state.lock().await.conn.pool.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.conn.held.is_some()
    }

    /// Nesting depth the next `begin` will open at.
    pub async fn transaction_depth(&self) -> usize {
        self.state.lock().await.transactions.current_depth()
    }

    /// Establish the connection if it is not already cached.
    ///
    /// # Errors
    /// Returns the connect or checkout error; the handle stays disconnected.
    pub async fn connect(&self) -> Result<(), SqlSavepointError> {
        let mut guard = self.state.lock().await;
        let HandleState { conn, transactions } = &mut *guard;
        self.attach(conn, transactions).await.map(|_| ())
    }

    /// Send one statement and return its rows. Server errors propagate unchanged.
    ///
    /// # Errors
    /// Returns connection errors or the statement's error.
    pub async fn execute(&self, statement: &Statement) -> Result<ResultSet, SqlSavepointError> {
        let mut guard = self.state.lock().await;
        let HandleState { conn, transactions } = &mut *guard;
        let link = self.attach(conn, transactions).await?;
        send(link, statement).await
    }

    /// Release the connection and forget every open transaction.
    ///
    /// With `force` a pooled handle also shuts the shared pool down and unregisters it.
    /// Closing twice is a no-op; the next call on the handle reconnects.
    pub async fn close(&self, force: bool) {
        let mut guard = self.state.lock().await;
        let HandleState { conn, transactions } = &mut *guard;

        if let Some(mut held) = conn.held.take() {
            if held.link.in_transaction() && !held.link.is_closed() {
                // The connection survives in the pool, so its transaction must not.
                match send(held.link.link(), &Statement::raw("ROLLBACK")).await {
                    Ok(_) => held.link.set_in_transaction(false),
                    Err(e) => {
                        warn!(error = %e, "rollback before returning connection to pool failed");
                    }
                }
            }
            held.link.release().await;
            debug!(pooled = self.is_pooled(), "connection released");
        }
        transactions.reset();

        if force {
            if let (Source::Pooled { registry, .. }, Some(pool)) = (&self.source, conn.pool.take()) {
                pool.close();
                registry.remove_if_same(&pool);
            }
        }
    }

    /// Return the cached link, connecting first if needed.
    ///
    /// A cached link the server has closed is dropped; if transactions were open on it
    /// they are gone, so the stack is reset and the caller is told.
    async fn attach<'c>(
        &self,
        conn: &'c mut Conn,
        transactions: &mut TransactionStack,
    ) -> Result<&'c mut (dyn Link + 'static), SqlSavepointError> {
        let held = match conn.held.take() {
            Some(held) if !held.link.is_closed() => held,
            Some(stale) => {
                warn!("cached connection was closed by the server");
                stale.link.release().await;
                let open = transactions.len();
                transactions.reset();
                if open > 0 {
                    return Err(SqlSavepointError::ConnectionError(format!(
                        "connection lost with {open} open transaction(s)"
                    )));
                }
                self.establish(&mut conn.pool).await?
            }
            None => self.establish(&mut conn.pool).await?,
        };
        Ok(conn.held.insert(held).link.link())
    }

    async fn establish(
        &self,
        pool_slot: &mut Option<SharedPool>,
    ) -> Result<Held, SqlSavepointError> {
        let link = match &self.source {
            Source::Direct(connector) => HeldLink::Direct(connector.connect().await?),
            Source::Pooled {
                registry,
                key,
                max_size,
                connector,
            } => {
                let pool = match pool_slot {
                    Some(pool) if !pool.is_closed() => pool.clone(),
                    _ => {
                        let pool = registry.lookup_or_create(key, *max_size, connector)?;
                        *pool_slot = Some(pool.clone());
                        pool
                    }
                };
                HeldLink::Pooled(pool.get().await?)
            }
        };
        let forwarder = tokio::spawn(forward_events(link.subscribe(), self.events.clone()));
        debug!(pooled = self.is_pooled(), "connection attached");
        Ok(Held {
            link,
            _forwarder: Forwarder(forwarder),
        })
    }
}

async fn send(link: &mut dyn Link, statement: &Statement) -> Result<ResultSet, SqlSavepointError> {
    debug!(sql = %statement.text, params = statement.params.len(), "executing statement");
    link.query(statement).await
}

async fn forward_events(
    mut rx: broadcast::Receiver<ConnectionEvent>,
    tx: broadcast::Sender<ConnectionEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "connection events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::memory::MemoryConnector;

    fn handle() -> (MemoryConnector, ConnectionHandle) {
        let connector = MemoryConnector::new();
        let handle = ConnectionHandle::direct(Arc::new(connector.clone()));
        (connector, handle)
    }

    #[tokio::test]
    async fn connects_lazily_and_once() {
        let (connector, handle) = handle();
        assert!(!handle.is_connected().await);
        assert_eq!(connector.connects(), 0);

        handle.connect().await.unwrap();
        handle.connect().await.unwrap();
        handle.execute(&Statement::raw("SELECT 1")).await.unwrap();
        assert_eq!(connector.connects(), 1);
        assert!(handle.is_connected().await);
    }

    #[tokio::test]
    async fn concurrent_connects_share_one_attempt() {
        let (connector, handle) = handle();
        connector.set_connect_delay(Duration::from_millis(50));
        let handle = Arc::new(handle);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = Arc::clone(&handle);
            tasks.push(tokio::spawn(async move { handle.connect().await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn failed_connect_can_be_retried() {
        let (connector, handle) = handle();
        connector.refuse_connections(true);
        let err = handle.connect().await.unwrap_err();
        assert!(matches!(err, SqlSavepointError::ConnectionError(_)));
        assert!(!handle.is_connected().await);

        connector.refuse_connections(false);
        handle.connect().await.unwrap();
        assert!(handle.is_connected().await);
    }

    #[tokio::test]
    async fn close_terminates_direct_link_and_is_idempotent() {
        let (connector, handle) = handle();
        handle.connect().await.unwrap();
        handle.close(false).await;
        handle.close(false).await;
        assert_eq!(connector.ended(), 1);
        assert!(!handle.is_connected().await);
    }

    #[tokio::test]
    async fn close_then_use_reconnects_transparently() {
        let (connector, handle) = handle();
        handle.execute(&Statement::raw("SELECT 1")).await.unwrap();
        handle.close(false).await;
        handle.execute(&Statement::raw("SELECT 2")).await.unwrap();
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.statements(), ["SELECT 1", "SELECT 2"]);
    }

    #[tokio::test]
    async fn statement_errors_propagate_unchanged() {
        let (connector, handle) = handle();
        connector.fail_on("SELEC");
        let err = handle.execute(&Statement::raw("SELEC")).await.unwrap_err();
        assert!(err.is_statement_error());
        assert!(err.to_string().contains("SELEC"));
        // The connection is kept.
        handle.execute(&Statement::raw("SELECT 1")).await.unwrap();
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn server_closed_link_is_replaced() {
        let (connector, handle) = handle();
        handle.connect().await.unwrap();
        connector.kill_all();
        handle.execute(&Statement::raw("SELECT 1")).await.unwrap();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn server_closed_link_reports_lost_transactions() {
        let (connector, handle) = handle();
        let token = handle.begin().await.unwrap();
        connector.kill_all();
        let err = handle.execute(&Statement::raw("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, SqlSavepointError::ConnectionError(_)));
        assert_eq!(handle.transaction_depth().await, 0);
        assert!(handle.commit(&token).await.unwrap_err().is_invalid_transaction());
        handle.execute(&Statement::raw("SELECT 1")).await.unwrap();
    }

    #[tokio::test]
    async fn forwards_events_until_closed() {
        let (connector, handle) = handle();
        let mut events = handle.subscribe();
        handle.connect().await.unwrap();
        let notification = ConnectionEvent::Notification {
            process_id: 7,
            channel: "jobs".into(),
            payload: "42".into(),
        };
        assert_eq!(connector.emit(notification.clone()), 1);
        let received = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, notification);

        handle.close(false).await;
        assert_eq!(connector.emit(ConnectionEvent::Error("late".into())), 0);
    }
}
