//! Scripted in-memory [`Connector`] for exercising handles without a server.
//!
//! Every statement is recorded. Results are canned per statement text (an empty result
//! otherwise), failures can be injected by exact text or prefix, and connection events
//! can be pushed to every live link.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::SqlSavepointError;
use crate::link::{ConnectionEvent, Connector, EVENT_CHANNEL_CAPACITY, Link};
use crate::query_builder::Statement;
use crate::results::ResultSet;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LiveLink {
    events: broadcast::Sender<ConnectionEvent>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct Inner {
    log: Mutex<Vec<Statement>>,
    responses: Mutex<HashMap<String, ResultSet>>,
    failures: Mutex<Vec<String>>,
    failure_prefixes: Mutex<Vec<String>>,
    refuse: AtomicBool,
    delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    ended: AtomicUsize,
    next_id: AtomicUsize,
    live: Mutex<HashMap<usize, LiveLink>>,
}

/// Cloning shares the script, the log and the set of live links.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `result` whenever exactly `sql` is run.
    pub fn respond(&self, sql: &str, result: ResultSet) {
        lock(&self.inner.responses).insert(sql.to_string(), result);
    }

    /// Fail every statement whose text is exactly `sql`.
    pub fn fail_on(&self, sql: &str) {
        lock(&self.inner.failures).push(sql.to_string());
    }

    /// Fail every statement whose text starts with `prefix`.
    pub fn fail_prefix(&self, prefix: &str) {
        lock(&self.inner.failure_prefixes).push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.inner.failures).clear();
        lock(&self.inner.failure_prefixes).clear();
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make every handshake take `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.inner.delay) = Some(delay);
    }

    /// Texts of every statement run so far, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        lock(&self.inner.log).iter().map(|s| s.text.clone()).collect()
    }

    /// Parameters of every statement run so far, in order.
    #[must_use]
    pub fn params(&self) -> Vec<Vec<crate::types::SqlValue>> {
        lock(&self.inner.log).iter().map(|s| s.params.clone()).collect()
    }

    pub fn clear_log(&self) {
        lock(&self.inner.log).clear();
    }

    /// Number of successful handshakes.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of links explicitly terminated.
    #[must_use]
    pub fn ended(&self) -> usize {
        self.inner.ended.load(Ordering::SeqCst)
    }

    /// Links not yet dropped or terminated.
    #[must_use]
    pub fn live_links(&self) -> usize {
        lock(&self.inner.live).len()
    }

    /// Publish `event` on every live link; returns how many subscribers received it.
    pub fn emit(&self, event: ConnectionEvent) -> usize {
        lock(&self.inner.live)
            .values()
            .map(|link| link.events.send(event.clone()).unwrap_or(0))
            .sum()
    }

    /// Simulate the server terminating every live connection.
    pub fn kill_all(&self) {
        for link in lock(&self.inner.live).values() {
            link.closed.store(true, Ordering::SeqCst);
            let _ = link
                .events
                .send(ConnectionEvent::Error("terminating connection".to_string()));
        }
    }

    fn should_fail(&self, sql: &str) -> bool {
        lock(&self.inner.failures).iter().any(|f| f == sql)
            || lock(&self.inner.failure_prefixes)
                .iter()
                .any(|p| sql.starts_with(p.as_str()))
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Link>, SqlSavepointError> {
        let delay = *lock(&self.inner.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(SqlSavepointError::ConnectionError(
                "connection refused".to_string(),
            ));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        lock(&self.inner.live).insert(
            id,
            LiveLink {
                events: events.clone(),
                closed: Arc::clone(&closed),
            },
        );
        Ok(Box::new(MemoryLink {
            id,
            connector: self.clone(),
            events,
            closed,
        }))
    }
}

struct MemoryLink {
    id: usize,
    connector: MemoryConnector,
    events: broadcast::Sender<ConnectionEvent>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Link for MemoryLink {
    async fn query(&mut self, statement: &Statement) -> Result<ResultSet, SqlSavepointError> {
        if self.is_closed() {
            return Err(SqlSavepointError::ConnectionError(
                "connection terminated".to_string(),
            ));
        }
        let inner = &self.connector.inner;
        lock(&inner.log).push(statement.clone());
        if self.connector.should_fail(&statement.text) {
            return Err(SqlSavepointError::StatementError(format!(
                "forced failure: {}",
                statement.text
            )));
        }
        Ok(lock(&inner.responses)
            .get(&statement.text)
            .cloned()
            .unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn end(self: Box<Self>) {
        self.closed.store(true, Ordering::SeqCst);
        self.connector.inner.ended.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        lock(&self.connector.inner.live).remove(&self.id);
    }
}
