//! The physical-connection seam.
//!
//! A [`Connector`] produces [`Link`]s; a link runs statements and publishes events the
//! server sends outside any in-flight call. The Postgres implementation lives in
//! [`crate::postgres`]; tests plug in [`crate::test_utils::memory`].

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::SqlSavepointError;
use crate::query_builder::Statement;
use crate::results::ResultSet;

/// Capacity of every event channel; slow receivers observe `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Asynchronous event raised by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection failed outside a statement (e.g. terminated by the server).
    Error(String),
    /// `NOTIFY` payload delivered on a channel this session listens to.
    Notification {
        process_id: i32,
        channel: String,
        payload: String,
    },
}

/// One physical connection.
#[async_trait]
pub trait Link: Send {
    /// Run a statement and return its rows in order.
    async fn query(&mut self, statement: &Statement) -> Result<ResultSet, SqlSavepointError>;

    /// Subscribe to the connection's error and notification stream.
    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// True once the server side of the connection is gone.
    fn is_closed(&self) -> bool;

    /// Terminate the connection.
    async fn end(self: Box<Self>);
}

/// Establishes new links (performs the handshake).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Link>, SqlSavepointError>;
}
