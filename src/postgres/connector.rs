use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_postgres::tls::NoTlsStream;
use tokio_postgres::{AsyncMessage, Client, Connection, NoTls, Socket};
use tracing::{debug, warn};

use crate::config::ConnectionParams;
use crate::error::SqlSavepointError;
use crate::link::{ConnectionEvent, Connector, EVENT_CHANNEL_CAPACITY, Link};
use crate::query_builder::Statement;
use crate::results::ResultSet;

use super::params::Params;
use super::query::build_result_set;

/// Opens plain (non-TLS) tokio-postgres connections from stored credentials.
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: tokio_postgres::Config,
}

impl PgConnector {
    /// # Errors
    /// Returns `SqlSavepointError::ConfigError` if required fields are missing.
    pub fn new(params: &ConnectionParams) -> Result<Self, SqlSavepointError> {
        Ok(Self {
            config: params.to_pg_config()?,
        })
    }

    #[must_use]
    pub fn from_config(config: tokio_postgres::Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn Link>, SqlSavepointError> {
        debug!(
            hosts = ?self.config.get_hosts(),
            db = ?self.config.get_dbname(),
            user = ?self.config.get_user(),
            "postgres connect start"
        );
        let (client, connection) = self.config.connect(NoTls).await.map_err(|e| {
            SqlSavepointError::ConnectionError(format!("postgres connect error: {e}"))
        })?;
        debug!("postgres connect established");

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let driver = tokio::spawn(drive_connection(connection, events.clone()));
        Ok(Box::new(PgLink {
            client,
            events,
            driver,
        }))
    }
}

/// Polls the socket half of a connection, publishing notifications and the terminal
/// error (if any) on `events`.
async fn drive_connection(
    mut connection: Connection<Socket, NoTlsStream>,
    events: broadcast::Sender<ConnectionEvent>,
) {
    let mut messages = futures_util::stream::poll_fn(move |cx| connection.poll_message(cx));
    while let Some(message) = messages.next().await {
        match message {
            Ok(AsyncMessage::Notification(n)) => {
                let _ = events.send(ConnectionEvent::Notification {
                    process_id: n.process_id(),
                    channel: n.channel().to_string(),
                    payload: n.payload().to_string(),
                });
            }
            Ok(AsyncMessage::Notice(notice)) => {
                debug!(severity = notice.severity(), message = notice.message(), "postgres notice");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "postgres connection failed");
                let _ = events.send(ConnectionEvent::Error(e.to_string()));
                break;
            }
        }
    }
}

/// A live tokio-postgres client plus the task driving its socket.
pub struct PgLink {
    client: Client,
    events: broadcast::Sender<ConnectionEvent>,
    driver: JoinHandle<()>,
}

#[async_trait]
impl Link for PgLink {
    async fn query(&mut self, statement: &Statement) -> Result<ResultSet, SqlSavepointError> {
        let params = Params::convert(&statement.params);
        let stmt = self.client.prepare(&statement.text).await?;
        if stmt.columns().is_empty() {
            let affected = self.client.execute(&stmt, params.as_refs()).await?;
            return Ok(ResultSet::affected(affected));
        }
        let rows = self.client.query(&stmt, params.as_refs()).await?;
        build_result_set(&stmt, &rows)
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    async fn end(self: Box<Self>) {
        let PgLink { client, driver, .. } = *self;
        // Dropping the client sends Terminate; the driver finishes once the socket closes.
        drop(client);
        let _ = driver.await;
    }
}
