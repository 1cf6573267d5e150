use std::sync::LazyLock;

use postgresql_embedded::PostgreSQL;
use tokio::runtime::Runtime;

use crate::config::ConnectionParams;
use crate::handle::ConnectionHandle;

/// Runtime that owns the embedded server's setup and teardown.
static SHARED_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("Failed to create tokio runtime for test utilities"));

/// A running embedded `PostgreSQL` instance.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    pub port: u16,
    /// Working credentials for the database created at startup.
    pub params: ConnectionParams,
}

/// Start an embedded `PostgreSQL` server and create `database` on it.
///
/// # Errors
/// Returns an error if the bundled server cannot be set up or started, if the database
/// cannot be created, or if the post-start connectivity check fails.
pub fn setup_postgres_embedded(
    database: &str,
) -> Result<EmbeddedPostgres, Box<dyn std::error::Error>> {
    SHARED_RUNTIME.block_on(async {
        let mut postgresql = PostgreSQL::default();
        postgresql.setup().await?;
        postgresql.start().await?;
        postgresql.create_database(database).await?;

        let settings = postgresql.settings();
        let port = settings.port;
        let params = ConnectionParams::new(settings.host.clone(), settings.username.clone(), database)
            .password(settings.password.clone())
            .port(port);

        // Quick connection test
        let handle = ConnectionHandle::new(&params)?;
        handle.query("SELECT 1", &[]).await?;
        handle.close(false).await;
        println!("PostgreSQL started on port {port}");

        Ok(EmbeddedPostgres {
            postgresql,
            port,
            params,
        })
    })
}

/// Stop a previously started embedded `PostgreSQL` instance.
pub fn stop_postgres_embedded(postgres: EmbeddedPostgres) {
    let EmbeddedPostgres { postgresql, .. } = postgres;
    SHARED_RUNTIME.block_on(async move {
        let _ = postgresql.stop().await;
    });
}
