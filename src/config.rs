use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SqlSavepointError;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_POOL_SIZE: usize = 10;

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

/// Credentials and settings needed to (re)establish a Postgres connection.
///
/// Deserializes from the usual `db.json` credential file layout:
/// ```rust
/// use pg_savepoint::ConnectionParams;
///
/// let params = ConnectionParams::from_json_str(
///     r#"{ "host": "localhost", "user": "app", "password": "secret", "database": "shop" }"#,
/// )?;
/// assert_eq!(params.identity()?.as_str(), "app@localhost/shop");
/// # Ok::<(), pg_savepoint::SqlSavepointError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(alias = "dbname")]
    pub database: Option<String>,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    /// Maximum number of physical connections when used through a pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            application_name: None,
            connect_timeout_secs: None,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl ConnectionParams {
    #[must_use]
    pub fn new(host: impl Into<String>, user: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            user: Some(user.into()),
            database: Some(database.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Parse parameters from a JSON document.
    ///
    /// # Errors
    /// Returns `SqlSavepointError::ConfigError` if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, SqlSavepointError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read parameters from a JSON credential file.
    ///
    /// # Errors
    /// Returns `SqlSavepointError::ConfigError` if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SqlSavepointError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SqlSavepointError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Check that every field needed to open a connection is present.
    ///
    /// # Errors
    /// Returns `SqlSavepointError::ConfigError` naming the first missing field.
    pub fn validate(&self) -> Result<(), SqlSavepointError> {
        if self.database.is_none() {
            return Err(SqlSavepointError::ConfigError(
                "database is required".to_string(),
            ));
        }
        if self.host.is_none() {
            return Err(SqlSavepointError::ConfigError("host is required".to_string()));
        }
        if self.user.is_none() {
            return Err(SqlSavepointError::ConfigError("user is required".to_string()));
        }
        if self.pool_size == 0 {
            return Err(SqlSavepointError::ConfigError(
                "pool_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The identity shared pools are keyed by.
    ///
    /// # Errors
    /// Returns `SqlSavepointError::ConfigError` if user, host or database is missing.
    pub fn identity(&self) -> Result<PoolKey, SqlSavepointError> {
        self.validate()?;
        Ok(PoolKey::new(
            self.user.as_deref().unwrap_or_default(),
            self.host.as_deref().unwrap_or_default(),
            self.database.as_deref().unwrap_or_default(),
        ))
    }

    /// Build the driver configuration.
    ///
    /// # Errors
    /// Returns `SqlSavepointError::ConfigError` if required fields are missing.
    pub fn to_pg_config(&self) -> Result<tokio_postgres::Config, SqlSavepointError> {
        self.validate()?;
        let mut cfg = tokio_postgres::Config::new();
        if let Some(host) = &self.host {
            cfg.host(host);
        }
        cfg.port(self.port.unwrap_or(DEFAULT_PORT));
        if let Some(user) = &self.user {
            cfg.user(user);
        }
        if let Some(password) = &self.password {
            cfg.password(password);
        }
        if let Some(database) = &self.database {
            cfg.dbname(database);
        }
        if let Some(name) = &self.application_name {
            cfg.application_name(name);
        }
        if let Some(secs) = self.connect_timeout_secs {
            cfg.connect_timeout(Duration::from_secs(secs));
        }
        Ok(cfg)
    }
}

/// Process-unique identity of a shared pool: `user@host/database`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(String);

impl PoolKey {
    #[must_use]
    pub fn new(user: &str, host: &str, database: &str) -> Self {
        Self(format!("{user}@{host}/{database}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_credential_file_layout() {
        let params = ConnectionParams::from_json_str(
            r#"{ "host": "db", "port": 6543, "user": "u", "password": "p", "dbname": "d" }"#,
        )
        .unwrap();
        assert_eq!(params.database.as_deref(), Some("d"));
        assert_eq!(params.port, Some(6543));
        assert_eq!(params.pool_size, 10);
        assert_eq!(params.identity().unwrap(), PoolKey::new("u", "db", "d"));
    }

    #[test]
    fn missing_fields_are_config_errors() {
        let params = ConnectionParams {
            host: Some("db".into()),
            ..ConnectionParams::default()
        };
        let err = params.identity().unwrap_err();
        assert!(matches!(err, SqlSavepointError::ConfigError(msg) if msg.contains("database")));

        let zero = ConnectionParams::new("h", "u", "d").pool_size(0);
        assert!(matches!(zero.validate(), Err(SqlSavepointError::ConfigError(_))));
    }

    #[test]
    fn identity_ignores_password_and_port() {
        let a = ConnectionParams::new("h", "u", "d").password("x").port(1);
        let b = ConnectionParams::new("h", "u", "d").password("y").port(2);
        assert_eq!(a.identity().unwrap(), b.identity().unwrap());
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, r#"{ "host": "h", "user": "u", "database": "d" }"#).unwrap();
        let params = ConnectionParams::from_json_file(&path).unwrap();
        assert_eq!(params.to_pg_config().unwrap().get_dbname(), Some("d"));
        assert!(ConnectionParams::from_json_file(dir.path().join("nope.json")).is_err());
    }
}
