//! Pool configuration.
//!
//! Loaded from TOML, e.g.
//!
//! ```toml
//! driver = "postgres"
//! user = "app"
//! password = "secret"
//! server = "db.internal"
//! port = 5432
//! database = "shop"
//! pool_size = 8
//! ```

use crate::connection::DEFAULT_MAX_RETRIES;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection and sizing parameters of a pool.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub driver: String,
    pub user: String,
    /// Never logged.
    pub password: String,
    pub server: String,
    pub port: u16,
    pub database: String,
    /// Validated when the pool is created, not here.
    pub pool_size: i32,
    /// 0 leaves the timeout to the driver.
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            driver: "postgres".to_string(),
            user: String::new(),
            password: String::new(),
            server: "localhost".to_string(),
            port: 5432,
            database: String::new(),
            pool_size: 4,
            connect_timeout_secs: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl PoolConfig {
    pub fn new(driver: &str, server: &str, port: u16, database: &str) -> Self {
        Self {
            driver: driver.to_string(),
            server: server.to_string(),
            port,
            database: database.to_string(),
            ..Self::default()
        }
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    pub fn pool_size(mut self, size: i32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set connect timeout (0 = driver default).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }

    /// Reconnect attempts per query after a lost connection.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    /// The connection string without the password, safe to log.
    pub fn redacted_connection_string(&self) -> String {
        format!(
            "DRIVER={};UID={};PORT={};DATABASE={};SERVER={};TCPIP=1;",
            self.driver, self.user, self.port, self.database, self.server
        )
    }

    /// The full connection string. `PWD` only appears with a password.
    pub fn connection_string(&self) -> String {
        let mut dsn = self.redacted_connection_string();
        if self.has_password() {
            dsn.push_str("PWD=");
            if self.password.contains(';') {
                dsn.push('{');
                dsn.push_str(&self.password);
                dsn.push('}');
            } else {
                dsn.push_str(&self.password);
            }
        }
        dsn
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// `<config dir>/dbpool/pool.toml`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dbpool").join("pool.toml"))
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("driver", &self.driver)
            .field("user", &self.user)
            .field("password", &if self.has_password() { "<redacted>" } else { "" })
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("pool_size", &self.pool_size)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
