//! Application facing pool.
//!
//! [`DatabasePool`] owns a [`ConnectionPool`] and a [`Dispatcher`] of the
//! same size. Every operation comes in three forms: `*_sync` blocks the
//! calling thread, the plain form returns a [`Pending`], and `*_with` posts
//! a callback to a [`CompletionContext`].
//!
//! ```no_run
//! use dbpool::prelude::*;
//!
//! let config = PoolConfig::new("postgres", "localhost", 5432, "shop")
//!     .user("app")
//!     .password("secret")
//!     .pool_size(4);
//! let pool = DatabasePool::create_sync(&AnyDriver, &config).unwrap();
//!
//! let (kind, result) = pool.query_sync("SELECT id, name FROM users", &[]);
//! if kind.is_ok() {
//!     println!("{}", result.get("name", 0));
//! }
//! ```
//!
//! The blocking forms must not be called from inside an async runtime.

use crate::config::PoolConfig;
use crate::dispatch::{CompletionContext, Dispatcher, Pending};
use crate::driver::{AnySession, Driver, Session};
use crate::error::ErrorKind;
use crate::pool::{ConnectionPool, ReconnectReport};
use crate::result::QueryResult;
use crate::value::Value;

use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Pool of connections with its own workers.
pub struct DatabasePool<S: Session = AnySession> {
    pool: ConnectionPool<S>,
    dispatcher: Dispatcher,
    /// Holds the password; never logged.
    dsn: Arc<str>,
    max_retries: u32,
}

impl<S: Session> DatabasePool<S> {
    /// Open the pool described by `config`, blocking until every
    /// connection is up.
    pub fn create_sync<D>(driver: &D, config: &PoolConfig) -> Result<Self, ErrorKind>
    where
        D: Driver<Session = S>,
    {
        if config.pool_size <= 0 {
            tracing::error!(
                "Pool size must be strictly greater than 0. Provided {}.",
                config.pool_size
            );
            return Err(ErrorKind::InvalidPoolSize);
        }

        tracing::info!(
            "Creating pool of size {} with parameters {{{}}}, with{} password.",
            config.pool_size,
            config.redacted_connection_string(),
            if config.has_password() { "" } else { "out" }
        );

        let dispatcher = Dispatcher::new(config.pool_size as usize).map_err(|e| {
            tracing::error!("Failed to start pool workers: {}", e);
            ErrorKind::FailedToOpenConnection
        })?;

        let dsn = config.connection_string();

        // Sessions are bound to the runtime they were opened on.
        let pool = dispatcher.block_on(ConnectionPool::create(
            driver,
            &dsn,
            config.pool_size,
            config.timeout(),
        ))?;

        tracing::info!("Database pool created.");

        Ok(Self {
            pool,
            dispatcher,
            dsn: dsn.into(),
            max_retries: config.max_retries,
        })
    }

    /// Open the pool on a background thread and post the outcome to
    /// `context`.
    ///
    /// Fails only if the background thread cannot be started, in which case
    /// `callback` is never called.
    pub fn create<D, C, F>(driver: D, config: PoolConfig, context: C, callback: F) -> io::Result<()>
    where
        D: Driver<Session = S>,
        C: CompletionContext,
        F: FnOnce(Result<Self, ErrorKind>) + Send + 'static,
    {
        if config.pool_size <= 0 {
            tracing::error!(
                "Pool size must be strictly greater than 0. Provided {}.",
                config.pool_size
            );
            context.post(Box::new(move || callback(Err(ErrorKind::InvalidPoolSize))));
            return Ok(());
        }

        std::thread::Builder::new()
            .name("dbpool-create".to_string())
            .spawn(move || {
                let outcome = Self::create_sync(&driver, &config);
                context.post(Box::new(move || callback(outcome)));
            })?;
        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Connections not running a query right now.
    pub fn available_connections(&self) -> usize {
        self.pool.available()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run a statement and block until it is done.
    pub fn query_sync(&self, sql: &str, params: &[Value]) -> (ErrorKind, QueryResult) {
        self.query(sql, params.to_vec()).wait().unwrap_or_else(|e| {
            tracing::error!("Query `{}` did not complete: {}", sql, e);
            (ErrorKind::QueryFailed, QueryResult::empty())
        })
    }

    /// Run a statement on a worker.
    pub fn query(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> Pending<(ErrorKind, QueryResult)> {
        self.dispatcher.submit(run_query(
            self.pool.clone(),
            Arc::clone(&self.dsn),
            sql.into(),
            params,
            self.max_retries,
        ))
    }

    /// Run a statement on a worker and post `callback` to `context`.
    pub fn query_with<C, F>(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
        context: C,
        callback: F,
    ) where
        C: CompletionContext,
        F: FnOnce(ErrorKind, QueryResult) + Send + 'static,
    {
        self.dispatcher.submit_with(
            run_query(
                self.pool.clone(),
                Arc::clone(&self.dsn),
                sql.into(),
                params,
                self.max_retries,
            ),
            context,
            move |(kind, result)| callback(kind, result),
        );
    }

    /// Reconnect idle connections and block until done.
    pub fn reconnect_sync(&self, timeout: Duration) -> (ReconnectReport, ErrorKind) {
        self.reconnect(timeout).wait().unwrap_or_else(|e| {
            tracing::error!("Reconnect did not complete: {}", e);
            (ReconnectReport::default(), ErrorKind::FailedToOpenConnection)
        })
    }

    /// Reconnect idle connections on a worker. Connections busy with a
    /// query are skipped.
    pub fn reconnect(&self, timeout: Duration) -> Pending<(ReconnectReport, ErrorKind)> {
        self.dispatcher.submit(run_reconnect(self.pool.clone(), Arc::clone(&self.dsn), timeout))
    }

    pub fn reconnect_with<C, F>(&self, timeout: Duration, context: C, callback: F)
    where
        C: CompletionContext,
        F: FnOnce(ReconnectReport, ErrorKind) + Send + 'static,
    {
        self.dispatcher.submit_with(
            run_reconnect(self.pool.clone(), Arc::clone(&self.dsn), timeout),
            context,
            move |(report, kind)| callback(report, kind),
        );
    }
}

async fn run_query<S: Session>(
    pool: ConnectionPool<S>,
    dsn: Arc<str>,
    sql: String,
    params: Vec<Value>,
    max_retries: u32,
) -> (ErrorKind, QueryResult) {
    let mut handle = pool.acquire_one().await;
    handle.query(&sql, &dsn, &params, max_retries).await
}

async fn run_reconnect<S: Session>(
    pool: ConnectionPool<S>,
    dsn: Arc<str>,
    timeout: Duration,
) -> (ReconnectReport, ErrorKind) {
    let report = pool.reconnect(&dsn, timeout).await;
    let kind = report.error();
    (report, kind)
}

impl<S: Session> std::fmt::Debug for DatabasePool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("pool", &self.pool)
            .field("dispatcher", &self.dispatcher)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
