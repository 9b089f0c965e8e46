//! Fixed-size connection pool.
//!
//! All connections are opened up front and the pool never grows or shrinks.
//! Acquisition scans for a free connection; releasing one wakes a single
//! waiter. Callers are expected to stay within the pool size (the
//! dispatcher guarantees it), so waiting is the exception.

use crate::connection::{self, Connection};
use crate::driver::{Driver, Session};
use crate::error::ErrorKind;
use crate::result::QueryResult;
use crate::value::Value;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{MutexGuard, Notify};

/// Outcome of [`ConnectionPool::reconnect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconnectReport {
    pub reconnected: usize,
    /// Connections busy with a query, left untouched.
    pub skipped: usize,
    pub failed: usize,
}

impl ReconnectReport {
    /// `FailedToOpenConnection` when nothing was reconnected.
    pub fn error(&self) -> ErrorKind {
        if self.reconnected == 0 {
            ErrorKind::FailedToOpenConnection
        } else {
            ErrorKind::None
        }
    }
}

impl std::fmt::Display for ReconnectReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} reconnected, {} skipped, {} failed",
            self.reconnected, self.skipped, self.failed
        )
    }
}

struct PoolInner<S> {
    connections: Vec<Connection<S>>,
    released: Notify,
}

/// A fixed set of connections. Clones share the same connections.
pub struct ConnectionPool<S> {
    inner: Arc<PoolInner<S>>,
}

impl<S> Clone for ConnectionPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Session> ConnectionPool<S> {
    /// Open `count` sessions to `dsn`.
    ///
    /// All or nothing: a single session that fails to open fails the pool,
    /// and the sessions opened so far are dropped with it.
    pub async fn create<D>(
        driver: &D,
        dsn: &str,
        count: i32,
        timeout: Duration,
    ) -> Result<Self, ErrorKind>
    where
        D: Driver<Session = S>,
    {
        if count <= 0 {
            tracing::error!("Invalid pool size {}.", count);
            return Err(ErrorKind::InvalidPoolSize);
        }

        let mut connections = Vec::with_capacity(count as usize);
        for index in 0..count {
            match driver.open(dsn, timeout).await {
                Ok(session) => connections.push(Connection::new(session)),
                Err(e) => {
                    tracing::error!(
                        "Failed to open connection {} of {}. State: {}. Code: {}. Reason: {}",
                        index + 1,
                        count,
                        e.state,
                        e.native,
                        e.message
                    );
                    return Err(ErrorKind::FailedToOpenConnection);
                }
            }
        }

        tracing::info!("Opened {} connections.", count);

        Ok(Self {
            inner: Arc::new(PoolInner {
                connections,
                released: Notify::new(),
            }),
        })
    }

    /// Take the first free connection, waiting for a release if all are busy.
    pub async fn acquire_one(&self) -> ConnectionHandle<'_, S> {
        loop {
            // Register before scanning so a release between the scan and the
            // wait is not missed.
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(handle) = self.try_acquire_any() {
                return handle;
            }

            tracing::debug!("All {} connections busy, waiting.", self.size());
            released.await;
        }
    }

    /// Take the first free connection, if any.
    pub fn try_acquire_any(&self) -> Option<ConnectionHandle<'_, S>> {
        self.inner
            .connections
            .iter()
            .position(Connection::try_acquire)
            .map(|index| ConnectionHandle::new(self, index))
    }

    /// Take connection `index` if it is free.
    pub fn try_acquire_at(&self, index: usize) -> Option<ConnectionHandle<'_, S>> {
        let connection = self.inner.connections.get(index)?;
        connection
            .try_acquire()
            .then(|| ConnectionHandle::new(self, index))
    }

    /// Reconnect every idle connection to `dsn`.
    ///
    /// Connections held by a running query are skipped; the others are taken
    /// for the duration of their reconnect, so queries can keep running.
    pub async fn reconnect(&self, dsn: &str, timeout: Duration) -> ReconnectReport {
        let mut report = ReconnectReport::default();

        for index in 0..self.size() {
            let Some(mut handle) = self.try_acquire_at(index) else {
                report.skipped += 1;
                continue;
            };

            if handle.connect(dsn, timeout).await {
                report.reconnected += 1;
            } else {
                report.failed += 1;
            }
        }

        tracing::info!("Reconnect finished: {}.", report);
        report
    }

    pub fn size(&self) -> usize {
        self.inner.connections.len()
    }

    /// Number of connections not held right now.
    pub fn available(&self) -> usize {
        self.inner
            .connections
            .iter()
            .filter(|c| c.is_available())
            .count()
    }

    pub fn connections(&self) -> &[Connection<S>] {
        &self.inner.connections
    }

    fn release(&self, index: usize) {
        self.inner.connections[index].unlock();
        self.inner.released.notify_one();
    }
}

impl<S> std::fmt::Debug for ConnectionPool<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connections", &self.inner.connections)
            .finish()
    }
}

/// Exclusive loan of one pool connection, returned on drop.
pub struct ConnectionHandle<'a, S: Session> {
    // Dropped in declaration order: the session guard goes before the
    // connection is handed back, so the next holder finds it unlocked.
    session: MutexGuard<'a, S>,
    loan: Loan<'a, S>,
}

/// Gives connection `index` back to the pool and wakes one waiter.
struct Loan<'a, S: Session> {
    pool: &'a ConnectionPool<S>,
    index: usize,
}

impl<S: Session> Drop for Loan<'_, S> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

impl<'a, S: Session> ConnectionHandle<'a, S> {
    /// The caller must have won connection `index`'s flag.
    fn new(pool: &'a ConnectionPool<S>, index: usize) -> Self {
        let connection: &'a Connection<S> = &pool.inner.connections[index];
        Self {
            session: connection.session(),
            loan: Loan { pool, index },
        }
    }

    /// Position of the held connection in the pool.
    pub fn index(&self) -> usize {
        self.loan.index
    }

    pub fn connection(&self) -> &'a Connection<S> {
        &self.loan.pool.inner.connections[self.loan.index]
    }

    /// The underlying driver session.
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Run a statement on the held connection, see [`connection::query`].
    pub async fn query(
        &mut self,
        sql: &str,
        dsn: &str,
        params: &[Value],
        max_retries: u32,
    ) -> (ErrorKind, QueryResult) {
        connection::query(self.session_mut(), sql, dsn, params, max_retries).await
    }

    pub async fn connect(&mut self, dsn: &str, timeout: Duration) -> bool {
        connection::connect(self.session_mut(), dsn, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Response, ScriptedDriver, ScriptedSession};
    use pretty_assertions::assert_eq;

    async fn pool(driver: &ScriptedDriver, size: i32) -> ConnectionPool<ScriptedSession> {
        ConnectionPool::create(driver, "dsn", size, Duration::ZERO)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_sizes_open_nothing() {
        let driver = ScriptedDriver::new();
        for size in [0, -1] {
            let err = ConnectionPool::create(&driver, "dsn", size, Duration::ZERO)
                .await
                .unwrap_err();
            assert_eq!(err, ErrorKind::InvalidPoolSize);
        }
        assert_eq!(driver.opens(), 0);
    }

    #[tokio::test]
    async fn test_one_unreachable_endpoint_fails_the_pool() {
        let driver = ScriptedDriver::new();
        driver.unreachable_at(2);
        let err = ConnectionPool::create(&driver, "dsn", 4, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, ErrorKind::FailedToOpenConnection);
        assert_eq!(driver.opens(), 3);
    }

    #[tokio::test]
    async fn test_handles_are_exclusive() {
        let driver = ScriptedDriver::new();
        let pool = pool(&driver, 3).await;

        let a = pool.try_acquire_any().unwrap();
        let b = pool.try_acquire_any().unwrap();
        let c = pool.try_acquire_any().unwrap();
        assert!(pool.try_acquire_any().is_none());

        let mut indexes = vec![a.index(), b.index(), c.index()];
        indexes.sort();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(!a.connection().is_available());
        assert_eq!(pool.available(), 0);

        drop(b);
        assert_eq!(pool.available(), 1);
        let d = pool.try_acquire_any().unwrap();
        assert_eq!(d.index(), 1);
    }

    #[tokio::test]
    async fn test_try_acquire_at() {
        let driver = ScriptedDriver::new();
        let pool = pool(&driver, 2).await;

        let held = pool.try_acquire_at(1).unwrap();
        assert!(pool.try_acquire_at(1).is_none());
        assert!(pool.try_acquire_at(5).is_none());
        drop(held);
        assert!(pool.try_acquire_at(1).is_some());
    }

    #[tokio::test]
    async fn test_released_session_is_usable_by_next_holder() {
        let driver = ScriptedDriver::new();
        let pool = pool(&driver, 1).await;

        for _ in 0..20 {
            let mut handle = pool.try_acquire_at(0).unwrap();
            assert!(handle.connect("dsn", Duration::ZERO).await);
            drop(handle);
            assert!(pool.connections()[0].is_available());
        }
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let driver = ScriptedDriver::new();
        let pool = pool(&driver, 1).await;
        let held = pool.acquire_one().await;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire_one().await.index() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_handle_query() {
        let driver = ScriptedDriver::new();
        driver.respond("DELETE FROM t", Response::affected(3));
        let pool = pool(&driver, 2).await;

        let mut handle = pool.acquire_one().await;
        let (kind, result) = handle.query("DELETE FROM t", "dsn", &[], 2).await;
        drop(handle);

        assert_eq!(kind, ErrorKind::None);
        assert_eq!(result.affected_rows(), 3);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_reconnect_skips_held_connections() {
        let driver = ScriptedDriver::new();
        let pool = pool(&driver, 5).await;

        let _first = pool.try_acquire_at(0).unwrap();
        let _third = pool.try_acquire_at(2).unwrap();

        let report = pool.reconnect("dsn", Duration::from_secs(1)).await;

        assert_eq!(
            report,
            ReconnectReport {
                reconnected: 3,
                skipped: 2,
                failed: 0,
            }
        );
        assert_eq!(report.error(), ErrorKind::None);
        assert_eq!(driver.connects(), 3);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn test_reconnect_failures_are_counted() {
        let driver = ScriptedDriver::new();
        let pool = pool(&driver, 3).await;
        driver.refuse_connects(true);

        let report = pool.reconnect("dsn", Duration::ZERO).await;

        assert_eq!(report.failed, 3);
        assert_eq!(report.reconnected, 0);
        assert_eq!(report.error(), ErrorKind::FailedToOpenConnection);
        assert_eq!(report.to_string(), "0 reconnected, 0 skipped, 3 failed");
        assert_eq!(pool.available(), 3);
    }
}
