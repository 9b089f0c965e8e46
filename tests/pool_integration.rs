//! Pool behaviour through the public facade, against the scripted driver.
//!
//! The facade owns its own runtime, so these are plain `#[test]`s.

use dbpool::driver::{ColumnDescriptor, SqlType};
use dbpool::error::{DriverError, STATE_GENERAL};
use dbpool::prelude::*;
use dbpool::testing::{Cell, Response, ScriptedDriver, ScriptedSession};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

const SELECT_PEOPLE: &str = "SELECT id, name FROM t";

fn config(size: i32) -> PoolConfig {
    PoolConfig::new("postgres", "db.local", 5432, "shop")
        .user("app")
        .password("secret")
        .pool_size(size)
}

fn people() -> Response {
    Response::rows(
        vec![
            ColumnDescriptor::new("id", SqlType::Integer, "INTEGER"),
            ColumnDescriptor::new("name", SqlType::VarChar, "VARCHAR"),
        ],
        vec![
            vec![Cell::Int(1), Cell::from("ada")],
            vec![Cell::Int(2), Cell::from("grace")],
        ],
    )
}

fn open(driver: &ScriptedDriver, size: i32) -> DatabasePool<ScriptedSession> {
    DatabasePool::create_sync(driver, &config(size)).unwrap()
}

/// Poll until `condition` holds or a few seconds passed.
fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_end_to_end_query() {
    let driver = ScriptedDriver::new();
    driver.respond(SELECT_PEOPLE, people());
    let pool = open(&driver, 3);
    assert_eq!(pool.pool_size(), 3);

    let (kind, result) = pool.query_sync(SELECT_PEOPLE, &[]);

    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.column_count(), 2);
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.get("name", 0), &Value::from("ada"));
    assert_eq!(result.get_at(0, 1), &Value::Int64(2));
    assert_eq!(result.affected_rows(), 2);
    assert!(result.get("missing_col", 0).is_null());
    assert!(result.get("name", 9).is_null());
}

#[test]
fn test_invalid_pool_size() {
    let driver = ScriptedDriver::new();
    assert_eq!(
        DatabasePool::create_sync(&driver, &config(0)).unwrap_err(),
        ErrorKind::InvalidPoolSize
    );
    assert_eq!(
        DatabasePool::create_sync(&driver, &config(-1)).unwrap_err(),
        ErrorKind::InvalidPoolSize
    );
    assert_eq!(driver.opens(), 0);
}

#[test]
fn test_unreachable_endpoint_fails_creation() {
    let driver = ScriptedDriver::new();
    driver.unreachable_at(3);

    let err = DatabasePool::create_sync(&driver, &config(4)).unwrap_err();

    assert_eq!(err, ErrorKind::FailedToOpenConnection);
}

#[test]
fn test_retry_bound() {
    let driver = ScriptedDriver::new();
    driver.respond(SELECT_PEOPLE, people());
    let pool = open(&driver, 2);
    driver.drop_connections(usize::MAX).refuse_connects(true);

    let (kind, result) = pool.query_sync(SELECT_PEOPLE, &[]);

    assert_eq!(kind, ErrorKind::ConnectionClosed);
    assert!(result.is_empty());
    assert_eq!(result.column_count(), 0);
    assert_eq!(driver.executes(), 3);
    assert_eq!(driver.connects(), 2);
    assert_eq!(pool.available_connections(), 2);
}

#[test]
fn test_transient_disconnect_is_invisible() {
    let driver = ScriptedDriver::new();
    driver.respond(SELECT_PEOPLE, people());
    let pool = open(&driver, 1);
    driver.drop_connections(2);

    let (kind, result) = pool.query_sync(SELECT_PEOPLE, &[]);

    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.row_count(), 2);
    assert_eq!(driver.connects(), 2);
}

#[test]
fn test_concurrency_never_exceeds_pool_size() {
    let driver = ScriptedDriver::new();
    driver.respond(SELECT_PEOPLE, people());
    driver.set_latency(Duration::from_millis(15));
    let pool = open(&driver, 3);

    let pending: Vec<_> = (0..12)
        .map(|_| pool.query(SELECT_PEOPLE, Vec::new()))
        .collect();

    for p in pending {
        let (kind, result) = p.wait().unwrap();
        assert_eq!(kind, ErrorKind::None);
        assert_eq!(result.row_count(), 2);
    }

    assert!(driver.max_in_flight() <= 3);
    assert_eq!(driver.executes(), 12);
    assert_eq!(pool.available_connections(), 3);
}

#[test]
fn test_callback_runs_once_on_completion_queue() {
    let driver = ScriptedDriver::new();
    driver.respond(SELECT_PEOPLE, people());
    let pool = open(&driver, 2);
    let (sender, mut queue) = CompletionQueue::channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    {
        let calls = Arc::clone(&calls);
        pool.query_with(SELECT_PEOPLE, Vec::new(), sender.clone(), move |kind, result| {
            calls.fetch_add(1, Ordering::SeqCst);
            tx.send((kind, result.row_count(), std::thread::current().id()))
                .unwrap();
        });
    }

    assert!(queue.run_next_blocking());
    let (kind, rows, thread) = rx.recv().unwrap();
    assert_eq!(kind, ErrorKind::None);
    assert_eq!(rows, 2);
    assert_eq!(thread, std::thread::current().id());

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(queue.run_pending(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_parameters_reach_the_driver() {
    let driver = ScriptedDriver::new();
    driver.respond("UPDATE t SET name = ? WHERE id = ?", Response::affected(1));
    let pool = open(&driver, 1);
    let params = vec![Value::from("ada"), Value::from(1i64)];

    let (kind, result) = pool.query_sync("UPDATE t SET name = ? WHERE id = ?", &params);

    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.affected_rows(), 1);
    assert_eq!(driver.statements(), vec![("UPDATE t SET name = ? WHERE id = ?".to_string(), params)]);
}

#[test]
fn test_mid_fetch_failure_returns_partial_rows() {
    let driver = ScriptedDriver::new();
    driver.respond(
        SELECT_PEOPLE,
        people().fail_fetch_after(1, DriverError::new(STATE_GENERAL, "cursor lost")),
    );
    let pool = open(&driver, 1);

    let (kind, result) = pool.query_sync(SELECT_PEOPLE, &[]);

    assert_eq!(kind, ErrorKind::QueryFailed);
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.get("name", 0).as_string(), "ada");
    assert_eq!(driver.connects(), 0);
}

#[test]
fn test_reconnect_skips_busy_connections() {
    let driver = ScriptedDriver::new();
    driver.respond(SELECT_PEOPLE, people());
    driver.set_latency(Duration::from_millis(500));
    let pool = open(&driver, 5);

    let busy: Vec<_> = (0..2)
        .map(|_| pool.query(SELECT_PEOPLE, Vec::new()))
        .collect();
    assert!(eventually(|| pool.available_connections() == 3));

    let (report, kind) = pool.reconnect_sync(Duration::from_secs(1));

    assert_eq!(report.skipped, 2);
    assert_eq!(report.reconnected + report.failed, 3);
    assert_eq!(report.reconnected, 3);
    assert_eq!(kind, ErrorKind::None);

    for p in busy {
        assert_eq!(p.wait().unwrap().0, ErrorKind::None);
    }
}

#[test]
fn test_reconnect_with_nothing_reconnected() {
    let driver = ScriptedDriver::new();
    let pool = open(&driver, 2);
    driver.refuse_connects(true);
    let (sender, mut queue) = CompletionQueue::channel();
    let (tx, rx) = mpsc::channel();

    pool.reconnect_with(Duration::ZERO, sender, move |report, kind| {
        tx.send((report, kind)).unwrap();
    });
    assert!(queue.run_next_blocking());

    let (report, kind) = rx.recv().unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(kind, ErrorKind::FailedToOpenConnection);
}

#[test]
fn test_non_blocking_create() {
    let driver = ScriptedDriver::new();
    driver.respond(SELECT_PEOPLE, people());
    let (sender, mut queue) = CompletionQueue::channel();
    let (tx, rx) = mpsc::channel();

    DatabasePool::create(driver.clone(), config(2), sender, move |outcome| {
        tx.send(outcome).unwrap();
    })
    .unwrap();

    assert!(queue.run_next_blocking());
    let pool: DatabasePool<ScriptedSession> = rx.recv().unwrap().unwrap();
    assert_eq!(pool.pool_size(), 2);
    assert_eq!(driver.opens(), 2);

    let (kind, result) = pool.query_sync(SELECT_PEOPLE, &[]);
    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.row_count(), 2);
}

#[test]
fn test_non_blocking_create_failure() {
    let driver = ScriptedDriver::new();
    driver.unreachable_at(0);
    let (sender, mut queue) = CompletionQueue::channel();
    let (tx, rx) = mpsc::channel();

    DatabasePool::<ScriptedSession>::create(driver, config(3), sender, move |outcome| {
        tx.send(outcome.err()).unwrap();
    })
    .unwrap();

    assert!(queue.run_next_blocking());
    assert_eq!(rx.recv().unwrap(), Some(ErrorKind::FailedToOpenConnection));
}
