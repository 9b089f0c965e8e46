//! The sqlx backend against real databases.
//!
//! The sqlite test runs in memory. The postgres test needs a server:
//! `DBPOOL_TEST_DSN="DRIVER=postgres;UID=..;PORT=5432;DATABASE=..;SERVER=..;TCPIP=1;PWD=.." \
//!  cargo test --test live_integration -- --ignored --nocapture`

use dbpool::prelude::*;
use std::time::Duration;

fn sqlite_memory() -> PoolConfig {
    // Every in-memory sqlite connection is its own database, so one slot.
    PoolConfig::new("sqlite", "", 0, ":memory:").pool_size(1)
}

#[test]
fn test_sqlite_round_trip() {
    let pool = DatabasePool::create_sync(&AnyDriver, &sqlite_memory()).unwrap();

    let (kind, _) = pool.query_sync("CREATE TABLE people (id INTEGER, name TEXT)", &[]);
    assert_eq!(kind, ErrorKind::None);

    let (kind, result) = pool.query_sync(
        "INSERT INTO people (id, name) VALUES (?, ?), (?, ?)",
        &[
            Value::from(1i64),
            Value::from("ada"),
            Value::from(2i64),
            Value::Null,
        ],
    );
    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.affected_rows(), 2);

    let (kind, result) = pool.query_sync("SELECT id, name FROM people ORDER BY id", &[]);
    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.columns(), ["id".to_string(), "name".to_string()]);
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.get("id", 0).as_i64(), 1);
    assert_eq!(result.get("name", 0).as_string(), "ada");
    assert!(result.get("name", 1).is_null());
}

#[test]
fn test_sqlite_decodes_numbers_text_and_nulls() {
    let pool = DatabasePool::create_sync(&AnyDriver, &sqlite_memory()).unwrap();
    pool.query_sync("CREATE TABLE m (i INTEGER, r REAL, n NUMERIC, t TEXT)", &[]);
    let (kind, _) = pool.query_sync(
        "INSERT INTO m VALUES (?, ?, ?, ?), (NULL, NULL, NULL, NULL)",
        &[
            Value::from(7i64),
            Value::from(2.5f64),
            Value::from(3i32),
            Value::from("seven"),
        ],
    );
    assert_eq!(kind, ErrorKind::None);

    let (kind, result) = pool.query_sync("SELECT i, r, n, t FROM m ORDER BY i IS NULL", &[]);
    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.get("i", 0), &Value::Int64(7));
    assert_eq!(result.get("r", 0), &Value::Double(2.5));
    assert_eq!(result.get("n", 0).as_f64(), 3.0);
    assert_eq!(result.get("t", 0), &Value::String("seven".into()));
    for column in ["i", "r", "n", "t"] {
        assert!(result.get(column, 1).is_null(), "{} should be NULL", column);
    }
}

#[test]
fn test_sqlite_decodes_dates_and_timestamps() {
    let pool = DatabasePool::create_sync(&AnyDriver, &sqlite_memory()).unwrap();
    pool.query_sync("CREATE TABLE ev (id INTEGER, d DATE, at TIMESTAMP)", &[]);
    let (kind, _) = pool.query_sync(
        "INSERT INTO ev VALUES (?, ?, ?)",
        &[
            Value::from(1i64),
            Value::Date(Date::new(2024, 3, 1)),
            Value::Timestamp(Timestamp::new(2024, 3, 1, 10, 20, 30)),
        ],
    );
    assert_eq!(kind, ErrorKind::None);
    pool.query_sync("INSERT INTO ev VALUES (2, '1999-12-31', '2000-01-01 00:00:01')", &[]);

    let (kind, result) = pool.query_sync("SELECT id, d, at FROM ev ORDER BY id", &[]);
    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.get("d", 0), &Value::Date(Date::new(2024, 3, 1)));
    assert_eq!(
        result.get("at", 0),
        &Value::Timestamp(Timestamp::new(2024, 3, 1, 10, 20, 30))
    );
    assert_eq!(result.get("d", 1), &Value::Date(Date::new(1999, 12, 31)));
    assert_eq!(
        result.get("at", 1),
        &Value::Timestamp(Timestamp::new(2000, 1, 1, 0, 0, 1))
    );
}

#[test]
fn test_sqlite_expression_columns() {
    let pool = DatabasePool::create_sync(&AnyDriver, &sqlite_memory()).unwrap();

    let (kind, result) = pool.query_sync("SELECT 1 + 1 AS two, 'a' || 'b' AS ab", &[]);

    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.get("two", 0).as_i64(), 2);
    assert_eq!(result.get("ab", 0).as_string(), "ab");
    assert_ne!(
        result.column_metadata_by_name("two").unwrap().data_type_name,
        "NULL"
    );
}

#[test]
fn test_sqlite_unsupported_columns_decode_to_null() {
    let pool = DatabasePool::create_sync(&AnyDriver, &sqlite_memory()).unwrap();
    pool.query_sync("CREATE TABLE f (id INTEGER, flag BOOLEAN, raw BLOB)", &[]);
    pool.query_sync("INSERT INTO f VALUES (1, 1, x'00ff')", &[]);

    let (kind, result) = pool.query_sync("SELECT id, flag, raw FROM f", &[]);

    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.get("id", 0), &Value::Int64(1));
    assert!(result.get("flag", 0).is_null());
    assert!(result.get("raw", 0).is_null());
}

#[test]
fn test_sqlite_syntax_error() {
    let pool = DatabasePool::create_sync(&AnyDriver, &sqlite_memory()).unwrap();

    let (kind, result) = pool.query_sync("SELEC nothing", &[]);

    assert_eq!(kind, ErrorKind::QueryFailed);
    assert!(result.is_empty());
}

#[test]
fn test_unknown_driver_fails_creation() {
    let config = PoolConfig::new("oracle", "localhost", 1521, "x").pool_size(1);
    let err = DatabasePool::create_sync(&AnyDriver, &config).unwrap_err();
    assert_eq!(err, ErrorKind::FailedToOpenConnection);
}

#[test]
#[ignore = "Requires a postgres server in DBPOOL_TEST_DSN - run with --ignored"]
fn test_postgres_query_and_reconnect() {
    let dsn = std::env::var("DBPOOL_TEST_DSN").unwrap();
    let params = dbpool::driver::dsn::ConnectionParams::parse(&dsn).unwrap();
    let config = PoolConfig::new(
        params.get("DRIVER").unwrap_or("postgres"),
        params.get("SERVER").unwrap_or("localhost"),
        params.get("PORT").and_then(|p| p.parse().ok()).unwrap_or(5432),
        params.get("DATABASE").unwrap_or("postgres"),
    )
    .user(params.get("UID").unwrap_or("postgres"))
    .password(params.get("PWD").unwrap_or(""))
    .pool_size(3);

    let pool = DatabasePool::create_sync(&AnyDriver, &config).unwrap();
    println!("✅ Pool of {} connected", pool.pool_size());

    let (kind, result) = pool.query_sync("SELECT 1::BIGINT AS one, 'x'::TEXT AS letter", &[]);
    assert_eq!(kind, ErrorKind::None);
    assert_eq!(result.get("one", 0).as_i64(), 1);
    assert_eq!(result.get("letter", 0).as_string(), "x");

    let (report, kind) = pool.reconnect_sync(Duration::from_secs(5));
    println!("🔁 {}", report);
    assert_eq!(kind, ErrorKind::None);
    assert_eq!(report.reconnected, 3);
}
