//! A pooled database connection.
//!
//! A [`Connection`] pairs one driver session with an exclusive-use flag.
//! The flag is the only thing callers contend on: acquiring is a single
//! compare-and-swap, and the session is only touched by whoever won it.
//!
//! The query path lives in [`query`]: execute, decode the fetched rows by
//! their declared column type, and on a closed session reconnect and run the
//! statement again, a bounded number of times.

use crate::driver::{ColumnDescriptor, Decoding, DriverRow, Execution, Session, SqlType};
use crate::error::{DriverError, ErrorKind};
use crate::result::QueryResult;
use crate::value::Value;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Reconnect-and-requery attempts after the first execution.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// One pool slot.
pub struct Connection<S> {
    available: AtomicBool,
    // Only ever `try_lock`ed by whoever won `available`, so never contended.
    session: Mutex<S>,
}

impl<S: Session> Connection<S> {
    /// Wrap an opened session. The connection starts available.
    pub fn new(session: S) -> Self {
        Self {
            available: AtomicBool::new(true),
            session: Mutex::new(session),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Claim the connection if nobody holds it.
    pub fn try_acquire(&self) -> bool {
        self.available
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claim the connection unconditionally.
    ///
    /// # Panics
    ///
    /// If the connection is already held.
    pub fn lock(&self) {
        let was_available = self.available.swap(false, Ordering::AcqRel);
        assert!(was_available, "locked a connection that is already held");
    }

    /// Give the connection back.
    ///
    /// # Panics
    ///
    /// If the connection is not held.
    pub fn unlock(&self) {
        let was_available = self.available.swap(true, Ordering::AcqRel);
        assert!(!was_available, "unlocked a connection that is not held");
    }

    /// Session access for the flag holder.
    ///
    /// # Panics
    ///
    /// If the caller does not hold the flag and someone else is using the
    /// session.
    pub(crate) fn session(&self) -> MutexGuard<'_, S> {
        // Never contended: the flag already serializes holders.
        match self.session.try_lock() {
            Ok(guard) => guard,
            Err(_) => panic!("connection session used without holding the connection"),
        }
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("available", &self.available.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// (Re)bind `session` to `dsn`. Failures are logged, not raised.
pub async fn connect<S: Session>(session: &mut S, dsn: &str, timeout: Duration) -> bool {
    match session.connect(dsn, timeout).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                "Failed to connect. State: {}. Code: {}. Reason: {}",
                e.state,
                e.native,
                e.message
            );
            false
        }
    }
}

/// Run `sql` with positional `params`.
///
/// A session reporting "connection not open" is reconnected to `dsn` and the
/// statement re-issued, at most `max_retries` times; the statement is re-run
/// whether or not the reconnect succeeded. Every other failure is final.
/// Failed queries yield an empty result next to the error kind.
pub async fn query<S: Session>(
    session: &mut S,
    sql: &str,
    dsn: &str,
    params: &[Value],
    max_retries: u32,
) -> (ErrorKind, QueryResult) {
    let mut retries_left = max_retries;

    loop {
        let error = match session.execute(sql, params).await {
            Ok(execution) => return decode(execution),
            Err(error) => error,
        };

        tracing::error!(
            "Failed to query database. State: {}. Reason: {}",
            error.state,
            error.message
        );

        let kind = error.kind();
        if kind != ErrorKind::ConnectionClosed {
            return (kind, QueryResult::empty());
        }

        if retries_left == 0 {
            tracing::error!("Query dropped as it failed to reconnect.");
            return (kind, QueryResult::empty());
        }
        retries_left -= 1;

        tracing::warn!("Connection lost. Trying to reconnect...");
        if connect(session, dsn, Duration::ZERO).await {
            tracing::info!("Reconnected. Restarting query.");
        } else {
            tracing::warn!("Failed to reconnect.");
        }
    }
}

/// Turn fetched driver rows into a [`QueryResult`].
///
/// A getter failure ends iteration: rows decoded so far are kept and the
/// failure's kind is reported. The same holds for a fetch that broke off
/// inside the driver.
fn decode<R: DriverRow>(execution: Execution<R>) -> (ErrorKind, QueryResult) {
    let Execution {
        columns,
        rows,
        affected_rows,
        fetch_error,
    } = execution;

    if columns.is_empty() {
        tracing::debug!("Query returned no result set.");
        let kind = fetch_error.map_or(ErrorKind::None, |e| fetch_failed(&e));
        return (kind, QueryResult::affected(affected_rows));
    }

    let decodings: Vec<Decoding> = columns.iter().map(column_decoding).collect();
    let mut decoded = Vec::with_capacity(rows.len());
    let mut kind = ErrorKind::None;

    'rows: for row in &rows {
        let mut values = Vec::with_capacity(columns.len());
        for (index, decoding) in decodings.iter().enumerate() {
            match decode_cell(row, index, *decoding) {
                Ok(value) => values.push(value),
                Err(e) => {
                    kind = fetch_failed(&e);
                    break 'rows;
                }
            }
        }
        decoded.push(values);
    }

    if kind.is_ok()
        && let Some(e) = fetch_error
    {
        kind = fetch_failed(&e);
    }

    let names = columns.iter().map(|c| c.name.clone()).collect();
    let metadata = columns.iter().map(ColumnDescriptor::metadata).collect();
    (kind, QueryResult::new(names, metadata, decoded, affected_rows))
}

fn fetch_failed(error: &DriverError) -> ErrorKind {
    tracing::error!(
        "Failed to fetch results. State: {}. Reason: {}",
        error.state,
        error.message
    );
    error.kind()
}

fn column_decoding(column: &ColumnDescriptor) -> Decoding {
    let decoding = column.sql_type.decoding();
    if decoding == Decoding::Unsupported && column.sql_type != SqlType::Unknown {
        tracing::warn!(
            "Unhandled data type {} ({}) in column `{}`, reading NULL.",
            column.sql_type,
            column.type_name,
            column.name
        );
    }
    decoding
}

fn decode_cell<R: DriverRow>(
    row: &R,
    index: usize,
    decoding: Decoding,
) -> Result<Value, DriverError> {
    if decoding == Decoding::Unsupported || row.is_null(index)? {
        return Ok(Value::Null);
    }

    Ok(match decoding {
        Decoding::Text => Value::String(row.get_string(index)?),
        Decoding::Float => Value::Double(f64::from(row.get_f32(index)?)),
        Decoding::Double => Value::Double(row.get_f64(index)?),
        Decoding::BigInt => Value::Int64(row.get_i64(index)?),
        Decoding::Int => Value::Int32(row.get_i32(index)?),
        Decoding::Date => Value::Date(row.get_date(index)?),
        Decoding::Timestamp => Value::Timestamp(row.get_timestamp(index)?),
        Decoding::Unsupported => Value::Null,
    })
}
