//! In-memory scripted driver.
//!
//! [`ScriptedDriver`] answers statements from canned [`Response`]s keyed by
//! their SQL text and can be told to fail in the ways a real database does:
//! unreachable endpoints, sessions that drop, result sets that break off
//! while being fetched. It counts what it was asked to do so tests can check
//! retry bounds and concurrency.
//!
//! # Example
//! ```
//! use dbpool::driver::{ColumnDescriptor, SqlType};
//! use dbpool::testing::{Cell, Response, ScriptedDriver};
//!
//! let driver = ScriptedDriver::new();
//! driver.respond(
//!     "SELECT id FROM t",
//!     Response::rows(
//!         vec![ColumnDescriptor::new("id", SqlType::Integer, "INTEGER")],
//!         vec![vec![Cell::Int(1)], vec![Cell::Int(2)]],
//!     ),
//! );
//! assert_eq!(driver.executes(), 0);
//! ```

use crate::driver::{ColumnDescriptor, Driver, DriverRow, Execution, Session};
use crate::error::{DriverError, STATE_CONNECTION_NOT_OPEN, STATE_GENERAL};
use crate::value::{Date, Timestamp, Value};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Client unable to establish connection.
const STATE_UNABLE_TO_CONNECT: &str = "08001";

/// Base table or view not found.
const STATE_TABLE_NOT_FOUND: &str = "42S02";

/// Restricted data type attribute violation.
const STATE_WRONG_TYPE: &str = "07006";

/// Numeric value out of range.
const STATE_OUT_OF_RANGE: &str = "22003";

/// Raw cell content as a driver would hold it.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Date(Date),
    Timestamp(Timestamp),
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<Date> for Cell {
    fn from(v: Date) -> Self {
        Cell::Date(v)
    }
}

impl From<Timestamp> for Cell {
    fn from(v: Timestamp) -> Self {
        Cell::Timestamp(v)
    }
}

/// A fetched row of the scripted driver.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedRow {
    cells: Vec<Cell>,
}

impl ScriptedRow {
    fn cell(&self, index: usize) -> Result<&Cell, DriverError> {
        self.cells
            .get(index)
            .ok_or_else(|| DriverError::index_out_of_range(index, self.cells.len()))
    }

    fn wrong_type(&self, index: usize, wanted: &str) -> DriverError {
        DriverError::new(
            STATE_WRONG_TYPE,
            format!("column {} cannot be read as {}", index, wanted),
        )
    }
}

impl DriverRow for ScriptedRow {
    fn is_null(&self, index: usize) -> Result<bool, DriverError> {
        Ok(matches!(self.cell(index)?, Cell::Null))
    }

    fn get_string(&self, index: usize) -> Result<String, DriverError> {
        match self.cell(index)? {
            Cell::Text(s) => Ok(s.clone()),
            Cell::Int(v) => Ok(v.to_string()),
            Cell::Float(v) => Ok(v.to_string()),
            _ => Err(self.wrong_type(index, "text")),
        }
    }

    fn get_f32(&self, index: usize) -> Result<f32, DriverError> {
        self.get_f64(index).map(|v| v as f32)
    }

    fn get_f64(&self, index: usize) -> Result<f64, DriverError> {
        match self.cell(index)? {
            Cell::Float(v) => Ok(*v),
            Cell::Int(v) => Ok(*v as f64),
            _ => Err(self.wrong_type(index, "double")),
        }
    }

    fn get_i32(&self, index: usize) -> Result<i32, DriverError> {
        let value = self.get_i64(index)?;
        i32::try_from(value).map_err(|_| {
            DriverError::new(STATE_OUT_OF_RANGE, format!("{} does not fit in int32", value))
        })
    }

    fn get_i64(&self, index: usize) -> Result<i64, DriverError> {
        match self.cell(index)? {
            Cell::Int(v) => Ok(*v),
            _ => Err(self.wrong_type(index, "integer")),
        }
    }

    fn get_date(&self, index: usize) -> Result<Date, DriverError> {
        match self.cell(index)? {
            Cell::Date(d) => Ok(*d),
            Cell::Timestamp(ts) => Ok(ts.date()),
            _ => Err(self.wrong_type(index, "date")),
        }
    }

    fn get_timestamp(&self, index: usize) -> Result<Timestamp, DriverError> {
        match self.cell(index)? {
            Cell::Timestamp(ts) => Ok(*ts),
            _ => Err(self.wrong_type(index, "timestamp")),
        }
    }
}

/// Canned answer to one SQL text.
#[derive(Debug, Clone, Default)]
pub struct Response {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Cell>>,
    affected_rows: u64,
    error: Option<DriverError>,
    fetch_failure: Option<(usize, DriverError)>,
}

impl Response {
    /// A result set; the affected-row count defaults to the row count.
    pub fn rows(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            affected_rows: rows.len() as u64,
            columns,
            rows,
            ..Self::default()
        }
    }

    /// A statement without a result set.
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Self::default()
        }
    }

    /// The statement fails when executed.
    pub fn error(error: DriverError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_affected_rows(mut self, affected_rows: u64) -> Self {
        self.affected_rows = affected_rows;
        self
    }

    /// Fetching breaks off with `error` after `rows` rows were delivered.
    pub fn fail_fetch_after(mut self, rows: usize, error: DriverError) -> Self {
        self.fetch_failure = Some((rows, error));
        self
    }
}

#[derive(Default)]
struct ScriptState {
    responses: Mutex<HashMap<String, Response>>,
    unreachable: Mutex<HashSet<usize>>,
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    latency: Mutex<Duration>,
    refuse_connects: AtomicBool,
    dropped_executes: AtomicUsize,
    opens: AtomicUsize,
    connects: AtomicUsize,
    executes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Driver answering from a script. Clones share the script and counters.
#[derive(Clone, Default)]
pub struct ScriptedDriver {
    state: Arc<ScriptState>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the answer for `sql` (matched after trimming).
    pub fn respond(&self, sql: &str, response: Response) -> &Self {
        locked(&self.state.responses).insert(sql.trim().to_string(), response);
        self
    }

    /// Make the `index`-th session opened (0-based) fail to connect.
    pub fn unreachable_at(&self, index: usize) -> &Self {
        locked(&self.state.unreachable).insert(index);
        self
    }

    /// Make every reconnect attempt fail (or succeed again).
    pub fn refuse_connects(&self, refuse: bool) -> &Self {
        self.state.refuse_connects.store(refuse, Ordering::SeqCst);
        self
    }

    /// The next `count` executions fail with "connection not open".
    pub fn drop_connections(&self, count: usize) -> &Self {
        self.state.dropped_executes.store(count, Ordering::SeqCst);
        self
    }

    /// Time every execution takes.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *locked(&self.state.latency) = latency;
        self
    }

    /// Sessions opened, successful or not.
    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Reconnect attempts on existing sessions.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Statement executions, failed ones included.
    pub fn executes(&self) -> usize {
        self.state.executes.load(Ordering::SeqCst)
    }

    /// Highest number of executions observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every executed statement with the parameters it was bound with.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        locked(&self.state.statements).clone()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    type Session = ScriptedSession;

    async fn open(&self, dsn: &str, _timeout: Duration) -> Result<ScriptedSession, DriverError> {
        let index = self.state.opens.fetch_add(1, Ordering::SeqCst);
        if locked(&self.state.unreachable).contains(&index) {
            return Err(DriverError::new(
                STATE_UNABLE_TO_CONNECT,
                format!("Unable to reach {}", dsn),
            ));
        }
        Ok(ScriptedSession {
            state: Arc::clone(&self.state),
        })
    }
}

/// Session handed out by [`ScriptedDriver`].
pub struct ScriptedSession {
    state: Arc<ScriptState>,
}

impl ScriptedSession {
    fn take_dropped(&self) -> bool {
        self.state
            .dropped_executes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn answer(&self, sql: &str) -> Result<Execution<ScriptedRow>, DriverError> {
        if self.take_dropped() {
            return Err(DriverError::new(
                STATE_CONNECTION_NOT_OPEN,
                "Connection not open",
            ));
        }

        let response = locked(&self.state.responses)
            .get(sql.trim())
            .cloned()
            .ok_or_else(|| {
                DriverError::new(
                    STATE_TABLE_NOT_FOUND,
                    format!("No scripted response for `{}`", sql.trim()),
                )
            })?;

        if let Some(error) = response.error {
            return Err(error);
        }

        let mut rows: Vec<ScriptedRow> = response
            .rows
            .into_iter()
            .map(|cells| ScriptedRow { cells })
            .collect();

        let fetch_error = response.fetch_failure.map(|(after, error)| {
            rows.truncate(after);
            error
        });

        Ok(Execution {
            columns: response.columns,
            rows,
            affected_rows: response.affected_rows,
            fetch_error,
        })
    }
}

#[async_trait]
impl Session for ScriptedSession {
    type Row = ScriptedRow;

    async fn connect(&mut self, dsn: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.refuse_connects.load(Ordering::SeqCst) {
            return Err(DriverError::new(
                STATE_UNABLE_TO_CONNECT,
                format!("Unable to reach {}", dsn),
            ));
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Execution<ScriptedRow>, DriverError> {
        self.state.executes.fetch_add(1, Ordering::SeqCst);
        locked(&self.state.statements).push((sql.to_string(), params.to_vec()));

        let running = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let latency = *locked(&self.state.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let answer = self.answer(sql);
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        answer
    }
}

impl std::fmt::Debug for ScriptedDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedDriver")
            .field("opens", &self.opens())
            .field("connects", &self.connects())
            .field("executes", &self.executes())
            .finish()
    }
}
