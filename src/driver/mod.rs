//! Driver seam.
//!
//! A [`Driver`] opens physical sessions; a [`Session`] prepares, binds and
//! executes one statement at a time and hands back fetched rows that the
//! connection layer decodes through [`DriverRow`]'s typed getters.
//!
//! - `any.rs` - sqlx backed driver (postgres, mysql, sqlite)
//! - `dsn.rs` - `KEY=VALUE;` connection string parsing
//! - `types.rs` - SQL type codes and their decoding rules

pub mod any;
pub mod dsn;
pub mod types;

pub use any::{AnyDriver, AnySession};
pub use types::{Decoding, SqlType};

use crate::error::DriverError;
use crate::result::ColumnMetadata;
use crate::value::{Date, Timestamp, Value};
use async_trait::async_trait;
use std::time::Duration;

/// Column as described by the driver after preparing a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: SqlType,
    pub type_name: String,
    pub decimal_digits: i32,
    pub size: i64,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, sql_type: SqlType, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type,
            type_name: type_name.into(),
            decimal_digits: 0,
            size: 0,
        }
    }

    pub fn with_size(mut self, size: i64, decimal_digits: i32) -> Self {
        self.size = size;
        self.decimal_digits = decimal_digits;
        self
    }

    pub fn metadata(&self) -> ColumnMetadata {
        ColumnMetadata {
            decimal_digits: self.decimal_digits,
            data_type_name: self.type_name.clone(),
            size: self.size,
        }
    }
}

/// Outcome of a successfully executed statement.
#[derive(Debug)]
pub struct Execution<R> {
    /// Empty for statements that produce no result set.
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<R>,
    pub affected_rows: u64,
    /// Set when fetching broke off after execution succeeded; `rows` holds
    /// what was fetched before the failure.
    pub fetch_error: Option<DriverError>,
}

impl<R> Execution<R> {
    /// A statement without a result set.
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows,
            fetch_error: None,
        }
    }
}

/// Typed access to one fetched row.
///
/// Every getter may fail, e.g. on an index outside the row or a cell the
/// driver cannot read as the requested type.
pub trait DriverRow: Send {
    fn is_null(&self, index: usize) -> Result<bool, DriverError>;
    fn get_string(&self, index: usize) -> Result<String, DriverError>;
    fn get_f32(&self, index: usize) -> Result<f32, DriverError>;
    fn get_f64(&self, index: usize) -> Result<f64, DriverError>;
    fn get_i32(&self, index: usize) -> Result<i32, DriverError>;
    fn get_i64(&self, index: usize) -> Result<i64, DriverError>;
    fn get_date(&self, index: usize) -> Result<Date, DriverError>;
    fn get_timestamp(&self, index: usize) -> Result<Timestamp, DriverError>;
}

/// One physical database session.
///
/// Sessions are not shared: the pool guarantees a single holder at a time.
#[async_trait]
pub trait Session: Send + 'static {
    type Row: DriverRow;

    /// (Re)bind the session to `dsn`. A zero timeout means the driver default.
    async fn connect(&mut self, dsn: &str, timeout: Duration) -> Result<(), DriverError>;

    /// Prepare `sql`, bind `params` positionally and execute it.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Execution<Self::Row>, DriverError>;
}

/// Factory for sessions.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Session: Session;

    async fn open(&self, dsn: &str, timeout: Duration) -> Result<Self::Session, DriverError>;
}
