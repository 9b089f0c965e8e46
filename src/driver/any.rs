//! sqlx backed driver.
//!
//! Each [`AnySession`] owns exactly one native sqlx connection (postgres,
//! mysql or sqlite, chosen from the connection string's `DRIVER` key).
//! sqlx's own pool is not involved, pooling is done by
//! [`crate::pool::ConnectionPool`]. Native connections are used so that
//! date and time columns decode through sqlx's chrono support.

use super::{ColumnDescriptor, Driver, DriverRow, Execution, Session, SqlType, dsn};
use crate::error::{DriverError, STATE_DRIVER_NOT_FOUND, STATE_GENERAL};
use crate::value::{Date, Timestamp, Value};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use futures::stream::BoxStream;
use sqlx::database::HasArguments;
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{
    Column, ColumnIndex, Connection, Database, Decode, Either, Encode, Executor, MySql, Postgres,
    Row, Sqlite, Statement, Type, TypeInfo, ValueRef,
};
use std::time::Duration;

/// Timeout expired.
const STATE_TIMEOUT: &str = "HYT00";

/// Invalid datetime format.
const STATE_INVALID_DATETIME: &str = "22007";

/// Numeric value out of range.
const STATE_OUT_OF_RANGE: &str = "22003";

/// Type code for type names this backend does not know.
pub const UNRECOGNIZED_TYPE: SqlType = SqlType::Other(i16::MIN);

/// Driver opening sqlx connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyDriver;

#[async_trait]
impl Driver for AnyDriver {
    type Session = AnySession;

    async fn open(&self, dsn: &str, timeout: Duration) -> Result<AnySession, DriverError> {
        let mut session = AnySession::default();
        session.connect(dsn, timeout).await?;
        Ok(session)
    }
}

enum Backend {
    Postgres(PgConnection),
    MySql(MySqlConnection),
    Sqlite(SqliteConnection),
}

impl Backend {
    async fn connect(url: &str) -> Result<Self, DriverError> {
        let scheme = url.split(':').next().unwrap_or_default();
        let conn = match scheme {
            "postgres" | "postgresql" => PgConnection::connect(url).await.map(Backend::Postgres),
            "mysql" | "mariadb" => MySqlConnection::connect(url).await.map(Backend::MySql),
            "sqlite" => SqliteConnection::connect(url).await.map(Backend::Sqlite),
            other => {
                return Err(DriverError::new(
                    STATE_DRIVER_NOT_FOUND,
                    format!("Unsupported database URL scheme `{}`", other),
                ));
            }
        };
        conn.map_err(driver_error)
    }
}

/// One sqlx connection. Starts disconnected.
#[derive(Default)]
pub struct AnySession {
    conn: Option<Backend>,
}

impl AnySession {
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

/// Prepare, describe, bind and stream one statement on a native connection.
macro_rules! run_statement {
    ($conn:ident, $sql:ident, $params:ident, $wrap:path) => {{
        let statement = (&mut *$conn).prepare($sql).await.map_err(driver_error)?;
        let mut columns: Vec<ColumnDescriptor> =
            statement.columns().iter().map(describe).collect();

        let mut query = statement.query();
        for param in $params {
            query = bind_value(query, param);
        }

        let (done, rows, fetch_error) = drain(query.fetch_many(&mut *$conn)).await?;
        refine_untyped_columns(&mut columns, &rows);

        Ok(Execution {
            columns,
            rows: rows.into_iter().map($wrap).collect(),
            affected_rows: done.rows_affected(),
            fetch_error,
        })
    }};
}

#[async_trait]
impl Session for AnySession {
    type Row = BackendRow;

    async fn connect(&mut self, dsn: &str, timeout: Duration) -> Result<(), DriverError> {
        let url = dsn::to_url(dsn)?;

        // The previous session is dropped rather than closed gracefully:
        // it is usually the reason we are reconnecting.
        self.conn = None;

        let connecting = Backend::connect(&url);
        let conn = if timeout.is_zero() {
            connecting.await
        } else {
            tokio::time::timeout(timeout, connecting)
                .await
                .map_err(|_| {
                    DriverError::new(
                        STATE_TIMEOUT,
                        format!("Timed out connecting ({}s)", timeout.as_secs()),
                    )
                })?
        }?;

        self.conn = Some(conn);
        Ok(())
    }

    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Execution<BackendRow>, DriverError> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| DriverError::connection_not_open("Session is not connected"))?;

        match conn {
            Backend::Postgres(conn) => run_statement!(conn, sql, params, BackendRow::Postgres),
            Backend::MySql(conn) => run_statement!(conn, sql, params, BackendRow::MySql),
            Backend::Sqlite(conn) => run_statement!(conn, sql, params, BackendRow::Sqlite),
        }
    }
}

/// Drain a `fetch_many` stream.
///
/// An error before anything arrived is the statement failing; a later one
/// is kept as the fetch error next to the rows read so far.
async fn drain<Q, R>(
    mut stream: BoxStream<'_, Result<Either<Q, R>, sqlx::Error>>,
) -> Result<(Q, Vec<R>, Option<DriverError>), DriverError>
where
    Q: Default + Extend<Q>,
{
    let mut done = Q::default();
    let mut rows = Vec::new();
    let mut received = false;
    let mut fetch_error = None;

    loop {
        match stream.try_next().await {
            Ok(Some(Either::Left(result))) => {
                done.extend(Some(result));
                received = true;
            }
            Ok(Some(Either::Right(row))) => {
                rows.push(row);
                received = true;
            }
            Ok(None) => break,
            Err(e) if !received => return Err(driver_error(e)),
            Err(e) => {
                fetch_error = Some(driver_error(e));
                break;
            }
        }
    }

    Ok((done, rows, fetch_error))
}

/// Bind a Value to a sqlx query.
fn bind_value<'q, DB>(
    query: Query<'q, DB, <DB as HasArguments<'q>>::Arguments>,
    value: &Value,
) -> Query<'q, DB, <DB as HasArguments<'q>>::Arguments>
where
    DB: Database,
    bool: Encode<'q, DB> + Type<DB>,
    i32: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
    NaiveDate: Encode<'q, DB> + Type<DB>,
    NaiveDateTime: Encode<'q, DB> + Type<DB>,
{
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        // No unsigned byte type in postgres or sqlite
        Value::UInt8(v) => query.bind(i32::from(*v)),
        Value::Int32(v) => query.bind(*v),
        Value::Int64(v) => query.bind(*v),
        Value::Double(v) => query.bind(*v),
        Value::String(s) => query.bind(s.clone()),
        Value::Timestamp(ts) => match ts.to_naive() {
            Some(naive) => query.bind(naive),
            None => query.bind(ts.to_string()),
        },
        Value::Date(d) => match d.to_naive() {
            Some(naive) => query.bind(naive),
            None => query.bind(d.to_string()),
        },
    }
}

fn describe<C: Column>(column: &C) -> ColumnDescriptor {
    let type_name = column.type_info().name().to_string();
    ColumnDescriptor::new(column.name(), sql_type_for(&type_name), type_name)
}

/// Give columns described as `NULL` the type of their first non-null value.
///
/// sqlite describes expression columns (`1 + 1`, `'a' || 'b'`) without a
/// declared type; the values themselves still carry their storage class.
fn refine_untyped_columns<R>(columns: &mut [ColumnDescriptor], rows: &[R])
where
    R: Row,
    usize: ColumnIndex<R>,
{
    for (index, column) in columns.iter_mut().enumerate() {
        if column.sql_type != SqlType::Unknown {
            continue;
        }

        let observed = rows.iter().find_map(|row| {
            let value = row.try_get_raw(index).ok()?;
            (!value.is_null()).then(|| value.type_info().name().to_string())
        });

        if let Some(type_name) = observed {
            column.sql_type = sql_type_for(&type_name);
            column.type_name = type_name;
        }
    }
}

/// Map a sqlx type name onto a SQL type code.
///
/// `NULL` (no declared type) is [`SqlType::Unknown`]; any other name not
/// listed here is [`UNRECOGNIZED_TYPE`].
pub fn sql_type_for(type_name: &str) -> SqlType {
    match type_name.to_ascii_uppercase().as_str() {
        "NULL" => SqlType::Unknown,
        "BOOL" | "BOOLEAN" => SqlType::Bit,
        "TINYINT" => SqlType::TinyInt,
        "INT2" | "SMALLINT" => SqlType::SmallInt,
        "INT" | "INT4" | "INTEGER" | "MEDIUMINT" => SqlType::Integer,
        "INT8" | "BIGINT" => SqlType::BigInt,
        "FLOAT4" | "REAL" | "FLOAT" => SqlType::Float,
        "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" => SqlType::Double,
        "NUMERIC" | "DECIMAL" => SqlType::Decimal,
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => SqlType::VarChar,
        "BLOB" | "BYTEA" | "VARBINARY" => SqlType::VarBinary,
        "DATE" => SqlType::DateTime,
        "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => SqlType::TypeTimestamp,
        _ => UNRECOGNIZED_TYPE,
    }
}

fn driver_error(err: sqlx::Error) -> DriverError {
    match &err {
        sqlx::Error::Database(db) => {
            let state = db
                .code()
                .map(|code| code.into_owned())
                .unwrap_or_else(|| STATE_GENERAL.to_string());
            DriverError::new(state, db.message())
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            DriverError::connection_not_open(err.to_string())
        }
        sqlx::Error::ColumnIndexOutOfBounds { index, len } => {
            DriverError::index_out_of_range(*index, *len)
        }
        _ => DriverError::new(STATE_GENERAL, err.to_string()),
    }
}

/// A row fetched by one of the native backends.
pub enum BackendRow {
    Postgres(PgRow),
    MySql(MySqlRow),
    Sqlite(SqliteRow),
}

fn is_null_at<R>(row: &R, index: usize) -> Result<bool, sqlx::Error>
where
    R: Row,
    usize: ColumnIndex<R>,
{
    row.try_get_raw(index).map(|value| value.is_null())
}

impl BackendRow {
    fn try_get<T>(&self, index: usize) -> Result<T, sqlx::Error>
    where
        T: for<'r> Decode<'r, Postgres> + Type<Postgres>,
        T: for<'r> Decode<'r, MySql> + Type<MySql>,
        T: for<'r> Decode<'r, Sqlite> + Type<Sqlite>,
    {
        match self {
            BackendRow::Postgres(row) => row.try_get(index),
            BackendRow::MySql(row) => row.try_get(index),
            BackendRow::Sqlite(row) => row.try_get(index),
        }
    }

    fn parse_text<T: std::str::FromStr>(&self, index: usize, what: &str) -> Result<T, DriverError>
    where
        T::Err: std::fmt::Display,
    {
        let text = self.get_string(index)?;
        text.parse().map_err(|e| {
            DriverError::new(
                STATE_INVALID_DATETIME,
                format!("Invalid {} `{}`: {}", what, text, e),
            )
        })
    }
}

impl DriverRow for BackendRow {
    fn is_null(&self, index: usize) -> Result<bool, DriverError> {
        match self {
            BackendRow::Postgres(row) => is_null_at(row, index),
            BackendRow::MySql(row) => is_null_at(row, index),
            BackendRow::Sqlite(row) => is_null_at(row, index),
        }
        .map_err(driver_error)
    }

    fn get_string(&self, index: usize) -> Result<String, DriverError> {
        self.try_get::<String>(index).map_err(driver_error)
    }

    fn get_f32(&self, index: usize) -> Result<f32, DriverError> {
        self.try_get::<f32>(index)
            .or_else(|_| self.try_get::<f64>(index).map(|v| v as f32))
            .or_else(|_| self.try_get::<i64>(index).map(|v| v as f32))
            .map_err(driver_error)
    }

    fn get_f64(&self, index: usize) -> Result<f64, DriverError> {
        self.try_get::<f64>(index)
            .or_else(|_| self.try_get::<f32>(index).map(f64::from))
            .or_else(|_| self.try_get::<i64>(index).map(|v| v as f64))
            .map_err(driver_error)
    }

    fn get_i32(&self, index: usize) -> Result<i32, DriverError> {
        match self
            .try_get::<i32>(index)
            .or_else(|_| self.try_get::<i16>(index).map(i32::from))
        {
            Ok(v) => Ok(v),
            Err(e) => {
                let wide = self.try_get::<i64>(index).map_err(|_| driver_error(e))?;
                i32::try_from(wide).map_err(|_| {
                    DriverError::new(STATE_OUT_OF_RANGE, format!("{} does not fit in 32 bits", wide))
                })
            }
        }
    }

    fn get_i64(&self, index: usize) -> Result<i64, DriverError> {
        self.try_get::<i64>(index)
            .or_else(|_| self.try_get::<i32>(index).map(i64::from))
            .or_else(|_| self.try_get::<i16>(index).map(i64::from))
            .map_err(driver_error)
    }

    fn get_date(&self, index: usize) -> Result<Date, DriverError> {
        if let Ok(date) = self.try_get::<NaiveDate>(index) {
            return Ok(date.into());
        }
        if let Ok(ts) = self.try_get::<NaiveDateTime>(index) {
            return Ok(ts.date().into());
        }
        self.parse_text(index, "date")
    }

    fn get_timestamp(&self, index: usize) -> Result<Timestamp, DriverError> {
        if let Ok(ts) = self.try_get::<NaiveDateTime>(index) {
            return Ok(ts.into());
        }
        if let Ok(ts) = self.try_get::<DateTime<Utc>>(index) {
            return Ok(ts.naive_utc().into());
        }
        if let Ok(date) = self.try_get::<NaiveDate>(index)
            && let Some(midnight) = date.and_hms_opt(0, 0, 0)
        {
            return Ok(midnight.into());
        }
        self.parse_text(index, "timestamp")
    }
}
