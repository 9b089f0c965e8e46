//! # dbpool: pooled SQL access off the main thread
//!
//! > **A fixed pool, one session per slot, results handed back where you want them.**
//!
//! dbpool keeps a fixed number of database sessions open, runs statements
//! on a worker per session and returns typed results either as a
//! [`dispatch::Pending`] value or through a callback posted to a
//! [`dispatch::CompletionContext`].
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use dbpool::prelude::*;
//!
//! let config = PoolConfig::new("postgres", "localhost", 5432, "shop")
//!     .user("app")
//!     .pool_size(4);
//! let pool = DatabasePool::create_sync(&AnyDriver, &config)?;
//!
//! let (kind, result) = pool.query_sync("SELECT id, name FROM users WHERE id = $1", &[Value::from(7)]);
//! // => kind == ErrorKind::None, result.get("name", 0) == Value::String("ada")
//! ```
//!
//! ## Layers
//!
//! | Layer        | Module         | Role                                   |
//! |--------------|----------------|----------------------------------------|
//! | Values       | [`value`]      | Bind parameters and decoded cells      |
//! | Results      | [`result`]     | Immutable, shared query snapshots      |
//! | Driver       | [`driver`]     | Session seam, sqlx backend             |
//! | Connection   | [`connection`] | Exclusive flag, query + reconnect loop |
//! | Pool         | [`pool`]       | Fixed set of connections               |
//! | Dispatch     | [`dispatch`]   | Bounded workers, completion handoff    |
//! | Facade       | [`database`]   | Blocking, pending and callback forms   |

pub mod config;
pub mod connection;
pub mod database;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod pool;
pub mod result;
pub mod testing;
pub mod value;

pub mod prelude {
    pub use crate::config::PoolConfig;
    pub use crate::database::DatabasePool;
    pub use crate::dispatch::{CompletionContext, CompletionQueue, CompletionSender, Inline, Pending};
    pub use crate::driver::{AnyDriver, AnySession};
    pub use crate::error::{DriverError, Error, ErrorKind, Result};
    pub use crate::pool::ReconnectReport;
    pub use crate::result::{ColumnMetadata, QueryResult};
    pub use crate::value::{Date, Timestamp, Value, ValueType};
}
