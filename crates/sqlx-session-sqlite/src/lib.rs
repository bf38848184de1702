//! # sqlx-session-sqlite
//!
//! SQLite [`Driver`](sqlx_session_pool::Driver) for `sqlx-session-pool`, built on
//! SQLx.
//!
//! - Descriptors are SQLx SQLite URLs (`sqlite://app.db?mode=rwc`, `sqlite::memory:`)
//! - Statements use `:name` placeholders, bound from a
//!   [`Params`](sqlx_session_pool::Params) map. A name starts with a letter
//!   (any script) or `_`, then letters, digits or `_`; `:1` is not rewritten
//! - Rows decode to JSON objects in column order: INTEGER and REAL become
//!   numbers, TEXT strings, BLOB base64 strings and NULL `null`
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use sqlx_session_pool::{ConnectionPool, Params, PoolConfig};
//! use sqlx_session_sqlite::SqliteDriver;
//!
//! # async fn example() -> sqlx_session_pool::Result<()> {
//! let config = PoolConfig::new("sqlite://app.db?mode=rwc").with_pool_size(2);
//! let pool = ConnectionPool::connect(SqliteDriver, config).await?;
//!
//! let mut session = pool.acquire(None).await?;
//! let mut params = Params::new();
//! params.insert("name".into(), json!("alice"));
//! session
//!    .execute("INSERT INTO users (name) VALUES (:name)", &params)
//!    .await?;
//! session.release().await;
//!
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

mod decode;
mod driver;
mod error;
mod params;

pub use driver::{SqliteDriver, SqliteSessionConnection};
pub use error::Error;

/// Pool of SQLite connections
pub type SqlitePool = sqlx_session_pool::ConnectionPool<SqliteDriver>;

/// Session over one pooled SQLite connection
pub type SqliteSession = sqlx_session_pool::ScopedSession<SqliteDriver>;
