//! # sqlx-datasource
//!
//! Named data sources over bounded connection pools.
//!
//! - **[`DataSources`]**: registry of open pools by name
//! - **[`Dao`]**: data access objects that run on a caller-held session
//! - **[`group_by`]**: group result rows by one column's value
//!
//! Pool and session types are re-exported from `sqlx-session-pool`; the SQLite
//! driver from `sqlx-session-sqlite` is re-exported with the `sqlite` feature
//! (on by default).
//!
//! ## Example
//!
//! ```no_run
//! use sqlx_datasource::{DataSources, Params, PoolConfig, SqliteDriver};
//!
//! # async fn example() -> sqlx_datasource::Result<()> {
//! let sources = DataSources::new();
//! sources
//!    .load("main", SqliteDriver, PoolConfig::new("sqlite://app.db?mode=rwc"))
//!    .await?;
//!
//! let mut session = sources.acquire("main").await?;
//! let _users = session.select_all("SELECT * FROM users", &Params::new()).await?;
//! session.release().await;
//!
//! sources.close_all().await;
//! # Ok(())
//! # }
//! ```

mod dao;
mod error;
mod registry;

pub use dao::{Dao, group_by};
pub use error::{Error, Result};
pub use registry::DataSources;

// Re-export pool and session types
pub use sqlx_session_pool::{
   ConnectionPool, Driver, DriverConnection, Error as PoolError, ExecResult, Params, PoolConfig,
   PoolState, PoolStatus, QueryResult, Resource, Row, ScopedSession,
};

#[cfg(feature = "sqlite")]
pub use sqlx_session_sqlite::{SqliteDriver, SqlitePool, SqliteSession};
