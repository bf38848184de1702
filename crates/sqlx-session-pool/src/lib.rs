//! # sqlx-session-pool
//!
//! A bounded, driver-agnostic connection pool that hands out connections as
//! scoped sessions and guarantees every connection finds its way back.
//!
//! ## Core Types
//!
//! - **[`ConnectionPool`]**: Bounded set of connections to one database target,
//!   with overflow capacity and first-come-first-served waiting
//! - **[`ScopedSession`]**: Exclusive use of one connection for a unit of work;
//!   released exactly once, explicitly or on drop
//! - **[`PoolConfig`]**: Pool sizing, timeouts and session behavior
//! - **[`Driver`] / [`DriverConnection`]**: The database driver the pool sits on
//! - **[`Error`]**: Error type for pool and session operations
//!
//! ## Pool Policy
//!
//! - **Baseline connections**: `pool_size` connections are opened by `open` and
//!   kept idle between uses
//! - **Overflow**: up to `max_overflow` extra connections are opened under
//!   burst load and closed as soon as they are released
//! - **Waiting**: when at capacity, `acquire` waits up to `acquire_timeout`
//! - **Release**: uncommitted transactions are rolled back before a connection
//!   goes back to the pool
//! - **Shutdown**: `close` fails pending acquires, closes idle connections and
//!   drains checked-out ones for up to `drain_timeout`
//!
//! ## Example
//!
//! ```no_run
//! use sqlx_session_pool::{ConnectionPool, Driver, Params, PoolConfig, Result};
//!
//! async fn count_users<D: Driver>(driver: D) -> Result<u64> {
//!    let pool = ConnectionPool::connect(driver, PoolConfig::new("sqlite://app.db")).await?;
//!
//!    let mut session = pool.acquire(None).await?;
//!    let row = session
//!       .select_one("SELECT COUNT(*) AS n FROM users", &Params::new())
//!       .await?;
//!    session.release().await;
//!
//!    pool.close().await;
//!    Ok(row["n"].as_u64().unwrap_or_default())
//! }
//! ```

mod config;
mod driver;
mod error;
mod pool;
mod session;

// Re-export public types
pub use config::PoolConfig;
pub use driver::{Driver, DriverConnection, ExecResult, Params, QueryResult, Row};
pub use error::{BoxDynError, Error, Resource, Result};
pub use pool::{ConnectionPool, PoolState, PoolStatus};
pub use session::ScopedSession;
