//! Error types for sqlx-session-pool

use std::fmt;
use std::time::Duration;

/// Boxed error produced by a driver collaborator.
pub type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of handle an operation was attempted on after it was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
   Pool,
   Session,
}

impl fmt::Display for Resource {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Resource::Pool => f.write_str("connection pool has been closed"),
         Resource::Session => f.write_str("session has been released"),
      }
   }
}

/// Errors that may occur when working with a connection pool or its sessions
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Malformed connection descriptor or invalid numeric option.
   #[error("invalid pool configuration: {0}")]
   Configuration(String),

   /// The database target could not be reached while opening a connection.
   #[error("failed to connect: {0}")]
   Connection(#[source] BoxDynError),

   /// No connection became available within the acquire timeout.
   #[error("pool exhausted: no connection available within {timeout:?}")]
   PoolExhausted { timeout: Duration },

   /// The driver failed to execute a statement. Any open transaction was
   /// rolled back before this error was returned.
   #[error("query failed: {0}")]
   Query(#[source] BoxDynError),

   /// `select_one` did not get exactly one row.
   #[error("select_one() query returned {rows} rows, expected exactly 1")]
   Cardinality { rows: usize },

   /// Operation attempted on a closed pool or a released session.
   #[error("{0}")]
   UseAfterClose(Resource),

   /// `open` called on a pool that is already open.
   #[error("connection pool is already initialized")]
   AlreadyInitialized,

   /// `acquire` called before the pool was opened.
   #[error("connection pool has not been initialized")]
   NotInitialized,

   /// A statement failed and the implicit rollback failed as well.
   #[error("query failed: {error}; rollback also failed: {rollback_error}")]
   RollbackFailed {
      error: String,
      rollback_error: String,
   },
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> &'static str {
      match self {
         Error::Configuration(_) => "CONFIGURATION_ERROR",
         Error::Connection(_) => "CONNECTION_ERROR",
         Error::PoolExhausted { .. } => "POOL_EXHAUSTED",
         Error::Query(_) => "QUERY_ERROR",
         Error::Cardinality { .. } => "CARDINALITY_ERROR",
         Error::UseAfterClose(_) => "USE_AFTER_CLOSE",
         Error::AlreadyInitialized => "ALREADY_INITIALIZED",
         Error::NotInitialized => "NOT_INITIALIZED",
         Error::RollbackFailed { .. } => "ROLLBACK_FAILED",
      }
   }

   /// True for errors a caller may reasonably retry.
   pub fn is_transient(&self) -> bool {
      matches!(self, Error::Connection(_) | Error::PoolExhausted { .. })
   }
}
