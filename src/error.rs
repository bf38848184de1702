/// Result type alias for data source operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for data source operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from a pool or one of its sessions.
   #[error(transparent)]
   Pool(#[from] sqlx_session_pool::Error),

   /// No data source registered under this name.
   #[error("unknown data source: {0}")]
   UnknownDataSource(String),

   /// Row has no column to group by.
   #[error("column '{0}' not found in row")]
   MissingColumn(String),
}

impl Error {
   /// Stable code for callers that branch on the kind of failure.
   pub fn error_code(&self) -> &'static str {
      match self {
         Error::Pool(e) => e.error_code(),
         Error::UnknownDataSource(_) => "UNKNOWN_DATA_SOURCE",
         Error::MissingColumn(_) => "MISSING_COLUMN",
      }
   }
}
