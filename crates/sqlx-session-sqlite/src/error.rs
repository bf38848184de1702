/// Errors raised by the SQLite driver before a statement reaches SQLite.
///
/// Everything else is passed through from SQLx.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// A `:name` placeholder has no value in the parameter map.
   #[error("missing value for named parameter :{0}")]
   MissingParameter(String),

   /// SQLite type that cannot be mapped to JSON.
   #[error("unsupported datatype: {0}")]
   UnsupportedDatatype(String),
}

impl Error {
   pub fn error_code(&self) -> &'static str {
      match self {
         Error::MissingParameter(_) => "MISSING_PARAMETER",
         Error::UnsupportedDatatype(_) => "UNSUPPORTED_DATATYPE",
      }
   }
}
