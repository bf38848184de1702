//! The database driver collaborator
//!
//! The pool never talks to a database itself. It asks a [`Driver`] to parse
//! the connection descriptor and to open physical connections, and it asks a
//! [`DriverConnection`] to run statements and manage transactions.

use std::future::Future;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::BoxDynError;

/// A single result row, keyed by column name in select-list order.
pub type Row = IndexMap<String, JsonValue>;

/// Rows produced by a read query.
pub type QueryResult = Vec<Row>;

/// Named statement parameters.
pub type Params = IndexMap<String, JsonValue>;

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: u64,
   /// The last inserted row ID, for drivers that report one.
   pub last_insert_id: Option<i64>,
}

/// Opens physical connections to one kind of database.
pub trait Driver: Send + Sync + 'static {
   /// Parsed form of a connection descriptor.
   type Options: Clone + Send + Sync + 'static;

   /// The physical connection type.
   type Connection: DriverConnection;

   /// Parse and validate a connection descriptor.
   ///
   /// Failures are reported to callers as [`Error::Configuration`](crate::Error::Configuration).
   fn parse_descriptor(&self, descriptor: &str) -> Result<Self::Options, BoxDynError>;

   /// Open one physical connection.
   ///
   /// Failures are reported to callers as [`Error::Connection`](crate::Error::Connection).
   fn connect(
      &self,
      options: &Self::Options,
   ) -> impl Future<Output = Result<Self::Connection, BoxDynError>> + Send;
}

/// One physical database connection.
///
/// Implementations only need to execute what they are told; transaction
/// cleanup and pooling policy live in the pool.
pub trait DriverConnection: Send + 'static {
   /// Run a read query and return every row.
   fn fetch_all(
      &mut self,
      query: &str,
      params: &Params,
   ) -> impl Future<Output = Result<Vec<Row>, BoxDynError>> + Send;

   /// Run a mutating statement.
   fn execute(
      &mut self,
      query: &str,
      params: &Params,
   ) -> impl Future<Output = Result<ExecResult, BoxDynError>> + Send;

   fn begin(&mut self) -> impl Future<Output = Result<(), BoxDynError>> + Send;

   fn commit(&mut self) -> impl Future<Output = Result<(), BoxDynError>> + Send;

   fn rollback(&mut self) -> impl Future<Output = Result<(), BoxDynError>> + Send;

   /// Whether a transaction is currently open on this connection.
   fn in_transaction(&mut self) -> impl Future<Output = Result<bool, BoxDynError>> + Send;

   /// Check that the connection is still usable.
   fn ping(&mut self) -> impl Future<Output = Result<(), BoxDynError>> + Send;

   /// Close the connection gracefully.
   fn close(self) -> impl Future<Output = Result<(), BoxDynError>> + Send;
}
