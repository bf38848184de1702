use std::str::FromStr;

use libsqlite3_sys::sqlite3_get_autocommit;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use sqlx_session_pool::{BoxDynError, Driver, DriverConnection, ExecResult, Params, Row};
use tracing::trace;

use crate::decode::{bind_value, decode_rows};
use crate::params::NamedQuery;

/// [`Driver`] for SQLite databases.
///
/// Descriptors are SQLx SQLite URLs such as `sqlite://app.db`,
/// `sqlite://app.db?mode=rwc` or `sqlite::memory:`. A file that does not exist
/// is only created when the descriptor says `mode=rwc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl Driver for SqliteDriver {
   type Options = SqliteConnectOptions;
   type Connection = SqliteSessionConnection;

   fn parse_descriptor(&self, descriptor: &str) -> Result<SqliteConnectOptions, BoxDynError> {
      Ok(SqliteConnectOptions::from_str(descriptor)?)
   }

   async fn connect(
      &self,
      options: &SqliteConnectOptions,
   ) -> Result<SqliteSessionConnection, BoxDynError> {
      let conn = options.connect().await?;
      trace!("Opened SQLite connection");
      Ok(SqliteSessionConnection { conn })
   }
}

/// One SQLite connection owned by a pool.
///
/// Statements take `:name` placeholders bound from [`Params`]; rows come back
/// as JSON objects with column order preserved.
#[derive(Debug)]
pub struct SqliteSessionConnection {
   conn: SqliteConnection,
}

impl SqliteSessionConnection {
   /// The underlying SQLx connection, for anything the session API does not
   /// cover.
   pub fn as_sqlx(&mut self) -> &mut SqliteConnection {
      &mut self.conn
   }
}

impl DriverConnection for SqliteSessionConnection {
   async fn fetch_all(&mut self, query: &str, params: &Params) -> Result<Vec<Row>, BoxDynError> {
      let named = NamedQuery::parse(query);
      let values = named.values(params)?;

      let mut q = sqlx::query(&named.sql);
      for value in values {
         q = bind_value(q, value);
      }

      let rows = q.fetch_all(&mut self.conn).await?;
      decode_rows(rows)
   }

   async fn execute(&mut self, query: &str, params: &Params) -> Result<ExecResult, BoxDynError> {
      let named = NamedQuery::parse(query);
      let values = named.values(params)?;

      let mut q = sqlx::query(&named.sql);
      for value in values {
         q = bind_value(q, value);
      }

      let result = q.execute(&mut self.conn).await?;
      let last_insert_id = result.last_insert_rowid();

      Ok(ExecResult {
         rows_affected: result.rows_affected(),
         // 0 means no row has ever been inserted on this connection
         last_insert_id: (last_insert_id != 0).then_some(last_insert_id),
      })
   }

   async fn begin(&mut self) -> Result<(), BoxDynError> {
      sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql("BEGIN")).await?;
      Ok(())
   }

   async fn commit(&mut self) -> Result<(), BoxDynError> {
      sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql("COMMIT")).await?;
      Ok(())
   }

   async fn rollback(&mut self) -> Result<(), BoxDynError> {
      sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql("ROLLBACK")).await?;
      Ok(())
   }

   async fn in_transaction(&mut self) -> Result<bool, BoxDynError> {
      let autocommit = {
         let mut handle = self.conn.lock_handle().await?;
         // SAFETY: the handle stays locked for the duration of the call, so the
         // pointer is valid and no statement runs concurrently.
         unsafe { sqlite3_get_autocommit(handle.as_raw_handle().as_ptr()) }
      };

      Ok(autocommit == 0)
   }

   async fn ping(&mut self) -> Result<(), BoxDynError> {
      self.conn.ping().await?;
      Ok(())
   }

   async fn close(self) -> Result<(), BoxDynError> {
      self.conn.close().await?;
      Ok(())
   }
}
