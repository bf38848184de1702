//! Scoped sessions over one borrowed connection

use std::fmt;

use tracing::{debug, warn};

use crate::driver::{Driver, DriverConnection, ExecResult, Params, QueryResult, Row};
use crate::error::{BoxDynError, Error, Resource, Result};
use crate::pool::Checkout;

/// Exclusive use of one pooled connection for a unit of work.
///
/// Sessions are created by [`ConnectionPool::acquire`](crate::ConnectionPool::acquire)
/// and hand their connection back exactly once: on [`release`](Self::release),
/// or when dropped. Any transaction still open at that point is rolled back.
///
/// When a statement fails, the open transaction (if any) is rolled back before
/// the error is returned.
///
/// Dropping a session returns its connection from a spawned task, so prefer
/// awaiting [`release`](Self::release) when the connection should be available
/// again before the next line of code runs.
#[must_use = "if unused, the connection is immediately returned to the pool"]
pub struct ScopedSession<D: Driver> {
   checkout: Option<Checkout<D>>,
   autobegin: bool,
}

impl<D: Driver> fmt::Debug for ScopedSession<D> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ScopedSession")
         .field("connection_id", &self.connection_id())
         .field("active", &self.checkout.is_some())
         .finish()
   }
}

impl<D: Driver> ScopedSession<D> {
   pub(crate) fn new(checkout: Checkout<D>, autobegin: bool) -> Self {
      Self {
         checkout: Some(checkout),
         autobegin,
      }
   }

   /// Run a read query that must produce exactly one row.
   ///
   /// Zero rows and more than one row both fail with [`Error::Cardinality`].
   pub async fn select_one(&mut self, query: &str, params: &Params) -> Result<Row> {
      let mut rows = self.select_all(query, params).await?;

      match rows.len() {
         1 => rows.pop().ok_or(Error::Cardinality { rows: 0 }),
         count => Err(Error::Cardinality { rows: count }),
      }
   }

   /// Run a read query and return every row, possibly none.
   pub async fn select_all(&mut self, query: &str, params: &Params) -> Result<QueryResult> {
      let conn = self.prepare().await?;

      let result = conn.fetch_all(query, params).await;
      match result {
         Ok(rows) => Ok(rows),
         Err(e) => Err(self.fail(e).await),
      }
   }

   /// Run a mutating statement and return the affected row count.
   pub async fn execute(&mut self, query: &str, params: &Params) -> Result<ExecResult> {
      let conn = self.prepare().await?;

      let result = conn.execute(query, params).await;
      match result {
         Ok(result) => Ok(result),
         Err(e) => Err(self.fail(e).await),
      }
   }

   /// Run one statement once per parameter set.
   ///
   /// Affected rows are summed; `last_insert_id` is the one reported by the
   /// last statement. Stops at the first failure.
   pub async fn execute_many(&mut self, query: &str, param_sets: &[Params]) -> Result<ExecResult> {
      let mut total = ExecResult::default();

      for params in param_sets {
         let result = self.execute(query, params).await?;
         total.rows_affected += result.rows_affected;
         if result.last_insert_id.is_some() {
            total.last_insert_id = result.last_insert_id;
         }
      }

      Ok(total)
   }

   /// Open a transaction on this session's connection.
   pub async fn begin(&mut self) -> Result<()> {
      let conn = self.active()?.conn()?;
      conn.begin().await.map_err(Error::Query)
   }

   /// Commit the open transaction. A no-op when none is open.
   pub async fn commit(&mut self) -> Result<()> {
      let conn = self.active()?.conn()?;

      let in_transaction = conn.in_transaction().await;
      let result = match in_transaction {
         Ok(false) => return Ok(()),
         Ok(true) => conn.commit().await,
         Err(e) => Err(e),
      };

      match result {
         Ok(()) => Ok(()),
         Err(e) => Err(self.fail(e).await),
      }
   }

   /// Roll back the open transaction. A no-op when none is open.
   pub async fn rollback(&mut self) -> Result<()> {
      let checkout = self.active()?;
      let conn = checkout.conn()?;

      let in_transaction = conn.in_transaction().await;
      let result = match in_transaction {
         Ok(false) => return Ok(()),
         Ok(true) => conn.rollback().await,
         Err(e) => Err(e),
      };

      result.map_err(|e| {
         checkout.broken = true;
         Error::Query(e)
      })
   }

   /// Whether the session can still run statements.
   pub fn is_available(&self) -> bool {
      self
         .checkout
         .as_ref()
         .is_some_and(|checkout| !checkout.is_invalidated())
   }

   /// Pool-assigned identifier of the borrowed connection, while active.
   pub fn connection_id(&self) -> Option<u64> {
      self.checkout.as_ref().and_then(Checkout::connection_id)
   }

   /// Return the connection to the pool, rolling back any open transaction.
   ///
   /// Releasing an already released session does nothing.
   pub async fn release(&mut self) {
      if let Some(checkout) = self.checkout.take() {
         checkout.return_to_pool().await;
      }
   }

   fn active(&mut self) -> Result<&mut Checkout<D>> {
      match self.checkout.as_mut() {
         Some(checkout) if !checkout.is_invalidated() => Ok(checkout),
         _ => Err(Error::UseAfterClose(Resource::Session)),
      }
   }

   /// Connection for the next statement, opening a transaction first when
   /// `autobegin` is on.
   async fn prepare(&mut self) -> Result<&mut D::Connection> {
      let autobegin = self.autobegin;
      let conn = self.active()?.conn()?;

      if autobegin && !conn.in_transaction().await.map_err(Error::Query)? {
         conn.begin().await.map_err(Error::Query)?;
      }

      Ok(conn)
   }

   /// Roll back after a failed statement and build the error to return.
   async fn fail(&mut self, error: BoxDynError) -> Error {
      let Some(checkout) = self.checkout.as_mut() else {
         return Error::Query(error);
      };
      let Ok(conn) = checkout.conn() else {
         return Error::Query(error);
      };

      let in_transaction = conn.in_transaction().await;
      let rollback = match in_transaction {
         Ok(false) => return Error::Query(error),
         Ok(true) => conn.rollback().await,
         Err(e) => Err(e),
      };

      match rollback {
         Ok(()) => {
            debug!(%error, "Rolled back transaction after failed statement");
            Error::Query(error)
         }
         Err(rollback_error) => {
            warn!(%error, %rollback_error, "Rollback after failed statement also failed");
            checkout.broken = true;
            Error::RollbackFailed {
               error: error.to_string(),
               rollback_error: rollback_error.to_string(),
            }
         }
      }
   }
}

impl<D: Driver> Drop for ScopedSession<D> {
   fn drop(&mut self) {
      let Some(checkout) = self.checkout.take() else {
         return;
      };

      match tokio::runtime::Handle::try_current() {
         Ok(handle) => {
            handle.spawn(checkout.return_to_pool());
         }
         Err(_) => {
            // no runtime to roll back on; the connection is discarded but its
            // capacity still goes back to the pool
            warn!("ScopedSession dropped outside a tokio runtime; discarding its connection");
            drop(checkout);
         }
      }
   }
}
