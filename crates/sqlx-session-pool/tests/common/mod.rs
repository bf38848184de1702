//! In-process driver used to exercise pool policy without a database.
//!
//! Statements understood by [`MockConnection`]:
//!
//! ```text
//! ROWS <n>        fetch_all returns n rows: { "n": 0.., "conn": <mock id> }
//! FAIL <anything> fetch_all/execute fail with a driver error
//! <anything else> execute affects 1 row
//! ```

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use sqlx_session_pool::{
   BoxDynError, ConnectionPool, Driver, DriverConnection, ExecResult, Params, PoolConfig, Row,
};

#[derive(Default)]
pub struct MockState {
   pub opened: AtomicUsize,
   pub closed: AtomicUsize,
   pub dropped: AtomicUsize,
   pub commits: AtomicUsize,
   pub rollbacks: AtomicUsize,
   pub fail_connect: AtomicBool,
   pub fail_ping: AtomicBool,
   pub fail_rollback: AtomicBool,
   pub connect_delay_ms: AtomicU64,
   next_id: AtomicU64,
}

impl MockState {
   /// Connections opened and not yet dropped
   pub fn live(&self) -> usize {
      self.opened.load(Ordering::SeqCst) - self.dropped.load(Ordering::SeqCst)
   }

   pub fn opened(&self) -> usize {
      self.opened.load(Ordering::SeqCst)
   }

   pub fn closed(&self) -> usize {
      self.closed.load(Ordering::SeqCst)
   }

   pub fn rollbacks(&self) -> usize {
      self.rollbacks.load(Ordering::SeqCst)
   }

   pub fn commits(&self) -> usize {
      self.commits.load(Ordering::SeqCst)
   }
}

#[derive(Clone, Default)]
pub struct MockDriver {
   pub state: Arc<MockState>,
}

pub struct MockConnection {
   id: u64,
   in_transaction: bool,
   state: Arc<MockState>,
}

impl Driver for MockDriver {
   type Options = String;
   type Connection = MockConnection;

   fn parse_descriptor(&self, descriptor: &str) -> Result<String, BoxDynError> {
      descriptor
         .strip_prefix("mock://")
         .map(str::to_owned)
         .ok_or_else(|| format!("unsupported descriptor: {descriptor}").into())
   }

   async fn connect(&self, _options: &String) -> Result<MockConnection, BoxDynError> {
      let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
      if delay > 0 {
         tokio::time::sleep(Duration::from_millis(delay)).await;
      }

      if self.state.fail_connect.load(Ordering::SeqCst) {
         return Err("connection refused".into());
      }

      self.state.opened.fetch_add(1, Ordering::SeqCst);
      Ok(MockConnection {
         id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
         in_transaction: false,
         state: Arc::clone(&self.state),
      })
   }
}

impl DriverConnection for MockConnection {
   async fn fetch_all(&mut self, query: &str, _params: &Params) -> Result<Vec<Row>, BoxDynError> {
      if query.starts_with("FAIL") {
         return Err(format!("simulated failure: {query}").into());
      }

      let count: usize = query
         .strip_prefix("ROWS ")
         .and_then(|n| n.trim().parse().ok())
         .ok_or_else(|| format!("unsupported query: {query}"))?;

      Ok((0..count)
         .map(|n| {
            let mut row = Row::new();
            row.insert("n".into(), json!(n));
            row.insert("conn".into(), json!(self.id));
            row
         })
         .collect())
   }

   async fn execute(&mut self, query: &str, _params: &Params) -> Result<ExecResult, BoxDynError> {
      if query.starts_with("FAIL") {
         return Err(format!("simulated failure: {query}").into());
      }

      Ok(ExecResult {
         rows_affected: 1,
         last_insert_id: Some(self.id as i64),
      })
   }

   async fn begin(&mut self) -> Result<(), BoxDynError> {
      if self.in_transaction {
         return Err("transaction already open".into());
      }
      self.in_transaction = true;
      Ok(())
   }

   async fn commit(&mut self) -> Result<(), BoxDynError> {
      self.in_transaction = false;
      self.state.commits.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }

   async fn rollback(&mut self) -> Result<(), BoxDynError> {
      if self.state.fail_rollback.load(Ordering::SeqCst) {
         return Err("connection lost during rollback".into());
      }
      self.in_transaction = false;
      self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }

   async fn in_transaction(&mut self) -> Result<bool, BoxDynError> {
      Ok(self.in_transaction)
   }

   async fn ping(&mut self) -> Result<(), BoxDynError> {
      if self.state.fail_ping.load(Ordering::SeqCst) {
         return Err("server has gone away".into());
      }
      Ok(())
   }

   async fn close(self) -> Result<(), BoxDynError> {
      self.state.closed.fetch_add(1, Ordering::SeqCst);
      Ok(())
   }
}

impl Drop for MockConnection {
   fn drop(&mut self) {
      self.state.dropped.fetch_add(1, Ordering::SeqCst);
   }
}

pub fn config(pool_size: u32, max_overflow: u32) -> PoolConfig {
   PoolConfig::new("mock://test")
      .with_pool_size(pool_size)
      .with_max_overflow(max_overflow)
      .with_acquire_timeout(Duration::from_millis(100))
      .with_drain_timeout(Duration::from_millis(200))
}

pub async fn open_pool(config: PoolConfig) -> (ConnectionPool<MockDriver>, Arc<MockState>) {
   let _ = tracing_subscriber::fmt()
      .with_test_writer()
      .with_max_level(tracing::Level::TRACE)
      .try_init();

   let driver = MockDriver::default();
   let state = Arc::clone(&driver.state);
   let pool = ConnectionPool::connect(driver, config).await.unwrap();
   (pool, state)
}

/// Wait for spawned release tasks to run.
pub async fn settle() {
   tokio::time::sleep(Duration::from_millis(20)).await;
}
