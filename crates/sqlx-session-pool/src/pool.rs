//! Bounded connection pool with overflow capacity
//!
//! ## Bookkeeping
//!
//! All counters and the idle queue live behind one mutex that is never held
//! across an `.await`. Capacity is a fair [`Semaphore`] holding
//! `pool_size + max_overflow` permits, so waiters are served in the order
//! they started waiting. A checked-out connection owns its permit; the
//! connection is put back on the idle queue before the permit is returned, so
//! the waiter that gets woken finds it there.
//!
//! ```text
//! acquire ── permit ──> idle queue ──(empty)──> driver.connect
//!                          ^                        │
//!                          └──── release <── session
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::driver::{Driver, DriverConnection};
use crate::error::{Error, Resource, Result};
use crate::session::ScopedSession;

/// Lifecycle of a [`ConnectionPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
   /// Created but not yet opened
   Uninitialized,
   /// `open` is establishing the baseline connections
   Opening,
   Open,
   Closed,
}

/// Point-in-time view of a pool's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
   pub state: PoolState,
   /// Live connections, idle or checked out
   pub size: usize,
   pub idle: usize,
   /// Connections checked out, including ones still being connected
   pub in_use: usize,
   /// Live connections beyond `pool_size`
   pub overflow: usize,
   pub max_connections: usize,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A physical connection plus the pool's bookkeeping for it
pub(crate) struct Live<C> {
   pub(crate) raw: C,
   pub(crate) id: u64,
   created_at: Instant,
   overflow: bool,
}

impl<C> Live<C> {
   fn new(raw: C, overflow: bool) -> Self {
      Self {
         raw,
         id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
         created_at: Instant::now(),
         overflow,
      }
   }
}

struct Shared<C, O> {
   state: PoolState,
   options: Option<O>,
   idle: VecDeque<Live<C>>,
   in_use: usize,
   overflow: usize,
}

pub(crate) struct PoolInner<D: Driver> {
   driver: D,
   config: PoolConfig,
   shared: Mutex<Shared<D::Connection, D::Options>>,
   semaphore: Arc<Semaphore>,
   /// Mirrors `Shared::in_use` so `close` can wait for it to drain
   in_use_tx: watch::Sender<usize>,
   /// Set when `close` gave up waiting for checked-out connections
   invalidated: AtomicBool,
}

/// A bounded pool of connections to one database target.
///
/// `ConnectionPool` is a handle; clones share the same pool. Several pools,
/// for the same or different targets, can coexist.
///
/// ## Usage Pattern
///
/// ```text
/// 1. Create and open the pool (baseline connections are opened eagerly)
/// 2. For each unit of work: acquire a session, run queries, release it
/// 3. Close the pool when done
/// ```
pub struct ConnectionPool<D: Driver>(pub(crate) Arc<PoolInner<D>>);

impl<D: Driver> Clone for ConnectionPool<D> {
   fn clone(&self) -> Self {
      Self(Arc::clone(&self.0))
   }
}

impl<D: Driver> fmt::Debug for ConnectionPool<D> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ConnectionPool")
         .field("status", &self.status())
         .finish()
   }
}

impl<D: Driver> ConnectionPool<D> {
   /// Create an uninitialized pool. No connection is made until [`open`](Self::open).
   pub fn new(driver: D, config: PoolConfig) -> Self {
      let permits = config.max_connections().min(Semaphore::MAX_PERMITS);
      let (in_use_tx, _) = watch::channel(0);

      Self(Arc::new(PoolInner {
         driver,
         config,
         shared: Mutex::new(Shared {
            state: PoolState::Uninitialized,
            options: None,
            idle: VecDeque::new(),
            in_use: 0,
            overflow: 0,
         }),
         semaphore: Arc::new(Semaphore::new(permits)),
         in_use_tx,
         invalidated: AtomicBool::new(false),
      }))
   }

   /// Create a pool and open it.
   pub async fn connect(driver: D, config: PoolConfig) -> Result<Self> {
      let pool = Self::new(driver, config);
      pool.open().await?;
      Ok(pool)
   }

   /// Validate the configuration and open `pool_size` connections.
   ///
   /// On failure every connection made so far is closed and the pool stays
   /// uninitialized, so `open` may be retried.
   pub async fn open(&self) -> Result<()> {
      let inner = &self.0;

      {
         let mut shared = inner.shared.lock();
         match shared.state {
            PoolState::Uninitialized => shared.state = PoolState::Opening,
            PoolState::Opening | PoolState::Open => return Err(Error::AlreadyInitialized),
            PoolState::Closed => return Err(Error::UseAfterClose(Resource::Pool)),
         }
      }

      let mut guard = OpeningGuard { inner, armed: true };
      let (options, connections) = inner.establish().await?;

      let rejected = {
         let mut shared = inner.shared.lock();
         guard.armed = false;

         if shared.state == PoolState::Opening {
            shared.idle.extend(connections);
            shared.options = Some(options);
            shared.state = PoolState::Open;
            None
         } else {
            // closed while we were connecting
            Some(connections)
         }
      };

      if let Some(connections) = rejected {
         for live in connections {
            close_live(live).await;
         }
         return Err(Error::UseAfterClose(Resource::Pool));
      }

      debug!(
         pool_size = inner.config.pool_size,
         max_overflow = inner.config.max_overflow,
         "Connection pool opened"
      );
      Ok(())
   }

   /// Check out a connection wrapped in a [`ScopedSession`].
   ///
   /// Idle connections are handed out first; otherwise a new connection is
   /// opened while capacity remains. When the pool is at capacity the caller
   /// waits, first come first served, for up to `timeout` (defaulting to the
   /// configured `acquire_timeout`).
   pub async fn acquire(&self, timeout: Option<Duration>) -> Result<ScopedSession<D>> {
      let inner = &self.0;
      inner.check_state()?;

      let timeout = timeout.unwrap_or(inner.config.acquire_timeout);
      let started_at = Instant::now();

      let permit =
         match tokio::time::timeout(timeout, Arc::clone(&inner.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            // the semaphore is only closed by `close`
            Ok(Err(_)) => return Err(Error::UseAfterClose(Resource::Pool)),
            Err(_) => {
               debug!(timeout = ?timeout, "Timed out waiting for a connection");
               return Err(Error::PoolExhausted { timeout });
            }
         };

      let live = inner.checkout().await?;

      trace!(
         connection_id = live.id,
         waited = ?started_at.elapsed(),
         "Acquired connection"
      );

      Ok(ScopedSession::new(
         Checkout {
            pool: Arc::clone(inner),
            live: Some(live),
            permit: Some(permit),
            broken: false,
         },
         inner.config.autobegin,
      ))
   }

   /// Run `f` with a freshly acquired session and release it afterwards,
   /// whatever `f` returned.
   ///
   /// ```no_run
   /// # use sqlx_session_pool::{ConnectionPool, Driver, Params, Result, Row};
   /// # async fn example<D: Driver>(pool: ConnectionPool<D>) -> Result<Vec<Row>> {
   /// pool.scope(|session| {
   ///    Box::pin(async move { session.select_all("SELECT * FROM users", &Params::new()).await })
   /// })
   /// .await
   /// # }
   /// ```
   pub async fn scope<T, F>(&self, f: F) -> Result<T>
   where
      F: for<'s> FnOnce(&'s mut ScopedSession<D>) -> BoxFuture<'s, Result<T>>,
   {
      let mut session = self.acquire(None).await?;
      let result = f(&mut session).await;
      session.release().await;
      result
   }

   /// Like [`scope`](Self::scope), but runs `f` inside a transaction.
   ///
   /// The transaction is committed when `f` succeeds and rolled back when it
   /// fails.
   pub async fn transaction<T, F>(&self, f: F) -> Result<T>
   where
      F: for<'s> FnOnce(&'s mut ScopedSession<D>) -> BoxFuture<'s, Result<T>>,
   {
      let mut session = self.acquire(None).await?;
      let result = run_transaction(&mut session, f).await;
      session.release().await;
      result
   }

   /// Close the pool.
   ///
   /// Waiting and future `acquire` calls fail with
   /// [`Error::UseAfterClose`]. Idle connections are closed right away;
   /// checked-out connections are closed as their sessions release them. If
   /// they are not all back within `drain_timeout`, the remaining sessions are
   /// invalidated and a warning is logged.
   ///
   /// Calling `close` more than once is a no-op.
   pub async fn close(&self) {
      let inner = &self.0;

      let idle = {
         let mut shared = inner.shared.lock();
         if shared.state == PoolState::Closed {
            return;
         }
         shared.state = PoolState::Closed;
         inner.semaphore.close();
         std::mem::take(&mut shared.idle)
      };

      debug!(idle = idle.len(), "Closing connection pool");

      for live in idle {
         close_live(live).await;
      }

      let mut in_use = inner.in_use_tx.subscribe();
      let drained = tokio::time::timeout(
         inner.config.drain_timeout,
         in_use.wait_for(|count| *count == 0),
      )
      .await
      .is_ok();

      if !drained {
         inner.invalidated.store(true, Ordering::Release);
         warn!(
            remaining = inner.shared.lock().in_use,
            drain_timeout = ?inner.config.drain_timeout,
            "Connections still in use after drain timeout; invalidating them"
         );
      }

      debug!("Connection pool closed");
   }

   pub fn state(&self) -> PoolState {
      self.0.shared.lock().state
   }

   pub fn is_closed(&self) -> bool {
      self.state() == PoolState::Closed
   }

   pub fn config(&self) -> &PoolConfig {
      &self.0.config
   }

   pub fn driver(&self) -> &D {
      &self.0.driver
   }

   pub fn status(&self) -> PoolStatus {
      let shared = self.0.shared.lock();
      PoolStatus {
         state: shared.state,
         size: shared.idle.len() + shared.in_use,
         idle: shared.idle.len(),
         in_use: shared.in_use,
         overflow: shared.overflow,
         max_connections: self.0.config.max_connections(),
      }
   }

   pub fn idle_count(&self) -> usize {
      self.0.shared.lock().idle.len()
   }

   pub fn in_use_count(&self) -> usize {
      self.0.shared.lock().in_use
   }
}

impl<D: Driver> PoolInner<D> {
   fn check_state(&self) -> Result<()> {
      match self.shared.lock().state {
         PoolState::Open => Ok(()),
         PoolState::Closed => Err(Error::UseAfterClose(Resource::Pool)),
         PoolState::Uninitialized | PoolState::Opening => Err(Error::NotInitialized),
      }
   }

   pub(crate) fn is_invalidated(&self) -> bool {
      self.invalidated.load(Ordering::Acquire)
   }

   /// Parse the descriptor and open the baseline connections.
   async fn establish(&self) -> Result<(D::Options, Vec<Live<D::Connection>>)> {
      self.config.validate()?;

      let options = self
         .driver
         .parse_descriptor(&self.config.descriptor)
         .map_err(|e| Error::Configuration(format!("invalid connection descriptor: {e}")))?;

      let mut connections = Vec::with_capacity(self.config.pool_size as usize);
      for _ in 0..self.config.pool_size {
         match self.connect_raw(&options).await {
            Ok(raw) => connections.push(Live::new(raw, false)),
            Err(e) => {
               for live in connections {
                  close_live(live).await;
               }
               return Err(e);
            }
         }
      }

      Ok((options, connections))
   }

   async fn connect_raw(&self, options: &D::Options) -> Result<D::Connection> {
      let timeout = self.config.connect_timeout;
      match tokio::time::timeout(timeout, self.driver.connect(options)).await {
         Ok(Ok(raw)) => Ok(raw),
         Ok(Err(e)) => Err(Error::Connection(e)),
         Err(_) => Err(Error::Connection(
            format!("connection attempt timed out after {timeout:?}").into(),
         )),
      }
   }

   /// Take an idle connection or open a new one. The caller holds a permit.
   async fn checkout(&self) -> Result<Live<D::Connection>> {
      loop {
         let (next, reservation) = {
            let mut shared = self.shared.lock();
            match shared.state {
               PoolState::Open => {}
               PoolState::Closed => return Err(Error::UseAfterClose(Resource::Pool)),
               PoolState::Uninitialized | PoolState::Opening => return Err(Error::NotInitialized),
            }

            let next = match shared.idle.pop_front() {
               Some(live) => Next::Idle(live),
               None => {
                  // The idle queue is empty, so every live baseline
                  // connection is checked out.
                  let baseline = shared.in_use - shared.overflow;
                  let overflow = baseline >= self.config.pool_size as usize;
                  match shared.options.clone() {
                     Some(options) => Next::Connect { options, overflow },
                     None => return Err(Error::NotInitialized),
                  }
               }
            };

            let overflow = matches!(next, Next::Connect { overflow: true, .. });
            shared.in_use += 1;
            if overflow {
               shared.overflow += 1;
            }
            self.publish(&shared);

            (next, Reservation { inner: self, overflow, armed: true })
         };

         let live = match next {
            Next::Idle(mut live) => {
               if self.config.test_before_acquire {
                  if let Err(error) = live.raw.ping().await {
                     // dropping the reservation gives the slot back
                     warn!(connection_id = live.id, %error, "Idle connection failed ping; discarding");
                     drop(reservation);
                     close_live(live).await;
                     continue;
                  }
               }
               live
            }
            Next::Connect { options, overflow } => {
               let raw = self.connect_raw(&options).await?;
               let live = Live::new(raw, overflow);
               debug!(connection_id = live.id, overflow, "Opened new connection");
               live
            }
         };

         // `close` may have run while this checkout was awaiting
         let still_open = self.shared.lock().state == PoolState::Open;
         if !still_open {
            drop(reservation);
            debug!(connection_id = live.id, "Pool closed during checkout; discarding connection");
            close_live(live).await;
            return Err(Error::UseAfterClose(Resource::Pool));
         }

         reservation.disarm();
         return Ok(live);
      }
   }

   /// Return a connection. Yields it back if it must be physically closed.
   fn release(&self, live: Live<D::Connection>, broken: bool) -> Option<Live<D::Connection>> {
      let mut shared = self.shared.lock();
      shared.in_use -= 1;
      if live.overflow {
         shared.overflow -= 1;
      }

      let retain = shared.state == PoolState::Open && !live.overflow && !broken;
      let to_close = if retain {
         trace!(connection_id = live.id, "Connection returned to idle queue");
         shared.idle.push_back(live);
         None
      } else {
         Some(live)
      };

      self.publish(&shared);
      to_close
   }

   fn publish(&self, shared: &Shared<D::Connection, D::Options>) {
      self.in_use_tx.send_replace(shared.in_use);
   }
}

async fn run_transaction<D, T, F>(session: &mut ScopedSession<D>, f: F) -> Result<T>
where
   D: Driver,
   F: for<'s> FnOnce(&'s mut ScopedSession<D>) -> BoxFuture<'s, Result<T>>,
{
   session.begin().await?;

   match f(session).await {
      Ok(value) => {
         session.commit().await?;
         Ok(value)
      }
      Err(e) => match session.rollback().await {
         // Rollback succeeded, return original error
         Ok(()) => Err(e),
         // Rollback also failed, return both
         Err(rollback_err) => Err(Error::RollbackFailed {
            error: e.to_string(),
            rollback_error: rollback_err.to_string(),
         }),
      },
   }
}

enum Next<C, O> {
   Idle(Live<C>),
   Connect { options: O, overflow: bool },
}

/// Holds an `in_use` slot while a checkout is in flight, so a cancelled
/// `acquire` gives it back.
struct Reservation<'a, D: Driver> {
   inner: &'a PoolInner<D>,
   overflow: bool,
   armed: bool,
}

impl<D: Driver> Reservation<'_, D> {
   fn disarm(mut self) {
      self.armed = false;
   }
}

impl<D: Driver> Drop for Reservation<'_, D> {
   fn drop(&mut self) {
      if !self.armed {
         return;
      }
      let mut shared = self.inner.shared.lock();
      shared.in_use -= 1;
      if self.overflow {
         shared.overflow -= 1;
      }
      self.inner.publish(&shared);
   }
}

/// Puts the pool back to `Uninitialized` if `open` fails or is cancelled.
struct OpeningGuard<'a, D: Driver> {
   inner: &'a PoolInner<D>,
   armed: bool,
}

impl<D: Driver> Drop for OpeningGuard<'_, D> {
   fn drop(&mut self) {
      if !self.armed {
         return;
      }
      let mut shared = self.inner.shared.lock();
      if shared.state == PoolState::Opening {
         shared.state = PoolState::Uninitialized;
      }
   }
}

/// A connection checked out to a session, together with its permit.
///
/// Dropping a `Checkout` that still holds its connection discards the
/// connection synchronously; [`return_to_pool`](Self::return_to_pool) is the
/// graceful path.
pub(crate) struct Checkout<D: Driver> {
   pool: Arc<PoolInner<D>>,
   live: Option<Live<D::Connection>>,
   permit: Option<OwnedSemaphorePermit>,
   /// Set when the connection can no longer be trusted
   pub(crate) broken: bool,
}

impl<D: Driver> Checkout<D> {
   pub(crate) fn conn(&mut self) -> Result<&mut D::Connection> {
      self
         .live
         .as_mut()
         .map(|live| &mut live.raw)
         .ok_or(Error::UseAfterClose(Resource::Session))
   }

   pub(crate) fn connection_id(&self) -> Option<u64> {
      self.live.as_ref().map(|live| live.id)
   }

   pub(crate) fn is_invalidated(&self) -> bool {
      self.pool.is_invalidated()
   }

   /// Roll back any open transaction, then hand the connection back.
   pub(crate) async fn return_to_pool(mut self) {
      let Some(live) = self.live.as_mut() else {
         return;
      };

      let healthy = !self.broken && reset(live).await;

      if let Some(live) = self.live.take() {
         let to_close = self.pool.release(live, !healthy);
         // wake the next waiter only once the connection is back
         self.permit.take();
         if let Some(live) = to_close {
            close_live(live).await;
         }
      }
   }
}

impl<D: Driver> Drop for Checkout<D> {
   fn drop(&mut self) {
      if let Some(live) = self.live.take() {
         debug!(connection_id = live.id, "Discarding connection without graceful release");
         // the connection itself is dropped here
         let _ = self.pool.release(live, true);
      }
   }
}

/// Roll back a transaction left open. Returns false if the connection should
/// not be reused.
async fn reset<C: DriverConnection>(live: &mut Live<C>) -> bool {
   let in_transaction = live.raw.in_transaction().await;
   match in_transaction {
      Ok(false) => true,
      Ok(true) => match live.raw.rollback().await {
         Ok(()) => {
            debug!(connection_id = live.id, "Rolled back uncommitted transaction on release");
            true
         }
         Err(error) => {
            warn!(connection_id = live.id, %error, "Rollback on release failed");
            false
         }
      },
      Err(error) => {
         warn!(connection_id = live.id, %error, "Could not determine transaction state");
         false
      }
   }
}

async fn close_live<C: DriverConnection>(live: Live<C>) {
   let id = live.id;
   let age = live.created_at.elapsed();
   match live.raw.close().await {
      Ok(()) => trace!(connection_id = id, age = ?age, "Closed connection"),
      Err(error) => warn!(connection_id = id, %error, "Error while closing connection"),
   }
}
