//! Configuration for connection pools

use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Configuration for a [`ConnectionPool`](crate::ConnectionPool)
///
/// The connection descriptor is opaque to the pool; it is handed to the
/// [`Driver`](crate::Driver) for parsing when the pool is opened.
///
/// # Examples
///
/// ```
/// use sqlx_session_pool::PoolConfig;
/// use std::time::Duration;
///
/// // Use defaults for everything but the target
/// let config = PoolConfig::new("sqlite://app.db");
///
/// // Customize specific fields
/// let config = PoolConfig {
///     pool_size: 2,
///     max_overflow: 3,
///     acquire_timeout: Duration::from_millis(100),
///     ..PoolConfig::new("sqlite://app.db")
/// };
///
/// // Or chain setters
/// let config = PoolConfig::new("sqlite://app.db")
///     .with_pool_size(2)
///     .with_max_overflow(3);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
   /// Driver-specific connection descriptor (URL, DSN, file path, ...)
   pub descriptor: String,

   /// Number of connections the pool keeps open once warmed up
   ///
   /// Must be at least 1. These connections are opened eagerly by
   /// [`ConnectionPool::open`](crate::ConnectionPool::open).
   ///
   /// Default: 5
   pub pool_size: u32,

   /// Additional connections allowed under burst load
   ///
   /// Overflow connections are closed as soon as they are released instead of
   /// being kept idle.
   ///
   /// Default: 0
   pub max_overflow: u32,

   /// How long `acquire` waits for capacity before failing with
   /// [`Error::PoolExhausted`]
   ///
   /// Zero means "never wait".
   ///
   /// Default: 30 seconds
   #[serde(rename = "acquire_timeout_ms", with = "duration_ms")]
   pub acquire_timeout: Duration,

   /// Upper bound for establishing one physical connection
   ///
   /// Default: 10 seconds
   #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
   pub connect_timeout: Duration,

   /// Grace period `close` grants to checked-out connections
   ///
   /// Connections still in use after this period are invalidated.
   ///
   /// Default: 5 seconds
   #[serde(rename = "drain_timeout_ms", with = "duration_ms")]
   pub drain_timeout: Duration,

   /// Ping idle connections before handing them out, replacing dead ones
   ///
   /// Default: false
   pub test_before_acquire: bool,

   /// Implicitly open a transaction on the first statement of a session
   ///
   /// When enabled, work done through a session must be committed explicitly;
   /// anything left uncommitted is rolled back on release.
   ///
   /// Default: false
   pub autobegin: bool,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         descriptor: String::new(),
         pool_size: 5,
         max_overflow: 0,
         acquire_timeout: Duration::from_secs(30),
         connect_timeout: Duration::from_secs(10),
         drain_timeout: Duration::from_secs(5),
         test_before_acquire: false,
         autobegin: false,
      }
   }
}

impl PoolConfig {
   /// Default configuration targeting `descriptor`
   pub fn new(descriptor: impl Into<String>) -> Self {
      Self {
         descriptor: descriptor.into(),
         ..Default::default()
      }
   }

   pub fn with_pool_size(mut self, pool_size: u32) -> Self {
      self.pool_size = pool_size;
      self
   }

   pub fn with_max_overflow(mut self, max_overflow: u32) -> Self {
      self.max_overflow = max_overflow;
      self
   }

   pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
      self.acquire_timeout = timeout;
      self
   }

   pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
      self.connect_timeout = timeout;
      self
   }

   pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
      self.drain_timeout = timeout;
      self
   }

   pub fn with_test_before_acquire(mut self, test: bool) -> Self {
      self.test_before_acquire = test;
      self
   }

   pub fn with_autobegin(mut self, autobegin: bool) -> Self {
      self.autobegin = autobegin;
      self
   }

   /// Upper bound on simultaneously live connections
   pub fn max_connections(&self) -> usize {
      self.pool_size as usize + self.max_overflow as usize
   }

   /// Check the numeric options and that a descriptor was given.
   ///
   /// Descriptor syntax is checked separately by the driver.
   pub fn validate(&self) -> Result<()> {
      if self.descriptor.trim().is_empty() {
         return Err(Error::Configuration(
            "connection descriptor must not be empty".into(),
         ));
      }

      if self.pool_size < 1 {
         return Err(Error::Configuration(format!(
            "pool_size must be at least 1, got {}",
            self.pool_size
         )));
      }

      // tokio's semaphore caps the number of permits
      if self.max_connections() > tokio::sync::Semaphore::MAX_PERMITS {
         return Err(Error::Configuration(format!(
            "pool_size + max_overflow must not exceed {}",
            tokio::sync::Semaphore::MAX_PERMITS
         )));
      }

      Ok(())
   }
}

mod duration_ms {
   use std::time::Duration;

   use serde::{Deserialize, Deserializer};

   pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
   where
      D: Deserializer<'de>,
   {
      u64::deserialize(deserializer).map(Duration::from_millis)
   }
}
