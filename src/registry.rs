//! Named data sources

use std::collections::HashMap;

use sqlx_session_pool::{ConnectionPool, Driver, PoolConfig, ScopedSession};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Pools managed by name.
///
/// This struct maintains a thread-safe map of data source names to their
/// connection pools. Several data sources, pointing at the same or different
/// targets, can be open at once.
pub struct DataSources<D: Driver> {
   pools: RwLock<HashMap<String, ConnectionPool<D>>>,
}

impl<D: Driver> Default for DataSources<D> {
   fn default() -> Self {
      Self {
         pools: RwLock::new(HashMap::new()),
      }
   }
}

impl<D: Driver> DataSources<D> {
   pub fn new() -> Self {
      Self::default()
   }

   /// Open a pool and register it under `name`.
   ///
   /// If an open pool is already registered under `name` it is returned and
   /// `config` is ignored. A closed one is replaced.
   pub async fn load(
      &self,
      name: impl Into<String>,
      driver: D,
      config: PoolConfig,
   ) -> Result<ConnectionPool<D>> {
      let name = name.into();

      {
         let pools = self.pools.read().await;
         if let Some(pool) = pools.get(&name).filter(|pool| !pool.is_closed()) {
            return Ok(pool.clone());
         }
      }

      let pool = ConnectionPool::connect(driver, config).await?;

      let mut pools = self.pools.write().await;
      if let Some(existing) = pools.get(&name).filter(|existing| !existing.is_closed()) {
         // someone else loaded it while we were connecting
         let existing = existing.clone();
         drop(pools);
         pool.close().await;
         return Ok(existing);
      }

      debug!(data_source = %name, "Loaded data source");
      pools.insert(name, pool.clone());
      Ok(pool)
   }

   /// Open every configured data source, stopping at the first failure.
   ///
   /// Data sources opened before the failure stay registered.
   pub async fn load_all<I>(&self, driver: D, configs: I) -> Result<()>
   where
      D: Clone,
      I: IntoIterator<Item = (String, PoolConfig)>,
   {
      for (name, config) in configs {
         self.load(name, driver.clone(), config).await?;
      }
      Ok(())
   }

   pub async fn get(&self, name: &str) -> Result<ConnectionPool<D>> {
      self
         .pools
         .read()
         .await
         .get(name)
         .cloned()
         .ok_or_else(|| Error::UnknownDataSource(name.to_string()))
   }

   /// Acquire a session from the named data source, with its configured
   /// timeout.
   pub async fn acquire(&self, name: &str) -> Result<ScopedSession<D>> {
      let pool = self.get(name).await?;
      Ok(pool.acquire(None).await?)
   }

   /// Close the named data source and forget it.
   pub async fn close(&self, name: &str) -> Result<()> {
      let pool = self
         .pools
         .write()
         .await
         .remove(name)
         .ok_or_else(|| Error::UnknownDataSource(name.to_string()))?;

      pool.close().await;
      debug!(data_source = %name, "Closed data source");
      Ok(())
   }

   /// Close every data source. Returns the names that were closed.
   pub async fn close_all(&self) -> Vec<String> {
      let pools: Vec<_> = self.pools.write().await.drain().collect();

      let mut closed = Vec::with_capacity(pools.len());
      for (name, pool) in pools {
         if pool.in_use_count() > 0 {
            warn!(data_source = %name, in_use = pool.in_use_count(), "Closing data source with sessions still open");
         }
         pool.close().await;
         closed.push(name);
      }

      closed.sort();
      closed
   }

   /// Registered names, sorted.
   pub async fn names(&self) -> Vec<String> {
      let mut names: Vec<_> = self.pools.read().await.keys().cloned().collect();
      names.sort();
      names
   }
}
