//! Data access objects and row grouping

use std::future::Future;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx_session_pool::{Driver, Row, ScopedSession};

use crate::{Error, Result};

/// Data access for one kind of record.
///
/// Every operation runs on a session the caller already holds, so several DAO
/// calls can share one transaction:
///
/// ```ignore
/// pool.transaction(|session| Box::pin(async move {
///    let user = users.select_one(session, &UserFilter::by_id(7)).await?;
///    audit.insert(session, &[AuditEntry::viewed(&user)]).await?;
///    Ok(user)
/// }))
/// .await?;
/// ```
pub trait Dao<D: Driver>: Send + Sync {
   /// Record type read and written by this DAO
   type Record: Send + Sync;

   /// Selection criteria for reads, updates and deletes
   type Filter: Send + Sync;

   /// Fetch the single record matching `filter`.
   fn select_one(
      &self,
      session: &mut ScopedSession<D>,
      filter: &Self::Filter,
   ) -> impl Future<Output = Result<Self::Record>> + Send;

   /// Fetch every record matching `filter`.
   fn select(
      &self,
      session: &mut ScopedSession<D>,
      filter: &Self::Filter,
   ) -> impl Future<Output = Result<Vec<Self::Record>>> + Send;

   /// Insert `records`, returning the number of rows written.
   fn insert(
      &self,
      session: &mut ScopedSession<D>,
      records: &[Self::Record],
   ) -> impl Future<Output = Result<u64>> + Send;

   /// Apply `record` to the rows matching `filter`, returning the number of
   /// rows changed.
   fn update(
      &self,
      session: &mut ScopedSession<D>,
      filter: &Self::Filter,
      record: &Self::Record,
   ) -> impl Future<Output = Result<u64>> + Send;

   /// Delete the rows matching `filter`, returning the number of rows removed.
   fn delete(
      &self,
      session: &mut ScopedSession<D>,
      filter: &Self::Filter,
   ) -> impl Future<Output = Result<u64>> + Send;
}

/// Group rows by the value of `key_column`, keeping first-seen key order and
/// row order within each group.
///
/// String values are used as-is for the key; any other value uses its JSON
/// text, so `1` and `"1"` land in the same group and `null` groups under
/// `"null"`.
pub fn group_by(rows: Vec<Row>, key_column: &str) -> Result<IndexMap<String, Vec<Row>>> {
   let mut groups: IndexMap<String, Vec<Row>> = IndexMap::new();

   for row in rows {
      let key = match row.get(key_column) {
         Some(JsonValue::String(value)) => value.clone(),
         Some(value) => value.to_string(),
         None => return Err(Error::MissingColumn(key_column.to_string())),
      };
      groups.entry(key).or_default().push(row);
   }

   Ok(groups)
}
