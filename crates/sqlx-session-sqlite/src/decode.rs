//! Conversions between JSON values and SQLite values

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value as JsonValue;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow, SqliteValueRef};
use sqlx::{Column, Decode, Row as _, Sqlite, TypeInfo, ValueRef};
use sqlx_session_pool::{BoxDynError, Row};

use crate::Error;

/// Bind one JSON value to the next placeholder.
pub(crate) fn bind_value<'q>(
   query: Query<'q, Sqlite, SqliteArguments<'q>>,
   value: &JsonValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
   match value {
      JsonValue::Null => query.bind(None::<String>),
      JsonValue::Bool(flag) => query.bind(i64::from(*flag)),
      JsonValue::String(text) => query.bind(text.clone()),
      JsonValue::Number(number) => {
         // Preserve integer precision by binding as i64 when possible
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Past i64::MAX only a lossy REAL fits
            match i64::try_from(uint_val) {
               Ok(int_val) => query.bind(int_val),
               Err(_) => query.bind(uint_val as f64),
            }
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      // arrays and objects are stored as JSON text
      JsonValue::Array(_) | JsonValue::Object(_) => query.bind(value.to_string()),
   }
}

pub(crate) fn decode_rows(rows: Vec<SqliteRow>) -> Result<Vec<Row>, BoxDynError> {
   let mut values = Vec::with_capacity(rows.len());
   for row in rows {
      let mut value = Row::default();
      for (i, column) in row.columns().iter().enumerate() {
         let v = row.try_get_raw(i)?;
         let v = to_json(v)?;
         value.insert(column.name().to_string(), v);
      }
      values.push(value);
   }
   Ok(values)
}

/// Decode by the storage class of the value itself, not the declared column
/// type.
pub(crate) fn to_json(value: SqliteValueRef<'_>) -> Result<JsonValue, BoxDynError> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_info = value.type_info().into_owned();
   let json = match type_info.name() {
      "INTEGER" => JsonValue::from(<i64 as Decode<'_, Sqlite>>::decode(value)?),
      // non-finite floats become null
      "REAL" => JsonValue::from(<f64 as Decode<'_, Sqlite>>::decode(value)?),
      "TEXT" => JsonValue::String(<String as Decode<'_, Sqlite>>::decode(value)?),
      "BLOB" => {
         let bytes = <Vec<u8> as Decode<'_, Sqlite>>::decode(value)?;
         JsonValue::String(STANDARD.encode(bytes))
      }
      other => return Err(Error::UnsupportedDatatype(other.to_string()).into()),
   };

   Ok(json)
}
