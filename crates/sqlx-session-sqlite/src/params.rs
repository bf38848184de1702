//! Named `:name` placeholders rewritten to SQLite's numbered `?N` form

use serde_json::Value as JsonValue;
use sqlx_session_pool::Params;

use crate::Error;

/// A statement with its named placeholders replaced by `?1`, `?2`, ...
///
/// A name starts with a letter or `_` and continues with letters, digits or
/// `_`; letters outside ASCII count. `:1` and a lone `:` are left as written.
///
/// `names[i]` is the parameter bound to `?{i + 1}`. A name used more than once
/// reuses its number.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct NamedQuery {
   pub(crate) sql: String,
   pub(crate) names: Vec<String>,
}

impl NamedQuery {
   pub(crate) fn parse(query: &str) -> Self {
      let mut sql = String::with_capacity(query.len());
      let mut names: Vec<String> = Vec::new();
      let mut chars = query.chars().peekable();

      while let Some(c) = chars.next() {
         match c {
            '\'' | '"' | '`' => {
               sql.push(c);
               copy_through(&mut chars, &mut sql, c);
            }
            '[' => {
               sql.push(c);
               copy_through(&mut chars, &mut sql, ']');
            }
            '-' if chars.peek() == Some(&'-') => {
               sql.push(c);
               copy_through(&mut chars, &mut sql, '\n');
            }
            '/' if chars.peek() == Some(&'*') => {
               sql.push(c);
               sql.extend(chars.next());

               let mut prev = '\0';
               for c in chars.by_ref() {
                  sql.push(c);
                  if prev == '*' && c == '/' {
                     break;
                  }
                  prev = c;
               }
            }
            // `::` is never a placeholder
            ':' if chars.peek() == Some(&':') => {
               sql.push_str("::");
               chars.next();
            }
            ':' if chars.peek().is_some_and(|c| c.is_alphabetic() || *c == '_') => {
               let mut name = String::new();
               while let Some(&c) = chars.peek() {
                  if !(c.is_alphanumeric() || c == '_') {
                     break;
                  }
                  name.push(c);
                  chars.next();
               }

               let number = match names.iter().position(|n| *n == name) {
                  Some(index) => index + 1,
                  None => {
                     names.push(name);
                     names.len()
                  }
               };
               sql.push('?');
               sql.push_str(&number.to_string());
            }
            _ => sql.push(c),
         }
      }

      Self { sql, names }
   }

   /// Values in placeholder order.
   pub(crate) fn values<'p>(&self, params: &'p Params) -> Result<Vec<&'p JsonValue>, Error> {
      self
         .names
         .iter()
         .map(|name| {
            params
               .get(name)
               .ok_or_else(|| Error::MissingParameter(name.clone()))
         })
         .collect()
   }
}

/// Copy characters up to and including `end`.
fn copy_through(chars: &mut impl Iterator<Item = char>, sql: &mut String, end: char) {
   for c in chars {
      sql.push(c);
      if c == end {
         break;
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   fn parse(query: &str) -> (String, Vec<String>) {
      let named = NamedQuery::parse(query);
      (named.sql, named.names)
   }

   #[test]
   fn test_rewrites_named_placeholders_in_order() {
      let (sql, names) = parse("SELECT * FROM users WHERE id = :id AND org = :org_id");
      assert_eq!(sql, "SELECT * FROM users WHERE id = ?1 AND org = ?2");
      assert_eq!(names, vec!["id", "org_id"]);
   }

   #[test]
   fn test_repeated_name_reuses_number() {
      let (sql, names) = parse("UPDATE t SET a = :v, b = :w WHERE c = :v");
      assert_eq!(sql, "UPDATE t SET a = ?1, b = ?2 WHERE c = ?1");
      assert_eq!(names, vec!["v", "w"]);
   }

   #[test]
   fn test_ignores_literals_identifiers_and_comments() {
      let query = "SELECT ':a', \"b:c\", `d:e`, [f:g] -- :h\nFROM t /* :i */ WHERE x = :x";
      let (sql, names) = parse(query);
      assert_eq!(
         sql,
         "SELECT ':a', \"b:c\", `d:e`, [f:g] -- :h\nFROM t /* :i */ WHERE x = ?1"
      );
      assert_eq!(names, vec!["x"]);
   }

   #[test]
   fn test_escaped_quote_stays_inside_literal() {
      let (sql, names) = parse("SELECT 'it''s :not' WHERE a = :a");
      assert_eq!(sql, "SELECT 'it''s :not' WHERE a = ?1");
      assert_eq!(names, vec!["a"]);
   }

   #[test]
   fn test_double_colon_and_bare_colon_untouched() {
      let (sql, names) = parse("SELECT a::text, ':' || b, c :1 FROM t");
      assert_eq!(sql, "SELECT a::text, ':' || b, c :1 FROM t");
      assert!(names.is_empty());
   }

   #[test]
   fn test_non_ascii_names_are_rewritten() {
      let (sql, names) = parse("SELECT * FROM t WHERE nom = :prénom AND ville = :città");
      assert_eq!(sql, "SELECT * FROM t WHERE nom = ?1 AND ville = ?2");
      assert_eq!(names, vec!["prénom", "città"]);

      let (sql, names) = parse("SELECT :ünits");
      assert_eq!(sql, "SELECT ?1");
      assert_eq!(names, vec!["ünits"]);
   }

   #[test]
   fn test_positional_query_untouched() {
      let (sql, names) = parse("INSERT INTO t VALUES (?, ?)");
      assert_eq!(sql, "INSERT INTO t VALUES (?, ?)");
      assert!(names.is_empty());
   }

   #[test]
   fn test_values_follow_placeholder_order() {
      let named = NamedQuery::parse("SELECT :b, :a, :b");
      let mut params = Params::new();
      params.insert("a".into(), json!(1));
      params.insert("b".into(), json!("two"));
      params.insert("unused".into(), json!(null));

      let values = named.values(&params).unwrap();
      assert_eq!(values, vec![&json!("two"), &json!(1)]);
   }

   #[test]
   fn test_missing_parameter_names_it() {
      let named = NamedQuery::parse("SELECT * FROM t WHERE id = :user_id");
      let err = named.values(&Params::new()).unwrap_err();

      assert_eq!(err.error_code(), "MISSING_PARAMETER");
      assert!(err.to_string().contains(":user_id"));
   }
}
