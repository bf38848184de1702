#![cfg(feature = "sqlite")]

use serde_json::{Value as JsonValue, json};
use sqlx_datasource::{
   Dao, DataSources, Error, Params, PoolConfig, PoolError, Row, SqliteDriver, SqliteSession,
   group_by,
};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
struct User {
   id: Option<i64>,
   name: String,
   team: String,
}

impl User {
   fn new(name: &str, team: &str) -> Self {
      Self {
         id: None,
         name: name.into(),
         team: team.into(),
      }
   }

   fn from_row(row: &Row) -> Result<Self, Error> {
      let column = |name: &str| {
         row.get(name)
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
      };

      Ok(Self {
         id: column("id")?.as_i64(),
         name: column("name")?.as_str().unwrap_or_default().to_string(),
         team: column("team")?.as_str().unwrap_or_default().to_string(),
      })
   }
}

#[derive(Default)]
struct UserFilter {
   id: Option<i64>,
   team: Option<String>,
}

impl UserFilter {
   fn params(&self) -> Params {
      let mut params = Params::new();
      params.insert("filter_id".into(), json!(self.id));
      params.insert("filter_team".into(), json!(self.team));
      params
   }
}

const WHERE_FILTER: &str = "(:filter_id IS NULL OR id = :filter_id) AND (:filter_team IS NULL OR team = :filter_team)";

struct UserDao;

impl Dao<SqliteDriver> for UserDao {
   type Record = User;
   type Filter = UserFilter;

   async fn select_one(&self, session: &mut SqliteSession, filter: &UserFilter) -> Result<User, Error> {
      let query = format!("SELECT id, name, team FROM users WHERE {WHERE_FILTER}");
      let row = session.select_one(&query, &filter.params()).await?;
      User::from_row(&row)
   }

   async fn select(&self, session: &mut SqliteSession, filter: &UserFilter) -> Result<Vec<User>, Error> {
      let query = format!("SELECT id, name, team FROM users WHERE {WHERE_FILTER} ORDER BY id");
      let rows = session.select_all(&query, &filter.params()).await?;
      rows.iter().map(User::from_row).collect()
   }

   async fn insert(&self, session: &mut SqliteSession, records: &[User]) -> Result<u64, Error> {
      let param_sets: Vec<Params> = records
         .iter()
         .map(|user| {
            let mut params = Params::new();
            params.insert("name".into(), json!(user.name));
            params.insert("team".into(), json!(user.team));
            params
         })
         .collect();

      let result = session
         .execute_many("INSERT INTO users (name, team) VALUES (:name, :team)", &param_sets)
         .await?;
      Ok(result.rows_affected)
   }

   async fn update(
      &self,
      session: &mut SqliteSession,
      filter: &UserFilter,
      record: &User,
   ) -> Result<u64, Error> {
      let mut params = filter.params();
      params.insert("name".into(), json!(record.name));
      params.insert("team".into(), json!(record.team));

      let query = format!("UPDATE users SET name = :name, team = :team WHERE {WHERE_FILTER}");
      Ok(session.execute(&query, &params).await?.rows_affected)
   }

   async fn delete(&self, session: &mut SqliteSession, filter: &UserFilter) -> Result<u64, Error> {
      let query = format!("DELETE FROM users WHERE {WHERE_FILTER}");
      Ok(session.execute(&query, &filter.params()).await?.rows_affected)
   }
}

async fn create_test_sources() -> (DataSources<SqliteDriver>, TempDir) {
   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let db_path = temp_dir.path().join("test.db");
   let config = PoolConfig::new(format!("sqlite://{}?mode=rwc", db_path.display())).with_pool_size(2);

   let sources = DataSources::new();
   sources.load("main", SqliteDriver, config).await.unwrap();

   let mut session = sources.acquire("main").await.unwrap();
   session
      .execute(
         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, team TEXT NOT NULL)",
         &Params::new(),
      )
      .await
      .unwrap();
   session.release().await;

   (sources, temp_dir)
}

#[tokio::test]
async fn test_dao_round_trip() {
   let (sources, _temp) = create_test_sources().await;
   let dao = UserDao;
   let mut session = sources.acquire("main").await.unwrap();

   let users = [
      User::new("alice", "red"),
      User::new("bob", "blue"),
      User::new("carol", "red"),
   ];
   assert_eq!(dao.insert(&mut session, &users).await.unwrap(), 3);

   let red = UserFilter {
      team: Some("red".into()),
      ..Default::default()
   };
   let names: Vec<_> = dao
      .select(&mut session, &red)
      .await
      .unwrap()
      .into_iter()
      .map(|user| user.name)
      .collect();
   assert_eq!(names, vec!["alice", "carol"]);

   let bob = dao
      .select_one(&mut session, &UserFilter { id: Some(2), team: None })
      .await
      .unwrap();
   assert_eq!(bob.name, "bob");

   let changed = dao
      .update(&mut session, &UserFilter { id: Some(2), team: None }, &User::new("bob", "red"))
      .await
      .unwrap();
   assert_eq!(changed, 1);

   assert_eq!(dao.delete(&mut session, &red).await.unwrap(), 3);
   assert!(dao.select(&mut session, &UserFilter::default()).await.unwrap().is_empty());

   session.release().await;
   sources.close_all().await;
}

#[tokio::test]
async fn test_dao_select_one_cardinality() {
   let (sources, _temp) = create_test_sources().await;
   let dao = UserDao;
   let mut session = sources.acquire("main").await.unwrap();

   let err = dao
      .select_one(&mut session, &UserFilter::default())
      .await
      .unwrap_err();
   assert!(matches!(err, Error::Pool(PoolError::Cardinality { rows: 0 })));
   assert_eq!(err.error_code(), "CARDINALITY_ERROR");

   session.release().await;
}

#[tokio::test]
async fn test_dao_calls_share_a_transaction() {
   let (sources, _temp) = create_test_sources().await;
   let dao = UserDao;
   let mut session = sources.acquire("main").await.unwrap();

   session.begin().await.unwrap();
   dao.insert(&mut session, &[User::new("dave", "green")])
      .await
      .unwrap();

   // names are unique, so the whole unit of work is undone
   let err = dao
      .insert(&mut session, &[User::new("dave", "blue")])
      .await
      .unwrap_err();
   assert_eq!(err.error_code(), "QUERY_ERROR");

   let everyone = dao.select(&mut session, &UserFilter::default()).await.unwrap();
   assert!(everyone.is_empty());

   session.release().await;
}

#[tokio::test]
async fn test_group_rows_by_team() {
   let (sources, _temp) = create_test_sources().await;
   let mut session = sources.acquire("main").await.unwrap();

   UserDao
      .insert(
         &mut session,
         &[
            User::new("alice", "red"),
            User::new("bob", "blue"),
            User::new("carol", "red"),
         ],
      )
      .await
      .unwrap();

   let rows = session
      .select_all("SELECT id, name, team FROM users ORDER BY id", &Params::new())
      .await
      .unwrap();
   let teams = group_by(rows, "team").unwrap();

   assert_eq!(teams.len(), 2);
   let red: Vec<&JsonValue> = teams["red"].iter().map(|row| &row["name"]).collect();
   assert_eq!(red, vec![&json!("alice"), &json!("carol")]);

   let rows = session
      .select_all("SELECT name FROM users", &Params::new())
      .await
      .unwrap();
   let err = group_by(rows, "team").unwrap_err();
   assert_eq!(err.error_code(), "MISSING_COLUMN");

   session.release().await;
}
