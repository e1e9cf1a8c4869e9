//! SQLite adapter.
//!
//! Connections are pooled with r2d2.  Each configured connection gets
//! its own pool, opened on first use from the `sqlite` profile:
//!
//! ```json
//! { "environment": "dev", "dev": { "sqlite": { "default": { "path": "garage.db" } } } }
//! ```

use std::sync::Arc;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{ToSqlOutput, ValueRef};

use crate::adapter::{check_limit, Adapter, AllOptions, SaveMode};
use crate::config::{Config, SqliteProfile};
use crate::error::Error;
use crate::query::Query;
use crate::record::Model;
use crate::registry::{ConnectionKey, Registry};
use crate::translate::sql::{self, SqlStatement, SQLITE};
use crate::value::{Document, Key, Value};

const BACKEND: &str = "sqlite";

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

pub type Pool = r2d2::Pool<SqliteConnectionManager>;
pub type Connection = r2d2::PooledConnection<SqliteConnectionManager>;

#[derive(Clone)]
struct Database {
    pool: Pool,
    debug: bool,
}

/// An adapter over pooled SQLite connections.
///
/// Clones share their pools.
#[derive(Clone)]
pub struct SqliteAdapter {
    config: Arc<Config>,
    databases: Arc<Registry<Database>>,
}

impl std::fmt::Debug for SqliteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SqliteAdapter")
            .field("environment", &self.config.environment())
            .field("connections", &self.databases.len())
            .finish()
    }
}

impl SqliteAdapter {
    pub fn new(config: Config) -> Self {
        SqliteAdapter {
            config: Arc::new(config),
            databases: Arc::new(Registry::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The pool for a connection, opened on first use.
    pub fn pool(&self, connection: &ConnectionKey) -> Result<Pool, Error> {
        self.database(connection).map(|database| database.pool)
    }

    fn database(&self, connection: &ConnectionKey) -> Result<Database, Error> {
        let key = connection.resolve(self.config.environment());
        self.databases.get_or_connect(&key, |key| {
            let profile: SqliteProfile = self.config.profile(BACKEND, key).map_err(|err| {
                tracing::error!(connection = %key.label(BACKEND), error = %err, "invalid configuration");
                Error::from(err)
            })?;
            open(key, &profile)
        })
    }

    /// A pooled connection, for statements outside the lifecycle such as
    /// schema setup.
    pub fn connection(&self, connection: &ConnectionKey) -> Result<Connection, Error> {
        self.pool(connection)?.get().map_err(Error::connect)
    }

    /// Run caller-written SQL on a connection, returning its rows.
    pub fn query_documents(
        &self,
        connection: &ConnectionKey,
        text: &str,
        params: &[Value],
    ) -> Result<Vec<Document>, Error> {
        self.query(connection, "sql", &sql::raw(text, params))
    }

    /// Run a stored procedure.  SQLite has none, so this always fails
    /// with [`ErrorKind::Unsupported`](crate::ErrorKind::Unsupported).
    pub fn call_procedure(
        &self,
        connection: &ConnectionKey,
        procedure: &str,
        args: &[Value],
    ) -> Result<Vec<Document>, Error> {
        let statement = sql::call(&SQLITE, procedure, args)?;
        self.query(connection, procedure, &statement)
    }

    fn checkout(&self, connection: &ConnectionKey) -> Result<(Connection, bool), Error> {
        let database = self.database(connection)?;
        let conn = database.pool.get().map_err(Error::connect)?;
        Ok((conn, database.debug))
    }

    fn query(&self, connection: &ConnectionKey, target: &str, statement: &SqlStatement) -> Result<Vec<Document>, Error> {
        let (conn, verbose) = self.checkout(connection)?;
        statement.trace(BACKEND, target, verbose);
        let mut prepared = conn.prepare_cached(&statement.text).map_err(Error::query)?;
        let names: Vec<String> = prepared.column_names().into_iter().map(String::from).collect();

        let mut rows = prepared
            .query(rusqlite::params_from_iter(statement.params.iter().map(Param)))
            .map_err(Error::query)?;

        let mut documents = vec![];
        while let Some(row) = rows.next().map_err(Error::query)? {
            documents.push(document_from_row(&names, row)?);
        }
        Ok(documents)
    }

    fn execute(&self, (conn, verbose): &(Connection, bool), model: &Model, statement: &SqlStatement) -> Result<u64, Error> {
        statement.trace(BACKEND, &model.name, *verbose);
        let mut prepared = conn.prepare_cached(&statement.text).map_err(Error::query)?;
        let rows_affected = prepared
            .execute(rusqlite::params_from_iter(statement.params.iter().map(Param)))
            .map_err(Error::query)?;
        Ok(rows_affected.try_into().unwrap_or_default())
    }
}

fn open(key: &ConnectionKey, profile: &SqliteProfile) -> Result<Database, Error> {
    let (manager, max_size) = if profile.path == ":memory:" {
        (SqliteConnectionManager::memory(), 1)
    } else {
        (
            SqliteConnectionManager::file(&profile.path),
            profile.max_open_connections.unwrap_or(4).max(1),
        )
    };

    let pool = r2d2::Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|err| {
            tracing::error!(connection = %key.label(BACKEND), error = %err, "failed to open database");
            Error::connect(err)
        })?;
    tracing::info!(connection = %key.label(BACKEND), path = %profile.path, "opened database");
    Ok(Database {
        pool,
        debug: profile.debug,
    })
}

/// Read back the key of the row just inserted.  An `INTEGER PRIMARY KEY`
/// is the rowid itself; any other key column is whatever the table's
/// default produced.
fn generated_key(conn: &rusqlite::Connection, model: &Model) -> Result<Key, Error> {
    let rowid = conn.last_insert_rowid();
    let text = format!(
        "SELECT {} FROM {} WHERE rowid = ?1",
        SQLITE.quote_ident(model.key_field),
        SQLITE.quote_ident(&model.name)
    );
    let key = conn
        .query_row(&text, [rowid], |row| {
            Ok(match row.get_ref(0)? {
                ValueRef::Integer(i) => Some(Key::Int(i)),
                ValueRef::Text(bytes) => Some(Key::Text(String::from_utf8_lossy(bytes).into_owned())),
                _ => None,
            })
        })
        .map_err(Error::query)?;
    key.ok_or_else(|| Error::key_str(format!("no key generated for {}", model.name)))
}

struct Param<'a>(&'a Value);

impl rusqlite::ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Sql;

        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(Sql::Null),
            Value::Bool(b) => ToSqlOutput::Owned(Sql::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(Sql::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(Sql::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Timestamp(t) => ToSqlOutput::Owned(Sql::Text(t.to_rfc3339())),
            list @ Value::List(_) => ToSqlOutput::Owned(Sql::Text(list.to_json().to_string())),
        })
    }
}

fn document_from_row(names: &[String], row: &rusqlite::Row) -> Result<Document, Error> {
    names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let value = match row.get_ref(index).map_err(Error::decode)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(i) => Value::Int(i),
                ValueRef::Real(f) => Value::Float(f),
                ValueRef::Text(bytes) => Value::Text(
                    std::str::from_utf8(bytes)
                        .map_err(Error::decode)?
                        .to_string(),
                ),
                ValueRef::Blob(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
            };
            Ok((name.clone(), value))
        })
        .collect()
}

impl Adapter for SqliteAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn find(&self, model: &Model, key: &Key) -> Result<Document, Error> {
        let statement = sql::find(&SQLITE, &model.name, model.key_field, key);
        self.query(&model.connection, &model.name, &statement)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found_str("record not found"))
    }

    fn all(&self, model: &Model, options: &AllOptions) -> Result<Vec<Document>, Error> {
        let limit = check_limit(options, DEFAULT_LIMIT, MAX_LIMIT)?;
        let statement = sql::all(
            &SQLITE,
            &model.name,
            model.key_field,
            limit,
            options.after_key.as_ref(),
            options.start_key.as_ref(),
        );
        self.query(&model.connection, &model.name, &statement)
    }

    fn truncate(&self, model: &Model) -> Result<Option<u64>, Error> {
        let conn = self.checkout(&model.connection)?;
        let deleted = self.execute(&conn, model, &sql::truncate(&SQLITE, &model.name))?;
        Ok(Some(deleted))
    }

    fn db_save(&self, model: &Model, document: &Document, mode: SaveMode) -> Result<Option<Key>, Error> {
        let key = document.value(model.key_field).and_then(Key::from_value);
        let conn = self.checkout(&model.connection)?;

        match (mode, key) {
            (SaveMode::Insert, key) => {
                let statement = sql::insert(&SQLITE, &model.name, model.key_field, document);
                self.execute(&conn, model, &statement)?;
                match key {
                    Some(_) => Ok(None),
                    None => generated_key(&conn.0, model).map(Some),
                }
            }
            (SaveMode::Update, Some(key)) => {
                let statement = sql::update(&SQLITE, &model.name, model.key_field, &key, document);
                match self.execute(&conn, model, &statement)? {
                    0 => Err(Error::not_found_str("record not found")),
                    _ => Ok(None),
                }
            }
            (SaveMode::Update, None) => Err(Error::key_str("cannot update a record without a key")),
        }
    }

    fn db_delete(&self, model: &Model, key: &Key) -> Result<(), Error> {
        let conn = self.checkout(&model.connection)?;
        self.execute(&conn, model, &sql::delete(&SQLITE, &model.name, model.key_field, key))?;
        Ok(())
    }

    fn db_search(&self, model: &Model, query: &Query) -> Result<Vec<Document>, Error> {
        let statement = sql::select(&SQLITE, &model.name, query)?;
        self.query(&model.connection, &model.name, &statement)
    }
}
