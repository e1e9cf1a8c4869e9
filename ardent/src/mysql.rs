//! MySQL and MariaDB adapter.
//!
//! Reads its connections from the `mysql` section of the configuration.
//! Generated keys are read back with `LAST_INSERT_ID()`.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Timelike};
use mysql::consts::ColumnType;
use mysql::prelude::Queryable;
use r2d2_mysql::MySqlConnectionManager;

use crate::adapter::{check_limit, Adapter, AllOptions, SaveMode};
use crate::config::{Config, ServerProfile};
use crate::error::Error;
use crate::query::Query;
use crate::record::Model;
use crate::registry::{ConnectionKey, Registry};
use crate::translate::sql::{self, SqlStatement, MYSQL};
use crate::value::{Document, Key, Value};

const BACKEND: &str = "mysql";

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

pub type Pool = r2d2::Pool<MySqlConnectionManager>;
pub type Connection = r2d2::PooledConnection<MySqlConnectionManager>;

#[derive(Clone)]
struct Database {
    pool: Pool,
    debug: bool,
}

/// An adapter over pooled MySQL connections.
#[derive(Clone)]
pub struct MysqlAdapter {
    config: Arc<Config>,
    databases: Arc<Registry<Database>>,
}

impl std::fmt::Debug for MysqlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MysqlAdapter")
            .field("environment", &self.config.environment())
            .field("connections", &self.databases.len())
            .finish()
    }
}

impl MysqlAdapter {
    pub fn new(config: Config) -> Self {
        MysqlAdapter {
            config: Arc::new(config),
            databases: Arc::new(Registry::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self, connection: &ConnectionKey) -> Result<Pool, Error> {
        self.database(connection).map(|database| database.pool)
    }

    /// A pooled connection, for statements outside the lifecycle.
    pub fn connection(&self, connection: &ConnectionKey) -> Result<Connection, Error> {
        self.pool(connection)?.get().map_err(Error::connect)
    }

    fn database(&self, connection: &ConnectionKey) -> Result<Database, Error> {
        let key = connection.resolve(self.config.environment());
        self.databases.get_or_connect(&key, |key| {
            let profile: ServerProfile = self.config.profile(BACKEND, key).map_err(|err| {
                tracing::error!(connection = %key.label(BACKEND), error = %err, "invalid configuration");
                Error::from(err)
            })?;
            connect(key, &profile)
        })
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

    /// Run a stored procedure, `CALL name(args..)`, returning its first
    /// result set.
    pub fn call_procedure(
        &self,
        connection: &ConnectionKey,
        procedure: &str,
        args: &[Value],
    ) -> Result<Vec<Document>, Error> {
        let statement = sql::call(&MYSQL, procedure, args)?;
        self.query(connection, procedure, &statement)
    }

    fn checkout(&self, connection: &ConnectionKey, target: &str, statement: &SqlStatement) -> Result<Connection, Error> {
        let database = self.database(connection)?;
        statement.trace(BACKEND, target, database.debug);
        database.pool.get().map_err(Error::connect)
    }

    fn query(&self, connection: &ConnectionKey, target: &str, statement: &SqlStatement) -> Result<Vec<Document>, Error> {
        let mut conn = self.checkout(connection, target, statement)?;
        let rows: Vec<mysql::Row> = conn
            .exec(statement.text.as_str(), params(statement))
            .map_err(Error::query)?;
        rows.iter().map(document_from_row).collect()
    }

    /// Run a statement, returning the affected row count and the last
    /// generated id.
    fn execute(&self, model: &Model, statement: &SqlStatement) -> Result<(u64, u64), Error> {
        let mut conn = self.checkout(&model.connection, &model.name, statement)?;
        conn.exec_drop(statement.text.as_str(), params(statement))
            .map_err(Error::query)?;
        Ok((conn.affected_rows(), conn.last_insert_id()))
    }
}

fn connect(key: &ConnectionKey, profile: &ServerProfile) -> Result<Database, Error> {
    let opts = mysql::OptsBuilder::new()
        .ip_or_hostname(Some(profile.server.as_str()))
        .tcp_port(profile.port.unwrap_or(3306))
        .db_name(Some(profile.dbname.as_str()))
        .user(Some(profile.username.as_str()).filter(|user| !user.is_empty()))
        .pass(Some(profile.password.as_str()).filter(|pass| !pass.is_empty()));

    let manager = MySqlConnectionManager::new(opts);
    let pool = r2d2::Pool::builder()
        .max_size(profile.max_open_connections.unwrap_or(10).max(1))
        .min_idle(profile.max_idle_connections)
        .build(manager)
        .map_err(|err| {
            tracing::error!(connection = %key.label(BACKEND), error = %err, "failed to connect");
            Error::connect(err)
        })?;

    tracing::info!(
        connection = %key.label(BACKEND),
        server = %profile.server,
        dbname = %profile.dbname,
        "connected"
    );
    Ok(Database {
        pool,
        debug: profile.debug,
    })
}

fn params(statement: &SqlStatement) -> mysql::Params {
    if statement.params.is_empty() {
        return mysql::Params::Empty;
    }
    mysql::Params::Positional(statement.params.iter().map(to_mysql).collect())
}

fn to_mysql(value: &Value) -> mysql::Value {
    match value {
        Value::Null => mysql::Value::NULL,
        Value::Bool(b) => mysql::Value::Int(i64::from(*b)),
        Value::Int(i) => mysql::Value::Int(*i),
        Value::Float(f) => mysql::Value::Double(*f),
        Value::Text(s) => mysql::Value::Bytes(s.clone().into_bytes()),
        Value::Timestamp(t) => mysql::Value::Date(
            t.year() as u16,
            t.month() as u8,
            t.day() as u8,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.timestamp_subsec_micros(),
        ),
        list @ Value::List(_) => mysql::Value::Bytes(list.to_json().to_string().into_bytes()),
    }
}

fn from_mysql(value: &mysql::Value, column_type: ColumnType) -> Result<Value, Error> {
    Ok(match value {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Int(i) => Value::Int(*i),
        mysql::Value::UInt(u) => Value::Int(i64::try_from(*u).map_err(Error::decode)?),
        mysql::Value::Float(f) => Value::Float(f64::from(*f)),
        mysql::Value::Double(f) => Value::Float(*f),
        mysql::Value::Bytes(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(Error::decode)?;
            match column_type {
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                    Value::Float(text.parse().map_err(Error::decode)?)
                }
                _ => Value::Text(text.to_string()),
            }
        }
        mysql::Value::Date(year, month, day, hour, minute, second, micros) => {
            let timestamp = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))
                .and_then(|date| {
                    date.and_hms_micro_opt(u32::from(*hour), u32::from(*minute), u32::from(*second), *micros)
                })
                .ok_or_else(|| Error::decode_str(format!("invalid date: {value:?}")))?;
            Value::Timestamp(timestamp.and_utc())
        }
        mysql::Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let hours = u32::from(*hours) + days * 24;
            Value::Text(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}"))
        }
    })
}

fn document_from_row(row: &mysql::Row) -> Result<Document, Error> {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let value = match row.as_ref(index) {
                Some(value) => from_mysql(value, column.column_type())?,
                None => Value::Null,
            };
            Ok((column.name_str().into_owned(), value))
        })
        .collect()
}

impl Adapter for MysqlAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn find(&self, model: &Model, key: &Key) -> Result<Document, Error> {
        let statement = sql::find(&MYSQL, &model.name, model.key_field, key);
        self.query(&model.connection, &model.name, &statement)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found_str("record not found"))
    }

    fn all(&self, model: &Model, options: &AllOptions) -> Result<Vec<Document>, Error> {
        let limit = check_limit(options, DEFAULT_LIMIT, MAX_LIMIT)?;
        let statement = sql::all(
            &MYSQL,
            &model.name,
            model.key_field,
            limit,
            options.after_key.as_ref(),
            options.start_key.as_ref(),
        );
        self.query(&model.connection, &model.name, &statement)
    }

    fn truncate(&self, model: &Model) -> Result<Option<u64>, Error> {
        self.execute(model, &sql::truncate(&MYSQL, &model.name))?;
        Ok(None)
    }

    fn db_save(&self, model: &Model, document: &Document, mode: SaveMode) -> Result<Option<Key>, Error> {
        let key = document.value(model.key_field).and_then(Key::from_value);

        match (mode, key) {
            (SaveMode::Insert, key) => {
                let statement = sql::insert(&MYSQL, &model.name, model.key_field, document);
                let (_, last_insert_id) = self.execute(model, &statement)?;
                if key.is_some() {
                    return Ok(None);
                }
                i64::try_from(last_insert_id)
                    .map(|id| Some(Key::Int(id)))
                    .map_err(Error::key)
            }
            (SaveMode::Update, Some(key)) => {
                let statement = sql::update(&MYSQL, &model.name, model.key_field, &key, document);
                match self.execute(model, &statement)? {
                    (0, _) => Err(Error::not_found_str("record not found")),
                    _ => Ok(None),
                }
            }
            (SaveMode::Update, None) => Err(Error::key_str("cannot update a record without a key")),
        }
    }

    fn db_delete(&self, model: &Model, key: &Key) -> Result<(), Error> {
        self.execute(model, &sql::delete(&MYSQL, &model.name, model.key_field, key))?;
        Ok(())
    }

    fn db_search(&self, model: &Model, query: &Query) -> Result<Vec<Document>, Error> {
        let statement = sql::select(&MYSQL, &model.name, query)?;
        self.query(&model.connection, &model.name, &statement)
    }
}
