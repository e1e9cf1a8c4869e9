//! PostgreSQL adapter.
//!
//! Reads its connections from the `postgresql` section of the
//! configuration.  Generated keys come back through `RETURNING`.

use std::sync::Arc;

use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::NoTls;
use r2d2_postgres::PostgresConnectionManager;

use crate::adapter::{check_limit, Adapter, AllOptions, SaveMode};
use crate::config::{Config, ServerProfile};
use crate::error::Error;
use crate::query::Query;
use crate::record::Model;
use crate::registry::{ConnectionKey, Registry};
use crate::translate::sql::{self, SqlStatement, POSTGRES};
use crate::value::{Document, Key, Value};

const BACKEND: &str = "postgresql";

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

pub type Pool = r2d2::Pool<PostgresConnectionManager<NoTls>>;
pub type Connection = r2d2::PooledConnection<PostgresConnectionManager<NoTls>>;

#[derive(Clone)]
struct Database {
    pool: Pool,
    debug: bool,
}

/// An adapter over pooled PostgreSQL connections.
#[derive(Clone)]
pub struct PostgresAdapter {
    config: Arc<Config>,
    databases: Arc<Registry<Database>>,
}

impl std::fmt::Debug for PostgresAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PostgresAdapter")
            .field("environment", &self.config.environment())
            .field("connections", &self.databases.len())
            .finish()
    }
}

impl PostgresAdapter {
    pub fn new(config: Config) -> Self {
        PostgresAdapter {
            config: Arc::new(config),
            databases: Arc::new(Registry::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The pool for a connection, established on first use.
    pub fn pool(&self, connection: &ConnectionKey) -> Result<Pool, Error> {
        self.database(connection).map(|database| database.pool)
    }

    /// A pooled client, for statements outside the lifecycle.
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

    /// Run a set-returning function, `SELECT * FROM name(args..)`.
    pub fn call_procedure(
        &self,
        connection: &ConnectionKey,
        procedure: &str,
        args: &[Value],
    ) -> Result<Vec<Document>, Error> {
        let statement = sql::call(&POSTGRES, procedure, args)?;
        self.query(connection, procedure, &statement)
    }

    fn run(&self, connection: &ConnectionKey, target: &str, statement: &SqlStatement) -> Result<Vec<postgres::Row>, Error> {
        let database = self.database(connection)?;
        statement.trace(BACKEND, target, database.debug);
        let mut client = database.pool.get().map_err(Error::connect)?;

        let params: Vec<Param> = statement.params.iter().map(Param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        client.query(statement.text.as_str(), &refs).map_err(Error::query)
    }

    fn execute(&self, model: &Model, statement: &SqlStatement) -> Result<u64, Error> {
        let database = self.database(&model.connection)?;
        statement.trace(BACKEND, &model.name, database.debug);
        let mut client = database.pool.get().map_err(Error::connect)?;

        let params: Vec<Param> = statement.params.iter().map(Param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        client.execute(statement.text.as_str(), &refs).map_err(Error::query)
    }

    fn query(&self, connection: &ConnectionKey, target: &str, statement: &SqlStatement) -> Result<Vec<Document>, Error> {
        self.run(connection, target, statement)?
            .iter()
            .map(document_from_row)
            .collect()
    }
}

fn connect(key: &ConnectionKey, profile: &ServerProfile) -> Result<Database, Error> {
    let mut config = postgres::Config::new();
    config
        .host(&profile.server)
        .port(profile.port.unwrap_or(5432))
        .dbname(&profile.dbname);
    if !profile.username.is_empty() {
        config.user(&profile.username);
    }
    if !profile.password.is_empty() {
        config.password(&profile.password);
    }

    let manager = PostgresConnectionManager::new(config, NoTls);
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

/// A document value bound to a statement parameter.
///
/// The column type picks the encoding.  A value with no encoding for the
/// column type is refused rather than sent in the wrong wire format.
#[derive(Debug)]
struct Param<'a>(&'a Value);

type BindError = Box<dyn std::error::Error + Sync + Send>;

fn is_text(ty: &Type) -> bool {
    <&str as ToSql>::accepts(ty)
}

fn is_json(ty: &Type) -> bool {
    *ty == Type::JSON || *ty == Type::JSONB
}

fn mismatch(value: &Value, ty: &Type) -> BindError {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Int(_) => "integer",
        Value::Float(_) => "float",
        Value::Text(_) => "text",
        Value::Timestamp(_) => "timestamp",
        Value::List(_) => "list",
    };
    format!("cannot bind {kind} to a {ty} column").into()
}

impl ToSql for Param<'_> {
    fn to_sql(&self, ty: &Type, out: &mut bytes::BytesMut) -> Result<IsNull, BindError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            _ if is_json(ty) => self.0.to_json().to_sql(ty, out),
            Value::Bool(b) if *ty == Type::BOOL => b.to_sql(ty, out),
            Value::Bool(b) if is_text(ty) => b.to_string().to_sql(ty, out),
            Value::Int(i) if *ty == Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
            Value::Int(i) if *ty == Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
            Value::Int(i) if *ty == Type::INT8 => i.to_sql(ty, out),
            Value::Int(i) if *ty == Type::FLOAT4 => (*i as f32).to_sql(ty, out),
            Value::Int(i) if *ty == Type::FLOAT8 => (*i as f64).to_sql(ty, out),
            Value::Int(i) if is_text(ty) => i.to_string().to_sql(ty, out),
            Value::Float(f) if *ty == Type::FLOAT4 => (*f as f32).to_sql(ty, out),
            Value::Float(f) if *ty == Type::FLOAT8 => f.to_sql(ty, out),
            Value::Float(f) if is_text(ty) => f.to_string().to_sql(ty, out),
            Value::Text(s) if *ty == Type::UUID => uuid::Uuid::parse_str(s)?.to_sql(ty, out),
            Value::Text(s) if is_text(ty) => s.to_sql(ty, out),
            Value::Timestamp(t) if *ty == Type::TIMESTAMPTZ => t.to_sql(ty, out),
            Value::Timestamp(t) if *ty == Type::TIMESTAMP => t.naive_utc().to_sql(ty, out),
            Value::Timestamp(t) if is_text(ty) => t.to_rfc3339().to_sql(ty, out),
            value => Err(mismatch(value, ty)),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn column_value(row: &postgres::Row, index: usize) -> Result<Value, Error> {
    let ty = row.columns()[index].type_();

    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index).map(|v| v.map(Value::Bool))
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index).map(|v| v.map(|i| Value::Int(i.into())))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index).map(|v| v.map(|i| Value::Int(i.into())))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index).map(|v| v.map(Value::Int))
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index).map(|v| v.map(|f| Value::Float(f.into())))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index).map(|v| v.map(Value::Float))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(index)
            .map(|v| v.map(Value::Timestamp))
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(index)
            .map(|v| v.map(|t| Value::Timestamp(t.and_utc())))
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<uuid::Uuid>>(index)
            .map(|v| v.map(|u| Value::Text(u.to_string())))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(index)
            .map(|v| v.map(|json| Value::from_json(&json)))
    } else {
        row.try_get::<_, Option<String>>(index).map(|v| v.map(Value::Text))
    };

    value
        .map(|value| value.unwrap_or(Value::Null))
        .map_err(Error::decode)
}

fn document_from_row(row: &postgres::Row) -> Result<Document, Error> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| Ok((column.name().to_string(), column_value(row, index)?)))
        .collect()
}

impl Adapter for PostgresAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn find(&self, model: &Model, key: &Key) -> Result<Document, Error> {
        let statement = sql::find(&POSTGRES, &model.name, model.key_field, key);
        self.query(&model.connection, &model.name, &statement)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found_str("record not found"))
    }

    fn all(&self, model: &Model, options: &AllOptions) -> Result<Vec<Document>, Error> {
        let limit = check_limit(options, DEFAULT_LIMIT, MAX_LIMIT)?;
        let statement = sql::all(
            &POSTGRES,
            &model.name,
            model.key_field,
            limit,
            options.after_key.as_ref(),
            options.start_key.as_ref(),
        );
        self.query(&model.connection, &model.name, &statement)
    }

    fn truncate(&self, model: &Model) -> Result<Option<u64>, Error> {
        self.execute(model, &sql::truncate(&POSTGRES, &model.name))?;
        Ok(None)
    }

    fn db_save(&self, model: &Model, document: &Document, mode: SaveMode) -> Result<Option<Key>, Error> {
        let key = document.value(model.key_field).and_then(Key::from_value);

        match (mode, key) {
            (SaveMode::Insert, key) => {
                let statement = sql::insert(&POSTGRES, &model.name, model.key_field, document);
                let rows = self.run(&model.connection, &model.name, &statement)?;
                if key.is_some() {
                    return Ok(None);
                }
                let returned = match rows.first() {
                    Some(row) => column_value(row, 0)?,
                    None => Value::Null,
                };
                Key::from_value(&returned)
                    .map(Some)
                    .ok_or_else(|| Error::key_str(format!("no key returned for {}", model.name)))
            }
            (SaveMode::Update, Some(key)) => {
                let statement = sql::update(&POSTGRES, &model.name, model.key_field, &key, document);
                match self.execute(model, &statement)? {
                    0 => Err(Error::not_found_str("record not found")),
                    _ => Ok(None),
                }
            }
            (SaveMode::Update, None) => Err(Error::key_str("cannot update a record without a key")),
        }
    }

    fn db_delete(&self, model: &Model, key: &Key) -> Result<(), Error> {
        self.execute(model, &sql::delete(&POSTGRES, &model.name, model.key_field, key))?;
        Ok(())
    }

    fn db_search(&self, model: &Model, query: &Query) -> Result<Vec<Document>, Error> {
        let statement = sql::select(&POSTGRES, &model.name, query)?;
        self.query(&model.connection, &model.name, &statement)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_profile_is_a_configuration_error() {
        let config = Config::from_json_str(r#"{ "environment": "test", "test": {} }"#).unwrap();
        let adapter = PostgresAdapter::new(config);
        let err = adapter.pool(&ConnectionKey::default()).unwrap_err();
        assert_eq!(crate::ErrorKind::Configuration, err.kind());
        assert!(err.to_string().contains("postgresql"));
    }

    #[test]
    fn blank_server_is_rejected() {
        let config = Config::from_json_str(
            r#"{ "environment": "test",
                 "test": { "postgresql": { "default": { "server": " ", "dbname": "garage" } } } }"#,
        )
        .unwrap();
        let adapter = PostgresAdapter::new(config);
        let err = adapter.pool(&ConnectionKey::default()).unwrap_err();
        assert_eq!(crate::ErrorKind::Configuration, err.kind());
        assert!(adapter.databases.is_empty());
    }

    fn bind(value: Value, ty: &Type) -> Result<bytes::BytesMut, BindError> {
        let mut out = bytes::BytesMut::new();
        Param(&value).to_sql(ty, &mut out)?;
        Ok(out)
    }

    #[test]
    fn params_follow_the_column_type() {
        assert_eq!(&2010i32.to_be_bytes()[..], &bind(Value::Int(2010), &Type::INT4).unwrap()[..]);
        assert_eq!(&2010i64.to_be_bytes()[..], &bind(Value::Int(2010), &Type::INT8).unwrap()[..]);
        assert_eq!(&2.5f64.to_be_bytes()[..], &bind(Value::Float(2.5), &Type::FLOAT8).unwrap()[..]);
        assert_eq!(b"2010", &bind(Value::Int(2010), &Type::TEXT).unwrap()[..]);

        let t = chrono::DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let text = bind(Value::Timestamp(t), &Type::VARCHAR).unwrap();
        assert_eq!(b"2024-01-02T03:04:05+00:00", &text[..]);

        assert!(bind(Value::Int(70000), &Type::INT2).is_err());
    }

    #[test]
    fn mismatched_params_are_refused() {
        let err = bind(Value::Int(1), &Type::NUMERIC).unwrap_err();
        assert_eq!("cannot bind integer to a numeric column", err.to_string());

        let err = bind(Value::Float(1.5), &Type::INT4).unwrap_err();
        assert_eq!("cannot bind float to a int4 column", err.to_string());

        assert!(bind(Value::Text("porsche".into()), &Type::INT8).is_err());
        assert!(bind(Value::Bool(true), &Type::TIMESTAMPTZ).is_err());
    }
}
