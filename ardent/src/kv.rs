//! Adapter for key-value buckets.
//!
//! Documents are stored as JSON under `{model}:{key}`.  A bucket can only
//! be read by key: listing, truncating and querying all need a view
//! defined on the server, so they are reported as unsupported.

use std::sync::Arc;

use crate::adapter::{Adapter, AllOptions, SaveMode};
use crate::config::{Config, KvProfile};
use crate::error::Error;
use crate::query::Query;
use crate::record::Model;
use crate::registry::{ConnectionKey, Registry};
use crate::value::{Document, Key};

const BACKEND: &str = "kv";

/// The operations the adapter needs from a bucket.
pub trait KvClient: Send + Sync {
    /// Store a value unless the key is taken.  Returns whether it was
    /// stored.
    fn add(&self, key: &str, value: &serde_json::Value) -> Result<bool, Error>;

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), Error>;

    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, Error>;

    fn delete(&self, key: &str) -> Result<(), Error>;
}

type Connector<C> = dyn Fn(&ConnectionKey, &KvProfile) -> Result<C, Error> + Send + Sync;

/// An adapter over bucket clients.
pub struct KvAdapter<C> {
    config: Arc<Config>,
    connector: Arc<Connector<C>>,
    buckets: Arc<Registry<Arc<C>>>,
}

impl<C> Clone for KvAdapter<C> {
    fn clone(&self) -> Self {
        KvAdapter {
            config: self.config.clone(),
            connector: self.connector.clone(),
            buckets: self.buckets.clone(),
        }
    }
}

impl<C> std::fmt::Debug for KvAdapter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("KvAdapter")
            .field("environment", &self.config.environment())
            .field("connections", &self.buckets.len())
            .finish()
    }
}

impl<C: KvClient> KvAdapter<C> {
    pub fn new<F>(config: Config, connector: F) -> Self
    where
        F: Fn(&ConnectionKey, &KvProfile) -> Result<C, Error> + Send + Sync + 'static,
    {
        KvAdapter {
            config: Arc::new(config),
            connector: Arc::new(connector),
            buckets: Arc::new(Registry::new()),
        }
    }

    /// The bucket for a connection, opened on first use.
    pub fn bucket(&self, connection: &ConnectionKey) -> Result<Arc<C>, Error> {
        let key = connection.resolve(self.config.environment());
        self.buckets.get_or_connect(&key, |key| {
            let profile: KvProfile = self.config.profile(BACKEND, key).map_err(|err| {
                tracing::error!(connection = %key.label(BACKEND), error = %err, "invalid configuration");
                Error::from(err)
            })?;
            let bucket = (self.connector)(key, &profile).map_err(|err| {
                tracing::error!(
                    connection = %key.label(BACKEND),
                    cluster = %profile.cluster_address,
                    error = %err,
                    "failed to open bucket"
                );
                err
            })?;
            tracing::info!(
                connection = %key.label(BACKEND),
                bucket = %profile.bucket_name,
                "opened bucket"
            );
            Ok(Arc::new(bucket))
        })
    }
}

fn storage_key(model: &Model, key: &Key) -> String {
    format!("{}:{key}", model.name)
}

impl<C: KvClient> Adapter for KvAdapter<C> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn find(&self, model: &Model, key: &Key) -> Result<Document, Error> {
        let bucket = self.bucket(&model.connection)?;
        match bucket.get(&storage_key(model, key))? {
            Some(value) => {
                let mut document = Document::from_json(&value)?;
                document.insert(model.key_field, key.to_value());
                Ok(document)
            }
            None => Err(Error::not_found_str("record not found")),
        }
    }

    fn all(&self, _model: &Model, _options: &AllOptions) -> Result<Vec<Document>, Error> {
        Err(Error::unsupported_str(
            "All method not supported by key-value stores. Create a view instead.",
        ))
    }

    fn truncate(&self, _model: &Model) -> Result<Option<u64>, Error> {
        Err(Error::unsupported_str(
            "Truncate method not supported by key-value stores. Flush the bucket instead.",
        ))
    }

    fn db_save(&self, model: &Model, document: &Document, mode: SaveMode) -> Result<Option<Key>, Error> {
        let key = document
            .value(model.key_field)
            .and_then(Key::from_value)
            .ok_or_else(|| Error::key_str("key-value stores need a key to save a record"))?;
        let storage_key = storage_key(model, &key);
        let value = document.to_json();
        tracing::debug!(backend = BACKEND, model = %model.name, key = %storage_key, ?mode, "saving");

        let bucket = self.bucket(&model.connection)?;
        match mode {
            SaveMode::Insert => {
                if !bucket.add(&storage_key, &value)? {
                    return Err(Error::conflict_str("Insert Failed: key already exists"));
                }
            }
            SaveMode::Update => bucket.set(&storage_key, &value)?,
        }
        Ok(None)
    }

    fn db_delete(&self, model: &Model, key: &Key) -> Result<(), Error> {
        self.bucket(&model.connection)?.delete(&storage_key(model, key))
    }

    fn db_search(&self, _model: &Model, _query: &Query) -> Result<Vec<Document>, Error> {
        Err(Error::unsupported_str(
            "Search method not supported by key-value stores. Create a view instead.",
        ))
    }
}
