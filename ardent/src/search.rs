//! Adapter for hosted search services.
//!
//! Collections hold JSON values under string keys and are queried with
//! Lucene query strings.  The service itself is reached through a
//! [`SearchClient`], created per configured connection by a connector
//! function fed with the connection's [`SearchProfile`].
//!
//! Aggregations and distinct are not supported.  `NE` and `IN`
//! conditions cannot be expressed and fail before any request is made.

use std::sync::Arc;

use crate::adapter::{check_limit, Adapter, AllOptions, SaveMode};
use crate::config::{Config, SearchProfile};
use crate::error::Error;
use crate::query::Query;
use crate::record::Model;
use crate::registry::{ConnectionKey, Registry};
use crate::translate::lucene;
use crate::value::{Document, Key, Value};

const BACKEND: &str = "search";

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Page size of a query.  Results past the first page are not fetched.
pub const SEARCH_LIMIT: u32 = 100;

/// One stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub key: String,
    pub value: serde_json::Value,
}

/// A page of a collection in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct ListRequest {
    pub limit: u32,
    pub after_key: Option<String>,
    pub start_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub sort: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

/// The operations the adapter needs from a search service.
pub trait SearchClient: Send + Sync {
    fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, Error>;

    fn put(&self, collection: &str, key: &str, value: &serde_json::Value) -> Result<(), Error>;

    /// Store a value unless the key is taken.  Returns whether it was
    /// stored.
    fn put_if_absent(&self, collection: &str, key: &str, value: &serde_json::Value) -> Result<bool, Error>;

    /// Remove a value and its history.
    fn purge(&self, collection: &str, key: &str) -> Result<(), Error>;

    fn delete_collection(&self, collection: &str) -> Result<(), Error>;

    fn list(&self, collection: &str, request: &ListRequest) -> Result<Vec<SearchHit>, Error>;

    fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<SearchHit>, Error>;
}

type Connector<C> = dyn Fn(&ConnectionKey, &SearchProfile) -> Result<C, Error> + Send + Sync;

/// An adapter over search service clients.
pub struct SearchAdapter<C> {
    config: Arc<Config>,
    connector: Arc<Connector<C>>,
    clients: Arc<Registry<Arc<C>>>,
}

impl<C> Clone for SearchAdapter<C> {
    fn clone(&self) -> Self {
        SearchAdapter {
            config: self.config.clone(),
            connector: self.connector.clone(),
            clients: self.clients.clone(),
        }
    }
}

impl<C> std::fmt::Debug for SearchAdapter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SearchAdapter")
            .field("environment", &self.config.environment())
            .field("connections", &self.clients.len())
            .finish()
    }
}

impl<C: SearchClient> SearchAdapter<C> {
    /// Create an adapter that opens clients with `connector`.
    pub fn new<F>(config: Config, connector: F) -> Self
    where
        F: Fn(&ConnectionKey, &SearchProfile) -> Result<C, Error> + Send + Sync + 'static,
    {
        SearchAdapter {
            config: Arc::new(config),
            connector: Arc::new(connector),
            clients: Arc::new(Registry::new()),
        }
    }

    /// The client for a connection, created on first use.
    pub fn client(&self, connection: &ConnectionKey) -> Result<Arc<C>, Error> {
        let key = connection.resolve(self.config.environment());
        self.clients.get_or_connect(&key, |key| {
            let profile: SearchProfile = self.config.profile(BACKEND, key).map_err(|err| {
                tracing::error!(connection = %key.label(BACKEND), error = %err, "invalid configuration");
                Error::from(err)
            })?;
            let client = (self.connector)(key, &profile).map_err(|err| {
                tracing::error!(connection = %key.label(BACKEND), error = %err, "failed to connect");
                err
            })?;
            tracing::info!(connection = %key.label(BACKEND), "connected");
            Ok(Arc::new(client))
        })
    }
}

fn to_document(model: &Model, hit: SearchHit) -> Result<Document, Error> {
    let mut document = Document::from_json(&hit.value)?;
    document.insert(model.key_field, Value::Text(hit.key));
    Ok(document)
}

fn stored_value(model: &Model, document: &Document) -> serde_json::Value {
    let mut value = document.clone();
    value.remove(model.key_field);
    value.to_json()
}

impl<C: SearchClient> Adapter for SearchAdapter<C> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn find(&self, model: &Model, key: &Key) -> Result<Document, Error> {
        let client = self.client(&model.connection)?;
        let key = key.to_string();
        match client.get(&model.name, &key)? {
            Some(value) => to_document(model, SearchHit { key, value }),
            None => Err(Error::not_found_str("record not found")),
        }
    }

    fn all(&self, model: &Model, options: &AllOptions) -> Result<Vec<Document>, Error> {
        let limit = check_limit(options, DEFAULT_LIMIT, MAX_LIMIT)?;
        let request = ListRequest {
            limit,
            after_key: options.after_key.as_ref().map(Key::to_string),
            start_key: options.start_key.as_ref().map(Key::to_string),
        };
        let client = self.client(&model.connection)?;
        client
            .list(&model.name, &request)?
            .into_iter()
            .map(|hit| to_document(model, hit))
            .collect()
    }

    fn truncate(&self, model: &Model) -> Result<Option<u64>, Error> {
        self.client(&model.connection)?.delete_collection(&model.name)?;
        Ok(None)
    }

    fn db_save(&self, model: &Model, document: &Document, mode: SaveMode) -> Result<Option<Key>, Error> {
        let existing = document.value(model.key_field).and_then(Key::from_value);
        let value = stored_value(model, document);
        let client = self.client(&model.connection)?;

        match (mode, existing) {
            (SaveMode::Insert, existing) => {
                let generated = existing.is_none();
                let key = existing.unwrap_or_else(|| Key::Text(uuid::Uuid::new_v4().to_string()));
                if !client.put_if_absent(&model.name, &key.to_string(), &value)? {
                    return Err(Error::conflict_str(format!(
                        "insert failed: key {key} already exists"
                    )));
                }
                Ok(generated.then_some(key))
            }
            (SaveMode::Update, Some(key)) => {
                client.put(&model.name, &key.to_string(), &value)?;
                Ok(None)
            }
            (SaveMode::Update, None) => Err(Error::key_str("cannot update a record without a key")),
        }
    }

    fn db_delete(&self, model: &Model, key: &Key) -> Result<(), Error> {
        self.client(&model.connection)?.purge(&model.name, &key.to_string())
    }

    fn db_search(&self, model: &Model, query: &Query) -> Result<Vec<Document>, Error> {
        if let Some(aggregation) = query.aggregations.keys().next() {
            return Err(Error::unsupported_str(format!(
                "{BACKEND} does not support {aggregation} aggregations"
            )));
        }
        if query.distinct {
            return Err(Error::unsupported_str(format!("{BACKEND} does not support distinct")));
        }

        let request = SearchRequest {
            query: lucene::query_string(&query.where_conditions)?,
            sort: lucene::sort_string(&query.order_bys),
            limit: SEARCH_LIMIT,
            offset: 0,
        };
        tracing::debug!(
            backend = BACKEND,
            model = %model.name,
            query = %request.query,
            sort = request.sort.as_deref().unwrap_or_default(),
            "searching"
        );

        let client = self.client(&model.connection)?;
        client
            .search(&model.name, &request)?
            .into_iter()
            .map(|hit| {
                let document = to_document(model, hit)?;
                Ok(if query.plucks.is_empty() {
                    document
                } else {
                    document.project(&query.plucks)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use parking_lot::Mutex;

    use super::*;
    use crate::query::{Aggregation, Condition, OrderBy};
    use crate::ErrorKind;

    #[derive(Debug, Default)]
    struct FakeClient {
        api_key: String,
        collections: Mutex<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
        searches: Mutex<Vec<SearchRequest>>,
        lists: Mutex<Vec<ListRequest>>,
    }

    impl SearchClient for FakeClient {
        fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, Error> {
            let collections = self.collections.lock();
            Ok(collections.get(collection).and_then(|c| c.get(key)).cloned())
        }

        fn put(&self, collection: &str, key: &str, value: &serde_json::Value) -> Result<(), Error> {
            let mut collections = self.collections.lock();
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(key.to_string(), value.clone());
            Ok(())
        }

        fn put_if_absent(&self, collection: &str, key: &str, value: &serde_json::Value) -> Result<bool, Error> {
            let mut collections = self.collections.lock();
            let collection = collections.entry(collection.to_string()).or_default();
            if collection.contains_key(key) {
                return Ok(false);
            }
            collection.insert(key.to_string(), value.clone());
            Ok(true)
        }

        fn purge(&self, collection: &str, key: &str) -> Result<(), Error> {
            if let Some(collection) = self.collections.lock().get_mut(collection) {
                collection.remove(key);
            }
            Ok(())
        }

        fn delete_collection(&self, collection: &str) -> Result<(), Error> {
            self.collections.lock().remove(collection);
            Ok(())
        }

        fn list(&self, collection: &str, request: &ListRequest) -> Result<Vec<SearchHit>, Error> {
            self.lists.lock().push(request.clone());
            let collections = self.collections.lock();
            Ok(collections
                .get(collection)
                .map(|c| {
                    c.iter()
                        .filter(|(key, _)| match (&request.after_key, &request.start_key) {
                            (Some(after), _) => *key > after,
                            (None, Some(start)) => *key >= start,
                            (None, None) => true,
                        })
                        .take(request.limit as usize)
                        .map(|(key, value)| SearchHit {
                            key: key.clone(),
                            value: value.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        fn search(&self, collection: &str, request: &SearchRequest) -> Result<Vec<SearchHit>, Error> {
            self.searches.lock().push(request.clone());
            let collections = self.collections.lock();
            Ok(collections
                .get(collection)
                .map(|c| {
                    c.iter()
                        .map(|(key, value)| SearchHit {
                            key: key.clone(),
                            value: value.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    fn adapter() -> SearchAdapter<FakeClient> {
        let config = Config::from_value(serde_json::json!({
            "environment": "test",
            "test": { "search": { "default": { "apikey": "secret" } } }
        }))
        .unwrap();
        SearchAdapter::new(config, |_, profile| {
            Ok(FakeClient {
                api_key: profile.api_key.clone(),
                ..FakeClient::default()
            })
        })
    }

    fn model() -> Model {
        Model {
            name: "vehicles".into(),
            key_field: "id",
            connection: ConnectionKey::default(),
        }
    }

    fn vehicle(make: &str, model: &str, year: i32) -> Document {
        let mut doc = Document::new();
        doc.insert("make", make);
        doc.insert("model", model);
        doc.insert("year", year);
        doc
    }

    #[test]
    fn client_is_built_from_profile() {
        let adapter = adapter();
        let client = adapter.client(&ConnectionKey::default()).unwrap();
        assert_eq!("secret", client.api_key);
        assert!(Arc::ptr_eq(&client, &adapter.client(&ConnectionKey::default()).unwrap()));
    }

    #[test]
    fn insert_generates_key_and_refuses_duplicates() {
        let adapter = adapter();
        let m = model();

        let key = adapter
            .db_save(&m, &vehicle("tesla", "model s", 2009), SaveMode::Insert)
            .unwrap()
            .unwrap();
        let found = adapter.find(&m, &key).unwrap();
        assert_eq!("model s", found.get::<String>("model").unwrap());
        assert_eq!(Some(&key.to_value()), found.value("id"));

        let err = adapter.db_save(&m, &found, SaveMode::Insert).unwrap_err();
        assert_eq!(ErrorKind::Conflict, err.kind());

        let mut updated = found.clone();
        updated.insert("year", 2012);
        assert_eq!(None, adapter.db_save(&m, &updated, SaveMode::Update).unwrap());
        assert_eq!(2012, adapter.find(&m, &key).unwrap().get::<i32>("year").unwrap());

        adapter.db_delete(&m, &key).unwrap();
        assert!(adapter.find(&m, &key).unwrap_err().is_not_found());
    }

    #[test]
    fn search_sends_lucene() {
        let adapter = adapter();
        let m = model();
        adapter
            .db_save(&m, &vehicle("porsche", "panamera", 2010), SaveMode::Insert)
            .unwrap();

        let query = Query {
            plucks: vec!["model".into()],
            where_conditions: vec![Condition::eq("model", "panamera"), Condition::gte("year", 2010)],
            order_bys: vec![OrderBy::desc("year")],
            ..Query::new()
        };
        let rows = adapter.db_search(&m, &query).unwrap();
        assert_eq!(1, rows.len());
        assert_eq!(vec!["model"], rows[0].fields().collect::<Vec<_>>());

        let client = adapter.client(&m.connection).unwrap();
        let searches = client.searches.lock();
        assert_eq!(
            SearchRequest {
                query: r#"model:"panamera" AND year:[2010 TO *]"#.into(),
                sort: Some("value.year:desc".into()),
                limit: SEARCH_LIMIT,
                offset: 0,
            },
            searches[0]
        );
    }

    #[test]
    fn unsupported_queries_never_reach_the_service() {
        let adapter = adapter();
        let m = model();

        let mut query = Query::new();
        query.aggregations.insert(Aggregation::Sum, vec!["year".into()]);
        assert_eq!(ErrorKind::Unsupported, adapter.db_search(&m, &query).unwrap_err().kind());

        let query = Query {
            distinct: true,
            ..Query::new()
        };
        assert_eq!(ErrorKind::Unsupported, adapter.db_search(&m, &query).unwrap_err().kind());

        let query = Query {
            where_conditions: vec![Condition::ne("make", "ford")],
            ..Query::new()
        };
        let err = adapter.db_search(&m, &query).unwrap_err();
        assert_eq!("invalid comparison operator: NE", err.to_string());

        let client = adapter.client(&m.connection).unwrap();
        assert!(client.searches.lock().is_empty());
    }

    #[test]
    fn all_pages_by_key() {
        let adapter = adapter();
        let m = model();
        for (key, model) in [("a", "panamera"), ("b", "cayenne"), ("c", "911")] {
            let mut doc = vehicle("porsche", model, 2010);
            doc.insert("id", key);
            adapter.db_save(&m, &doc, SaveMode::Insert).unwrap();
        }

        assert_eq!(3, adapter.all(&m, &AllOptions::new()).unwrap().len());
        let page = adapter.all(&m, &AllOptions::new().after_key("a").limit(1)).unwrap();
        assert_eq!("cayenne", page[0].get::<String>("model").unwrap());

        let err = adapter.all(&m, &AllOptions::new().limit(101)).unwrap_err();
        assert_eq!(ErrorKind::Limit, err.kind());

        let client = adapter.client(&m.connection).unwrap();
        assert_eq!(DEFAULT_LIMIT, client.lists.lock()[0].limit);
        assert_eq!(2, client.lists.lock().len());

        assert_eq!(None, adapter.truncate(&m).unwrap());
        assert!(adapter.all(&m, &AllOptions::new()).unwrap().is_empty());
    }
}
