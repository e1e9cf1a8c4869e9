//! An in-process document store.
//!
//! Documents live in ordered maps keyed by [`Key`], one map per model,
//! one store per configured connection.  Queries run through the same
//! pipeline a document database uses: filter and order, then either a
//! sum or pluck and distinct.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::adapter::{check_limit, Adapter, AllOptions, SaveMode};
use crate::error::Error;
use crate::query::{check_aggregations, OrderBy, Query, SortOrder};
use crate::record::Model;
use crate::registry::{ConnectionKey, Registry};
use crate::translate::filter::Filter;
use crate::value::{Document, Key, Value};

const BACKEND: &str = "memory";

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

/// The environment connections resolve against unless one is chosen.
pub const DEFAULT_ENVIRONMENT: &str = "default";

type Collection = BTreeMap<Key, Document>;

/// The documents of one connection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn len(&self, model: &str) -> usize {
        self.collections.read().get(model).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, model: &str) -> bool {
        self.len(model) == 0
    }
}

/// An adapter over in-process stores.
///
/// Clones share their stores.  A connection key without an environment
/// addresses the adapter's active environment.
#[derive(Debug, Clone)]
pub struct MemoryAdapter {
    environment: String,
    stores: Arc<Registry<Arc<MemoryStore>>>,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        MemoryAdapter::with_environment(DEFAULT_ENVIRONMENT)
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        MemoryAdapter::default()
    }

    pub fn with_environment(environment: impl Into<String>) -> Self {
        MemoryAdapter {
            environment: environment.into(),
            stores: Arc::default(),
        }
    }

    /// The active environment.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The store behind a connection, created on first use.
    pub fn store(&self, connection: &ConnectionKey) -> Result<Arc<MemoryStore>, Error> {
        let connection = connection.resolve(&self.environment);
        self.stores.get_or_connect(&connection, |key| {
            tracing::info!(connection = %key.label(BACKEND), "creating document store");
            Ok(Arc::new(MemoryStore::default()))
        })
    }
}

fn document_key(model: &Model, document: &Document) -> Option<Key> {
    document.value(model.key_field).and_then(Key::from_value)
}

fn compare_for_sort(a: &Document, b: &Document, order_bys: &[OrderBy]) -> Ordering {
    for order_by in order_bys {
        let left = a.value(&order_by.key).unwrap_or(&Value::Null);
        let right = b.value(&order_by.key).unwrap_or(&Value::Null);
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
        };
        let ordering = match order_by.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn dedup(documents: Vec<Document>) -> Vec<Document> {
    let mut unique: Vec<Document> = Vec::with_capacity(documents.len());
    for document in documents {
        if !unique.contains(&document) {
            unique.push(document);
        }
    }
    unique
}

fn sum(documents: &[Document], field: &str, distinct: bool) -> Result<Document, Error> {
    let mut values: Vec<&Value> = documents
        .iter()
        .filter_map(|doc| doc.value(field))
        .filter(|value| !value.is_null())
        .collect();
    if distinct {
        let mut unique: Vec<&Value> = vec![];
        for value in values {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        values = unique;
    }

    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut all_ints = true;
    for value in values {
        match value {
            Value::Int(i) => {
                int_total = int_total.saturating_add(*i);
                float_total += *i as f64;
            }
            Value::Float(f) => {
                all_ints = false;
                float_total += f;
            }
            other => {
                return Err(Error::aggregation_str(format!(
                    "cannot sum {field}: {} is not a number",
                    other
                )))
            }
        }
    }

    let mut result = Document::new();
    if all_ints {
        result.insert("sum", int_total);
    } else {
        result.insert("sum", float_total);
    }
    Ok(result)
}

impl Adapter for MemoryAdapter {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn find(&self, model: &Model, key: &Key) -> Result<Document, Error> {
        let store = self.store(&model.connection)?;
        let collections = store.collections.read();
        collections
            .get(&model.name)
            .and_then(|collection| collection.get(key))
            .cloned()
            .ok_or_else(|| Error::not_found_str("record not found"))
    }

    fn all(&self, model: &Model, options: &AllOptions) -> Result<Vec<Document>, Error> {
        let limit = check_limit(options, DEFAULT_LIMIT, MAX_LIMIT)?;
        let store = self.store(&model.connection)?;
        let collections = store.collections.read();
        let Some(collection) = collections.get(&model.name) else {
            return Ok(vec![]);
        };

        let documents = collection
            .iter()
            .filter(|(key, _)| match (&options.after_key, &options.start_key) {
                (Some(after), _) => *key > after,
                (None, Some(start)) => *key >= start,
                (None, None) => true,
            })
            .take(limit as usize)
            .map(|(_, document)| document.clone())
            .collect();
        Ok(documents)
    }

    fn truncate(&self, model: &Model) -> Result<Option<u64>, Error> {
        let store = self.store(&model.connection)?;
        let removed = store.collections.write().remove(&model.name);
        Ok(Some(removed.map_or(0, |c| c.len() as u64)))
    }

    fn db_save(&self, model: &Model, document: &Document, mode: SaveMode) -> Result<Option<Key>, Error> {
        let (key, generated) = match (document_key(model, document), mode) {
            (Some(key), _) => (key, false),
            (None, SaveMode::Insert) => (Key::Text(uuid::Uuid::new_v4().to_string()), true),
            (None, SaveMode::Update) => {
                return Err(Error::key_str("cannot update a record without a key"))
            }
        };

        let mut stored = document.clone();
        stored.insert(model.key_field, key.clone());

        let store = self.store(&model.connection)?;
        let mut collections = store.collections.write();
        let collection = collections.entry(model.name.clone()).or_default();
        match mode {
            SaveMode::Insert if collection.contains_key(&key) => {
                return Err(Error::conflict_str(format!(
                    "insert failed: key {key} already exists"
                )))
            }
            SaveMode::Update if !collection.contains_key(&key) => {
                return Err(Error::not_found_str("record not found"))
            }
            _ => {}
        }
        collection.insert(key.clone(), stored);

        Ok(generated.then_some(key))
    }

    fn db_delete(&self, model: &Model, key: &Key) -> Result<(), Error> {
        let store = self.store(&model.connection)?;
        if let Some(collection) = store.collections.write().get_mut(&model.name) {
            collection.remove(key);
        }
        Ok(())
    }

    fn db_search(&self, model: &Model, query: &Query) -> Result<Vec<Document>, Error> {
        let sum_field = check_aggregations(BACKEND, query)?;
        let filter = Filter::from_conditions(&query.where_conditions)?;
        tracing::debug!(
            backend = BACKEND,
            model = %model.name,
            filter = %filter.as_ref().map(Filter::to_json).unwrap_or_default(),
            "searching"
        );

        let store = self.store(&model.connection)?;
        let mut documents: Vec<Document> = {
            let collections = store.collections.read();
            collections
                .get(&model.name)
                .map(|collection| {
                    collection
                        .values()
                        .filter(|doc| filter.as_ref().map_or(true, |f| f.matches(doc)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        if !query.order_bys.is_empty() {
            documents.sort_by(|a, b| compare_for_sort(a, b, &query.order_bys));
        }

        if let Some(field) = sum_field {
            return Ok(vec![sum(&documents, &field, query.distinct)?]);
        }

        if !query.plucks.is_empty() {
            documents = documents.iter().map(|doc| doc.project(&query.plucks)).collect();
        }

        if query.distinct {
            documents = dedup(documents);
        }

        Ok(documents)
    }
}
