//! The persistence contract.
//!
//! An [`Adapter`] is the only thing that talks to a backend.  The
//! lifecycle in [`ActiveRecord`](crate::ActiveRecord) hands it
//! [`Document`]s and a [`Model`] describing where they live; translation
//! of a [`Query`] into the backend's language happens inside the adapter.

use crate::error::Error;
use crate::query::Query;
use crate::record::Model;
use crate::value::{Document, Key};

/// Whether a save creates a new document or replaces an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveMode {
    Insert,
    Update,
}

/// Paging for [`Adapter::all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllOptions {
    /// Maximum number of documents to return.  Each backend has a
    /// default and an upper bound.
    pub limit: Option<u32>,
    /// Resume after this key (exclusive).
    pub after_key: Option<Key>,
    /// Resume at this key (inclusive).
    pub start_key: Option<Key>,
}

impl AllOptions {
    pub fn new() -> Self {
        AllOptions::default()
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after_key<K: Into<Key>>(mut self, key: K) -> Self {
        self.after_key = Some(key.into());
        self
    }

    pub fn start_key<K: Into<Key>>(mut self, key: K) -> Self {
        self.start_key = Some(key.into());
        self
    }
}

/// Check a requested limit against the backend's bounds, returning the
/// effective limit.
pub fn check_limit(options: &AllOptions, default: u32, max: u32) -> Result<u32, Error> {
    match options.limit {
        None => Ok(default),
        Some(0) => Err(Error::limit_str("limit must be greater than 0")),
        Some(limit) if limit > max => Err(Error::limit_str(format!(
            "limit must be less than {}",
            u64::from(max) + 1
        ))),
        Some(limit) => Ok(limit),
    }
}

/// A backend that can store documents.
pub trait Adapter {
    /// A short name for logs and error messages.
    fn backend(&self) -> &'static str;

    /// Look up one document by key.
    ///
    /// Fails with [`ErrorKind::NotFound`](crate::ErrorKind::NotFound) when
    /// there isn't one.
    fn find(&self, model: &Model, key: &Key) -> Result<Document, Error>;

    /// A page of documents in key order.
    fn all(&self, model: &Model, options: &AllOptions) -> Result<Vec<Document>, Error>;

    /// Remove every document, returning how many when the backend knows.
    fn truncate(&self, model: &Model) -> Result<Option<u64>, Error>;

    /// Store a document, returning the key if the backend generated one.
    fn db_save(&self, model: &Model, document: &Document, mode: SaveMode) -> Result<Option<Key>, Error>;

    fn db_delete(&self, model: &Model, key: &Key) -> Result<(), Error>;

    /// Run a query.  Aggregations return a single document.
    fn db_search(&self, model: &Model, query: &Query) -> Result<Vec<Document>, Error>;
}

impl<A: Adapter + ?Sized> Adapter for &A {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    fn find(&self, model: &Model, key: &Key) -> Result<Document, Error> {
        (**self).find(model, key)
    }

    fn all(&self, model: &Model, options: &AllOptions) -> Result<Vec<Document>, Error> {
        (**self).all(model, options)
    }

    fn truncate(&self, model: &Model) -> Result<Option<u64>, Error> {
        (**self).truncate(model)
    }

    fn db_save(&self, model: &Model, document: &Document, mode: SaveMode) -> Result<Option<Key>, Error> {
        (**self).db_save(model, document, mode)
    }

    fn db_delete(&self, model: &Model, key: &Key) -> Result<(), Error> {
        (**self).db_delete(model, key)
    }

    fn db_search(&self, model: &Model, query: &Query) -> Result<Vec<Document>, Error> {
        (**self).db_search(model, query)
    }
}

impl<A: Adapter + ?Sized> Adapter for std::sync::Arc<A> {
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    fn find(&self, model: &Model, key: &Key) -> Result<Document, Error> {
        (**self).find(model, key)
    }

    fn all(&self, model: &Model, options: &AllOptions) -> Result<Vec<Document>, Error> {
        (**self).all(model, options)
    }

    fn truncate(&self, model: &Model) -> Result<Option<u64>, Error> {
        (**self).truncate(model)
    }

    fn db_save(&self, model: &Model, document: &Document, mode: SaveMode) -> Result<Option<Key>, Error> {
        (**self).db_save(model, document, mode)
    }

    fn db_delete(&self, model: &Model, key: &Key) -> Result<(), Error> {
        (**self).db_delete(model, key)
    }

    fn db_search(&self, model: &Model, query: &Query) -> Result<Vec<Document>, Error> {
        (**self).db_search(model, query)
    }
}
