//! The active-record wrapper.
//!
//! [`ActiveRecord`] binds an entity to an adapter.  It owns the entity,
//! a private [`Query`] built up by the chaining methods, and the
//! [`Validation`] context of the most recent validation pass.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use crate::adapter::{Adapter, AllOptions, SaveMode};
use crate::error::Error;
use crate::query::{Aggregation, Condition, OrderBy, Query};
use crate::record::{FromDocument, Model, Record, ToDocument};
use crate::validation::{Validation, ValidationError};
use crate::value::Key;

/// Where a wrapped record is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordState {
    /// Wrapped, with an empty query.
    Bound,
    /// Validation has run at least once since binding.
    Validated,
    /// Saved successfully at least once.
    Persisted,
    /// Deleted.  No further saves or deletes are allowed.
    Deleted,
}

/// An entity bound to the adapter that stores it.
#[derive(Debug)]
pub struct ActiveRecord<R, A> {
    record: R,
    adapter: A,
    query: Query,
    validation: Validation,
    state: RecordState,
}

/// Wrap any record in an [`ActiveRecord`].
pub trait ToActiveRecord: Record + Sized {
    fn to_active_record<A: Adapter>(self, adapter: A) -> ActiveRecord<Self, A> {
        ActiveRecord::new(self, adapter)
    }
}

impl<R: Record> ToActiveRecord for R {}

impl<R: Record, A: Adapter> ActiveRecord<R, A> {
    pub fn new(record: R, adapter: A) -> Self {
        ActiveRecord {
            record,
            adapter,
            query: Query::new(),
            validation: Validation::new(),
            state: RecordState::Bound,
        }
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut R {
        &mut self.record
    }

    pub fn into_inner(self) -> R {
        self.record
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn model(&self) -> Model {
        Model::of(&self.record)
    }

    pub fn set_key<K: Into<Key>>(&mut self, key: K) -> Result<(), Error> {
        self.record.set_key(key.into())
    }

    /// Select only these fields.  Replaces any earlier projection.
    pub fn pluck<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.plucks = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Add a where-condition.
    #[doc(alias = "where")]
    pub fn filter(&mut self, condition: Condition) -> &mut Self {
        self.query.where_conditions.push(condition);
        self
    }

    pub fn order(&mut self, order_by: OrderBy) -> &mut Self {
        self.query.order_bys.push(order_by);
        self
    }

    pub fn sum<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregate(Aggregation::Sum, fields)
    }

    pub fn aggregate<I, S>(&mut self, aggregation: Aggregation, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query
            .aggregations
            .insert(aggregation, fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.query.distinct = true;
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn set_query(&mut self, query: Query) -> &mut Self {
        self.query = query;
        self
    }

    /// Run the accumulated query.
    ///
    /// The query is reset only if the search and decoding both succeed,
    /// so a failed query can be inspected and retried.
    pub fn run<T: FromDocument>(&mut self) -> Result<Vec<T>, Error> {
        let model = self.model();
        let documents = self.adapter.db_search(&model, &self.query)?;
        let rows = documents
            .iter()
            .map(T::from_document)
            .collect::<Result<Vec<_>, _>>()?;
        self.query = Query::new();
        Ok(rows)
    }

    /// Run validation, returning whether the record is valid.
    pub fn valid(&mut self) -> bool {
        self.validation.clear();
        self.record.validate(&mut self.validation);
        if self.state == RecordState::Bound {
            self.state = RecordState::Validated;
        }
        !self.validation.has_errors()
    }

    /// The errors of the last validation pass, first error per field.
    pub fn errors(&self) -> BTreeMap<String, ValidationError> {
        self.validation.error_map()
    }

    pub fn validation(&self) -> &Validation {
        &self.validation
    }

    /// Save the record.
    ///
    /// Returns `Ok(false)` without touching the backend when validation
    /// fails; check [`errors`](Self::errors) for why.  A `before_save`
    /// error aborts the save and is returned.  An `after_save` error is
    /// logged and does not change the result.
    ///
    /// The first save inserts.  Once `updated_at` is set, saves update.
    pub fn save(&mut self) -> Result<bool, Error> {
        if self.state == RecordState::Deleted {
            return Err(Error::state_str("cannot save a deleted record"));
        }

        self.record.before_save().map_err(Error::hook)?;

        if !self.valid() {
            tracing::debug!(
                model = %R::model_name(),
                errors = self.validation.num_errors(),
                "validation failed, not saving"
            );
            return Ok(false);
        }

        self.record.timestamps_mut().touch();
        let mode = if self.record.timestamps().updated_at.is_none() {
            SaveMode::Insert
        } else {
            SaveMode::Update
        };

        let model = self.model();
        let document = self.record.to_document();
        tracing::debug!(backend = self.adapter.backend(), model = %model.name, ?mode, "saving record");

        if let Some(key) = self.adapter.db_save(&model, &document, mode)? {
            self.record.set_key(key)?;
        }
        self.state = RecordState::Persisted;

        if let Err(err) = self.record.after_save() {
            tracing::warn!(model = %model.name, error = %err, "after save hook failed");
        }

        Ok(true)
    }

    /// Delete the record from its backend.  No hooks or validation run.
    pub fn delete(&mut self) -> Result<(), Error> {
        if self.state == RecordState::Deleted {
            return Err(Error::state_str("record has already been deleted"));
        }

        let key = self
            .record
            .key()
            .ok_or_else(|| Error::key_str("cannot delete a record without a key"))?;

        let model = self.model();
        self.adapter.db_delete(&model, &key)?;
        self.state = RecordState::Deleted;
        Ok(())
    }

    /// Load a fresh instance by key.
    pub fn find<K: Into<Key>>(&self, id: K) -> Result<R, Error> {
        let model = self.model();
        let document = self.adapter.find(&model, &id.into())?;
        R::from_document(&document)
    }

    pub fn all(&self, options: &AllOptions) -> Result<Vec<R>, Error> {
        let model = self.model();
        self.adapter
            .all(&model, options)?
            .iter()
            .map(R::from_document)
            .collect()
    }

    /// Remove every stored record of this type.
    pub fn truncate(&self) -> Result<Option<u64>, Error> {
        let model = self.model();
        self.adapter.truncate(&model)
    }
}

impl<R, A> Deref for ActiveRecord<R, A> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.record
    }
}

impl<R, A> DerefMut for ActiveRecord<R, A> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.record
    }
}
