#![cfg_attr(docsrs, feature(doc_cfg))]

//! Active-record persistence for plain Rust structs.
//!
//! An entity is a struct that implements [`Entity`] (usually derived) and
//! [`Record`].  Wrapping it in an [`ActiveRecord`] together with an
//! [`Adapter`] gives it a lifecycle:
//!
//! * [`save`](ActiveRecord::save) runs the `before_save` hook, validates,
//!   stamps `created_at` or `updated_at`, and inserts or updates,
//! * [`find`](ActiveRecord::find), [`all`](ActiveRecord::all) and
//!   [`truncate`](ActiveRecord::truncate) read and clear the backing store,
//! * [`delete`](ActiveRecord::delete) removes the record for good,
//!
//! and a chaining query builder, [`pluck`](ActiveRecord::pluck),
//! [`filter`](ActiveRecord::filter), [`order`](ActiveRecord::order),
//! [`sum`](ActiveRecord::sum) and [`distinct`](ActiveRecord::distinct),
//! finished with [`run`](ActiveRecord::run).
//!
//! The query is backend-neutral.  Each adapter translates it into its own
//! language, and rejects what it cannot express before touching the
//! backend.
//!
//! | Backend | Adapter | Feature |
//! | ------- | ------- | ------- |
//! | in-process document store | [`memory::MemoryAdapter`] | |
//! | SQLite | [`rusqlite::SqliteAdapter`] | `rusqlite` |
//! | PostgreSQL | [`postgres::PostgresAdapter`] | `postgres` |
//! | MySQL/MariaDB | [`mysql::MysqlAdapter`] | `mysql` |
//! | hosted search service | [`search::SearchAdapter`] | |
//! | key-value bucket | [`kv::KvAdapter`] | |
//!
//! Connections are configured in a JSON file, see [`config`].
#![cfg_attr(
    feature = "derive",
    doc = r##"

```
use ardent::{Entity, Record, Timestamps, ToActiveRecord};
use ardent::memory::MemoryAdapter;
use ardent::query::Condition;
use ardent::validation::Validation;

#[derive(Debug, Default, Entity)]
struct Vehicle {
    #[ardent(key)]
    id: String,
    make: String,
    model: String,
    year: i32,
    #[ardent(timestamps)]
    timestamps: Timestamps,
}

impl Record for Vehicle {
    fn validate(&self, v: &mut Validation) {
        v.required("make", &self.make);
    }
}

# fn main() -> Result<(), ardent::Error> {
let adapter = MemoryAdapter::new();

let mut tesla = Vehicle {
    make: "tesla".into(),
    model: "model s".into(),
    year: 2009,
    ..Default::default()
}
.to_active_record(&adapter);

assert!(tesla.save()?);
assert!(!tesla.id.is_empty());

let found = tesla.find(tesla.id.clone())?;
assert_eq!("model s", found.model);

let mut query = Vehicle::default().to_active_record(&adapter);
let teslas: Vec<Vehicle> = query.filter(Condition::eq("make", "tesla")).run()?;
assert_eq!(1, teslas.len());
# Ok(())
# }
```
"##
)]

pub mod active_record;
pub mod adapter;
pub mod config;
pub mod error;
pub mod kv;
pub mod memory;
pub mod query;
pub mod record;
pub mod registry;
pub mod search;
pub mod translate;
pub mod validation;
pub mod value;

#[cfg(feature = "mysql")]
#[cfg_attr(docsrs, doc(cfg(feature = "mysql")))]
pub mod mysql;

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

#[cfg(feature = "rusqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "rusqlite")))]
pub mod rusqlite;

#[cfg(test)]
mod test;

pub use active_record::{ActiveRecord, RecordState, ToActiveRecord};
pub use adapter::{Adapter, AllOptions, SaveMode};
pub use error::{BoxError, Error, ErrorKind};
pub use record::{Entity, FromDocument, Model, Record, Timestamps, ToDocument};
pub use value::{Document, Key, Value};

#[cfg(feature = "derive")]
pub use ardent_derive::Entity;
