//! Entity capabilities.
//!
//! A persistable struct implements two traits:
//!
//! * [`Entity`], which describes the struct to the persistence layer:
//!   its model name, where its connection lives, its identity, its
//!   timestamps, and how it maps to a [`Document`].  This is normally
//!   derived.
//! * [`Record`], the domain behaviour: validation rules and the hooks
//!   that run around a save.  Every method has a default.
#![cfg_attr(
    feature = "derive",
    doc = r##"

```
use ardent::{Entity, Record, Timestamps};
use ardent::validation::Validation;

#[derive(Debug, Default, Entity)]
#[ardent(model = "motorcycles")]
struct Motorcycle {
    #[ardent(key)]
    id: String,
    make: String,
    year: i32,
    #[ardent(timestamps)]
    timestamps: Timestamps,
}

impl Record for Motorcycle {
    fn validate(&self, v: &mut Validation) {
        v.required("make", &self.make);
        v.min("year", &self.year, 1885);
    }
}

assert_eq!("motorcycles", Motorcycle::model_name());
```
"##
)]

use chrono::{DateTime, Utc};

use crate::error::{BoxError, Error};
use crate::registry::ConnectionKey;
use crate::validation::Validation;
use crate::value::{Document, Key};

/// When an entity was first and most recently saved.
///
/// Both are unset until the first save.  The first save sets
/// `created_at`; every later save sets `updated_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamps {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    pub const CREATED_AT: &'static str = "created_at";
    pub const UPDATED_AT: &'static str = "updated_at";

    /// Record a save happening now.  Exactly one field changes.
    pub fn touch(&mut self) {
        self.touch_at(Utc::now());
    }

    pub fn touch_at(&mut self, now: DateTime<Utc>) {
        if self.created_at.is_none() {
            self.created_at = Some(now);
        } else {
            self.updated_at = Some(now);
        }
    }

    pub fn clear(&mut self) {
        *self = Timestamps::default();
    }
}

/// A type that can be turned into a document for storage.
pub trait ToDocument {
    fn to_document(&self) -> Document;
}

/// A type that can be decoded from a stored document.
pub trait FromDocument: Sized {
    fn from_document(document: &Document) -> Result<Self, Error>;
}

impl ToDocument for Document {
    fn to_document(&self) -> Document {
        self.clone()
    }
}

impl FromDocument for Document {
    fn from_document(document: &Document) -> Result<Self, Error> {
        Ok(document.clone())
    }
}

/// The description of a persistable struct.
///
/// Derive it with `#[derive(Entity)]` (crate feature `derive`).
pub trait Entity: ToDocument + FromDocument {
    /// The table or collection holding these entities.
    fn model_name() -> String;

    /// The document field holding the identity.
    fn key_field() -> &'static str {
        "id"
    }

    /// The name of the configured connection to store this entity in.
    fn connection_name(&self) -> &str {
        "default"
    }

    /// The configured environment, or `None` for the active one.
    fn connection_environment(&self) -> Option<&str> {
        None
    }

    /// The identity, if one has been assigned.
    fn key(&self) -> Option<Key>;

    /// Assign the identity, usually one generated by the backend.
    fn set_key(&mut self, key: Key) -> Result<(), Error>;

    fn timestamps(&self) -> &Timestamps;

    fn timestamps_mut(&mut self) -> &mut Timestamps;
}

/// Domain behaviour around validation and saving.
pub trait Record: Entity {
    /// Add any errors to the validation context.
    fn validate(&self, _validation: &mut Validation) {}

    /// Runs before validation.  An error aborts the save.
    fn before_save(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs after the backend accepted the save.  An error is logged
    /// and otherwise ignored.
    fn after_save(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// What an adapter needs to know about an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub name: String,
    pub key_field: &'static str,
    pub connection: ConnectionKey,
}

impl Model {
    pub fn of<E: Entity>(entity: &E) -> Model {
        Model {
            name: E::model_name(),
            key_field: E::key_field(),
            connection: ConnectionKey::new(
                entity.connection_name(),
                entity.connection_environment(),
            ),
        }
    }
}

/// The conventional model name for a type: snake case, with the last
/// word pluralised.
///
/// ```
/// use ardent::record::default_model_name;
///
/// assert_eq!("active_record_automobiles", default_model_name("ActiveRecordAutomobile"));
/// assert_eq!("categories", default_model_name("Category"));
/// ```
pub fn default_model_name(type_name: &str) -> String {
    pluralize(&snake_case(type_name))
}

fn snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|j| chars[j]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(char::is_lowercase),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn pluralize(word: &str) -> String {
    const SIBILANTS: [&str; 5] = ["s", "x", "z", "ch", "sh"];

    let mut chars = word.chars().rev();
    match (chars.next(), chars.next()) {
        (Some('y'), Some(p)) if !"aeiou".contains(p) => format!("{}ies", &word[..word.len() - 1]),
        _ if SIBILANTS.iter().any(|s| word.ends_with(s)) => format!("{word}es"),
        _ => format!("{word}s"),
    }
}
