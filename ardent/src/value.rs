//! Backend-neutral values and documents.
//!
//! Every entity is converted into a [`Document`] before it reaches an
//! adapter, and every row or document an adapter returns comes back as a
//! `Document`.  Field values are [`Value`]s; entity identities are
//! [`Key`]s.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::Error;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Only meaningful as the right-hand side of a membership condition.
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Compare two values the way a document store would.
    ///
    /// Integers and floats compare numerically, timestamps compare with
    /// RFC 3339 text, and values of unrelated kinds are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Int(_) | Float(_), Int(_) | Float(_)) => self.as_f64()?.partial_cmp(&other.as_f64()?),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (Timestamp(a), Text(b)) => DateTime::parse_from_rfc3339(b)
                .ok()
                .map(|b| a.cmp(&b.with_timezone(&Utc))),
            (Text(_), Timestamp(_)) => other.compare(self).map(Ordering::reverse),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Objects have no `Value` counterpart and are kept as their JSON text.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(_) => Value::Text(json.to_string()),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => b.fmt(f),
            Value::Int(i) => i.fmt(f),
            Value::Float(x) => x.fmt(f),
            Value::Text(s) => s.fmt(f),
            Value::Timestamp(t) => f.write_str(&t.to_rfc3339()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    item.fmt(f)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// The identity of an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::Int(*i),
            Key::Text(s) => Value::Text(s.clone()),
        }
    }

    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Int(i) => Some(Key::Int(*i)),
            Value::Text(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Key::Int(i) => i.fmt(f),
            Key::Text(s) => s.fmt(f),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i.into())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

/// A backend-neutral map of field names to values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document(BTreeMap<String, Value>);

impl Document {
    pub fn new() -> Self {
        Document::default()
    }

    /// Decode a field.  A missing field decodes as if it were null.
    pub fn get<T: FromValue>(&self, field: &str) -> Result<T, Error> {
        let value = self.0.get(field).unwrap_or(&Value::Null);
        T::from_value(value).map_err(|err| {
            Error::decode_str(format!("field {field}: {}", err.message()))
        })
    }

    /// Decode an identity field.  A missing or null key is unassigned.
    pub fn get_key<K: KeyField + Default>(&self, field: &str) -> Result<K, Error> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(K::default()),
            Some(value) => {
                let key = Key::from_value(value).ok_or_else(|| {
                    Error::decode_str(format!(
                        "field {field}: expected a key, found {}",
                        value.type_name()
                    ))
                })?;
                K::from_key(key)
            }
        }
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert<K: Into<String>, V: ToValue>(&mut self, field: K, value: V) -> Option<Value> {
        self.0.insert(field.into(), value.to_value())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keep only the named fields, in the given order of precedence.
    pub fn project(&self, fields: &[String]) -> Document {
        fields
            .iter()
            .filter_map(|field| self.0.get(field).map(|v| (field.clone(), v.clone())))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Document, Error> {
        match json {
            serde_json::Value::Object(map) => Ok(map
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect()),
            other => Err(Error::decode_str(format!(
                "expected a JSON object, found {other}"
            ))),
        }
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Document(iter.into_iter().collect())
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A type that can be stored as a field value.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// A type that can be decoded from a field value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, Error>;
}

fn mismatch<T>(expected: &str, found: &Value) -> Result<T, Error> {
    Err(Error::decode_str(format!(
        "expected {expected}, found {}",
        found.type_name()
    )))
}

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, Error> {
        Ok(value.clone())
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            other => mismatch("bool", other),
        }
    }
}

macro_rules! integer_value {
    ($($ty:ty),*) => {
        $(
            impl ToValue for $ty {
                fn to_value(&self) -> Value {
                    Value::Int(*self as i64)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self, Error> {
                    match value {
                        Value::Int(i) => <$ty>::try_from(*i).map_err(Error::decode),
                        Value::Float(f)
                            if f.fract() == 0.0
                                && *f >= <$ty>::MIN as f64
                                && *f <= <$ty>::MAX as f64 =>
                        {
                            Ok(*f as $ty)
                        }
                        Value::Float(f) if f.fract() == 0.0 => Err(Error::decode_str(format!(
                            "{f} is out of range for {}",
                            stringify!($ty)
                        ))),
                        other => mismatch(stringify!($ty), other),
                    }
                }
            }
        )*
    };
}

integer_value!(i8, i16, i32, i64, u8, u16, u32);

impl ToValue for u64 {
    fn to_value(&self) -> Value {
        i64::try_from(*self)
            .map(Value::Int)
            .unwrap_or(Value::Float(*self as f64))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Int(i) => u64::try_from(*i).map_err(Error::decode),
            other => mismatch("u64", other),
        }
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value.as_f64() {
            Some(f) => Ok(f),
            None => mismatch("f64", value),
        }
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, Error> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => mismatch("text", other),
        }
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Timestamp(t) => Ok(*t),
            Value::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(Error::decode),
            other => mismatch("timestamp", other),
        }
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: ToValue> ToValue for [T] {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            other => mismatch("list", other),
        }
    }
}

impl ToValue for Key {
    fn to_value(&self) -> Value {
        Key::to_value(self)
    }
}

impl FromValue for Key {
    fn from_value(value: &Value) -> Result<Self, Error> {
        Key::from_value(value).map_or_else(|| mismatch("key", value), Ok)
    }
}

/// A field type that can hold an entity's identity.
pub trait KeyField: Sized {
    fn to_key(&self) -> Option<Key>;
    fn from_key(key: Key) -> Result<Self, Error>;
}

impl KeyField for String {
    /// An empty string is an unassigned key.
    fn to_key(&self) -> Option<Key> {
        if self.is_empty() {
            None
        } else {
            Some(Key::Text(self.clone()))
        }
    }

    fn from_key(key: Key) -> Result<Self, Error> {
        match key {
            Key::Text(s) => Ok(s),
            Key::Int(i) => Ok(i.to_string()),
        }
    }
}

macro_rules! integer_key {
    ($($ty:ty),*) => {
        $(
            impl KeyField for $ty {
                /// Zero is an unassigned key.
                fn to_key(&self) -> Option<Key> {
                    if *self == 0 {
                        None
                    } else {
                        Some(Key::Int(*self as i64))
                    }
                }

                fn from_key(key: Key) -> Result<Self, Error> {
                    match key {
                        Key::Int(i) => <$ty>::try_from(i).map_err(Error::key),
                        Key::Text(s) => s.parse().map_err(|_| {
                            Error::key_str(format!(
                                "cannot assign key {s:?} to a {} field",
                                stringify!($ty)
                            ))
                        }),
                    }
                }
            }
        )*
    };
}

integer_key!(i32, i64, u32);

impl<T: KeyField> KeyField for Option<T> {
    fn to_key(&self) -> Option<Key> {
        self.as_ref().and_then(KeyField::to_key)
    }

    fn from_key(key: Key) -> Result<Self, Error> {
        T::from_key(key).map(Some)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numbers_compare_across_kinds() {
        assert_eq!(
            Some(Ordering::Less),
            Value::Int(2009).compare(&Value::Float(2009.5))
        );
        assert_eq!(
            Some(Ordering::Equal),
            Value::Float(2010.0).compare(&Value::Int(2010))
        );
        assert_eq!(None, Value::Int(1).compare(&Value::Text("1".into())));
    }

    #[test]
    fn missing_field_reads_as_null() {
        let doc = Document::new();
        let make: Option<String> = doc.get("make").unwrap();
        assert_eq!(None, make);
        assert!(doc.get::<String>("make").is_err());
    }

    #[test]
    fn integer_overflow_is_a_decode_error() {
        let mut doc = Document::new();
        doc.insert("year", i64::MAX);
        let err = doc.get::<i32>("year").unwrap_err();
        assert_eq!(crate::ErrorKind::Decode, err.kind());
        assert!(err.message().starts_with("field year"));
    }

    #[test]
    fn integral_floats_are_range_checked() {
        assert_eq!(6029, i64::from_value(&Value::Float(6029.0)).unwrap());
        assert_eq!(255, u8::from_value(&Value::Float(255.0)).unwrap());

        let err = u8::from_value(&Value::Float(300.0)).unwrap_err();
        assert_eq!(crate::ErrorKind::Decode, err.kind());
        assert!(u32::from_value(&Value::Float(-1.0)).is_err());
        assert!(i32::from_value(&Value::Float(1.5)).is_err());

        let mut doc = Document::new();
        doc.insert("sum", 1e20);
        assert!(doc.get::<i64>("sum").unwrap_err().message().starts_with("field sum"));
    }

    #[test]
    fn json_objects() {
        let mut doc = Document::new();
        doc.insert("make", "porsche");
        doc.insert("year", 2010);
        doc.insert("price", 1.5);
        let json = doc.to_json();
        assert_eq!(
            serde_json::json!({ "make": "porsche", "year": 2010, "price": 1.5 }),
            json
        );
        assert_eq!(doc, Document::from_json(&json).unwrap());
        assert!(Document::from_json(&serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn timestamps_read_back_from_text() {
        let now = Utc::now();
        let text = Value::Text(now.to_rfc3339());
        assert_eq!(now, DateTime::<Utc>::from_value(&text).unwrap());
    }

    #[test]
    fn unassigned_keys() {
        assert_eq!(None, String::new().to_key());
        assert_eq!(None, 0i64.to_key());
        assert_eq!(Some(Key::Int(7)), 7i32.to_key());
        assert_eq!(7, i32::from_key(Key::Text("7".into())).unwrap());
        assert!(i32::from_key(Key::Text("seven".into())).is_err());
    }

    #[test]
    fn keys_read_from_documents() {
        let mut doc = Document::new();
        assert_eq!(0, doc.get_key::<i64>("id").unwrap());
        assert_eq!("", doc.get_key::<String>("id").unwrap());

        doc.insert("id", 7);
        assert_eq!(7, doc.get_key::<i64>("id").unwrap());
        assert_eq!("7", doc.get_key::<String>("id").unwrap());

        doc.insert("id", 1.5);
        assert_eq!(crate::ErrorKind::Decode, doc.get_key::<i64>("id").unwrap_err().kind());
    }

    #[test]
    fn project_keeps_named_fields() {
        let mut doc = Document::new();
        doc.insert("make", "tesla");
        doc.insert("model", "model s");
        doc.insert("year", 2009);
        let projected = doc.project(&["year".to_string(), "absent".to_string()]);
        assert_eq!(1, projected.len());
        assert_eq!(2009, projected.get::<i32>("year").unwrap());
    }
}
