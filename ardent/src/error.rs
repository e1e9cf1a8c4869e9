//! Error handling.
//!
//! Errors can happen in one of a few different phases:
//!
//! * resolving configuration and connecting to a backend
//! * translating a query into the backend's language
//! * running a lifecycle hook
//! * talking to the backend
//! * decoding documents into entities
//!
//! Use the `kind()` method on [`Error`] to find out
//! which step it was.  If we have an underlying driver
//! error it can be retrieved with the `inner()` method.
//!
//! Validation failures are not errors: `save` reports them by
//! returning `Ok(false)`.

use std::sync::Arc;

/// A boxed error, as returned by lifecycle hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Inner = Arc<dyn std::error::Error + Send + Sync>;

/// An error that occurred when trying to use an entity's backend.
#[derive(Debug, Clone)]
pub struct Error {
    message: String,
    kind: ErrorKind,
    inner: Option<Inner>,
}

macro_rules! constructors {
    ($($kind:ident => $with_str:ident, $with_inner:ident;)*) => {
        impl Error {
            $(
                pub fn $with_str<S: Into<String>>(message: S) -> Self {
                    Error::new(ErrorKind::$kind, message.into(), None)
                }

                pub fn $with_inner<E>(inner: E) -> Self
                where
                    E: std::error::Error + Send + Sync + 'static,
                {
                    let message = inner.to_string();
                    Error::new(ErrorKind::$kind, message, Some(Arc::new(inner)))
                }
            )*
        }
    };
}

constructors! {
    NotFound => not_found_str, not_found;
    Unsupported => unsupported_str, unsupported;
    InvalidOperator => invalid_operator_str, invalid_operator;
    Aggregation => aggregation_str, aggregation;
    Limit => limit_str, limit;
    Conflict => conflict_str, conflict;
    Key => key_str, key;
    State => state_str, state;
    Decode => decode_str, decode;
    Connect => connect_str, connect;
    Configuration => configuration_str, configuration;
    Query => query_str, query;
}

impl Error {
    fn new(kind: ErrorKind, message: String, inner: Option<Inner>) -> Self {
        Error {
            message,
            kind,
            inner,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn inner(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.inner.as_deref()
    }

    /// Wrap the error returned by a `before_save` hook.
    pub fn hook(inner: BoxError) -> Self {
        let message = inner.to_string();
        Error::new(ErrorKind::Hook, message, Some(Arc::from(inner)))
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner
            .as_ref()
            .map(|err| err.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(inner: crate::config::ConfigError) -> Self {
        Error::configuration(inner)
    }
}

/// What operation prompted the error?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No document exists for the requested key.
    NotFound,

    /// The backend cannot perform the requested operation.
    Unsupported,

    /// A where-condition uses an operator the backend does not know.
    InvalidOperator,

    /// The requested aggregation is not supported as specified.
    Aggregation,

    /// A paging limit is out of range.
    Limit,

    /// A `before_save` hook refused the save.
    Hook,

    /// An insert collided with an existing document.
    Conflict,

    /// The entity's identity is missing or has the wrong shape.
    Key,

    /// The record is in a state that forbids the operation.
    State,

    /// Bad conversion from a stored document.
    Decode,

    /// Problems connecting to the backend.
    Connect,

    /// Missing or malformed configuration.
    Configuration,

    /// Backend error while executing a query.
    Query,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.message.fmt(f)
    }
}
