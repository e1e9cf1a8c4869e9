//! Field validation.
//!
//! A [`Validation`] collects [`ValidationError`]s during one pass over an
//! entity.  Each rule method checks a value against a [`Validator`] and,
//! when it is not satisfied, records an error under the given key with
//! the validator's default message.  The returned [`ValidationResult`]
//! can replace that message:
//!
//! ```
//! use ardent::validation::Validation;
//!
//! let mut v = Validation::new();
//! v.required("make", "");
//! v.min("year", &1885, 1886).message("cars did not exist yet");
//!
//! assert_eq!(2, v.num_errors());
//! assert_eq!("Required", v.error_map()["make"].message);
//! assert_eq!("cars did not exist yet", v.error_map()["year"].message);
//! ```

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

/// A failed rule: which field, and what was wrong with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub key: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.message.fmt(f)
    }
}

/// The outcome of a single rule.
#[derive(Debug)]
pub struct ValidationResult<'a> {
    pub ok: bool,
    pub error: Option<&'a mut ValidationError>,
}

impl<'a> ValidationResult<'a> {
    /// Replace the message of the recorded error, if there is one.
    pub fn message<S: Into<String>>(self, message: S) -> Self {
        let ValidationResult { ok, error } = self;
        let error = error.map(|error| {
            error.message = message.into();
            error
        });
        ValidationResult { ok, error }
    }
}

/// The error context for one validation pass.
#[derive(Debug, Clone, Default)]
pub struct Validation {
    errors: Vec<ValidationError>,
}

impl Validation {
    pub fn new() -> Self {
        Validation::default()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn num_errors(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// The errors keyed by field.  When a field failed more than one
    /// rule, the first recorded error is kept.
    pub fn error_map(&self) -> BTreeMap<String, ValidationError> {
        let mut map = BTreeMap::new();
        for error in &self.errors {
            map.entry(error.key.clone()).or_insert_with(|| error.clone());
        }
        map
    }

    /// Record a custom error.
    pub fn error<K: Into<String>, M: Into<String>>(&mut self, key: K, message: M) -> ValidationResult<'_> {
        self.push(key.into(), message.into())
    }

    pub fn required<V: Validatable + ?Sized>(&mut self, key: &str, value: &V) -> ValidationResult<'_> {
        self.apply(key, value, &Required)
    }

    pub fn min<V: Validatable + ?Sized>(&mut self, key: &str, value: &V, min: i64) -> ValidationResult<'_> {
        self.apply(key, value, &Min(min))
    }

    pub fn max<V: Validatable + ?Sized>(&mut self, key: &str, value: &V, max: i64) -> ValidationResult<'_> {
        self.apply(key, value, &Max(max))
    }

    pub fn range<V: Validatable + ?Sized>(
        &mut self,
        key: &str,
        value: &V,
        min: i64,
        max: i64,
    ) -> ValidationResult<'_> {
        self.apply(key, value, &Range(Min(min), Max(max)))
    }

    pub fn min_size<V: Validatable + ?Sized>(&mut self, key: &str, value: &V, min: usize) -> ValidationResult<'_> {
        self.apply(key, value, &MinSize(min))
    }

    pub fn max_size<V: Validatable + ?Sized>(&mut self, key: &str, value: &V, max: usize) -> ValidationResult<'_> {
        self.apply(key, value, &MaxSize(max))
    }

    pub fn length<V: Validatable + ?Sized>(&mut self, key: &str, value: &V, n: usize) -> ValidationResult<'_> {
        self.apply(key, value, &Length(n))
    }

    pub fn matches<V: Validatable + ?Sized>(&mut self, key: &str, value: &V, regex: &Regex) -> ValidationResult<'_> {
        self.apply(key, value, &Match(regex.clone()))
    }

    pub fn email<V: Validatable + ?Sized>(&mut self, key: &str, value: &V) -> ValidationResult<'_> {
        self.apply(key, value, &Email)
    }

    /// Apply validators in order, stopping at the first one that fails.
    pub fn check<V: Validatable + ?Sized>(
        &mut self,
        key: &str,
        value: &V,
        validators: &[&dyn Validator],
    ) -> ValidationResult<'_> {
        let value: &dyn Validatable = &value;
        let failed = validators.iter().find(|v| !v.is_satisfied(value));
        match failed {
            Some(validator) => self.push(key.to_string(), validator.default_message()),
            None => ValidationResult {
                ok: true,
                error: None,
            },
        }
    }

    fn apply<V: Validatable + ?Sized>(&mut self, key: &str, value: &V, validator: &dyn Validator) -> ValidationResult<'_> {
        self.check(key, value, &[validator])
    }

    fn push(&mut self, key: String, message: String) -> ValidationResult<'_> {
        self.errors.push(ValidationError { key, message });
        ValidationResult {
            ok: false,
            error: self.errors.last_mut(),
        }
    }
}

/// A value a [`Validator`] can inspect.
pub trait Validatable {
    /// Whether the value counts as present for [`Required`].
    fn is_present(&self) -> bool;

    /// Length for strings (in characters) and lists.
    fn size(&self) -> Option<usize> {
        None
    }

    fn number(&self) -> Option<f64> {
        None
    }

    fn text(&self) -> Option<&str> {
        None
    }
}

impl Validatable for str {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }

    fn size(&self) -> Option<usize> {
        Some(self.chars().count())
    }

    fn text(&self) -> Option<&str> {
        Some(self)
    }
}

impl Validatable for String {
    fn is_present(&self) -> bool {
        self.as_str().is_present()
    }

    fn size(&self) -> Option<usize> {
        self.as_str().size()
    }

    fn text(&self) -> Option<&str> {
        Some(self)
    }
}

impl Validatable for bool {
    fn is_present(&self) -> bool {
        *self
    }
}

macro_rules! numeric_validatable {
    ($($ty:ty),*) => {
        $(
            impl Validatable for $ty {
                fn is_present(&self) -> bool {
                    *self != (0 as $ty)
                }

                fn number(&self) -> Option<f64> {
                    Some(*self as f64)
                }
            }
        )*
    };
}

numeric_validatable!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

impl Validatable for DateTime<Utc> {
    fn is_present(&self) -> bool {
        self.timestamp() != 0 || self.timestamp_subsec_nanos() != 0
    }
}

impl<T: Validatable> Validatable for Option<T> {
    fn is_present(&self) -> bool {
        self.as_ref().is_some_and(Validatable::is_present)
    }

    fn size(&self) -> Option<usize> {
        self.as_ref().and_then(Validatable::size)
    }

    fn number(&self) -> Option<f64> {
        self.as_ref().and_then(Validatable::number)
    }

    fn text(&self) -> Option<&str> {
        self.as_ref().and_then(Validatable::text)
    }
}

impl<T> Validatable for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }

    fn size(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl<T: Validatable + ?Sized> Validatable for &T {
    fn is_present(&self) -> bool {
        (**self).is_present()
    }

    fn size(&self) -> Option<usize> {
        (**self).size()
    }

    fn number(&self) -> Option<f64> {
        (**self).number()
    }

    fn text(&self) -> Option<&str> {
        (**self).text()
    }
}

/// A single validation rule.
pub trait Validator {
    fn is_satisfied(&self, value: &dyn Validatable) -> bool;
    fn default_message(&self) -> String;
}

/// The value is non-empty, non-zero, or true.
#[derive(Debug, Clone, Copy)]
pub struct Required;

impl Validator for Required {
    fn is_satisfied(&self, value: &dyn Validatable) -> bool {
        value.is_present()
    }

    fn default_message(&self) -> String {
        "Required".to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Min(pub i64);

impl Validator for Min {
    fn is_satisfied(&self, value: &dyn Validatable) -> bool {
        value.number().is_some_and(|n| n >= self.0 as f64)
    }

    fn default_message(&self) -> String {
        format!("Minimum is {}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Max(pub i64);

impl Validator for Max {
    fn is_satisfied(&self, value: &dyn Validatable) -> bool {
        value.number().is_some_and(|n| n <= self.0 as f64)
    }

    fn default_message(&self) -> String {
        format!("Maximum is {}", self.0)
    }
}

/// Inclusive on both ends.
#[derive(Debug, Clone, Copy)]
pub struct Range(pub Min, pub Max);

impl Validator for Range {
    fn is_satisfied(&self, value: &dyn Validatable) -> bool {
        self.0.is_satisfied(value) && self.1.is_satisfied(value)
    }

    fn default_message(&self) -> String {
        format!("Range is {} to {}", (self.0).0, (self.1).0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MinSize(pub usize);

impl Validator for MinSize {
    fn is_satisfied(&self, value: &dyn Validatable) -> bool {
        value.size().is_some_and(|n| n >= self.0)
    }

    fn default_message(&self) -> String {
        format!("Minimum size is {}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaxSize(pub usize);

impl Validator for MaxSize {
    fn is_satisfied(&self, value: &dyn Validatable) -> bool {
        value.size().is_some_and(|n| n <= self.0)
    }

    fn default_message(&self) -> String {
        format!("Maximum size is {}", self.0)
    }
}

/// Exact size.
#[derive(Debug, Clone, Copy)]
pub struct Length(pub usize);

impl Validator for Length {
    fn is_satisfied(&self, value: &dyn Validatable) -> bool {
        value.size() == Some(self.0)
    }

    fn default_message(&self) -> String {
        format!("Required length is {}", self.0)
    }
}

/// The whole text matches the expression somewhere.
#[derive(Debug, Clone)]
pub struct Match(pub Regex);

impl Validator for Match {
    fn is_satisfied(&self, value: &dyn Validatable) -> bool {
        value.text().is_some_and(|s| self.0.is_match(s))
    }

    fn default_message(&self) -> String {
        format!("Must match {}", self.0)
    }
}

fn email_pattern() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

    EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[\w!#$%&'*+/=?^`{|}~-]+(?:\.[\w!#$%&'*+/=?^`{|}~-]+)*@(?:\w(?:[\w-]*\w)?\.)+[a-zA-Z0-9](?:[\w-]*\w)?$")
            .expect("failed to compile email regex")
    })
}

#[derive(Debug, Clone, Copy)]
pub struct Email;

impl Validator for Email {
    fn is_satisfied(&self, value: &dyn Validatable) -> bool {
        value.text().is_some_and(|s| email_pattern().is_match(s))
    }

    fn default_message(&self) -> String {
        "Must be a valid email address".to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn required() {
        let mut v = Validation::new();
        assert!(v.required("make", "tesla").ok);
        assert!(v.required("year", &2009).ok);
        assert!(!v.required("model", "").ok);
        assert!(!v.required("year", &0).ok);
        assert!(!v.required("color", &None::<String>).ok);
        assert!(!v.required("tags", &Vec::<String>::new()).ok);
        assert_eq!(4, v.num_errors());
        assert!(v.errors().iter().all(|e| e.message == "Required"));
    }

    #[test]
    fn first_error_per_key_wins() {
        let mut v = Validation::new();
        v.required("model", "");
        v.min_size("model", "", 2);
        v.error("make", "unknown manufacturer");

        let map = v.error_map();
        assert_eq!(3, v.num_errors());
        assert_eq!(2, map.len());
        assert_eq!("Required", map["model"].message);
        assert_eq!("unknown manufacturer", map["make"].message);
    }

    #[test]
    fn numeric_bounds() {
        let mut v = Validation::new();
        assert!(v.min("year", &2009, 2009).ok);
        assert!(v.max("year", &2009, 2009).ok);
        assert!(v.range("year", &2010, 2000, 2020).ok);
        assert!(!v.has_errors());

        let r = v.range("year", &1999, 2000, 2020);
        assert!(!r.ok);
        assert_eq!("Range is 2000 to 2020", r.error.unwrap().message);
        assert_eq!("Minimum is 1", v.min("doors", &0, 1).error.unwrap().message);
        assert_eq!("Maximum is 5", v.max("doors", &6, 5).error.unwrap().message);
    }

    #[test]
    fn sizes() {
        let mut v = Validation::new();
        assert!(v.min_size("model", "model s", 7).ok);
        assert!(v.max_size("model", "model s", 7).ok);
        assert!(v.length("vin", "1HGCM82633A004352", 17).ok);
        assert!(v.length("tags", &vec![1, 2], 2).ok);
        assert!(!v.has_errors());

        assert_eq!(
            "Required length is 17",
            v.length("vin", "123", 17).error.unwrap().message
        );
        assert!(!v.max_size("model", "panamera", 3).ok);
        assert_eq!(2, v.num_errors());
    }

    #[test]
    fn patterns() {
        let plate = Regex::new(r"^[A-Z]{3}-\d{4}$").unwrap();
        let mut v = Validation::new();
        assert!(v.matches("plate", "ABC-1234", &plate).ok);
        assert!(!v.matches("plate", "abc", &plate).ok);
        assert!(v.email("owner", "driver@example.com").ok);
        assert!(!v.email("owner", "not an email").ok);
        assert_eq!(
            "Must be a valid email address",
            v.error_map()["owner"].message
        );
    }

    #[test]
    fn check_stops_at_first_failure() {
        let mut v = Validation::new();
        let r = v.check("model", "", &[&Required, &MinSize(2)]);
        assert!(!r.ok);
        assert_eq!(1, v.num_errors());

        assert!(v.check("model", "cayenne", &[&Required, &MinSize(2)]).ok);
    }

    #[test]
    fn message_override() {
        let mut v = Validation::new();
        v.required("make", "").message("make is required");
        assert_eq!("make is required", v.errors()[0].message);

        v.clear();
        assert!(!v.has_errors());
        assert_eq!(0, v.num_errors());
    }
}
