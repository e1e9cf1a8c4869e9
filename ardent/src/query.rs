//! The backend-neutral query model.
//!
//! A [`Query`] is built up through an [`ActiveRecord`](crate::ActiveRecord)
//! and handed to an adapter's `db_search`, which translates it into the
//! backend's own language.
//!
//! Where-conditions fold left to right: the logical operator on condition
//! N joins everything before it with condition N, so
//! `a, OR b, AND c` means `(a OR b) AND c`.  The operator on the first
//! condition is ignored, and a missing operator means AND.

use std::collections::BTreeMap;

use crate::value::{ToValue, Value};

/// How a condition compares a field with its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationalOperator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

impl std::fmt::Display for RelationalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            RelationalOperator::Eq => "EQ",
            RelationalOperator::Ne => "NE",
            RelationalOperator::Lt => "LT",
            RelationalOperator::Lte => "LTE",
            RelationalOperator::Gt => "GT",
            RelationalOperator::Gte => "GTE",
            RelationalOperator::In => "IN",
        })
    }
}

/// How a condition joins the conditions before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Aggregation {
    Sum,
    /// Reserved.  No backend supports grouping.
    Group,
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Aggregation::Sum => "SUM",
            Aggregation::Group => "GROUP",
        })
    }
}

/// A single where-condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub logical: Option<LogicalOperator>,
    pub key: String,
    pub relational: RelationalOperator,
    pub value: Value,
}

impl Condition {
    pub fn new<K: Into<String>, V: ToValue>(key: K, relational: RelationalOperator, value: V) -> Self {
        Condition {
            logical: None,
            key: key.into(),
            relational,
            value: value.to_value(),
        }
    }

    pub fn eq<K: Into<String>, V: ToValue>(key: K, value: V) -> Self {
        Condition::new(key, RelationalOperator::Eq, value)
    }

    pub fn ne<K: Into<String>, V: ToValue>(key: K, value: V) -> Self {
        Condition::new(key, RelationalOperator::Ne, value)
    }

    pub fn lt<K: Into<String>, V: ToValue>(key: K, value: V) -> Self {
        Condition::new(key, RelationalOperator::Lt, value)
    }

    pub fn lte<K: Into<String>, V: ToValue>(key: K, value: V) -> Self {
        Condition::new(key, RelationalOperator::Lte, value)
    }

    pub fn gt<K: Into<String>, V: ToValue>(key: K, value: V) -> Self {
        Condition::new(key, RelationalOperator::Gt, value)
    }

    pub fn gte<K: Into<String>, V: ToValue>(key: K, value: V) -> Self {
        Condition::new(key, RelationalOperator::Gte, value)
    }

    pub fn is_in<K: Into<String>, V: ToValue>(key: K, values: &[V]) -> Self {
        Condition::new(
            key,
            RelationalOperator::In,
            Value::List(values.iter().map(ToValue::to_value).collect()),
        )
    }

    /// Join this condition to the ones before it with AND.
    pub fn and(mut self) -> Self {
        self.logical = Some(LogicalOperator::And);
        self
    }

    /// Join this condition to the ones before it with OR.
    pub fn or(mut self) -> Self {
        self.logical = Some(LogicalOperator::Or);
        self
    }

    /// The effective logical operator; AND when unspecified.
    pub fn logical_operator(&self) -> LogicalOperator {
        self.logical.unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub key: String,
    pub sort_order: SortOrder,
}

impl OrderBy {
    pub fn asc<K: Into<String>>(key: K) -> Self {
        OrderBy {
            key: key.into(),
            sort_order: SortOrder::Asc,
        }
    }

    pub fn desc<K: Into<String>>(key: K) -> Self {
        OrderBy {
            key: key.into(),
            sort_order: SortOrder::Desc,
        }
    }
}

/// Accumulated query state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub plucks: Vec<String>,
    pub where_conditions: Vec<Condition>,
    pub order_bys: Vec<OrderBy>,
    pub aggregations: BTreeMap<Aggregation, Vec<String>>,
    pub distinct: bool,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Query::default()
    }

    /// The fields to sum, if a sum was requested.
    pub fn sum_fields(&self) -> Option<&[String]> {
        self.aggregations.get(&Aggregation::Sum).map(Vec::as_slice)
    }

    pub fn is_aggregate(&self) -> bool {
        !self.aggregations.is_empty()
    }
}

/// Fold conditions left to right with the given combinator.
///
/// `leaf` translates one condition and `join` combines the accumulated
/// expression with the next leaf.  Returns `None` for no conditions.
pub fn fold_conditions<T, E, L, J>(conditions: &[Condition], mut leaf: L, mut join: J) -> Result<Option<T>, E>
where
    L: FnMut(&Condition) -> Result<T, E>,
    J: FnMut(LogicalOperator, T, T) -> T,
{
    let mut acc = None;
    for condition in conditions {
        let next = leaf(condition)?;
        acc = Some(match acc {
            None => next,
            Some(prev) => join(condition.logical_operator(), prev, next),
        });
    }
    Ok(acc)
}

/// The single field a backend can sum, or the error it reports.
pub(crate) fn single_sum_field<'a>(backend: &str, fields: &'a [String]) -> Result<&'a str, crate::Error> {
    match fields {
        [field] => Ok(field.as_str()),
        [] => Err(crate::Error::aggregation_str("sum requires a field")),
        _ => Err(crate::Error::aggregation_str(format!(
            "{backend} does not support summing more than one field at a time: {fields:?}"
        ))),
    }
}

/// Reject aggregations other than a single-field sum.
pub(crate) fn check_aggregations(backend: &str, query: &Query) -> Result<Option<String>, crate::Error> {
    let mut sum = None;
    for (aggregation, fields) in &query.aggregations {
        match aggregation {
            Aggregation::Sum => sum = Some(single_sum_field(backend, fields)?.to_string()),
            other => {
                return Err(crate::Error::unsupported_str(format!(
                    "{backend} does not support the {other} aggregation"
                )))
            }
        }
    }
    Ok(sum)
}

#[cfg(test)]
mod test {
    use super::*;

    fn render(conditions: &[Condition]) -> Option<String> {
        fold_conditions::<_, (), _, _>(
            conditions,
            |c| Ok(c.key.clone()),
            |op, a, b| match op {
                LogicalOperator::And => format!("({a} AND {b})"),
                LogicalOperator::Or => format!("({a} OR {b})"),
            },
        )
        .unwrap()
    }

    #[test]
    fn fold_is_left_to_right() {
        let conditions = [
            Condition::eq("a", 1).or(),
            Condition::eq("b", 2).or(),
            Condition::eq("c", 3),
        ];
        assert_eq!(Some("((a OR b) AND c)".to_string()), render(&conditions));
    }

    #[test]
    fn fold_empty() {
        assert_eq!(None, render(&[]));
    }

    #[test]
    fn default_logical_operator_is_and() {
        assert_eq!(LogicalOperator::And, Condition::eq("a", 1).logical_operator());
        assert_eq!(LogicalOperator::Or, Condition::eq("a", 1).or().logical_operator());
    }

    #[test]
    fn membership_values_are_lists() {
        let c = Condition::is_in("year", &[2009, 2010]);
        assert_eq!(Value::List(vec![Value::Int(2009), Value::Int(2010)]), c.value);
    }

    #[test]
    fn sum_must_name_one_field() {
        let mut query = Query::new();
        query
            .aggregations
            .insert(Aggregation::Sum, vec!["year".into(), "price".into()]);
        let err = check_aggregations("sqlite", &query).unwrap_err();
        assert_eq!(crate::ErrorKind::Aggregation, err.kind());
        assert_eq!(
            r#"sqlite does not support summing more than one field at a time: ["year", "price"]"#,
            err.to_string()
        );
    }

    #[test]
    fn sum_without_a_field() {
        let mut query = Query::new();
        query.aggregations.insert(Aggregation::Sum, Vec::new());
        let err = check_aggregations("memory", &query).unwrap_err();
        assert_eq!(crate::ErrorKind::Aggregation, err.kind());
        assert_eq!("sum requires a field", err.to_string());
    }

    #[test]
    fn group_is_unsupported() {
        let mut query = Query::new();
        query.aggregations.insert(Aggregation::Group, vec!["make".into()]);
        let err = check_aggregations("memory", &query).unwrap_err();
        assert_eq!(crate::ErrorKind::Unsupported, err.kind());
    }
}
