//! Document-store filter expressions.
//!
//! Where-conditions fold into a [`Filter`] tree that can be evaluated
//! against [`Document`]s directly, or rendered as a JSON filter in the
//! style of document databases (`{"$and": [...]}`).

use std::cmp::Ordering;

use serde_json::json;

use crate::error::Error;
use crate::query::{fold_conditions, Condition, LogicalOperator, RelationalOperator};
use crate::value::{Document, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        key: String,
        op: RelationalOperator,
        value: Value,
    },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

impl Filter {
    /// Fold conditions left to right.  `None` means "match everything".
    pub fn from_conditions(conditions: &[Condition]) -> Result<Option<Filter>, Error> {
        fold_conditions(
            conditions,
            |c| {
                if c.relational != RelationalOperator::In && matches!(c.value, Value::List(_)) {
                    return Err(Error::invalid_operator_str(format!(
                        "invalid comparison operator: {} with a list value",
                        c.relational
                    )));
                }
                Ok(Filter::Compare {
                    key: c.key.clone(),
                    op: c.relational,
                    value: c.value.clone(),
                })
            },
            |op, acc, next| match op {
                LogicalOperator::And => Filter::And(Box::new(acc), Box::new(next)),
                LogicalOperator::Or => Filter::Or(Box::new(acc), Box::new(next)),
            },
        )
    }

    /// Evaluate against a document.  A missing field is null; ordering
    /// comparisons between incomparable values never match.
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::And(a, b) => a.matches(document) && b.matches(document),
            Filter::Or(a, b) => a.matches(document) || b.matches(document),
            Filter::Compare { key, op, value } => {
                let field = document.value(key).unwrap_or(&Value::Null);
                compare(field, *op, value)
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Filter::And(a, b) => json!({ "$and": [a.to_json(), b.to_json()] }),
            Filter::Or(a, b) => json!({ "$or": [a.to_json(), b.to_json()] }),
            Filter::Compare { key, op, value } => {
                let op = match op {
                    RelationalOperator::Eq => "$eq",
                    RelationalOperator::Ne => "$ne",
                    RelationalOperator::Lt => "$lt",
                    RelationalOperator::Lte => "$lte",
                    RelationalOperator::Gt => "$gt",
                    RelationalOperator::Gte => "$gte",
                    RelationalOperator::In => "$in",
                };
                let mut comparison = serde_json::Map::new();
                comparison.insert(op.to_string(), value.to_json());
                let mut field = serde_json::Map::new();
                field.insert(key.clone(), serde_json::Value::Object(comparison));
                serde_json::Value::Object(field)
            }
        }
    }
}

fn compare(field: &Value, op: RelationalOperator, value: &Value) -> bool {
    let ordering = field.compare(value);
    match op {
        RelationalOperator::Eq => ordering == Some(Ordering::Equal),
        RelationalOperator::Ne => ordering != Some(Ordering::Equal),
        RelationalOperator::Lt => ordering == Some(Ordering::Less),
        RelationalOperator::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        RelationalOperator::Gt => ordering == Some(Ordering::Greater),
        RelationalOperator::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        RelationalOperator::In => match value {
            Value::List(items) => items.iter().any(|item| field.compare(item) == Some(Ordering::Equal)),
            single => field.compare(single) == Some(Ordering::Equal),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn vehicle(make: &str, model: &str, year: i32) -> Document {
        let mut doc = Document::new();
        doc.insert("make", make);
        doc.insert("model", model);
        doc.insert("year", year);
        doc
    }

    #[test]
    fn conjunction() {
        let filter = Filter::from_conditions(&[
            Condition::eq("year", 2010),
            Condition::eq("model", "panamera"),
        ])
        .unwrap()
        .unwrap();

        assert!(filter.matches(&vehicle("porsche", "panamera", 2010)));
        assert!(!filter.matches(&vehicle("porsche", "cayenne", 2010)));
        assert!(!filter.matches(&vehicle("porsche", "panamera", 2009)));
    }

    #[test]
    fn disjunction_then_conjunction() {
        let filter = Filter::from_conditions(&[
            Condition::eq("make", "porsche"),
            Condition::eq("make", "tesla").or(),
            Condition::gt("year", 2009),
        ])
        .unwrap()
        .unwrap();

        assert!(filter.matches(&vehicle("tesla", "model s", 2012)));
        assert!(!filter.matches(&vehicle("tesla", "roadster", 2008)));
        assert!(!filter.matches(&vehicle("ford", "focus", 2012)));
    }

    #[test]
    fn membership_and_missing_fields() {
        let filter = Filter::from_conditions(&[Condition::is_in("year", &[2009, 2012])])
            .unwrap()
            .unwrap();
        assert!(filter.matches(&vehicle("tesla", "model s", 2012)));
        assert!(!filter.matches(&vehicle("tesla", "model s", 2010)));

        let filter = Filter::from_conditions(&[Condition::eq("color", Value::Null)])
            .unwrap()
            .unwrap();
        assert!(filter.matches(&vehicle("tesla", "model s", 2012)));

        let filter = Filter::from_conditions(&[Condition::lt("color", "red")])
            .unwrap()
            .unwrap();
        assert!(!filter.matches(&vehicle("tesla", "model s", 2012)));
    }

    #[test]
    fn no_conditions() {
        assert_eq!(None, Filter::from_conditions(&[]).unwrap());
    }

    #[test]
    fn json_rendering() {
        let filter = Filter::from_conditions(&[
            Condition::eq("year", 2010),
            Condition::lte("price", 1.5).or(),
        ])
        .unwrap()
        .unwrap();
        assert_eq!(
            json!({ "$or": [{ "year": { "$eq": 2010 } }, { "price": { "$lte": 1.5 } }] }),
            filter.to_json()
        );
    }
}
