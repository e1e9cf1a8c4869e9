//! Lucene query strings for hosted search services.

use crate::error::Error;
use crate::query::{fold_conditions, Condition, LogicalOperator, OrderBy, RelationalOperator};
use crate::value::Value;

/// The query matching every document.
pub const MATCH_ALL: &str = "*";

fn term(value: &Value) -> Result<String, Error> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => quote(s),
        Value::Timestamp(t) => quote(&t.to_rfc3339()),
        Value::List(_) => {
            return Err(Error::invalid_operator_str(
                "invalid comparison operator: list values are not searchable",
            ))
        }
    })
}

fn quote(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn clause(condition: &Condition) -> Result<String, Error> {
    let key = &condition.key;
    if matches!(condition.relational, RelationalOperator::Ne | RelationalOperator::In) {
        return Err(Error::invalid_operator_str(format!(
            "invalid comparison operator: {}",
            condition.relational
        )));
    }
    let value = term(&condition.value)?;
    Ok(match condition.relational {
        RelationalOperator::Gt => format!("{key}:{{{value} TO *}}"),
        RelationalOperator::Gte => format!("{key}:[{value} TO *]"),
        RelationalOperator::Lt => format!("{key}:{{* TO {value}}}"),
        RelationalOperator::Lte => format!("{key}:[* TO {value}]"),
        _ => format!("{key}:{value}"),
    })
}

/// Fold where-conditions into a query string.  No conditions yields
/// [`MATCH_ALL`].
pub fn query_string(conditions: &[Condition]) -> Result<String, Error> {
    let folded = fold_conditions(
        conditions,
        |condition| clause(condition).map(|text| (text, false)),
        |op, (acc, composite), (next, _)| {
            let op = match op {
                LogicalOperator::And => "AND",
                LogicalOperator::Or => "OR",
            };
            let acc = if composite { format!("({acc})") } else { acc };
            (format!("{acc} {op} {next}"), true)
        },
    )?;
    Ok(folded.map_or_else(|| MATCH_ALL.to_string(), |(text, _)| text))
}

/// The sort parameter, `value.<key>:<asc|desc>` joined by commas.
pub fn sort_string(order_bys: &[OrderBy]) -> Option<String> {
    if order_bys.is_empty() {
        return None;
    }
    let sorts: Vec<_> = order_bys
        .iter()
        .map(|o| format!("value.{}:{}", o.key, o.sort_order.as_str()))
        .collect();
    Some(sorts.join(","))
}
