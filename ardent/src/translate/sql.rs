//! SQL generation.
//!
//! Statements are rendered as text plus an ordered list of parameters,
//! with placeholders and identifier quoting chosen by a [`Dialect`].

use crate::error::Error;
use crate::query::{check_aggregations, fold_conditions, Condition, LogicalOperator, Query, RelationalOperator};
use crate::value::{Document, Key, Value};

/// How a dialect writes parameter placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1, $2, ...`
    Dollar,
    /// `?1, ?2, ...`
    NumberedQuestion,
    /// `?, ?, ...`
    Question,
}

/// The differences between SQL backends that matter here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub name: &'static str,
    pub placeholder: Placeholder,
    pub quote: char,
    /// Type to cast sums to so every driver reads them as a float.
    pub sum_cast: Option<&'static str>,
    /// Whether inserts can return the generated key.
    pub returning: bool,
    /// Whether the backend has `TRUNCATE TABLE`.
    pub truncate: bool,
    /// How a stored procedure returning rows is invoked, if the backend
    /// has them.
    pub procedure_call: Option<&'static str>,
}

pub const SQLITE: Dialect = Dialect {
    name: "sqlite",
    placeholder: Placeholder::NumberedQuestion,
    quote: '"',
    sum_cast: None,
    returning: false,
    truncate: false,
    procedure_call: None,
};

pub const POSTGRES: Dialect = Dialect {
    name: "postgresql",
    placeholder: Placeholder::Dollar,
    quote: '"',
    sum_cast: Some("DOUBLE PRECISION"),
    returning: true,
    truncate: true,
    procedure_call: Some("SELECT * FROM"),
};

pub const MYSQL: Dialect = Dialect {
    name: "mysql",
    placeholder: Placeholder::Question,
    quote: '`',
    sum_cast: Some("DOUBLE"),
    returning: false,
    truncate: true,
    procedure_call: Some("CALL"),
};

/// The column a sum is returned in.
pub const SUM_COLUMN: &str = "sum";

/// Rendered SQL and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub text: String,
    pub params: Vec<Value>,
}

impl std::fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.text.fmt(f)
    }
}

impl SqlStatement {
    /// Trace the statement before it runs.  Connections whose profile
    /// sets `debug` log at info level.
    pub(crate) fn trace(&self, backend: &str, model: &str, verbose: bool) {
        if verbose {
            tracing::info!(backend, model, query = %self.text, params = self.params.len(), "statement");
        } else {
            tracing::debug!(backend, model, query = %self.text, params = self.params.len(), "statement");
        }
    }
}

struct Builder {
    dialect: Dialect,
    text: String,
    params: Vec<Value>,
}

impl Builder {
    fn new(dialect: Dialect) -> Self {
        Builder {
            dialect,
            text: String::new(),
            params: vec![],
        }
    }

    fn finish(self) -> SqlStatement {
        SqlStatement {
            text: self.text,
            params: self.params,
        }
    }
}

impl Dialect {
    pub fn quote_ident(&self, ident: &str) -> String {
        let q = self.quote;
        let mut doubled = String::with_capacity(2);
        doubled.push(q);
        doubled.push(q);
        format!("{q}{}{q}", ident.replace(q, &doubled))
    }

    fn placeholder(&self, n: usize) -> String {
        match self.placeholder {
            Placeholder::Dollar => format!("${n}"),
            Placeholder::NumberedQuestion => format!("?{n}"),
            Placeholder::Question => "?".to_string(),
        }
    }
}

fn bind(dialect: &Dialect, params: &mut Vec<Value>, value: Value) -> String {
    params.push(value);
    dialect.placeholder(params.len())
}

fn condition_sql(dialect: &Dialect, params: &mut Vec<Value>, condition: &Condition) -> Result<String, Error> {
    let column = dialect.quote_ident(&condition.key);
    let op = match condition.relational {
        RelationalOperator::Eq if condition.value.is_null() => return Ok(format!("{column} IS NULL")),
        RelationalOperator::Ne if condition.value.is_null() => {
            return Ok(format!("{column} IS NOT NULL"))
        }
        RelationalOperator::Eq => "=",
        RelationalOperator::Ne => "<>",
        RelationalOperator::Lt => "<",
        RelationalOperator::Lte => "<=",
        RelationalOperator::Gt => ">",
        RelationalOperator::Gte => ">=",
        RelationalOperator::In => {
            let items = match &condition.value {
                Value::List(items) => items.clone(),
                other => vec![other.clone()],
            };
            if items.is_empty() {
                return Ok("(1 = 0)".to_string());
            }
            let placeholders: Vec<_> = items
                .into_iter()
                .map(|item| bind(dialect, params, item))
                .collect();
            return Ok(format!("{column} IN ({})", placeholders.join(", ")));
        }
    };
    if matches!(condition.value, Value::List(_)) {
        return Err(Error::invalid_operator_str(format!(
            "invalid comparison operator: {} with a list value",
            condition.relational
        )));
    }
    let placeholder = bind(dialect, params, condition.value.clone());
    Ok(format!("{column} {op} {placeholder}"))
}

fn where_clause(builder: &mut Builder, conditions: &[Condition]) -> Result<(), Error> {
    let dialect = builder.dialect;
    let params = &mut builder.params;
    let expr = fold_conditions(
        conditions,
        |condition| condition_sql(&dialect, params, condition),
        |op, acc, next| match op {
            LogicalOperator::And => format!("({acc} AND {next})"),
            LogicalOperator::Or => format!("({acc} OR {next})"),
        },
    )?;
    if let Some(expr) = expr {
        builder.text.push_str(" WHERE ");
        builder.text.push_str(&expr);
    }
    Ok(())
}

/// A search over one table.
pub fn select(dialect: &Dialect, table: &str, query: &Query) -> Result<SqlStatement, Error> {
    let sum = check_aggregations(dialect.name, query)?;
    let mut builder = Builder::new(*dialect);

    builder.text.push_str("SELECT ");
    match &sum {
        Some(field) => {
            let distinct = if query.distinct { "DISTINCT " } else { "" };
            let expr = format!("SUM({distinct}{})", dialect.quote_ident(field));
            let expr = match dialect.sum_cast {
                Some(ty) => format!("CAST({expr} AS {ty})"),
                None => expr,
            };
            builder.text.push_str(&expr);
            builder.text.push_str(" AS ");
            builder.text.push_str(&dialect.quote_ident(SUM_COLUMN));
        }
        None => {
            if query.distinct {
                builder.text.push_str("DISTINCT ");
            }
            if query.plucks.is_empty() {
                builder.text.push('*');
            } else {
                let columns: Vec<_> = query.plucks.iter().map(|p| dialect.quote_ident(p)).collect();
                builder.text.push_str(&columns.join(", "));
            }
        }
    }

    builder.text.push_str(" FROM ");
    builder.text.push_str(&dialect.quote_ident(table));

    where_clause(&mut builder, &query.where_conditions)?;

    if sum.is_none() && !query.order_bys.is_empty() {
        let orders: Vec<_> = query
            .order_bys
            .iter()
            .map(|o| format!("{} {}", dialect.quote_ident(&o.key), o.sort_order.as_str().to_uppercase()))
            .collect();
        builder.text.push_str(" ORDER BY ");
        builder.text.push_str(&orders.join(", "));
    }

    Ok(builder.finish())
}

/// A point lookup by key.
pub fn find(dialect: &Dialect, table: &str, key_field: &str, key: &Key) -> SqlStatement {
    let mut builder = Builder::new(*dialect);
    let placeholder = bind(dialect, &mut builder.params, key.to_value());
    builder.text = format!(
        "SELECT * FROM {} WHERE {} = {placeholder}",
        dialect.quote_ident(table),
        dialect.quote_ident(key_field),
    );
    builder.finish()
}

/// A page of rows in key order.
pub fn all(
    dialect: &Dialect,
    table: &str,
    key_field: &str,
    limit: u32,
    after_key: Option<&Key>,
    start_key: Option<&Key>,
) -> SqlStatement {
    let mut builder = Builder::new(*dialect);
    let key_column = dialect.quote_ident(key_field);
    builder.text = format!("SELECT * FROM {}", dialect.quote_ident(table));

    let bound = match (after_key, start_key) {
        (Some(key), _) => Some((">", key)),
        (None, Some(key)) => Some((">=", key)),
        (None, None) => None,
    };
    if let Some((op, key)) = bound {
        let placeholder = bind(dialect, &mut builder.params, key.to_value());
        builder.text.push_str(&format!(" WHERE {key_column} {op} {placeholder}"));
    }

    builder.text.push_str(&format!(" ORDER BY {key_column} ASC LIMIT {limit}"));
    builder.finish()
}

/// Insert a document.  With `RETURNING` support, the key comes back as
/// the only column.
pub fn insert(dialect: &Dialect, table: &str, key_field: &str, document: &Document) -> SqlStatement {
    let mut builder = Builder::new(*dialect);
    let table = dialect.quote_ident(table);

    if document.is_empty() {
        builder.text = match dialect.placeholder {
            Placeholder::Question => format!("INSERT INTO {table} () VALUES ()"),
            _ => format!("INSERT INTO {table} DEFAULT VALUES"),
        };
    } else {
        let mut columns = vec![];
        let mut placeholders = vec![];
        for (field, value) in document.iter() {
            columns.push(dialect.quote_ident(field));
            placeholders.push(bind(dialect, &mut builder.params, value.clone()));
        }
        builder.text = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
    }

    if dialect.returning {
        builder.text.push_str(" RETURNING ");
        builder.text.push_str(&dialect.quote_ident(key_field));
    }

    builder.finish()
}

/// Replace the stored fields of the row with the given key.
pub fn update(dialect: &Dialect, table: &str, key_field: &str, key: &Key, document: &Document) -> SqlStatement {
    let mut builder = Builder::new(*dialect);

    let mut assignments = vec![];
    for (field, value) in document.iter().filter(|(field, _)| *field != key_field) {
        let placeholder = bind(dialect, &mut builder.params, value.clone());
        assignments.push(format!("{} = {placeholder}", dialect.quote_ident(field)));
    }
    let key_column = dialect.quote_ident(key_field);
    if assignments.is_empty() {
        assignments.push(format!("{key_column} = {key_column}"));
    }
    let placeholder = bind(dialect, &mut builder.params, key.to_value());

    builder.text = format!(
        "UPDATE {} SET {} WHERE {key_column} = {placeholder}",
        dialect.quote_ident(table),
        assignments.join(", "),
    );
    builder.finish()
}

pub fn delete(dialect: &Dialect, table: &str, key_field: &str, key: &Key) -> SqlStatement {
    let mut builder = Builder::new(*dialect);
    let placeholder = bind(dialect, &mut builder.params, key.to_value());
    builder.text = format!(
        "DELETE FROM {} WHERE {} = {placeholder}",
        dialect.quote_ident(table),
        dialect.quote_ident(key_field),
    );
    builder.finish()
}

pub fn truncate(dialect: &Dialect, table: &str) -> SqlStatement {
    let table = dialect.quote_ident(table);
    let text = if dialect.truncate {
        format!("TRUNCATE TABLE {table}")
    } else {
        format!("DELETE FROM {table}")
    };
    SqlStatement { text, params: vec![] }
}

/// Invoke a stored procedure that returns a result set, binding the
/// arguments positionally.
pub fn call(dialect: &Dialect, procedure: &str, args: &[Value]) -> Result<SqlStatement, Error> {
    let prefix = dialect.procedure_call.ok_or_else(|| {
        Error::unsupported_str(format!("{} does not support stored procedures", dialect.name))
    })?;

    let mut builder = Builder::new(*dialect);
    let placeholders: Vec<_> = args
        .iter()
        .map(|arg| bind(dialect, &mut builder.params, arg.clone()))
        .collect();
    builder.text = format!(
        "{prefix} {}({})",
        dialect.quote_ident(procedure),
        placeholders.join(", ")
    );
    Ok(builder.finish())
}

/// Caller-written SQL, run as is.
pub fn raw(text: &str, params: &[Value]) -> SqlStatement {
    SqlStatement {
        text: text.to_string(),
        params: params.to_vec(),
    }
}
