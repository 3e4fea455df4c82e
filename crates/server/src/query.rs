//! JSON query DSL validation and translation.
//!
//! The DSL is a closed grammar over the registry's queryable fields:
//!
//! ```text
//! {}                                        everything
//! { field: value }                          equality
//! { field: { $gt: value } }                 relational ($eq $ne $gt $gte $lt $lte)
//! { field: { $in: [v, v] } }                list match ($in $nin)
//! { field: { $not: { $eq: value } } }       unary negation
//! { $or: [ {..}, {..} ] }                   logical ($or $and $nor)
//! ```
//!
//! Translation rewrites external JSON names to storage column names and
//! produces a parameterised SQL predicate. Only registry identifiers ever
//! reach the SQL text; user values travel as bind parameters. Any
//! structural violation is `ErrBadQuery`.

use chrono::DateTime;
use serde_json::{Map, Value};

use slogger_core::schema::{FieldKind, FieldSpec};
use slogger_core::{Error, Schema};

use crate::store::StoreQuery;

/// Translate a parsed query document into a store predicate.
pub fn translate(query: &Value) -> Result<StoreQuery, Error> {
    let Value::Object(map) = query else {
        return Err(Error::bad_query("primary query must be a map"));
    };
    let mut params = Vec::new();
    let predicate = translate_map(map, &mut params)?;
    Ok(StoreQuery { predicate, params })
}

fn translate_map(
    map: &Map<String, Value>,
    params: &mut Vec<rusqlite::types::Value>,
) -> Result<String, Error> {
    if map.is_empty() {
        return Ok("1".to_string());
    }
    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        if let Some(field) = Schema::global().field_by_json(key).filter(|f| f.queryable()) {
            clauses.push(field_clause(field, value, params)?);
        } else if key.starts_with('$') {
            let clause = match key.as_str() {
                "$or" => logical_clause(value, params, "OR", false)?,
                "$and" => logical_clause(value, params, "AND", false)?,
                "$nor" => logical_clause(value, params, "OR", true)?,
                _ => return Err(Error::bad_query("bad primary query operator")),
            };
            clauses.push(clause);
        } else {
            return Err(Error::bad_query(format!(
                "unknown or non-queryable field {key:?}"
            )));
        }
    }
    Ok(clauses.join(" AND "))
}

fn logical_clause(
    value: &Value,
    params: &mut Vec<rusqlite::types::Value>,
    joiner: &str,
    negate: bool,
) -> Result<String, Error> {
    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        _ => {
            return Err(Error::bad_query(
                "logical query operators must take a non-empty array",
            ))
        }
    };
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(map) = item else {
            return Err(Error::bad_query(
                "logical query operators must take an array consisting only of maps",
            ));
        };
        parts.push(format!("({})", translate_map(map, params)?));
    }
    let joined = parts.join(&format!(" {joiner} "));
    if negate {
        Ok(format!("NOT ({joined})"))
    } else {
        Ok(format!("({joined})"))
    }
}

fn field_clause(
    field: &FieldSpec,
    value: &Value,
    params: &mut Vec<rusqlite::types::Value>,
) -> Result<String, Error> {
    match value {
        Value::Object(op) => operator_clause(field, op, params),
        scalar => {
            params.push(scalar_param(field, scalar)?);
            Ok(format!("{} = ?", field.storage_name))
        }
    }
}

fn operator_clause(
    field: &FieldSpec,
    op: &Map<String, Value>,
    params: &mut Vec<rusqlite::types::Value>,
) -> Result<String, Error> {
    if op.len() != 1 {
        return Err(Error::bad_query(
            "secondary query operators are a map with exactly one key",
        ));
    }
    let (name, value) = op.iter().next().expect("map has one entry");
    let sql_op = match name.as_str() {
        "$eq" => "=",
        "$ne" => "<>",
        "$gt" => ">",
        "$gte" => ">=",
        "$lt" => "<",
        "$lte" => "<=",
        "$in" | "$nin" => return list_clause(field, name, value, params),
        "$not" => {
            let Value::Object(inner) = value else {
                return Err(Error::bad_query("unary query operators must take a map"));
            };
            let inner_clause = operator_clause(field, inner, params)?;
            return Ok(format!("NOT ({inner_clause})"));
        }
        _ => return Err(Error::bad_query("unknown secondary query operator")),
    };
    params.push(scalar_param(field, value)?);
    Ok(format!("{} {} ?", field.storage_name, sql_op))
}

fn list_clause(
    field: &FieldSpec,
    name: &str,
    value: &Value,
    params: &mut Vec<rusqlite::types::Value>,
) -> Result<String, Error> {
    let Value::Array(items) = value else {
        return Err(Error::bad_query("list match operators must take an array"));
    };
    if items.is_empty() {
        // IN () is not expressible in SQL; an empty list matches nothing
        // ($in) or everything ($nin).
        return Ok(if name == "$in" { "0" } else { "1" }.to_string());
    }
    for item in items {
        params.push(scalar_param(field, item)?);
    }
    let placeholders = vec!["?"; items.len()].join(", ");
    let op = if name == "$in" { "IN" } else { "NOT IN" };
    Ok(format!("{} {} ({})", field.storage_name, op, placeholders))
}

/// A DSL scalar as a bind parameter. Timestamp-kind fields coerce RFC 3339
/// text to the store's millisecond integers; other text passes through
/// unchanged (and simply matches nothing against a numeric column).
fn scalar_param(field: &FieldSpec, value: &Value) -> Result<rusqlite::types::Value, Error> {
    match value {
        Value::Bool(b) => Ok(rusqlite::types::Value::Integer(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(rusqlite::types::Value::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(rusqlite::types::Value::Real(f))
            } else {
                Err(Error::bad_query("unrepresentable number"))
            }
        }
        Value::String(s) => {
            if field.kind == FieldKind::Timestamp {
                if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                    return Ok(rusqlite::types::Value::Integer(t.timestamp_millis()));
                }
            }
            Ok(rusqlite::types::Value::Text(s.clone()))
        }
        _ => Err(Error::bad_query(
            "field values must be simple scalar values",
        )),
    }
}

/// One sort key, already rewritten to a storage column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: &'static str,
    pub descending: bool,
}

/// Parse a comma-separated sort specification of JSON field names with an
/// optional `-` (descending) or `+` (ascending) prefix.
pub fn parse_sort(spec: &str) -> Result<Vec<SortKey>, Error> {
    let mut keys = Vec::new();
    for part in spec.split(',') {
        let lowered = part.to_ascii_lowercase();
        let (descending, name) = match lowered.strip_prefix('-') {
            Some(stripped) => (true, stripped),
            None => (false, lowered.strip_prefix('+').unwrap_or(&lowered)),
        };
        let field = Schema::global()
            .field_by_json(name)
            .filter(|f| f.queryable())
            .ok_or_else(|| Error::bad_query("cannot parse sort"))?;
        keys.push(SortKey {
            column: field.storage_name,
            descending,
        });
    }
    Ok(keys)
}

/// Render an ORDER BY clause, always appending the store's intrinsic `id`
/// as the deterministic tie-breaker.
pub fn order_by_clause(keys: &[SortKey]) -> String {
    let mut parts: Vec<String> = keys
        .iter()
        .map(|k| {
            format!(
                "{} {}",
                k.column,
                if k.descending { "DESC" } else { "ASC" }
            )
        })
        .collect();
    parts.push("id ASC".to_string());
    parts.join(", ")
}
