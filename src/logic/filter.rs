//! Payload filter compiler.
//!
//! A client filter is a JSON object of `field -> value` constraints, all ANDed,
//! equality only:
//!
//! - a bare key (`{"status": "done"}`) compares the payload's top-level value as
//!   text, like `data ->> 'status' = 'done'`;
//! - a dotted key (`{"meta.owner.name": "ann"}`) compares the JSON value found
//!   at that path, like `data #> '{meta,owner,name}' = '"ann"'::jsonb`.
//!
//! Keys and values only ever reach SQL as bound parameters.

use serde_json::{Map, Value};
use sqlx::{Postgres, QueryBuilder};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum FilterConstraint {
    /// Top-level key compared as text. A `null` value matches nothing.
    Field { key: String, value: Option<String> },
    /// Nested location compared as JSON.
    Path { path: Vec<String>, value: Value },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadFilter {
    constraints: Vec<FilterConstraint>,
}

/// Text form of a JSON value as the `->>` operator renders it.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl PayloadFilter {
    /// Compile the raw `filter` query parameter.
    pub fn compile(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| Error::InvalidFilter(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(Error::InvalidFilter(
                "filter must be a JSON object".to_string(),
            ));
        };

        let mut constraints = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            if key.contains('.') {
                let path: Vec<String> = key.split('.').map(str::to_string).collect();
                if path.iter().any(|segment| segment.is_empty()) {
                    return Err(Error::InvalidFilter(format!(
                        "empty segment in path '{}'",
                        key
                    )));
                }
                constraints.push(FilterConstraint::Path { path, value });
            } else {
                let value = as_text(&value);
                constraints.push(FilterConstraint::Field { key, value });
            }
        }

        Ok(Self { constraints })
    }

    pub fn constraints(&self) -> &[FilterConstraint] {
        &self.constraints
    }

    /// Append one ` AND ...` predicate per constraint against the `data` column.
    pub fn push_sql(&self, query: &mut QueryBuilder<'_, Postgres>) {
        for constraint in &self.constraints {
            match constraint {
                FilterConstraint::Field { key, value } => {
                    query.push(" AND data ->> ");
                    query.push_bind(key.clone());
                    query.push(" = ");
                    query.push_bind(value.clone());
                }
                FilterConstraint::Path { path, value } => {
                    query.push(" AND data #> ");
                    query.push_bind(path.clone());
                    query.push(" = ");
                    query.push_bind(value.clone());
                }
            }
        }
    }

    /// Evaluate the filter against a payload in memory, with the same
    /// semantics as the SQL rendering.
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        self.constraints.iter().all(|constraint| match constraint {
            FilterConstraint::Field { key, value } => match (data.get(key), value) {
                (Some(stored), Some(expected)) => as_text(stored).as_ref() == Some(expected),
                _ => false,
            },
            FilterConstraint::Path { path, value } => {
                lookup_path(data, path).map_or(false, |found| jsonb_eq(found, value))
            }
        })
    }
}

/// Equality as jsonb `=` sees it: numbers by value, containers element-wise.
fn jsonb_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b || a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| jsonb_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).map_or(false, |y| jsonb_eq(x, y)))
        }
        _ => left == right,
    }
}

/// Walk a payload like `#>` does: object keys by name, array elements by index.
fn lookup_path<'a>(data: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = data.get(first)?;
    for segment in rest {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    #[test]
    fn bare_keys_compare_as_text() {
        let filter = PayloadFilter::compile(r#"{"status": "done"}"#).unwrap();
        assert!(filter.matches(&payload(json!({ "status": "done", "x": 1 }))));
        assert!(!filter.matches(&payload(json!({ "status": "pending" }))));
        assert!(!filter.matches(&payload(json!({}))));

        let numeric = PayloadFilter::compile(r#"{"priority": 1, "urgent": true}"#).unwrap();
        assert!(numeric.matches(&payload(json!({ "priority": 1, "urgent": true }))));
        assert!(numeric.matches(&payload(json!({ "priority": "1", "urgent": "true" }))));
    }

    #[test]
    fn dotted_keys_compare_nested_json() {
        let filter = PayloadFilter::compile(r#"{"meta.owner.name": "ann"}"#).unwrap();
        assert_eq!(
            filter.constraints(),
            &[FilterConstraint::Path {
                path: vec!["meta".into(), "owner".into(), "name".into()],
                value: json!("ann"),
            }]
        );
        assert!(filter.matches(&payload(json!({ "meta": { "owner": { "name": "ann" } } }))));
        assert!(!filter.matches(&payload(json!({ "meta": { "owner": { "name": "bob" } } }))));
        assert!(!filter.matches(&payload(json!({ "meta": "ann" }))));

        let indexed = PayloadFilter::compile(r#"{"tags.0": "red"}"#).unwrap();
        assert!(indexed.matches(&payload(json!({ "tags": ["red", "blue"] }))));
    }

    #[test]
    fn dotted_keys_compare_numbers_by_value() {
        let float = PayloadFilter::compile(r#"{"meta.level": 2.0}"#).unwrap();
        assert!(float.matches(&payload(json!({ "meta": { "level": 2 } }))));
        assert!(!float.matches(&payload(json!({ "meta": { "level": 2.5 } }))));

        let nested = PayloadFilter::compile(r#"{"meta.dims": [1, {"w": 2}]}"#).unwrap();
        assert!(nested.matches(&payload(json!({ "meta": { "dims": [1.0, { "w": 2.0 }] } }))));
        assert!(!nested.matches(&payload(json!({ "meta": { "dims": [1, { "w": 3 }] } }))));
    }

    #[test]
    fn constraints_are_anded() {
        let filter = PayloadFilter::compile(r#"{"status": "done", "meta.level": 2}"#).unwrap();
        assert!(filter.matches(&payload(json!({ "status": "done", "meta": { "level": 2 } }))));
        assert!(!filter.matches(&payload(json!({ "status": "done", "meta": { "level": 3 } }))));
    }

    #[test]
    fn null_values_match_nothing() {
        let filter = PayloadFilter::compile(r#"{"status": null}"#).unwrap();
        assert!(!filter.matches(&payload(json!({ "status": null }))));
    }

    #[test]
    fn malformed_filters_are_rejected() {
        assert!(matches!(
            PayloadFilter::compile("{status: done"),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            PayloadFilter::compile("[1, 2]"),
            Err(Error::InvalidFilter(_))
        ));
        assert!(matches!(
            PayloadFilter::compile(r#"{"a..b": 1}"#),
            Err(Error::InvalidFilter(_))
        ));
    }

    #[test]
    fn values_are_bound_not_interpolated() {
        let filter =
            PayloadFilter::compile(r#"{"name": "x' OR '1'='1", "a.b": "y"}"#).unwrap();
        let mut query = QueryBuilder::<Postgres>::new("SELECT id FROM items WHERE tenant_id = ");
        query.push_bind(uuid::Uuid::nil());
        filter.push_sql(&mut query);

        let sql = query.sql();
        assert!(!sql.contains("OR '1'='1"));
        assert!(sql.contains("data ->> $"));
        assert!(sql.contains("data #> $"));
        assert_eq!(sql.matches('$').count(), 5);
    }
}
