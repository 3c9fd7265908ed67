//! Query model: predicate trees, sorting, paging and TTL.
//!
//! Predicates are written against field names. Before they touch stored
//! documents they go through [`crate::translate::Translator`], which maps
//! field names to storage keys and rewrites comparisons on wrapped scalar
//! lists. For the remote service they are encoded as Mongo-style filters by
//! [`Query::to_remote`], with field names mapped but otherwise unmodified.

use crate::{error::Result, EntitySchema, Error};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Left value is a member of the right-hand array
    In,
    /// Left collection (or string) contains the right value
    Contains,
    BeginsWith,
    EndsWith,
}

/// How a comparison quantifies over multi-valued key paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Modifier {
    /// Matches when any value matches
    #[default]
    Direct,
    Any,
    /// Matches when every value matches
    All,
}

/// Element selector for [`Expr::ElementAt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementIndex {
    First,
    Last,
    /// Number of elements
    Size,
    At(usize),
}

/// An operand of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    /// Dotted key path from the record root
    KeyPath(String),
    Constant(Value),
    /// Subquery iteration variable, optionally followed by a key path
    Variable { name: String, path: Option<String> },
    /// One element of an array field, optionally followed by a key path
    ElementAt {
        key_path: String,
        index: ElementIndex,
        member: Option<String>,
    },
    /// Number of elements of a collection or subquery result
    Count(Box<Expr>),
    /// Elements of `collection` for which `predicate` holds
    Subquery {
        collection: Box<Expr>,
        variable: String,
        predicate: Box<Predicate>,
    },
}

impl Expr {
    /// Key path operand.
    pub fn key(path: impl Into<String>) -> Self {
        Expr::KeyPath(path.into())
    }

    /// Constant operand.
    pub fn value(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    /// Subquery variable (`$name`), optionally with a key path.
    pub fn var(name: &str, path: Option<&str>) -> Self {
        Expr::Variable {
            name: name.trim_start_matches('$').to_string(),
            path: path.map(str::to_string),
        }
    }

    /// Array element operand.
    pub fn element_at(key_path: impl Into<String>, index: ElementIndex) -> Self {
        Expr::ElementAt {
            key_path: key_path.into(),
            index,
            member: None,
        }
    }

    /// Count operand.
    pub fn count(inner: Expr) -> Self {
        Expr::Count(Box::new(inner))
    }

    /// Subquery operand.
    pub fn subquery(collection: Expr, variable: &str, predicate: Predicate) -> Self {
        Expr::Subquery {
            collection: Box::new(collection),
            variable: variable.trim_start_matches('$').to_string(),
            predicate: Box::new(predicate),
        }
    }
}

/// A single comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub left: Expr,
    pub op: CompareOp,
    pub right: Expr,
    #[serde(default)]
    pub modifier: Modifier,
    #[serde(default)]
    pub case_insensitive: bool,
}

/// A predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    Compare(Comparison),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Generic comparison.
    pub fn compare(left: Expr, op: CompareOp, right: Expr) -> Self {
        Predicate::Compare(Comparison {
            left,
            op,
            right,
            modifier: Modifier::Direct,
            case_insensitive: false,
        })
    }

    fn key_value(path: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::compare(Expr::key(path), op, Expr::value(value))
    }

    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        Self::key_value(path, CompareOp::Eq, value)
    }

    pub fn ne(path: &str, value: impl Into<Value>) -> Self {
        Self::key_value(path, CompareOp::Ne, value)
    }

    pub fn lt(path: &str, value: impl Into<Value>) -> Self {
        Self::key_value(path, CompareOp::Lt, value)
    }

    pub fn le(path: &str, value: impl Into<Value>) -> Self {
        Self::key_value(path, CompareOp::Le, value)
    }

    pub fn gt(path: &str, value: impl Into<Value>) -> Self {
        Self::key_value(path, CompareOp::Gt, value)
    }

    pub fn ge(path: &str, value: impl Into<Value>) -> Self {
        Self::key_value(path, CompareOp::Ge, value)
    }

    pub fn is_in(path: &str, values: Vec<Value>) -> Self {
        Self::key_value(path, CompareOp::In, Value::Array(values))
    }

    pub fn contains(path: &str, value: impl Into<Value>) -> Self {
        Self::key_value(path, CompareOp::Contains, value)
    }

    pub fn begins_with(path: &str, prefix: &str) -> Self {
        Self::key_value(path, CompareOp::BeginsWith, prefix)
    }

    pub fn ends_with(path: &str, suffix: &str) -> Self {
        Self::key_value(path, CompareOp::EndsWith, suffix)
    }

    /// Quantify over every value of a multi-valued key path.
    pub fn all(mut self) -> Self {
        if let Predicate::Compare(c) = &mut self {
            c.modifier = Modifier::All;
        }
        self
    }

    /// Compare strings ignoring case.
    pub fn ignoring_case(mut self) -> Self {
        if let Predicate::Compare(c) = &mut self {
            c.case_insensitive = true;
        }
        self
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            this => Predicate::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            this => Predicate::Or(vec![this, other]),
        }
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

/// A query over one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Filter; `None` matches everything
    pub predicate: Option<Predicate>,
    /// Sort keys, most significant first
    pub sort: Vec<SortDescriptor>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    /// Maximum age of `metadata.lmt` for local results
    pub ttl: Option<Duration>,
}

impl Query {
    /// Query matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Query with a filter.
    pub fn filter(predicate: Predicate) -> Self {
        Self {
            predicate: Some(predicate),
            ..Self::default()
        }
    }

    pub fn sort_by(mut self, key: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortDescriptor {
            key: key.into(),
            ascending,
        });
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Whether only a window of the matching records is selected.
    pub fn is_windowed(&self) -> bool {
        self.skip.is_some_and(|s| s > 0) || self.limit.is_some()
    }

    /// The same filter without sort, paging or TTL.
    pub fn predicate_only(&self) -> Self {
        Self {
            predicate: self.predicate.clone(),
            ..Self::default()
        }
    }

    /// Encode for the remote service.
    ///
    /// Field names are mapped to storage keys when a schema is given;
    /// wrapped-scalar translation is never applied since the remote stores
    /// plain arrays.
    pub fn to_remote(&self, schema: Option<&EntitySchema>) -> Result<RemoteQuery> {
        let filter = self
            .predicate
            .as_ref()
            .map(|p| encode_predicate(p, schema))
            .transpose()?;

        let sort = if self.sort.is_empty() {
            None
        } else {
            let keys: Vec<String> = self
                .sort
                .iter()
                .map(|s| {
                    let key = storage_path(schema, &s.key);
                    let direction = if s.ascending { 1 } else { -1 };
                    format!("{}:{}", Value::String(key), direction)
                })
                .collect();
            Some(format!("{{{}}}", keys.join(",")))
        };

        Ok(RemoteQuery {
            filter,
            sort,
            skip: self.skip,
            limit: self.limit,
        })
    }
}

/// A query encoded for the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteQuery {
    /// Mongo-style filter document
    pub filter: Option<Value>,
    /// Sort document, key order preserved
    pub sort: Option<String>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl RemoteQuery {
    /// URL query parameters for this query.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(filter) = &self.filter {
            pairs.push(("query", filter.to_string()));
        }
        if let Some(sort) = &self.sort {
            pairs.push(("sort", sort.clone()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("skip", skip.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

fn storage_path(schema: Option<&EntitySchema>, path: &str) -> String {
    match schema {
        Some(schema) => schema.resolve_key_path(path).storage_path,
        None => path.to_string(),
    }
}

fn encode_predicate(predicate: &Predicate, schema: Option<&EntitySchema>) -> Result<Value> {
    match predicate {
        Predicate::And(parts) => Ok(json!({ "$and": encode_all(parts, schema)? })),
        Predicate::Or(parts) => Ok(json!({ "$or": encode_all(parts, schema)? })),
        Predicate::Not(inner) => Ok(json!({ "$nor": [encode_predicate(inner, schema)?] })),
        Predicate::Compare(c) => encode_comparison(c, schema),
    }
}

fn encode_all(parts: &[Predicate], schema: Option<&EntitySchema>) -> Result<Vec<Value>> {
    parts.iter().map(|p| encode_predicate(p, schema)).collect()
}

fn encode_comparison(c: &Comparison, schema: Option<&EntitySchema>) -> Result<Value> {
    if c.modifier == Modifier::All {
        return Err(Error::UnsupportedRemotePredicate(
            "ALL modifier".to_string(),
        ));
    }

    let (path, op, value) = match (&c.left, &c.right) {
        (Expr::KeyPath(path), Expr::Constant(value)) => (path, c.op, value),
        (Expr::Constant(value), Expr::KeyPath(path)) => (path, flip(c.op), value),
        _ => {
            return Err(Error::UnsupportedRemotePredicate(
                "only key path / constant comparisons can be sent".to_string(),
            ))
        }
    };

    let resolved = schema.map(|s| s.resolve_key_path(path));
    let is_list = resolved.as_ref().and_then(|r| r.kind).is_some_and(|k| {
        matches!(
            k,
            crate::FieldKind::List(_) | crate::FieldKind::WrappedList(_)
        )
    });
    let key = resolved
        .map(|r| r.storage_path)
        .unwrap_or_else(|| path.clone());

    let condition = match op {
        CompareOp::Eq if c.case_insensitive && value.is_string() => {
            regex(&format!("^{}$", escape_regex(as_str(value)?)), true)
        }
        CompareOp::Eq => value.clone(),
        CompareOp::Ne => json!({ "$ne": value }),
        CompareOp::Lt => json!({ "$lt": value }),
        CompareOp::Le => json!({ "$lte": value }),
        CompareOp::Gt => json!({ "$gt": value }),
        CompareOp::Ge => json!({ "$gte": value }),
        CompareOp::In if value.is_array() => json!({ "$in": value }),
        CompareOp::In => {
            return Err(Error::InvalidQuery(
                "IN requires an array operand".to_string(),
            ))
        }
        CompareOp::Contains if !is_list && value.is_string() => {
            regex(&escape_regex(as_str(value)?), c.case_insensitive)
        }
        CompareOp::Contains => value.clone(),
        CompareOp::BeginsWith => regex(
            &format!("^{}", escape_regex(as_str(value)?)),
            c.case_insensitive,
        ),
        CompareOp::EndsWith => regex(
            &format!("{}$", escape_regex(as_str(value)?)),
            c.case_insensitive,
        ),
    };

    let mut filter = serde_json::Map::new();
    filter.insert(key, condition);
    Ok(Value::Object(filter))
}

/// Operator to use when the operands are swapped.
fn flip(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Le => CompareOp::Ge,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::Ge => CompareOp::Le,
        CompareOp::In => CompareOp::Contains,
        CompareOp::Contains => CompareOp::In,
        other => other,
    }
}

fn as_str(value: &Value) -> Result<&str> {
    value
        .as_str()
        .ok_or_else(|| Error::InvalidQuery("string operand expected".to_string()))
}

fn regex(pattern: &str, case_insensitive: bool) -> Value {
    if case_insensitive {
        json!({ "$regex": pattern, "$options": "i" })
    } else {
        json!({ "$regex": pattern })
    }
}

fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if "\\.+*?()|[]{}^$".contains(ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
