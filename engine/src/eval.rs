//! Predicate evaluation over documents.
//!
//! Semantics follow the remote service's document queries:
//!
//! - a key path is walked segment by segment; arrays met on the way are
//!   flattened, so `authors.name` yields every author's name;
//! - comparisons are existential over the values a path yields, and over
//!   the elements of an array found at the end of the path (`tags == "x"`
//!   matches when any tag is `"x"`); the `All` modifier makes them universal;
//! - a missing value compares as `null`;
//! - numbers compare numerically regardless of integer or float encoding;
//! - `Ne` is the negation of `Eq`.

use crate::{
    error::Result,
    query::{CompareOp, Comparison, ElementIndex, Expr, Modifier, Predicate, SortDescriptor},
    Document, Error,
};
use serde_json::Value;
use std::cmp::Ordering;

/// Evaluate a predicate against a document.
pub fn matches(predicate: &Predicate, document: &Document) -> Result<bool> {
    let evaluator = Evaluator {
        root: document,
        scope: Vec::new(),
    };
    evaluator.predicate(predicate)
}

/// Order two documents by sort descriptors.
pub fn compare_documents(a: &Document, b: &Document, sort: &[SortDescriptor]) -> Ordering {
    for descriptor in sort {
        let left = first_value(a, &descriptor.key);
        let right = first_value(b, &descriptor.key);
        let ordering = sort_order(left.as_ref(), right.as_ref());
        let ordering = if descriptor.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn first_value(document: &Document, path: &str) -> Option<Value> {
    walk_object(document, path).into_iter().next()
}

struct Evaluator<'a> {
    root: &'a Document,
    scope: Vec<(String, Value)>,
}

impl Evaluator<'_> {
    fn predicate(&self, predicate: &Predicate) -> Result<bool> {
        match predicate {
            Predicate::And(parts) => {
                for part in parts {
                    if !self.predicate(part)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(parts) => {
                for part in parts {
                    if self.predicate(part)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not(inner) => Ok(!self.predicate(inner)?),
            Predicate::Compare(c) => self.comparison(c),
        }
    }

    fn comparison(&self, c: &Comparison) -> Result<bool> {
        let left = self.resolve(&c.left)?;
        let right = self.resolve(&c.right)?;
        let ci = c.case_insensitive;

        match c.op {
            CompareOp::Ne => {
                let eq = Comparison {
                    op: CompareOp::Eq,
                    ..c.clone()
                };
                Ok(!self.comparison(&eq)?)
            }
            CompareOp::In => {
                let candidates = explode(right);
                Ok(quantify(c.modifier, explode_or_null(left), |l| {
                    candidates.iter().any(|r| equal(l, r, ci))
                }))
            }
            CompareOp::Contains => {
                let needles = explode_or_null(right);
                Ok(quantify(c.modifier, left, |haystack| {
                    needles.iter().any(|needle| contains(haystack, needle, ci))
                }))
            }
            op => {
                let rights = explode_or_null(right);
                Ok(quantify(c.modifier, explode_or_null(left), |l| {
                    rights.iter().any(|r| test(op, l, r, ci))
                }))
            }
        }
    }

    /// Raw values an operand yields; arrays at the end of a path stay intact.
    fn resolve(&self, expr: &Expr) -> Result<Vec<Value>> {
        match expr {
            Expr::Constant(value) => Ok(vec![value.clone()]),
            Expr::KeyPath(path) => Ok(walk_object(self.root, path)),
            Expr::Variable { name, path } => {
                let bound = self
                    .scope
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| Error::InvalidQuery(format!("unbound variable ${name}")))?;
                Ok(match path {
                    Some(path) => walk(bound, path),
                    None => vec![bound.clone()],
                })
            }
            Expr::ElementAt {
                key_path,
                index,
                member,
            } => {
                let mut out = Vec::new();
                for value in walk_object(self.root, key_path) {
                    let Value::Array(items) = value else {
                        continue;
                    };
                    let selected = match index {
                        ElementIndex::Size => {
                            out.push(Value::from(items.len()));
                            continue;
                        }
                        ElementIndex::First => items.first(),
                        ElementIndex::Last => items.last(),
                        ElementIndex::At(i) => items.get(*i),
                    };
                    match (selected, member) {
                        (Some(element), Some(member)) => out.extend(walk(element, member)),
                        (Some(element), None) => out.push(element.clone()),
                        (None, _) => {}
                    }
                }
                Ok(out)
            }
            Expr::Count(inner) => {
                let count: usize = self
                    .resolve(inner)?
                    .iter()
                    .map(|value| match value {
                        Value::Array(items) => items.len(),
                        Value::Null => 0,
                        _ => 1,
                    })
                    .sum();
                Ok(vec![Value::from(count)])
            }
            Expr::Subquery {
                collection,
                variable,
                predicate,
            } => {
                let mut selected = Vec::new();
                for element in explode(self.resolve(collection)?) {
                    let mut scope = self.scope.clone();
                    scope.push((variable.clone(), element.clone()));
                    let nested = Evaluator {
                        root: self.root,
                        scope,
                    };
                    if nested.predicate(predicate)? {
                        selected.push(element);
                    }
                }
                Ok(vec![Value::Array(selected)])
            }
        }
    }
}

fn quantify<F>(modifier: Modifier, values: Vec<Value>, test: F) -> bool
where
    F: Fn(&Value) -> bool,
{
    match modifier {
        Modifier::Direct | Modifier::Any => values.iter().any(test),
        Modifier::All => values.iter().all(test),
    }
}

fn walk_object(document: &Document, path: &str) -> Vec<Value> {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Vec::new();
    };
    let mut current: Vec<Value> = document.get(first).cloned().into_iter().collect();
    for segment in segments {
        current = step(current, segment);
    }
    current
}

fn walk(value: &Value, path: &str) -> Vec<Value> {
    path.split('.')
        .fold(vec![value.clone()], |current, segment| step(current, segment))
}

fn step(current: Vec<Value>, segment: &str) -> Vec<Value> {
    let mut next = Vec::new();
    for value in current {
        descend(&value, segment, &mut next);
    }
    next
}

fn descend(value: &Value, segment: &str, out: &mut Vec<Value>) {
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(segment) {
                out.push(child.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                descend(item, segment, out);
            }
        }
        _ => {}
    }
}

/// Flatten top-level arrays into their elements.
fn explode(values: Vec<Value>) -> Vec<Value> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::Array(items) => out.extend(items),
            other => out.push(other),
        }
    }
    out
}

fn explode_or_null(values: Vec<Value>) -> Vec<Value> {
    let exploded = explode(values);
    if exploded.is_empty() {
        vec![Value::Null]
    } else {
        exploded
    }
}

fn contains(haystack: &Value, needle: &Value, ci: bool) -> bool {
    match (haystack, needle) {
        (Value::Array(items), _) => items.iter().any(|item| equal(item, needle, ci)),
        (Value::String(s), Value::String(n)) => {
            if ci {
                s.to_lowercase().contains(&n.to_lowercase())
            } else {
                s.contains(n.as_str())
            }
        }
        _ => false,
    }
}

fn test(op: CompareOp, left: &Value, right: &Value, ci: bool) -> bool {
    match op {
        CompareOp::Eq => equal(left, right, ci),
        CompareOp::Lt => order(left, right, ci) == Some(Ordering::Less),
        CompareOp::Le => matches!(
            order(left, right, ci),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Gt => order(left, right, ci) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(
            order(left, right, ci),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::BeginsWith => string_test(left, right, ci, |s, p| s.starts_with(p)),
        CompareOp::EndsWith => string_test(left, right, ci, |s, p| s.ends_with(p)),
        CompareOp::Ne | CompareOp::In | CompareOp::Contains => false,
    }
}

fn string_test<F>(left: &Value, right: &Value, ci: bool, f: F) -> bool
where
    F: Fn(&str, &str) -> bool,
{
    match (left, right) {
        (Value::String(l), Value::String(r)) if ci => f(&l.to_lowercase(), &r.to_lowercase()),
        (Value::String(l), Value::String(r)) => f(l, r),
        _ => false,
    }
}

fn equal(left: &Value, right: &Value, ci: bool) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        (Value::String(l), Value::String(r)) if ci => l.to_lowercase() == r.to_lowercase(),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value, ci: bool) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) if ci => {
            Some(l.to_lowercase().cmp(&r.to_lowercase()))
        }
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order for sorting: missing and null first, then by type.
fn sort_order(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    let (lr, rr) = (type_rank(left), type_rank(right));
    if lr != rr {
        return lr.cmp(&rr);
    }
    match (left, right) {
        (Some(l), Some(r)) => order(l, r, false).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
