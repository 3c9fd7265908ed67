//! Predicate translation for stored documents.
//!
//! Stored documents differ from their logical form in two ways: fields live
//! under storage keys (`id` is `_id`, `metadata` is `_kmd`) and lists of
//! scalars declared as [`FieldKind::WrappedList`] hold carrier objects
//! (`{"value": x}`) instead of bare values. The [`Translator`] rewrites a
//! predicate written against the logical form so it can be evaluated
//! against the stored one:
//!
//! - key paths are mapped to storage keys, following embedded schemas;
//! - a key path ending on a wrapped list is dereferenced (`tags.value`);
//! - `ElementAt` on a wrapped list selects the carrier's `value` member,
//!   except for the `Size` selector;
//! - `Count` keeps its collection operand undereferenced;
//! - subqueries over a wrapped list bind their variable to the carrier, so
//!   bare uses of the variable become `$var.value`;
//! - containment on a wrapped list becomes an existential subquery,
//!   `SUBQUERY(tags, $item, $item.value == x).@count > 0`.
//!
//! The rewrite recurses through boolean combinators, nested subqueries and
//! embedded sub-record schemas.

use crate::{
    query::{CompareOp, Comparison, Expr, Modifier, Predicate, Query, SortDescriptor},
    schema::WRAPPED_VALUE_KEY,
    EntitySchema, FieldKind,
};
use serde_json::Value;

/// Variable bound by existential subqueries produced for containment.
pub const EXISTS_VARIABLE: &str = "item";

/// What a subquery variable iterates over.
#[derive(Debug, Clone, Copy)]
enum Binding<'a> {
    /// Carrier objects of a wrapped list
    Carrier,
    /// Embedded sub-records with a known schema
    Element(&'a EntitySchema),
    Opaque,
}

#[derive(Debug, Default)]
struct Scope<'a> {
    bindings: Vec<(String, Binding<'a>)>,
}

impl<'a> Scope<'a> {
    fn get(&self, name: &str) -> Option<Binding<'a>> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, b)| *b)
    }

    fn with(&self, name: &str, binding: Binding<'a>) -> Scope<'a> {
        let mut bindings = self.bindings.clone();
        bindings.push((name.to_string(), binding));
        Scope { bindings }
    }
}

/// A path operand resolved against the schema.
struct Lookup<'a> {
    /// Operand with storage keys, not dereferenced
    expr: Expr,
    kind: Option<&'a FieldKind>,
    /// Operand is a bare carrier variable
    carrier: bool,
}

impl Lookup<'_> {
    fn is_wrapped(&self) -> bool {
        self.carrier || self.kind.is_some_and(FieldKind::is_wrapped)
    }
}

/// Rewrites predicates for evaluation against stored documents.
#[derive(Debug, Clone, Copy)]
pub struct Translator<'a> {
    schema: &'a EntitySchema,
}

impl<'a> Translator<'a> {
    pub fn new(schema: &'a EntitySchema) -> Self {
        Self { schema }
    }

    /// Translate a predicate.
    pub fn translate(&self, predicate: &Predicate) -> Predicate {
        self.translate_predicate(predicate, &Scope::default())
    }

    /// Translate the predicate and sort keys of a query.
    pub fn translate_query(&self, query: &Query) -> Query {
        Query {
            predicate: query.predicate.as_ref().map(|p| self.translate(p)),
            sort: query
                .sort
                .iter()
                .map(|s| SortDescriptor {
                    key: self.storage_path(&s.key),
                    ascending: s.ascending,
                })
                .collect(),
            skip: query.skip,
            limit: query.limit,
            ttl: query.ttl,
        }
    }

    /// Whether an operand refers to a wrapped list.
    pub fn needs_translation(&self, expr: &Expr) -> bool {
        self.needs(expr, &Scope::default())
    }

    /// Storage path of a key path, without dereferencing.
    pub fn storage_path(&self, path: &str) -> String {
        self.schema.resolve_key_path(path).storage_path
    }

    fn needs(&self, expr: &Expr, scope: &Scope<'a>) -> bool {
        match expr {
            Expr::KeyPath(_) | Expr::Variable { .. } => self
                .lookup(expr, scope)
                .is_some_and(|l| l.is_wrapped()),
            Expr::ElementAt { key_path, .. } => self
                .schema
                .resolve_key_path(key_path)
                .kind
                .is_some_and(FieldKind::is_wrapped),
            Expr::Count(inner) => self.needs(inner, scope),
            Expr::Subquery { collection, .. } => self.needs(collection, scope),
            Expr::Constant(_) => false,
        }
    }

    fn lookup(&self, expr: &Expr, scope: &Scope<'a>) -> Option<Lookup<'a>> {
        match expr {
            Expr::KeyPath(path) => {
                let resolved = self.schema.resolve_key_path(path);
                Some(Lookup {
                    expr: Expr::KeyPath(resolved.storage_path),
                    kind: resolved.kind,
                    carrier: false,
                })
            }
            Expr::Variable { name, path } => {
                let lookup = match (scope.get(name), path) {
                    (Some(Binding::Carrier), None) => Lookup {
                        expr: expr.clone(),
                        kind: None,
                        carrier: true,
                    },
                    (Some(Binding::Element(schema)), Some(path)) => {
                        let resolved = schema.resolve_key_path(path);
                        Lookup {
                            expr: Expr::Variable {
                                name: name.clone(),
                                path: Some(resolved.storage_path),
                            },
                            kind: resolved.kind,
                            carrier: false,
                        }
                    }
                    _ => Lookup {
                        expr: expr.clone(),
                        kind: None,
                        carrier: false,
                    },
                };
                Some(lookup)
            }
            _ => None,
        }
    }

    fn translate_predicate(&self, predicate: &Predicate, scope: &Scope<'a>) -> Predicate {
        match predicate {
            Predicate::And(parts) => Predicate::And(
                parts
                    .iter()
                    .map(|p| self.translate_predicate(p, scope))
                    .collect(),
            ),
            Predicate::Or(parts) => Predicate::Or(
                parts
                    .iter()
                    .map(|p| self.translate_predicate(p, scope))
                    .collect(),
            ),
            Predicate::Not(inner) => {
                Predicate::Not(Box::new(self.translate_predicate(inner, scope)))
            }
            Predicate::Compare(c) => self.translate_comparison(c, scope),
        }
    }

    fn translate_comparison(&self, c: &Comparison, scope: &Scope<'a>) -> Predicate {
        if c.op == CompareOp::Contains {
            let pair = match (&c.left, &c.right) {
                (path, Expr::Constant(value)) | (Expr::Constant(value), path) => {
                    self.lookup(path, scope).map(|l| (l, value))
                }
                _ => None,
            };
            if let Some((lookup, value)) = pair {
                if lookup.is_wrapped() && !lookup.carrier {
                    return exists(lookup.expr, value.clone(), c.case_insensitive);
                }
            }
        }

        Predicate::Compare(Comparison {
            left: self.translate_expr(&c.left, scope),
            op: c.op,
            right: self.translate_expr(&c.right, scope),
            modifier: c.modifier,
            case_insensitive: c.case_insensitive,
        })
    }

    fn translate_expr(&self, expr: &Expr, scope: &Scope<'a>) -> Expr {
        match expr {
            Expr::KeyPath(_) | Expr::Variable { .. } => match self.lookup(expr, scope) {
                Some(lookup) if lookup.is_wrapped() => dereference(lookup.expr),
                Some(lookup) => lookup.expr,
                None => expr.clone(),
            },
            Expr::Constant(_) => expr.clone(),
            Expr::ElementAt {
                key_path,
                index,
                member,
            } => {
                let resolved = self.schema.resolve_key_path(key_path);
                let wrapped = resolved.kind.is_some_and(FieldKind::is_wrapped);
                let member = if wrapped && *index != crate::ElementIndex::Size {
                    Some(match member {
                        Some(m) => format!("{WRAPPED_VALUE_KEY}.{m}"),
                        None => WRAPPED_VALUE_KEY.to_string(),
                    })
                } else {
                    member.clone()
                };
                Expr::ElementAt {
                    key_path: resolved.storage_path,
                    index: *index,
                    member,
                }
            }
            Expr::Count(inner) => Expr::Count(Box::new(self.collection_operand(inner, scope))),
            Expr::Subquery {
                collection,
                variable,
                predicate,
            } => {
                let binding = match self.lookup(collection, scope) {
                    Some(l) if l.carrier => Binding::Opaque,
                    Some(l) => match l.kind {
                        Some(FieldKind::WrappedList(_)) => Binding::Carrier,
                        Some(FieldKind::EmbeddedList(s)) | Some(FieldKind::Embedded(s)) => {
                            Binding::Element(&**s)
                        }
                        _ => Binding::Opaque,
                    },
                    None => Binding::Opaque,
                };
                let inner = scope.with(variable, binding);
                Expr::Subquery {
                    collection: Box::new(self.collection_operand(collection, scope)),
                    variable: variable.clone(),
                    predicate: Box::new(self.translate_predicate(predicate, &inner)),
                }
            }
        }
    }

    /// Operand iterated by `Count` or a subquery: storage keys, no dereference.
    fn collection_operand(&self, expr: &Expr, scope: &Scope<'a>) -> Expr {
        match self.lookup(expr, scope) {
            Some(lookup) => lookup.expr,
            None => self.translate_expr(expr, scope),
        }
    }
}

fn dereference(expr: Expr) -> Expr {
    match expr {
        Expr::KeyPath(path) => Expr::KeyPath(format!("{path}.{WRAPPED_VALUE_KEY}")),
        Expr::Variable { name, path } => Expr::Variable {
            name,
            path: Some(match path {
                Some(p) => format!("{p}.{WRAPPED_VALUE_KEY}"),
                None => WRAPPED_VALUE_KEY.to_string(),
            }),
        },
        other => other,
    }
}

/// `SUBQUERY(collection, $item, $item.value == value).@count > 0`
fn exists(collection: Expr, value: Value, case_insensitive: bool) -> Predicate {
    let element = Predicate::Compare(Comparison {
        left: Expr::Variable {
            name: EXISTS_VARIABLE.to_string(),
            path: Some(WRAPPED_VALUE_KEY.to_string()),
        },
        op: CompareOp::Eq,
        right: Expr::Constant(value),
        modifier: Modifier::Direct,
        case_insensitive,
    });
    Predicate::compare(
        Expr::Count(Box::new(Expr::Subquery {
            collection: Box::new(collection),
            variable: EXISTS_VARIABLE.to_string(),
            predicate: Box::new(element),
        })),
        CompareOp::Gt,
        Expr::value(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ElementIndex, FieldDef, ScalarKind};

    fn author_schema() -> EntitySchema {
        EntitySchema::embedded(
            "Author",
            vec![
                FieldDef::required("name", FieldKind::Scalar(ScalarKind::String)),
                FieldDef::optional("aliases", FieldKind::WrappedList(ScalarKind::String)),
            ],
        )
    }

    fn schema() -> EntitySchema {
        EntitySchema::new(
            "books",
            vec![
                FieldDef::required("title", FieldKind::Scalar(ScalarKind::String)),
                FieldDef::optional("ratings", FieldKind::WrappedList(ScalarKind::Int)),
                FieldDef::optional("plain", FieldKind::List(ScalarKind::Int)),
                FieldDef::optional(
                    "authors",
                    FieldKind::EmbeddedList(Box::new(author_schema())),
                ),
                FieldDef::optional("editor", FieldKind::Embedded(Box::new(author_schema()))),
            ],
        )
    }

    #[test]
    fn plain_fields_only_map_keys() {
        let schema = schema();
        let t = Translator::new(&schema);
        let p = t.translate(&Predicate::eq("id", "a").and(Predicate::eq("title", "x")));
        assert_eq!(p, Predicate::eq("_id", "a").and(Predicate::eq("title", "x")));
        assert_eq!(
            t.translate(&Predicate::gt("metadata.lmt", "t")),
            Predicate::gt("_kmd.lmt", "t")
        );
    }

    #[test]
    fn wrapped_key_path_is_dereferenced() {
        let schema = schema();
        let t = Translator::new(&schema);
        assert!(t.needs_translation(&Expr::key("ratings")));
        assert!(!t.needs_translation(&Expr::key("plain")));
        assert_eq!(
            t.translate(&Predicate::eq("ratings", 5)),
            Predicate::eq("ratings.value", 5)
        );
    }

    #[test]
    fn contains_becomes_existential_subquery() {
        let schema = schema();
        let t = Translator::new(&schema);
        let expected = Predicate::compare(
            Expr::count(Expr::subquery(
                Expr::key("ratings"),
                "$item",
                Predicate::compare(
                    Expr::var("$item", Some("value")),
                    CompareOp::Eq,
                    Expr::value(5),
                ),
            )),
            CompareOp::Gt,
            Expr::value(0),
        );
        assert_eq!(t.translate(&Predicate::contains("ratings", 5)), expected);
    }

    #[test]
    fn contains_on_plain_list_is_untouched() {
        let schema = schema();
        let t = Translator::new(&schema);
        assert_eq!(
            t.translate(&Predicate::contains("plain", 5)),
            Predicate::contains("plain", 5)
        );
    }

    #[test]
    fn element_at_selects_value_member() {
        let schema = schema();
        let t = Translator::new(&schema);
        let p = Predicate::compare(
            Expr::element_at("ratings", ElementIndex::First),
            CompareOp::Eq,
            Expr::value(1),
        );
        let translated = t.translate(&p);
        let Predicate::Compare(c) = translated else {
            panic!("expected comparison")
        };
        assert_eq!(
            c.left,
            Expr::ElementAt {
                key_path: "ratings".into(),
                index: ElementIndex::First,
                member: Some("value".into())
            }
        );

        let size = Predicate::compare(
            Expr::element_at("ratings", ElementIndex::Size),
            CompareOp::Eq,
            Expr::value(1),
        );
        assert_eq!(t.translate(&size), size);
    }

    #[test]
    fn count_keeps_collection_operand() {
        let schema = schema();
        let t = Translator::new(&schema);
        let p = Predicate::compare(Expr::count(Expr::key("ratings")), CompareOp::Ge, Expr::value(2));
        assert_eq!(t.translate(&p), p);
    }

    #[test]
    fn subquery_variable_over_wrapped_list() {
        let schema = schema();
        let t = Translator::new(&schema);
        let p = Predicate::compare(
            Expr::count(Expr::subquery(
                Expr::key("ratings"),
                "$r",
                Predicate::compare(Expr::var("$r", None), CompareOp::Gt, Expr::value(3)),
            )),
            CompareOp::Gt,
            Expr::value(0),
        );
        let expected = Predicate::compare(
            Expr::count(Expr::subquery(
                Expr::key("ratings"),
                "$r",
                Predicate::compare(Expr::var("$r", Some("value")), CompareOp::Gt, Expr::value(3)),
            )),
            CompareOp::Gt,
            Expr::value(0),
        );
        assert_eq!(t.translate(&p), expected);
    }

    #[test]
    fn nested_paths_follow_embedded_schemas() {
        let schema = schema();
        let t = Translator::new(&schema);
        assert_eq!(
            t.translate(&Predicate::eq("editor.aliases", "x")),
            Predicate::eq("editor.aliases.value", "x")
        );

        // containment inside a subquery over embedded records
        let p = Predicate::compare(
            Expr::count(Expr::subquery(
                Expr::key("authors"),
                "$a",
                Predicate::compare(
                    Expr::var("$a", Some("aliases")),
                    CompareOp::Contains,
                    Expr::value("FH"),
                ),
            )),
            CompareOp::Gt,
            Expr::value(0),
        );
        let Predicate::Compare(outer) = t.translate(&p) else {
            panic!("expected comparison")
        };
        let Expr::Count(inner) = outer.left else {
            panic!("expected count")
        };
        let Expr::Subquery { predicate, .. } = *inner else {
            panic!("expected subquery")
        };
        let Predicate::Compare(c) = *predicate else {
            panic!("expected comparison")
        };
        let Expr::Count(exists) = c.left else {
            panic!("expected existential count")
        };
        let Expr::Subquery { collection, .. } = *exists else {
            panic!("expected subquery")
        };
        assert_eq!(*collection, Expr::var("$a", Some("aliases")));
    }

    #[test]
    fn translate_query_maps_sort_keys() {
        let schema = schema();
        let t = Translator::new(&schema);
        let q = t.translate_query(&Query::new().sort_by("metadata.lmt", false).limit(3));
        assert_eq!(q.sort[0].key, "_kmd.lmt");
        assert_eq!(q.limit, Some(3));
    }
}
