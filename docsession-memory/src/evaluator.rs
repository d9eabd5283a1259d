//! Where-clauses and order-by clauses run against stored JSON bodies.
//!
//! Documents are held as JSON objects; expressions are evaluated against their bodies
//! with [`DocumentEvaluator`], and ordered with [`compare_field`].

use serde_json::{Map, Value};
use std::{cmp::Ordering, collections::HashMap};

use docsession_core::{
    error::{SessionError, SessionResult},
    query::{Expr, FieldOp, OrderingType, QueryVisitor},
};

/// Comparable view over a JSON value.
///
/// Every number is normalized to `f64`, so `1` and `1.0` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Value> for Comparable<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::Null => Comparable::Null,
            Value::Bool(value) => Comparable::Bool(*value),
            Value::Number(value) => value.as_f64().map(Comparable::Number).unwrap_or(Comparable::Null),
            Value::String(value) => Comparable::String(value),
            Value::Array(array) => Comparable::Array(array.iter().map(Comparable::from).collect()),
            Value::Object(map) => Comparable::Map(
                map.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a possibly dotted field path (`Address.City`) inside a document body.
pub(crate) fn lookup<'a>(document: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    let mut segments = field.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }

    Some(current)
}

fn lowercase(value: &Value) -> Option<String> {
    value.as_str().map(str::to_lowercase)
}

/// Splits a string into alphanumeric runs, lowercased.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

/// Orders two documents by one field. Missing fields sort first.
pub(crate) fn compare_field(
    left: &Map<String, Value>,
    right: &Map<String, Value>,
    field: &str,
    ordering: OrderingType,
) -> Ordering {
    let left = lookup(left, field);
    let right = lookup(right, field);

    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(left), Some(right)) => match ordering {
            OrderingType::Long | OrderingType::Double => {
                let left = numeric(left);
                let right = numeric(right);
                left.partial_cmp(&right).unwrap_or(Ordering::Equal)
            }
            OrderingType::AlphaNumeric => alphanumeric_cmp(
                left.as_str().unwrap_or_default(),
                right.as_str().unwrap_or_default(),
            ),
            OrderingType::String => Comparable::from(left)
                .partial_cmp(&Comparable::from(right))
                .unwrap_or(Ordering::Equal),
        },
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Compares strings treating runs of digits as numbers, so `item2` sorts before `item10`.
fn alphanumeric_cmp(left: &str, right: &str) -> Ordering {
    let mut left = left.chars().peekable();
    let mut right = right.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) if a.is_ascii_digit() && b.is_ascii_digit() => {
                let mut a_run = String::new();
                while let Some(c) = left.next_if(char::is_ascii_digit) {
                    a_run.push(c);
                }
                let mut b_run = String::new();
                while let Some(c) = right.next_if(char::is_ascii_digit) {
                    b_run.push(c);
                }

                let a_trimmed = a_run.trim_start_matches('0');
                let b_trimmed = b_run.trim_start_matches('0');
                let ordering = a_trimmed
                    .len()
                    .cmp(&b_trimmed.len())
                    .then_with(|| a_trimmed.cmp(b_trimmed));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(a), Some(b)) => {
                let ordering = a.to_lowercase().cmp(b.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Map<String, Value>,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Map<String, Value>) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> SessionResult<bool> {
        self.visit_expr(expr)
    }

    /// Keeps the documents `expr` matches, in their original order.
    pub fn filter_documents<T>(
        documents: impl IntoIterator<Item = T>,
        body: impl Fn(&T) -> &Map<String, Value>,
        expr: &Expr,
    ) -> SessionResult<Vec<T>> {
        let mut matched = Vec::new();
        for document in documents {
            if DocumentEvaluator::new(body(&document)).evaluate(expr)? {
                matched.push(document);
            }
        }
        Ok(matched)
    }
}

fn any_of(field_value: &Value, values: &Value) -> bool {
    let candidates: Vec<Comparable<'_>> = match values {
        Value::Array(values) => values.iter().map(Comparable::from).collect(),
        single => vec![Comparable::from(single)],
    };

    match field_value {
        Value::Array(items) => items
            .iter()
            .any(|item| candidates.contains(&Comparable::from(item))),
        single => candidates.contains(&Comparable::from(single)),
    }
}

fn all_of(field_value: &Value, values: &Value) -> bool {
    let items: Vec<Comparable<'_>> = match field_value {
        Value::Array(items) => items.iter().map(Comparable::from).collect(),
        single => vec![Comparable::from(single)],
    };

    match values {
        Value::Array(values) => values.iter().all(|value| items.contains(&Comparable::from(value))),
        single => items.contains(&Comparable::from(single)),
    }
}

fn search(field_value: &Value, terms: &Value) -> bool {
    let Some(text) = field_value.as_str() else {
        return false;
    };
    let Some(terms) = terms.as_str() else {
        return false;
    };

    let haystack: Vec<String> = words(text).collect();
    words(terms).any(|term| haystack.contains(&term))
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = SessionError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Value) -> Result<Self::Output, Self::Error> {
        let Some(field_value) = lookup(self.document, field) else {
            return Ok(matches!(op, FieldOp::Ne));
        };

        let matched = match op {
            FieldOp::Eq => Comparable::from(field_value) == Comparable::from(value),
            FieldOp::Ne => Comparable::from(field_value) != Comparable::from(value),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                match Comparable::from(field_value).partial_cmp(&Comparable::from(value)) {
                    Some(ordering) => match op {
                        FieldOp::Gt => ordering == Ordering::Greater,
                        FieldOp::Gte => ordering != Ordering::Less,
                        FieldOp::Lt => ordering == Ordering::Less,
                        _ => ordering != Ordering::Greater,
                    },
                    None => false,
                }
            }
            FieldOp::StartsWith => match (lowercase(field_value), lowercase(value)) {
                (Some(left), Some(right)) => left.starts_with(&right),
                _ => false,
            },
            FieldOp::EndsWith => match (lowercase(field_value), lowercase(value)) {
                (Some(left), Some(right)) => left.ends_with(&right),
                _ => false,
            },
            FieldOp::AnyOf => any_of(field_value, value),
            FieldOp::AllOf => all_of(field_value, value),
            FieldOp::Search => search(field_value, value),
        };

        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsession_core::query::Filter;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn matches(document: &Map<String, Value>, expr: Expr) -> bool {
        DocumentEvaluator::new(document).evaluate(&expr).unwrap()
    }

    #[test]
    fn numbers_compare_across_representations() {
        let document = body(json!({ "Total": 100, "Freight": 12.5 }));

        assert!(matches(&document, Filter::eq("Total", 100.0)));
        assert!(matches(&document, Filter::gte("Total", 100)));
        assert!(!matches(&document, Filter::gt("Freight", 20)));
        assert!(matches(&document, Filter::and([Filter::lt("Freight", 13), Filter::lte("Total", 100)])));
    }

    #[test]
    fn string_functions_ignore_case() {
        let document = body(json!({ "Name": "Chang Ale", "Notes": "Best served cold, with friends" }));

        assert!(matches(&document, Filter::starts_with("Name", "chang")));
        assert!(matches(&document, Filter::ends_with("Name", "ALE")));
        assert!(matches(&document, Filter::search("Notes", "warm COLD")));
        assert!(!matches(&document, Filter::search("Notes", "hot")));
    }

    #[test]
    fn array_membership() {
        let document = body(json!({ "Tags": ["beverages", "imported"], "Category": "categories/1" }));

        assert!(matches(&document, Filter::any_of("Tags", ["imported", "local"])));
        assert!(matches(&document, Filter::any_of("Category", ["categories/1", "categories/2"])));
        assert!(matches(&document, Filter::all_of("Tags", ["imported", "beverages"])));
        assert!(!matches(&document, Filter::all_of("Tags", ["imported", "local"])));
        assert!(matches(&document, Filter::none_of("Tags", ["local"])));
    }

    #[test]
    fn missing_fields_and_nested_paths() {
        let document = body(json!({ "Address": { "City": "London" } }));

        assert!(matches(&document, Filter::eq("Address.City", "London")));
        assert!(matches(&document, Filter::not_exists("Phone")));
        assert!(!matches(&document, Filter::eq("Phone", "555")));
        assert!(matches(&document, Filter::ne("Phone", "555")));
        assert!(!matches(&document, Filter::exists("Address.Region")));
    }

    #[test]
    fn ordering_by_type() {
        let a = body(json!({ "Code": "item2", "Price": "9" }));
        let b = body(json!({ "Code": "item10", "Price": "10" }));

        assert_eq!(compare_field(&a, &b, "Code", OrderingType::AlphaNumeric), Ordering::Less);
        assert_eq!(compare_field(&a, &b, "Code", OrderingType::String), Ordering::Greater);
        assert_eq!(compare_field(&a, &b, "Price", OrderingType::Double), Ordering::Less);
        assert_eq!(compare_field(&a, &b, "Missing", OrderingType::String), Ordering::Equal);
    }
}
