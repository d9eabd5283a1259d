//! Filter expressions for the where-clause of a query.
//!
//! [`Filter`] builds the leaves (`eq`, `gt`, `starts_with`, `search`, `exists`, `any_of`
//! and friends) and [`Expr::and`], [`Expr::or`] and [`Expr::not`] combine them.
//!
//! Expressions are walked with a [`QueryVisitor`]: the query builder renders them into
//! where-tokens, and the in-memory server evaluates them against documents.

use serde_json::Value;

use crate::error::SessionError;

/// How a where-clause compares a field with a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-insensitive prefix match, rendered as `startsWith(field, $p)`.
    StartsWith,
    /// Case-insensitive suffix match.
    EndsWith,
    /// Field equals one of the values, or an array field shares one of them.
    AnyOf,
    /// Array field contains all of the values.
    AllOf,
    /// Full-text search on the field.
    Search,
}

/// The where-clause of a query as a tree.
///
/// # Example
///
/// ```ignore
/// use docsession::query::{Expr, Filter};
///
/// let expr = Filter::and(vec![
///     Filter::eq("Company", "companies/1"),
///     Filter::gt("Total", 100),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Every operand must hold.
    And(Vec<Expr>),
    /// At least one operand must hold.
    Or(Vec<Expr>),
    /// Rendered as `not`.
    Not(Box<Expr>),
    /// `exists(field)`, negated when the flag is `false`.
    Exists(String, bool),
    /// `field <op> value`. The value becomes a query parameter when rendered.
    Field { field: String, op: FieldOp, value: Value },
}

impl Expr {
    pub fn field(field: String, op: FieldOp, value: Value) -> Self {
        Expr::Field { field, op, value }
    }

    /// `self and other`. Chained calls keep extending one `And` node.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// `self or other`. Chained calls keep extending one `Or` node.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression.
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Returns `true` for `And`/`Or` with more than one operand.
    pub fn is_compound(&self) -> bool {
        match self {
            Expr::And(list) | Expr::Or(list) => list.len() > 1,
            _ => false,
        }
    }
}

/// Constructors for the leaves of a where-clause.
pub struct Filter;

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    pub fn search(field: impl Into<String>, terms: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Search, terms.into())
    }

    /// Matches documents where the field exists.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field does not exist.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field equals any of the values.
    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::AnyOf,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches documents whose array field contains every one of the values.
    pub fn all_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::AllOf,
            Value::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches documents where the field equals none of the values.
    pub fn none_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Value>>) -> Expr {
        Filter::any_of(field, values).not()
    }
}

/// Walks an [`Expr`] tree.
pub trait QueryVisitor {
    type Output;
    type Error: Into<SessionError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Value,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}
