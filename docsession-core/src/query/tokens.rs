//! Query tokens: immutable fragments of a query that render themselves as RQL text.
//!
//! Every token writes into a shared `String` through `write_to`. Tokens hold no state
//! beyond what they were built with, so one token can be rendered any number of times.

use std::fmt::Write as _;

/// Words that must be quoted when used as a field name.
const RQL_KEYWORDS: &[&str] = &["as", "select", "where", "load", "group", "order", "include", "update"];

/// Writes a field name, quoting it when it collides with an RQL keyword.
pub fn write_field(writer: &mut String, field: &str) {
    let keyword = RQL_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(field));

    if keyword {
        writer.push('\'');
    }
    writer.push_str(field);
    if keyword {
        writer.push('\'');
    }
}

/// `from <collection>` or `from index '<index>'`, with an optional alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromToken {
    collection_name: Option<String>,
    index_name: Option<String>,
    alias: Option<String>,
}

impl FromToken {
    pub fn collection(name: impl Into<String>) -> Self {
        Self { collection_name: Some(name.into()), index_name: None, alias: None }
    }

    pub fn index(name: impl Into<String>) -> Self {
        Self { collection_name: None, index_name: Some(name.into()), alias: None }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn collection_name(&self) -> Option<&str> {
        self.collection_name.as_deref()
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index_name.as_deref()
    }

    pub fn write_to(&self, writer: &mut String) {
        match (&self.index_name, &self.collection_name) {
            (Some(index), _) => {
                writer.push_str("from index '");
                writer.push_str(index);
                writer.push('\'');
            }
            (None, Some(collection)) => {
                writer.push_str("from ");
                if collection.chars().any(char::is_whitespace) {
                    let _ = write!(writer, "\"{}\"", collection.replace('"', "\\\""));
                } else {
                    write_field(writer, collection);
                }
            }
            (None, None) => writer.push_str("from @all_docs"),
        }

        if let Some(alias) = &self.alias {
            writer.push_str(" as ");
            writer.push_str(alias);
        }
    }
}

/// A `group by` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupByToken {
    field_name: String,
}

impl GroupByToken {
    pub fn create(field_name: impl Into<String>) -> Self {
        Self { field_name: field_name.into() }
    }

    pub fn write_to(&self, writer: &mut String) {
        write_field(writer, &self.field_name);
    }
}

/// The grouping key as a selected value.
///
/// Without a field name the key renders as `key()`. The alias is dropped when it is equal
/// to the field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupByKeyToken {
    field_name: Option<String>,
    projected_name: Option<String>,
}

impl GroupByKeyToken {
    pub fn create(field_name: Option<&str>, projected_name: Option<&str>) -> Self {
        Self {
            field_name: field_name.map(str::to_string),
            projected_name: projected_name.map(str::to_string),
        }
    }

    pub fn write_to(&self, writer: &mut String) {
        write_field(writer, self.field_name.as_deref().unwrap_or("key()"));

        match &self.projected_name {
            Some(projected) if Some(projected) != self.field_name.as_ref() => {
                writer.push_str(" as ");
                writer.push_str(projected);
            }
            _ => {}
        }
    }
}

/// `sum(<field>) [as <projected>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBySumToken {
    field_name: String,
    projected_name: Option<String>,
}

impl GroupBySumToken {
    pub fn create(field_name: impl Into<String>, projected_name: Option<&str>) -> Self {
        Self { field_name: field_name.into(), projected_name: projected_name.map(str::to_string) }
    }

    pub fn write_to(&self, writer: &mut String) {
        writer.push_str("sum(");
        writer.push_str(&self.field_name);
        writer.push(')');

        if let Some(projected) = &self.projected_name {
            writer.push_str(" as ");
            writer.push_str(projected);
        }
    }
}

/// `count() [as <field>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupByCountToken {
    field_name: Option<String>,
}

impl GroupByCountToken {
    pub fn create(field_name: Option<&str>) -> Self {
        Self { field_name: field_name.map(str::to_string) }
    }

    pub fn write_to(&self, writer: &mut String) {
        writer.push_str("count()");

        if let Some(field) = &self.field_name {
            writer.push_str(" as ");
            writer.push_str(field);
        }
    }
}

/// A list of projected fields, each with an optional alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldsToFetchToken {
    fields: Vec<String>,
    projections: Vec<Option<String>>,
}

impl FieldsToFetchToken {
    /// Creates the token. `projections` is matched to `fields` by position; missing entries
    /// mean no alias.
    pub fn create(fields: Vec<String>, projections: Vec<Option<String>>) -> Self {
        Self { fields, projections }
    }

    pub fn write_to(&self, writer: &mut String) {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                writer.push_str(", ");
            }
            write_field(writer, field);

            match self.projections.get(i) {
                Some(Some(projection)) if projection != field => {
                    writer.push_str(" as ");
                    writer.push_str(projection);
                }
                _ => {}
            }
        }
    }
}

/// Comparison performed by a [`WhereToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhereOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
    AllIn,
    StartsWith,
    EndsWith,
    Exists,
    Search,
}

/// A single predicate, with its value passed as a named query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereToken {
    field_name: String,
    operator: WhereOperator,
    parameter_name: Option<String>,
}

impl WhereToken {
    pub fn create(
        field_name: impl Into<String>,
        operator: WhereOperator,
        parameter_name: Option<&str>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            operator,
            parameter_name: parameter_name.map(str::to_string),
        }
    }

    pub fn write_to(&self, writer: &mut String) {
        let parameter = self.parameter_name.as_deref().unwrap_or_default();

        match self.operator {
            WhereOperator::StartsWith | WhereOperator::EndsWith | WhereOperator::Search => {
                let function = match self.operator {
                    WhereOperator::StartsWith => "startsWith",
                    WhereOperator::EndsWith => "endsWith",
                    _ => "search",
                };
                writer.push_str(function);
                writer.push('(');
                write_field(writer, &self.field_name);
                let _ = write!(writer, ", ${parameter})");
            }
            WhereOperator::Exists => {
                writer.push_str("exists(");
                write_field(writer, &self.field_name);
                writer.push(')');
            }
            _ => {
                write_field(writer, &self.field_name);
                let op = match self.operator {
                    WhereOperator::Equals => " = ",
                    WhereOperator::NotEquals => " != ",
                    WhereOperator::GreaterThan => " > ",
                    WhereOperator::GreaterThanOrEqual => " >= ",
                    WhereOperator::LessThan => " < ",
                    WhereOperator::LessThanOrEqual => " <= ",
                    WhereOperator::In => " in (",
                    _ => " all in (",
                };
                writer.push_str(op);
                writer.push('$');
                writer.push_str(parameter);
                if matches!(self.operator, WhereOperator::In | WhereOperator::AllIn) {
                    writer.push(')');
                }
            }
        }
    }
}

/// How an `order by` field is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingType {
    #[default]
    String,
    Long,
    Double,
    AlphaNumeric,
}

/// An `order by` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByToken {
    field_name: String,
    descending: bool,
    ordering: OrderingType,
}

impl OrderByToken {
    pub fn create_ascending(field_name: impl Into<String>, ordering: OrderingType) -> Self {
        Self { field_name: field_name.into(), descending: false, ordering }
    }

    pub fn create_descending(field_name: impl Into<String>, ordering: OrderingType) -> Self {
        Self { field_name: field_name.into(), descending: true, ordering }
    }

    pub fn write_to(&self, writer: &mut String) {
        write_field(writer, &self.field_name);

        match self.ordering {
            OrderingType::String => {}
            OrderingType::Long => writer.push_str(" as long"),
            OrderingType::Double => writer.push_str(" as double"),
            OrderingType::AlphaNumeric => writer.push_str(" as alphaNumeric"),
        }

        if self.descending {
            writer.push_str(" desc");
        }
    }
}

/// Boolean connective between two where-clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    And,
    Or,
}

/// Any fragment of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryToken {
    From(FromToken),
    GroupBy(GroupByToken),
    GroupByKey(GroupByKeyToken),
    GroupBySum(GroupBySumToken),
    GroupByCount(GroupByCountToken),
    FieldsToFetch(FieldsToFetchToken),
    Where(WhereToken),
    OrderBy(OrderByToken),
    Operator(QueryOperator),
    Negate,
    OpenSubclause,
    CloseSubclause,
    Distinct,
}

impl QueryToken {
    pub fn write_to(&self, writer: &mut String) {
        match self {
            QueryToken::From(token) => token.write_to(writer),
            QueryToken::GroupBy(token) => token.write_to(writer),
            QueryToken::GroupByKey(token) => token.write_to(writer),
            QueryToken::GroupBySum(token) => token.write_to(writer),
            QueryToken::GroupByCount(token) => token.write_to(writer),
            QueryToken::FieldsToFetch(token) => token.write_to(writer),
            QueryToken::Where(token) => token.write_to(writer),
            QueryToken::OrderBy(token) => token.write_to(writer),
            QueryToken::Operator(QueryOperator::And) => writer.push_str("and"),
            QueryToken::Operator(QueryOperator::Or) => writer.push_str("or"),
            QueryToken::Negate => writer.push_str("not"),
            QueryToken::OpenSubclause => writer.push('('),
            QueryToken::CloseSubclause => writer.push(')'),
            QueryToken::Distinct => writer.push_str("distinct"),
        }
    }

    /// Renders the token on its own.
    pub fn render(&self) -> String {
        let mut writer = String::new();
        self.write_to(&mut writer);
        writer
    }
}

/// Writes a token sequence separated by single spaces, with no space just inside
/// parentheses.
pub fn write_token_sequence(writer: &mut String, tokens: &[QueryToken]) {
    let mut previous: Option<&QueryToken> = None;

    for token in tokens {
        let glued = matches!(previous, Some(QueryToken::OpenSubclause) | None)
            || matches!(token, QueryToken::CloseSubclause);
        if !glued {
            writer.push(' ');
        }
        token.write_to(writer);
        previous = Some(token);
    }
}
