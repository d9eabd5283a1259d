//! A parser for the subset of RQL the query builder emits.
//!
//! The text is tokenized, then parsed by recursive descent into a [`ParsedQuery`] whose
//! where-clause is an ordinary [`Expr`], so the server can evaluate it with the same
//! visitor machinery the client renders it with. Parameters (`$p0`) are resolved against
//! the query's parameter map while parsing.

use serde_json::{Map, Value};

use docsession_core::{
    error::{SessionError, SessionResult},
    query::{Expr, FieldOp, OrderingType},
};

/// Where a query reads documents from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Collection(String),
    Index(String),
    AllDocs,
}

/// One `order by` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderField {
    pub field: String,
    pub descending: bool,
    pub ordering: OrderingType,
}

/// One projected field and the name it is returned under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedField {
    pub field: String,
    pub alias: String,
}

/// The `select` clause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    /// Empty for `select *`.
    pub fields: Vec<ProjectedField>,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub source: QuerySource,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderField>,
    pub projection: Option<Projection>,
}

fn invalid(message: impl Into<String>) -> SessionError {
    SessionError::Server { status: 400, message: message.into() }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Parameter(String),
    Number(String),
    Symbol(&'static str),
}

const SYMBOLS: &[&str] = &["!=", ">=", "<=", "=", ">", "<", "(", ")", ",", "*"];

fn tokenize(text: &str) -> SessionResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if c.is_whitespace() {
            rest = &rest[c.len_utf8()..];
            continue;
        }

        if c == '\'' || c == '"' {
            let body = &rest[1..];
            let end = body
                .find(c)
                .ok_or_else(|| invalid(format!("unterminated string in query: {text}")))?;
            tokens.push(Token::Quoted(body[..end].to_string()));
            rest = &body[end + 1..];
            continue;
        }

        if c == '$' {
            let body = &rest[1..];
            let end = body
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(body.len());
            tokens.push(Token::Parameter(body[..end].to_string()));
            rest = &body[end..];
            continue;
        }

        if c.is_ascii_digit() || (c == '-' && rest[1..].starts_with(|c: char| c.is_ascii_digit())) {
            let end = rest[1..]
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .map_or(rest.len(), |end| end + 1);
            tokens.push(Token::Number(rest[..end].to_string()));
            rest = &rest[end..];
            continue;
        }

        if let Some(symbol) = SYMBOLS.iter().find(|symbol| rest.starts_with(**symbol)) {
            tokens.push(Token::Symbol(*symbol));
            rest = &rest[symbol.len()..];
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '@' {
            let end = rest
                .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '@' | '/')))
                .unwrap_or(rest.len());
            tokens.push(Token::Word(rest[..end].to_string()));
            rest = &rest[end..];
            continue;
        }

        return Err(invalid(format!("unexpected character '{c}' in query: {text}")));
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    parameters: &'a Map<String, Value>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.peek_keyword(keyword);
        if found {
            self.position += 1;
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> SessionResult<()> {
        if self.eat_keyword(keyword) {
            return Ok(());
        }
        Err(invalid(format!("expected '{keyword}', found {:?}", self.peek())))
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        let found = matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol);
        if found {
            self.position += 1;
        }
        found
    }

    fn expect_symbol(&mut self, symbol: &str) -> SessionResult<()> {
        if self.eat_symbol(symbol) {
            return Ok(());
        }
        Err(invalid(format!("expected '{symbol}', found {:?}", self.peek())))
    }

    /// A field name: a bare word or a quoted keyword.
    fn field(&mut self) -> SessionResult<String> {
        match self.next() {
            Some(Token::Word(word)) | Some(Token::Quoted(word)) => Ok(word),
            other => Err(invalid(format!("expected a field name, found {other:?}"))),
        }
    }

    fn value(&mut self) -> SessionResult<Value> {
        match self.next() {
            Some(Token::Parameter(name)) => self
                .parameters
                .get(&name)
                .cloned()
                .ok_or_else(|| invalid(format!("query parameter ${name} was not provided"))),
            Some(Token::Quoted(text)) => Ok(Value::String(text)),
            Some(Token::Number(number)) => serde_json::from_str(&number)
                .map_err(|_| invalid(format!("invalid number {number}"))),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("null") => Ok(Value::Null),
            other => Err(invalid(format!("expected a value, found {other:?}"))),
        }
    }

    fn source(&mut self) -> SessionResult<QuerySource> {
        self.expect_keyword("from")?;

        if self.eat_keyword("index") {
            return match self.next() {
                Some(Token::Quoted(name)) | Some(Token::Word(name)) => Ok(QuerySource::Index(name)),
                other => Err(invalid(format!("expected an index name, found {other:?}"))),
            };
        }

        match self.next() {
            Some(Token::Word(name)) if name == "@all_docs" => Ok(QuerySource::AllDocs),
            Some(Token::Word(name)) | Some(Token::Quoted(name)) => Ok(QuerySource::Collection(name)),
            other => Err(invalid(format!("expected a collection name, found {other:?}"))),
        }
    }

    fn or_expr(&mut self) -> SessionResult<Expr> {
        let mut operands = vec![self.and_expr()?];
        while self.eat_keyword("or") {
            operands.push(self.and_expr()?);
        }

        Ok(if operands.len() == 1 { operands.remove(0) } else { Expr::Or(operands) })
    }

    fn and_expr(&mut self) -> SessionResult<Expr> {
        let mut operands = vec![self.unary()?];
        while self.eat_keyword("and") {
            operands.push(self.unary()?);
        }

        Ok(if operands.len() == 1 { operands.remove(0) } else { Expr::And(operands) })
    }

    fn unary(&mut self) -> SessionResult<Expr> {
        if self.eat_keyword("not") {
            return Ok(self.unary()?.not());
        }
        if self.eat_symbol("(") {
            let expr = self.or_expr()?;
            self.expect_symbol(")")?;
            return Ok(expr);
        }
        self.predicate()
    }

    fn predicate(&mut self) -> SessionResult<Expr> {
        let function = match (self.peek(), self.tokens.get(self.position + 1)) {
            (Some(Token::Word(word)), Some(Token::Symbol("("))) => Some(word.to_lowercase()),
            _ => None,
        };

        if let Some(function) = function {
            self.position += 2;
            let field = self.field()?;

            let expr = match function.as_str() {
                "exists" => Expr::Exists(field, true),
                "startswith" | "endswith" | "search" => {
                    self.expect_symbol(",")?;
                    let value = self.value()?;
                    let op = match function.as_str() {
                        "startswith" => FieldOp::StartsWith,
                        "endswith" => FieldOp::EndsWith,
                        _ => FieldOp::Search,
                    };
                    Expr::field(field, op, value)
                }
                other => return Err(invalid(format!("unsupported function {other}()"))),
            };

            self.expect_symbol(")")?;
            return Ok(expr);
        }

        let field = self.field()?;

        if self.eat_keyword("in") {
            return Ok(Expr::field(field, FieldOp::AnyOf, self.value_list()?));
        }
        if self.eat_keyword("all") {
            self.expect_keyword("in")?;
            return Ok(Expr::field(field, FieldOp::AllOf, self.value_list()?));
        }

        let op = match self.next() {
            Some(Token::Symbol("=")) => FieldOp::Eq,
            Some(Token::Symbol("!=")) => FieldOp::Ne,
            Some(Token::Symbol(">")) => FieldOp::Gt,
            Some(Token::Symbol(">=")) => FieldOp::Gte,
            Some(Token::Symbol("<")) => FieldOp::Lt,
            Some(Token::Symbol("<=")) => FieldOp::Lte,
            other => return Err(invalid(format!("expected an operator after {field}, found {other:?}"))),
        };

        Ok(Expr::field(field, op, self.value()?))
    }

    /// `( value, ... )`. A single array parameter is spread into the list.
    fn value_list(&mut self) -> SessionResult<Value> {
        self.expect_symbol("(")?;

        let mut values = Vec::new();
        loop {
            match self.value()? {
                Value::Array(items) => values.extend(items),
                value => values.push(value),
            }
            if !self.eat_symbol(",") {
                break;
            }
        }

        self.expect_symbol(")")?;
        Ok(Value::Array(values))
    }

    fn order_by(&mut self) -> SessionResult<Vec<OrderField>> {
        let mut fields = Vec::new();

        loop {
            let field = self.field()?;

            let mut ordering = OrderingType::String;
            if self.eat_keyword("as") {
                ordering = match self.next() {
                    Some(Token::Word(word)) if word.eq_ignore_ascii_case("long") => OrderingType::Long,
                    Some(Token::Word(word)) if word.eq_ignore_ascii_case("double") => OrderingType::Double,
                    Some(Token::Word(word)) if word.eq_ignore_ascii_case("alphaNumeric") => {
                        OrderingType::AlphaNumeric
                    }
                    Some(Token::Word(word)) if word.eq_ignore_ascii_case("string") => OrderingType::String,
                    other => return Err(invalid(format!("unknown ordering {other:?}"))),
                };
            }

            let descending = self.eat_keyword("desc");
            if !descending {
                self.eat_keyword("asc");
            }

            fields.push(OrderField { field, descending, ordering });
            if !self.eat_symbol(",") {
                return Ok(fields);
            }
        }
    }

    fn projection(&mut self) -> SessionResult<Projection> {
        let mut projection = Projection { fields: Vec::new(), distinct: self.eat_keyword("distinct") };

        if self.eat_symbol("*") {
            return Ok(projection);
        }

        loop {
            if matches!(self.tokens.get(self.position + 1), Some(Token::Symbol("("))) {
                return Err(invalid("aggregations in select are not supported"));
            }

            let field = self.field()?;
            let alias = if self.eat_keyword("as") { self.field()? } else { field.clone() };
            projection.fields.push(ProjectedField { field, alias });

            if !self.eat_symbol(",") {
                return Ok(projection);
            }
        }
    }
}

/// Parses a query, resolving `$name` parameters from `parameters`.
///
/// Fails with a 400 [`SessionError::Server`] on syntax errors, missing parameters and
/// group-by queries.
pub fn parse(query: &str, parameters: &Map<String, Value>) -> SessionResult<ParsedQuery> {
    let mut parser = Parser { tokens: tokenize(query)?, position: 0, parameters };

    let source = parser.source()?;
    if parser.eat_keyword("as") {
        parser.field()?;
    }

    if parser.peek_keyword("group") {
        return Err(invalid("group by queries are not supported by the in-memory server"));
    }

    let filter = if parser.eat_keyword("where") { Some(parser.or_expr()?) } else { None };

    let order_by = if parser.eat_keyword("order") {
        parser.expect_keyword("by")?;
        parser.order_by()?
    } else {
        Vec::new()
    };

    let projection = if parser.eat_keyword("select") { Some(parser.projection()?) } else { None };

    if let Some(token) = parser.peek() {
        return Err(invalid(format!("unexpected {token:?} at the end of query: {query}")));
    }

    Ok(ParsedQuery { source, filter, order_by, projection })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsession_core::query::{DocumentQuery, Filter};
    use serde_json::json;

    fn parse_built(query: DocumentQuery) -> ParsedQuery {
        let index_query = query.to_index_query().unwrap();
        parse(&index_query.query, &index_query.query_parameters).unwrap()
    }

    #[test]
    fn parses_builder_output() {
        let parsed = parse_built(
            DocumentQuery::from_collection("Orders")
                .filter(Filter::eq("Company", "companies/1"))
                .filter(Filter::gt("Total", 100))
                .order_by_descending("Total")
                .select(["Company", "Total"]),
        );

        assert_eq!(parsed.source, QuerySource::Collection("Orders".to_string()));
        assert_eq!(
            parsed.filter,
            Some(Filter::and([Filter::eq("Company", "companies/1"), Filter::gt("Total", 100)]))
        );
        assert_eq!(parsed.order_by.len(), 1);
        assert!(parsed.order_by[0].descending);

        let projection = parsed.projection.unwrap();
        assert_eq!(projection.fields.len(), 2);
        assert!(!projection.distinct);
    }

    #[test]
    fn nested_logic_round_trips() {
        let expr = Filter::or([
            Filter::starts_with("FirstName", "A"),
            Filter::and([Filter::exists("Manager"), Filter::lte("Age", 40)]),
        ]);
        let parsed = parse_built(
            DocumentQuery::from_collection("Employees")
                .filter(expr.clone())
                .filter(Filter::none_of("Title", ["Intern"])),
        );

        assert_eq!(parsed.filter, Some(Filter::and([expr, Filter::none_of("Title", ["Intern"])])));
    }

    #[test]
    fn quoted_keywords_and_index_source() {
        let parsed = parse(
            "from index 'Orders/ByCompany' where 'Order' = $p0 and not exists(ShippedAt) order by Total as double",
            json!({ "p0": 3 }).as_object().unwrap(),
        )
        .unwrap();

        assert_eq!(parsed.source, QuerySource::Index("Orders/ByCompany".to_string()));
        assert_eq!(
            parsed.filter,
            Some(Filter::and([Filter::eq("Order", 3), Filter::exists("ShippedAt").not()]))
        );
        assert_eq!(parsed.order_by[0].ordering, OrderingType::Double);
    }

    #[test]
    fn rejects_group_by_and_missing_parameters() {
        let grouped = DocumentQuery::from_collection("Orders")
            .group_by("Company")
            .select_count(Some("Count"))
            .to_index_query()
            .unwrap();
        assert!(matches!(
            parse(&grouped.query, &grouped.query_parameters),
            Err(SessionError::Server { status: 400, .. })
        ));

        assert!(matches!(
            parse("from Orders where Total = $p9", &Map::new()),
            Err(SessionError::Server { status: 400, .. })
        ));
    }

    #[test]
    fn distinct_star_and_aliases() {
        let parsed = parse("from @all_docs select distinct *", &Map::new()).unwrap();
        assert_eq!(parsed.source, QuerySource::AllDocs);
        assert_eq!(parsed.projection, Some(Projection { fields: Vec::new(), distinct: true }));

        let parsed = parse("from Orders select Company as Who", &Map::new()).unwrap();
        assert_eq!(
            parsed.projection.unwrap().fields,
            vec![ProjectedField { field: "Company".to_string(), alias: "Who".to_string() }]
        );
    }
}
