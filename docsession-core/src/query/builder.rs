//! Fluent construction of RQL queries.
//!
//! [`DocumentQuery`] collects tokens per clause and assembles them in grammar order:
//! `from`, `group by`, `where`, `order by`, `select`.
//!
//! ```ignore
//! use docsession::query::{DocumentQuery, Filter};
//!
//! let query = DocumentQuery::from_collection("Orders")
//!     .filter(Filter::eq("Company", "companies/1"))
//!     .order_by_descending("Total")
//!     .take(10)
//!     .to_index_query()?;
//!
//! assert_eq!(query.query, "from Orders where Company = $p0 order by Total desc");
//! ```

use serde_json::{Map, Value};

use crate::{
    document::Document,
    error::{SessionError, SessionResult},
    query::{
        IndexQuery,
        filter::{Expr, FieldOp, QueryVisitor},
        tokens::{
            FieldsToFetchToken, FromToken, GroupByCountToken, GroupByKeyToken, GroupBySumToken,
            GroupByToken, OrderByToken, OrderingType, QueryOperator, QueryToken, WhereOperator,
            WhereToken, write_token_sequence,
        },
    },
};

/// Renders an [`Expr`] into where-tokens, collecting its values as `$pN` parameters.
pub(crate) struct WhereTokenWriter<'a> {
    tokens: Vec<QueryToken>,
    parameters: &'a mut Map<String, Value>,
}

impl<'a> WhereTokenWriter<'a> {
    pub(crate) fn new(parameters: &'a mut Map<String, Value>) -> Self {
        Self { tokens: Vec::new(), parameters }
    }

    pub(crate) fn into_tokens(self) -> Vec<QueryToken> {
        self.tokens
    }

    fn add_parameter(&mut self, value: &Value) -> String {
        let name = format!("p{}", self.parameters.len());
        self.parameters.insert(name.clone(), value.clone());
        name
    }

    fn visit_operand(&mut self, expr: &Expr) -> SessionResult<()> {
        if expr.is_compound() {
            self.tokens.push(QueryToken::OpenSubclause);
            self.visit_expr(expr)?;
            self.tokens.push(QueryToken::CloseSubclause);
            Ok(())
        } else {
            self.visit_expr(expr)
        }
    }

    fn visit_list(&mut self, exprs: &[Expr], operator: QueryOperator) -> SessionResult<()> {
        if exprs.is_empty() {
            return Err(SessionError::InvalidArgument(
                "a logical filter needs at least one operand".to_string(),
            ));
        }

        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.tokens.push(QueryToken::Operator(operator));
            }
            self.visit_operand(expr)?;
        }
        Ok(())
    }
}

impl QueryVisitor for WhereTokenWriter<'_> {
    type Output = ();
    type Error = SessionError;

    fn visit_and(&mut self, exprs: &[Expr]) -> SessionResult<()> {
        self.visit_list(exprs, QueryOperator::And)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> SessionResult<()> {
        self.visit_list(exprs, QueryOperator::Or)
    }

    fn visit_not(&mut self, expr: &Expr) -> SessionResult<()> {
        self.tokens.push(QueryToken::Negate);
        self.visit_operand(expr)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> SessionResult<()> {
        if !should_exist {
            self.tokens.push(QueryToken::Negate);
        }
        self.tokens.push(QueryToken::Where(WhereToken::create(field, WhereOperator::Exists, None)));
        Ok(())
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Value) -> SessionResult<()> {
        let operator = match op {
            FieldOp::Eq => WhereOperator::Equals,
            FieldOp::Ne => WhereOperator::NotEquals,
            FieldOp::Gt => WhereOperator::GreaterThan,
            FieldOp::Gte => WhereOperator::GreaterThanOrEqual,
            FieldOp::Lt => WhereOperator::LessThan,
            FieldOp::Lte => WhereOperator::LessThanOrEqual,
            FieldOp::StartsWith => WhereOperator::StartsWith,
            FieldOp::EndsWith => WhereOperator::EndsWith,
            FieldOp::AnyOf => WhereOperator::In,
            FieldOp::AllOf => WhereOperator::AllIn,
            FieldOp::Search => WhereOperator::Search,
        };

        let parameter = self.add_parameter(value);
        self.tokens.push(QueryToken::Where(WhereToken::create(field, operator, Some(&parameter))));
        Ok(())
    }
}

/// A query under construction.
#[derive(Debug, Clone)]
pub struct DocumentQuery {
    from: FromToken,
    filter: Option<Expr>,
    group_by: Vec<GroupByToken>,
    select: Vec<QueryToken>,
    order_by: Vec<OrderByToken>,
    distinct: bool,
    start: Option<usize>,
    page_size: Option<usize>,
    wait_for_non_stale_results: bool,
}

impl DocumentQuery {
    fn new(from: FromToken) -> Self {
        Self {
            from,
            filter: None,
            group_by: Vec::new(),
            select: Vec::new(),
            order_by: Vec::new(),
            distinct: false,
            start: None,
            page_size: None,
            wait_for_non_stale_results: false,
        }
    }

    /// Queries a collection through its automatic index.
    pub fn from_collection(name: impl Into<String>) -> Self {
        Self::new(FromToken::collection(name))
    }

    /// Queries a named index.
    pub fn from_index(name: impl Into<String>) -> Self {
        Self::new(FromToken::index(name))
    }

    /// Queries the collection of document type `D`.
    pub fn for_document<D: Document>() -> Self {
        Self::from_collection(D::collection_name())
    }

    /// Adds a filter. Repeated calls are combined with AND.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(GroupByToken::create(field));
        self
    }

    /// Selects the grouping key, `key()` when `field` is `None`.
    pub fn select_key(mut self, field: Option<&str>, projected: Option<&str>) -> Self {
        self.select.push(QueryToken::GroupByKey(GroupByKeyToken::create(field, projected)));
        self
    }

    pub fn select_sum(mut self, field: impl Into<String>, projected: Option<&str>) -> Self {
        self.select.push(QueryToken::GroupBySum(GroupBySumToken::create(field, projected)));
        self
    }

    pub fn select_count(mut self, projected: Option<&str>) -> Self {
        self.select.push(QueryToken::GroupByCount(GroupByCountToken::create(projected)));
        self
    }

    /// Projects the given fields.
    pub fn select(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        self.select.push(QueryToken::FieldsToFetch(FieldsToFetchToken::create(fields, Vec::new())));
        self
    }

    /// Projects one field under an alias.
    pub fn select_as(mut self, field: impl Into<String>, alias: impl Into<String>) -> Self {
        self.select.push(QueryToken::FieldsToFetch(FieldsToFetchToken::create(
            vec![field.into()],
            vec![Some(alias.into())],
        )));
        self
    }

    pub fn order_by(self, field: impl Into<String>) -> Self {
        self.order_by_with(field, OrderingType::String, false)
    }

    pub fn order_by_descending(self, field: impl Into<String>) -> Self {
        self.order_by_with(field, OrderingType::String, true)
    }

    pub fn order_by_with(mut self, field: impl Into<String>, ordering: OrderingType, descending: bool) -> Self {
        self.order_by.push(if descending {
            OrderByToken::create_descending(field, ordering)
        } else {
            OrderByToken::create_ascending(field, ordering)
        });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Skips the first `count` results.
    pub fn skip(mut self, count: usize) -> Self {
        self.start = Some(count);
        self
    }

    /// Returns at most `count` results.
    pub fn take(mut self, count: usize) -> Self {
        self.page_size = Some(count);
        self
    }

    /// Asks the server to wait for the index to catch up; a stale answer is retried.
    pub fn wait_for_non_stale_results(mut self) -> Self {
        self.wait_for_non_stale_results = true;
        self
    }

    pub fn is_waiting_for_non_stale_results(&self) -> bool {
        self.wait_for_non_stale_results
    }

    /// Returns the `from` clause token.
    pub fn from_token(&self) -> &FromToken {
        &self.from
    }

    /// Assembles the query text and its parameters.
    pub fn to_index_query(&self) -> SessionResult<IndexQuery> {
        let mut writer = String::new();
        let mut parameters = Map::new();

        self.from.write_to(&mut writer);

        if !self.group_by.is_empty() {
            writer.push_str(" group by ");
            for (i, token) in self.group_by.iter().enumerate() {
                if i > 0 {
                    writer.push_str(", ");
                }
                token.write_to(&mut writer);
            }
        }

        if let Some(filter) = &self.filter {
            let mut where_writer = WhereTokenWriter::new(&mut parameters);
            where_writer.visit_expr(filter)?;
            let tokens = where_writer.into_tokens();

            writer.push_str(" where ");
            write_token_sequence(&mut writer, &tokens);
        }

        if !self.order_by.is_empty() {
            writer.push_str(" order by ");
            for (i, token) in self.order_by.iter().enumerate() {
                if i > 0 {
                    writer.push_str(", ");
                }
                token.write_to(&mut writer);
            }
        }

        if !self.select.is_empty() || self.distinct {
            writer.push_str(" select ");
            if self.distinct {
                QueryToken::Distinct.write_to(&mut writer);
                writer.push(' ');
            }
            if self.select.is_empty() {
                writer.push('*');
            }
            for (i, token) in self.select.iter().enumerate() {
                if i > 0 {
                    writer.push_str(", ");
                }
                token.write_to(&mut writer);
            }
        }

        Ok(IndexQuery {
            query: writer,
            query_parameters: parameters,
            start: self.start,
            page_size: self.page_size,
            wait_for_non_stale_results: self.wait_for_non_stale_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::Filter;
    use serde_json::json;

    #[test]
    fn builds_clauses_in_grammar_order() {
        let query = DocumentQuery::from_collection("Orders")
            .filter(Filter::eq("Company", "companies/1"))
            .filter(Filter::gt("Total", 100))
            .order_by_descending("Total")
            .select(["Company", "Total"])
            .take(5)
            .to_index_query()
            .unwrap();

        assert_eq!(
            query.query,
            "from Orders where Company = $p0 and Total > $p1 order by Total desc select Company, Total"
        );
        assert_eq!(query.query_parameters["p0"], json!("companies/1"));
        assert_eq!(query.query_parameters["p1"], json!(100));
        assert_eq!(query.page_size, Some(5));
    }

    #[test]
    fn nested_logic_is_parenthesized() {
        let query = DocumentQuery::from_collection("Employees")
            .filter(Filter::or([
                Filter::starts_with("FirstName", "A"),
                Filter::and([Filter::exists("Manager"), Filter::lte("Age", 40)]),
            ]))
            .filter(Filter::none_of("Title", ["Intern"]))
            .to_index_query()
            .unwrap();

        assert_eq!(
            query.query,
            "from Employees where (startsWith(FirstName, $p0) or (exists(Manager) and Age <= $p1)) and not Title in ($p2)"
        );
        assert_eq!(query.query_parameters["p2"], json!(["Intern"]));
    }

    #[test]
    fn group_by_selects_key_sum_and_count() {
        let query = DocumentQuery::from_collection("Orders")
            .group_by("Company")
            .select_key(Some("Company"), Some("Company"))
            .select_sum("Total", Some("Total"))
            .select_count(Some("Count"))
            .to_index_query()
            .unwrap();

        assert_eq!(
            query.query,
            "from Orders group by Company select Company, sum(Total) as Total, count() as Count"
        );
    }

    #[test]
    fn empty_logical_filter_is_rejected() {
        let result = DocumentQuery::from_collection("Orders")
            .filter(Filter::and(Vec::new()))
            .to_index_query();

        assert!(matches!(result, Err(SessionError::InvalidArgument(_))));
    }

    #[test]
    fn negated_existence_and_distinct() {
        let query = DocumentQuery::from_index("Orders/ByCompany")
            .filter(Filter::not_exists("ShippedAt"))
            .distinct()
            .to_index_query()
            .unwrap();

        assert_eq!(query.query, "from index 'Orders/ByCompany' where not exists(ShippedAt) select distinct *");
        assert!(query.query_parameters.is_empty());
    }
}
