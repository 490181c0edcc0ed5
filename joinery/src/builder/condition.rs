//! Condition trees
//!
//! A where callback receives a [`WhereBuilder`] and chains conditions on it.
//! Each condition names a column, then picks a comparison on the returned
//! [`PendingCondition`]. `and`/`or` open a nested group through another
//! callback, and `not` negates whatever comes next. The first error raised
//! anywhere in the chain is kept and reported when the tree is finished.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::builder::common::{ColumnRef, IntoColumnRef, TableRef};
use crate::operator::{Chain, Operator};
use crate::{Error, Result, Value};

/// Turns dates into the text form the adapter expects
pub type DateFormatter = Arc<dyn Fn(&DateTime<Utc>) -> String + Send + Sync>;

/// A single comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub chain: Chain,
    pub column: ColumnRef,
    pub operator: Operator,
    /// Scalar, or an array for `IN` and `BETWEEN`
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Leaf(Condition),
    Group { chain: Chain, nodes: Vec<ConditionNode> },
}

impl ConditionNode {
    pub fn chain(&self) -> Chain {
        match self {
            ConditionNode::Leaf(condition) => condition.chain,
            ConditionNode::Group { chain, .. } => *chain,
        }
    }

    fn set_chain(&mut self, next: Chain) {
        match self {
            ConditionNode::Leaf(condition) => condition.chain = next,
            ConditionNode::Group { chain, .. } => *chain = next,
        }
    }
}

/// An ordered list of condition nodes; the first one leads with `WHERE`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionTree {
    nodes: Vec<ConditionNode>,
}

impl ConditionTree {
    pub fn nodes(&self) -> &[ConditionNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check the structural invariants of the tree
    pub fn validate(&self) -> Result<()> {
        validate_level(&self.nodes)
    }

    /// Every column the tree compares
    pub fn columns(&self) -> Vec<&ColumnRef> {
        fn collect<'a>(nodes: &'a [ConditionNode], out: &mut Vec<&'a ColumnRef>) {
            for node in nodes {
                match node {
                    ConditionNode::Leaf(condition) => out.push(&condition.column),
                    ConditionNode::Group { nodes, .. } => collect(nodes, out),
                }
            }
        }

        let mut columns = Vec::new();
        collect(&self.nodes, &mut columns);
        columns
    }

    /// The whole tree under a leading `NOT`
    pub(crate) fn negated(mut self) -> ConditionTree {
        if self.nodes.len() == 1 {
            let chain = self.nodes[0].chain().negated();
            self.nodes[0].set_chain(chain);
            return self;
        }
        ConditionTree {
            nodes: vec![ConditionNode::Group {
                chain: Chain::WhereNot,
                nodes: self.nodes,
            }],
        }
    }

    /// Append `other` as an `AND` (or `AND NOT`) group
    pub(crate) fn and_group(mut self, other: ConditionTree, negated: bool) -> ConditionTree {
        let chain = if negated { Chain::AndNot } else { Chain::And };
        let mut other = other.nodes;
        if other.len() == 1 {
            let mut node = other.remove(0);
            let chain = if node.chain().is_negated() {
                chain.negated()
            } else {
                chain
            };
            node.set_chain(chain);
            self.nodes.push(node);
        } else {
            for node in other.iter_mut().take(1) {
                let leading = node.chain().as_leading();
                node.set_chain(leading);
            }
            self.nodes.push(ConditionNode::Group { chain, nodes: other });
        }
        self
    }

    /// Match any of the given primary key tuples
    pub(crate) fn matching_keys(keys: &[ColumnRef], tuples: Vec<Vec<Value>>) -> Result<ConditionTree> {
        if keys.is_empty() || tuples.is_empty() {
            return Err(Error::internal("key match needs at least one key and one record"));
        }
        if keys.len() == 1 {
            let values: Vec<Value> = tuples.into_iter().flatten().collect();
            let (operator, value) = match <[Value; 1]>::try_from(values) {
                Ok([single]) => (Operator::EQ, single),
                Err(values) => (Operator::IN, Value::Array(values)),
            };
            return Ok(ConditionTree {
                nodes: vec![ConditionNode::Leaf(Condition {
                    chain: Chain::Where,
                    column: keys[0].clone(),
                    operator,
                    value,
                })],
            });
        }

        let nodes = tuples
            .into_iter()
            .enumerate()
            .map(|(index, tuple)| ConditionNode::Group {
                chain: if index == 0 { Chain::Where } else { Chain::Or },
                nodes: keys
                    .iter()
                    .zip(tuple)
                    .enumerate()
                    .map(|(position, (key, value))| {
                        ConditionNode::Leaf(Condition {
                            chain: if position == 0 { Chain::Where } else { Chain::And },
                            column: key.clone(),
                            operator: Operator::EQ,
                            value,
                        })
                    })
                    .collect(),
            })
            .collect();
        Ok(ConditionTree { nodes })
    }

    /// `column IN (values)` for every pair, joined with `AND`
    pub(crate) fn all_in(columns: Vec<(ColumnRef, Vec<Value>)>) -> ConditionTree {
        let nodes = columns
            .into_iter()
            .enumerate()
            .map(|(index, (column, values))| {
                ConditionNode::Leaf(Condition {
                    chain: if index == 0 { Chain::Where } else { Chain::And },
                    column,
                    operator: Operator::IN,
                    value: Value::Array(values),
                })
            })
            .collect();
        ConditionTree { nodes }
    }
}

fn validate_level(nodes: &[ConditionNode]) -> Result<()> {
    if nodes.is_empty() {
        return Err(Error::internal("empty condition group"));
    }
    for (index, node) in nodes.iter().enumerate() {
        let leading = node.chain().is_leading();
        if index == 0 && !leading {
            return Err(Error::internal(format!(
                "condition group opens with {} instead of WHERE",
                node.chain()
            )));
        }
        if index > 0 && leading {
            return Err(Error::internal(format!(
                "{} used after the first condition of a group",
                node.chain()
            )));
        }
        match node {
            ConditionNode::Leaf(condition) => validate_condition(condition)?,
            ConditionNode::Group { nodes, .. } => validate_level(nodes)?,
        }
    }
    Ok(())
}

fn validate_condition(condition: &Condition) -> Result<()> {
    let valid = match condition.operator {
        Operator::IS | Operator::IS_NOT => condition.value.is_null(),
        Operator::IN => matches!(condition.value.as_array(), Some(values) if !values.is_empty()),
        Operator::BETWEEN => matches!(condition.value.as_array(), Some(values) if values.len() == 2),
        _ => !condition.value.is_null(),
    };
    if valid {
        Ok(())
    } else {
        Err(Error::internal(format!(
            "{} {} {:?} is not a valid comparison",
            condition.column.command_alias, condition.operator, condition.value
        )))
    }
}

/// Builder handed to where callbacks
#[must_use]
pub struct WhereBuilder {
    scope: TableRef,
    format_date: DateFormatter,
    nodes: Vec<ConditionNode>,
    negate_next: bool,
    error: Option<Error>,
}

impl fmt::Debug for WhereBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhereBuilder")
            .field("table", &self.scope.table())
            .field("nodes", &self.nodes)
            .field("negate_next", &self.negate_next)
            .field("error", &self.error)
            .finish()
    }
}

impl WhereBuilder {
    pub(crate) fn new(scope: TableRef, format_date: DateFormatter) -> Self {
        Self {
            scope,
            format_date,
            nodes: Vec::new(),
            negate_next: false,
            error: None,
        }
    }

    /// The table conditions are resolved against
    pub fn table(&self) -> &TableRef {
        &self.scope
    }

    /// Start a condition; joins the previous one with `AND`
    pub fn where_<C: IntoColumnRef>(self, column: C) -> PendingCondition {
        self.pending(Chain::Where, column)
    }

    pub fn and_where<C: IntoColumnRef>(self, column: C) -> PendingCondition {
        self.pending(Chain::And, column)
    }

    pub fn or_where<C: IntoColumnRef>(self, column: C) -> PendingCondition {
        self.pending(Chain::Or, column)
    }

    /// Negate the next condition or group
    pub fn not(mut self) -> Self {
        self.negate_next = !self.negate_next;
        self
    }

    /// Nested group joined with `AND`
    pub fn and<F>(self, build: F) -> Self
    where
        F: FnOnce(WhereBuilder) -> WhereBuilder,
    {
        self.group(Chain::And, build)
    }

    /// Nested group joined with `OR`
    pub fn or<F>(self, build: F) -> Self
    where
        F: FnOnce(WhereBuilder) -> WhereBuilder,
    {
        self.group(Chain::Or, build)
    }

    fn pending<C: IntoColumnRef>(self, chain: Chain, column: C) -> PendingCondition {
        let column = column.into_column_ref(&self.scope);
        PendingCondition {
            builder: self,
            chain,
            column,
        }
    }

    fn group<F>(mut self, chain: Chain, build: F) -> Self
    where
        F: FnOnce(WhereBuilder) -> WhereBuilder,
    {
        if self.error.is_some() {
            return self;
        }
        let nested = build(WhereBuilder::new(self.scope.clone(), self.format_date.clone()));
        match nested.finish() {
            Ok(tree) => {
                let chain = self.resolve_chain(chain);
                self.nodes.push(ConditionNode::Group {
                    chain,
                    nodes: tree.nodes,
                });
            }
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Chain a new node actually gets at its position, with any pending
    /// negation applied
    fn resolve_chain(&mut self, requested: Chain) -> Chain {
        let chain = if self.nodes.is_empty() {
            requested.as_leading()
        } else if requested.is_leading() {
            Chain::And
        } else {
            requested
        };
        if std::mem::take(&mut self.negate_next) {
            chain.negated()
        } else {
            chain
        }
    }

    /// Close the builder, surfacing the first error of the chain
    pub(crate) fn finish(self) -> Result<ConditionTree> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.negate_next {
            return Err(Error::invalid_query("not() must be followed by a condition"));
        }
        if self.nodes.is_empty() {
            return Err(Error::invalid_query("where callback added no conditions"));
        }
        let tree = ConditionTree { nodes: self.nodes };
        tree.validate()?;
        Ok(tree)
    }
}

/// A condition waiting for its comparison
#[must_use]
pub struct PendingCondition {
    builder: WhereBuilder,
    chain: Chain,
    column: Result<ColumnRef>,
}

impl PendingCondition {
    pub fn equals<V: Into<Value>>(self, value: V) -> WhereBuilder {
        self.compare(Operator::EQ, value.into())
    }

    pub fn not_equals<V: Into<Value>>(self, value: V) -> WhereBuilder {
        self.compare(Operator::NEQ, value.into())
    }

    pub fn less_than<V: Into<Value>>(self, value: V) -> WhereBuilder {
        self.compare(Operator::LT, value.into())
    }

    pub fn less_than_or_equal<V: Into<Value>>(self, value: V) -> WhereBuilder {
        self.compare(Operator::LTE, value.into())
    }

    pub fn greater_than<V: Into<Value>>(self, value: V) -> WhereBuilder {
        self.compare(Operator::GT, value.into())
    }

    pub fn greater_than_or_equal<V: Into<Value>>(self, value: V) -> WhereBuilder {
        self.compare(Operator::GTE, value.into())
    }

    /// Inclusive range; both bounds must be numbers or both dates
    pub fn between<L: Into<Value>, H: Into<Value>>(self, low: L, high: H) -> WhereBuilder {
        let (low, high) = (low.into(), high.into());
        let comparable = (low.is_numeric() && high.is_numeric())
            || (matches!(low, Value::Date(_)) && matches!(high, Value::Date(_)));
        if !comparable {
            let message = format!(
                "between() needs two numbers or two dates, got {} and {}",
                low.type_name(),
                high.type_name()
            );
            return self.fail(Error::invalid_query(message));
        }
        self.finish(Operator::BETWEEN, Value::Array(vec![low, high]))
    }

    /// Membership in a non-empty set of plain scalars
    pub fn in_set<I, V>(self, values: I) -> WhereBuilder
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return self.fail(Error::invalid_query("in_set() needs at least one value"));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_primitive()) {
            let message = format!("in_set() only accepts scalar values, got {}", bad.type_name());
            return self.fail(Error::invalid_query(message));
        }
        self.finish(Operator::IN, Value::Array(values))
    }

    pub fn like<S: Into<String>>(self, pattern: S) -> WhereBuilder {
        self.finish(Operator::LIKE, Value::String(pattern.into()))
    }

    pub fn contains(self, text: &str) -> WhereBuilder {
        self.like(format!("%{}%", text))
    }

    pub fn starts_with(self, text: &str) -> WhereBuilder {
        self.like(format!("{}%", text))
    }

    pub fn ends_with(self, text: &str) -> WhereBuilder {
        self.like(format!("%{}", text))
    }

    pub fn is_null(self) -> WhereBuilder {
        self.compare(Operator::EQ, Value::Null)
    }

    pub fn is_not_null(self) -> WhereBuilder {
        self.compare(Operator::NEQ, Value::Null)
    }

    /// Scalar comparison; a NULL value turns `=`/`<>` into `IS`/`IS NOT`
    fn compare(self, operator: Operator, value: Value) -> WhereBuilder {
        if value.as_array().is_some() {
            let message = format!("{} expects a single value; use in_set() for lists", operator);
            return self.fail(Error::invalid_query(message));
        }
        if value.is_null() {
            let rewritten = operator.for_null();
            if rewritten == operator {
                let message = format!("cannot compare NULL with {}", operator);
                return self.fail(Error::invalid_query(message));
            }
            return self.finish(rewritten, value);
        }
        self.finish(operator, value)
    }

    fn fail(self, err: Error) -> WhereBuilder {
        let mut builder = self.builder;
        builder.error.get_or_insert(err);
        builder
    }

    fn finish(self, operator: Operator, value: Value) -> WhereBuilder {
        let mut builder = self.builder;
        if builder.error.is_some() {
            return builder;
        }
        let column = match self.column {
            Ok(column) => column,
            Err(err) => {
                builder.error = Some(err);
                return builder;
            }
        };
        let value = value.normalize_dates(&*builder.format_date);
        let chain = builder.resolve_chain(self.chain);
        builder.nodes.push(ConditionNode::Leaf(Condition {
            chain,
            column,
            operator,
            value,
        }));
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::{Declaration, Relationships};
    use chrono::TimeZone;

    fn builder() -> WhereBuilder {
        let mut graph = Relationships::default();
        graph
            .declare(
                "Author",
                &[],
                Declaration::has_many("Books").from_table("Book").with_keys("Id", "AuthorId"),
            )
            .unwrap();
        let scope = TableRef::root("Author", Arc::new(graph), None);
        WhereBuilder::new(scope, Arc::new(|d: &DateTime<Utc>| d.format("%Y-%m-%d").to_string()))
    }

    fn leaf(node: &ConditionNode) -> &Condition {
        match node {
            ConditionNode::Leaf(condition) => condition,
            other => panic!("expected leaf, got {:?}", other),
        }
    }

    #[test]
    fn test_chains_and_leading_where() {
        let tree = builder()
            .where_("Name")
            .equals("Ann")
            .where_("Id")
            .greater_than(3)
            .or_where("Books.Title")
            .contains("Dune")
            .finish()
            .unwrap();

        let chains: Vec<Chain> = tree.nodes().iter().map(ConditionNode::chain).collect();
        assert_eq!(chains, vec![Chain::Where, Chain::And, Chain::Or]);
        let title = leaf(&tree.nodes()[2]);
        assert_eq!(title.column.command_alias, "Books<|Title");
        assert_eq!(title.operator, Operator::LIKE);
        assert_eq!(title.value, Value::from("%Dune%"));
    }

    #[test]
    fn test_or_where_first_becomes_where() {
        let tree = builder().or_where("Id").equals(1).finish().unwrap();
        assert_eq!(tree.nodes()[0].chain(), Chain::Where);
    }

    #[test]
    fn test_null_comparison_rewrites_operator() {
        let tree = builder()
            .where_("Name")
            .equals(Value::Null)
            .and_where("Id")
            .not_equals(None::<i32>)
            .finish()
            .unwrap();
        assert_eq!(leaf(&tree.nodes()[0]).operator, Operator::IS);
        assert_eq!(leaf(&tree.nodes()[1]).operator, Operator::IS_NOT);

        let err = builder().where_("Id").greater_than(Value::Null).finish().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Contract);
    }

    #[test]
    fn test_groups_and_negation() {
        let tree = builder()
            .where_("Id")
            .greater_than(1)
            .not()
            .or(|b| b.where_("Name").starts_with("A").or_where("Name").is_null())
            .finish()
            .unwrap();

        match &tree.nodes()[1] {
            ConditionNode::Group { chain, nodes } => {
                assert_eq!(*chain, Chain::OrNot);
                assert_eq!(nodes[0].chain(), Chain::Where);
                assert_eq!(nodes[1].chain(), Chain::Or);
            }
            other => panic!("expected group, got {:?}", other),
        }

        let tree = builder().not().where_("Id").equals(1).finish().unwrap();
        assert_eq!(tree.nodes()[0].chain(), Chain::WhereNot);
    }

    #[test]
    fn test_nested_group_keeps_its_shape() {
        let tree = builder()
            .where_("Id")
            .equals(1)
            .and(|b| b.where_("Name").equals("Ann").or_where("Name").equals("Bob"))
            .finish()
            .unwrap();

        assert_eq!(tree.nodes().len(), 2);
        assert_eq!(leaf(&tree.nodes()[0]).chain, Chain::Where);
        assert_eq!(leaf(&tree.nodes()[0]).value, Value::I32(1));
        match &tree.nodes()[1] {
            ConditionNode::Group { chain, nodes } => {
                assert_eq!(*chain, Chain::And);
                assert_eq!(nodes.len(), 2);
                assert_eq!(leaf(&nodes[0]).chain, Chain::Where);
                assert_eq!(leaf(&nodes[0]).value, Value::from("Ann"));
                assert_eq!(leaf(&nodes[1]).chain, Chain::Or);
                assert_eq!(leaf(&nodes[1]).value, Value::from("Bob"));
            }
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_between_and_in_set_validation() {
        let tree = builder().where_("Id").between(1, 10).finish().unwrap();
        assert_eq!(
            leaf(&tree.nodes()[0]).value,
            Value::Array(vec![Value::I32(1), Value::I32(10)])
        );

        assert!(builder().where_("Id").between("a", 10).finish().is_err());
        assert!(builder().where_("Id").in_set(Vec::<i32>::new()).finish().is_err());
        assert!(builder()
            .where_("Id")
            .in_set(vec![Value::Json(serde_json::json!({}))])
            .finish()
            .is_err());

        let tree = builder().where_("Id").in_set([1, 2, 3]).finish().unwrap();
        assert_eq!(leaf(&tree.nodes()[0]).operator, Operator::IN);
    }

    #[test]
    fn test_dates_are_formatted_when_the_node_is_finalized() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        let tree = builder().where_("Born").between(start, end).finish().unwrap();
        assert_eq!(
            leaf(&tree.nodes()[0]).value,
            Value::Array(vec![Value::from("2024-01-01"), Value::from("2024-12-31")])
        );
    }

    #[test]
    fn test_first_error_wins() {
        let err = builder()
            .where_("Reviews.Id")
            .equals(1)
            .where_("Id")
            .in_set(Vec::<i32>::new())
            .finish()
            .unwrap_err();
        assert_eq!(err, Error::relationship_not_found("Author", "Reviews"));
    }

    #[test]
    fn test_dangling_not_and_empty_callback() {
        assert!(builder().where_("Id").equals(1).not().finish().is_err());
        assert!(builder().finish().is_err());
        assert!(builder().and(|b| b).finish().is_err());
    }

    #[test]
    fn test_negated_and_grouped_trees() {
        let single = builder().where_("Id").equals(1).finish().unwrap();
        assert_eq!(single.clone().negated().nodes()[0].chain(), Chain::WhereNot);

        let double = builder()
            .where_("Id")
            .equals(1)
            .or_where("Id")
            .equals(2)
            .finish()
            .unwrap();
        let negated = double.clone().negated();
        assert_eq!(negated.nodes().len(), 1);
        assert_eq!(negated.nodes()[0].chain(), Chain::WhereNot);
        negated.validate().unwrap();

        let combined = single.and_group(double, true);
        assert_eq!(combined.nodes()[1].chain(), Chain::AndNot);
        combined.validate().unwrap();
    }

    #[test]
    fn test_matching_keys() {
        let id = builder().table().column("Id").unwrap();
        let tree = ConditionTree::matching_keys(&[id.clone()], vec![vec![Value::I32(1)]]).unwrap();
        assert_eq!(leaf(&tree.nodes()[0]).operator, Operator::EQ);

        let tree = ConditionTree::matching_keys(
            &[id.clone()],
            vec![vec![Value::I32(1)], vec![Value::I32(2)]],
        )
        .unwrap();
        assert_eq!(leaf(&tree.nodes()[0]).operator, Operator::IN);

        let name = builder().table().column("Name").unwrap();
        let tree = ConditionTree::matching_keys(
            &[id, name],
            vec![
                vec![Value::I32(1), Value::from("a")],
                vec![Value::I32(2), Value::from("b")],
            ],
        )
        .unwrap();
        tree.validate().unwrap();
        assert_eq!(tree.nodes()[1].chain(), Chain::Or);
        assert_eq!(tree.columns().len(), 4);
    }
}
