//! Column references, selectors and the other pieces shared by the clause builders

use std::fmt;
use std::sync::Arc;

use crate::alias;
use crate::relationship::Relationships;
use crate::schema::{Catalog, ColumnDefinition, Schema};
use crate::{Error, Result};

/// A column resolved against the relationship tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Relationship names from the query root to the owning table
    pub path: Vec<String>,
    /// Real name of the owning table
    pub table: String,
    pub table_alias: String,
    pub field: String,
    pub command_alias: String,
}

impl ColumnRef {
    pub(crate) fn from_definition(schema: &Schema, column: &ColumnDefinition) -> Self {
        Self {
            path: schema.path().to_vec(),
            table: schema.table().to_string(),
            table_alias: schema.table_alias().to_string(),
            field: column.field.clone(),
            command_alias: column.command_alias.clone(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

static NO_RELATIONSHIPS: Relationships = Relationships::empty();

/// Capability handle on one table of the relationship tree
///
/// Produces typed [`ColumnRef`]s for its own columns and hands out the
/// handles of its related tables. Field references may be dotted
/// (`Books.Publisher.Name`) to reach through relationships.
#[derive(Debug, Clone)]
pub struct TableRef {
    graph: Arc<Relationships>,
    catalog: Option<Arc<Catalog>>,
    path: Vec<String>,
    table: String,
    alias: String,
}

impl TableRef {
    pub(crate) fn root(table: &str, graph: Arc<Relationships>, catalog: Option<Arc<Catalog>>) -> Self {
        Self {
            graph,
            catalog,
            path: Vec::new(),
            table: table.to_string(),
            alias: table.to_string(),
        }
    }

    /// Real table name
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub(crate) fn graph(&self) -> &Arc<Relationships> {
        &self.graph
    }

    fn scope(&self) -> &Relationships {
        if self.path.is_empty() {
            return &self.graph;
        }
        self.graph
            .resolve(&self.path)
            .map(|node| &node.relationships)
            .unwrap_or(&NO_RELATIONSHIPS)
    }

    /// Whether `name` is a relationship of this table rather than a column
    pub fn is_relationship(&self, name: &str) -> bool {
        self.scope().contains(name)
    }

    /// Handle on a related table
    pub fn related(&self, name: &str) -> Result<TableRef> {
        let node = self
            .scope()
            .get(name)
            .ok_or_else(|| Error::relationship_not_found(&self.table, name))?;
        Ok(TableRef {
            graph: self.graph.clone(),
            catalog: self.catalog.clone(),
            path: node.path.clone(),
            table: node.table.clone(),
            alias: node.alias.clone(),
        })
    }

    /// Follow a dotted path of relationship names
    pub fn descend(&self, reference: &str) -> Result<TableRef> {
        reference
            .split(alias::REFERENCE_SEPARATOR)
            .try_fold(self.clone(), |table, name| table.related(name))
    }

    /// Resolve a possibly dotted field reference.
    ///
    /// Existence of the field is checked as soon as the table has been
    /// described; before that it is checked when the command compiles.
    pub fn column(&self, reference: &str) -> Result<ColumnRef> {
        let (owner, field) = match reference.rsplit_once(alias::REFERENCE_SEPARATOR) {
            Some((relationships, field)) => (self.descend(relationships)?, field),
            None => (self.clone(), reference),
        };
        owner.own_column(field)
    }

    fn own_column(&self, field: &str) -> Result<ColumnRef> {
        if field.is_empty() {
            return Err(Error::invalid_query(format!(
                "empty field reference on '{}'",
                self.table
            )));
        }
        if self.is_relationship(field) {
            return Err(Error::invalid_query(format!(
                "'{}' is a relationship of '{}', not a column",
                field, self.table
            )));
        }
        if let Some(catalog) = &self.catalog {
            if let Ok(schema) = catalog.schema_at(&self.path) {
                let column = schema.column(field)?;
                return Ok(ColumnRef::from_definition(schema, column));
            }
        }
        Ok(ColumnRef {
            path: self.path.clone(),
            table: self.table.clone(),
            table_alias: self.alias.clone(),
            field: field.to_string(),
            command_alias: alias::column_alias(&self.path, field),
        })
    }

    pub fn count(&self, reference: &str) -> Result<ColumnSelector> {
        Ok(ColumnSelector::count(self.column(reference)?))
    }

    pub fn count_distinct(&self, reference: &str) -> Result<ColumnSelector> {
        Ok(ColumnSelector::count_distinct(self.column(reference)?))
    }

    pub fn sum(&self, reference: &str) -> Result<ColumnSelector> {
        Ok(ColumnSelector::sum(self.column(reference)?))
    }

    pub fn avg(&self, reference: &str) -> Result<ColumnSelector> {
        Ok(ColumnSelector::avg(self.column(reference)?))
    }

    pub fn min(&self, reference: &str) -> Result<ColumnSelector> {
        Ok(ColumnSelector::min(self.column(reference)?))
    }

    pub fn max(&self, reference: &str) -> Result<ColumnSelector> {
        Ok(ColumnSelector::max(self.column(reference)?))
    }
}

/// Convert caller input into a resolved column
pub trait IntoColumnRef {
    fn into_column_ref(self, scope: &TableRef) -> Result<ColumnRef>;
}

impl IntoColumnRef for &str {
    fn into_column_ref(self, scope: &TableRef) -> Result<ColumnRef> {
        scope.column(self)
    }
}

impl IntoColumnRef for String {
    fn into_column_ref(self, scope: &TableRef) -> Result<ColumnRef> {
        scope.column(&self)
    }
}

impl IntoColumnRef for &String {
    fn into_column_ref(self, scope: &TableRef) -> Result<ColumnRef> {
        scope.column(self)
    }
}

impl IntoColumnRef for ColumnRef {
    fn into_column_ref(self, _scope: &TableRef) -> Result<ColumnRef> {
        Ok(self)
    }
}

impl IntoColumnRef for &ColumnRef {
    fn into_column_ref(self, _scope: &TableRef) -> Result<ColumnRef> {
        Ok(self.clone())
    }
}

/// Aggregation function types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    /// Row count of the group
    Total,
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    /// Prefix of the pseudo-column alias the aggregate is returned under
    pub fn alias_prefix(self) -> &'static str {
        match self {
            AggregateFunction::Total => "total",
            AggregateFunction::Count => "count",
            AggregateFunction::CountDistinct => "count_distinct",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Total | AggregateFunction::Count => write!(f, "COUNT"),
            AggregateFunction::CountDistinct => write!(f, "COUNT(DISTINCT"),
            AggregateFunction::Sum => write!(f, "SUM"),
            AggregateFunction::Avg => write!(f, "AVG"),
            AggregateFunction::Min => write!(f, "MIN"),
            AggregateFunction::Max => write!(f, "MAX"),
        }
    }
}

/// Column selector that can be a whole table, a column or an aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSelector {
    /// Every column of the table reached through this path
    Table(Vec<String>),
    Column(ColumnRef),
    Aggregate {
        function: AggregateFunction,
        column: Option<ColumnRef>,
        alias: String,
    },
}

impl ColumnSelector {
    fn aggregate(function: AggregateFunction, column: ColumnRef) -> Self {
        let alias = alias::aggregate_alias(function.alias_prefix(), &column.command_alias);
        Self::Aggregate {
            function,
            column: Some(column),
            alias,
        }
    }

    /// Row count of each group, returned as `$total`
    pub fn total() -> Self {
        Self::Aggregate {
            function: AggregateFunction::Total,
            column: None,
            alias: format!("{}total", alias::AGGREGATE_MARKER),
        }
    }

    /// COUNT(column), returned as `$count<|<alias>`
    pub fn count(column: ColumnRef) -> Self {
        Self::aggregate(AggregateFunction::Count, column)
    }

    pub fn count_distinct(column: ColumnRef) -> Self {
        Self::aggregate(AggregateFunction::CountDistinct, column)
    }

    pub fn sum(column: ColumnRef) -> Self {
        Self::aggregate(AggregateFunction::Sum, column)
    }

    pub fn avg(column: ColumnRef) -> Self {
        Self::aggregate(AggregateFunction::Avg, column)
    }

    pub fn min(column: ColumnRef) -> Self {
        Self::aggregate(AggregateFunction::Min, column)
    }

    pub fn max(column: ColumnRef) -> Self {
        Self::aggregate(AggregateFunction::Max, column)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate { .. })
    }
}

impl From<ColumnRef> for ColumnSelector {
    fn from(column: ColumnRef) -> Self {
        Self::Column(column)
    }
}

/// Trait to convert various types into column selectors
pub trait IntoColumnSelectors {
    fn into_column_selectors(self, scope: &TableRef) -> Result<Vec<ColumnSelector>>;
}

impl IntoColumnSelectors for &str {
    fn into_column_selectors(self, scope: &TableRef) -> Result<Vec<ColumnSelector>> {
        Ok(vec![scope.column(self)?.into()])
    }
}

impl IntoColumnSelectors for String {
    fn into_column_selectors(self, scope: &TableRef) -> Result<Vec<ColumnSelector>> {
        Ok(vec![scope.column(&self)?.into()])
    }
}

impl IntoColumnSelectors for ColumnRef {
    fn into_column_selectors(self, _scope: &TableRef) -> Result<Vec<ColumnSelector>> {
        Ok(vec![self.into()])
    }
}

impl IntoColumnSelectors for ColumnSelector {
    fn into_column_selectors(self, _scope: &TableRef) -> Result<Vec<ColumnSelector>> {
        Ok(vec![self])
    }
}

impl<T: IntoColumnSelectors> IntoColumnSelectors for Vec<T> {
    fn into_column_selectors(self, scope: &TableRef) -> Result<Vec<ColumnSelector>> {
        let mut selectors = Vec::with_capacity(self.len());
        for item in self {
            selectors.extend(item.into_column_selectors(scope)?);
        }
        Ok(selectors)
    }
}

impl<T: IntoColumnSelectors, const N: usize> IntoColumnSelectors for [T; N] {
    fn into_column_selectors(self, scope: &TableRef) -> Result<Vec<ColumnSelector>> {
        Vec::from(self).into_column_selectors(scope)
    }
}

impl<A, B> IntoColumnSelectors for (A, B)
where
    A: IntoColumnSelectors,
    B: IntoColumnSelectors,
{
    fn into_column_selectors(self, scope: &TableRef) -> Result<Vec<ColumnSelector>> {
        let mut selectors = self.0.into_column_selectors(scope)?;
        selectors.extend(self.1.into_column_selectors(scope)?);
        Ok(selectors)
    }
}

impl<A, B, C> IntoColumnSelectors for (A, B, C)
where
    A: IntoColumnSelectors,
    B: IntoColumnSelectors,
    C: IntoColumnSelectors,
{
    fn into_column_selectors(self, scope: &TableRef) -> Result<Vec<ColumnSelector>> {
        let mut selectors = self.0.into_column_selectors(scope)?;
        selectors.extend(self.1.into_column_selectors(scope)?);
        selectors.extend(self.2.into_column_selectors(scope)?);
        Ok(selectors)
    }
}

impl<A, B, C, D> IntoColumnSelectors for (A, B, C, D)
where
    A: IntoColumnSelectors,
    B: IntoColumnSelectors,
    C: IntoColumnSelectors,
    D: IntoColumnSelectors,
{
    fn into_column_selectors(self, scope: &TableRef) -> Result<Vec<ColumnSelector>> {
        let mut selectors = self.0.into_column_selectors(scope)?;
        selectors.extend(self.1.into_column_selectors(scope)?);
        selectors.extend(self.2.into_column_selectors(scope)?);
        selectors.extend(self.3.into_column_selectors(scope)?);
        Ok(selectors)
    }
}

/// Sort direction for ORDER BY clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// An ORDER BY clause
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByClause {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

/// Join keys of an included table
#[derive(Debug, Clone, PartialEq)]
pub struct JoinKeys {
    /// Parent side
    pub primary_key: ColumnRef,
    /// Joined side
    pub foreign_key: ColumnRef,
}

/// A table taking part in a query: the root, or an included relationship
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTable {
    pub path: Vec<String>,
    pub table: String,
    pub alias: String,
    /// `None` for the root
    pub on: Option<JoinKeys>,
}
