//! Clause state
//!
//! Every clause call produces a new state; the state it was called on is
//! left untouched, so partially built queries can be shared and branched.

use std::collections::HashSet;

use crate::alias;
use crate::builder::common::{
    ColumnRef, ColumnSelector, JoinKeys, JoinedTable, OrderByClause, TableRef,
};
use crate::builder::condition::ConditionTree;
use crate::command::{Join, SelectColumn, SelectCommand};
use crate::schema::Catalog;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ClauseState {
    pub select: Vec<ColumnSelector>,
    /// The root table first, then included relationships in join order
    pub from: Vec<JoinedTable>,
    pub conditions: Option<ConditionTree>,
    pub group_by: Option<Vec<ColumnRef>>,
    pub order_by: Option<Vec<OrderByClause>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    negated: bool,
    last_include: Option<Vec<String>>,
}

impl ClauseState {
    pub fn new(root: &TableRef) -> Self {
        Self {
            select: vec![ColumnSelector::Table(Vec::new())],
            from: vec![JoinedTable {
                path: Vec::new(),
                table: root.table().to_string(),
                alias: root.alias().to_string(),
                on: None,
            }],
            conditions: None,
            group_by: None,
            order_by: None,
            limit: None,
            offset: None,
            negated: false,
            last_include: None,
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.group_by.is_some()
    }

    pub fn is_joined(&self) -> bool {
        self.from.len() > 1
    }

    /// Whether the next where call is negated
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn included_paths(&self) -> Vec<Vec<String>> {
        self.from
            .iter()
            .filter(|t| !t.path.is_empty())
            .map(|t| t.path.clone())
            .collect()
    }

    fn is_included(&self, path: &[String]) -> bool {
        self.from.iter().any(|t| t.path == path)
    }

    /// Replace the projection
    pub fn select(&self, columns: Vec<ColumnSelector>) -> Result<Self> {
        if self.is_grouped() {
            return Err(Error::invalid_query("select() cannot follow group_by()"));
        }
        if columns.is_empty() {
            return Err(Error::invalid_query("select() needs at least one column"));
        }
        if columns.iter().any(ColumnSelector::is_aggregate) {
            return Err(Error::invalid_query(
                "aggregates can only be selected through group_by()",
            ));
        }
        let mut next = self.clone();
        next.select = columns;
        Ok(next)
    }

    /// Add a where condition tree; a second call appends it as an `AND` group
    pub fn where_(&self, tree: ConditionTree) -> Self {
        let mut next = self.clone();
        let negated = std::mem::take(&mut next.negated);
        next.conditions = Some(match next.conditions.take() {
            None if negated => tree.negated(),
            None => tree,
            Some(existing) => existing.and_group(tree, negated),
        });
        next
    }

    /// Negate the next where call
    pub fn not(&self) -> Self {
        let mut next = self.clone();
        next.negated = !next.negated;
        next
    }

    /// Join the table reached through `path` and every table on the way to
    /// it. Tables already joined are left alone.
    pub fn include(&self, scope: &TableRef, path: &[String]) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::invalid_query("include() needs a relationship name"));
        }
        let mut next = self.clone();
        let mut table = scope.clone();
        let mut prefix: Vec<String> = Vec::with_capacity(path.len());
        for name in path {
            let parent = table;
            table = parent.related(name)?;
            prefix.push(name.clone());
            if next.is_included(&prefix) {
                continue;
            }
            let node = scope
                .graph()
                .resolve(&prefix)
                .ok_or_else(|| Error::relationship_not_found(parent.table(), name))?;
            next.from.push(JoinedTable {
                path: prefix.clone(),
                table: node.table.clone(),
                alias: node.alias.clone(),
                on: Some(JoinKeys {
                    primary_key: parent.column(&node.primary_key.field)?,
                    foreign_key: table.column(&node.foreign_key.field)?,
                }),
            });
            if !next.is_grouped() {
                next.select.push(ColumnSelector::Table(prefix.clone()));
            }
        }
        next.last_include = Some(prefix);
        Ok(next)
    }

    /// Include a relationship of the most recently included table
    pub fn then_include(&self, scope: &TableRef, name: &str) -> Result<Self> {
        let mut path = self
            .last_include
            .clone()
            .ok_or_else(|| Error::invalid_query("then_include() must follow include()"))?;
        path.push(name.to_string());
        self.include(scope, &path)
    }

    /// Group rows; non-aggregate selectors become the grouping columns and
    /// the selectors replace the projection
    pub fn group_by(&self, selectors: Vec<ColumnSelector>) -> Result<Self> {
        if selectors.is_empty() {
            return Err(Error::invalid_query("group_by() needs at least one column"));
        }
        let mut columns = Vec::new();
        for selector in &selectors {
            match selector {
                ColumnSelector::Column(column) => columns.push(column.clone()),
                ColumnSelector::Aggregate { .. } => {}
                ColumnSelector::Table(_) => {
                    return Err(Error::invalid_query(
                        "group_by() takes columns and aggregates, not whole tables",
                    ))
                }
            }
        }
        let mut next = self.clone();
        next.select = selectors;
        next.group_by = Some(columns);
        Ok(next)
    }

    /// Replace the ordering
    pub fn sort_by(&self, clauses: Vec<OrderByClause>) -> Self {
        let mut next = self.clone();
        next.order_by = Some(clauses);
        next
    }

    pub fn take(&self, limit: u32) -> Self {
        let mut next = self.clone();
        next.limit = Some(limit);
        next
    }

    pub fn skip(&self, offset: u32) -> Self {
        let mut next = self.clone();
        next.offset = Some(offset);
        next
    }

    fn check_reference(&self, catalog: &Catalog, column: &ColumnRef) -> Result<()> {
        catalog.schema_at(&column.path)?.column(&column.field)?;
        if !self.is_included(&column.path) {
            return Err(Error::invalid_query(format!(
                "'{}' belongs to '{}', which is not included",
                column.command_alias,
                column.path.join(".")
            )));
        }
        Ok(())
    }

    /// Validate the state against resolved schemas and produce a select
    pub fn compile(&self, catalog: &Catalog) -> Result<SelectCommand> {
        let mut columns: Vec<SelectColumn> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut push = |column: SelectColumn, columns: &mut Vec<SelectColumn>| -> Result<()> {
            if seen.insert(column.alias().to_string()) {
                columns.push(column);
                return Ok(());
            }
            let clashes = matches!(column, SelectColumn::Aggregate { .. })
                && columns
                    .iter()
                    .any(|existing| existing.alias() == column.alias() && *existing != column);
            if clashes {
                return Err(Error::invalid_query(format!(
                    "two selections share the alias '{}'",
                    column.alias()
                )));
            }
            Ok(())
        };

        for selector in &self.select {
            match selector {
                ColumnSelector::Table(path) => {
                    if !self.is_included(path) {
                        return Err(Error::internal(format!("projection of unjoined path {:?}", path)));
                    }
                    let schema = catalog.schema_at(path)?;
                    for column in schema.columns() {
                        push(
                            SelectColumn::Column(ColumnRef::from_definition(schema, column)),
                            &mut columns,
                        )?;
                    }
                }
                ColumnSelector::Column(column) => {
                    self.check_reference(catalog, column)?;
                    push(SelectColumn::Column(column.clone()), &mut columns)?;
                }
                ColumnSelector::Aggregate {
                    function,
                    column,
                    alias: name,
                } => {
                    if !alias::is_aggregate(name) {
                        return Err(Error::internal(format!("aggregate alias '{}' lacks its marker", name)));
                    }
                    if let Some(column) = column {
                        self.check_reference(catalog, column)?;
                    }
                    push(
                        SelectColumn::Aggregate {
                            function: *function,
                            column: column.clone(),
                            alias: name.clone(),
                        },
                        &mut columns,
                    )?;
                }
            }
        }

        let mut joins = Vec::with_capacity(self.from.len().saturating_sub(1));
        for joined in &self.from {
            let keys = match &joined.on {
                Some(keys) => keys,
                None => continue,
            };
            self.check_reference(catalog, &keys.primary_key)?;
            self.check_reference(catalog, &keys.foreign_key)?;
            joins.push(Join {
                table: joined.table.clone(),
                alias: joined.alias.clone(),
                primary_key: keys.primary_key.clone(),
                foreign_key: keys.foreign_key.clone(),
            });
        }

        // Rows are folded back into records by key, so joined, ungrouped
        // queries always carry the keys of every table involved.
        if self.is_joined() && !self.is_grouped() {
            for joined in &self.from {
                let schema = catalog.schema_at(&joined.path)?;
                for key in schema.primary_keys() {
                    push(
                        SelectColumn::Column(ColumnRef::from_definition(schema, key)),
                        &mut columns,
                    )?;
                }
                if let Some(keys) = &joined.on {
                    push(SelectColumn::Column(keys.primary_key.clone()), &mut columns)?;
                    push(SelectColumn::Column(keys.foreign_key.clone()), &mut columns)?;
                }
            }
        }

        if let Some(conditions) = &self.conditions {
            conditions.validate()?;
            for column in conditions.columns() {
                self.check_reference(catalog, column)?;
            }
        }

        let group_by = self.group_by.clone().unwrap_or_default();
        for column in &group_by {
            self.check_reference(catalog, column)?;
        }
        let order_by = self.order_by.clone().unwrap_or_default();
        for clause in &order_by {
            self.check_reference(catalog, &clause.column)?;
        }

        let root = &self.from[0];
        Ok(SelectCommand {
            table: root.table.clone(),
            alias: root.alias.clone(),
            columns,
            joins,
            conditions: self.conditions.clone(),
            group_by,
            order_by,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::builder::common::{AggregateFunction, SortDirection};
    use crate::builder::condition::WhereBuilder;
    use crate::relationship::{Declaration, Relationships};
    use crate::testing::library_catalog;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    fn scope() -> TableRef {
        let mut graph = Relationships::default();
        graph
            .declare(
                "Author",
                &[],
                Declaration::has_many("Books")
                    .from_table("Book")
                    .with_keys("Id", "AuthorId")
                    .and_that(Declaration::has_one("Publisher").with_keys("PublisherId", "Id")),
            )
            .unwrap();
        TableRef::root("Author", Arc::new(graph), None)
    }

    fn conditions(build: impl FnOnce(WhereBuilder) -> WhereBuilder) -> ConditionTree {
        build(WhereBuilder::new(scope(), Arc::new(|d: &DateTime<Utc>| d.to_rfc3339())))
            .finish()
            .unwrap()
    }

    fn aliases(command: &SelectCommand) -> Vec<&str> {
        command.columns.iter().map(SelectColumn::alias).collect()
    }

    #[test]
    fn test_clause_calls_leave_the_receiver_untouched() {
        let base = ClauseState::new(&scope());
        let limited = base.take(5).skip(10);
        assert_eq!(base.limit, None);
        assert_eq!(limited.limit, Some(5));
        assert_eq!(limited.offset, Some(10));
        let joined = base.include(&scope(), &path(&["Books"])).unwrap();
        assert!(!base.is_joined());
        assert!(joined.is_joined());
    }

    #[test]
    fn test_include_joins_every_prefix_once() {
        let base = ClauseState::new(&scope());
        let state = base
            .include(&scope(), &path(&["Books", "Publisher"]))
            .unwrap()
            .include(&scope(), &path(&["Books"]))
            .unwrap();
        assert_eq!(
            state.included_paths(),
            vec![path(&["Books"]), path(&["Books", "Publisher"])]
        );
        let publisher = &state.from[2];
        let keys = publisher.on.as_ref().unwrap();
        assert_eq!(keys.primary_key.command_alias, "Books<|PublisherId");
        assert_eq!(keys.foreign_key.command_alias, "Books<|Publisher<|Id");
        assert_eq!(state.select.len(), 3);
    }

    #[test]
    fn test_then_include() {
        let base = ClauseState::new(&scope());
        assert!(base.then_include(&scope(), "Publisher").is_err());
        let state = base
            .include(&scope(), &path(&["Books"]))
            .unwrap()
            .then_include(&scope(), "Publisher")
            .unwrap();
        assert!(state.included_paths().contains(&path(&["Books", "Publisher"])));
        assert!(base.include(&scope(), &path(&["Reviews"])).is_err());
    }

    #[test]
    fn test_select_after_group_by_is_rejected() {
        let base = ClauseState::new(&scope());
        let id = scope().column("Id").unwrap();
        let grouped = base.group_by(vec![id.clone().into(), ColumnSelector::total()]).unwrap();
        assert!(grouped.is_grouped());
        assert_eq!(grouped.group_by.as_ref().unwrap(), &vec![id.clone()]);
        let err = grouped.select(vec![id.into()]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Contract);
    }

    #[test]
    fn test_where_negation_applies_to_next_call_only() {
        let base = ClauseState::new(&scope());
        let state = base.not().where_(conditions(|b| b.where_("Id").equals(1)));
        assert!(!state.is_negated());
        let tree = state.conditions.clone().unwrap();
        assert_eq!(tree.nodes()[0].chain(), crate::operator::Chain::WhereNot);

        let state = state.where_(conditions(|b| b.where_("Name").equals("Ann")));
        let tree = state.conditions.unwrap();
        assert_eq!(tree.nodes()[1].chain(), crate::operator::Chain::And);
        tree.validate().unwrap();
    }

    #[tokio::test]
    async fn test_compile_adds_join_keys() {
        let catalog = library_catalog().await;
        let title = scope().column("Books.Title").unwrap();
        let state = ClauseState::new(&scope())
            .include(&scope(), &path(&["Books"]))
            .unwrap()
            .select(vec![scope().column("Name").unwrap().into(), title.into()])
            .unwrap();

        let command = state.compile(&catalog).unwrap();
        assert_eq!(
            aliases(&command),
            vec!["Name", "Books<|Title", "Id", "Books<|Id", "Books<|AuthorId"]
        );
        assert_eq!(command.joins.len(), 1);
        assert_eq!(command.joins[0].alias, "__Books__");
    }

    #[tokio::test]
    async fn test_compile_rejects_unincluded_and_unknown_columns() {
        let catalog = library_catalog().await;
        let base = ClauseState::new(&scope());

        let state = base.where_(conditions(|b| b.where_("Books.Title").equals("Dune")));
        let err = state.compile(&catalog).unwrap_err();
        assert!(err.to_string().contains("not included"));

        let state = base.where_(conditions(|b| b.where_("Nickname").equals("x")));
        assert_eq!(
            state.compile(&catalog).unwrap_err(),
            Error::column_not_found("Author", "Nickname")
        );
    }

    #[tokio::test]
    async fn test_compile_grouped_keeps_only_requested_columns() {
        let catalog = library_catalog().await;
        let root = scope();
        let state = ClauseState::new(&root)
            .include(&root, &path(&["Books"]))
            .unwrap()
            .group_by(vec![
                root.column("Id").unwrap().into(),
                root.count("Books.Id").unwrap(),
            ])
            .unwrap()
            .sort_by(vec![OrderByClause {
                column: root.column("Id").unwrap(),
                direction: SortDirection::Desc,
            }]);

        let command = state.compile(&catalog).unwrap();
        assert_eq!(aliases(&command), vec!["Id", "$count<|Books<|Id"]);
        assert_eq!(command.group_by.len(), 1);
        assert_eq!(command.order_by[0].direction, SortDirection::Desc);
    }

    #[tokio::test]
    async fn test_compiled_aliases_are_unique_at_every_depth() {
        let catalog = library_catalog().await;
        let root = scope();
        let state = ClauseState::new(&root)
            .include(&root, &path(&["Books", "Publisher"]))
            .unwrap();

        let command = state.compile(&catalog).unwrap();
        let all = aliases(&command);
        let unique: HashSet<&str> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
        assert!(all.contains(&"Id"));
        assert!(all.contains(&"Books<|Id"));
        assert!(all.contains(&"Books<|Publisher<|Id"));
        assert!(all.contains(&"Books<|Publisher<|Name"));
        assert_eq!(command.joins.len(), 2);
    }

    #[tokio::test]
    async fn test_aggregates_over_one_column_keep_distinct_aliases() {
        let catalog = library_catalog().await;
        let root = scope();
        let state = ClauseState::new(&root)
            .include(&root, &path(&["Books"]))
            .unwrap()
            .group_by(vec![
                root.column("Id").unwrap().into(),
                root.count("Books.Id").unwrap(),
                root.count_distinct("Books.Id").unwrap(),
                root.count("Books.Id").unwrap(),
            ])
            .unwrap();

        let command = state.compile(&catalog).unwrap();
        assert_eq!(
            aliases(&command),
            vec!["Id", "$count<|Books<|Id", "$count_distinct<|Books<|Id"]
        );
    }

    #[tokio::test]
    async fn test_compile_rejects_two_selections_under_one_alias() {
        let catalog = library_catalog().await;
        let root = scope();
        let books_id = root.column("Books.Id").unwrap();
        let state = ClauseState::new(&root)
            .include(&root, &path(&["Books"]))
            .unwrap()
            .group_by(vec![
                root.column("Id").unwrap().into(),
                ColumnSelector::Aggregate {
                    function: AggregateFunction::Count,
                    column: Some(books_id.clone()),
                    alias: "$books".to_string(),
                },
                ColumnSelector::Aggregate {
                    function: AggregateFunction::Sum,
                    column: Some(books_id),
                    alias: "$books".to_string(),
                },
            ])
            .unwrap();

        let err = state.compile(&catalog).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Contract);
        assert!(err.to_string().contains("$books"));
    }
}
