//! Query context
//!
//! A [`Context`] is bound to one adapter and one root table. Clause methods
//! return a new context and leave the one they were called on untouched;
//! terminal methods wait for the table descriptions, compile the clause
//! state and run it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, debug_span, warn, Instrument};

use crate::adapter::{Adapter, Execution, Statement};
use crate::builder::{
    ClauseState, DateFormatter, IntoColumnRef, IntoColumnSelectors, OrderByClause, SortDirection,
    TableRef, WhereBuilder,
};
use crate::command::{Command, CommandKind};
use crate::events::{FailEvent, Lifecycle, Observers, Phase, SuccessEvent, TriggerContext, Triggers};
use crate::options::ContextOptions;
use crate::readiness::Readiness;
use crate::reconstruct::{reconstruct_with_stats, Record};
use crate::relationship::{Declaration, Relationships};
use crate::schema::Catalog;
use crate::{alias, Error, Result, Row};

pub struct Context<A: Adapter> {
    pub(crate) adapter: Arc<A>,
    pub(crate) table: String,
    pub(crate) options: ContextOptions,
    pub(crate) graph: Arc<Relationships>,
    pub(crate) readiness: Readiness,
    pub(crate) state: ClauseState,
    pub(crate) observers: Arc<Observers>,
    pub(crate) triggers: Arc<Triggers>,
}

impl<A: Adapter> Clone for Context<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            table: self.table.clone(),
            options: self.options.clone(),
            graph: self.graph.clone(),
            readiness: self.readiness.clone(),
            state: self.state.clone(),
            observers: self.observers.clone(),
            triggers: self.triggers.clone(),
        }
    }
}

impl<A: Adapter> fmt::Debug for Context<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("table", &self.table)
            .field("options", &self.options)
            .field("relationships", &self.graph.len())
            .field("readiness", &self.readiness)
            .field("state", &self.state)
            .finish()
    }
}

fn split_reference(reference: &str) -> Vec<String> {
    reference
        .split(alias::REFERENCE_SEPARATOR)
        .map(str::to_string)
        .collect()
}

impl<A: Adapter> Context<A> {
    pub fn new(adapter: A, table: &str) -> Self {
        Self::with_options(adapter, table, ContextOptions::default())
    }

    pub fn with_options(adapter: A, table: &str, options: ContextOptions) -> Self {
        Self::from_shared(Arc::new(adapter), table, options)
    }

    /// Share one adapter between several contexts
    pub fn from_shared(adapter: Arc<A>, table: &str, options: ContextOptions) -> Self {
        let graph = Arc::new(Relationships::default());
        let readiness = Readiness::start(adapter.clone(), table.to_string());
        let state = ClauseState::new(&TableRef::root(table, graph.clone(), None));
        Self {
            adapter,
            table: table.to_string(),
            options,
            graph,
            readiness,
            state,
            observers: Arc::new(Observers::default()),
            triggers: Arc::new(Triggers::default()),
        }
    }

    /// Real name of the root table
    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn state(&self) -> &ClauseState {
        &self.state
    }

    /// Declared relationships of the root table
    pub fn relationships(&self) -> &Relationships {
        &self.graph
    }

    fn with_state(&self, state: ClauseState) -> Self {
        let mut next = self.clone();
        next.state = state;
        next
    }

    /// Capability handle on the root table
    pub fn table_ref(&self) -> TableRef {
        TableRef::root(&self.table, self.graph.clone(), self.readiness.peek())
    }

    pub(crate) fn date_formatter(&self) -> DateFormatter {
        let adapter = self.adapter.clone();
        Arc::new(move |date: &DateTime<Utc>| adapter.date_to_string(date))
    }

    // Declarations

    pub fn declare(&self, declaration: Declaration) -> Result<Self> {
        self.declare_at(&[], declaration)
    }

    /// Declare a relationship of an already declared relationship
    /// (`"Books"`, `"Books.Publisher"`)
    pub fn declare_under(&self, parent: &str, declaration: Declaration) -> Result<Self> {
        self.declare_at(&split_reference(parent), declaration)
    }

    pub fn has_one<F>(&self, name: &str, configure: F) -> Result<Self>
    where
        F: FnOnce(Declaration) -> Declaration,
    {
        self.declare(configure(Declaration::has_one(name)))
    }

    pub fn has_many<F>(&self, name: &str, configure: F) -> Result<Self>
    where
        F: FnOnce(Declaration) -> Declaration,
    {
        self.declare(configure(Declaration::has_many(name)))
    }

    fn declare_at(&self, parent: &[String], declaration: Declaration) -> Result<Self> {
        let mut graph = (*self.graph).clone();
        let relationship = graph.declare(&self.table, parent, declaration)?;
        debug!(table = %self.table, relationship = %relationship.name, "joinery.declare");
        let mut next = self.clone();
        next.readiness = self
            .readiness
            .declare(self.adapter.clone(), parent.to_vec(), relationship);
        next.graph = Arc::new(graph);
        Ok(next)
    }

    /// Wait until every table reachable from the root has been described
    pub async fn ready(&self) -> Result<Arc<Catalog>> {
        self.readiness.ensure_ready().await
    }

    // Observers and triggers

    pub fn on_success<F>(&self, handler: F) -> Self
    where
        F: Fn(&SuccessEvent) + Send + Sync + 'static,
    {
        let mut observers = (*self.observers).clone();
        observers.on_success(handler);
        let mut next = self.clone();
        next.observers = Arc::new(observers);
        next
    }

    pub fn on_fail<F>(&self, handler: F) -> Self
    where
        F: Fn(&FailEvent) + Send + Sync + 'static,
    {
        let mut observers = (*self.observers).clone();
        observers.on_fail(handler);
        let mut next = self.clone();
        next.observers = Arc::new(observers);
        next
    }

    /// Run `trigger` on every record before an insert, update or delete
    pub fn before<F>(&self, operation: CommandKind, trigger: F) -> Self
    where
        F: Fn(&mut Row, &TriggerContext) -> Result<()> + Send + Sync + 'static,
    {
        let mut triggers = (*self.triggers).clone();
        triggers.before(operation, trigger);
        let mut next = self.clone();
        next.triggers = Arc::new(triggers);
        next
    }

    /// Run `trigger` on every record after an insert, update or delete
    pub fn after<F>(&self, operation: CommandKind, trigger: F) -> Self
    where
        F: Fn(&Row, &TriggerContext) + Send + Sync + 'static,
    {
        let mut triggers = (*self.triggers).clone();
        triggers.after(operation, trigger);
        let mut next = self.clone();
        next.triggers = Arc::new(triggers);
        next
    }

    // Clauses

    /// Filter rows; a second call is joined to the first with `AND`
    pub fn where_<F>(&self, build: F) -> Result<Self>
    where
        F: FnOnce(WhereBuilder) -> WhereBuilder,
    {
        let tree = build(WhereBuilder::new(self.table_ref(), self.date_formatter())).finish()?;
        Ok(self.with_state(self.state.where_(tree)))
    }

    /// Negate the next `where_` call
    pub fn not(&self) -> Self {
        self.with_state(self.state.not())
    }

    pub fn select<S: IntoColumnSelectors>(&self, columns: S) -> Result<Self> {
        let selectors = columns.into_column_selectors(&self.table_ref())?;
        Ok(self.with_state(self.state.select(selectors)?))
    }

    /// Join a relationship, or a dotted chain of them (`"Books.Publisher"`)
    pub fn include(&self, reference: &str) -> Result<Self> {
        let path = split_reference(reference);
        Ok(self.with_state(self.state.include(&self.table_ref(), &path)?))
    }

    /// Join a relationship of the table included last
    pub fn then_include(&self, name: &str) -> Result<Self> {
        Ok(self.with_state(self.state.then_include(&self.table_ref(), name)?))
    }

    pub fn group_by<S: IntoColumnSelectors>(&self, selectors: S) -> Result<Self> {
        let selectors = selectors.into_column_selectors(&self.table_ref())?;
        Ok(self.with_state(self.state.group_by(selectors)?))
    }

    /// Replace the ordering
    pub fn sort_by<I, C>(&self, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (C, SortDirection)>,
        C: IntoColumnRef,
    {
        let scope = self.table_ref();
        let clauses = columns
            .into_iter()
            .map(|(column, direction)| {
                Ok(OrderByClause {
                    column: column.into_column_ref(&scope)?,
                    direction,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.with_state(self.state.sort_by(clauses)))
    }

    pub fn take(&self, limit: u32) -> Self {
        self.with_state(self.state.take(limit))
    }

    pub fn skip(&self, offset: u32) -> Self {
        self.with_state(self.state.skip(offset))
    }

    // Execution

    fn report(&self, operation: CommandKind, statement: Option<&Statement>, error: Error) -> Error {
        warn!(operation = %operation, table = %self.table, error = %error, "joinery.query.failed");
        self.observers.failed(&FailEvent {
            operation,
            table: self.table.clone(),
            sql: statement.map(|s| s.sql.clone()).unwrap_or_default(),
            args: statement.map(|s| s.args.clone()).unwrap_or_default(),
            error: error.clone(),
        });
        error
    }

    /// Serialize and execute one command, reporting failures to observers
    pub(crate) async fn run(&self, command: Command) -> Result<(Statement, Execution)> {
        let operation = command.kind();
        let statement = self
            .adapter
            .serialize(&command)
            .map_err(|e| self.report(operation, None, e.at_adapter_boundary(operation, &self.table)))?;
        debug!(
            operation = %operation,
            table = %self.table,
            sql = %statement.sql,
            params = statement.args.len(),
            "joinery.query"
        );
        let span = debug_span!("joinery.execute", operation = %operation, table = %self.table);
        match self.adapter.execute(&statement).instrument(span).await {
            Ok(execution) => Ok((statement, execution)),
            Err(err) => {
                let err = err.at_adapter_boundary(operation, &self.table);
                Err(self.report(operation, Some(&statement), err))
            }
        }
    }

    /// Convert an execution, reporting a shape mismatch as a failure
    pub(crate) fn expect_shape<T>(
        &self,
        statement: &Statement,
        converted: Result<T>,
    ) -> Result<T> {
        converted.map_err(|err| self.report(statement.kind, Some(statement), err))
    }

    pub(crate) fn succeeded(&self, statement: &Statement, affected: u64, lifecycle: &Lifecycle) {
        self.observers.succeeded(&SuccessEvent {
            operation: statement.kind,
            table: self.table.clone(),
            sql: statement.sql.clone(),
            args: statement.args.clone(),
            affected,
            elapsed: lifecycle.elapsed(),
        });
    }

    /// The select this context would run
    pub async fn to_command(&self) -> Result<Command> {
        let catalog = self.ready().await?;
        Ok(Command::Select(self.state.compile(&catalog)?))
    }

    /// The select serialized by the adapter
    pub async fn to_statement(&self) -> Result<Statement> {
        let command = self.to_command().await?;
        self.adapter
            .serialize(&command)
            .map_err(|e| e.at_adapter_boundary(CommandKind::Select, &self.table))
    }

    /// Run the select and fold the rows into records
    pub async fn fetch_all(&self) -> Result<Vec<Record>> {
        let catalog = self.ready().await?;
        let command = self.state.compile(&catalog)?;
        let mut lifecycle = Lifecycle::new(CommandKind::Select, &self.table);

        lifecycle.advance(Phase::Execute);
        let (statement, execution) = self.run(Command::Select(command)).await?;
        let rows = self.expect_shape(&statement, execution.into_rows(CommandKind::Select))?;

        lifecycle.advance(Phase::Serialize);
        let included = catalog.relationships().subset(&self.state.included_paths());
        let row_count = rows.len();
        let (records, stats) = reconstruct_with_stats(
            rows,
            self.state.is_grouped(),
            self.state.is_joined(),
            catalog.schema(),
            &included,
        )?;
        debug!(
            table = %self.table,
            rows = row_count,
            records = records.len(),
            rows_scanned = stats.rows_scanned,
            index_lookups = stats.index_lookups,
            "joinery.reconstruct"
        );

        lifecycle.advance(Phase::Done);
        self.succeeded(&statement, records.len() as u64, &lifecycle);
        Ok(records)
    }

    /// [`Context::fetch_all`], deserialized into `T`
    pub async fn fetch_all_as<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let records = self.fetch_all().await?;
        records
            .into_iter()
            .map(|record| serde_json::from_value(record.to_json()).map_err(Error::from))
            .collect()
    }

    /// The first record, if any. Queries without joins are limited to one
    /// row; joined queries are not, so every child of the first record is kept.
    pub async fn fetch_optional(&self) -> Result<Option<Record>> {
        let context = if self.state.is_joined() || self.state.limit.is_some() {
            self.clone()
        } else {
            self.take(1)
        };
        Ok(context.fetch_all().await?.into_iter().next())
    }

    /// Number of rows the select matches
    pub async fn count(&self) -> Result<u64> {
        let catalog = self.ready().await?;
        let command = self.state.compile(&catalog)?;
        let lifecycle = Lifecycle::new(CommandKind::Count, &self.table);
        let (statement, execution) = self.run(Command::Count(command)).await?;
        let count = self.expect_shape(&statement, execution.into_count(CommandKind::Count))?;
        self.succeeded(&statement, count, &lifecycle);
        Ok(count)
    }
}
