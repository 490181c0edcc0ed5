use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::adapter::Adapter;
use crate::builder::{ConditionTree, DateFormatter};
use crate::command::{Assignment, Command, CommandKind, KeyedValue, UpdateCommand};
use crate::context::Context;
use crate::events::{Lifecycle, Phase};
use crate::mutation::{check_fields, key_conditions, key_tuples};
use crate::schema::{Catalog, ColumnDefinition, Schema};
use crate::{Error, Result, Row, Value};

/// Columns an explicit update assigns
///
/// Primary key fields are skipped; unknown and virtual columns are errors.
pub struct UpdateSet {
    schema: Arc<Schema>,
    values: Row,
    error: Option<Error>,
}

impl fmt::Debug for UpdateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateSet")
            .field("table", &self.schema.table())
            .field("values", &self.values)
            .field("error", &self.error)
            .finish()
    }
}

impl UpdateSet {
    fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            values: Row::new(),
            error: None,
        }
    }

    pub fn set<V: Into<Value>>(mut self, field: &str, value: V) -> Self {
        if self.error.is_some() {
            return self;
        }
        match self.schema.get(field) {
            None => self.error = Some(Error::column_not_found(self.schema.table(), field)),
            Some(column) if column.is_primary => {
                trace!(table = %self.schema.table(), field, "joinery.update.key_ignored");
            }
            Some(column) if column.is_virtual => {
                self.error = Some(Error::invalid_query(format!(
                    "'{}' is a virtual column of '{}' and cannot be updated",
                    field,
                    self.schema.table()
                )));
            }
            Some(_) => {
                self.values.insert(field.to_string(), value.into());
            }
        }
        self
    }

    fn finish(self) -> Result<Row> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.values.is_empty() {
            return Err(Error::invalid_query(format!(
                "update of '{}' assigns no columns",
                self.schema.table()
            )));
        }
        Ok(self.values)
    }
}

fn build_keyed_update(
    catalog: &Catalog,
    keys: &[ColumnDefinition],
    records: &[Row],
    format_date: &DateFormatter,
) -> Result<UpdateCommand> {
    let schema = catalog.schema();
    check_fields(catalog, records)?;
    let tuples = key_tuples(schema.table(), keys, records, format_date)?;

    let mut assignments = Vec::new();
    for column in schema.columns().iter().filter(|c| c.is_editable()) {
        let cases: Vec<KeyedValue> = records
            .iter()
            .zip(&tuples)
            .filter_map(|(record, tuple)| {
                let value = record.get(&column.field)?;
                Some(KeyedValue {
                    keys: keys
                        .iter()
                        .map(|k| k.field.clone())
                        .zip(tuple.iter().cloned())
                        .collect(),
                    value: value.clone().normalize_dates(&**format_date),
                })
            })
            .collect();
        if !cases.is_empty() {
            assignments.push(Assignment::Cases {
                column: column.field.clone(),
                cases,
            });
        }
    }
    if assignments.is_empty() {
        return Err(Error::invalid_query(format!(
            "records of '{}' carry no columns to update",
            schema.table()
        )));
    }

    Ok(UpdateCommand {
        table: schema.table().to_string(),
        primary_keys: keys.iter().map(|k| k.field.clone()).collect(),
        assignments,
        conditions: Some(key_conditions(catalog, keys, tuples)?),
    })
}

impl<A: Adapter> Context<A> {
    /// Update each record by its primary key
    pub async fn update(&self, records: Vec<Row>) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let catalog = self.ready().await?;
        let keys = self.require_keys(&catalog, CommandKind::Update, "update_where()")?;
        let mut records = records;
        let mut lifecycle = Lifecycle::new(CommandKind::Update, &self.table);

        lifecycle.advance(Phase::BeforeTrigger);
        self.triggers
            .run_before(CommandKind::Update, &self.table, &mut records)?;
        let command = build_keyed_update(&catalog, &keys, &records, &self.date_formatter())?;

        lifecycle.advance(Phase::Execute);
        self.finish_update(command, records, lifecycle).await
    }

    /// Update every row matching the where clauses with the columns `build` sets
    pub async fn update_where<F>(&self, build: F) -> Result<u64>
    where
        F: FnOnce(UpdateSet) -> UpdateSet,
    {
        self.guard_update_all()?;
        let catalog = self.ready().await?;
        let values = build(UpdateSet::new(catalog.schema().clone())).finish()?;
        self.update_partial(&catalog, values).await
    }

    /// [`Context::update_where`] with the assignments given as a row
    pub async fn update_with(&self, values: Row) -> Result<u64> {
        self.guard_update_all()?;
        let catalog = self.ready().await?;
        let values = values
            .into_iter()
            .fold(UpdateSet::new(catalog.schema().clone()), |set, (field, value)| {
                set.set(&field, value)
            })
            .finish()?;
        self.update_partial(&catalog, values).await
    }

    fn guard_update_all(&self) -> Result<()> {
        if self.state.conditions.is_none() && !self.options.allow_update_all {
            return Err(Error::guard(
                CommandKind::Update,
                &self.table,
                "no where condition given and updating every row is not allowed",
            ));
        }
        Ok(())
    }

    async fn update_partial(&self, catalog: &Catalog, values: Row) -> Result<u64> {
        let conditions: Option<ConditionTree> = self.root_conditions(catalog, CommandKind::Update)?;
        let mut records = vec![values];
        let mut lifecycle = Lifecycle::new(CommandKind::Update, &self.table);

        lifecycle.advance(Phase::BeforeTrigger);
        self.triggers
            .run_before(CommandKind::Update, &self.table, &mut records)?;

        let format_date = self.date_formatter();
        let mut set = UpdateSet::new(catalog.schema().clone());
        for (field, value) in &records[0] {
            set = set.set(field, value.clone());
        }
        let assignments = set
            .finish()?
            .into_iter()
            .map(|(column, value)| Assignment::Set {
                column,
                value: value.normalize_dates(&*format_date),
            })
            .collect();
        let command = UpdateCommand {
            table: self.table.clone(),
            primary_keys: catalog
                .primary_keys(&self.table)
                .iter()
                .map(|k| k.field.clone())
                .collect(),
            assignments,
            conditions,
        };

        lifecycle.advance(Phase::Execute);
        self.finish_update(command, records, lifecycle).await
    }

    async fn finish_update(
        &self,
        command: UpdateCommand,
        records: Vec<Row>,
        mut lifecycle: Lifecycle,
    ) -> Result<u64> {
        let (statement, execution) = self.run(Command::Update(command)).await?;
        let affected = self.expect_shape(&statement, execution.into_count(CommandKind::Update))?;

        lifecycle.advance(Phase::AfterTrigger);
        self.triggers
            .run_after(CommandKind::Update, &self.table, &records);

        lifecycle.advance(Phase::Done);
        self.succeeded(&statement, affected, &lifecycle);
        Ok(affected)
    }
}
