//! Insert, update and delete orchestration
//!
//! Every mutation runs through the same phases: before triggers, execute,
//! backfill, after triggers. Guards that need no schema are checked before
//! anything is awaited; the rest are checked before the mutating statement
//! is sent.

mod delete;
mod insert;
mod update;

pub use update::UpdateSet;

use crate::adapter::Adapter;
use crate::builder::{ColumnRef, ConditionTree, DateFormatter};
use crate::command::CommandKind;
use crate::context::Context;
use crate::schema::{Catalog, ColumnDefinition};
use crate::{Error, Result, Row, Value};

/// Primary key values of each record, in key order
fn key_tuples(
    table: &str,
    keys: &[ColumnDefinition],
    records: &[Row],
    format_date: &DateFormatter,
) -> Result<Vec<Vec<Value>>> {
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            keys.iter()
                .map(|key| match record.get(&key.field) {
                    Some(value) if !value.is_null() => {
                        Ok(value.clone().normalize_dates(&**format_date))
                    }
                    _ => Err(Error::invalid_query(format!(
                        "record {} of '{}' has no value for primary key '{}'",
                        index, table, key.field
                    ))),
                })
                .collect()
        })
        .collect()
}

/// Condition matching the given records by primary key
fn key_conditions(
    catalog: &Catalog,
    keys: &[ColumnDefinition],
    tuples: Vec<Vec<Value>>,
) -> Result<ConditionTree> {
    let schema = catalog.schema();
    let columns: Vec<ColumnRef> = keys
        .iter()
        .map(|key| ColumnRef::from_definition(schema, key))
        .collect();
    ConditionTree::matching_keys(&columns, tuples)
}

/// Reject fields that are neither columns nor relationships of the root
fn check_fields(catalog: &Catalog, records: &[Row]) -> Result<()> {
    for record in records {
        for field in record.keys() {
            if catalog.relationships().contains(field) {
                continue;
            }
            catalog.schema().column(field)?;
        }
    }
    Ok(())
}

impl<A: Adapter> Context<A> {
    /// Primary keys of the root table, or a guard error naming `operation`
    fn require_keys(&self, catalog: &Catalog, operation: CommandKind, alternative: &str) -> Result<Vec<ColumnDefinition>> {
        let keys = catalog.primary_keys(&self.table);
        if keys.is_empty() {
            return Err(Error::guard(
                operation,
                &self.table,
                format!("it has no primary key; use {} with a condition", alternative),
            ));
        }
        Ok(keys.to_vec())
    }

    /// Conditions of the clause state, which may only reference root columns
    fn root_conditions(&self, catalog: &Catalog, operation: CommandKind) -> Result<Option<ConditionTree>> {
        if self.state.is_joined() {
            return Err(Error::invalid_query(format!(
                "{} cannot be combined with include()",
                operation
            )));
        }
        if let Some(conditions) = &self.state.conditions {
            conditions.validate()?;
            for column in conditions.columns() {
                if !column.is_root() {
                    return Err(Error::invalid_query(format!(
                        "{} conditions can only reference columns of '{}', not '{}'",
                        operation, self.table, column.command_alias
                    )));
                }
                catalog.schema().column(&column.field)?;
            }
        }
        Ok(self.state.conditions.clone())
    }
}
