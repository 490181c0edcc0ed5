use serde::Serialize;
use tracing::{debug, warn};

use crate::adapter::Adapter;
use crate::builder::{ClauseState, ColumnRef, ConditionTree, DateFormatter};
use crate::command::{Command, CommandKind, InsertCommand};
use crate::context::Context;
use crate::events::{Lifecycle, Phase};
use crate::mutation::check_fields;
use crate::schema::{Catalog, ColumnDefinition, Schema};
use crate::value::to_row;
use crate::error::AdapterError;
use crate::{Error, Result, Row, Value};

fn supplies(record: &Row, field: &str) -> bool {
    record.get(field).is_some_and(|value| !value.is_null())
}

/// Fill defaults into the records and lay them out as rows of values
fn build_insert(
    schema: &Schema,
    records: &mut [Row],
    format_date: &DateFormatter,
) -> Result<InsertCommand> {
    let identity = schema.identity_key();
    let identity_supplied = match identity {
        Some(column) => {
            let supplied = records.iter().filter(|r| supplies(r, &column.field)).count();
            if supplied != 0 && supplied != records.len() {
                return Err(Error::invalid_query(format!(
                    "either every record or none may supply identity column '{}'",
                    column.field
                )));
            }
            supplied != 0
        }
        None => false,
    };

    let columns: Vec<&ColumnDefinition> = schema
        .columns()
        .iter()
        .filter(|c| !c.is_virtual)
        .filter(|c| !c.is_identity || identity_supplied)
        .collect();

    for record in records.iter_mut() {
        for column in &columns {
            if record.contains_key(&column.field) {
                continue;
            }
            if let Some(default) = &column.default_value {
                record.insert(column.field.clone(), default.value());
            }
        }
    }

    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|c| {
                    record
                        .get(&c.field)
                        .cloned()
                        .unwrap_or(Value::Null)
                        .normalize_dates(&**format_date)
                })
                .collect()
        })
        .collect();

    Ok(InsertCommand {
        table: schema.table().to_string(),
        columns: columns.iter().map(|c| c.field.clone()).collect(),
        rows,
        identity: identity.map(|c| c.field.clone()),
    })
}

impl<A: Adapter> Context<A> {
    /// Insert records and return them as stored: defaults filled in,
    /// generated identities backfilled and, for tables with virtual
    /// columns, re-read from the database.
    pub async fn insert(&self, records: Vec<Row>) -> Result<Vec<Row>> {
        if records.is_empty() {
            return Ok(records);
        }
        let catalog = self.ready().await?;
        let schema = catalog.schema();
        let mut records = records;
        let mut lifecycle = Lifecycle::new(CommandKind::Insert, &self.table);

        lifecycle.advance(Phase::BeforeTrigger);
        self.triggers
            .run_before(CommandKind::Insert, &self.table, &mut records)?;
        check_fields(&catalog, &records)?;
        let command = build_insert(schema, &mut records, &self.date_formatter())?;

        lifecycle.advance(Phase::Execute);
        let (statement, execution) = self.run(Command::Insert(command)).await?;
        let generated =
            self.expect_shape(&statement, execution.into_inserted(CommandKind::Insert))?;

        lifecycle.advance(Phase::Serialize);
        if let Some(identity) = schema.identity_key() {
            let missing = records
                .iter()
                .filter(|record| !supplies(record, &identity.field))
                .count();
            if missing > 0 && !generated.is_empty() && generated.len() != missing {
                let err = Error::Adapter(AdapterError::unknown(format!(
                    "expected {} generated identities, got {}",
                    missing,
                    generated.len()
                )))
                .at_adapter_boundary(CommandKind::Insert, &self.table);
                return self.expect_shape(&statement, Err(err));
            }
            let pending = records
                .iter_mut()
                .filter(|record| !supplies(record, &identity.field));
            for (record, id) in pending.zip(generated) {
                record.insert(identity.field.clone(), id);
            }
        }
        if self.options.refetch_virtual_columns && schema.has_virtual_columns() {
            records = self.refetch(&catalog, records).await?;
        }

        lifecycle.advance(Phase::AfterTrigger);
        self.triggers
            .run_after(CommandKind::Insert, &self.table, &records);

        lifecycle.advance(Phase::Done);
        debug!(table = %self.table, records = records.len(), "joinery.insert");
        self.succeeded(&statement, records.len() as u64, &lifecycle);
        Ok(records)
    }

    /// [`Context::insert`] for any serializable record type
    pub async fn insert_as<T: Serialize>(&self, records: &[T]) -> Result<Vec<Row>> {
        let rows = records.iter().map(to_row).collect::<Result<Vec<_>>>()?;
        self.insert(rows).await
    }

    /// Re-read inserted records to pick up virtual column values.
    ///
    /// Rows are matched on every stored column each record supplies, so a
    /// pre-existing row identical in all of them comes back too.
    async fn refetch(&self, catalog: &Catalog, records: Vec<Row>) -> Result<Vec<Row>> {
        let schema = catalog.schema();
        let format_date = self.date_formatter();
        let mut columns = Vec::new();
        for column in schema.columns().iter().filter(|c| !c.is_virtual) {
            let mut values: Vec<Value> = Vec::with_capacity(records.len());
            for record in &records {
                match record.get(&column.field) {
                    Some(value) if value.is_primitive() => {
                        let value = value.clone().normalize_dates(&*format_date);
                        if !values.contains(&value) {
                            values.push(value);
                        }
                    }
                    _ => {
                        values.clear();
                        break;
                    }
                }
            }
            if !values.is_empty() {
                columns.push((ColumnRef::from_definition(schema, column), values));
            }
        }
        if columns.is_empty() {
            warn!(table = %self.table, "joinery.insert.refetch_skipped");
            return Ok(records);
        }

        let mut state = ClauseState::new(&self.table_ref());
        state.conditions = Some(ConditionTree::all_in(columns));
        let command = state.compile(catalog)?;
        let (statement, execution) = self.run(Command::Select(command)).await?;
        self.expect_shape(&statement, execution.into_rows(CommandKind::Select))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapter::Execution;
    use crate::options::ContextOptions;
    use crate::schema::Datatype;
    use crate::testing::{library, MockAdapter};

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn insert_of(command: Option<Command>) -> InsertCommand {
        match command {
            Some(Command::Insert(insert)) => insert,
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_backfills_identity() {
        let adapter = Arc::new(library());
        let context = Context::from_shared(adapter.clone(), "Author", ContextOptions::default());
        adapter.respond(Ok(Execution::Inserted(vec![Value::I64(7), Value::I64(8)])));

        let records = context
            .insert(vec![
                row(&[("Name", Value::from("Ann"))]),
                row(&[("Name", Value::from("Bob"))]),
            ])
            .await
            .unwrap();

        assert_eq!(records[0].get("Id"), Some(&Value::I64(7)));
        assert_eq!(records[1].get("Id"), Some(&Value::I64(8)));
        let insert = insert_of(adapter.last_command());
        assert_eq!(insert.columns, vec!["Name"]);
        assert_eq!(insert.identity.as_deref(), Some("Id"));
        assert_eq!(insert.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_rejects_short_identity_list() {
        let adapter = Arc::new(library());
        let context = Context::from_shared(adapter.clone(), "Author", ContextOptions::default());
        adapter.respond(Ok(Execution::Inserted(vec![Value::I64(7)])));

        let err = context
            .insert(vec![
                row(&[("Name", Value::from("Ann"))]),
                row(&[("Name", Value::from("Bob"))]),
            ])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Adapter);
        assert!(err.to_string().contains("expected 2 generated identities, got 1"));
    }

    #[tokio::test]
    async fn test_insert_fills_defaults_and_rejects_unknown_fields() {
        let adapter = Arc::new(MockAdapter::new().with_table(
            "Event",
            vec![
                ColumnDefinition::new("Id", Datatype::Integer).primary(),
                ColumnDefinition::new("Status", Datatype::String).with_default(|| Value::from("new")),
            ],
        ));
        let context = Context::from_shared(adapter.clone(), "Event", ContextOptions::default());

        let records = context
            .insert(vec![row(&[("Id", Value::I64(1))])])
            .await
            .unwrap();
        assert_eq!(records[0].get("Status"), Some(&Value::from("new")));
        assert_eq!(
            insert_of(adapter.last_command()).rows[0],
            vec![Value::I64(1), Value::from("new")]
        );

        let err = context
            .insert(vec![row(&[("Id", Value::I64(2)), ("Colour", Value::from("red"))])])
            .await
            .unwrap_err();
        assert_eq!(err, Error::column_not_found("Event", "Colour"));
        assert_eq!(adapter.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_refetches_virtual_columns() {
        let adapter = Arc::new(library());
        let context = Context::from_shared(adapter.clone(), "Tag", ContextOptions::default());
        adapter.respond(Ok(Execution::Affected(1)));
        adapter.respond(Ok(Execution::Rows(vec![row(&[
            ("Label", Value::from("Sci Fi")),
            ("Slug", Value::from("sci-fi")),
        ])])));

        let records = context
            .insert(vec![row(&[("Label", Value::from("Sci Fi"))])])
            .await
            .unwrap();

        assert_eq!(records[0].get("Slug"), Some(&Value::from("sci-fi")));
        let commands = adapter.commands();
        assert_eq!(commands.len(), 2);
        match &commands[1] {
            Command::Select(select) => {
                let conditions = select.conditions.as_ref().unwrap();
                assert_eq!(conditions.columns()[0].field, "Label");
            }
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_skips_refetch_when_disabled() {
        let adapter = Arc::new(library());
        let options = ContextOptions::default().refetch_virtual_columns(false);
        let context = Context::from_shared(adapter.clone(), "Tag", options);
        context
            .insert(vec![row(&[("Label", Value::from("Poetry"))])])
            .await
            .unwrap();
        assert_eq!(adapter.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_triggers() {
        let adapter = Arc::new(library());
        let context = Context::from_shared(adapter.clone(), "Author", ContextOptions::default())
            .before(CommandKind::Insert, |record, _| {
                if record.get("Name") == Some(&Value::from("")) {
                    return Err(Error::invalid_query("name required"));
                }
                record.insert("Name".into(), Value::from("Dr. Ann"));
                Ok(())
            });

        let records = context
            .insert(vec![row(&[("Name", Value::from("Ann"))])])
            .await
            .unwrap();
        assert_eq!(records[0].get("Name"), Some(&Value::from("Dr. Ann")));

        assert!(context
            .insert(vec![row(&[("Name", Value::from(""))])])
            .await
            .is_err());
        assert_eq!(adapter.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_as() {
        #[derive(Serialize)]
        struct NewAuthor {
            #[serde(rename = "Name")]
            name: String,
        }

        let adapter = Arc::new(library());
        let context = Context::from_shared(adapter.clone(), "Author", ContextOptions::default());
        adapter.respond(Ok(Execution::Inserted(vec![Value::I64(1)])));
        let records = context
            .insert_as(&[NewAuthor { name: "Ann".into() }])
            .await
            .unwrap();
        assert_eq!(records[0].get("Id"), Some(&Value::I64(1)));
    }

    #[tokio::test]
    async fn test_partial_identity_is_rejected() {
        let adapter = Arc::new(library());
        let context = Context::from_shared(adapter.clone(), "Author", ContextOptions::default());
        let err = context
            .insert(vec![
                row(&[("Id", Value::I64(1)), ("Name", Value::from("Ann"))]),
                row(&[("Name", Value::from("Bob"))]),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Contract);
    }
}
