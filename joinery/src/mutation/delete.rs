use crate::adapter::Adapter;
use crate::command::{Command, CommandKind, DeleteCommand};
use crate::context::Context;
use crate::events::{Lifecycle, Phase};
use crate::mutation::{key_conditions, key_tuples};
use crate::{Error, Result, Row};

impl<A: Adapter> Context<A> {
    /// Delete each record by its primary key
    pub async fn delete(&self, records: Vec<Row>) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        let catalog = self.ready().await?;
        let keys = self.require_keys(&catalog, CommandKind::Delete, "delete_where()")?;
        let mut records = records;
        let mut lifecycle = Lifecycle::new(CommandKind::Delete, &self.table);

        lifecycle.advance(Phase::BeforeTrigger);
        self.triggers
            .run_before(CommandKind::Delete, &self.table, &mut records)?;
        let tuples = key_tuples(&self.table, &keys, &records, &self.date_formatter())?;
        let command = DeleteCommand {
            table: self.table.clone(),
            conditions: key_conditions(&catalog, &keys, tuples)?,
        };

        lifecycle.advance(Phase::Execute);
        let (statement, execution) = self.run(Command::Delete(command)).await?;
        let affected = self.expect_shape(&statement, execution.into_count(CommandKind::Delete))?;

        lifecycle.advance(Phase::AfterTrigger);
        self.triggers
            .run_after(CommandKind::Delete, &self.table, &records);

        lifecycle.advance(Phase::Done);
        self.succeeded(&statement, affected, &lifecycle);
        Ok(affected)
    }

    /// Delete every row matching the where clauses. Triggers do not run,
    /// there being no records to hand them.
    pub async fn delete_where(&self) -> Result<u64> {
        if self.state.conditions.is_none() {
            return Err(Error::guard(
                CommandKind::Delete,
                &self.table,
                "no where condition given; use truncate() to remove every row",
            ));
        }
        let catalog = self.ready().await?;
        let conditions = self
            .root_conditions(&catalog, CommandKind::Delete)?
            .ok_or_else(|| Error::internal("conditions vanished after the guard"))?;
        let lifecycle = Lifecycle::new(CommandKind::Delete, &self.table);

        let (statement, execution) = self
            .run(Command::Delete(DeleteCommand {
                table: self.table.clone(),
                conditions,
            }))
            .await?;
        let affected = self.expect_shape(&statement, execution.into_count(CommandKind::Delete))?;
        self.succeeded(&statement, affected, &lifecycle);
        Ok(affected)
    }

    /// Remove every row of the root table
    pub async fn truncate(&self) -> Result<()> {
        if !self.options.allow_truncation {
            return Err(Error::guard(
                CommandKind::Truncate,
                &self.table,
                "truncation is not allowed by the context options",
            ));
        }
        let lifecycle = Lifecycle::new(CommandKind::Truncate, &self.table);
        let (statement, _) = self
            .run(Command::Truncate {
                table: self.table.clone(),
            })
            .await?;
        self.succeeded(&statement, 0, &lifecycle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::adapter::Execution;
    use crate::command::{Command, CommandKind};
    use crate::context::Context;
    use crate::operator::Operator;
    use crate::options::ContextOptions;
    use crate::testing::{books, library, MockAdapter};
    use crate::{ConditionNode, Error, ErrorKind, Row, Value};

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn table_context(table: &str, options: ContextOptions) -> (Arc<MockAdapter>, Context<MockAdapter>) {
        let adapter = Arc::new(library());
        let context = Context::from_shared(adapter.clone(), table, options);
        (adapter, context)
    }

    #[tokio::test]
    async fn test_delete_by_primary_key() {
        let (adapter, context) = table_context("Author", ContextOptions::default());
        adapter.respond(Ok(Execution::Affected(1)));

        let affected = context
            .delete(vec![row(&[("Id", Value::I64(4)), ("Name", Value::from("Ann"))])])
            .await
            .unwrap();

        assert_eq!(affected, 1);
        match adapter.last_command() {
            Some(Command::Delete(delete)) => match &delete.conditions.nodes()[0] {
                ConditionNode::Leaf(condition) => {
                    assert_eq!(condition.operator, Operator::EQ);
                    assert_eq!(condition.value, Value::I64(4));
                }
                other => panic!("expected leaf, got {:?}", other),
            },
            other => panic!("expected delete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_guards() {
        let (adapter, tags) = table_context("Tag", ContextOptions::default());
        let err = tags
            .delete(vec![row(&[("Label", Value::from("x"))])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Guard);
        assert!(err.to_string().contains("delete_where()"));

        let err = tags.delete_where().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Guard);
        assert!(adapter.commands().is_empty());
    }

    #[tokio::test]
    async fn test_delete_where() {
        let (adapter, context) = table_context("Tag", ContextOptions::default());
        adapter.respond(Ok(Execution::Affected(3)));
        let affected = context
            .where_(|q| q.where_("Label").starts_with("old"))
            .unwrap()
            .delete_where()
            .await
            .unwrap();
        assert_eq!(affected, 3);
        assert!(matches!(adapter.last_command(), Some(Command::Delete(_))));
    }

    #[tokio::test]
    async fn test_delete_where_rejects_joined_state() {
        let (adapter, context) = table_context("Author", ContextOptions::default());
        let err = context
            .declare(books())
            .unwrap()
            .include("Books")
            .unwrap()
            .where_(|q| q.where_("Id").equals(1))
            .unwrap()
            .delete_where()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Contract);
        assert!(adapter.commands().is_empty());
    }

    #[tokio::test]
    async fn test_delete_triggers_can_abort() {
        let after = Arc::new(AtomicUsize::new(0));
        let counter = after.clone();
        let (adapter, context) = table_context("Author", ContextOptions::default());
        let context = context
            .before(CommandKind::Delete, |record, _| {
                if record.get("Id") == Some(&Value::I64(1)) {
                    return Err(Error::invalid_query("author 1 is protected"));
                }
                Ok(())
            })
            .after(CommandKind::Delete, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        assert!(context
            .delete(vec![row(&[("Id", Value::I64(1))])])
            .await
            .is_err());
        assert!(adapter.commands().is_empty());

        context
            .delete(vec![row(&[("Id", Value::I64(2))]), row(&[("Id", Value::I64(3))])])
            .await
            .unwrap();
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_truncate_requires_permission() {
        let (adapter, context) = table_context("Author", ContextOptions::default());
        let err = context.truncate().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Guard);
        assert!(adapter.commands().is_empty());

        let (adapter, context) = table_context("Author", ContextOptions::default().allow_truncation(true));
        context.truncate().await.unwrap();
        assert!(matches!(
            adapter.last_command(),
            Some(Command::Truncate { table }) if table == "Author"
        ));
    }
}
