//! Compiled commands handed to the adapter for serialization

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::builder::{AggregateFunction, ColumnRef, ConditionTree, OrderByClause};
use crate::Value;

/// The operation a command performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Select,
    Count,
    Insert,
    Update,
    Delete,
    Truncate,
    Describe,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Select => "select",
            CommandKind::Count => "count",
            CommandKind::Insert => "insert",
            CommandKind::Update => "update",
            CommandKind::Delete => "delete",
            CommandKind::Truncate => "truncate",
            CommandKind::Describe => "describe",
        }
    }

    /// Whether the command changes data
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            CommandKind::Insert | CommandKind::Update | CommandKind::Delete | CommandKind::Truncate
        )
    }
}

impl Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully validated command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Select(SelectCommand),
    /// Row count of what the select would return
    Count(SelectCommand),
    Insert(InsertCommand),
    Update(UpdateCommand),
    Delete(DeleteCommand),
    Truncate { table: String },
    Describe { table: String },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Select(_) => CommandKind::Select,
            Command::Count(_) => CommandKind::Count,
            Command::Insert(_) => CommandKind::Insert,
            Command::Update(_) => CommandKind::Update,
            Command::Delete(_) => CommandKind::Delete,
            Command::Truncate { .. } => CommandKind::Truncate,
            Command::Describe { .. } => CommandKind::Describe,
        }
    }

    /// Real name of the table the command targets
    pub fn table(&self) -> &str {
        match self {
            Command::Select(select) | Command::Count(select) => &select.table,
            Command::Insert(insert) => &insert.table,
            Command::Update(update) => &update.table,
            Command::Delete(delete) => &delete.table,
            Command::Truncate { table } | Command::Describe { table } => table,
        }
    }
}

/// A projected column of a select
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    Column(ColumnRef),
    Aggregate {
        function: AggregateFunction,
        column: Option<ColumnRef>,
        alias: String,
    },
}

impl SelectColumn {
    /// Key of this column in the rows the adapter returns
    pub fn alias(&self) -> &str {
        match self {
            SelectColumn::Column(column) => &column.command_alias,
            SelectColumn::Aggregate { alias, .. } => alias,
        }
    }
}

/// A LEFT OUTER join of a related table
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    pub alias: String,
    /// Parent side of the join condition
    pub primary_key: ColumnRef,
    /// Joined side of the join condition
    pub foreign_key: ColumnRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectCommand {
    pub table: String,
    pub alias: String,
    pub columns: Vec<SelectColumn>,
    pub joins: Vec<Join>,
    pub conditions: Option<ConditionTree>,
    pub group_by: Vec<ColumnRef>,
    pub order_by: Vec<OrderByClause>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertCommand {
    pub table: String,
    pub columns: Vec<String>,
    /// One entry per record, aligned with `columns`
    pub rows: Vec<Vec<Value>>,
    /// Identity column whose generated values the adapter should return
    pub identity: Option<String>,
}

/// The value one record assigns, keyed by that record's primary key values
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedValue {
    pub keys: Vec<(String, Value)>,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// Same value for every matched row
    Set { column: String, value: Value },
    /// Per-record values selected by primary key
    Cases { column: String, cases: Vec<KeyedValue> },
}

impl Assignment {
    pub fn column(&self) -> &str {
        match self {
            Assignment::Set { column, .. } | Assignment::Cases { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCommand {
    pub table: String,
    pub primary_keys: Vec<String>,
    pub assignments: Vec<Assignment>,
    /// The caller's conditions or a primary key match; `None` only when the
    /// context allows updating every row
    pub conditions: Option<ConditionTree>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteCommand {
    pub table: String,
    pub conditions: ConditionTree,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_is_lowercase() {
        assert_eq!(CommandKind::Truncate.to_string(), "truncate");
        assert_eq!(CommandKind::Describe.to_string(), "describe");
        assert!(CommandKind::Update.is_mutation());
        assert!(!CommandKind::Count.is_mutation());
    }

    #[test]
    fn test_command_kind_and_table() {
        let command = Command::Truncate {
            table: "Author".into(),
        };
        assert_eq!(command.kind(), CommandKind::Truncate);
        assert_eq!(command.table(), "Author");

        let insert = Command::Insert(InsertCommand {
            table: "Book".into(),
            columns: vec!["Title".into()],
            rows: vec![vec![Value::from("Dune")]],
            identity: Some("Id".into()),
        });
        assert_eq!(insert.kind(), CommandKind::Insert);
        assert_eq!(insert.table(), "Book");
    }

    #[test]
    fn test_assignment_column() {
        let set = Assignment::Set {
            column: "Name".into(),
            value: Value::from("Ann"),
        };
        assert_eq!(set.column(), "Name");
    }
}
