//! In-memory adapter for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::adapter::{Adapter, Execution, Statement};
use crate::command::{Command, CommandKind};
use crate::error::AdapterError;
use crate::relationship::{Declaration, Relationships};
use crate::schema::{Catalog, ColumnDefinition, Datatype};
use crate::Result;

/// Records every command it is given and answers from a queue of canned
/// executions, falling back to an empty answer of the right shape.
#[derive(Default)]
pub(crate) struct MockAdapter {
    tables: HashMap<String, Vec<ColumnDefinition>>,
    responses: Mutex<VecDeque<Result<Execution>>>,
    commands: Mutex<Vec<Command>>,
    describes: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_table(mut self, table: &str, columns: Vec<ColumnDefinition>) -> Self {
        self.tables.insert(table.to_string(), columns);
        self
    }

    pub(crate) fn columns(&self, table: &str) -> Vec<ColumnDefinition> {
        self.tables.get(table).cloned().unwrap_or_default()
    }

    /// Queue the answer to the next non-describe statement
    pub(crate) fn respond(&self, execution: Result<Execution>) {
        self.responses.lock().unwrap().push_back(execution);
    }

    /// Commands serialized so far, describes excluded
    pub(crate) fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn last_command(&self) -> Option<Command> {
        self.commands.lock().unwrap().last().cloned()
    }

    /// Tables described so far, in order
    pub(crate) fn describes(&self) -> Vec<String> {
        self.describes.lock().unwrap().clone()
    }
}

impl Adapter for MockAdapter {
    fn serialize(&self, command: &Command) -> Result<Statement> {
        if command.kind() != CommandKind::Describe {
            self.commands.lock().unwrap().push(command.clone());
        }
        Ok(Statement::new(command.kind(), command.table(), Vec::new()))
    }

    async fn execute(&self, statement: &Statement) -> Result<Execution> {
        if statement.kind == CommandKind::Describe {
            self.describes.lock().unwrap().push(statement.sql.clone());
            return match self.tables.get(&statement.sql) {
                Some(columns) => Ok(Execution::Described(columns.clone())),
                None => Err(AdapterError::unknown(format!("no table named {}", statement.sql)).into()),
            };
        }
        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return response;
        }
        Ok(match statement.kind {
            CommandKind::Select => Execution::Rows(Vec::new()),
            CommandKind::Count => Execution::Count(0),
            CommandKind::Insert => Execution::Inserted(Vec::new()),
            _ => Execution::Affected(0),
        })
    }
}

/// Authors with books, books with a publisher
pub(crate) fn library() -> MockAdapter {
    MockAdapter::new()
        .with_table(
            "Author",
            vec![
                ColumnDefinition::new("Id", Datatype::Integer).primary().identity(),
                ColumnDefinition::new("Name", Datatype::String).not_null(),
            ],
        )
        .with_table(
            "Book",
            vec![
                ColumnDefinition::new("Id", Datatype::Integer).primary().identity(),
                ColumnDefinition::new("AuthorId", Datatype::Integer).not_null(),
                ColumnDefinition::new("Title", Datatype::String),
                ColumnDefinition::new("PublisherId", Datatype::Integer),
            ],
        )
        .with_table(
            "Publisher",
            vec![
                ColumnDefinition::new("Id", Datatype::Integer).primary(),
                ColumnDefinition::new("Name", Datatype::String),
            ],
        )
        .with_table(
            "Tag",
            vec![
                ColumnDefinition::new("Label", Datatype::String),
                ColumnDefinition::new("Slug", Datatype::String).virtual_column(),
            ],
        )
}

pub(crate) fn books() -> Declaration {
    Declaration::has_many("Books")
        .from_table("Book")
        .with_keys("Id", "AuthorId")
        .and_that(Declaration::has_one("Publisher").with_keys("PublisherId", "Id"))
}

/// Author catalog with `Books` and `Books.Publisher` resolved
pub(crate) async fn library_catalog() -> Arc<Catalog> {
    let adapter = library();
    let catalog = Catalog::new("Author", adapter.columns("Author")).unwrap();
    let mut graph = Relationships::default();
    let books = graph.declare("Author", &[], books()).unwrap();
    Arc::new(catalog.attach(&adapter, &[], books).await.unwrap())
}
