//! Adapter interface
//!
//! An adapter turns compiled [`Command`]s into the text and arguments of its
//! database and runs them. The engine never builds SQL itself.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::command::{Command, CommandKind};
use crate::error::AdapterError;
use crate::schema::ColumnDefinition;
use crate::{Error, Result, Row, Value};

/// A command serialized for one backend
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: CommandKind,
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(kind: CommandKind, sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            kind,
            sql: sql.into(),
            args,
        }
    }
}

/// What executing a statement produced
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// Flat rows keyed by command alias
    Rows(Vec<Row>),
    Count(u64),
    /// Number of rows changed
    Affected(u64),
    /// Generated identity values, in insertion order
    Inserted(Vec<Value>),
    Described(Vec<ColumnDefinition>),
}

impl Execution {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Execution::Rows(_) => "rows",
            Execution::Count(_) => "count",
            Execution::Affected(_) => "affected",
            Execution::Inserted(_) => "inserted",
            Execution::Described(_) => "described",
        }
    }

    fn unexpected(&self, kind: CommandKind) -> Error {
        Error::Adapter(AdapterError::unknown(format!(
            "adapter returned {} for a {} command",
            self.variant_name(),
            kind
        )))
    }

    pub(crate) fn into_rows(self, kind: CommandKind) -> Result<Vec<Row>> {
        match self {
            Execution::Rows(rows) => Ok(rows),
            other => Err(other.unexpected(kind)),
        }
    }

    pub(crate) fn into_count(self, kind: CommandKind) -> Result<u64> {
        match self {
            Execution::Count(count) | Execution::Affected(count) => Ok(count),
            other => Err(other.unexpected(kind)),
        }
    }

    /// Generated identities; adapters without identity support may answer
    /// with an affected count instead.
    pub(crate) fn into_inserted(self, kind: CommandKind) -> Result<Vec<Value>> {
        match self {
            Execution::Inserted(ids) => Ok(ids),
            Execution::Affected(_) => Ok(Vec::new()),
            other => Err(other.unexpected(kind)),
        }
    }

    pub(crate) fn into_described(self, kind: CommandKind) -> Result<Vec<ColumnDefinition>> {
        match self {
            Execution::Described(columns) => Ok(columns),
            other => Err(other.unexpected(kind)),
        }
    }
}

/// Backend serialization and execution
pub trait Adapter: Send + Sync + 'static {
    /// Serialize a command into a statement for this backend
    fn serialize(&self, command: &Command) -> Result<Statement>;

    /// Run a statement
    fn execute(&self, statement: &Statement) -> impl Future<Output = Result<Execution>> + Send;

    /// Column metadata of a real table
    fn describe(&self, table: &str) -> impl Future<Output = Result<Vec<ColumnDefinition>>> + Send {
        let command = Command::Describe {
            table: table.to_string(),
        };
        async move {
            let statement = self.serialize(&command)?;
            self.execute(&statement)
                .await?
                .into_described(CommandKind::Describe)
        }
    }

    /// Text form of a date in this backend's arguments
    fn date_to_string(&self, date: &DateTime<Utc>) -> String {
        date.to_rfc3339()
    }
}
