//! Error types for Joinery

use std::fmt::{self, Display};

use thiserror::Error;

use crate::command::CommandKind;

/// The main error type for Joinery operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Column not found error
    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },

    /// Table not found error
    #[error("Table '{table}' not found")]
    TableNotFound { table: String },

    /// A relationship name that was never declared on the given table
    #[error("Relationship '{name}' not found on '{table}'")]
    RelationshipNotFound { table: String, name: String },

    /// Invalid clause usage
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// A relationship name declared twice at the same level
    #[error("Relationship '{name}' is already declared on '{table}'")]
    DuplicateRelationship { table: String, name: String },

    /// A full-table or key-less operation attempted without opt-in
    #[error("Refusing to {operation} '{table}': {message}")]
    Guard {
        operation: CommandKind,
        table: String,
        message: String,
    },

    /// Failure reported by the adapter
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invariant violation inside the engine
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Convenience Result type for Joinery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced column, table or relationship does not exist
    Schema,
    /// Invalid clause usage
    Contract,
    /// Missing opt-in or missing primary key
    Guard,
    /// Reported by the underlying adapter
    Adapter,
    /// A bug
    Internal,
}

impl Error {
    /// Create a new invalid query error
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a new column not found error
    pub fn column_not_found(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create a new table not found error
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    pub fn relationship_not_found(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::RelationshipNotFound {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn duplicate_relationship(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateRelationship {
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn guard(
        operation: CommandKind,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Guard {
            operation,
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The taxonomy bucket this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ColumnNotFound { .. }
            | Error::TableNotFound { .. }
            | Error::RelationshipNotFound { .. } => ErrorKind::Schema,
            Error::InvalidQuery { .. } | Error::DuplicateRelationship { .. } => {
                ErrorKind::Contract
            }
            Error::Guard { .. } => ErrorKind::Guard,
            Error::Adapter(_) => ErrorKind::Adapter,
            Error::Serialization(_) | Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Wrap an error raised while talking to the adapter, attaching the
    /// operation and table it happened on.
    ///
    /// Errors that are already adapter errors keep their classification;
    /// anything else the adapter produced becomes [`AdapterErrorKind::Unknown`].
    pub(crate) fn at_adapter_boundary(self, operation: CommandKind, table: &str) -> Self {
        let mut adapter = match self {
            Error::Adapter(adapter) => adapter,
            other => AdapterError::new(AdapterErrorKind::Unknown, other.to_string()),
        };
        adapter.operation.get_or_insert(operation);
        if adapter.table.is_none() {
            adapter.table = Some(table.to_string());
        }
        Error::Adapter(adapter)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Adapter(err.into())
    }
}

/// What the adapter reported went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    DuplicateKey,
    NullConstraint,
    ForeignKeyConstraint,
    Unknown,
}

impl AdapterErrorKind {
    /// Classify a standard SQLSTATE code
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "23505" => AdapterErrorKind::DuplicateKey,
            "23502" => AdapterErrorKind::NullConstraint,
            "23503" => AdapterErrorKind::ForeignKeyConstraint,
            _ => AdapterErrorKind::Unknown,
        }
    }

    fn from_database_error(err: &dyn sqlx::error::DatabaseError) -> Self {
        match err.kind() {
            sqlx::error::ErrorKind::UniqueViolation => AdapterErrorKind::DuplicateKey,
            sqlx::error::ErrorKind::NotNullViolation => AdapterErrorKind::NullConstraint,
            sqlx::error::ErrorKind::ForeignKeyViolation => AdapterErrorKind::ForeignKeyConstraint,
            _ => err
                .code()
                .map(|code| Self::from_sqlstate(&code))
                .unwrap_or(AdapterErrorKind::Unknown),
        }
    }
}

impl Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterErrorKind::DuplicateKey => write!(f, "duplicate key"),
            AdapterErrorKind::NullConstraint => write!(f, "null constraint violation"),
            AdapterErrorKind::ForeignKeyConstraint => write!(f, "foreign key constraint violation"),
            AdapterErrorKind::Unknown => write!(f, "adapter failure"),
        }
    }
}

/// A failure surfaced by [`crate::Adapter::execute`]
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
    pub operation: Option<CommandKind>,
    pub table: Option<String>,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            operation: None,
            table: None,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Unknown, message)
    }
}

impl Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Adapter error ({})", self.kind)?;
        match (&self.operation, &self.table) {
            (Some(operation), Some(table)) => write!(f, " during {} on '{}'", operation, table)?,
            (Some(operation), None) => write!(f, " during {}", operation)?,
            (None, Some(table)) => write!(f, " on '{}'", table)?,
            (None, None) => {}
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for AdapterError {}

impl From<sqlx::Error> for AdapterError {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Database(db) => AdapterErrorKind::from_database_error(db.as_ref()),
            _ => AdapterErrorKind::Unknown,
        };
        AdapterError::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::error::Error as StdError;

    #[test]
    fn test_invalid_query_error() {
        let err = Error::invalid_query("select() cannot follow group_by()");
        assert_eq!(err.kind(), ErrorKind::Contract);
        assert_eq!(
            err.to_string(),
            "Invalid query: select() cannot follow group_by()"
        );
    }

    #[test]
    fn test_column_not_found_error() {
        let err = Error::column_not_found("Author", "Nickname");
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert_eq!(err.to_string(), "Column 'Nickname' not found in table 'Author'");
    }

    #[test]
    fn test_guard_error_names_operation_and_table() {
        let err = Error::guard(CommandKind::Truncate, "Author", "truncation is disabled");
        assert_eq!(err.kind(), ErrorKind::Guard);
        assert_eq!(
            err.to_string(),
            "Refusing to truncate 'Author': truncation is disabled"
        );
    }

    #[test]
    fn test_adapter_boundary_wraps_foreign_errors() {
        let err = Error::internal("socket closed").at_adapter_boundary(CommandKind::Select, "Author");
        match err {
            Error::Adapter(adapter) => {
                assert_eq!(adapter.kind, AdapterErrorKind::Unknown);
                assert_eq!(adapter.operation, Some(CommandKind::Select));
                assert_eq!(adapter.table.as_deref(), Some("Author"));
                assert!(adapter.message.contains("socket closed"));
            }
            other => panic!("expected adapter error, got {:?}", other),
        }
    }

    #[test]
    fn test_adapter_boundary_keeps_classification() {
        let err = Error::Adapter(AdapterError::new(AdapterErrorKind::DuplicateKey, "dup"))
            .at_adapter_boundary(CommandKind::Insert, "Book");
        assert_eq!(err.kind(), ErrorKind::Adapter);
        assert_eq!(
            err.to_string(),
            "Adapter error (duplicate key) during insert on 'Book': dup"
        );
    }

    #[test]
    fn test_sqlstate_classification() {
        assert_eq!(AdapterErrorKind::from_sqlstate("23505"), AdapterErrorKind::DuplicateKey);
        assert_eq!(AdapterErrorKind::from_sqlstate("23502"), AdapterErrorKind::NullConstraint);
        assert_eq!(
            AdapterErrorKind::from_sqlstate("23503"),
            AdapterErrorKind::ForeignKeyConstraint
        );
        assert_eq!(AdapterErrorKind::from_sqlstate("42P01"), AdapterErrorKind::Unknown);
    }

    #[test]
    fn test_sqlx_non_database_error_is_unknown() {
        let err: Error = sqlx::Error::RowNotFound.into();
        match err {
            Error::Adapter(adapter) => assert_eq!(adapter.kind, AdapterErrorKind::Unknown),
            other => panic!("expected adapter error, got {:?}", other),
        }
    }

    #[derive(Debug)]
    struct FakeDatabaseError {
        unique: bool,
        code: Option<&'static str>,
    }

    impl Display for FakeDatabaseError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake database error")
        }
    }

    impl StdError for FakeDatabaseError {}

    impl sqlx::error::DatabaseError for FakeDatabaseError {
        fn message(&self) -> &str {
            "fake database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            if self.unique {
                sqlx::error::ErrorKind::UniqueViolation
            } else {
                sqlx::error::ErrorKind::Other
            }
        }
    }

    #[test]
    fn test_sqlx_database_error_classification() {
        let unique = sqlx::Error::Database(Box::new(FakeDatabaseError {
            unique: true,
            code: None,
        }));
        assert_eq!(AdapterError::from(unique).kind, AdapterErrorKind::DuplicateKey);

        let by_code = sqlx::Error::Database(Box::new(FakeDatabaseError {
            unique: false,
            code: Some("23502"),
        }));
        assert_eq!(AdapterError::from(by_code).kind, AdapterErrorKind::NullConstraint);
    }
}
