//! Joinery - a join-aware relational mapping engine
//!
//! Joinery keeps a registry of table schemas and the relationships declared
//! between them, composes select clauses over that graph without mutating
//! the context they were built on, and folds flat joined rows back into
//! nested records. Inserts, updates and deletes run through triggers and
//! safety guards. Turning commands into SQL is left to an [`Adapter`].
//!
//! ```ignore
//! let authors = joinery::context(adapter, "Author")
//!     .has_many("Books", |b| b.from_table("Book").with_keys("Id", "AuthorId"))?;
//!
//! let records = authors
//!     .include("Books")?
//!     .where_(|q| q.where_("Books.Title").starts_with("The"))?
//!     .fetch_all()
//!     .await?;
//! ```

pub mod adapter;
pub mod alias;
pub mod builder;
pub mod command;
pub mod context;
pub mod error;
pub mod events;
pub mod mutation;
pub mod operator;
pub mod options;
pub mod readiness;
pub mod reconstruct;
pub mod relationship;
pub mod schema;
pub mod value;

#[cfg(test)]
mod testing;

// Re-export main types
pub use adapter::{Adapter, Execution, Statement};
pub use builder::{
    AggregateFunction, ClauseState, ColumnRef, ColumnSelector, Condition, ConditionNode,
    ConditionTree, DateFormatter, IntoColumnRef, IntoColumnSelectors, JoinKeys, JoinedTable,
    OrderByClause, PendingCondition, SortDirection, TableRef, WhereBuilder,
};
pub use command::{
    Assignment, Command, CommandKind, DeleteCommand, InsertCommand, Join, KeyedValue,
    SelectColumn, SelectCommand, UpdateCommand,
};
pub use context::Context;
pub use error::{AdapterError, AdapterErrorKind, Error, ErrorKind, Result};
pub use events::{FailEvent, Phase, SuccessEvent, TriggerContext};
pub use mutation::UpdateSet;
pub use operator::{Chain, Operator};
pub use options::ContextOptions;
pub use readiness::Readiness;
pub use reconstruct::{reconstruct, reconstruct_with_stats, ReconstructStats, Record, ResultNode};
pub use relationship::{Declaration, KeyRef, Relationship, RelationshipKind, Relationships};
pub use schema::{Catalog, ColumnDefinition, Datatype, DefaultValue, Schema};
pub use value::{to_row, Row, Value};

/// Create a context over `table` with default options
pub fn context<A: Adapter>(adapter: A, table: &str) -> Context<A> {
    Context::new(adapter, table)
}
