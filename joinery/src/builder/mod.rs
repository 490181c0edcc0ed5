//! Clause building: column references, condition trees and the clause state

pub mod common;
pub mod condition;
pub mod state;

pub use common::{
    AggregateFunction, ColumnRef, ColumnSelector, IntoColumnRef, IntoColumnSelectors, JoinKeys,
    JoinedTable, OrderByClause, SortDirection, TableRef,
};
pub use condition::{
    Condition, ConditionNode, ConditionTree, DateFormatter, PendingCondition, WhereBuilder,
};
pub use state::ClauseState;
