//! Observers, triggers and the mutation lifecycle
//!
//! Observers hear about every statement a context runs, successful or not.
//! Triggers run around inserts, updates and deletes: a before trigger may
//! edit or reject each record, an after trigger sees the final records.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::command::CommandKind;
use crate::{Error, Result, Row, Value};

/// A statement that ran successfully
#[derive(Debug, Clone)]
pub struct SuccessEvent {
    pub operation: CommandKind,
    pub table: String,
    pub sql: String,
    pub args: Vec<Value>,
    /// Rows returned, counted or changed
    pub affected: u64,
    pub elapsed: Duration,
}

/// A statement that failed; `sql` is empty when serialization itself failed
#[derive(Debug, Clone)]
pub struct FailEvent {
    pub operation: CommandKind,
    pub table: String,
    pub sql: String,
    pub args: Vec<Value>,
    pub error: Error,
}

pub type SuccessHandler = Arc<dyn Fn(&SuccessEvent) + Send + Sync>;
pub type FailHandler = Arc<dyn Fn(&FailEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Observers {
    success: Vec<SuccessHandler>,
    fail: Vec<FailHandler>,
}

impl Observers {
    pub fn on_success<F>(&mut self, handler: F)
    where
        F: Fn(&SuccessEvent) + Send + Sync + 'static,
    {
        self.success.push(Arc::new(handler));
    }

    pub fn on_fail<F>(&mut self, handler: F)
    where
        F: Fn(&FailEvent) + Send + Sync + 'static,
    {
        self.fail.push(Arc::new(handler));
    }

    pub(crate) fn succeeded(&self, event: &SuccessEvent) {
        for handler in &self.success {
            handler(event);
        }
    }

    pub(crate) fn failed(&self, event: &FailEvent) {
        for handler in &self.fail {
            handler(event);
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("success", &self.success.len())
            .field("fail", &self.fail.len())
            .finish()
    }
}

/// What a trigger is running for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerContext {
    pub operation: CommandKind,
    pub table: String,
    /// Position of the record in the batch
    pub index: usize,
}

pub type BeforeTrigger = Arc<dyn Fn(&mut Row, &TriggerContext) -> Result<()> + Send + Sync>;
pub type AfterTrigger = Arc<dyn Fn(&Row, &TriggerContext) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Triggers {
    before: Vec<(CommandKind, BeforeTrigger)>,
    after: Vec<(CommandKind, AfterTrigger)>,
}

impl Triggers {
    pub fn before<F>(&mut self, operation: CommandKind, trigger: F)
    where
        F: Fn(&mut Row, &TriggerContext) -> Result<()> + Send + Sync + 'static,
    {
        self.before.push((operation, Arc::new(trigger)));
    }

    pub fn after<F>(&mut self, operation: CommandKind, trigger: F)
    where
        F: Fn(&Row, &TriggerContext) + Send + Sync + 'static,
    {
        self.after.push((operation, Arc::new(trigger)));
    }

    /// Run before triggers over every record; the first error aborts
    pub(crate) fn run_before(&self, operation: CommandKind, table: &str, records: &mut [Row]) -> Result<()> {
        for (kind, trigger) in &self.before {
            if *kind != operation {
                continue;
            }
            for (index, record) in records.iter_mut().enumerate() {
                let context = TriggerContext {
                    operation,
                    table: table.to_string(),
                    index,
                };
                trigger(record, &context)?;
            }
        }
        Ok(())
    }

    pub(crate) fn run_after(&self, operation: CommandKind, table: &str, records: &[Row]) {
        for (kind, trigger) in &self.after {
            if *kind != operation {
                continue;
            }
            for (index, record) in records.iter().enumerate() {
                let context = TriggerContext {
                    operation,
                    table: table.to_string(),
                    index,
                };
                trigger(record, &context);
            }
        }
    }
}

impl fmt::Debug for Triggers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Triggers")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

/// Stages of a mutation, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    BeforeTrigger,
    Execute,
    /// Identity backfill and refetch of computed columns
    Serialize,
    AfterTrigger,
    Done,
}

/// Tracks the phase of one mutation; phases only move forward
#[derive(Debug)]
pub(crate) struct Lifecycle {
    operation: CommandKind,
    table: String,
    phase: Phase,
    started: Instant,
}

impl Lifecycle {
    pub(crate) fn new(operation: CommandKind, table: &str) -> Self {
        Self {
            operation,
            table: table.to_string(),
            phase: Phase::Idle,
            started: Instant::now(),
        }
    }

    pub(crate) fn advance(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "{:?} cannot follow {:?}", next, self.phase);
        trace!(
            operation = %self.operation,
            table = %self.table,
            from = ?self.phase,
            to = ?next,
            "joinery.phase"
        );
        self.phase = next;
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
