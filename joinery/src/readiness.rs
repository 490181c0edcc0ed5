//! Readiness chain
//!
//! Describing tables is asynchronous, declaring relationships is not. Each
//! context carries a shared future that resolves to its [`Catalog`]; every
//! declaration chains one more step onto it, and every terminal operation
//! awaits the tail first. Steps run once no matter how many clones await them.

use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::adapter::Adapter;
use crate::command::CommandKind;
use crate::relationship::Relationship;
use crate::schema::Catalog;
use crate::Result;

type Tail = Shared<BoxFuture<'static, Result<Arc<Catalog>>>>;

#[derive(Clone)]
pub struct Readiness {
    tail: Tail,
    steps: usize,
}

impl Readiness {
    /// Describe the root table
    pub(crate) fn start<A: Adapter>(adapter: Arc<A>, table: String) -> Self {
        let step = async move {
            let columns = adapter
                .describe(&table)
                .await
                .map_err(|e| e.at_adapter_boundary(CommandKind::Describe, &table))?;
            debug!(table = %table, columns = columns.len(), "joinery.ready");
            Ok(Arc::new(Catalog::new(&table, columns)?))
        };
        Self {
            tail: step.boxed().shared(),
            steps: 1,
        }
    }

    /// Chain the resolution of a declared relationship subtree under `parent`
    pub(crate) fn declare<A: Adapter>(
        &self,
        adapter: Arc<A>,
        parent: Vec<String>,
        relationship: Relationship,
    ) -> Self {
        let previous = self.tail.clone();
        let step = async move {
            let catalog = previous.await?;
            let name = relationship.name.clone();
            let next = catalog.attach(adapter.as_ref(), &parent, relationship).await?;
            debug!(table = %next.table(), relationship = %name, "joinery.ready");
            Ok(Arc::new(next))
        };
        Self {
            tail: step.boxed().shared(),
            steps: self.steps + 1,
        }
    }

    /// Wait for every step so far
    pub async fn ensure_ready(&self) -> Result<Arc<Catalog>> {
        self.tail.clone().await
    }

    /// The catalog, if every step has already completed successfully
    pub fn peek(&self) -> Option<Arc<Catalog>> {
        self.tail.peek().and_then(|result| result.as_ref().ok().cloned())
    }

    /// Number of chained steps, the root description included
    pub fn steps(&self) -> usize {
        self.steps
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("steps", &self.steps)
            .field("ready", &self.tail.peek().is_some())
            .finish()
    }
}
