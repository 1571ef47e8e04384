use std::sync::Arc;

use cinder_node::protocol::ConsistencyLevel;

use crate::clock::{Clock, FixedClock, LogicalTimestamp, SystemClock};
use crate::connection::NodeApi;
use crate::error::ClientError;
use crate::executor::{CancelToken, Executor};
use crate::operation::Operation;
use crate::pool::Pool;
use crate::types::{ClusterKey, Target};

/// A single tombstone write. The timestamp is fixed when the operation is
/// built, so every retry carries the same one.
#[derive(Debug, Clone)]
pub struct RemoveRow {
    pub key: ClusterKey,
    pub target: Target,
    pub timestamp: LogicalTimestamp,
    pub consistency: ConsistencyLevel,
}

impl<C: NodeApi> Operation<C> for RemoveRow {
    type Output = ();

    fn execute(&self, conn: &mut C) -> Result<(), ClientError> {
        conn.remove(&self.key, &self.target, self.timestamp, self.consistency)
    }
}

/// Removes data at the row level.
pub struct RowDeletor<'e, P: Pool> {
    executor: &'e Executor<P>,
    clock: Arc<dyn Clock>,
}

impl<'e, P: Pool> RowDeletor<'e, P> {
    pub fn new(executor: &'e Executor<P>) -> Self {
        Self::with_clock(executor, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(executor: &'e Executor<P>, clock: Arc<dyn Clock>) -> Self {
        Self { executor, clock }
    }

    /// Every deletion from this deletor is stamped with `timestamp`, e.g. to
    /// line up a batch of related mutations.
    pub fn with_timestamp(executor: &'e Executor<P>, timestamp: LogicalTimestamp) -> Self {
        Self::with_clock(executor, Arc::new(FixedClock::new(timestamp)))
    }

    /// Deletes the row at `key` from `target`. Succeeds even if the row does
    /// not exist.
    ///
    /// `key` accepts UTF-8 strings and raw bytes alike; `None` deletes the
    /// row with the empty key.
    pub fn delete_row(
        &self,
        target: impl Into<Target>,
        key: impl Into<ClusterKey>,
        consistency: ConsistencyLevel,
    ) -> Result<(), ClientError> {
        self.delete_row_with_cancel(target, key, consistency, &CancelToken::new())
    }

    pub fn delete_row_with_cancel(
        &self,
        target: impl Into<Target>,
        key: impl Into<ClusterKey>,
        consistency: ConsistencyLevel,
        cancel: &CancelToken,
    ) -> Result<(), ClientError> {
        let operation = self.remove_row(target, key, consistency);
        self.executor.run_with_cancel(&operation, cancel)
    }

    /// Builds the operation `delete_row` would run, reading the clock once.
    pub fn remove_row(
        &self,
        target: impl Into<Target>,
        key: impl Into<ClusterKey>,
        consistency: ConsistencyLevel,
    ) -> RemoveRow {
        RemoveRow {
            key: key.into(),
            target: target.into(),
            timestamp: self.clock.now(),
            consistency,
        }
    }
}

impl<P: Pool> Executor<P> {
    pub fn row_deletor(&self) -> RowDeletor<'_, P> {
        RowDeletor::new(self)
    }
}
