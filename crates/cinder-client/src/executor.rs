use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::config::{ClientConfig, ExecutorConfig};
use crate::connection::NodeApi;
use crate::error::ClientError;
use crate::operation::Operation;
use crate::pool::{LeasedConnection, NodePool, Pool};

/// Cooperative cancellation for [`Executor::run_with_cancel`]. Checked
/// before every attempt; an attempt already in flight runs to completion
/// or to its timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

enum RunState<R> {
    Attempting { attempt: u32 },
    Succeeded(R),
    Exhausted { attempts: u32, last: ClientError },
}

/// Runs operations against a pool, retrying transient failures on fresh
/// connections.
///
/// Holds no per-call state, so any number of threads may call `run`
/// concurrently.
pub struct Executor<P: Pool> {
    pool: P,
    config: ExecutorConfig,
}

impl Executor<NodePool> {
    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self::new(NodePool::new(config.pool)?, config.executor))
    }
}

impl<P: Pool> Executor<P> {
    pub fn new(pool: P, config: ExecutorConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn run<O>(&self, operation: &O) -> Result<O::Output, ClientError>
    where
        O: Operation<P::Conn> + ?Sized,
    {
        self.run_with_cancel(operation, &CancelToken::new())
    }

    /// Runs `operation` until it succeeds, fails with a non-transient error,
    /// or uses up the attempt bound. In the last case the error is
    /// [`ClientError::RetriesExhausted`] wrapping the final cause.
    pub fn run_with_cancel<O>(
        &self,
        operation: &O,
        cancel: &CancelToken,
    ) -> Result<O::Output, ClientError>
    where
        O: Operation<P::Conn> + ?Sized,
    {
        let bound = self.config.attempt_bound();
        let mut state = RunState::Attempting { attempt: 1 };

        loop {
            state = match state {
                RunState::Attempting { .. } if cancel.is_cancelled() => {
                    return Err(ClientError::Cancelled);
                }
                RunState::Attempting { attempt } => match self.attempt(operation, attempt) {
                    Ok(output) => RunState::Succeeded(output),
                    Err(e) if !e.is_transient() => return Err(e),
                    Err(e) if attempt >= bound => RunState::Exhausted {
                        attempts: attempt,
                        last: e,
                    },
                    Err(e) => {
                        debug!(attempt, bound, "retrying after transient failure: {e}");
                        RunState::Attempting {
                            attempt: attempt + 1,
                        }
                    }
                },
                RunState::Succeeded(output) => return Ok(output),
                RunState::Exhausted { attempts, last } => {
                    warn!(attempts, "giving up: {last}");
                    return Err(ClientError::RetriesExhausted {
                        attempts,
                        last: Box::new(last),
                    });
                }
            };
        }
    }

    fn attempt<O>(&self, operation: &O, attempt: u32) -> Result<O::Output, ClientError>
    where
        O: Operation<P::Conn> + ?Sized,
    {
        let timeout = self.config.attempt_timeout;
        let mut conn = LeasedConnection::acquire(&self.pool, timeout)?;
        debug!(attempt, node = %conn.node(), "attempting operation");
        conn.set_timeout(timeout)?;

        match operation.execute(&mut *conn) {
            Ok(output) => {
                conn.release();
                Ok(output)
            }
            Err(e) if e.leaves_connection_usable() => {
                conn.release();
                Err(e)
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(attempt, node = %conn.node(), "discarding connection: {e}");
                }
                conn.discard();
                Err(e)
            }
        }
    }
}
