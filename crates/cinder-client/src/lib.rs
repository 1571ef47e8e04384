mod clock;
mod config;
mod connection;
mod deletor;
mod error;
mod executor;
mod operation;
mod pool;
mod types;

pub use cinder_node::protocol::{CellView, ConsistencyLevel, RowView};
pub use clock::{Clock, FixedClock, LogicalTimestamp, SystemClock};
pub use config::{ClientConfig, ExecutorConfig, PoolConfig};
pub use connection::{Connection, NodeApi};
pub use deletor::{RemoveRow, RowDeletor};
pub use error::ClientError;
pub use executor::{CancelToken, Executor};
pub use operation::Operation;
pub use pool::{LeasedConnection, NodePool, Pool};
pub use types::{ClusterKey, Target};
