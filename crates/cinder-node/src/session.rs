use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::NodeError;
use crate::protocol::{ConsistencyLevel, Request, Response};
use crate::store::MemoryStore;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub column_families: Vec<String>,
    pub replication_factor: u32,
    pub live_replicas: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            column_families: vec!["users".to_string()],
            replication_factor: 3,
            live_replicas: 3,
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let column_families = std::env::var("CINDER_COLUMN_FAMILIES")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|cf| !cf.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.column_families);
        let replication_factor: u32 = std::env::var("CINDER_REPLICATION_FACTOR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.replication_factor);
        let live_replicas = std::env::var("CINDER_LIVE_REPLICAS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(replication_factor);
        Self {
            column_families,
            replication_factor,
            live_replicas,
        }
    }
}

/// State shared by every connection to one node.
pub struct Node {
    store: MemoryStore,
    replication_factor: u32,
    live_replicas: AtomicU32,
    pending_timeouts: AtomicU32,
    reply_delay_ms: AtomicU64,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            store: MemoryStore::new(config.column_families),
            replication_factor: config.replication_factor,
            live_replicas: AtomicU32::new(config.live_replicas),
            pending_timeouts: AtomicU32::new(0),
            reply_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Simulates replicas going down or coming back.
    pub fn set_live_replicas(&self, live: u32) {
        self.live_replicas.store(live, Ordering::Relaxed);
    }

    /// The next `n` mutations answer `TimedOut` without being applied.
    pub fn time_out_next(&self, n: u32) {
        self.pending_timeouts.store(n, Ordering::Relaxed);
    }

    /// Holds every reply back by `delay`.
    pub fn set_reply_delay(&self, delay: Duration) {
        self.reply_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    fn take_timeout(&self) -> bool {
        self.pending_timeouts
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_consistency(&self, consistency: ConsistencyLevel) -> Result<(), NodeError> {
        let required = consistency.required_acks(self.replication_factor);
        let live = self.live_replicas.load(Ordering::Relaxed);
        if live < required {
            return Err(NodeError::Unavailable { required, live });
        }
        Ok(())
    }
}

pub struct Session {
    node: Arc<Node>,
}

impl Session {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    pub fn handle(&self, request: Request) -> Response {
        let delay = self.node.reply_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }

        let mutation = matches!(request, Request::Remove { .. } | Request::Insert { .. });
        if mutation && self.node.take_timeout() {
            return Response::TimedOut("replicas did not acknowledge in time".into());
        }

        let result = match request {
            Request::Remove {
                key,
                path,
                timestamp,
                consistency,
            } => self
                .node
                .check_consistency(consistency)
                .and_then(|()| self.node.store.remove(&key, &path, timestamp))
                .map(|()| Response::Ok),
            Request::Insert {
                key,
                path,
                value,
                timestamp,
                consistency,
            } => self
                .node
                .check_consistency(consistency)
                .and_then(|()| self.node.store.insert(&key, &path, value, timestamp))
                .map(|()| Response::Ok),
            Request::GetRow { key, column_family } => self
                .node
                .store
                .get_row(&column_family, &key)
                .map(Response::Row),
            Request::Ping => Ok(Response::Pong),
        };

        match result {
            Ok(response) => response,
            Err(e @ NodeError::Unavailable { .. }) => Response::Unavailable(e.to_string()),
            Err(e) => Response::InvalidRequest(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ColumnPath;

    fn session(live_replicas: u32) -> Session {
        Session::new(Arc::new(Node::new(NodeConfig {
            live_replicas,
            ..NodeConfig::default()
        })))
    }

    fn remove(consistency: ConsistencyLevel, cf: &str) -> Request {
        Request::Remove {
            key: b"alice".to_vec(),
            path: ColumnPath::new(cf),
            timestamp: 1,
            consistency,
        }
    }

    #[test]
    fn quorum_fails_with_one_live_replica() {
        let session = session(1);
        assert!(matches!(
            session.handle(remove(ConsistencyLevel::Quorum, "users")),
            Response::Unavailable(_)
        ));
        assert!(matches!(
            session.handle(remove(ConsistencyLevel::One, "users")),
            Response::Ok
        ));
    }

    #[test]
    fn replicas_coming_back_restores_all() {
        let session = session(2);
        assert!(matches!(
            session.handle(remove(ConsistencyLevel::All, "users")),
            Response::Unavailable(_)
        ));
        session.node.set_live_replicas(3);
        assert!(matches!(
            session.handle(remove(ConsistencyLevel::All, "users")),
            Response::Ok
        ));
    }

    #[test]
    fn unknown_column_family_is_invalid_request() {
        let session = session(3);
        assert!(matches!(
            session.handle(remove(ConsistencyLevel::One, "orders")),
            Response::InvalidRequest(_)
        ));
    }

    #[test]
    fn injected_timeouts_are_consumed_in_order() {
        let session = session(3);
        session.node.time_out_next(1);
        assert!(matches!(
            session.handle(remove(ConsistencyLevel::One, "users")),
            Response::TimedOut(_)
        ));
        assert!(matches!(
            session.handle(remove(ConsistencyLevel::One, "users")),
            Response::Ok
        ));
        assert!(session.node.store().get_row("users", b"alice").unwrap().is_some());
    }

    #[test]
    fn ping_answers_pong() {
        assert!(matches!(session(3).handle(Request::Ping), Response::Pong));
    }
}
