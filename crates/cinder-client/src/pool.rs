use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::connection::{Connection, NodeApi};
use crate::error::ClientError;

/// Hands out connections to cluster nodes and takes them back.
///
/// `acquire` must fail with [`ClientError::PoolExhausted`] or
/// [`ClientError::NoLiveNodes`] rather than an operation-level error, so the
/// executor can count it as a retryable attempt.
pub trait Pool: Sync {
    type Conn: NodeApi;

    fn acquire(&self, timeout: Duration) -> Result<Self::Conn, ClientError>;

    /// Returns a connection that is still fit for another request.
    fn release(&self, conn: Self::Conn);

    /// Drops a connection that may be broken.
    fn discard(&self, conn: Self::Conn);
}

/// Exclusive use of one pooled connection for the length of one attempt.
///
/// Must end in [`release`](Self::release) or [`discard`](Self::discard).
/// A lease dropped without either is discarded, since its stream state is
/// unknown.
pub struct LeasedConnection<'p, P: Pool + ?Sized> {
    conn: Option<P::Conn>,
    pool: &'p P,
}

impl<'p, P: Pool + ?Sized> LeasedConnection<'p, P> {
    pub fn acquire(pool: &'p P, timeout: Duration) -> Result<Self, ClientError> {
        let conn = pool.acquire(timeout)?;
        Ok(Self {
            conn: Some(conn),
            pool,
        })
    }

    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }

    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn);
        }
    }
}

impl<P: Pool + ?Sized> Deref for LeasedConnection<'_, P> {
    type Target = P::Conn;

    fn deref(&self) -> &P::Conn {
        // BUG: conn is always Some until release/discard consume the lease
        self.conn.as_ref().expect("BUG: lease already returned")
    }
}

impl<P: Pool + ?Sized> DerefMut for LeasedConnection<'_, P> {
    fn deref_mut(&mut self) -> &mut P::Conn {
        // BUG: conn is always Some until release/discard consume the lease
        self.conn.as_mut().expect("BUG: lease already returned")
    }
}

impl<P: Pool + ?Sized> Drop for LeasedConnection<'_, P> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Health {
    /// Set when the node refused a connection.
    down_until: Option<Instant>,
    /// Set when a connection to the node was discarded.
    suspect_until: Option<Instant>,
}

impl Health {
    fn is_down(&self, now: Instant) -> bool {
        self.down_until.is_some_and(|until| now < until)
    }

    fn suspect_until(&self, now: Instant) -> Option<Instant> {
        self.suspect_until.filter(|until| now < *until)
    }
}

struct NodeSlot {
    addr: String,
    idle_tx: Sender<Connection>,
    idle_rx: Receiver<Connection>,
    /// Connections dialed and not yet discarded, idle or leased.
    open: AtomicUsize,
    health: Mutex<Health>,
}

impl NodeSlot {
    fn new(addr: String, capacity: usize) -> Self {
        let (idle_tx, idle_rx) = crossbeam::channel::bounded(capacity);
        Self {
            addr,
            idle_tx,
            idle_rx,
            open: AtomicUsize::new(0),
            health: Mutex::new(Health::default()),
        }
    }

    fn health(&self) -> Health {
        *self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mark_down(&self, cooldown: Duration) {
        self.health.lock().unwrap_or_else(|e| e.into_inner()).down_until =
            Some(Instant::now() + cooldown);
    }

    fn mark_up(&self) {
        self.health.lock().unwrap_or_else(|e| e.into_inner()).down_until = None;
    }

    fn mark_suspect(&self, cooldown: Duration) {
        self.health.lock().unwrap_or_else(|e| e.into_inner()).suspect_until =
            Some(Instant::now() + cooldown);
    }

    /// Claims room for one more connection if the node is below capacity.
    fn reserve(&self, capacity: usize) -> bool {
        self.open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < capacity).then_some(open + 1)
            })
            .is_ok()
    }

    fn unreserve(&self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Connections to a fixed list of nodes.
///
/// Each call to `acquire` targets one node, chosen round-robin, so
/// consecutive attempts land on different nodes. Connections are dialed
/// lazily, up to `pool_size_per_node` per node.
///
/// A node that refuses a connection is skipped for `node_cooldown`. A node
/// whose connection was discarded is passed over for `discard_cooldown`
/// while any other live node is not; when every live node is in that state
/// the one discarded longest ago is picked.
pub struct NodePool {
    nodes: Vec<NodeSlot>,
    next: AtomicUsize,
    config: PoolConfig,
}

impl NodePool {
    pub fn new(config: PoolConfig) -> Result<Self, ClientError> {
        if config.nodes.is_empty() {
            return Err(ClientError::NoLiveNodes);
        }
        let capacity = config.pool_size_per_node.max(1);
        let mut nodes: Vec<NodeSlot> = Vec::with_capacity(config.nodes.len());
        for addr in &config.nodes {
            if nodes.iter().any(|slot| &slot.addr == addr) {
                warn!(node = %addr, "node listed more than once, ignoring repeat");
                continue;
            }
            nodes.push(NodeSlot::new(addr.clone(), capacity));
        }
        Ok(Self {
            nodes,
            next: AtomicUsize::new(0),
            config,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn capacity(&self) -> usize {
        self.config.pool_size_per_node.max(1)
    }

    fn pick(&self) -> Result<&NodeSlot, ClientError> {
        let now = Instant::now();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut fallback: Option<(&NodeSlot, Instant)> = None;
        for i in 0..self.nodes.len() {
            let slot = &self.nodes[start.wrapping_add(i) % self.nodes.len()];
            let health = slot.health();
            if health.is_down(now) {
                continue;
            }
            match health.suspect_until(now) {
                None => return Ok(slot),
                Some(until) => {
                    if fallback.is_none_or(|(_, oldest)| until < oldest) {
                        fallback = Some((slot, until));
                    }
                }
            }
        }
        fallback
            .map(|(slot, _)| slot)
            .ok_or(ClientError::NoLiveNodes)
    }

    fn slot_of(&self, conn: &Connection) -> Option<&NodeSlot> {
        self.nodes.iter().find(|slot| slot.addr == conn.node())
    }

    fn dial(&self, slot: &NodeSlot, deadline: Instant) -> Result<Connection, ClientError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let timeout = self
            .config
            .connect_timeout
            .min(remaining)
            .max(Duration::from_millis(1));
        match Connection::connect(&slot.addr, timeout) {
            Ok(conn) => {
                debug!(node = %slot.addr, "opened connection");
                slot.mark_up();
                Ok(conn)
            }
            Err(e) => {
                slot.unreserve();
                slot.mark_down(self.config.node_cooldown);
                warn!(
                    node = %slot.addr,
                    cooldown_ms = self.config.node_cooldown.as_millis() as u64,
                    "node unreachable, cooling down: {e}"
                );
                Err(e)
            }
        }
    }
}

impl Pool for NodePool {
    type Conn = Connection;

    fn acquire(&self, timeout: Duration) -> Result<Connection, ClientError> {
        let deadline = Instant::now() + timeout;
        let slot = self.pick()?;

        loop {
            if let Ok(conn) = slot.idle_rx.try_recv() {
                return Ok(conn);
            }
            if slot.reserve(self.capacity()) {
                return self.dial(slot, deadline);
            }

            // At capacity: wait for a release, rechecking capacity now and
            // then since discards free a slot without signalling the channel.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::PoolExhausted);
            }
            match slot
                .idle_rx
                .recv_timeout(remaining.min(Duration::from_millis(20)))
            {
                Ok(conn) => return Ok(conn),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(ClientError::PoolExhausted),
            }
        }
    }

    fn release(&self, conn: Connection) {
        match self.slot_of(&conn) {
            Some(slot) => {
                if slot.idle_tx.try_send(conn).is_err() {
                    slot.unreserve();
                }
            }
            None => warn!(node = %conn.node(), "released connection from unknown node"),
        }
    }

    fn discard(&self, conn: Connection) {
        if let Some(slot) = self.slot_of(&conn) {
            slot.unreserve();
            slot.mark_suspect(self.config.discard_cooldown);
        }
        debug!(node = %conn.node(), "discarded connection");
    }
}
