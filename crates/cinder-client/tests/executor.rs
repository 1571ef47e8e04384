use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cinder_client::*;

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Ok,
    Unreachable,
    Rejected,
}

#[derive(Debug, Clone)]
struct RecordedRemove {
    conn: u32,
    key: Vec<u8>,
    column_family: String,
    timestamp: i64,
    consistency: ConsistencyLevel,
}

type Calls = Arc<Mutex<Vec<RecordedRemove>>>;

struct FakeConn {
    id: u32,
    outcome: Outcome,
    calls: Calls,
}

impl NodeApi for FakeConn {
    fn node(&self) -> &str {
        "fake"
    }

    fn set_timeout(&mut self, _timeout: Duration) -> Result<(), ClientError> {
        Ok(())
    }

    fn remove(
        &mut self,
        key: &ClusterKey,
        target: &Target,
        timestamp: LogicalTimestamp,
        consistency: ConsistencyLevel,
    ) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(RecordedRemove {
            conn: self.id,
            key: key.as_bytes().to_vec(),
            column_family: target.column_family().to_string(),
            timestamp: timestamp.as_micros(),
            consistency,
        });
        match self.outcome {
            Outcome::Ok => Ok(()),
            Outcome::Unreachable => Err(ClientError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionReset,
            ))),
            Outcome::Rejected => Err(ClientError::InvalidRequest("unconfigured column family".into())),
        }
    }
}

/// Connections follow `script` in order, then `fallback` forever.
struct ScriptedPool {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    failing_acquires: AtomicU32,
    issued: AtomicU32,
    released: Mutex<Vec<u32>>,
    discarded: Mutex<Vec<u32>>,
    calls: Calls,
}

impl ScriptedPool {
    fn new(script: impl IntoIterator<Item = Outcome>, fallback: Outcome) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            failing_acquires: AtomicU32::new(0),
            issued: AtomicU32::new(0),
            released: Mutex::new(Vec::new()),
            discarded: Mutex::new(Vec::new()),
            calls: Arc::default(),
        }
    }

    fn failing_first_acquires(self, n: u32) -> Self {
        self.failing_acquires.store(n, Ordering::SeqCst);
        self
    }

    fn released(&self) -> Vec<u32> {
        self.released.lock().unwrap().clone()
    }

    fn discarded(&self) -> Vec<u32> {
        self.discarded.lock().unwrap().clone()
    }

    fn calls(&self) -> Vec<RecordedRemove> {
        self.calls.lock().unwrap().clone()
    }
}

impl Pool for ScriptedPool {
    type Conn = FakeConn;

    fn acquire(&self, _timeout: Duration) -> Result<FakeConn, ClientError> {
        if self
            .failing_acquires
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClientError::PoolExhausted);
        }
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        Ok(FakeConn {
            id: self.issued.fetch_add(1, Ordering::SeqCst),
            outcome,
            calls: Arc::clone(&self.calls),
        })
    }

    fn release(&self, conn: FakeConn) {
        self.released.lock().unwrap().push(conn.id);
    }

    fn discard(&self, conn: FakeConn) {
        self.discarded.lock().unwrap().push(conn.id);
    }
}

fn executor(pool: ScriptedPool, max_attempts: u32) -> Executor<ScriptedPool> {
    Executor::new(
        pool,
        ExecutorConfig::default().with_max_attempts(max_attempts),
    )
}

#[test]
fn recovers_after_fewer_failures_than_the_bound() {
    let exec = executor(
        ScriptedPool::new([Outcome::Unreachable, Outcome::Unreachable], Outcome::Ok),
        3,
    );

    exec.row_deletor()
        .delete_row("users", "alice", ConsistencyLevel::Quorum)
        .unwrap();

    assert_eq!(exec.pool().calls().len(), 3);
    assert_eq!(exec.pool().released(), vec![2]);
    assert_eq!(exec.pool().discarded(), vec![0, 1]);
}

#[test]
fn exhausts_after_exactly_the_bound() {
    let exec = executor(ScriptedPool::new([], Outcome::Unreachable), 4);

    let err = exec
        .row_deletor()
        .delete_row("users", "alice", ConsistencyLevel::One)
        .unwrap_err();

    match err {
        ClientError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, ClientError::Io(_)));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(exec.pool().calls().len(), 4);
    assert_eq!(exec.pool().discarded().len(), 4);
    assert!(exec.pool().released().is_empty());
}

#[test]
fn application_failure_is_not_retried() {
    let exec = executor(ScriptedPool::new([], Outcome::Rejected), 5);

    let err = exec
        .row_deletor()
        .delete_row("no_such_cf", "alice", ConsistencyLevel::One)
        .unwrap_err();

    assert!(matches!(err, ClientError::InvalidRequest(_)));
    assert_eq!(exec.pool().calls().len(), 1);
    assert_eq!(exec.pool().released(), vec![0]);
    assert!(exec.pool().discarded().is_empty());
}

#[test]
fn failed_acquisition_uses_up_an_attempt() {
    let exec = executor(
        ScriptedPool::new([], Outcome::Ok).failing_first_acquires(2),
        3,
    );
    exec.row_deletor()
        .delete_row("users", "alice", ConsistencyLevel::One)
        .unwrap();
    assert_eq!(exec.pool().calls().len(), 1);
    assert_eq!(exec.pool().released(), vec![0]);

    let exec = executor(
        ScriptedPool::new([], Outcome::Ok).failing_first_acquires(3),
        3,
    );
    let err = exec
        .row_deletor()
        .delete_row("users", "alice", ConsistencyLevel::One)
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::RetriesExhausted { attempts: 3, ref last } if matches!(**last, ClientError::PoolExhausted)
    ));
    assert!(exec.pool().calls().is_empty());
}

#[test]
fn retries_reuse_the_captured_timestamp() {
    let exec = executor(
        ScriptedPool::new([Outcome::Unreachable, Outcome::Unreachable], Outcome::Ok),
        3,
    );

    exec.row_deletor()
        .delete_row("users", "alice", ConsistencyLevel::Quorum)
        .unwrap();

    let calls = exec.pool().calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.timestamp == calls[0].timestamp));
    assert!(calls.iter().all(|c| c.key == b"alice"));
    assert!(calls.iter().all(|c| c.consistency == ConsistencyLevel::Quorum));
    assert_eq!(
        calls.iter().map(|c| c.conn).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[test]
fn absent_and_empty_keys_reach_the_wire_as_empty_bytes() {
    let exec = executor(ScriptedPool::new([], Outcome::Ok), 3);
    let deletor = exec.row_deletor();

    deletor
        .delete_row("users", None::<&str>, ConsistencyLevel::One)
        .unwrap();
    deletor
        .delete_row("users", "", ConsistencyLevel::One)
        .unwrap();
    deletor
        .delete_row("users", Vec::<u8>::new(), ConsistencyLevel::One)
        .unwrap();

    let calls = exec.pool().calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.key.is_empty()));
}

#[test]
fn utf8_and_byte_keys_send_the_same_bytes() {
    let exec = executor(ScriptedPool::new([], Outcome::Ok), 1);
    let deletor = exec.row_deletor();

    deletor
        .delete_row("users", "bob", ConsistencyLevel::One)
        .unwrap();
    deletor
        .delete_row("users", &b"bob"[..], ConsistencyLevel::One)
        .unwrap();

    let calls = exec.pool().calls();
    assert_eq!(calls[0].key, calls[1].key);
    assert_eq!(calls[0].column_family, "users");
}

#[test]
fn injected_timestamp_is_used_verbatim() {
    let exec = executor(ScriptedPool::new([], Outcome::Ok), 1);
    let ts = LogicalTimestamp::from_micros(1_700_000_000_000_000);
    let deletor = RowDeletor::with_timestamp(&exec, ts);

    deletor
        .delete_row("users", "alice", ConsistencyLevel::All)
        .unwrap();
    deletor
        .delete_row("users", "bob", ConsistencyLevel::All)
        .unwrap();

    let calls = exec.pool().calls();
    assert!(calls.iter().all(|c| c.timestamp == ts.as_micros()));
}

#[test]
fn successive_deletes_get_non_decreasing_timestamps() {
    let exec = executor(ScriptedPool::new([], Outcome::Ok), 1);
    let deletor = exec.row_deletor();
    for _ in 0..100 {
        deletor
            .delete_row("users", "alice", ConsistencyLevel::One)
            .unwrap();
    }
    let stamps: Vec<_> = exec.pool().calls().iter().map(|c| c.timestamp).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn zero_bound_still_makes_one_attempt() {
    let exec = executor(ScriptedPool::new([], Outcome::Unreachable), 0);
    let err = exec
        .row_deletor()
        .delete_row("users", "alice", ConsistencyLevel::One)
        .unwrap_err();
    assert!(matches!(err, ClientError::RetriesExhausted { attempts: 1, .. }));
    assert_eq!(exec.pool().calls().len(), 1);
}

#[test]
fn cancelled_before_start_acquires_nothing() {
    let exec = executor(ScriptedPool::new([], Outcome::Ok), 3);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = exec
        .row_deletor()
        .delete_row_with_cancel("users", "alice", ConsistencyLevel::One, &cancel)
        .unwrap_err();

    assert!(matches!(err, ClientError::Cancelled));
    assert!(exec.pool().calls().is_empty());
    assert!(exec.pool().released().is_empty());
    assert!(exec.pool().discarded().is_empty());
}

#[test]
fn cancellation_between_attempts_stops_retrying() {
    let exec = executor(ScriptedPool::new([], Outcome::Unreachable), 5);
    let cancel = CancelToken::new();
    let op = exec
        .row_deletor()
        .remove_row("users", "alice", ConsistencyLevel::One);

    let cancelling = |conn: &mut FakeConn| -> Result<(), ClientError> {
        cancel.cancel();
        op.execute(conn)
    };
    let err = exec.run_with_cancel(&cancelling, &cancel).unwrap_err();

    assert!(matches!(err, ClientError::Cancelled));
    assert_eq!(exec.pool().calls().len(), 1);
    assert_eq!(exec.pool().discarded(), vec![0]);
}

#[test]
fn panicking_operation_still_returns_its_lease() {
    let exec = executor(ScriptedPool::new([], Outcome::Ok), 3);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        exec.run(&|_conn: &mut FakeConn| -> Result<(), ClientError> {
            panic!("operation blew up")
        })
    }));

    assert!(result.is_err());
    assert_eq!(exec.pool().discarded(), vec![0]);
    assert!(exec.pool().released().is_empty());
}

#[test]
fn closures_run_as_operations() {
    let exec = executor(ScriptedPool::new([Outcome::Unreachable], Outcome::Ok), 2);
    let attempts = AtomicU32::new(0);

    let node = exec
        .run(&|conn: &mut FakeConn| -> Result<String, ClientError> {
            attempts.fetch_add(1, Ordering::SeqCst);
            conn.remove(
                &ClusterKey::from("alice"),
                &Target::new("users").column("email"),
                LogicalTimestamp::from_micros(5),
                ConsistencyLevel::One,
            )?;
            Ok(conn.node().to_string())
        })
        .unwrap();

    assert_eq!(node, "fake");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn concurrent_runs_each_get_their_own_lease() {
    let exec = executor(ScriptedPool::new([], Outcome::Ok), 3);

    thread::scope(|s| {
        for i in 0..8 {
            let exec = &exec;
            s.spawn(move || {
                let deletor = exec.row_deletor();
                for j in 0..25 {
                    deletor
                        .delete_row("users", format!("user-{i}-{j}"), ConsistencyLevel::One)
                        .unwrap();
                }
            });
        }
    });

    let mut released = exec.pool().released();
    released.sort();
    released.dedup();
    assert_eq!(released.len(), 200);
    assert!(exec.pool().discarded().is_empty());
}
