use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Orders a mutation against every other mutation to the same cell. The
/// cluster resolves conflicts last-write-wins on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalTimestamp(i64);

impl LogicalTimestamp {
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> LogicalTimestamp;
}

/// Wall-clock microseconds, forced strictly increasing per instance so that
/// two calls landing in the same microsecond, or a wall clock that steps
/// backwards, never yield a timestamp lower than one already handed out.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }

    fn wall_micros() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> LogicalTimestamp {
        let wall = Self::wall_micros();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(wall.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        LogicalTimestamp(wall.max(prev + 1))
    }
}

/// Always answers the timestamp it was built with.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(LogicalTimestamp);

impl FixedClock {
    pub fn new(timestamp: LogicalTimestamp) -> Self {
        Self(timestamp)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> LogicalTimestamp {
        self.0
    }
}
