use serde::{Deserialize, Serialize};

/// Largest frame body either side accepts.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Reads a frame's 4-byte big-endian length prefix, refusing bodies larger
/// than [`MAX_FRAME_LEN`] before anything is allocated for them.
pub fn frame_len(prefix: [u8; 4]) -> Result<usize, rmp_serde::decode::Error> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(rmp_serde::decode::Error::Syntax(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    Ok(len)
}

/// How many replica acknowledgements a request needs before it counts as
/// successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    Any,
    One,
    Two,
    Three,
    Quorum,
    LocalQuorum,
    EachQuorum,
    All,
}

impl ConsistencyLevel {
    /// Acknowledgements required under the given replication factor.
    pub fn required_acks(self, replication_factor: u32) -> u32 {
        match self {
            ConsistencyLevel::Any | ConsistencyLevel::One => 1,
            ConsistencyLevel::Two => 2,
            ConsistencyLevel::Three => 3,
            ConsistencyLevel::Quorum
            | ConsistencyLevel::LocalQuorum
            | ConsistencyLevel::EachQuorum => replication_factor / 2 + 1,
            ConsistencyLevel::All => replication_factor,
        }
    }
}

/// Addresses a column family, and optionally a super column and column
/// inside each of its rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPath {
    pub column_family: String,
    pub super_column: Option<Vec<u8>>,
    pub column: Option<Vec<u8>>,
}

impl ColumnPath {
    pub fn new(column_family: impl Into<String>) -> Self {
        Self {
            column_family: column_family.into(),
            super_column: None,
            column: None,
        }
    }
}

/// A cell as seen by readers: the winning value and the timestamp it was
/// written at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellView {
    pub super_column: Option<Vec<u8>>,
    pub name: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowView {
    pub key: Vec<u8>,
    /// Timestamp of the newest row tombstone, if the row was ever deleted.
    pub deleted_at: Option<i64>,
    pub cells: Vec<CellView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    Remove {
        key: Vec<u8>,
        path: ColumnPath,
        timestamp: i64,
        consistency: ConsistencyLevel,
    },
    Insert {
        key: Vec<u8>,
        path: ColumnPath,
        value: Vec<u8>,
        timestamp: i64,
        consistency: ConsistencyLevel,
    },
    GetRow {
        key: Vec<u8>,
        column_family: String,
    },
    Ping,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Row(Option<RowView>),
    Pong,
    /// Not enough live replicas for the requested consistency level.
    Unavailable(String),
    /// Replicas did not acknowledge in time.
    TimedOut(String),
    /// The request reached the node and was rejected for its content.
    InvalidRequest(String),
}
