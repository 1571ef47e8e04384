use std::fmt;

use cinder_node::protocol::ColumnPath;

/// Row key as raw bytes. Equality is byte-wise; an absent key is the empty
/// byte string, never a missing value.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct ClusterKey(Vec<u8>);

impl ClusterKey {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "ClusterKey({s:?})"),
            Err(_) => write!(f, "ClusterKey({:02x?})", self.0),
        }
    }
}

impl From<&str> for ClusterKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for ClusterKey {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&String> for ClusterKey {
    fn from(s: &String) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for ClusterKey {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for ClusterKey {
    fn from(b: &[u8; N]) -> Self {
        Self(b.to_vec())
    }
}

impl From<Vec<u8>> for ClusterKey {
    fn from(b: Vec<u8>) -> Self {
        Self(b)
    }
}

impl<T: Into<ClusterKey>> From<Option<T>> for ClusterKey {
    fn from(key: Option<T>) -> Self {
        key.map(Into::into).unwrap_or_default()
    }
}

/// The column family a mutation applies to, optionally narrowed to one
/// super column and/or column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    column_family: String,
    super_column: Option<Vec<u8>>,
    column: Option<Vec<u8>>,
}

impl Target {
    pub fn new(column_family: impl Into<String>) -> Self {
        Self {
            column_family: column_family.into(),
            super_column: None,
            column: None,
        }
    }

    pub fn super_column(mut self, name: impl Into<Vec<u8>>) -> Self {
        self.super_column = Some(name.into());
        self
    }

    pub fn column(mut self, name: impl Into<Vec<u8>>) -> Self {
        self.column = Some(name.into());
        self
    }

    pub fn column_family(&self) -> &str {
        &self.column_family
    }

    pub fn to_column_path(&self) -> ColumnPath {
        ColumnPath {
            column_family: self.column_family.clone(),
            super_column: self.super_column.clone(),
            column: self.column.clone(),
        }
    }
}

impl From<&str> for Target {
    fn from(cf: &str) -> Self {
        Self::new(cf)
    }
}

impl From<String> for Target {
    fn from(cf: String) -> Self {
        Self::new(cf)
    }
}
