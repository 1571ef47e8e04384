use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::NodeError;
use crate::protocol::{CellView, ColumnPath, RowView};

/// (super column, column)
type CellName = (Option<Vec<u8>>, Vec<u8>);

#[derive(Debug, Clone)]
struct StoredCell {
    /// `None` marks a column tombstone.
    value: Option<Vec<u8>>,
    timestamp: i64,
}

#[derive(Debug, Default)]
struct StoredRow {
    deleted_at: Option<i64>,
    super_deleted_at: HashMap<Vec<u8>, i64>,
    cells: BTreeMap<CellName, StoredCell>,
}

impl StoredRow {
    fn shadowed(&self, name: &CellName, timestamp: i64) -> bool {
        if self.deleted_at.is_some_and(|t| timestamp <= t) {
            return true;
        }
        match &name.0 {
            Some(sc) => self
                .super_deleted_at
                .get(sc)
                .is_some_and(|t| timestamp <= *t),
            None => false,
        }
    }

    fn view(&self, key: &[u8]) -> RowView {
        let cells = self
            .cells
            .iter()
            .filter(|(name, cell)| !self.shadowed(name, cell.timestamp))
            .filter_map(|((super_column, name), cell)| {
                cell.value.as_ref().map(|value| CellView {
                    super_column: super_column.clone(),
                    name: name.clone(),
                    value: value.clone(),
                    timestamp: cell.timestamp,
                })
            })
            .collect();
        RowView {
            key: key.to_vec(),
            deleted_at: self.deleted_at,
            cells,
        }
    }
}

/// In-memory rows for a fixed set of column families.
///
/// Every cell resolves last-write-wins on its timestamp. A tombstone wins a
/// tie against a live value, so a delete and a write stamped with the same
/// timestamp leave the cell deleted.
pub struct MemoryStore {
    families: RwLock<HashMap<String, HashMap<Vec<u8>, StoredRow>>>,
}

impl MemoryStore {
    pub fn new<I, S>(column_families: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let families = column_families
            .into_iter()
            .map(|cf| (cf.into(), HashMap::new()))
            .collect();
        Self {
            families: RwLock::new(families),
        }
    }

    pub fn insert(
        &self,
        key: &[u8],
        path: &ColumnPath,
        value: Vec<u8>,
        timestamp: i64,
    ) -> Result<(), NodeError> {
        let column = path
            .column
            .clone()
            .ok_or_else(|| NodeError::InvalidPath("insert requires a column".into()))?;
        let mut families = self.families.write().unwrap_or_else(|e| e.into_inner());
        let rows = families
            .get_mut(&path.column_family)
            .ok_or_else(|| NodeError::UnknownColumnFamily(path.column_family.clone()))?;
        let row = rows.entry(key.to_vec()).or_default();
        let name = (path.super_column.clone(), column);
        let newer = row
            .cells
            .get(&name)
            .is_none_or(|existing| timestamp > existing.timestamp);
        if newer {
            row.cells.insert(
                name,
                StoredCell {
                    value: Some(value),
                    timestamp,
                },
            );
        }
        Ok(())
    }

    /// Records a tombstone at whatever level `path` names. Removing a row
    /// that holds no data still records the tombstone.
    pub fn remove(&self, key: &[u8], path: &ColumnPath, timestamp: i64) -> Result<(), NodeError> {
        let mut families = self.families.write().unwrap_or_else(|e| e.into_inner());
        let rows = families
            .get_mut(&path.column_family)
            .ok_or_else(|| NodeError::UnknownColumnFamily(path.column_family.clone()))?;
        let row = rows.entry(key.to_vec()).or_default();

        match (&path.super_column, &path.column) {
            (None, None) => {
                row.deleted_at = Some(row.deleted_at.map_or(timestamp, |t| t.max(timestamp)));
            }
            (Some(sc), None) => {
                let entry = row.super_deleted_at.entry(sc.clone()).or_insert(timestamp);
                *entry = (*entry).max(timestamp);
            }
            (super_column, Some(column)) => {
                let name = (super_column.clone(), column.clone());
                let newer = row
                    .cells
                    .get(&name)
                    .is_none_or(|existing| timestamp >= existing.timestamp);
                if newer {
                    row.cells.insert(
                        name,
                        StoredCell {
                            value: None,
                            timestamp,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    pub fn get_row(&self, column_family: &str, key: &[u8]) -> Result<Option<RowView>, NodeError> {
        let families = self.families.read().unwrap_or_else(|e| e.into_inner());
        let rows = families
            .get(column_family)
            .ok_or_else(|| NodeError::UnknownColumnFamily(column_family.to_string()))?;
        Ok(rows.get(key).map(|row| row.view(key)))
    }
}
