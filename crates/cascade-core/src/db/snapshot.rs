use crate::tuple::{RowKey, Tuple};
use std::collections::BTreeMap;

///
/// StorageSnapshot
///
/// Point-in-time copy of every relation's rows, merged across partitions.
/// Two snapshots compare equal when every stream, table and reference
/// relation holds the same rows.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StorageSnapshot {
    pub streams: BTreeMap<String, Vec<Tuple>>,
    pub tables: BTreeMap<String, BTreeMap<RowKey, Tuple>>,
    pub reference: BTreeMap<String, BTreeMap<RowKey, Tuple>>,
}

impl StorageSnapshot {
    #[must_use]
    pub fn stream_rows(&self, relation: &str) -> usize {
        self.streams.get(relation).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn streams_empty(&self) -> bool {
        self.streams.values().all(Vec::is_empty)
    }

    #[must_use]
    pub fn table(&self, relation: &str) -> Option<&BTreeMap<RowKey, Tuple>> {
        self.tables.get(relation)
    }

    #[must_use]
    pub fn table_rows(&self, relation: &str) -> usize {
        self.table(relation).map_or(0, BTreeMap::len)
    }
}
