use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::{RelationKind, RelationSchema},
    pipeline::PartitionId,
    tuple::{RowKey, Tuple},
};
use derive_more::Display;
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

///
/// StoreError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum StoreError {
    #[error("duplicate key {key} in '{relation}'")]
    DuplicateKey { relation: String, key: String },

    #[error("row for '{relation}' is missing a primary key column")]
    MissingKey { relation: String },

    #[error("additive merge overflowed '{relation}.{column}'")]
    Overflow { relation: String, column: String },

    #[error("additive merge into '{relation}' carries no int value for '{column}'")]
    MissingContribution { relation: String, column: String },

    #[error("partition {partition} has no storage for '{relation}'")]
    MissingStorage { relation: String, partition: usize },
}

impl StoreError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateKey { .. } => ErrorClass::Conflict,
            Self::MissingKey { .. }
            | Self::Overflow { .. }
            | Self::MissingContribution { .. } => ErrorClass::Transform,
            Self::MissingStorage { .. } => ErrorClass::InvariantViolation,
        }
    }
}

impl From<StoreError> for InternalError {
    fn from(err: StoreError) -> Self {
        Self::new(err.class(), ErrorOrigin::Store, err.to_string())
    }
}

///
/// RowId
///
/// Buffer-local identity of one appended stream row.
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("#{_0}")]
pub struct RowId(u64);

///
/// StreamBuffer
///

#[derive(Debug, Default)]
pub(crate) struct StreamBuffer {
    next_id: u64,
    rows: BTreeMap<RowId, Tuple>,
}

impl StreamBuffer {
    pub(crate) fn append(&mut self, tuple: Tuple) -> RowId {
        let id = RowId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.rows.insert(id, tuple);
        id
    }

    pub(crate) fn get(&self, id: RowId) -> Option<&Tuple> {
        self.rows.get(&id)
    }

    pub(crate) fn remove(&mut self, id: RowId) -> Option<Tuple> {
        self.rows.remove(&id)
    }

    // Undo of a clear; ids are never reused, so restoring cannot collide.
    pub(crate) fn restore(&mut self, id: RowId, tuple: Tuple) {
        self.rows.insert(id, tuple);
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn rows(&self) -> impl Iterator<Item = &Tuple> {
        self.rows.values()
    }
}

///
/// TableStore
///

#[derive(Debug, Default)]
pub(crate) struct TableStore {
    rows: BTreeMap<RowKey, Tuple>,
}

impl TableStore {
    pub(crate) fn get(&self, key: &RowKey) -> Option<&Tuple> {
        self.rows.get(key)
    }

    /// Write a row, returning the row it replaced.
    pub(crate) fn put(&mut self, key: RowKey, tuple: Tuple) -> Option<Tuple> {
        self.rows.insert(key, tuple)
    }

    pub(crate) fn remove(&mut self, key: &RowKey) -> Option<Tuple> {
        self.rows.remove(key)
    }

    pub(crate) const fn rows(&self) -> &BTreeMap<RowKey, Tuple> {
        &self.rows
    }
}

///
/// PartitionStore
///
/// Stream buffers and table rows owned by one partition.
///

#[derive(Debug)]
pub(crate) struct PartitionStore {
    id: PartitionId,
    streams: BTreeMap<String, StreamBuffer>,
    tables: BTreeMap<String, TableStore>,
}

impl PartitionStore {
    pub(crate) fn new<'a>(
        id: PartitionId,
        relations: impl IntoIterator<Item = &'a RelationSchema>,
    ) -> Self {
        let mut streams = BTreeMap::new();
        let mut tables = BTreeMap::new();

        for relation in relations {
            match relation.kind {
                RelationKind::Stream => {
                    streams.insert(relation.name.clone(), StreamBuffer::default());
                }
                RelationKind::Table => {
                    tables.insert(relation.name.clone(), TableStore::default());
                }
                RelationKind::Reference => {}
            }
        }

        Self {
            id,
            streams,
            tables,
        }
    }

    pub(crate) fn stream(&self, relation: &str) -> Result<&StreamBuffer, StoreError> {
        self.streams
            .get(relation)
            .ok_or_else(|| missing_storage(relation, self.id))
    }

    pub(crate) fn stream_mut(&mut self, relation: &str) -> Result<&mut StreamBuffer, StoreError> {
        let partition = self.id;
        self.streams
            .get_mut(relation)
            .ok_or_else(|| missing_storage(relation, partition))
    }

    pub(crate) fn table(&self, relation: &str) -> Result<&TableStore, StoreError> {
        self.tables
            .get(relation)
            .ok_or_else(|| missing_storage(relation, self.id))
    }

    pub(crate) fn table_mut(&mut self, relation: &str) -> Result<&mut TableStore, StoreError> {
        let partition = self.id;
        self.tables
            .get_mut(relation)
            .ok_or_else(|| missing_storage(relation, partition))
    }

    pub(crate) fn streams(&self) -> impl Iterator<Item = (&str, &StreamBuffer)> {
        self.streams
            .iter()
            .map(|(name, buffer)| (name.as_str(), buffer))
    }

    pub(crate) fn tables(&self) -> impl Iterator<Item = (&str, &TableStore)> {
        self.tables
            .iter()
            .map(|(name, table)| (name.as_str(), table))
    }
}

fn missing_storage(relation: &str, partition: PartitionId) -> StoreError {
    StoreError::MissingStorage {
        relation: relation.to_string(),
        partition: partition.index(),
    }
}

///
/// ReferenceStore
///
/// Replicated lookup rows, readable from every partition.
///

#[derive(Debug, Default)]
pub(crate) struct ReferenceStore {
    tables: BTreeMap<String, TableStore>,
}

impl ReferenceStore {
    pub(crate) fn new<'a>(relations: impl IntoIterator<Item = &'a RelationSchema>) -> Self {
        let tables = relations
            .into_iter()
            .filter(|relation| relation.kind == RelationKind::Reference)
            .map(|relation| (relation.name.clone(), TableStore::default()))
            .collect();

        Self { tables }
    }

    pub(crate) fn get(&self, relation: &str, key: &RowKey) -> Option<&Tuple> {
        self.tables.get(relation).and_then(|table| table.get(key))
    }

    pub(crate) fn table_mut(&mut self, relation: &str) -> Option<&mut TableStore> {
        self.tables.get_mut(relation)
    }

    pub(crate) fn tables(&self) -> impl Iterator<Item = (&str, &TableStore)> {
        self.tables
            .iter()
            .map(|(name, table)| (name.as_str(), table))
    }
}
