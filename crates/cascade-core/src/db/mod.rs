//! Partitioned storage and transactional cascade execution.
//!
//! A `Database` owns one `PartitionStore` per partition behind a mutex and a
//! replicated `ReferenceStore`. All writes to streams and tables happen
//! inside a `Transaction`, which holds the partitions it touched until it
//! commits or rolls back.

mod executor;
mod report;
mod snapshot;
mod store;
mod transaction;
mod undo;


pub use report::{CascadeReport, CommitReport, StageFiring};
pub use snapshot::StorageSnapshot;
pub use store::{RowId, StoreError};
pub use transaction::Transaction;

use crate::{
    error::{ErrorOrigin, InternalError},
    model::{RelationKind, RelationSchema},
    pipeline::{PartitionId, Pipeline, partition_of},
    tuple::{RowKey, Tuple},
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, atomic::AtomicU64},
};
use store::{PartitionStore, ReferenceStore};

///
/// Database
///

#[derive(Debug)]
pub struct Database {
    pipeline: Arc<Pipeline>,
    partitions: Vec<Mutex<PartitionStore>>,
    reference: RwLock<ReferenceStore>,
    next_txn: AtomicU64,
}

impl Database {
    /// Create empty storage for every relation of `pipeline`.
    pub fn open(pipeline: impl Into<Arc<Pipeline>>, partitions: usize) -> Result<Self, InternalError> {
        if partitions == 0 {
            return Err(InternalError::interface_unsupported(
                "a database needs at least one partition",
            ));
        }

        let pipeline = pipeline.into();
        let stores = (0..partitions)
            .map(|index| {
                Mutex::new(PartitionStore::new(
                    PartitionId::new(index),
                    pipeline.relations(),
                ))
            })
            .collect();
        let reference = RwLock::new(ReferenceStore::new(pipeline.relations()));

        tracing::info!(partitions, "database opened");

        Ok(Self {
            pipeline,
            partitions: stores,
            reference,
            next_txn: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Begin a transaction. Partitions are acquired lazily as the cascade
    /// touches them.
    #[must_use]
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Run `f` in a transaction; commit on `Ok`, roll back on `Err`.
    pub fn execute<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T, InternalError>,
    ) -> Result<T, InternalError> {
        let mut txn = self.begin();
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback after failed closure reported an error");
                }
                Err(err)
            }
        }
    }

    /// Bulk-load rows into a reference relation outside any cascade.
    /// Rows replace existing rows with the same key.
    pub fn load_reference(
        &self,
        relation: &str,
        rows: impl IntoIterator<Item = Tuple>,
    ) -> Result<usize, InternalError> {
        let schema = self.relation_of_kind(relation, &[RelationKind::Reference])?;

        let mut staged = Vec::new();
        for row in rows {
            schema.check_tuple(&row)?;
            let key = row.key(&schema.primary_key).ok_or_else(|| StoreError::MissingKey {
                relation: relation.to_string(),
            })?;
            staged.push((key, row));
        }

        let mut reference = self
            .reference
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let table = reference.table_mut(relation).ok_or_else(|| {
            InternalError::store_invariant(format!("no reference storage for '{relation}'"))
        })?;

        let loaded = staged.len();
        for (key, row) in staged {
            table.put(key, row);
        }

        tracing::info!(relation, rows = loaded, "reference rows loaded");

        Ok(loaded)
    }

    /// Keyed read of a table or reference relation.
    ///
    /// Must not be called while this thread holds an open transaction.
    pub fn read_table(&self, relation: &str, key: &RowKey) -> Result<Option<Tuple>, InternalError> {
        let schema =
            self.relation_of_kind(relation, &[RelationKind::Table, RelationKind::Reference])?;

        if schema.kind == RelationKind::Reference {
            return Ok(self.read_reference().get(relation, key).cloned());
        }

        // Route by key when the partition column is part of it.
        let routed = schema.partition_key.as_ref().and_then(|column| {
            schema
                .primary_key
                .iter()
                .position(|pk| pk == column)
                .and_then(|index| key.get(index))
                .map(|value| partition_of(value, self.partition_count()))
        });

        let candidates = match routed {
            Some(partition) => vec![partition],
            None => (0..self.partition_count()).map(PartitionId::new).collect(),
        };

        for partition in candidates {
            let store = self.lock_partition(partition);
            if let Some(row) = store.table(relation)?.get(key) {
                return Ok(Some(row.clone()));
            }
        }

        Ok(None)
    }

    /// All rows of a table or reference relation, in primary-key order.
    pub fn scan_table(&self, relation: &str) -> Result<Vec<Tuple>, InternalError> {
        let schema =
            self.relation_of_kind(relation, &[RelationKind::Table, RelationKind::Reference])?;

        let mut rows = BTreeMap::new();
        if schema.kind == RelationKind::Reference {
            if let Some((_, table)) = self
                .read_reference()
                .tables()
                .find(|(name, _)| *name == relation)
            {
                rows.extend(table.rows().clone());
            }
        } else {
            for index in 0..self.partition_count() {
                let store = self.lock_partition(PartitionId::new(index));
                rows.extend(store.table(relation)?.rows().clone());
            }
        }

        Ok(rows.into_values().collect())
    }

    /// Rows currently buffered in a stream relation across all partitions.
    pub fn stream_len(&self, relation: &str) -> Result<usize, InternalError> {
        self.relation_of_kind(relation, &[RelationKind::Stream])?;

        let mut total = 0;
        for index in 0..self.partition_count() {
            total += self
                .lock_partition(PartitionId::new(index))
                .stream(relation)?
                .len();
        }

        Ok(total)
    }

    /// Copy every relation's rows. Partitions are locked in ascending order.
    pub fn snapshot(&self) -> Result<StorageSnapshot, InternalError> {
        let mut snapshot = StorageSnapshot::default();

        for index in 0..self.partition_count() {
            let store = self.lock_partition(PartitionId::new(index));
            for (name, buffer) in store.streams() {
                snapshot
                    .streams
                    .entry(name.to_string())
                    .or_default()
                    .extend(buffer.rows().cloned());
            }
            for (name, table) in store.tables() {
                snapshot
                    .tables
                    .entry(name.to_string())
                    .or_default()
                    .extend(table.rows().clone());
            }
        }

        for (name, table) in self.read_reference().tables() {
            snapshot
                .reference
                .insert(name.to_string(), table.rows().clone());
        }

        Ok(snapshot)
    }

    fn relation_of_kind(
        &self,
        relation: &str,
        kinds: &[RelationKind],
    ) -> Result<&RelationSchema, InternalError> {
        let schema = self.pipeline.try_relation(relation, ErrorOrigin::Interface)?;
        if !kinds.contains(&schema.kind) {
            return Err(InternalError::interface_unsupported(format!(
                "'{relation}' is a {} relation",
                schema.kind
            )));
        }

        Ok(schema)
    }

    // A poisoned partition was already restored by the panicking
    // transaction's drop-time rollback.
    fn lock_partition(&self, partition: PartitionId) -> MutexGuard<'_, PartitionStore> {
        self.partitions[partition.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_reference(&self) -> RwLockReadGuard<'_, ReferenceStore> {
        self.reference.read().unwrap_or_else(PoisonError::into_inner)
    }
}
