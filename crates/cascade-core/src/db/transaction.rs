use crate::{
    db::{
        Database,
        report::{CascadeReport, CommitReport},
        store::PartitionStore,
        undo::UndoLog,
    },
    error::{InternalError, StreamLeak},
    obs::sink::{MetricsEvent, record},
    pipeline::PartitionId,
    tuple::Tuple,
};
use std::{
    collections::BTreeMap,
    sync::{MutexGuard, PoisonError, TryLockError, atomic::Ordering},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

///
/// Transaction
///
/// One atomic unit of cascade execution.
///
/// Partitions are acquired lazily. Acquiring in ascending partition order
/// blocks; acquiring below a partition already held only tries the lock and
/// aborts the transaction with a conflict when it is busy, so two
/// transactions can never wait on each other.
///
/// Every mutation is recorded in the undo log. Any cascade failure, an
/// explicit rollback, or dropping the transaction uncommitted replays the
/// log and leaves storage exactly as it was before `begin`.
///

pub struct Transaction<'db> {
    pub(super) db: &'db Database,
    id: u64,
    pub(super) held: BTreeMap<PartitionId, MutexGuard<'db, PartitionStore>>,
    pub(super) undo: UndoLog,
    state: TxnState,
    report: CascadeReport,
}

impl<'db> Transaction<'db> {
    pub(super) fn new(db: &'db Database) -> Self {
        let id = db.next_txn.fetch_add(1, Ordering::Relaxed);
        record(MetricsEvent::TxnBegin);
        tracing::trace!(txn = id, "transaction begun");

        Self {
            db,
            id,
            held: BTreeMap::new(),
            undo: UndoLog::default(),
            state: TxnState::Active,
            report: CascadeReport::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Partitions currently held, ascending.
    #[must_use]
    pub fn held_partitions(&self) -> Vec<PartitionId> {
        self.held.keys().copied().collect()
    }

    /// Insert rows into a stream relation and run the cascade they trigger.
    ///
    /// On error the whole transaction has already been rolled back and is
    /// no longer usable.
    pub fn insert(
        &mut self,
        relation: &str,
        rows: impl IntoIterator<Item = Tuple>,
    ) -> Result<CascadeReport, InternalError> {
        self.ensure_active()?;

        let rows = rows.into_iter().collect::<Vec<_>>();
        let mut report = CascadeReport::default();

        match self.cascade_entry(relation, rows, &mut report) {
            Ok(()) => {
                self.report.absorb(&report);
                Ok(report)
            }
            Err(err) => {
                self.abort(&err);
                Err(err)
            }
        }
    }

    /// Commit after checking that every stream in a held partition is empty.
    pub fn commit(mut self) -> Result<CommitReport, InternalError> {
        self.ensure_active()?;

        if let Some(leak) = self.find_stream_leak() {
            record(MetricsEvent::StreamLeak {
                relation: &leak.relation,
            });
            let err = InternalError::stream_leak(leak);
            self.abort(&err);
            return Err(err);
        }

        self.undo.discard();
        self.state = TxnState::Committed;
        record(MetricsEvent::TxnCommit);

        let partitions = self.held_partitions();
        tracing::debug!(txn = self.id, partitions = partitions.len(), "transaction committed");

        Ok(CommitReport {
            txn_id: self.id,
            partitions,
            cascade: std::mem::take(&mut self.report),
        })
    }

    /// Discard every effect of this transaction.
    pub fn rollback(mut self) -> Result<(), InternalError> {
        if self.state != TxnState::Active {
            return Ok(());
        }

        self.state = TxnState::Aborted;
        record(MetricsEvent::TxnAbort);
        tracing::debug!(txn = self.id, "transaction rolled back");

        self.undo.rollback(&mut self.held)
    }

    fn ensure_active(&self) -> Result<(), InternalError> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Committed => Err(InternalError::interface_unsupported(format!(
                "transaction {} has already committed",
                self.id
            ))),
            TxnState::Aborted => Err(InternalError::interface_unsupported(format!(
                "transaction {} was aborted",
                self.id
            ))),
        }
    }

    // Roll back in place after a failure; the transaction stays aborted.
    fn abort(&mut self, cause: &InternalError) {
        self.state = TxnState::Aborted;
        record(MetricsEvent::TxnAbort);
        tracing::warn!(txn = self.id, error = %cause.display_with_class(), "transaction aborted");

        if let Err(err) = self.undo.rollback(&mut self.held) {
            tracing::warn!(txn = self.id, error = %err, "rollback reported an error");
        }
    }

    /// Acquire `partition` for the rest of the transaction.
    pub(super) fn acquire(&mut self, partition: PartitionId) -> Result<(), InternalError> {
        if self.held.contains_key(&partition) {
            return Ok(());
        }

        let db = self.db;
        let mutex = db.partitions.get(partition.index()).ok_or_else(|| {
            InternalError::transaction_invariant(format!(
                "partition {partition} is out of range for {} partitions",
                db.partitions.len()
            ))
        })?;

        let out_of_order = self
            .held
            .last_key_value()
            .is_some_and(|(highest, _)| partition < *highest);

        let guard = if out_of_order {
            match mutex.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    record(MetricsEvent::PartitionConflict {
                        partition: partition.index(),
                    });
                    tracing::warn!(txn = self.id, %partition, "partition busy; aborting to avoid deadlock");

                    return Err(InternalError::transaction_conflict(format!(
                        "partition {partition} is held by another transaction"
                    )));
                }
            }
        } else {
            mutex.lock().unwrap_or_else(PoisonError::into_inner)
        };

        record(MetricsEvent::PartitionAcquired {
            partition: partition.index(),
        });
        self.held.insert(partition, guard);

        Ok(())
    }

    pub(super) fn store(&self, partition: PartitionId) -> Result<&PartitionStore, InternalError> {
        self.held.get(&partition).map(|guard| &**guard).ok_or_else(|| {
            InternalError::transaction_invariant(format!(
                "partition {partition} is not held by transaction {}",
                self.id
            ))
        })
    }

    pub(super) fn store_mut(
        &mut self,
        partition: PartitionId,
    ) -> Result<&mut PartitionStore, InternalError> {
        let id = self.id;
        self.held
            .get_mut(&partition)
            .map(|guard| &mut **guard)
            .ok_or_else(|| {
                InternalError::transaction_invariant(format!(
                    "partition {partition} is not held by transaction {id}"
                ))
            })
    }

    fn find_stream_leak(&self) -> Option<StreamLeak> {
        self.held.iter().find_map(|(partition, store)| {
            store
                .streams()
                .find(|(_, buffer)| !buffer.is_empty())
                .map(|(relation, buffer)| StreamLeak {
                    relation: relation.to_string(),
                    partition: partition.index(),
                    rows: buffer.len(),
                })
        })
    }

    /// Append a row without firing its bound stages.
    #[cfg(test)]
    pub(crate) fn inject_unconsumed(
        &mut self,
        relation: &str,
        row: Tuple,
    ) -> Result<(), InternalError> {
        let partition =
            self.db
                .pipeline
                .router()
                .partition_for(relation, &row, self.db.partition_count())?;
        self.acquire(partition)?;

        let id = self.store_mut(partition)?.stream_mut(relation)?.append(row);
        self.undo.push(crate::db::undo::UndoEntry::Appended {
            partition,
            relation: relation.to_string(),
            ids: vec![id],
        });

        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            self.state = TxnState::Aborted;
            record(MetricsEvent::TxnAbort);
            tracing::debug!(txn = self.id, "uncommitted transaction dropped; rolling back");

            if let Err(err) = self.undo.rollback(&mut self.held) {
                tracing::warn!(txn = self.id, error = %err, "rollback on drop reported an error");
            }
        }
    }
}
