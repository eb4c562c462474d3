//! Undo log.
//!
//! Every storage mutation made by a transaction records the inverse
//! operation here. Rollback replays the log newest-first, which restores
//! the exact pre-transaction contents of every partition the transaction
//! touched.

use crate::{
    db::store::{PartitionStore, RowId},
    error::InternalError,
    pipeline::PartitionId,
    tuple::{RowKey, Tuple},
};
use std::{collections::BTreeMap, ops::DerefMut};

///
/// UndoEntry
///

#[derive(Debug)]
pub(crate) enum UndoEntry {
    /// Rows appended to a stream buffer.
    Appended {
        partition: PartitionId,
        relation: String,
        ids: Vec<RowId>,
    },
    /// Rows cleared from a stream buffer.
    Cleared {
        partition: PartitionId,
        relation: String,
        rows: Vec<(RowId, Tuple)>,
    },
    /// One table row written; `prior` is the row it replaced.
    TableWrite {
        partition: PartitionId,
        table: String,
        key: RowKey,
        prior: Option<Tuple>,
    },
}

///
/// UndoLog
///

#[derive(Debug, Default)]
pub(crate) struct UndoLog {
    entries: Vec<UndoEntry>,
}

impl UndoLog {
    pub(crate) fn push(&mut self, entry: UndoEntry) {
        self.entries.push(entry);
    }

    /// Forget all entries; the transaction's effects become permanent.
    pub(crate) fn discard(&mut self) {
        self.entries.clear();
    }

    /// Replay every entry in reverse against the held partitions.
    ///
    /// Replay continues past a failing entry so that as much state as
    /// possible is restored; the first failure is returned.
    pub(crate) fn rollback<S>(
        &mut self,
        held: &mut BTreeMap<PartitionId, S>,
    ) -> Result<(), InternalError>
    where
        S: DerefMut<Target = PartitionStore>,
    {
        let mut first_err = None;

        while let Some(entry) = self.entries.pop() {
            if let Err(err) = undo_one(entry, held)
                && first_err.is_none()
            {
                first_err = Some(err);
            }
        }

        first_err.map_or(Ok(()), Err)
    }
}

fn undo_one<S>(entry: UndoEntry, held: &mut BTreeMap<PartitionId, S>) -> Result<(), InternalError>
where
    S: DerefMut<Target = PartitionStore>,
{
    let partition = match &entry {
        UndoEntry::Appended { partition, .. }
        | UndoEntry::Cleared { partition, .. }
        | UndoEntry::TableWrite { partition, .. } => *partition,
    };
    let store = held.get_mut(&partition).ok_or_else(|| {
        InternalError::transaction_invariant(format!(
            "undo entry targets partition {partition}, which the transaction does not hold"
        ))
    })?;

    match entry {
        UndoEntry::Appended { relation, ids, .. } => {
            let buffer = store.stream_mut(&relation)?;
            for id in ids {
                buffer.remove(id);
            }
        }
        UndoEntry::Cleared { relation, rows, .. } => {
            let buffer = store.stream_mut(&relation)?;
            for (id, tuple) in rows {
                buffer.restore(id, tuple);
            }
        }
        UndoEntry::TableWrite {
            table, key, prior, ..
        } => {
            let rows = store.table_mut(&table)?;
            match prior {
                Some(prior) => {
                    rows.put(key, prior);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RelationSchema;

    fn held() -> BTreeMap<PartitionId, Box<PartitionStore>> {
        let relations = [
            RelationSchema::stream("s1"),
            RelationSchema::table("votes_by_phone_number"),
        ];
        let mut held = BTreeMap::new();
        held.insert(
            PartitionId::new(0),
            Box::new(PartitionStore::new(PartitionId::new(0), &relations)),
        );
        held
    }

    #[test]
    fn rollback_restores_table_rows_newest_first() {
        let mut held = held();
        let partition = PartitionId::new(0);
        let key = RowKey::of(5_551_234_i64);
        let mut log = UndoLog::default();

        let store = held.get_mut(&partition).expect("partition 0 is held");
        let table = store
            .table_mut("votes_by_phone_number")
            .expect("table storage exists");
        let first = Tuple::new().with("phone_number", 5_551_234_i64).with("num_votes", 1);
        let prior = table.put(key.clone(), first.clone());
        log.push(UndoEntry::TableWrite {
            partition,
            table: "votes_by_phone_number".to_string(),
            key: key.clone(),
            prior,
        });
        let prior = table.put(key.clone(), first.with("num_votes", 2));
        log.push(UndoEntry::TableWrite {
            partition,
            table: "votes_by_phone_number".to_string(),
            key: key.clone(),
            prior,
        });

        log.rollback(&mut held).expect("rollback should succeed");

        let store = held.get(&partition).expect("partition 0 is held");
        let table = store
            .table("votes_by_phone_number")
            .expect("table storage exists");
        assert!(
            table.rows().is_empty(),
            "table should be back to its empty start state"
        );
    }

    #[test]
    fn rollback_restores_cleared_stream_rows_and_drops_appended_ones() {
        let mut held = held();
        let partition = PartitionId::new(0);
        let mut log = UndoLog::default();

        let buffer = held
            .get_mut(&partition)
            .expect("partition 0 is held")
            .stream_mut("s1")
            .expect("stream storage exists");
        let id = buffer.append(Tuple::new().with("phone_number", 1));
        log.push(UndoEntry::Appended {
            partition,
            relation: "s1".to_string(),
            ids: vec![id],
        });
        let row = buffer.remove(id).expect("appended row exists");
        log.push(UndoEntry::Cleared {
            partition,
            relation: "s1".to_string(),
            rows: vec![(id, row)],
        });

        log.rollback(&mut held).expect("rollback should succeed");

        let store = held.get(&partition).expect("partition 0 is held");
        assert!(store.stream("s1").expect("stream storage exists").is_empty());
    }

    #[test]
    fn rollback_reports_unheld_partition() {
        let mut held = held();
        let mut log = UndoLog::default();
        log.push(UndoEntry::Appended {
            partition: PartitionId::new(3),
            relation: "s1".to_string(),
            ids: Vec::new(),
        });

        let err = log
            .rollback(&mut held)
            .expect_err("unheld partition should be reported");

        assert_eq!(err.class, crate::error::ErrorClass::InvariantViolation);
    }
}
