//! Trigger-stage executor.
//!
//! Appending rows to a stream fires every stage bound to it, in deployment
//! order, on exactly the rows that append produced. Each firing:
//! 1. snapshots the appended rows,
//! 2. runs the transform with lookups into the firing partition,
//! 3. merges table outputs and appends stream outputs (which cascade
//!    depth-first before the next bound stage runs),
//!
//! and once every bound stage has fired the snapshotted rows are cleared.
//! Clearing is part of the append path itself; it cannot be skipped by a
//! transform and is verified again at commit.

use crate::{
    db::{
        report::{CascadeReport, StageFiring},
        store::{PartitionStore, ReferenceStore, RowId, StoreError},
        transaction::Transaction,
        undo::UndoEntry,
    },
    error::{ErrorOrigin, InternalError},
    model::{MergePolicy, RelationKind, RelationSchema},
    obs::sink::{MetricsEvent, record},
    pipeline::{EdgeRouting, OutputEdge, PartitionError, PartitionId, Pipeline, TriggerStage},
    transform::{Emit, LookupSource, Rejection, TransformContext, TransformError},
    tuple::{RowKey, Tuple},
};
use std::collections::BTreeMap;

///
/// Placement
///
/// Where rows written by one edge may land.
///

#[derive(Clone, Copy, Debug)]
enum Placement<'a> {
    /// Route every row by its partition key (entry inserts, shuffle edges).
    Routed,
    /// Rows must land in the partition the stage fired in.
    Pinned {
        stage: &'a str,
        partition: PartitionId,
    },
}

///
/// StageView
///
/// Read-only storage view for one firing.
///

struct StageView<'a> {
    pipeline: &'a Pipeline,
    partition: &'a PartitionStore,
    reference: &'a ReferenceStore,
}

impl LookupSource for StageView<'_> {
    fn lookup(&self, relation: &str, key: &RowKey) -> Option<Tuple> {
        match self.pipeline.relation(relation)?.kind {
            RelationKind::Reference => self.reference.get(relation, key).cloned(),
            RelationKind::Table => self.partition.table(relation).ok()?.get(key).cloned(),
            RelationKind::Stream => None,
        }
    }
}

impl<'db> Transaction<'db> {
    /// Entry point for caller inserts.
    pub(super) fn cascade_entry(
        &mut self,
        relation: &str,
        rows: Vec<Tuple>,
        report: &mut CascadeReport,
    ) -> Result<(), InternalError> {
        let db = self.db;
        let pipeline: &'db Pipeline = &db.pipeline;
        let schema = pipeline.try_relation(relation, ErrorOrigin::Interface)?;

        if !schema.kind.is_stream() {
            return Err(InternalError::interface_unsupported(format!(
                "inserts must target a stream relation; '{relation}' is a {} relation",
                schema.kind
            )));
        }

        self.append_and_fire(schema, rows, Placement::Routed, 0, report)
    }

    fn append_and_fire(
        &mut self,
        schema: &'db RelationSchema,
        rows: Vec<Tuple>,
        placement: Placement<'_>,
        depth: usize,
        report: &mut CascadeReport,
    ) -> Result<(), InternalError> {
        let db = self.db;
        let pipeline: &'db Pipeline = &db.pipeline;

        if depth > pipeline.stages().len() {
            return Err(InternalError::executor_invariant(format!(
                "cascade into '{}' exceeded depth {depth}",
                schema.name
            )));
        }

        for (partition, rows) in self.route(schema, rows, placement)? {
            self.acquire(partition)?;
            let ids = self.append_rows(partition, &schema.name, rows, report)?;

            for stage in pipeline.stages().bound(&schema.name) {
                self.fire(stage, partition, &ids, depth, report)?;
            }

            self.clear_rows(partition, &schema.name, &ids, report)?;
        }

        Ok(())
    }

    /// Validate rows against `schema` and group them by owning partition.
    fn route(
        &self,
        schema: &RelationSchema,
        rows: Vec<Tuple>,
        placement: Placement<'_>,
    ) -> Result<BTreeMap<PartitionId, Vec<Tuple>>, InternalError> {
        let router = self.db.pipeline.router();
        let partitions = self.db.partition_count();
        let mut groups: BTreeMap<PartitionId, Vec<Tuple>> = BTreeMap::new();

        for row in rows {
            schema.check_tuple(&row)?;
            let partition = router.partition_for(&schema.name, &row, partitions)?;

            if let Placement::Pinned {
                stage,
                partition: firing,
            } = placement
                && partition != firing
            {
                return Err(PartitionError::Escaped {
                    stage: stage.to_string(),
                    relation: schema.name.clone(),
                    expected: firing.index(),
                    found: partition.index(),
                }
                .into());
            }

            groups.entry(partition).or_default().push(row);
        }

        Ok(groups)
    }

    fn append_rows(
        &mut self,
        partition: PartitionId,
        relation: &str,
        rows: Vec<Tuple>,
        report: &mut CascadeReport,
    ) -> Result<Vec<RowId>, InternalError> {
        let buffer = self.store_mut(partition)?.stream_mut(relation)?;
        let ids = rows
            .into_iter()
            .map(|row| buffer.append(row))
            .collect::<Vec<_>>();

        self.undo.push(UndoEntry::Appended {
            partition,
            relation: relation.to_string(),
            ids: ids.clone(),
        });
        report.rows_appended += ids.len();
        record(MetricsEvent::RowsAppended {
            relation,
            rows: ids.len() as u64,
        });

        Ok(ids)
    }

    fn fire(
        &mut self,
        stage: &'db TriggerStage,
        partition: PartitionId,
        ids: &[RowId],
        depth: usize,
        report: &mut CascadeReport,
    ) -> Result<(), InternalError> {
        let db = self.db;
        let pipeline: &'db Pipeline = &db.pipeline;

        let (rows_in, output) = {
            let store = self.store(partition)?;
            let buffer = store.stream(&stage.input)?;
            let input = ids
                .iter()
                .filter_map(|id| buffer.get(*id).cloned())
                .collect::<Vec<_>>();

            if input.len() != ids.len() {
                return Err(InternalError::executor_invariant(format!(
                    "stage '{}' lost {} input row(s) before firing",
                    stage.name,
                    ids.len() - input.len()
                )));
            }

            let reference = db.read_reference();
            let view = StageView {
                pipeline,
                partition: store,
                reference: &reference,
            };
            let ctx = TransformContext::new(&stage.name, partition, &stage.lookups, &view);

            let output = stage.transform().apply(&input, &ctx).inspect_err(|err| {
                tracing::debug!(stage = %stage.name, %partition, error = %err, "transform failed");
            })?;

            (input.len(), output)
        };

        let (emitted, rejections) = output.into_parts();

        record(MetricsEvent::StageFired {
            stage: &stage.name,
            rows_in: rows_in as u64,
            rows_out: emitted.len() as u64,
        });
        tracing::debug!(
            stage = %stage.name,
            %partition,
            rows_in,
            rows_out = emitted.len(),
            rejected = rejections.len(),
            depth,
            "stage fired"
        );
        report.firings.push(StageFiring {
            stage: stage.name.clone(),
            partition,
            rows_in,
            rows_out: emitted.len(),
            rejected: rejections.len(),
        });

        for reason in rejections {
            record(MetricsEvent::Rejection { stage: &stage.name });
            tracing::debug!(stage = %stage.name, %reason, "row rejected");
            report.rejections.push(Rejection {
                stage: stage.name.clone(),
                reason,
            });
        }

        for (edge, rows) in batch_by_edge(stage, emitted)? {
            let target = pipeline.try_relation(&edge.target, ErrorOrigin::Executor)?;
            let placement = match edge.routing {
                EdgeRouting::Local => Placement::Pinned {
                    stage: &stage.name,
                    partition,
                },
                EdgeRouting::Shuffle => {
                    record(MetricsEvent::RowsShuffled {
                        rows: rows.len() as u64,
                    });
                    Placement::Routed
                }
            };

            if edge.target_kind.is_stream() {
                self.append_and_fire(target, rows, placement, depth + 1, report)?;
            } else {
                self.merge_rows(target, &edge.merge, rows, placement, report)?;
            }
        }

        Ok(())
    }

    fn merge_rows(
        &mut self,
        schema: &RelationSchema,
        merge: &MergePolicy,
        rows: Vec<Tuple>,
        placement: Placement<'_>,
        report: &mut CascadeReport,
    ) -> Result<(), InternalError> {
        for (partition, rows) in self.route(schema, rows, placement)? {
            self.acquire(partition)?;
            let merged = rows.len();

            for row in rows {
                let key = row
                    .key(&schema.primary_key)
                    .ok_or_else(|| StoreError::MissingKey {
                        relation: schema.name.clone(),
                    })?;

                let table = self.store_mut(partition)?.table_mut(&schema.name)?;
                let current = table.get(&key);
                let next = match merge {
                    MergePolicy::Insert => {
                        if current.is_some() {
                            return Err(StoreError::DuplicateKey {
                                relation: schema.name.clone(),
                                key: key.to_string(),
                            }
                            .into());
                        }
                        row
                    }
                    MergePolicy::Replace => row,
                    MergePolicy::Additive { column } => additive(&schema.name, column, current, row)?,
                    MergePolicy::Append => {
                        return Err(InternalError::executor_invariant(format!(
                            "append policy resolved onto table '{}'",
                            schema.name
                        )));
                    }
                };

                let prior = table.put(key.clone(), next);
                self.undo.push(UndoEntry::TableWrite {
                    partition,
                    table: schema.name.clone(),
                    key,
                    prior,
                });
            }

            report.rows_merged += merged;
            record(MetricsEvent::RowsMerged {
                relation: &schema.name,
                rows: merged as u64,
            });
            tracing::debug!(table = %schema.name, %partition, %merge, rows = merged, "rows merged");
        }

        Ok(())
    }

    fn clear_rows(
        &mut self,
        partition: PartitionId,
        relation: &str,
        ids: &[RowId],
        report: &mut CascadeReport,
    ) -> Result<(), InternalError> {
        let buffer = self.store_mut(partition)?.stream_mut(relation)?;
        let cleared = ids
            .iter()
            .filter_map(|id| buffer.remove(*id).map(|row| (*id, row)))
            .collect::<Vec<_>>();
        let count = cleared.len();

        self.undo.push(UndoEntry::Cleared {
            partition,
            relation: relation.to_string(),
            rows: cleared,
        });

        if count != ids.len() {
            return Err(InternalError::executor_invariant(format!(
                "'{relation}' cleared {count} of {} consumed row(s)",
                ids.len()
            )));
        }

        report.rows_cleared += count;
        record(MetricsEvent::RowsCleared {
            relation,
            rows: count as u64,
        });

        Ok(())
    }
}

/// Group emitted rows by declared output edge, keeping emission order.
/// Table edges come first so stages fired by stream edges observe them.
fn batch_by_edge(
    stage: &TriggerStage,
    emitted: Vec<Emit>,
) -> Result<Vec<(&OutputEdge, Vec<Tuple>)>, TransformError> {
    let mut batches = stage
        .outputs
        .iter()
        .map(|edge| (edge, Vec::new()))
        .collect::<Vec<_>>();

    for Emit { target, tuple } in emitted {
        let Some((_, rows)) = batches.iter_mut().find(|(edge, _)| edge.target == target) else {
            return Err(TransformError::UndeclaredTarget {
                stage: stage.name.clone(),
                target,
            });
        };
        rows.push(tuple);
    }

    batches.retain(|(_, rows)| !rows.is_empty());
    batches.sort_by_key(|(edge, _)| edge.target_kind.is_stream());

    Ok(batches)
}

/// `column = column + contribution`; an absent row is inserted as emitted.
fn additive(
    relation: &str,
    column: &str,
    current: Option<&Tuple>,
    row: Tuple,
) -> Result<Tuple, StoreError> {
    let contribution = row
        .int(column)
        .ok_or_else(|| StoreError::MissingContribution {
            relation: relation.to_string(),
            column: column.to_string(),
        })?;

    let Some(current) = current else {
        return Ok(row);
    };

    let recorded = current
        .int(column)
        .ok_or_else(|| StoreError::MissingContribution {
            relation: relation.to_string(),
            column: column.to_string(),
        })?;
    let total = recorded
        .checked_add(contribution)
        .ok_or_else(|| StoreError::Overflow {
            relation: relation.to_string(),
            column: column.to_string(),
        })?;

    Ok(current.clone().with(column, total))
}
