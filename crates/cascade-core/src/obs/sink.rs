//! Metrics sink boundary.
//!
//! Cascade execution MUST NOT depend on obs::metrics directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.
//!
//! This module is the only allowed bridge between execution logic
//! and the metrics state.
use crate::obs::metrics;
use std::cell::RefCell;

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<*const dyn MetricsSink>> = const { RefCell::new(None) };
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug)]
pub enum MetricsEvent<'a> {
    TxnBegin,
    TxnCommit,
    TxnAbort,
    PartitionAcquired {
        partition: usize,
    },
    PartitionConflict {
        partition: usize,
    },
    StageFired {
        stage: &'a str,
        rows_in: u64,
        rows_out: u64,
    },
    Rejection {
        stage: &'a str,
    },
    RowsAppended {
        relation: &'a str,
        rows: u64,
    },
    RowsCleared {
        relation: &'a str,
        rows: u64,
    },
    RowsMerged {
        relation: &'a str,
        rows: u64,
    },
    RowsShuffled {
        rows: u64,
    },
    StreamLeak {
        relation: &'a str,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent<'_>);
}

/// GlobalMetricsSink
/// Default sink that writes into the thread's metrics state.
/// Acts as the concrete sink when no scoped override is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent<'_>) {
        match event {
            MetricsEvent::TxnBegin => {
                metrics::with_state_mut(|m| m.ops.txn_begun = m.ops.txn_begun.saturating_add(1));
            }

            MetricsEvent::TxnCommit => {
                metrics::with_state_mut(|m| {
                    m.ops.txn_committed = m.ops.txn_committed.saturating_add(1);
                });
            }

            MetricsEvent::TxnAbort => {
                metrics::with_state_mut(|m| {
                    m.ops.txn_aborted = m.ops.txn_aborted.saturating_add(1);
                });
            }

            MetricsEvent::PartitionAcquired { .. } => {
                metrics::with_state_mut(|m| {
                    m.ops.partitions_acquired = m.ops.partitions_acquired.saturating_add(1);
                });
            }

            MetricsEvent::PartitionConflict { .. } => {
                metrics::with_state_mut(|m| {
                    m.ops.partition_conflicts = m.ops.partition_conflicts.saturating_add(1);
                });
            }

            MetricsEvent::StageFired {
                stage,
                rows_in,
                rows_out,
            } => {
                metrics::with_state_mut(|m| {
                    m.ops.stage_firings = m.ops.stage_firings.saturating_add(1);
                    let entry = m.stages.entry(stage.to_string()).or_default();
                    entry.firings = entry.firings.saturating_add(1);
                    entry.rows_in = entry.rows_in.saturating_add(rows_in);
                    entry.rows_out = entry.rows_out.saturating_add(rows_out);
                });
            }

            MetricsEvent::Rejection { stage } => {
                metrics::with_state_mut(|m| {
                    m.ops.rejections = m.ops.rejections.saturating_add(1);
                    let entry = m.stages.entry(stage.to_string()).or_default();
                    entry.rejections = entry.rejections.saturating_add(1);
                });
            }

            MetricsEvent::RowsAppended { relation, rows } => {
                metrics::with_state_mut(|m| {
                    m.ops.rows_appended = m.ops.rows_appended.saturating_add(rows);
                    let entry = m.relations.entry(relation.to_string()).or_default();
                    entry.rows_appended = entry.rows_appended.saturating_add(rows);
                });
            }

            MetricsEvent::RowsCleared { relation, rows } => {
                metrics::with_state_mut(|m| {
                    m.ops.rows_cleared = m.ops.rows_cleared.saturating_add(rows);
                    let entry = m.relations.entry(relation.to_string()).or_default();
                    entry.rows_cleared = entry.rows_cleared.saturating_add(rows);
                });
            }

            MetricsEvent::RowsMerged { relation, rows } => {
                metrics::with_state_mut(|m| {
                    m.ops.rows_merged = m.ops.rows_merged.saturating_add(rows);
                    let entry = m.relations.entry(relation.to_string()).or_default();
                    entry.rows_merged = entry.rows_merged.saturating_add(rows);
                });
            }

            MetricsEvent::RowsShuffled { rows } => {
                metrics::with_state_mut(|m| {
                    m.ops.rows_shuffled = m.ops.rows_shuffled.saturating_add(rows);
                });
            }

            MetricsEvent::StreamLeak { relation } => {
                metrics::with_state_mut(|m| {
                    m.ops.stream_leaks = m.ops.stream_leaks.saturating_add(1);
                    let entry = m.relations.entry(relation.to_string()).or_default();
                    entry.stream_leaks = entry.stream_leaks.saturating_add(1);
                });
            }
        }
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

pub(crate) fn record(event: MetricsEvent<'_>) {
    let override_ptr = SINK_OVERRIDE.with(|cell| *cell.borrow());
    if let Some(ptr) = override_ptr {
        // SAFETY:
        // Preconditions:
        // - `ptr` was produced from a valid `&dyn MetricsSink` in `with_metrics_sink`.
        // - `with_metrics_sink` always restores the previous pointer before returning,
        //   including unwind paths via `Guard::drop`.
        // - `record` is synchronous and never stores `ptr` beyond this call.
        //
        // Aliasing:
        // - Only a shared reference is materialized, matching the shared borrow
        //   used to install the override.
        //
        // What would break this:
        // - If `with_metrics_sink` failed to restore on all exits (normal + panic),
        //   `ptr` could outlive the borrowed sink and become dangling.
        unsafe { (&*ptr).record(event) };
    } else {
        GLOBAL_METRICS_SINK.record(event);
    }
}

/// Snapshot the current thread's metrics state.
#[must_use]
pub fn metrics_report() -> metrics::EventReport {
    metrics::report()
}

/// Reset all metrics state on the current thread.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override on the current thread.
pub fn with_metrics_sink<T>(sink: &dyn MetricsSink, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<*const dyn MetricsSink>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = self.0;
            });
        }
    }

    // SAFETY:
    // Preconditions:
    // - `sink_ptr` is installed only for this dynamic scope.
    // - `Guard` always restores the previous slot on all exits, including panic.
    // - `record` only dereferences synchronously and never persists `sink_ptr`.
    //
    // What would break this:
    // - Any deferred use of `sink_ptr` beyond this scope.
    // - Any path that bypasses Guard restoration.
    let sink_ptr = unsafe { std::mem::transmute::<&dyn MetricsSink, *const dyn MetricsSink>(sink) };
    let prev = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink_ptr));
    let _guard = Guard(prev);

    f()
}
