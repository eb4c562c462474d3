use serde::{Deserialize, Serialize};
use std::{cell::RefCell, cmp::Ordering, collections::BTreeMap};

///
/// EventState
/// Ephemeral, in-memory counters for cascade execution.
/// Counters are per thread: a transaction runs on the thread that began it.
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub stages: BTreeMap<String, StageCounters>,
    pub relations: BTreeMap<String, RelationCounters>,
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventOps {
    // Transaction lifecycle
    pub txn_begun: u64,
    pub txn_committed: u64,
    pub txn_aborted: u64,
    pub partition_conflicts: u64,
    pub partitions_acquired: u64,

    // Cascade
    pub stage_firings: u64,
    pub rejections: u64,

    // Rows touched
    pub rows_appended: u64,
    pub rows_cleared: u64,
    pub rows_merged: u64,
    pub rows_shuffled: u64,

    // Invariants
    pub stream_leaks: u64,
}

///
/// StageCounters
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StageCounters {
    pub firings: u64,
    pub rows_in: u64,
    pub rows_out: u64,
    pub rejections: u64,
}

///
/// RelationCounters
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RelationCounters {
    pub rows_appended: u64,
    pub rows_cleared: u64,
    pub rows_merged: u64,
    pub stream_leaks: u64,
}

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState::default());
}

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&m.borrow()))
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&mut m.borrow_mut()))
}

/// Reset all event state.
pub fn reset_all() {
    with_state_mut(|m| *m = EventState::default());
}

///
/// EventReport
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventReport {
    /// Ephemeral runtime counters since the last reset.
    pub counters: Option<EventState>,
    /// Per-stage counters and averages.
    pub stage_counters: Vec<StageSummary>,
}

///
/// StageSummary
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub firings: u64,
    pub rows_in: u64,
    pub rows_out: u64,
    pub rejections: u64,
    pub avg_rows_in_per_firing: f64,
    pub avg_rows_out_per_firing: f64,
}

/// Build a metrics report by inspecting in-memory counters only.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn report() -> EventReport {
    let snap = with_state(Clone::clone);

    let mut stage_counters = snap
        .stages
        .iter()
        .map(|(stage, counters)| {
            let per_firing = |rows: u64| {
                if counters.firings > 0 {
                    rows as f64 / counters.firings as f64
                } else {
                    0.0
                }
            };

            StageSummary {
                stage: stage.clone(),
                firings: counters.firings,
                rows_in: counters.rows_in,
                rows_out: counters.rows_out,
                rejections: counters.rejections,
                avg_rows_in_per_firing: per_firing(counters.rows_in),
                avg_rows_out_per_firing: per_firing(counters.rows_out),
            }
        })
        .collect::<Vec<_>>();

    // Busiest stages first, then name.
    stage_counters.sort_by(|a, b| match b.firings.cmp(&a.firings) {
        Ordering::Equal => a.stage.cmp(&b.stage),
        other => other,
    });

    EventReport {
        counters: Some(snap),
        stage_counters,
    }
}

///
/// TESTS
///
