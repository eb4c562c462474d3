use crate::{pipeline::PartitionId, transform::Rejection};

///
/// StageFiring
///
/// One execution of one stage over the rows of one partition.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StageFiring {
    pub stage: String,
    pub partition: PartitionId,
    pub rows_in: usize,
    pub rows_out: usize,
    pub rejected: usize,
}

///
/// CascadeReport
///
/// Everything one insertion caused, in firing order.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CascadeReport {
    pub firings: Vec<StageFiring>,
    pub rows_appended: usize,
    pub rows_cleared: usize,
    pub rows_merged: usize,
    pub rejections: Vec<Rejection>,
}

impl CascadeReport {
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        !self.rejections.is_empty()
    }

    /// Whether `stage` fired at least once.
    #[must_use]
    pub fn fired(&self, stage: &str) -> bool {
        self.firings.iter().any(|firing| firing.stage == stage)
    }

    #[must_use]
    pub fn stage_order(&self) -> Vec<&str> {
        self.firings
            .iter()
            .map(|firing| firing.stage.as_str())
            .collect()
    }

    pub(crate) fn absorb(&mut self, other: &Self) {
        self.firings.extend(other.firings.iter().cloned());
        self.rows_appended += other.rows_appended;
        self.rows_cleared += other.rows_cleared;
        self.rows_merged += other.rows_merged;
        self.rejections.extend(other.rejections.iter().cloned());
    }
}

///
/// CommitReport
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitReport {
    pub txn_id: u64,
    pub partitions: Vec<PartitionId>,
    pub cascade: CascadeReport,
}
