use crate::{
    area_code::{self, derive_area_code},
    relation::{
        AREA_CODE_STATE, CONTESTANTS, S1, VOTES_BY_CONTESTANT_NUMBER_STATE, VOTES_BY_PHONE_NUMBER,
    },
    vote_manifest, vote_transforms,
};
use cascade_config::{CascadeConfig, WorkloadConfig};
use cascade_core::{
    db::Database,
    error::{ErrorClass, ErrorOrigin, InternalError},
    pipeline::Pipeline,
    tuple::{RowKey, Tuple},
    value::Value,
};
use serde::Serialize;
use std::collections::BTreeMap;

///
/// VoteRequest
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VoteRequest {
    pub phone_number: i64,
    pub contestant_number: i64,
    pub area_code: Option<i64>,
}

impl VoteRequest {
    #[must_use]
    pub const fn new(phone_number: i64, contestant_number: i64) -> Self {
        Self {
            phone_number,
            contestant_number,
            area_code: None,
        }
    }

    /// Use `area_code` instead of deriving it from the phone number.
    #[must_use]
    pub const fn with_area_code(mut self, area_code: i64) -> Self {
        self.area_code = Some(area_code);
        self
    }

    /// Explicit area code, else the one embedded in a ten-digit number.
    #[must_use]
    pub fn area_code(&self) -> Option<i64> {
        self.area_code.or_else(|| derive_area_code(self.phone_number))
    }
}

///
/// VoteOutcome
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VoteOutcome {
    Accepted,
    /// Dropped by a validation stage; the transaction still committed.
    Rejected(String),
}

impl VoteOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

///
/// ContestantResult
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ContestantResult {
    pub contestant_number: i64,
    pub contestant_name: String,
    pub total_votes: i64,
}

///
/// Voter
///
/// Ingestion entry point and read interface of the vote pipeline.
///

#[derive(Debug)]
pub struct Voter {
    db: Database,
}

impl Voter {
    /// Build the vote pipeline and open empty storage for it.
    pub fn open(config: &CascadeConfig) -> Result<Self, InternalError> {
        config.validate()?;

        let manifest = vote_manifest()?;
        let transforms = vote_transforms(config.workload.max_votes_per_submitter)?;
        let pipeline = Pipeline::build(&manifest, &transforms)?;
        let db = Database::open(pipeline, config.engine.partitions)?;

        Ok(Self { db })
    }

    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Load contestants and the area code table. Must run before the
    /// first submission.
    pub fn load_reference(&self, workload: &WorkloadConfig) -> Result<usize, InternalError> {
        let contestants = workload.contestants().map(|(number, name)| {
            Tuple::new()
                .with("contestant_number", number)
                .with("contestant_name", name)
        });

        let loaded = self.db.load_reference(CONTESTANTS, contestants)?
            + self
                .db
                .load_reference(AREA_CODE_STATE, area_code::reference_rows())?;

        Ok(loaded)
    }

    /// Submit one vote as one transaction.
    pub fn submit(&self, request: VoteRequest) -> Result<VoteOutcome, InternalError> {
        let area_code = request.area_code().ok_or_else(|| {
            InternalError::new(
                ErrorClass::Unsupported,
                ErrorOrigin::Interface,
                format!(
                    "phone number {} carries no area code; supply one explicitly",
                    request.phone_number
                ),
            )
        })?;

        let row = Tuple::new()
            .with("phone_number", request.phone_number)
            .with("contestant_number", request.contestant_number)
            .with("area_code", area_code);
        let report = self.db.execute(|txn| txn.insert(S1, [row]))?;

        let outcome = match report.rejections.into_iter().next() {
            Some(rejection) => VoteOutcome::Rejected(rejection.reason),
            None => VoteOutcome::Accepted,
        };
        tracing::debug!(
            phone = request.phone_number,
            contestant = request.contestant_number,
            accepted = outcome.is_accepted(),
            "vote submitted"
        );

        Ok(outcome)
    }

    /// Votes counted for `contestant_number` from `state`.
    pub fn votes_for(&self, contestant_number: i64, state: &str) -> Result<i64, InternalError> {
        let key = RowKey::new(vec![Value::Int(contestant_number), Value::from(state)]);

        Ok(self
            .db
            .read_table(VOTES_BY_CONTESTANT_NUMBER_STATE, &key)?
            .and_then(|row| row.int("num_votes"))
            .unwrap_or(0))
    }

    /// Accepted votes cast by `phone_number`.
    pub fn votes_by_phone(&self, phone_number: i64) -> Result<i64, InternalError> {
        Ok(self
            .db
            .read_table(VOTES_BY_PHONE_NUMBER, &RowKey::of(phone_number))?
            .and_then(|row| row.int("num_votes"))
            .unwrap_or(0))
    }

    /// Totals per contestant, most votes first, ties by contestant number.
    /// Contestants without votes are included with a zero total.
    pub fn results(&self) -> Result<Vec<ContestantResult>, InternalError> {
        let mut totals = BTreeMap::<i64, i64>::new();
        for row in self.db.scan_table(VOTES_BY_CONTESTANT_NUMBER_STATE)? {
            if let (Some(contestant), Some(votes)) =
                (row.int("contestant_number"), row.int("num_votes"))
            {
                *totals.entry(contestant).or_default() += votes;
            }
        }

        let mut results = self
            .db
            .scan_table(CONTESTANTS)?
            .into_iter()
            .filter_map(|row| {
                let contestant_number = row.int("contestant_number")?;

                Some(ContestantResult {
                    contestant_number,
                    contestant_name: row.text("contestant_name")?.to_string(),
                    total_votes: totals.get(&contestant_number).copied().unwrap_or(0),
                })
            })
            .collect::<Vec<_>>();

        results.sort_by(|a, b| {
            b.total_votes
                .cmp(&a.total_votes)
                .then(a.contestant_number.cmp(&b.contestant_number))
        });

        Ok(results)
    }

    /// All accepted votes across contestants.
    pub fn total_votes(&self) -> Result<i64, InternalError> {
        Ok(self
            .db
            .scan_table(VOTES_BY_CONTESTANT_NUMBER_STATE)?
            .iter()
            .filter_map(|row| row.int("num_votes"))
            .sum())
    }
}
