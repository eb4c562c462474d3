//! The four vote stages.
//!
//! Each transform reads only its input rows and declared lookups, and
//! emits new tuples; none of them touches storage.

use crate::relation::{
    AREA_CODE_STATE, CONTESTANTS, S2, S3, S4, VOTES, VOTES_BY_CONTESTANT_NUMBER_STATE,
    VOTES_BY_PHONE_NUMBER,
};
use cascade_core::{
    error::InternalError,
    pipeline::TransformRegistry,
    transform::{Transform, TransformContext, TransformError, TransformOutput},
    tuple::{RowKey, Tuple},
    value::Value,
};
use std::collections::BTreeMap;

/// Register every vote transform. The quota is fixed at registration.
pub fn vote_transforms(max_votes_per_submitter: u32) -> Result<TransformRegistry, InternalError> {
    let mut registry = TransformRegistry::new();
    registry.register("validate_contestant", validate_contestant)?;
    registry.register(
        "enforce_quota",
        EnforceQuota {
            max_votes: i64::from(max_votes_per_submitter),
        },
    )?;
    registry.register("locate_vote", locate_vote)?;
    registry.register("tally_vote", tally_vote)?;

    Ok(registry)
}

fn int_field(row: &Tuple, field: &str) -> Result<i64, TransformError> {
    row.int(field)
        .ok_or_else(|| TransformError::failed(format!("vote row without '{field}'")))
}

fn field(row: &Tuple, name: &str) -> Value {
    row.get(name).cloned().unwrap_or_default()
}

// Stage 1: the contestant must exist.
fn validate_contestant(
    input: &[Tuple],
    ctx: &TransformContext<'_>,
) -> Result<TransformOutput, TransformError> {
    let mut out = TransformOutput::new();

    for row in input {
        let contestant = int_field(row, "contestant_number")?;
        ctx.require(CONTESTANTS, &RowKey::of(contestant))?;
        out.emit(S2, row.clone());
    }

    Ok(out)
}

///
/// EnforceQuota
///
/// Stage 2: admits a vote while the submitter is under quota and assigns
/// it a vote id from the submitter's accepted-vote ordinal.
///

struct EnforceQuota {
    max_votes: i64,
}

impl Transform for EnforceQuota {
    fn apply(
        &self,
        input: &[Tuple],
        ctx: &TransformContext<'_>,
    ) -> Result<TransformOutput, TransformError> {
        let mut out = TransformOutput::new();
        // votes admitted earlier in this batch, not yet merged
        let mut pending = BTreeMap::<i64, i64>::new();

        for row in input {
            let phone = int_field(row, "phone_number")?;
            let recorded = ctx
                .lookup(VOTES_BY_PHONE_NUMBER, &RowKey::of(phone))?
                .and_then(|counts| counts.int("num_votes"))
                .unwrap_or(0);
            let admitted = pending.entry(phone).or_default();
            let cast = recorded + *admitted;

            if cast >= self.max_votes {
                out.reject(format!(
                    "phone number {phone} has already cast {cast} of {} allowed votes",
                    self.max_votes
                ));
                continue;
            }

            *admitted += 1;
            out.emit(
                VOTES_BY_PHONE_NUMBER,
                Tuple::new().with("phone_number", phone).with("num_votes", 1),
            );
            out.emit(
                S3,
                Tuple::new()
                    .with("vote_id", format!("{phone}-{}", cast + 1))
                    .with("phone_number", phone)
                    .with("contestant_number", field(row, "contestant_number"))
                    .with("area_code", field(row, "area_code")),
            );
        }

        Ok(out)
    }
}

// Stage 3: resolve the state, record the vote, and hand it to the
// contestant's partition.
fn locate_vote(input: &[Tuple], ctx: &TransformContext<'_>) -> Result<TransformOutput, TransformError> {
    let mut out = TransformOutput::new();

    for row in input {
        let area_code = int_field(row, "area_code")?;
        let located = ctx.require(AREA_CODE_STATE, &RowKey::of(area_code))?;

        let vote = Tuple::new()
            .with("vote_id", field(row, "vote_id"))
            .with("phone_number", field(row, "phone_number"))
            .with("contestant_number", field(row, "contestant_number"))
            .with("state", field(&located, "state"));

        out.emit(VOTES, vote.clone());
        out.emit(S4, vote);
    }

    Ok(out)
}

// Stage 4.
fn tally_vote(input: &[Tuple], _: &TransformContext<'_>) -> Result<TransformOutput, TransformError> {
    let mut out = TransformOutput::new();

    for row in input {
        out.emit(
            VOTES_BY_CONTESTANT_NUMBER_STATE,
            Tuple::new()
                .with("contestant_number", field(row, "contestant_number"))
                .with("state", field(row, "state"))
                .with("num_votes", 1),
        );
    }

    Ok(out)
}
