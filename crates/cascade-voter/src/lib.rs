//! Vote counting as a four-stage Cascade pipeline.
//!
//! A submission enters `s1` and is validated against the contestant list,
//! checked against the submitter's quota, located by area code, and finally
//! tallied per contestant and state. Each submission is one transaction.

pub mod area_code;
mod transforms;
mod voter;


pub use transforms::vote_transforms;
pub use voter::{ContestantResult, VoteOutcome, VoteRequest, Voter};

use cascade_config::{ConfigError, load_manifest};
use cascade_core::model::DeploymentManifest;

/// Relation names declared by the bundled manifest.
pub mod relation {
    pub const CONTESTANTS: &str = "contestants";
    pub const AREA_CODE_STATE: &str = "area_code_state";
    pub const S1: &str = "s1";
    pub const S2: &str = "s2";
    pub const S3: &str = "s3";
    pub const S4: &str = "s4";
    pub const VOTES: &str = "votes";
    pub const VOTES_BY_PHONE_NUMBER: &str = "votes_by_phone_number";
    pub const VOTES_BY_CONTESTANT_NUMBER_STATE: &str = "votes_by_contestant_number_state";

    /// Every stream relation, in cascade order.
    pub const STREAMS: [&str; 4] = [S1, S2, S3, S4];
}

/// TOML source of the vote pipeline.
pub const MANIFEST_TOML: &str = include_str!("../manifest.toml");

/// Parse the bundled vote manifest.
pub fn vote_manifest() -> Result<DeploymentManifest, ConfigError> {
    load_manifest(MANIFEST_TOML)
}
