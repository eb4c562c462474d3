//! Typed deployment configuration for Cascade.
//!
//! Configuration is parsed from TOML once, validated, and then passed by
//! reference into pipeline construction. Nothing here is mutable after load.

use cascade_core::{
    DEFAULT_PARTITIONS,
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::DeploymentManifest,
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Upper bound on contestants a vote deployment can declare.
pub const MAX_CONTESTANTS: u32 = 12;

const DEFAULT_CONTESTANT_NAMES: [&str; MAX_CONTESTANTS as usize] = [
    "Edwina Burnam",
    "Tabatha Gehling",
    "Kelly Clauss",
    "Jessie Alloway",
    "Alana Bregman",
    "Jessie Eichman",
    "Allie Rogalski",
    "Nita Coster",
    "Kurt Walser",
    "Ericka Dieter",
    "Loraine Nygren",
    "Tania Mattioli",
];

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for InternalError {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorClass::Unsupported, ErrorOrigin::Config, err.to_string())
    }
}

///
/// CascadeConfig
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CascadeConfig {
    pub engine: EngineConfig,
    pub workload: WorkloadConfig,
}

impl CascadeConfig {
    /// Parse and validate a TOML document. Missing sections take defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;

        tracing::debug!(
            partitions = config.engine.partitions,
            contestants = config.workload.contestant_count,
            quota = config.workload.max_votes_per_submitter,
            "configuration loaded"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.workload.validate()
    }
}

///
/// EngineConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub partitions: usize,
}

impl EngineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.partitions == 0 {
            return Err(ConfigError::invalid(
                "engine.partitions",
                "at least one partition is required",
            ));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
        }
    }
}

///
/// WorkloadConfig
///
/// Vote workload constants. `load` is consumed by external load
/// generators only; the cascade never reads it.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadConfig {
    pub max_votes_per_submitter: u32,
    pub contestant_count: u32,
    pub contestant_names: Vec<String>,
    pub load: LoadConfig,
}

impl WorkloadConfig {
    /// Configured contestants as `(contestant_number, name)`, numbered from 1.
    pub fn contestants(&self) -> impl Iterator<Item = (i64, &str)> {
        self.contestant_names
            .iter()
            .take(self.contestant_count as usize)
            .zip(1_i64..)
            .map(|(name, number)| (number, name.as_str()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_votes_per_submitter == 0 {
            return Err(ConfigError::invalid(
                "workload.max_votes_per_submitter",
                "must be at least 1",
            ));
        }
        if !(1..=MAX_CONTESTANTS).contains(&self.contestant_count) {
            return Err(ConfigError::invalid(
                "workload.contestant_count",
                format!("must be in 1..={MAX_CONTESTANTS}"),
            ));
        }
        if self.contestant_names.len() < self.contestant_count as usize {
            return Err(ConfigError::invalid(
                "workload.contestant_names",
                format!(
                    "{} name(s) given for {} contestants",
                    self.contestant_names.len(),
                    self.contestant_count
                ),
            ));
        }

        self.load.validate()
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            max_votes_per_submitter: 4,
            contestant_count: 6,
            contestant_names: DEFAULT_CONTESTANT_NAMES
                .iter()
                .map(ToString::to_string)
                .collect(),
            load: LoadConfig::default(),
        }
    }
}

///
/// LoadConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    pub batch_size: u32,
    /// Percentage of requests that target hot data.
    pub hot_data_skew: u8,
    /// Percentage of data that is hot.
    pub hot_data_size: u8,
    pub frequencies: FrequencyConfig,
}

impl LoadConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid(
                "workload.load.batch_size",
                "must be at least 1",
            ));
        }
        if self.hot_data_skew > 100 {
            return Err(ConfigError::invalid(
                "workload.load.hot_data_skew",
                "is a percentage",
            ));
        }
        if self.hot_data_size > 100 {
            return Err(ConfigError::invalid(
                "workload.load.hot_data_size",
                "is a percentage",
            ));
        }

        let total = self.frequencies.total();
        if total != 100 {
            return Err(ConfigError::invalid(
                "workload.load.frequencies",
                format!("must sum to 100, found {total}"),
            ));
        }

        Ok(())
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            hot_data_skew: 90,
            hot_data_size: 10,
            frequencies: FrequencyConfig::default(),
        }
    }
}

///
/// FrequencyConfig
///
/// Transaction mix, in percent.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrequencyConfig {
    pub insert: u32,
    pub delete: u32,
    pub read: u32,
    pub scan: u32,
    pub update: u32,
}

impl FrequencyConfig {
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.insert + self.delete + self.read + self.scan + self.update
    }
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            insert: 0,
            delete: 0,
            read: 90,
            scan: 0,
            update: 10,
        }
    }
}

/// Parse a deployment manifest from TOML.
pub fn load_manifest(source: &str) -> Result<DeploymentManifest, ConfigError> {
    let manifest: DeploymentManifest = toml::from_str(source)?;

    tracing::debug!(
        relations = manifest.relations.len(),
        stages = manifest.stages.len(),
        "manifest loaded"
    );

    Ok(manifest)
}
