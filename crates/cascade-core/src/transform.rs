//! Transform boundary.
//!
//! A transform is a pure function from a stage's input rows (plus keyed
//! lookups into declared relations) to emitted rows and rejections. It never
//! mutates storage; the executor applies its output under the declared
//! merge policies.

use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    pipeline::PartitionId,
    tuple::{RowKey, Tuple},
};
use thiserror::Error as ThisError;

///
/// Transform
///

pub trait Transform: Send + Sync {
    fn apply(
        &self,
        input: &[Tuple],
        ctx: &TransformContext<'_>,
    ) -> Result<TransformOutput, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&[Tuple], &TransformContext<'_>) -> Result<TransformOutput, TransformError>
        + Send
        + Sync,
{
    fn apply(
        &self,
        input: &[Tuple],
        ctx: &TransformContext<'_>,
    ) -> Result<TransformOutput, TransformError> {
        self(input, ctx)
    }
}

///
/// LookupSource
///
/// Storage view handed to a firing stage.
///

pub(crate) trait LookupSource {
    fn lookup(&self, relation: &str, key: &RowKey) -> Option<Tuple>;
}

///
/// TransformContext
///

pub struct TransformContext<'a> {
    stage: &'a str,
    partition: PartitionId,
    lookups: &'a [String],
    source: &'a dyn LookupSource,
}

impl<'a> TransformContext<'a> {
    pub(crate) const fn new(
        stage: &'a str,
        partition: PartitionId,
        lookups: &'a [String],
        source: &'a dyn LookupSource,
    ) -> Self {
        Self {
            stage,
            partition,
            lookups,
            source,
        }
    }

    #[must_use]
    pub const fn stage_name(&self) -> &str {
        self.stage
    }

    #[must_use]
    pub const fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Keyed read of a declared lookup relation.
    pub fn lookup(&self, relation: &str, key: &RowKey) -> Result<Option<Tuple>, TransformError> {
        if !self.lookups.iter().any(|declared| declared == relation) {
            return Err(TransformError::UndeclaredLookup {
                stage: self.stage.to_string(),
                relation: relation.to_string(),
            });
        }

        Ok(self.source.lookup(relation, key))
    }

    /// Keyed read that treats a missing row as a reference integrity failure.
    pub fn require(&self, relation: &str, key: &RowKey) -> Result<Tuple, TransformError> {
        self.lookup(relation, key)?
            .ok_or_else(|| TransformError::MissingReference {
                relation: relation.to_string(),
                key: key.to_string(),
            })
    }
}

///
/// Emit
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Emit {
    pub target: String,
    pub tuple: Tuple,
}

///
/// Rejection
///
/// Business-rule rejection of one input row. The row is dropped and the
/// transaction still commits.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rejection {
    pub stage: String,
    pub reason: String,
}

///
/// TransformOutput
///

#[derive(Clone, Debug, Default)]
pub struct TransformOutput {
    emitted: Vec<Emit>,
    rejections: Vec<String>,
}

impl TransformOutput {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            emitted: Vec::new(),
            rejections: Vec::new(),
        }
    }

    pub fn emit(&mut self, target: impl Into<String>, tuple: Tuple) {
        self.emitted.push(Emit {
            target: target.into(),
            tuple,
        });
    }

    pub fn reject(&mut self, reason: impl Into<String>) {
        self.rejections.push(reason.into());
    }

    #[must_use]
    pub fn emitted(&self) -> &[Emit] {
        &self.emitted
    }

    #[must_use]
    pub fn rejections(&self) -> &[String] {
        &self.rejections
    }

    pub(crate) fn into_parts(self) -> (Vec<Emit>, Vec<String>) {
        (self.emitted, self.rejections)
    }
}

///
/// TransformError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum TransformError {
    #[error("reference row missing: '{relation}' has no row for key {key}")]
    MissingReference { relation: String, key: String },

    #[error("stage '{stage}' reads undeclared lookup relation '{relation}'")]
    UndeclaredLookup { stage: String, relation: String },

    #[error("stage '{stage}' emits to undeclared target '{target}'")]
    UndeclaredTarget { stage: String, target: String },

    #[error("{0}")]
    Failed(String),
}

impl TransformError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::MissingReference { .. } => ErrorClass::ReferenceIntegrity,
            Self::UndeclaredLookup { .. } | Self::UndeclaredTarget { .. } | Self::Failed(_) => {
                ErrorClass::Transform
            }
        }
    }
}

impl From<TransformError> for InternalError {
    fn from(err: TransformError) -> Self {
        Self::new(err.class(), ErrorOrigin::Executor, err.to_string())
    }
}
