//! Core runtime for Cascade: relation schemas, the validated trigger
//! pipeline, partitioned transactional storage, and the cascade executor.

// public exports are one module level down
pub mod db;
pub mod error;
pub mod model;
pub mod obs;
pub mod pipeline;
pub mod transform;
pub mod tuple;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_support;

///
/// CONSTANTS
///

/// Partition count used when a deployment does not configure one.
pub const DEFAULT_PARTITIONS: usize = 4;

///
/// Prelude
///
/// Vocabulary needed to declare a pipeline and write transforms.
/// Storage internals and metrics are not re-exported here.
///

pub mod prelude {
    pub use crate::{
        db::{CascadeReport, CommitReport, Database, Transaction},
        error::{ErrorClass, ErrorOrigin, InternalError},
        model::{DeploymentManifest, MergePolicy, RelationKind, RelationSchema, StageDecl},
        pipeline::{Pipeline, TransformRegistry},
        transform::{Transform, TransformContext, TransformError, TransformOutput},
        tuple::{RowKey, Tuple},
        value::{Value, ValueKind},
    };
}
