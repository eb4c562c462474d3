//! Declarative model: relation schemas and the deployment manifest.

pub mod manifest;
pub mod relation;

// re-exports
pub use manifest::{DeploymentManifest, MergePolicy, OutputDecl, StageDecl};
pub use relation::{FieldSchema, RelationKind, RelationSchema, SchemaError};
