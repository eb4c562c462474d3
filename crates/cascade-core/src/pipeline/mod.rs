//! Pipeline build: manifest resolution, stage registry and partition routing.
//!
//! A `Pipeline` is immutable once built and is shared by every transaction
//! of a `Database` through an `Arc`.

mod graph;
mod registry;
mod router;
mod stage;
mod validate;

#[cfg(test)]
mod tests;

pub use registry::{RegistryError, StageRegistry, TransformRegistry};
pub use router::{
    EdgeRouting, PartitionDomain, PartitionError, PartitionId, PartitionRouter, partition_of,
};
pub use stage::{OutputEdge, TriggerStage};
pub use validate::ManifestError;

use crate::{
    error::{ErrorOrigin, InternalError},
    model::{DeploymentManifest, RelationKind, RelationSchema},
};
use std::collections::{BTreeMap, BTreeSet};

///
/// Pipeline
///

#[derive(Debug)]
pub struct Pipeline {
    relations: BTreeMap<String, RelationSchema>,
    stages: StageRegistry,
    router: PartitionRouter,
}

impl Pipeline {
    /// Resolve and validate a deployment manifest against registered transforms.
    pub fn build(
        manifest: &DeploymentManifest,
        transforms: &TransformRegistry,
    ) -> Result<Self, InternalError> {
        let relations = validate::validate_relations(&manifest.relations)?;
        let router = PartitionRouter::resolve(&manifest.relations)?;

        let mut stages = StageRegistry::default();
        let mut stage_names = BTreeSet::new();

        for decl in &manifest.stages {
            if !stage_names.insert(decl.name.as_str()) {
                return Err(ManifestError::DuplicateStage(decl.name.clone()).into());
            }

            let input = validate::stage_relation(&relations, decl, &decl.input)?;
            if !input.kind.is_stream() {
                return Err(ManifestError::InputNotStream {
                    stage: decl.name.clone(),
                    relation: input.name.clone(),
                    kind: input.kind,
                }
                .into());
            }

            let transform = transforms.try_get(&decl.transform)?;

            let mut outputs = Vec::with_capacity(decl.outputs.len());
            for output in &decl.outputs {
                if outputs
                    .iter()
                    .any(|edge: &OutputEdge| edge.target == output.target)
                {
                    return Err(ManifestError::DuplicateOutput {
                        stage: decl.name.clone(),
                        target: output.target.clone(),
                    }
                    .into());
                }

                let target = validate::stage_relation(&relations, decl, &output.target)?;
                validate::validate_output(decl, target, &output.merge)?;
                let routing =
                    router.check_edge(&decl.name, &decl.input, &output.target, output.shuffle)?;

                outputs.push(OutputEdge {
                    target: target.name.clone(),
                    target_kind: target.kind,
                    merge: output.merge.clone(),
                    routing,
                });
            }

            for lookup in &decl.lookups {
                let relation = validate::stage_relation(&relations, decl, lookup)?;
                if relation.kind.is_stream() {
                    return Err(ManifestError::StreamLookup {
                        stage: decl.name.clone(),
                        relation: lookup.clone(),
                    }
                    .into());
                }
                router.check_lookup(&decl.name, &decl.input, lookup)?;
            }

            stages.push(TriggerStage {
                name: decl.name.clone(),
                input: decl.input.clone(),
                transform_id: decl.transform.clone(),
                outputs,
                lookups: decl.lookups.clone(),
                transform,
            });
        }

        if let Some(unbound) = relations
            .values()
            .find(|relation| relation.kind.is_stream() && !stages.is_bound(&relation.name))
        {
            return Err(ManifestError::UnboundStream(unbound.name.clone()).into());
        }

        graph::check_acyclic(&stages)?;

        tracing::info!(
            relations = relations.len(),
            stages = stages.len(),
            "pipeline built"
        );

        Ok(Self {
            relations,
            stages,
            router,
        })
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationSchema> {
        self.relations.get(name)
    }

    /// Resolve a relation or fail with a not-found error.
    pub fn try_relation(
        &self,
        name: &str,
        origin: ErrorOrigin,
    ) -> Result<&RelationSchema, InternalError> {
        self.relation(name)
            .ok_or_else(|| InternalError::unknown_relation(origin, name))
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationSchema> {
        self.relations.values()
    }

    /// Relations of one kind, in name order.
    pub fn relations_of(&self, kind: RelationKind) -> impl Iterator<Item = &RelationSchema> {
        self.relations
            .values()
            .filter(move |relation| relation.kind == kind)
    }

    #[must_use]
    pub const fn stages(&self) -> &StageRegistry {
        &self.stages
    }

    #[must_use]
    pub const fn router(&self) -> &PartitionRouter {
        &self.router
    }
}
