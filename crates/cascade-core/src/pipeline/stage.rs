use crate::{
    model::{MergePolicy, RelationKind},
    pipeline::router::EdgeRouting,
    transform::Transform,
};
use std::{fmt, sync::Arc};

///
/// OutputEdge
///
/// Resolved downstream edge of one stage.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputEdge {
    pub target: String,
    pub target_kind: RelationKind,
    pub merge: MergePolicy,
    pub routing: EdgeRouting,
}

///
/// TriggerStage
///
/// Immutable binding of a stream relation to a transform and its
/// downstream edges. Built once by `Pipeline::build`.
///

#[derive(Clone)]
pub struct TriggerStage {
    pub name: String,
    pub input: String,
    pub transform_id: String,
    pub outputs: Vec<OutputEdge>,
    pub lookups: Vec<String>,
    pub(crate) transform: Arc<dyn Transform>,
}

impl TriggerStage {
    #[must_use]
    pub fn output(&self, target: &str) -> Option<&OutputEdge> {
        self.outputs.iter().find(|edge| edge.target == target)
    }

    pub(crate) fn transform(&self) -> &dyn Transform {
        self.transform.as_ref()
    }
}

impl fmt::Debug for TriggerStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerStage")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("transform_id", &self.transform_id)
            .field("outputs", &self.outputs)
            .field("lookups", &self.lookups)
            .finish_non_exhaustive()
    }
}
