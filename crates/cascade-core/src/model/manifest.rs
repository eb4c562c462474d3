use crate::model::relation::RelationSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

///
/// MergePolicy
///
/// How a stage output combines with the target relation.
/// Declared per output edge; never inferred from the shape of a write.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MergePolicy {
    /// Append to a stream relation, firing its bound stages.
    Append,
    /// Insert a new table row; an existing key aborts the transaction.
    Insert,
    /// Upsert: the emitted row replaces any existing row with the same key.
    Replace,
    /// `column = column + contribution`; inserts the row if the key is absent.
    Additive { column: String },
}

impl MergePolicy {
    #[must_use]
    pub fn additive(column: impl Into<String>) -> Self {
        Self::Additive {
            column: column.into(),
        }
    }

    #[must_use]
    pub const fn targets_stream(&self) -> bool {
        matches!(self, Self::Append)
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::Insert => write!(f, "insert"),
            Self::Replace => write!(f, "replace"),
            Self::Additive { column } => write!(f, "additive({column})"),
        }
    }
}

///
/// OutputDecl
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDecl {
    pub target: String,
    pub merge: MergePolicy,
    /// Explicit repartitioning edge.
    #[serde(default)]
    pub shuffle: bool,
}

///
/// StageDecl
///
/// Static declaration of one trigger stage.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StageDecl {
    pub name: String,
    pub input: String,
    pub transform: String,
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
    #[serde(default)]
    pub lookups: Vec<String>,
}

impl StageDecl {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input: impl Into<String>,
        transform: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            transform: transform.into(),
            outputs: Vec::new(),
            lookups: Vec::new(),
        }
    }

    #[must_use]
    pub fn output(mut self, target: impl Into<String>, merge: MergePolicy) -> Self {
        self.outputs.push(OutputDecl {
            target: target.into(),
            merge,
            shuffle: false,
        });
        self
    }

    #[must_use]
    pub fn shuffle_output(mut self, target: impl Into<String>, merge: MergePolicy) -> Self {
        self.outputs.push(OutputDecl {
            target: target.into(),
            merge,
            shuffle: true,
        });
        self
    }

    #[must_use]
    pub fn lookup(mut self, relation: impl Into<String>) -> Self {
        self.lookups.push(relation.into());
        self
    }
}

///
/// DeploymentManifest
///
/// Relations and stages of one pipeline, in deployment order.
/// Consumed once by `Pipeline::build`.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentManifest {
    #[serde(default)]
    pub relations: Vec<RelationSchema>,
    #[serde(default)]
    pub stages: Vec<StageDecl>,
}

impl DeploymentManifest {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            relations: Vec::new(),
            stages: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_relation(mut self, relation: RelationSchema) -> Self {
        self.relations.push(relation);
        self
    }

    #[must_use]
    pub fn with_stage(mut self, stage: StageDecl) -> Self {
        self.stages.push(stage);
        self
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationSchema> {
        self.relations.iter().find(|relation| relation.name == name)
    }
}
