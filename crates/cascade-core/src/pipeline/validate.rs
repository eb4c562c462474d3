use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::{MergePolicy, RelationKind, RelationSchema, StageDecl},
    value::ValueKind,
};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

///
/// ManifestError
///
/// Deployment-time rejection of a manifest. Never retried.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum ManifestError {
    #[error("relation '{0}' declared more than once")]
    DuplicateRelation(String),

    #[error("stage '{0}' declared more than once")]
    DuplicateStage(String),

    #[error("stage '{stage}' references unknown relation '{relation}'")]
    UnknownRelation { stage: String, relation: String },

    #[error("stage '{stage}' is bound to {kind} relation '{relation}'; stages bind to streams")]
    InputNotStream {
        stage: String,
        relation: String,
        kind: RelationKind,
    },

    #[error("stage '{stage}' declares '{target}' as an output more than once")]
    DuplicateOutput { stage: String, target: String },

    #[error("stage '{stage}' writes reference relation '{relation}'")]
    ReferenceWrite { stage: String, relation: String },

    #[error("stage '{stage}' cannot merge into {kind} relation '{target}' with policy {merge}")]
    PolicyTarget {
        stage: String,
        target: String,
        kind: RelationKind,
        merge: MergePolicy,
    },

    #[error("stage '{stage}' merges additively into '{target}.{column}', which is not an int field")]
    AdditiveColumn {
        stage: String,
        target: String,
        column: String,
    },

    #[error("stage '{stage}' looks up stream relation '{relation}'")]
    StreamLookup { stage: String, relation: String },

    #[error("{kind} relation '{relation}' must declare a primary key")]
    MissingPrimaryKey { relation: String, kind: RelationKind },

    #[error("relation '{relation}' primary key names unknown field '{column}'")]
    UnknownKeyColumn { relation: String, column: String },

    #[error("stream relation '{0}' has no bound stage; its rows could never be cleared")]
    UnboundStream(String),

    #[error("stage graph contains a cycle: {0}")]
    Cycle(String),
}

impl ManifestError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownRelation { .. } => ErrorClass::NotFound,
            Self::DuplicateRelation(_) | Self::DuplicateStage(_) | Self::DuplicateOutput { .. } => {
                ErrorClass::InvariantViolation
            }
            _ => ErrorClass::Unsupported,
        }
    }
}

impl From<ManifestError> for InternalError {
    fn from(err: ManifestError) -> Self {
        Self::new(err.class(), ErrorOrigin::Manifest, err.to_string())
    }
}

/// Per-relation checks that do not depend on stages.
pub(crate) fn validate_relations(
    relations: &[RelationSchema],
) -> Result<BTreeMap<String, RelationSchema>, ManifestError> {
    let mut by_name = BTreeMap::new();

    for relation in relations {
        if by_name.contains_key(&relation.name) {
            return Err(ManifestError::DuplicateRelation(relation.name.clone()));
        }

        if !relation.kind.is_stream() && relation.primary_key.is_empty() {
            return Err(ManifestError::MissingPrimaryKey {
                relation: relation.name.clone(),
                kind: relation.kind,
            });
        }

        if let Some(column) = relation
            .primary_key
            .iter()
            .find(|column| relation.field(column).is_none())
        {
            return Err(ManifestError::UnknownKeyColumn {
                relation: relation.name.clone(),
                column: column.clone(),
            });
        }

        by_name.insert(relation.name.clone(), relation.clone());
    }

    Ok(by_name)
}

/// Resolve a relation named by a stage declaration.
pub(crate) fn stage_relation<'a>(
    relations: &'a BTreeMap<String, RelationSchema>,
    stage: &StageDecl,
    relation: &str,
) -> Result<&'a RelationSchema, ManifestError> {
    relations
        .get(relation)
        .ok_or_else(|| ManifestError::UnknownRelation {
            stage: stage.name.clone(),
            relation: relation.to_string(),
        })
}

/// Check that a merge policy fits the kind and shape of its target.
pub(crate) fn validate_output(
    stage: &StageDecl,
    target: &RelationSchema,
    merge: &MergePolicy,
) -> Result<(), ManifestError> {
    if target.kind == RelationKind::Reference {
        return Err(ManifestError::ReferenceWrite {
            stage: stage.name.clone(),
            relation: target.name.clone(),
        });
    }

    if merge.targets_stream() != target.kind.is_stream() {
        return Err(ManifestError::PolicyTarget {
            stage: stage.name.clone(),
            target: target.name.clone(),
            kind: target.kind,
            merge: merge.clone(),
        });
    }

    if let MergePolicy::Additive { column } = merge {
        let is_int = target
            .field(column)
            .is_some_and(|field| field.kind == ValueKind::Int);
        let is_key = target.primary_key.iter().any(|key| key == column);

        if !is_int || is_key {
            return Err(ManifestError::AdditiveColumn {
                stage: stage.name.clone(),
                target: target.name.clone(),
                column: column.clone(),
            });
        }
    }

    Ok(())
}
