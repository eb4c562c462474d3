//! Partition router.
//!
//! Contract:
//! - Every partitioned relation resolves to a `PartitionDomain` (column + kind).
//! - A stage output edge whose target domain differs from the stage input
//!   domain must be declared as a shuffle; anything else fails the build.
//! - At runtime a tuple's partition is `xxh3(partition value) % partition_count`.

use crate::{
    error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
    model::{RelationKind, RelationSchema},
    tuple::Tuple,
    value::{Value, ValueKind},
};
use derive_more::Display;
use std::{collections::BTreeMap, fmt};
use thiserror::Error as ThisError;
use xxhash_rust::xxh3::xxh3_64;

///
/// PartitionId
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("{_0}")]
pub struct PartitionId(usize);

impl PartitionId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Partition of a partition-column value for a given partition count.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn partition_of(value: &Value, partitions: usize) -> PartitionId {
    let mut bytes = Vec::with_capacity(16);
    value.encode_for_hash(&mut bytes);
    let hash = xxh3_64(&bytes);

    PartitionId((hash % partitions.max(1) as u64) as usize)
}

///
/// PartitionDomain
///
/// Value domain a relation is partitioned over.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartitionDomain {
    pub column: String,
    pub kind: ValueKind,
}

impl fmt::Display for PartitionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.column, self.kind)
    }
}

///
/// EdgeRouting
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EdgeRouting {
    /// Output stays in the firing partition.
    Local,
    /// Output is re-routed by the target's partition key.
    Shuffle,
}

///
/// PartitionError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum PartitionError {
    #[error(
        "partition mismatch: stage '{stage}' writes '{to}' ({to_domain}) from '{from}' ({from_domain}) without a declared shuffle"
    )]
    Mismatch {
        stage: String,
        from: String,
        from_domain: String,
        to: String,
        to_domain: String,
    },

    #[error(
        "partition mismatch: stage '{stage}' looks up '{relation}' ({relation_domain}) from partition domain {stage_domain}"
    )]
    LookupMismatch {
        stage: String,
        relation: String,
        relation_domain: String,
        stage_domain: String,
    },

    #[error("relation '{relation}' is partitioned by unknown column '{column}'")]
    UnknownColumn { relation: String, column: String },

    #[error("{kind} relation '{relation}' must declare a partition key")]
    Unpartitioned { relation: String, kind: RelationKind },

    #[error("reference relation '{relation}' must be replicated")]
    PartitionedReference { relation: String },

    #[error("tuple written to '{relation}' has no value for partition column '{column}'")]
    MissingKey { relation: String, column: String },

    #[error(
        "stage '{stage}' emitted a row for '{relation}' owned by partition {found} on a local edge fired in partition {expected}"
    )]
    Escaped {
        stage: String,
        relation: String,
        expected: usize,
        found: usize,
    },
}

impl PartitionError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::Mismatch { .. } | Self::LookupMismatch { .. } => ErrorClass::PartitionMismatch,
            Self::UnknownColumn { .. }
            | Self::Unpartitioned { .. }
            | Self::PartitionedReference { .. } => ErrorClass::Unsupported,
            Self::MissingKey { .. } => ErrorClass::Transform,
            Self::Escaped { .. } => ErrorClass::InvariantViolation,
        }
    }
}

impl From<PartitionError> for InternalError {
    fn from(err: PartitionError) -> Self {
        Self {
            class: err.class(),
            origin: ErrorOrigin::Router,
            message: err.to_string(),
            detail: Some(ErrorDetail::Partition(err)),
        }
    }
}

///
/// PartitionRouter
///
/// Resolved partition domains for every relation of a pipeline.
/// Replicated relations map to `None`.
///

#[derive(Clone, Debug, Default)]
pub struct PartitionRouter {
    domains: BTreeMap<String, Option<PartitionDomain>>,
}

impl PartitionRouter {
    /// Resolve partition domains, rejecting partition columns that do not exist.
    pub(crate) fn resolve<'a>(
        relations: impl IntoIterator<Item = &'a RelationSchema>,
    ) -> Result<Self, PartitionError> {
        let mut domains = BTreeMap::new();

        for relation in relations {
            let domain = match (&relation.partition_key, relation.kind) {
                (Some(_), RelationKind::Reference) => {
                    return Err(PartitionError::PartitionedReference {
                        relation: relation.name.clone(),
                    });
                }
                (None, RelationKind::Reference) => None,
                (None, kind) => {
                    return Err(PartitionError::Unpartitioned {
                        relation: relation.name.clone(),
                        kind,
                    });
                }
                (Some(column), _) => {
                    let field = relation.field(column).ok_or_else(|| {
                        PartitionError::UnknownColumn {
                            relation: relation.name.clone(),
                            column: column.clone(),
                        }
                    })?;

                    Some(PartitionDomain {
                        column: column.clone(),
                        kind: field.kind,
                    })
                }
            };

            domains.insert(relation.name.clone(), domain);
        }

        Ok(Self { domains })
    }

    /// Domain of a relation; `None` for replicated or unknown relations.
    #[must_use]
    pub fn domain(&self, relation: &str) -> Option<&PartitionDomain> {
        self.domains.get(relation).and_then(Option::as_ref)
    }

    /// Validate one stage output edge and decide how its rows are routed.
    pub(crate) fn check_edge(
        &self,
        stage: &str,
        from: &str,
        to: &str,
        shuffle: bool,
    ) -> Result<EdgeRouting, PartitionError> {
        let from_domain = self.domain(from);
        let to_domain = self.domain(to);

        if shuffle {
            if from_domain == to_domain {
                tracing::debug!(stage, from, to, "shuffle declared between identical domains");
            }
            return Ok(EdgeRouting::Shuffle);
        }

        if from_domain == to_domain {
            return Ok(EdgeRouting::Local);
        }

        Err(PartitionError::Mismatch {
            stage: stage.to_string(),
            from: from.to_string(),
            from_domain: display_domain(from_domain),
            to: to.to_string(),
            to_domain: display_domain(to_domain),
        })
    }

    /// Validate that a lookup is replicated or local to the stage's partition.
    pub(crate) fn check_lookup(
        &self,
        stage: &str,
        from: &str,
        relation: &str,
    ) -> Result<(), PartitionError> {
        let relation_domain = self.domain(relation);
        let stage_domain = self.domain(from);

        if relation_domain.is_none() || relation_domain == stage_domain {
            return Ok(());
        }

        Err(PartitionError::LookupMismatch {
            stage: stage.to_string(),
            relation: relation.to_string(),
            relation_domain: display_domain(relation_domain),
            stage_domain: display_domain(stage_domain),
        })
    }

    /// Partition owning `tuple` in `relation`.
    pub fn partition_for(
        &self,
        relation: &str,
        tuple: &Tuple,
        partitions: usize,
    ) -> Result<PartitionId, PartitionError> {
        let Some(domain) = self.domain(relation) else {
            return Err(PartitionError::Unpartitioned {
                relation: relation.to_string(),
                kind: RelationKind::Reference,
            });
        };

        match tuple.get(&domain.column) {
            Some(value) if !value.is_null() => Ok(partition_of(value, partitions)),
            _ => Err(PartitionError::MissingKey {
                relation: relation.to_string(),
                column: domain.column.clone(),
            }),
        }
    }
}

fn display_domain(domain: Option<&PartitionDomain>) -> String {
    domain.map_or_else(|| "replicated".to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relations() -> Vec<RelationSchema> {
        vec![
            RelationSchema::stream("by_phone")
                .with_field("phone_number", ValueKind::Int)
                .with_field("contestant_number", ValueKind::Int)
                .partitioned_by("phone_number"),
            RelationSchema::stream("also_by_phone")
                .with_field("phone_number", ValueKind::Int)
                .partitioned_by("phone_number"),
            RelationSchema::table("by_contestant")
                .with_field("contestant_number", ValueKind::Int)
                .with_primary_key(&["contestant_number"])
                .partitioned_by("contestant_number"),
            RelationSchema::reference("contestants")
                .with_field("contestant_number", ValueKind::Int)
                .with_primary_key(&["contestant_number"]),
        ]
    }

    fn router() -> PartitionRouter {
        PartitionRouter::resolve(&relations()).expect("test relations should resolve")
    }

    #[test]
    fn identical_domains_route_locally_without_shuffle() {
        let routing = router()
            .check_edge("stage", "by_phone", "also_by_phone", false)
            .expect("identical domains need no shuffle");

        assert_eq!(routing, EdgeRouting::Local);
    }

    #[test]
    fn differing_domains_without_shuffle_are_rejected() {
        let err = router()
            .check_edge("stage", "by_phone", "by_contestant", false)
            .expect_err("domain change must be declared");

        assert!(matches!(err, PartitionError::Mismatch { .. }));
        let err = InternalError::from(err);
        assert_eq!(err.class, ErrorClass::PartitionMismatch);
        assert_eq!(err.origin, ErrorOrigin::Router);
    }

    #[test]
    fn declared_shuffle_allows_domain_change() {
        let routing = router()
            .check_edge("stage", "by_phone", "by_contestant", true)
            .expect("declared shuffle should be accepted");

        assert_eq!(routing, EdgeRouting::Shuffle);
    }

    #[test]
    fn redundant_shuffle_between_identical_domains_is_accepted() {
        let routing = router()
            .check_edge("stage", "by_phone", "also_by_phone", true)
            .expect("a shuffle within one domain is allowed");

        assert_eq!(routing, EdgeRouting::Shuffle);
    }

    #[test]
    fn lookups_must_be_replicated_or_local() {
        let router = router();

        router
            .check_lookup("stage", "by_phone", "contestants")
            .expect("replicated lookups are always local");
        router
            .check_lookup("stage", "by_phone", "also_by_phone")
            .expect("same-domain lookups are local");
        assert!(matches!(
            router.check_lookup("stage", "by_phone", "by_contestant"),
            Err(PartitionError::LookupMismatch { .. })
        ));
    }

    #[test]
    fn unknown_partition_column_fails_resolution() {
        let relations = vec![
            RelationSchema::stream("s1")
                .with_field("phone_number", ValueKind::Int)
                .partitioned_by("part_id"),
        ];

        assert!(matches!(
            PartitionRouter::resolve(&relations),
            Err(PartitionError::UnknownColumn { column, .. }) if column == "part_id"
        ));
    }

    #[test]
    fn partitioned_reference_and_unpartitioned_stream_are_rejected() {
        let reference = vec![
            RelationSchema::reference("contestants")
                .with_field("contestant_number", ValueKind::Int)
                .partitioned_by("contestant_number"),
        ];
        assert!(matches!(
            PartitionRouter::resolve(&reference),
            Err(PartitionError::PartitionedReference { .. })
        ));

        let stream = vec![RelationSchema::stream("s1").with_field("phone_number", ValueKind::Int)];
        assert!(matches!(
            PartitionRouter::resolve(&stream),
            Err(PartitionError::Unpartitioned {
                kind: RelationKind::Stream,
                ..
            })
        ));
    }

    #[test]
    fn partition_for_is_stable_and_in_range() {
        let router = router();
        let tuple = Tuple::new()
            .with("phone_number", 5_551_234_i64)
            .with("contestant_number", 7);

        let first = router
            .partition_for("by_phone", &tuple, 8)
            .expect("tuple carries its partition key");
        let second = router
            .partition_for("by_phone", &tuple, 8)
            .expect("tuple carries its partition key");

        assert_eq!(first, second);
        assert!(first.index() < 8);
        assert_eq!(
            router
                .partition_for("by_phone", &tuple, 1)
                .expect("single partition")
                .index(),
            0
        );
    }

    #[test]
    fn partition_for_requires_key_value() {
        let tuple = Tuple::new().with("contestant_number", 7);

        assert!(matches!(
            router().partition_for("by_phone", &tuple, 4),
            Err(PartitionError::MissingKey { .. })
        ));
    }
}
