use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::{DeploymentManifest, MergePolicy, RelationSchema, StageDecl},
    pipeline::{EdgeRouting, Pipeline, PartitionError},
    test_support::{fixture_manifest, fixture_pipeline, fixture_transforms, init_test_logger},
    value::ValueKind,
};

fn build(manifest: &DeploymentManifest) -> Result<Pipeline, InternalError> {
    init_test_logger();
    Pipeline::build(manifest, &fixture_transforms())
}

fn build_err(manifest: &DeploymentManifest) -> InternalError {
    build(manifest).expect_err("manifest should be rejected")
}

#[test]
fn fixture_pipeline_resolves_stage_registry_in_deployment_order() {
    let pipeline = fixture_pipeline();

    let names = pipeline
        .stages()
        .iter()
        .map(|stage| stage.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["check", "count_user", "count_item"]);

    let bound = pipeline
        .stages()
        .bound("checked")
        .map(|stage| stage.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(bound, vec!["count_user"]);

    let count_user = pipeline
        .stages()
        .get("count_user")
        .expect("count_user should be registered");
    assert_eq!(
        count_user
            .output("per_user")
            .expect("per_user edge should exist")
            .routing,
        EdgeRouting::Local
    );
    assert_eq!(
        count_user
            .output("by_item")
            .expect("by_item edge should exist")
            .routing,
        EdgeRouting::Shuffle
    );
}

#[test]
fn undeclared_domain_change_fails_with_partition_mismatch() {
    let mut manifest = fixture_manifest();
    let stage = manifest
        .stages
        .iter_mut()
        .find(|stage| stage.name == "count_user")
        .expect("fixture should declare count_user");
    for output in &mut stage.outputs {
        output.shuffle = false;
    }

    let err = build_err(&manifest);

    assert_eq!(err.class, ErrorClass::PartitionMismatch);
    assert_eq!(err.origin, ErrorOrigin::Router);
    assert!(matches!(
        err.detail,
        Some(crate::error::ErrorDetail::Partition(PartitionError::Mismatch { ref to, .. })) if to == "by_item"
    ));
}

#[test]
fn cross_domain_lookup_fails_with_partition_mismatch() {
    let mut manifest = fixture_manifest();
    manifest.stages[0].lookups.push("per_item".to_string());

    let err = build_err(&manifest);

    assert_eq!(err.class, ErrorClass::PartitionMismatch);
}

#[test]
fn same_domain_lookup_is_accepted() {
    let mut manifest = fixture_manifest();
    manifest.stages[0].lookups.push("per_user".to_string());

    build(&manifest).expect("lookup within the stage's partition domain should build");
}

#[test]
fn unknown_transform_identity_is_rejected() {
    let manifest = fixture_manifest().with_stage(StageDecl::new("extra", "raw", "missing"));

    let err = build_err(&manifest);

    assert_eq!(err.class, ErrorClass::NotFound);
    assert_eq!(err.origin, ErrorOrigin::Pipeline);
}

#[test]
fn unknown_relation_is_rejected() {
    let manifest = fixture_manifest().with_stage(
        StageDecl::new("extra", "raw", "check").output("nowhere", MergePolicy::Append),
    );

    let err = build_err(&manifest);

    assert_eq!(err.class, ErrorClass::NotFound);
    assert_eq!(err.origin, ErrorOrigin::Manifest);
    assert!(err.message.contains("'nowhere'"));
}

#[test]
fn duplicate_relation_and_stage_names_are_rejected() {
    let manifest = fixture_manifest().with_relation(
        RelationSchema::stream("raw")
            .with_field("user", ValueKind::Int)
            .partitioned_by("user"),
    );
    assert_eq!(build_err(&manifest).class, ErrorClass::InvariantViolation);

    let manifest = fixture_manifest().with_stage(StageDecl::new("check", "raw", "check"));
    let err = build_err(&manifest);
    assert_eq!(err.class, ErrorClass::InvariantViolation);
    assert!(err.message.contains("stage 'check'"));
}

#[test]
fn stage_bound_to_table_is_rejected() {
    let manifest =
        fixture_manifest().with_stage(StageDecl::new("from_table", "per_user", "count_item"));

    let err = build_err(&manifest);

    assert_eq!(err.class, ErrorClass::Unsupported);
    assert!(err.message.contains("stages bind to streams"));
}

#[test]
fn merge_policy_must_match_target_kind() {
    let mut manifest = fixture_manifest();
    manifest.stages[2].outputs[0].merge = MergePolicy::Append;
    assert_eq!(build_err(&manifest).class, ErrorClass::Unsupported);

    let mut manifest = fixture_manifest();
    manifest.stages[0].outputs[0].merge = MergePolicy::Insert;
    assert_eq!(build_err(&manifest).class, ErrorClass::Unsupported);
}

#[test]
fn additive_column_must_be_non_key_int() {
    let mut manifest = fixture_manifest();
    manifest.stages[2].outputs[0].merge = MergePolicy::additive("label");
    assert!(build_err(&manifest).message.contains("per_item.label"));

    let mut manifest = fixture_manifest();
    manifest.stages[2].outputs[0].merge = MergePolicy::additive("item");
    assert!(build_err(&manifest).message.contains("per_item.item"));
}

#[test]
fn writes_to_reference_relations_are_rejected() {
    let mut manifest = fixture_manifest();
    manifest.stages[0].outputs.push(crate::model::OutputDecl {
        target: "labels".to_string(),
        merge: MergePolicy::Replace,
        shuffle: true,
    });

    let err = build_err(&manifest);

    assert!(err.message.contains("writes reference relation 'labels'"));
}

#[test]
fn unbound_stream_is_rejected() {
    let manifest = fixture_manifest().with_relation(
        RelationSchema::stream("orphan")
            .with_field("user", ValueKind::Int)
            .partitioned_by("user"),
    );

    let err = build_err(&manifest);

    assert_eq!(err.class, ErrorClass::Unsupported);
    assert!(err.message.contains("'orphan' has no bound stage"));
}

#[test]
fn stream_cycle_is_rejected() {
    let mut manifest = fixture_manifest();
    manifest.stages[2].outputs.push(crate::model::OutputDecl {
        target: "raw".to_string(),
        merge: MergePolicy::Append,
        shuffle: true,
    });

    let err = build_err(&manifest);

    assert_eq!(err.origin, ErrorOrigin::Manifest);
    assert!(
        err.message.contains("by_item -> raw -> checked -> by_item"),
        "cycle error should name the path, got: {}",
        err.message
    );
}

#[test]
fn table_without_primary_key_is_rejected() {
    let manifest = fixture_manifest().with_relation(
        RelationSchema::table("keyless")
            .with_field("user", ValueKind::Int)
            .partitioned_by("user"),
    );

    let err = build_err(&manifest);

    assert!(err.message.contains("must declare a primary key"));
}

#[test]
fn manifest_partition_column_must_exist() {
    let manifest = fixture_manifest().with_relation(
        RelationSchema::table("bad_partition")
            .with_field("user", ValueKind::Int)
            .with_primary_key(&["user"])
            .partitioned_by("part_id"),
    );

    let err = build_err(&manifest);

    assert_eq!(err.origin, ErrorOrigin::Router);
    assert_eq!(err.class, ErrorClass::Unsupported);
}
