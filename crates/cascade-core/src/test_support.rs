//! Shared fixtures for in-crate tests.
//!
//! The fixture pipeline has two partition domains:
//! `raw -> check -> checked -> count_user -> per_user` by `user`, and a
//! shuffle from `count_user` into `by_item -> count_item -> per_item` by `item`.

use crate::{
    model::{DeploymentManifest, MergePolicy, RelationSchema, StageDecl},
    pipeline::{Pipeline, TransformRegistry},
    transform::{TransformContext, TransformError, TransformOutput},
    tuple::{RowKey, Tuple},
    value::ValueKind,
};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static LOGGER: Once = Once::new();

/// Route `tracing` output to the test harness; `RUST_LOG` controls the filter.
pub(crate) fn init_test_logger() {
    LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub(crate) fn fixture_manifest() -> DeploymentManifest {
    DeploymentManifest::new()
        .with_relation(
            RelationSchema::reference("labels")
                .with_field("item", ValueKind::Int)
                .with_field("label", ValueKind::Text)
                .with_primary_key(&["item"]),
        )
        .with_relation(
            RelationSchema::stream("raw")
                .with_field("user", ValueKind::Int)
                .with_field("item", ValueKind::Int)
                .partitioned_by("user"),
        )
        .with_relation(
            RelationSchema::stream("checked")
                .with_field("user", ValueKind::Int)
                .with_field("item", ValueKind::Int)
                .with_field("label", ValueKind::Text)
                .partitioned_by("user"),
        )
        .with_relation(
            RelationSchema::table("per_user")
                .with_field("user", ValueKind::Int)
                .with_field("total", ValueKind::Int)
                .with_primary_key(&["user"])
                .partitioned_by("user"),
        )
        .with_relation(
            RelationSchema::stream("by_item")
                .with_field("item", ValueKind::Int)
                .with_field("label", ValueKind::Text)
                .partitioned_by("item"),
        )
        .with_relation(
            RelationSchema::table("per_item")
                .with_field("item", ValueKind::Int)
                .with_field("label", ValueKind::Text)
                .with_field("total", ValueKind::Int)
                .with_primary_key(&["item", "label"])
                .partitioned_by("item"),
        )
        .with_stage(
            StageDecl::new("check", "raw", "check")
                .output("checked", MergePolicy::Append)
                .lookup("labels"),
        )
        .with_stage(
            StageDecl::new("count_user", "checked", "count_user")
                .output("per_user", MergePolicy::additive("total"))
                .shuffle_output("by_item", MergePolicy::Append),
        )
        .with_stage(
            StageDecl::new("count_item", "by_item", "count_item")
                .output("per_item", MergePolicy::additive("total")),
        )
}

// Negative items are rejected; unknown items abort.
fn check(input: &[Tuple], ctx: &TransformContext<'_>) -> Result<TransformOutput, TransformError> {
    let mut out = TransformOutput::new();

    for row in input {
        let item = row
            .int("item")
            .ok_or_else(|| TransformError::failed("raw row without item"))?;
        if item < 0 {
            out.reject(format!("item {item} is negative"));
            continue;
        }

        let label = ctx.require("labels", &RowKey::of(item))?;
        out.emit(
            "checked",
            row.clone()
                .with("label", label.get("label").cloned().unwrap_or_default()),
        );
    }

    Ok(out)
}

fn count_user(input: &[Tuple], _: &TransformContext<'_>) -> Result<TransformOutput, TransformError> {
    let mut out = TransformOutput::new();

    for row in input {
        let user = row.get("user").cloned().unwrap_or_default();
        let item = row.get("item").cloned().unwrap_or_default();
        let label = row.get("label").cloned().unwrap_or_default();

        out.emit("per_user", Tuple::new().with("user", user).with("total", 1));
        out.emit("by_item", Tuple::new().with("item", item).with("label", label));
    }

    Ok(out)
}

fn count_item(input: &[Tuple], _: &TransformContext<'_>) -> Result<TransformOutput, TransformError> {
    let mut out = TransformOutput::new();

    for row in input {
        out.emit("per_item", row.clone().with("total", 1));
    }

    Ok(out)
}

pub(crate) fn fixture_transforms() -> TransformRegistry {
    let mut registry = TransformRegistry::new();
    registry
        .register("check", check)
        .expect("check should register once");
    registry
        .register("count_user", count_user)
        .expect("count_user should register once");
    registry
        .register("count_item", count_item)
        .expect("count_item should register once");

    registry
}

pub(crate) fn fixture_pipeline() -> Pipeline {
    Pipeline::build(&fixture_manifest(), &fixture_transforms())
        .expect("fixture manifest should build")
}

/// Reference rows for `labels`: items 1..=3.
pub(crate) fn fixture_labels() -> Vec<Tuple> {
    [(1, "alpha"), (2, "beta"), (3, "gamma")]
        .into_iter()
        .map(|(item, label)| Tuple::new().with("item", item).with("label", label))
        .collect()
}

pub(crate) fn raw(user: i64, item: i64) -> Tuple {
    Tuple::new().with("user", user).with("item", item)
}
