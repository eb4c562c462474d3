use crate::pipeline::PartitionError;
use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable internal classification.
/// Every failure that aborts a cascade surfaces as one of these; business-rule
/// rejections never do.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    /// Construct an InternalError without structured detail.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct an executor-origin invariant violation.
    pub(crate) fn executor_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Executor,
            message.into(),
        )
    }

    /// Construct a store-origin invariant violation.
    pub(crate) fn store_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Store,
            message.into(),
        )
    }

    /// Construct a transaction-origin invariant violation.
    pub(crate) fn transaction_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Transaction,
            message.into(),
        )
    }

    /// Construct a transaction conflict; the caller may retry the submission.
    pub(crate) fn transaction_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, ErrorOrigin::Transaction, message.into())
    }

    /// Construct an interface-origin unsupported error.
    pub(crate) fn interface_unsupported(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::Unsupported,
            ErrorOrigin::Interface,
            message.into(),
        )
    }

    /// Construct a standardized unknown-relation error.
    pub fn unknown_relation(origin: ErrorOrigin, relation: impl Into<String>) -> Self {
        let relation = relation.into();

        Self::new(
            ErrorClass::NotFound,
            origin,
            format!("unknown relation: '{relation}'"),
        )
    }

    /// Wrap a stream leak detected by the commit-time emptiness check.
    #[must_use]
    pub fn stream_leak(leak: StreamLeak) -> Self {
        Self {
            class: ErrorClass::InvariantViolation,
            origin: ErrorOrigin::Transaction,
            message: leak.to_string(),
            detail: Some(ErrorDetail::Stream(leak)),
        }
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.class, ErrorClass::Conflict)
    }

    #[must_use]
    pub const fn is_reference_integrity(&self) -> bool {
        matches!(self.class, ErrorClass::ReferenceIntegrity)
    }

    #[must_use]
    pub const fn is_stream_leak(&self) -> bool {
        matches!(self.detail, Some(ErrorDetail::Stream(_)))
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorDetail
///
/// Structured, origin-specific error detail carried by [`InternalError`].
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Stream(StreamLeak),
    #[error("{0}")]
    Partition(PartitionError),
}

///
/// StreamLeak
///
/// A stream relation still held rows when its transaction tried to commit.
/// Always an implementation defect; never recoverable.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error(
    "stream leak: relation '{relation}' holds {rows} unconsumed row(s) in partition {partition} at commit"
)]
pub struct StreamLeak {
    pub relation: String,
    pub partition: usize,
    pub rows: usize,
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Internal,
    Conflict,
    NotFound,
    Unsupported,
    InvariantViolation,
    ReferenceIntegrity,
    PartitionMismatch,
    Transform,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Internal => "internal",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Unsupported => "unsupported",
            Self::InvariantViolation => "invariant_violation",
            Self::ReferenceIntegrity => "reference_integrity",
            Self::PartitionMismatch => "partition_mismatch",
            Self::Transform => "transform",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Manifest,
    Router,
    Pipeline,
    Executor,
    Store,
    Transaction,
    Config,
    Interface,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Manifest => "manifest",
            Self::Router => "router",
            Self::Pipeline => "pipeline",
            Self::Executor => "executor",
            Self::Store => "store",
            Self::Transaction => "transaction",
            Self::Config => "config",
            Self::Interface => "interface",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_leak_carries_detail_and_invariant_class() {
        let err = InternalError::stream_leak(StreamLeak {
            relation: "s2".to_string(),
            partition: 3,
            rows: 1,
        });

        assert_eq!(err.class, ErrorClass::InvariantViolation);
        assert_eq!(err.origin, ErrorOrigin::Transaction);
        assert!(err.is_stream_leak());
        assert!(
            err.message.contains("'s2'") && err.message.contains("partition 3"),
            "leak message should name the relation and partition"
        );
    }

    #[test]
    fn display_with_class_prefixes_origin_and_class() {
        let err = InternalError::transaction_conflict("partition 1 is busy");

        assert_eq!(
            err.display_with_class(),
            "transaction:conflict: partition 1 is busy"
        );
        assert!(err.is_conflict());
    }
}
