use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    tuple::Tuple,
    value::ValueKind,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

///
/// RelationKind
///

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Ephemeral, partition-scoped buffer drained by its bound stages.
    Stream,
    /// Durable partitioned table mutated only through merge policies.
    Table,
    /// Read-only lookup data, replicated to every partition.
    Reference,
}

impl RelationKind {
    #[must_use]
    pub const fn is_stream(self) -> bool {
        matches!(self, Self::Stream)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stream => "stream",
            Self::Table => "table",
            Self::Reference => "reference",
        };
        write!(f, "{label}")
    }
}

///
/// FieldSchema
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSchema {
    pub name: String,
    pub kind: ValueKind,
    #[serde(default)]
    pub nullable: bool,
}

///
/// RelationSchema
///
/// Declared shape of one relation: ordered fields, primary key and
/// partition column. A missing partition key means the relation is
/// replicated, which only reference relations may be.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RelationSchema {
    pub name: String,
    pub kind: RelationKind,
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub partition_key: Option<String>,
}

impl RelationSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fields: Vec::new(),
            primary_key: Vec::new(),
            partition_key: None,
        }
    }

    #[must_use]
    pub fn stream(name: impl Into<String>) -> Self {
        Self::new(name, RelationKind::Stream)
    }

    #[must_use]
    pub fn table(name: impl Into<String>) -> Self {
        Self::new(name, RelationKind::Table)
    }

    #[must_use]
    pub fn reference(name: impl Into<String>) -> Self {
        Self::new(name, RelationKind::Reference)
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            kind,
            nullable: false,
        });
        self
    }

    #[must_use]
    pub fn with_nullable_field(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            kind,
            nullable: true,
        });
        self
    }

    #[must_use]
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn partitioned_by(mut self, column: impl Into<String>) -> Self {
        self.partition_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|field| field.name == name)
    }

    #[must_use]
    pub const fn is_replicated(&self) -> bool {
        self.partition_key.is_none()
    }

    /// Check one tuple against the declared fields.
    pub fn check_tuple(&self, tuple: &Tuple) -> Result<(), SchemaError> {
        for (name, value) in tuple.iter() {
            let Some(field) = self.field(name) else {
                return Err(SchemaError::UnknownField {
                    relation: self.name.clone(),
                    field: name.to_string(),
                });
            };

            match value.kind() {
                None if !field.nullable => {
                    return Err(SchemaError::NullField {
                        relation: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
                Some(found) if found != field.kind => {
                    return Err(SchemaError::KindMismatch {
                        relation: self.name.clone(),
                        field: field.name.clone(),
                        expected: field.kind,
                        found,
                    });
                }
                _ => {}
            }
        }

        for field in &self.fields {
            if !field.nullable && tuple.get(&field.name).is_none() {
                return Err(SchemaError::MissingField {
                    relation: self.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        Ok(())
    }
}

///
/// SchemaError
///
/// A tuple does not match the schema of the relation it was written to.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum SchemaError {
    #[error("relation '{relation}' has no field '{field}'")]
    UnknownField { relation: String, field: String },

    #[error("relation '{relation}' requires field '{field}'")]
    MissingField { relation: String, field: String },

    #[error("relation '{relation}' field '{field}' must not be null")]
    NullField { relation: String, field: String },

    #[error("relation '{relation}' field '{field}' expects {expected}, found {found}")]
    KindMismatch {
        relation: String,
        field: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

impl From<SchemaError> for InternalError {
    fn from(err: SchemaError) -> Self {
        Self::new(ErrorClass::Transform, ErrorOrigin::Store, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn vote_schema() -> RelationSchema {
        RelationSchema::stream("s1")
            .with_field("phone_number", ValueKind::Int)
            .with_field("contestant_number", ValueKind::Int)
            .with_nullable_field("state", ValueKind::Text)
            .partitioned_by("phone_number")
    }

    #[test]
    fn check_tuple_accepts_missing_nullable_field() {
        let tuple = Tuple::new()
            .with("phone_number", 5_551_234_i64)
            .with("contestant_number", 7);

        vote_schema()
            .check_tuple(&tuple)
            .expect("nullable field may be omitted");
    }

    #[test]
    fn check_tuple_rejects_unknown_missing_and_mistyped_fields() {
        let schema = vote_schema();

        let unknown = Tuple::new()
            .with("phone_number", 1)
            .with("contestant_number", 7)
            .with("bogus", 1);
        assert!(matches!(
            schema.check_tuple(&unknown),
            Err(SchemaError::UnknownField { .. })
        ));

        let missing = Tuple::new().with("phone_number", 1);
        assert!(matches!(
            schema.check_tuple(&missing),
            Err(SchemaError::MissingField { field, .. }) if field == "contestant_number"
        ));

        let mistyped = Tuple::new()
            .with("phone_number", "555")
            .with("contestant_number", 7);
        assert!(matches!(
            schema.check_tuple(&mistyped),
            Err(SchemaError::KindMismatch {
                expected: ValueKind::Int,
                found: ValueKind::Text,
                ..
            })
        ));
    }

    #[test]
    fn check_tuple_rejects_null_in_required_field() {
        let tuple = Tuple::new()
            .with("phone_number", Value::Null)
            .with("contestant_number", 7);

        assert!(matches!(
            vote_schema().check_tuple(&tuple),
            Err(SchemaError::NullField { .. })
        ));
    }

    #[test]
    fn schema_error_maps_to_transform_class() {
        let err: InternalError = SchemaError::MissingField {
            relation: "s1".to_string(),
            field: "phone_number".to_string(),
        }
        .into();

        assert_eq!(err.class, ErrorClass::Transform);
        assert_eq!(err.origin, ErrorOrigin::Store);
    }
}
