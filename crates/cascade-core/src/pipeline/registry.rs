use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    pipeline::stage::TriggerStage,
    transform::Transform,
};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error as ThisError;

///
/// RegistryError
///

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("transform '{0}' not found")]
    TransformNotFound(String),

    #[error("transform '{0}' already registered")]
    TransformAlreadyRegistered(String),
}

impl RegistryError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::TransformNotFound(_) => ErrorClass::NotFound,
            Self::TransformAlreadyRegistered(_) => ErrorClass::InvariantViolation,
        }
    }
}

impl From<RegistryError> for InternalError {
    fn from(err: RegistryError) -> Self {
        Self::new(err.class(), ErrorOrigin::Pipeline, err.to_string())
    }
}

///
/// TransformRegistry
///
/// Transform identities named by stage declarations.
///

#[derive(Default)]
pub struct TransformRegistry {
    transforms: BTreeMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform under its identity.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        transform: impl Transform + 'static,
    ) -> Result<(), InternalError> {
        let id = id.into();
        if self.transforms.contains_key(&id) {
            return Err(RegistryError::TransformAlreadyRegistered(id).into());
        }

        self.transforms.insert(id, Arc::new(transform));
        Ok(())
    }

    /// Look up a transform by identity.
    pub fn try_get(&self, id: &str) -> Result<Arc<dyn Transform>, InternalError> {
        self.transforms
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::TransformNotFound(id.to_string()).into())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.transforms.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

///
/// StageRegistry
///
/// Input relation -> bound stages, in deployment order.
///

#[derive(Debug, Default)]
pub struct StageRegistry {
    stages: Vec<TriggerStage>,
    bindings: BTreeMap<String, Vec<usize>>,
}

impl StageRegistry {
    pub(crate) fn push(&mut self, stage: TriggerStage) {
        let index = self.stages.len();
        self.bindings
            .entry(stage.input.clone())
            .or_default()
            .push(index);
        self.stages.push(stage);
    }

    /// Stages bound to `relation`, in deployment order.
    pub fn bound(&self, relation: &str) -> impl Iterator<Item = &TriggerStage> {
        self.bindings
            .get(relation)
            .into_iter()
            .flatten()
            .map(|index| &self.stages[*index])
    }

    #[must_use]
    pub fn is_bound(&self, relation: &str) -> bool {
        self.bindings.contains_key(relation)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TriggerStage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// All stages in deployment order.
    pub fn iter(&self) -> impl Iterator<Item = &TriggerStage> {
        self.stages.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
