//! Process-wide model registry: qualified entity name -> prototype shape.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::ModelError;
use crate::model::reflect::{Reflect, Shape};

/// A registered prototype and the name it was registered under.
#[derive(Clone, Debug)]
pub struct RegisteredModel {
    pub name: String,
    pub prototype: Arc<Shape>,
}

impl RegisteredModel {
    /// Schema part of a `schema.entity` name.
    pub fn schema(&self) -> Option<&str> {
        self.name.split_once('.').map(|(schema, _)| schema)
    }

    pub fn entity(&self) -> &str {
        self.name.split_once('.').map(|(_, entity)| entity).unwrap_or(&self.name)
    }
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<Shape>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a prototype. Fails if the name is taken or the shape does not
    /// unwrap to a record; an earlier registration is never replaced.
    pub fn register(&self, name: &str, prototype: Shape) -> Result<(), ModelError> {
        if prototype.unwrap_record().is_none() {
            return Err(ModelError::InvalidShape(name.to_string()));
        }
        let mut models = self.models.write().unwrap_or_else(PoisonError::into_inner);
        if models.contains_key(name) {
            return Err(ModelError::AlreadyRegistered(name.to_string()));
        }
        models.insert(name.to_string(), Arc::new(prototype));
        tracing::debug!(model = %name, "registered model");
        Ok(())
    }

    pub fn register_type<T: Reflect + ?Sized>(&self, name: &str) -> Result<(), ModelError> {
        self.register(name, T::shape())
    }

    /// Looks up `schema.entity`, then bare `entity`.
    pub fn resolve(&self, schema: &str, entity: &str) -> Result<RegisteredModel, ModelError> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        let qualified = if schema.is_empty() {
            entity.to_string()
        } else {
            format!("{}.{}", schema, entity)
        };
        for key in [qualified.as_str(), entity] {
            if let Some(prototype) = models.get(key) {
                return Ok(RegisteredModel {
                    name: key.to_string(),
                    prototype: Arc::clone(prototype),
                });
            }
        }
        Err(ModelError::NotFound(qualified))
    }

    /// Snapshot of every registration.
    pub fn all(&self) -> HashMap<String, Arc<Shape>> {
        self.models.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
