//! Registry of validated entity metadata, shared by mappers.
//!
//! Created once at startup and handed to whoever needs it; nothing here is
//! global, so tests get their own registry and invalidation is explicit.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{MapperError, Result};
use crate::metadata::{EntityDefinition, EntityMetadata};

#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entities: DashMap<String, Arc<EntityMetadata>>,
}

impl MetadataRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register `def` under `name`, replacing any previous entry.
    ///
    /// # Errors
    /// Returns `MapperError::InvalidMetadata` if the definition is invalid.
    pub fn register(&self, name: &str, def: EntityDefinition) -> Result<Arc<EntityMetadata>> {
        let meta = Arc::new(EntityMetadata::new(name, def)?);
        tracing::debug!(entity = name, table = meta.table(), "Registered entity metadata");
        self.entities.insert(name.to_owned(), meta.clone());
        Ok(meta)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        self.entities.get(name).map(|e| e.value().clone())
    }

    /// # Errors
    /// Returns `MapperError::InvalidConfig` when `name` was never registered.
    pub fn require(&self, name: &str) -> Result<Arc<EntityMetadata>> {
        self.get(name)
            .ok_or_else(|| MapperError::InvalidConfig(format!("unknown entity '{name}'")))
    }

    /// Drop one entry. Mappers already holding it keep their copy.
    #[must_use]
    pub fn invalidate(&self, name: &str) -> bool {
        self.entities.remove(name).is_some()
    }

    pub fn clear(&self) {
        self.entities.clear();
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
