//! Persistence for stack resources.
//!
//! Every write bumps a store-wide revision which is stamped on the written
//! resource. Updates must carry the revision they were read at, so a stale
//! write fails with [`StoreError::Conflict`] instead of clobbering a newer one.

use crate::error::StoreError;
use crate::resource::StackResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait ResourceStore {
    fn get(&self, name: &str, namespace: &str) -> Result<StackResource, StoreError>;

    fn list(&self, namespace: &str) -> Result<Vec<StackResource>, StoreError>;

    fn create(&self, resource: &StackResource) -> Result<StackResource, StoreError>;

    fn update(&self, resource: &StackResource) -> Result<StackResource, StoreError>;

    fn delete(&self, resource: &StackResource) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    #[serde(default)]
    pub revision: u64,
    /// namespace -> name -> resource
    #[serde(default)]
    pub resources: BTreeMap<String, BTreeMap<String, StackResource>>,
}

impl StoreState {
    fn not_found(name: &str, namespace: &str) -> StoreError {
        StoreError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn get(&self, name: &str, namespace: &str) -> Result<StackResource, StoreError> {
        self.resources
            .get(namespace)
            .and_then(|resources| resources.get(name))
            .cloned()
            .ok_or_else(|| Self::not_found(name, namespace))
    }

    fn list(&self, namespace: &str) -> Vec<StackResource> {
        self.resources
            .get(namespace)
            .map(|resources| resources.values().cloned().collect())
            .unwrap_or_default()
    }

    fn create(&mut self, resource: &StackResource) -> Result<StackResource, StoreError> {
        let namespace = self.resources.entry(resource.namespace().to_string()).or_default();
        if namespace.contains_key(resource.name()) {
            return Err(StoreError::AlreadyExists {
                namespace: resource.namespace().to_string(),
                name: resource.name().to_string(),
            });
        }

        self.revision += 1;
        let mut stored = resource.clone();
        stored.metadata.resource_version = self.revision;
        namespace.insert(stored.name().to_string(), stored.clone());
        Ok(stored)
    }

    fn update(&mut self, resource: &StackResource) -> Result<StackResource, StoreError> {
        let next = self.revision + 1;
        let existing = self
            .resources
            .get_mut(resource.namespace())
            .and_then(|resources| resources.get_mut(resource.name()))
            .ok_or_else(|| Self::not_found(resource.name(), resource.namespace()))?;

        if existing.metadata.resource_version != resource.metadata.resource_version {
            return Err(StoreError::Conflict {
                name: resource.name().to_string(),
                expected: resource.metadata.resource_version,
                actual: existing.metadata.resource_version,
            });
        }

        let mut stored = resource.clone();
        stored.metadata.resource_version = next;
        *existing = stored.clone();
        self.revision = next;
        Ok(stored)
    }

    fn delete(&mut self, resource: &StackResource) -> Result<(), StoreError> {
        self.resources
            .get_mut(resource.namespace())
            .and_then(|resources| resources.remove(resource.name()))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(resource.name(), resource.namespace()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Io(std::io::Error::other("memory store lock poisoned")))?;
        f(&mut state)
    }
}

impl ResourceStore for MemoryStore {
    fn get(&self, name: &str, namespace: &str) -> Result<StackResource, StoreError> {
        self.with_state(|state| state.get(name, namespace))
    }

    fn list(&self, namespace: &str) -> Result<Vec<StackResource>, StoreError> {
        self.with_state(|state| Ok(state.list(namespace)))
    }

    fn create(&self, resource: &StackResource) -> Result<StackResource, StoreError> {
        self.with_state(|state| state.create(resource))
    }

    fn update(&self, resource: &StackResource) -> Result<StackResource, StoreError> {
        self.with_state(|state| state.update(resource))
    }

    fn delete(&self, resource: &StackResource) -> Result<(), StoreError> {
        self.with_state(|state| state.delete(resource))
    }
}

/// A store persisted as a single JSON document. Each call reads the file and
/// every write saves it back.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> Option<PathBuf> {
        let base = dirs::data_dir()?;
        Some(base.join("stacksync").join("resources.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreState, StoreError> {
        if !self.path.exists() {
            return Ok(StoreState::default());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    fn modify<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.load()?;
        let result = f(&mut state)?;
        self.save(&state)?;
        Ok(result)
    }
}

impl ResourceStore for FileStore {
    fn get(&self, name: &str, namespace: &str) -> Result<StackResource, StoreError> {
        self.load()?.get(name, namespace)
    }

    fn list(&self, namespace: &str) -> Result<Vec<StackResource>, StoreError> {
        Ok(self.load()?.list(namespace))
    }

    fn create(&self, resource: &StackResource) -> Result<StackResource, StoreError> {
        self.modify(|state| state.create(resource))
    }

    fn update(&self, resource: &StackResource) -> Result<StackResource, StoreError> {
        self.modify(|state| state.update(resource))
    }

    fn delete(&self, resource: &StackResource) -> Result<(), StoreError> {
        self.modify(|state| state.delete(resource))
    }
}
