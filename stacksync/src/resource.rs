//! Locally tracked stack resources.
//!
//! The version list is the only source of truth. The `version`,
//! `desiredState` and `repositoryUrl` fields of older records are read so
//! they can be migrated into the list, and are never written back.

use serde::{Deserialize, Serialize};

pub const STACK_API_VERSION: &str = "stacksync.io/v1alpha1";
pub const STACK_KIND: &str = "Stack";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    /// Revision used for optimistic concurrency. Assigned by the store.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub version: String,
    #[serde(default)]
    pub repository_url: String,
    /// Empty when the record is managed by catalog sync. Anything else was set
    /// by an administrator and is never touched by sync.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desired_state: String,
}

impl VersionRecord {
    pub fn from_catalog(version: impl Into<String>, repository_url: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            repository_url: repository_url.into(),
            desired_state: String::new(),
        }
    }

    pub fn is_pinned(&self) -> bool {
        !self.desired_state.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackResource {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: StackSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
    #[serde(default, rename = "version", skip_serializing)]
    legacy_version: Option<String>,
    #[serde(default, rename = "desiredState", skip_serializing)]
    legacy_desired_state: Option<String>,
    #[serde(default, rename = "repositoryUrl", skip_serializing)]
    legacy_repository_url: Option<String>,
}

impl StackSpec {
    pub fn new(name: impl Into<String>, versions: Vec<VersionRecord>) -> Self {
        Self {
            name: name.into(),
            versions,
            ..Self::default()
        }
    }

    /// Builds a spec in the single-version layout used before the version list
    /// existed.
    pub fn legacy(
        name: impl Into<String>,
        version: impl Into<String>,
        repository_url: impl Into<String>,
        desired_state: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            versions: Vec::new(),
            legacy_version: Some(version.into()),
            legacy_desired_state: Some(desired_state.into()),
            legacy_repository_url: Some(repository_url.into()),
        }
    }

    pub fn has_legacy_fields(&self) -> bool {
        self.legacy_version.is_some()
            || self.legacy_desired_state.is_some()
            || self.legacy_repository_url.is_some()
    }

    /// Moves the legacy singleton fields into the version list when the list
    /// is empty, then drops them.
    pub fn migrate_legacy(&mut self) {
        let version = self.legacy_version.take().unwrap_or_default();
        let desired_state = self.legacy_desired_state.take().unwrap_or_default();
        let repository_url = self.legacy_repository_url.take().unwrap_or_default();

        if self.versions.is_empty() && !version.is_empty() {
            self.versions.push(VersionRecord {
                version,
                repository_url,
                desired_state,
            });
        }
    }
}

impl StackResource {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            api_version: STACK_API_VERSION.to_string(),
            kind: STACK_KIND.to_string(),
            metadata: ObjectMeta {
                name: name.clone(),
                namespace: namespace.into(),
                ..ObjectMeta::default()
            },
            spec: StackSpec::new(name, Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn versions(&self) -> &[VersionRecord] {
        &self.spec.versions
    }

    pub fn current(&self) -> Option<&VersionRecord> {
        self.spec.versions.first()
    }

    pub fn version(&self) -> &str {
        self.current().map(|record| record.version.as_str()).unwrap_or("")
    }

    pub fn desired_state(&self) -> &str {
        self.current()
            .map(|record| record.desired_state.as_str())
            .unwrap_or("")
    }

    pub fn repository_url(&self) -> &str {
        self.current()
            .map(|record| record.repository_url.as_str())
            .unwrap_or("")
    }

    /// Content comparison that ignores the store-assigned revision.
    pub fn same_content(&self, other: &StackResource) -> bool {
        self.api_version == other.api_version
            && self.kind == other.kind
            && self.metadata.name == other.metadata.name
            && self.metadata.namespace == other.metadata.namespace
            && self.metadata.uid == other.metadata.uid
            && self.metadata.owner_references == other.metadata.owner_references
            && self.spec == other.spec
    }
}
