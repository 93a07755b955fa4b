//! Platform instance configuration.
//!
//! A platform instance names the stack repositories to track and carries the
//! pipeline and trigger definitions used when a catalog omits its own.

use crate::error::ConfigError;
use crate::index::{Pipeline, Trigger};
use crate::resource::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SERVICE_ACCOUNT: &str = "stacksync-operator";
pub const PUBLIC_GITHUB_HOST: &str = "github.com";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInstance {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PlatformSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    #[serde(default)]
    pub stacks: StackConfig,
    #[serde(default)]
    pub fetch: FetchSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackConfig {
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FetchSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_service_account")]
    pub service_account: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_service_account() -> String {
    DEFAULT_SERVICE_ACCOUNT.to_string()
}

impl PlatformInstance {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn repositories(&self) -> &[RepositoryConfig] {
        &self.spec.stacks.repositories
    }

    /// Owner reference stamped on every stack resource this instance creates.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
        }
    }

    /// Pipelines handed to the normalizer for one repository. Repository level
    /// pipelines win over platform level ones; an empty result means the
    /// catalog's own pipelines are kept.
    pub fn pipelines_for<'a>(&'a self, repository: &'a RepositoryConfig) -> &'a [Pipeline] {
        if repository.pipelines.is_empty() {
            &self.spec.stacks.pipelines
        } else {
            &repository.pipelines
        }
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.spec.stacks.triggers
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    pub name: String,
    #[serde(default)]
    pub https: HttpsConfig,
    #[serde(default)]
    pub git_release: GitReleaseSpec,
    #[serde(default)]
    pub pipelines: Vec<Pipeline>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpsConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub skip_cert_verification: bool,
    #[serde(default)]
    pub request_oauth_token: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GitReleaseSpec {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub asset_name: String,
    #[serde(default)]
    pub skip_cert_verification: bool,
}

impl GitReleaseSpec {
    /// Release mode is only usable when every coordinate is present.
    pub fn is_usable(&self) -> bool {
        !self.hostname.is_empty()
            && !self.organization.is_empty()
            && !self.project.is_empty()
            && !self.release.is_empty()
            && !self.asset_name.is_empty()
    }

    pub fn download_url(&self) -> String {
        format!(
            "https://{}/{}/{}/releases/download/{}/{}",
            self.hostname, self.organization, self.project, self.release, self.asset_name
        )
    }
}

impl fmt::Display for GitReleaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}@{} (asset {})",
            self.hostname, self.organization, self.project, self.release, self.asset_name
        )
    }
}

/// Where a repository's index is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLocation<'a> {
    Release(&'a GitReleaseSpec),
    Https(&'a HttpsConfig),
}

impl RepositoryConfig {
    /// Release mode wins when complete, then the https url. `None` means the
    /// repository cannot be resolved at all.
    pub fn location(&self) -> Option<IndexLocation<'_>> {
        if self.git_release.is_usable() {
            Some(IndexLocation::Release(&self.git_release))
        } else if !self.https.url.is_empty() {
            Some(IndexLocation::Https(&self.https))
        } else {
            None
        }
    }

    /// Url recorded on every version record sourced from this repository.
    pub fn source_url(&self) -> String {
        match self.location() {
            Some(IndexLocation::Release(release)) => release.download_url(),
            Some(IndexLocation::Https(https)) => https.url.clone(),
            None => String::new(),
        }
    }
}
