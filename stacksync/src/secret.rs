//! Credential secrets and the rules for picking one.

use crate::error::CredentialError;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Annotation keys with this prefix mark a secret as intended for git hosts.
pub const GIT_ANNOTATION_PREFIX: &str = "domain.io/git-";
pub const SERVICE_ACCOUNT_ANNOTATION: &str = "kubernetes.io/service-account.name";
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSecret {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, rename = "type")]
    pub secret_type: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl CredentialSecret {
    pub fn password(&self) -> Option<&str> {
        self.data.get("password").map(String::as_str)
    }

    pub fn token(&self) -> Option<&str> {
        self.data.get("token").map(String::as_str)
    }
}

/// Picks the secret whose annotations point at `hostname`.
///
/// An annotation counts when its value is an http(s) url whose host equals
/// `hostname`. Matches under a [`GIT_ANNOTATION_PREFIX`] key beat all other
/// matches, and among those the lexically smallest key wins. Without one,
/// the first secret with any matching annotation is used, so that path is
/// only as deterministic as the order of `candidates`.
pub fn select_secret<'a>(
    candidates: &'a [CredentialSecret],
    hostname: &str,
) -> Option<&'a CredentialSecret> {
    let mut keyed: Option<(&'a str, &'a CredentialSecret)> = None;
    let mut unkeyed: Option<&'a CredentialSecret> = None;

    for secret in candidates {
        for (key, value) in &secret.annotations {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                continue;
            }

            let url = match Url::parse(value) {
                Ok(url) => url,
                Err(err) => {
                    warn!(
                        secret = %secret.name,
                        annotation = %key,
                        "unable to parse secret annotation url: {err}"
                    );
                    continue;
                }
            };

            if !url.host_str().is_some_and(|host| same_host(host, hostname)) {
                continue;
            }

            if key.starts_with(GIT_ANNOTATION_PREFIX) {
                let smaller = keyed.map_or(true, |(best, _)| key.as_str() < best);
                if smaller {
                    keyed = Some((key.as_str(), secret));
                }
            } else if unkeyed.is_none() {
                unkeyed = Some(secret);
            }
        }
    }

    let selected = keyed.map(|(_, secret)| secret).or(unkeyed);
    if let Some(secret) = selected {
        debug!(secret = %secret.name, hostname, "selected credential secret");
    }
    selected
}

/// Hostnames compare case-insensitively, with IPv6 brackets ignored.
fn same_host(host: &str, hostname: &str) -> bool {
    let unbracket = |value: &str| value.trim_start_matches('[').trim_end_matches(']').to_string();
    unbracket(host).eq_ignore_ascii_case(&unbracket(hostname))
}

/// Finds the token secret of the operator's own service account.
pub fn select_service_account_secret<'a>(
    candidates: &'a [CredentialSecret],
    namespace: &str,
    account: &str,
) -> Result<&'a CredentialSecret, CredentialError> {
    candidates
        .iter()
        .find(|secret| {
            secret.secret_type == SERVICE_ACCOUNT_TOKEN_TYPE
                && secret
                    .annotations
                    .get(SERVICE_ACCOUNT_ANNOTATION)
                    .is_some_and(|value| value == account)
        })
        .ok_or_else(|| CredentialError::NotFound {
            namespace: namespace.to_string(),
            account: account.to_string(),
        })
}

pub trait SecretStore: Send + Sync {
    fn list_secrets(&self, namespace: &str) -> Result<Vec<CredentialSecret>, CredentialError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    secrets: Vec<CredentialSecret>,
}

impl MemorySecretStore {
    pub fn new(secrets: Vec<CredentialSecret>) -> Self {
        Self { secrets }
    }
}

impl SecretStore for MemorySecretStore {
    fn list_secrets(&self, namespace: &str) -> Result<Vec<CredentialSecret>, CredentialError> {
        Ok(self
            .secrets
            .iter()
            .filter(|secret| secret.namespace.is_empty() || secret.namespace == namespace)
            .cloned()
            .collect())
    }
}

/// Secrets read from a YAML list on every call. A missing file means no
/// secrets.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretStore for FileSecretStore {
    fn list_secrets(&self, namespace: &str) -> Result<Vec<CredentialSecret>, CredentialError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let secrets: Vec<CredentialSecret> = serde_yaml::from_str(&content)?;
        MemorySecretStore::new(secrets).list_secrets(namespace)
    }
}
