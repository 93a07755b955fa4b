//! Catalog resolution: reading a repository's stack index and normalizing it.

use crate::config::{IndexLocation, PlatformInstance, RepositoryConfig};
use crate::error::ResolveError;
use crate::index::Index;
use crate::secret::{select_secret, SecretStore};
use crate::transport::Transport;
use tracing::debug;

#[path = "github.rs"]
pub mod github;
pub mod https;

pub use github::{GithubApiFactory, ReleaseApi, ReleaseApiFactory};
pub use https::index_url;

/// Produces the normalized catalog of one repository.
pub trait CatalogResolver {
    fn resolve(
        &self,
        platform: &PlatformInstance,
        repository: &RepositoryConfig,
    ) -> Result<Index, ResolveError>;
}

pub struct CatalogFetcher<'a> {
    transport: &'a dyn Transport,
    secrets: &'a dyn SecretStore,
    releases: &'a dyn ReleaseApiFactory,
    service_account: String,
}

impl<'a> CatalogFetcher<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        secrets: &'a dyn SecretStore,
        releases: &'a dyn ReleaseApiFactory,
        service_account: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            secrets,
            releases,
            service_account: service_account.into(),
        }
    }

    /// Reads the raw index document of a repository.
    pub fn resolve_index(
        &self,
        repository: &RepositoryConfig,
        namespace: &str,
    ) -> Result<Vec<u8>, ResolveError> {
        match repository.location() {
            Some(IndexLocation::Release(release)) => {
                debug!(repository = %repository.name, release = %release, "using git release");
                let candidates = self.secrets.list_secrets(namespace)?;
                let token = select_secret(&candidates, &release.hostname)
                    .and_then(|secret| secret.password())
                    .filter(|token| !token.is_empty());
                let api = self.releases.client(
                    &release.hostname,
                    token,
                    release.skip_cert_verification,
                )?;
                Ok(github::fetch_release_index(api.as_ref(), release)?)
            }
            Some(IndexLocation::Https(https)) => {
                debug!(repository = %repository.name, url = %https.url, "using https");
                https::fetch_index(
                    self.transport,
                    self.secrets,
                    https,
                    namespace,
                    &self.service_account,
                )
            }
            None => Err(ResolveError::Configuration {
                name: repository.name.clone(),
            }),
        }
    }
}

impl CatalogResolver for CatalogFetcher<'_> {
    fn resolve(
        &self,
        platform: &PlatformInstance,
        repository: &RepositoryConfig,
    ) -> Result<Index, ResolveError> {
        let bytes = self.resolve_index(repository, platform.namespace())?;
        let mut index = Index::decode(&bytes)?;
        index.normalize(platform.pipelines_for(repository), platform.triggers());
        Ok(index)
    }
}
