#[path = "github/api.rs"]
mod api;

use crate::config::{GitReleaseSpec, PUBLIC_GITHUB_HOST};
use crate::error::FetchError;
use crate::transport::build_client;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use std::time::Duration;
use tracing::{debug, warn};

pub use api::{Asset, Release};

/// The subset of a release hosting API needed to read a catalog asset.
pub trait ReleaseApi {
    fn release_by_tag(
        &self,
        organization: &str,
        project: &str,
        tag: &str,
    ) -> Result<Release, FetchError>;

    fn download_asset(
        &self,
        organization: &str,
        project: &str,
        asset_id: u64,
    ) -> Result<Vec<u8>, FetchError>;
}

pub trait ReleaseApiFactory: Send + Sync {
    fn client(
        &self,
        hostname: &str,
        bearer_token: Option<&str>,
        skip_cert_verification: bool,
    ) -> Result<Box<dyn ReleaseApi>, FetchError>;
}

/// github.com is served from api.github.com; any other host is treated as a
/// GitHub Enterprise install, whose REST API lives under `/api/v3`.
pub fn api_base_for_host(hostname: &str) -> String {
    if hostname == PUBLIC_GITHUB_HOST {
        "https://api.github.com".to_string()
    } else {
        format!("https://{hostname}/api/v3")
    }
}

pub struct GithubClient {
    api_base: String,
    client: Client,
}

impl GithubClient {
    pub fn with_api_base(api_base: impl Into<String>, client: Client) -> Self {
        Self {
            api_base: api_base.into(),
            client,
        }
    }

    fn get(&self, url: &str, accept: &'static str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .send()
            .map_err(|err| FetchError::Network(err.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .map_err(|err| FetchError::Network(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl ReleaseApi for GithubClient {
    fn release_by_tag(
        &self,
        organization: &str,
        project: &str,
        tag: &str,
    ) -> Result<Release, FetchError> {
        let url = format!(
            "{}/repos/{organization}/{project}/releases/tags/{tag}",
            self.api_base.trim_end_matches('/')
        );
        let body = self.get(&url, "application/vnd.github+json")?;
        serde_json::from_slice(&body)
            .map_err(|err| FetchError::Network(format!("invalid release document: {err}")))
    }

    fn download_asset(
        &self,
        organization: &str,
        project: &str,
        asset_id: u64,
    ) -> Result<Vec<u8>, FetchError> {
        let url = format!(
            "{}/repos/{organization}/{project}/releases/assets/{asset_id}",
            self.api_base.trim_end_matches('/')
        );
        self.get(&url, "application/octet-stream")
    }
}

pub struct GithubApiFactory {
    timeout: Duration,
}

impl GithubApiFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ReleaseApiFactory for GithubApiFactory {
    fn client(
        &self,
        hostname: &str,
        bearer_token: Option<&str>,
        skip_cert_verification: bool,
    ) -> Result<Box<dyn ReleaseApi>, FetchError> {
        let client = build_client(self.timeout, skip_cert_verification, bearer_token)?;
        Ok(Box::new(GithubClient::with_api_base(
            api_base_for_host(hostname),
            client,
        )))
    }
}

/// Downloads the configured asset of a tagged release.
///
/// A release without the asset yields empty bytes rather than an error; the
/// decode step reports it.
pub fn fetch_release_index(
    api: &dyn ReleaseApi,
    release: &GitReleaseSpec,
) -> Result<Vec<u8>, FetchError> {
    let found = api
        .release_by_tag(&release.organization, &release.project, &release.release)
        .map_err(|err| FetchError::Release {
            coordinates: release.to_string(),
            details: err.to_string(),
        })?;

    let Some(asset) = found.find_asset(&release.asset_name) else {
        warn!(
            release = %release,
            available = ?found.assets.iter().map(|asset| asset.name.as_str()).collect::<Vec<_>>(),
            "release has no matching asset"
        );
        return Ok(Vec::new());
    };

    debug!(release = %release, asset_id = asset.id, "downloading release asset");
    api.download_asset(&release.organization, &release.project, asset.id)
        .map_err(|err| FetchError::Asset {
            asset: release.asset_name.clone(),
            coordinates: release.to_string(),
            details: err.to_string(),
        })
}
