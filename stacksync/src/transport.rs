//! HTTP transport for catalog documents.

use crate::error::FetchError;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, ETAG, IF_NONE_MATCH, USER_AGENT};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

pub const USER_AGENT_VALUE: &str = "stacksync";

pub trait Transport: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        skip_cert_verification: bool,
        bearer_token: Option<&str>,
    ) -> Result<Vec<u8>, FetchError>;
}

/// Builds a blocking client with the stacksync user agent, an optional bearer
/// token and a request timeout. Certificate checks are only disabled when the
/// caller asks for it.
pub fn build_client(
    timeout: Duration,
    skip_cert_verification: bool,
    bearer_token: Option<&str>,
) -> Result<Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    if let Some(token) = bearer_token.filter(|token| !token.is_empty()) {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| FetchError::Network(format!("invalid bearer token: {err}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .danger_accept_invalid_certs(skip_cert_verification)
        .build()
        .map_err(|err| FetchError::Network(err.to_string()))
}

#[derive(Debug, Clone)]
struct CachedBody {
    etag: String,
    body: Vec<u8>,
}

/// Transport that revalidates previously fetched documents with their ETag.
pub struct CachedTransport {
    verifying: Client,
    insecure: Client,
    cache: Mutex<HashMap<String, CachedBody>>,
}

impl CachedTransport {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Ok(Self {
            verifying: build_client(timeout, false, None)?,
            insecure: build_client(timeout, true, None)?,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, url: &str) -> Option<CachedBody> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(url).cloned())
    }

    fn remember(&self, url: &str, etag: String, body: &[u8]) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                url.to_string(),
                CachedBody {
                    etag,
                    body: body.to_vec(),
                },
            );
        }
    }
}

impl Transport for CachedTransport {
    fn fetch(
        &self,
        url: &str,
        skip_cert_verification: bool,
        bearer_token: Option<&str>,
    ) -> Result<Vec<u8>, FetchError> {
        let client = if skip_cert_verification {
            &self.insecure
        } else {
            &self.verifying
        };

        let mut request = client.get(url);
        if let Some(token) = bearer_token.filter(|token| !token.is_empty()) {
            request = request.bearer_auth(token);
        }

        let cached = self.cached(url);
        if let Some(cached) = &cached {
            request = request.header(IF_NONE_MATCH, cached.etag.as_str());
        }

        let response = request
            .send()
            .map_err(|err| FetchError::Network(err.to_string()))?;

        if response.status() == StatusCode::NOT_MODIFIED {
            if let Some(cached) = cached {
                debug!(url, "catalog not modified, serving cached copy");
                return Ok(cached.body);
            }
        }

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .map_err(|err| FetchError::Network(err.to_string()))?
            .to_vec();

        if let Some(etag) = etag {
            self.remember(url, etag, &body);
        }

        Ok(body)
    }
}
