use crate::config::HttpsConfig;
use crate::error::{CredentialError, ResolveError};
use crate::secret::{select_service_account_secret, SecretStore};
use crate::transport::Transport;
use tracing::debug;

pub const DEFAULT_INDEX_FILE: &str = "index.yaml";

/// Points a repository url at its index document. Urls that already name a
/// `.yaml` file are kept; anything else is treated as a directory.
pub fn index_url(url: &str) -> String {
    let names_yaml_file = url
        .rsplit_once('/')
        .is_some_and(|(_, file)| file.len() > ".yaml".len() && file.ends_with(".yaml"));

    if names_yaml_file {
        url.to_string()
    } else {
        format!("{url}/{DEFAULT_INDEX_FILE}")
    }
}

pub(crate) fn fetch_index(
    transport: &dyn Transport,
    secrets: &dyn SecretStore,
    https: &HttpsConfig,
    namespace: &str,
    service_account: &str,
) -> Result<Vec<u8>, ResolveError> {
    let url = index_url(&https.url);

    let token = if https.request_oauth_token {
        let candidates = secrets.list_secrets(namespace)?;
        let secret = select_service_account_secret(&candidates, namespace, service_account)?;
        let token = secret.token().ok_or_else(|| CredentialError::MissingKey {
            secret: secret.name.clone(),
            key: "token".to_string(),
        })?;
        Some(token.to_string())
    } else {
        None
    };

    debug!(
        url = %url,
        authenticated = token.is_some(),
        skip_cert_verification = https.skip_cert_verification,
        "fetching stack index over https"
    );
    Ok(transport.fetch(&url, https.skip_cert_verification, token.as_deref())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_urls_get_index_file() {
        assert_eq!(
            index_url("https://example.com/stacks"),
            "https://example.com/stacks/index.yaml"
        );
        assert_eq!(
            index_url("https://example.com/stacks.yml"),
            "https://example.com/stacks.yml/index.yaml"
        );
    }

    #[test]
    fn yaml_file_urls_are_kept() {
        assert_eq!(
            index_url("https://example.com/incubator-index.yaml"),
            "https://example.com/incubator-index.yaml"
        );
        assert_eq!(
            index_url("https://example.com/stacks/index.yaml"),
            "https://example.com/stacks/index.yaml"
        );
    }

    #[test]
    fn bare_extension_is_not_a_file_name() {
        assert_eq!(
            index_url("https://example.com/.yaml"),
            "https://example.com/.yaml/index.yaml"
        );
    }
}
