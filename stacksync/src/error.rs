use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("unable to retrieve release {coordinates}: {details}")]
    Release {
        coordinates: String,
        details: String,
    },
    #[error("unable to download release asset {asset} of {coordinates}: {details}")]
    Asset {
        asset: String,
        coordinates: String,
        details: String,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("catalog document is empty")]
    Empty,
    #[error("catalog parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no secret in namespace {namespace} belongs to service account {account}")]
    NotFound { namespace: String, account: String },
    #[error("secret {secret} has no {key} entry")]
    MissingKey { secret: String, key: String },
    #[error("secret store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("secret store parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(
        "no information was provided to retrieve the stack index of repository {name}; \
         specify an https url or complete git release information"
    )]
    Configuration { name: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stack {name} not found in namespace {namespace}")]
    NotFound { namespace: String, name: String },
    #[error("stack {name} already exists in namespace {namespace}")]
    AlreadyExists { namespace: String, name: String },
    #[error("stack {name} was modified concurrently: expected revision {expected}, found {actual}")]
    Conflict {
        name: String,
        expected: u64,
        actual: u64,
    },
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("repository {repository}: {source}")]
    Resolve {
        repository: String,
        #[source]
        source: ResolveError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}
