pub mod config;
pub mod error;
pub mod index;
pub mod reconcile;
pub mod resource;
pub mod secret;
pub mod source;
pub mod store;
pub mod transport;

pub use config::{PlatformInstance, RepositoryConfig};
pub use error::{
    ConfigError, CredentialError, DecodeError, FetchError, ReconcileError, ResolveError,
    StoreError,
};
pub use index::{Index, StackEntry};
pub use reconcile::{aggregate, apply, plan, reconcile, CatalogMap, Mutation, Plan, ReconcileReport};
pub use resource::{StackResource, VersionRecord};
pub use secret::{CredentialSecret, FileSecretStore, MemorySecretStore, SecretStore};
pub use source::{CatalogFetcher, CatalogResolver, GithubApiFactory};
pub use store::{FileStore, MemoryStore, ResourceStore};
pub use transport::{CachedTransport, Transport};
