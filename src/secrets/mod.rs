// Secret store abstraction and the resolution engine built on it.
//
// The store is an optional collaborator: the resolver holds
// `Option<Arc<dyn SecretStore>>` and every lookup branches on presence.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod resolver;
pub mod vault;

pub use memory::MemorySecretStore;
pub use resolver::{
    contains_placeholder, secret_name_for_path, PinnedPaths, ResolutionReport, SecretResolver,
    StoreState, PATH_DELIMITER,
};
pub use vault::KeyVaultClient;

/// Errors raised by a secret store backend
#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("Secret store unreachable: {0}")]
    Unreachable(String),

    #[error("Secret store rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid secret store response: {0}")]
    InvalidResponse(String),

    #[error("Invalid secret store configuration: {0}")]
    InvalidConfig(String),
}

/// Network key-value service holding named secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Short backend name for logs and diagnostics
    fn name(&self) -> &str;

    /// Verify the store is reachable and credentials are accepted
    async fn check(&self) -> Result<(), SecretStoreError>;

    /// Fetch one secret. `Ok(None)` means the secret does not exist.
    async fn fetch(&self, name: &str) -> Result<Option<String>, SecretStoreError>;
}
