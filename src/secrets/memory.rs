use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{SecretStore, SecretStoreError};

/// In-process secret store. Records every lookup so callers can assert how
/// often the store was consulted.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: HashMap<String, String>,
    unreachable: bool,
    lookups: Mutex<Vec<String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    /// Make `check` and `fetch` fail as if the network were down
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Names passed to `fetch`, in call order
    pub fn lookups(&self) -> Vec<String> {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn check(&self) -> Result<(), SecretStoreError> {
        if self.unreachable {
            return Err(SecretStoreError::Unreachable("memory store marked unreachable".into()));
        }
        Ok(())
    }

    async fn fetch(&self, name: &str) -> Result<Option<String>, SecretStoreError> {
        self.lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.to_string());

        if self.unreachable {
            return Err(SecretStoreError::Unreachable("memory store marked unreachable".into()));
        }
        Ok(self.secrets.get(name).cloned())
    }
}
