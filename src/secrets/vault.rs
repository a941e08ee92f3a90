use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{SecretStore, SecretStoreError};
use crate::config::KeyVaultSettings;

/// REST API version sent with every key vault request
pub const API_VERSION: &str = "7.4";

/// Secret bundle returned by `GET /secrets/{name}`
#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: Option<String>,
}

/// Key vault client speaking the Azure Key Vault secrets REST API.
#[derive(Debug, Clone)]
pub struct KeyVaultClient {
    base_url: Url,
    access_token: Option<String>,
    http_client: Client,
}

impl KeyVaultClient {
    /// Build a client from settings. Returns `Ok(None)` when no vault URL is
    /// configured.
    pub fn from_settings(settings: &KeyVaultSettings) -> Result<Option<Self>, SecretStoreError> {
        let Some(raw_url) = settings.url.as_deref().filter(|u| !u.trim().is_empty()) else {
            debug!("Key vault not configured (missing keyVault.url / KEY_VAULT_URL)");
            return Ok(None);
        };

        let base_url = Url::parse(raw_url)
            .map_err(|e| SecretStoreError::InvalidConfig(format!("invalid vault URL {raw_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SecretStoreError::InvalidConfig(format!(
                "vault URL {raw_url:?} cannot carry a path"
            )));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| SecretStoreError::InvalidConfig(format!("creating HTTP client: {e}")))?;

        debug!("Key vault client initialized with base_url={}", base_url);

        Ok(Some(Self {
            base_url,
            access_token: settings
                .access_token
                .clone()
                .filter(|token| !token.is_empty()),
            http_client,
        }))
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        url
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self.http_client.get(url);
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Vault secret names are limited to ASCII alphanumerics and hyphens
pub fn is_valid_secret_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 127
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[async_trait]
impl SecretStore for KeyVaultClient {
    fn name(&self) -> &str {
        "key-vault"
    }

    async fn check(&self) -> Result<(), SecretStoreError> {
        let mut url = self.endpoint(&["secrets"]);
        url.query_pairs_mut().append_pair("maxresults", "1");

        let response = self
            .get(url)
            .send()
            .await
            .map_err(|e| SecretStoreError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SecretStoreError::Rejected { status, body });
        }
        Ok(())
    }

    async fn fetch(&self, name: &str) -> Result<Option<String>, SecretStoreError> {
        if !is_valid_secret_name(name) {
            debug!(secret = name, "Name is not a valid vault secret name; treating as missing");
            return Ok(None);
        }

        let url = self.endpoint(&["secrets", name]);
        debug!(secret = name, "Fetching secret from key vault");

        let response = self
            .get(url)
            .send()
            .await
            .map_err(|e| SecretStoreError::Unreachable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bundle: SecretBundle = response
                    .json()
                    .await
                    .map_err(|e| SecretStoreError::InvalidResponse(e.to_string()))?;
                Ok(bundle.value)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(SecretStoreError::Rejected {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}
