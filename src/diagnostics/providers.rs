use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::{Duration, Instant};
use url::Url;

use super::{ProviderReport, StatusProvider};
use crate::auth::TokenGuard;
use crate::config::LoadReport;
use crate::secrets::{SecretResolver, StoreState};

/// Reports secret store connectivity and what the startup load left unresolved
pub struct SecretStoreProvider {
    resolver: SecretResolver,
    offline: bool,
    unresolved: Vec<String>,
    lookups: usize,
}

impl SecretStoreProvider {
    pub fn new(resolver: SecretResolver, report: &LoadReport) -> Self {
        let unresolved = report
            .resolution
            .placeholders_unresolved
            .iter()
            .map(|name| format!("{{{{{name}}}}}"))
            .chain(report.resolution.empty_unresolved.iter().cloned())
            .collect();

        Self {
            resolver,
            offline: report.offline,
            unresolved,
            lookups: report.resolution.lookups,
        }
    }
}

#[async_trait]
impl StatusProvider for SecretStoreProvider {
    async fn check(&self) -> anyhow::Result<ProviderReport> {
        if self.offline {
            return Ok(ProviderReport::degraded("offline mode; secret resolution skipped"));
        }

        let report = match (self.resolver.store(), self.resolver.state()) {
            (Some(store), _) => {
                store
                    .check()
                    .await
                    .with_context(|| format!("{} unreachable", store.name()))?;
                let report = if self.unresolved.is_empty() {
                    ProviderReport::ready()
                } else {
                    ProviderReport::degraded("some configuration values were not resolved")
                };
                report.with_detail("store", store.name())
            }
            (None, StoreState::Disabled { reason }) => {
                ProviderReport::degraded(format!("secret store disabled at startup: {reason}"))
            }
            (None, _) => ProviderReport::degraded("secret store not configured"),
        };

        let mut report = report.with_detail("lookups", self.lookups);
        if !self.unresolved.is_empty() {
            report = report.with_detail("unresolved", json!(self.unresolved));
        }
        Ok(report)
    }
}

/// Reports whether bearer tokens can be validated at all
pub struct TokenAuthProvider {
    configured: bool,
    ttl_secs: u64,
}

impl TokenAuthProvider {
    pub fn new(guard: &TokenGuard, ttl_secs: u64) -> Self {
        Self {
            configured: guard.is_configured(),
            ttl_secs,
        }
    }
}

#[async_trait]
impl StatusProvider for TokenAuthProvider {
    async fn check(&self) -> anyhow::Result<ProviderReport> {
        let report = if self.configured {
            ProviderReport::ready()
        } else {
            ProviderReport::unavailable("auth secret not configured; all tokens are rejected")
        };
        Ok(report.with_detail("tokenTtlSecs", self.ttl_secs))
    }
}

/// GETs an external endpoint. 2xx/3xx is ready, 4xx degraded, 5xx
/// unavailable; transport failures surface as errors.
pub struct HttpProbe {
    url: Url,
    timeout: Duration,
    client: Client,
}

impl HttpProbe {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid probe URL {url:?}"))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("creating HTTP client")?;
        Ok(Self { url, timeout, client })
    }
}

#[async_trait]
impl StatusProvider for HttpProbe {
    async fn check(&self) -> anyhow::Result<ProviderReport> {
        let started = Instant::now();
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", self.url))?;
        let latency_ms = started.elapsed().as_millis() as u64;
        let status = response.status();

        let report = if status.is_server_error() {
            ProviderReport::unavailable(format!("endpoint returned {status}"))
        } else if status.is_client_error() {
            ProviderReport::degraded(format!("endpoint returned {status}"))
        } else {
            ProviderReport::ready()
        };

        Ok(report
            .with_detail("url", self.url.as_str())
            .with_detail("statusCode", status.as_u16())
            .with_detail("latencyMs", latency_ms)
            .with_detail("timeoutMs", self.timeout.as_millis() as u64))
    }
}
