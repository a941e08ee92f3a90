// Pull-based service diagnostics.
//
// Components register a `StatusProvider` with the registry owned by the
// composition root. Polling isolates every provider: errors, panics and
// timeouts all become `unavailable` records instead of propagating.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub mod providers;

pub use providers::{HttpProbe, SecretStoreProvider, TokenAuthProvider};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Health level, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Ready,
    Degraded,
    Unavailable,
}

/// What a provider returns; the registry stamps name and time on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReport {
    pub state: ServiceState,
    pub reason: Option<String>,
    pub details: BTreeMap<String, Value>,
}

impl ProviderReport {
    pub fn ready() -> Self {
        Self {
            state: ServiceState::Ready,
            reason: None,
            details: BTreeMap::new(),
        }
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            state: ServiceState::Degraded,
            reason: Some(reason.into()),
            details: BTreeMap::new(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: ServiceState::Unavailable,
            reason: Some(reason.into()),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// One entry of the diagnostic report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: ServiceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl ServiceStatus {
    fn from_report(name: String, report: ProviderReport) -> Self {
        Self {
            name,
            status: report.state,
            reason: report.reason,
            details: report.details,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregated report served by the health endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub status: ServiceState,
    pub timestamp: DateTime<Utc>,
    pub services: Vec<ServiceStatus>,
}

/// A component able to report its own readiness on demand
#[async_trait]
pub trait StatusProvider: Send + Sync {
    async fn check(&self) -> anyhow::Result<ProviderReport>;
}

/// Worst state wins; an empty set is vacuously ready
pub fn overall_status(statuses: &[ServiceStatus]) -> ServiceState {
    statuses
        .iter()
        .map(|s| s.status)
        .max()
        .unwrap_or(ServiceState::Ready)
}

/// Name-to-provider registry. Owned by the composition root and shared by
/// reference; writes are expected during startup only.
pub struct DiagnosticsRegistry {
    providers: RwLock<HashMap<String, Arc<dyn StatusProvider>>>,
    timeout: Duration,
}

impl Default for DiagnosticsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl DiagnosticsRegistry {
    /// `timeout` bounds each individual provider check
    pub fn new(timeout: Duration) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a provider; returns true if it replaced an existing one
    pub async fn register(&self, name: impl Into<String>, provider: Arc<dyn StatusProvider>) -> bool {
        let name = name.into();
        debug!(provider = %name, "Registering status provider");
        self.providers.write().await.insert(name, provider).is_some()
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.providers.write().await.remove(name).is_some()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn status_of(&self, name: &str) -> Option<ServiceStatus> {
        let provider = self.providers.read().await.get(name).cloned()?;
        Some(poll(name.to_string(), provider, self.timeout).await)
    }

    /// Poll every provider concurrently, sorted by name
    pub async fn all_statuses(&self) -> Vec<ServiceStatus> {
        let mut providers: Vec<(String, Arc<dyn StatusProvider>)> = self
            .providers
            .read()
            .await
            .iter()
            .map(|(name, provider)| (name.clone(), provider.clone()))
            .collect();
        providers.sort_by(|a, b| a.0.cmp(&b.0));

        join_all(
            providers
                .into_iter()
                .map(|(name, provider)| poll(name, provider, self.timeout)),
        )
        .await
    }

    pub async fn report(&self) -> DiagnosticReport {
        let services = self.all_statuses().await;
        DiagnosticReport {
            status: overall_status(&services),
            timestamp: Utc::now(),
            services,
        }
    }
}

async fn poll(name: String, provider: Arc<dyn StatusProvider>, timeout: Duration) -> ServiceStatus {
    let check = AssertUnwindSafe(provider.check()).catch_unwind();

    let report = match tokio::time::timeout(timeout, check).await {
        Ok(Ok(Ok(report))) => report,
        Ok(Ok(Err(e))) => {
            warn!(provider = %name, error = %format!("{e:#}"), "Status provider failed");
            ProviderReport::unavailable(format!("{e:#}"))
        }
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            warn!(provider = %name, panic = %message, "Status provider panicked");
            ProviderReport::unavailable(message)
        }
        Err(_) => {
            warn!(provider = %name, ?timeout, "Status provider timed out");
            ProviderReport::unavailable(format!("timed out after {}ms", timeout.as_millis()))
        }
    };

    ServiceStatus::from_report(name, report)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "status provider panicked".to_string()
    }
}
