// Startup configuration pipeline:
// LoadingFile -> EnvironmentOverride -> OfflineCheck -> SecretResolution -> Ready
// with Failed as the terminal error state.

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{set_path, lookup, AppConfig, ConfigError, EnvVars, KeyVaultSettings};
use crate::secrets::{
    contains_placeholder, KeyVaultClient, PinnedPaths, ResolutionReport, SecretResolver,
    SecretStore, StoreState,
};

pub const ENV_PROFILE: &str = "APP_ENV";
pub const ENV_CONFIG_DIR: &str = "CONFIG_DIR";
pub const ENV_OFFLINE: &str = "OFFLINE_MODE";
pub const DEFAULT_PROFILE: &str = "development";
pub const DEFAULT_CONFIG_DIR: &str = "config";

/// Section never resolved from the store: it holds the store's own credentials
const KEY_VAULT_SECTION: &str = "keyVault";

/// A configuration value that an environment variable may supply directly
#[derive(Debug, Clone, Copy)]
pub struct Concern {
    pub name: &'static str,
    pub path: &'static str,
    pub env_var: &'static str,
}

/// Overridable values. Each one must be resolved by the end of loading when
/// its path appears in the document.
pub const CONCERNS: &[Concern] = &[
    Concern {
        name: "storage",
        path: "storage.azure.connectionString",
        env_var: "AZURE_STORAGE_CONNECTION_STRING",
    },
    Concern {
        name: "auth",
        path: "auth.secret",
        env_var: "JWT_SECRET",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStage {
    LoadingFile,
    EnvironmentOverride,
    OfflineCheck,
    SecretResolution,
    Ready,
    Failed,
}

/// What happened during loading; surfaced by diagnostics and the CLI
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub profile: String,
    pub source: Option<PathBuf>,
    /// Environment variables that overrode document values
    pub overrides: Vec<String>,
    pub offline: bool,
    pub store: StoreState,
    pub resolution: ResolutionReport,
    pub stages: Vec<LoadStage>,
}

impl LoadReport {
    fn enter(&mut self, stage: LoadStage) {
        debug!(?stage, "Configuration load stage");
        self.stages.push(stage);
    }
}

/// Result of a successful load
pub struct LoadedConfig {
    pub config: AppConfig,
    pub report: LoadReport,
    pub resolver: SecretResolver,
}

enum StoreSource {
    /// Build a key vault client from the document's `keyVault` section
    FromConfig,
    Provided(Option<Arc<dyn SecretStore>>),
}

pub struct ConfigLoader {
    env: EnvVars,
    store: StoreSource,
}

impl ConfigLoader {
    pub fn new(env: EnvVars) -> Self {
        Self {
            env,
            store: StoreSource::FromConfig,
        }
    }

    pub fn from_process_env() -> Self {
        Self::new(EnvVars::from_process())
    }

    /// Use this store instead of the configured key vault
    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = StoreSource::Provided(Some(store));
        self
    }

    /// Run without any secret store
    pub fn without_secret_store(mut self) -> Self {
        self.store = StoreSource::Provided(None);
        self
    }

    pub fn env(&self) -> &EnvVars {
        &self.env
    }

    /// Profile named by `APP_ENV`, restricted to `[A-Za-z0-9_-]`
    pub fn profile(&self) -> Result<String, ConfigError> {
        let profile = self.env.non_empty(ENV_PROFILE).unwrap_or(DEFAULT_PROFILE);
        let valid = profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ConfigError::InvalidProfile(profile.to_string()));
        }
        Ok(profile.to_string())
    }

    pub fn config_path(&self) -> Result<PathBuf, ConfigError> {
        let dir = self.env.non_empty(ENV_CONFIG_DIR).unwrap_or(DEFAULT_CONFIG_DIR);
        Ok(Path::new(dir).join(format!("{}.json", self.profile()?)))
    }

    /// Full bootstrap from the profile's configuration file
    pub async fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let mut report = LoadReport::default();
        report.enter(LoadStage::LoadingFile);

        let loaded = match self.read_file(&mut report) {
            Ok(document) => {
                let profile = report.profile.clone();
                self.resolve(profile, document, report).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &loaded {
            error!(stage = ?LoadStage::Failed, error = %e, "Configuration load failed");
        }
        loaded
    }

    /// Bootstrap from an in-memory document, skipping the file stage
    pub async fn load_document(
        &self,
        profile: impl Into<String>,
        document: Value,
    ) -> Result<LoadedConfig, ConfigError> {
        let report = LoadReport {
            profile: profile.into(),
            ..LoadReport::default()
        };
        if !document.is_object() {
            return Err(ConfigError::NotAnObject);
        }

        let profile = report.profile.clone();
        let loaded = self.resolve(profile, document, report).await;
        if let Err(e) = &loaded {
            error!(stage = ?LoadStage::Failed, error = %e, "Configuration load failed");
        }
        loaded
    }

    fn read_file(&self, report: &mut LoadReport) -> Result<Value, ConfigError> {
        report.profile = self.profile()?;
        let path = self.config_path()?;

        if !path.is_file() {
            return Err(ConfigError::MissingFile(path));
        }

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let document: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        if !document.is_object() {
            return Err(ConfigError::NotAnObject);
        }

        info!(profile = %report.profile, path = %path.display(), "Configuration file loaded");
        report.source = Some(path);
        Ok(document)
    }

    async fn resolve(
        &self,
        profile: String,
        mut document: Value,
        mut report: LoadReport,
    ) -> Result<LoadedConfig, ConfigError> {
        report.enter(LoadStage::EnvironmentOverride);
        let mut pinned = self.apply_overrides(&mut document, &mut report);

        report.enter(LoadStage::OfflineCheck);
        if self.env.flag(ENV_OFFLINE) {
            warn!("{} is set; skipping secret resolution", ENV_OFFLINE);
            report.offline = true;
            let config = AppConfig::from_document(profile, document)?;
            report.enter(LoadStage::Ready);
            return Ok(LoadedConfig {
                config,
                report,
                resolver: SecretResolver::disabled(),
            });
        }

        report.enter(LoadStage::SecretResolution);
        let resolver = SecretResolver::initialize(self.secret_store(&document)).await;
        report.store = resolver.state().clone();

        pinned.insert(KEY_VAULT_SECTION);
        let document = resolver
            .resolve_placeholders(document, &pinned, &mut report.resolution)
            .await;
        let document = resolver
            .resolve_empty_values(document, "", &pinned, &mut report.resolution)
            .await;

        verify_required(&document)?;
        let config = AppConfig::from_document(profile, document)?;

        report.enter(LoadStage::Ready);
        info!(
            profile = %config.profile,
            overrides = report.overrides.len(),
            lookups = report.resolution.lookups,
            unresolved = report.resolution.placeholders_unresolved.len()
                + report.resolution.empty_unresolved.len(),
            "Configuration ready"
        );

        Ok(LoadedConfig {
            config,
            report,
            resolver,
        })
    }

    /// Apply environment overrides and pin the paths they supplied
    fn apply_overrides(&self, document: &mut Value, report: &mut LoadReport) -> PinnedPaths {
        let mut pinned = PinnedPaths::new();

        for concern in CONCERNS {
            match self.env.get(concern.env_var) {
                Some("") => {
                    warn!(
                        env_var = concern.env_var,
                        "Environment override is set but empty; ignoring it"
                    );
                }
                Some(value) => {
                    set_path(document, concern.path, Value::String(value.to_string()));
                    pinned.insert(concern.path);
                    report.overrides.push(concern.env_var.to_string());
                    info!(
                        env_var = concern.env_var,
                        path = concern.path,
                        "Applied environment override"
                    );
                }
                None => {}
            }
        }

        pinned
    }

    fn secret_store(&self, document: &Value) -> Option<Arc<dyn SecretStore>> {
        match &self.store {
            StoreSource::Provided(store) => store.clone(),
            StoreSource::FromConfig => {
                let settings = KeyVaultSettings::from_document(document, &self.env);
                match KeyVaultClient::from_settings(&settings) {
                    Ok(Some(client)) => Some(Arc::new(client)),
                    Ok(None) => None,
                    Err(e) => {
                        warn!(error = %e, "Key vault misconfigured; treating as not configured");
                        None
                    }
                }
            }
        }
    }
}

/// Each overridable concern present in the document must end up as a
/// non-empty string with no placeholder left in it
fn verify_required(document: &Value) -> Result<(), ConfigError> {
    for concern in CONCERNS {
        let Some(value) = lookup(document, concern.path) else {
            continue;
        };
        let resolved = matches!(value, Value::String(s) if !s.is_empty() && !contains_placeholder(s));
        if !resolved {
            return Err(ConfigError::Unresolved {
                path: concern.path.to_string(),
            });
        }
    }
    Ok(())
}
