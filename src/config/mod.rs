use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

pub mod loader;

pub use loader::{ConfigLoader, LoadReport, LoadStage, LoadedConfig};

/// Fatal configuration errors. Any of these stops the process before it
/// serves requests.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration profile name: {0:?}")]
    InvalidProfile(String),

    #[error("Configuration file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration root must be a JSON object")]
    NotAnObject,

    #[error("Invalid `{section}` configuration section: {source}")]
    InvalidSection {
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Required configuration value `{path}` could not be resolved")]
    Unresolved { path: String },
}

/// Snapshot of the process environment. Loading reads through this instead
/// of `std::env` so it stays deterministic under test.
#[derive(Debug, Clone, Default)]
pub struct EnvVars {
    vars: HashMap<String, String>,
}

impl EnvVars {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Value only when set to something other than the empty string
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Boolean flag: `1`, `true`, `yes`, `on` (case-insensitive)
    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("1" | "true" | "yes" | "on")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    #[serde(deserialize_with = "lenient::number")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Shared HS256 signing secret
    pub secret: String,
    /// Token lifetime in seconds
    #[serde(deserialize_with = "lenient::number")]
    pub expires_in: u64,
    pub issuer: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expires_in: 3600,
            issuer: None,
        }
    }
}

impl AuthSettings {
    /// Configured issuer, ignoring a blank value
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref().map(str::trim).filter(|issuer| !issuer.is_empty())
    }
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("secret", &if self.secret.is_empty() { "<empty>" } else { "<redacted>" })
            .field("expires_in", &self.expires_in)
            .field("issuer", &self.issuer)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyVaultSettings {
    pub url: Option<String>,
    pub access_token: Option<String>,
    #[serde(deserialize_with = "lenient::number")]
    pub timeout_secs: u64,
}

impl Default for KeyVaultSettings {
    fn default() -> Self {
        Self {
            url: None,
            access_token: None,
            timeout_secs: 10,
        }
    }
}

impl fmt::Debug for KeyVaultSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVaultSettings")
            .field("url", &self.url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl KeyVaultSettings {
    pub const ENV_URL: &'static str = "KEY_VAULT_URL";
    pub const ENV_TOKEN: &'static str = "KEY_VAULT_TOKEN";

    /// Read the `keyVault` section leniently and apply environment overrides.
    /// Used before the document is resolved, so a malformed section only
    /// disables the store.
    pub fn from_document(document: &Value, env: &EnvVars) -> Self {
        let mut settings = match section::<Self>(document, "keyVault") {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed keyVault section");
                Self::default()
            }
        };

        if let Some(url) = env.non_empty(Self::ENV_URL) {
            settings.url = Some(url.to_string());
        }
        if let Some(token) = env.non_empty(Self::ENV_TOKEN) {
            settings.access_token = Some(token.to_string());
        }
        settings
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagnosticsSettings {
    /// Upper bound for any single status provider
    #[serde(deserialize_with = "lenient::number")]
    pub timeout_secs: u64,
    pub probes: Vec<ProbeSettings>,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            probes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSettings {
    #[serde(default)]
    pub name: String,
    /// Probes left without a URL are skipped at registration
    #[serde(default)]
    pub url: String,
    #[serde(default, deserialize_with = "lenient::optional_number")]
    pub timeout_secs: Option<u64>,
}

/// Resolved, immutable configuration. Built once at startup and shared
/// behind an `Arc`.
#[derive(Clone)]
pub struct AppConfig {
    pub profile: String,
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub key_vault: KeyVaultSettings,
    pub diagnostics: DiagnosticsSettings,
    document: Value,
}

impl AppConfig {
    /// Wrap a resolved document, deriving the typed section views
    pub fn from_document(profile: impl Into<String>, document: Value) -> Result<Self, ConfigError> {
        if !document.is_object() {
            return Err(ConfigError::NotAnObject);
        }

        Ok(Self {
            profile: profile.into(),
            server: section(&document, "server")?,
            auth: section(&document, "auth")?,
            key_vault: section(&document, "keyVault")?,
            diagnostics: section(&document, "diagnostics")?,
            document,
        })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Value at a dotted path, e.g. `storage.azure.connectionString`
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.document, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Copy of the document with sensitive-looking values masked
    pub fn redacted_document(&self) -> Value {
        redact(&self.document, None)
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("profile", &self.profile)
            .field("server", &self.server)
            .field("auth", &self.auth)
            .field("key_vault", &self.key_vault)
            .field("diagnostics", &self.diagnostics)
            .finish_non_exhaustive()
    }
}

/// Typed view of a top-level section. `null` and `""` leaves are dropped
/// first so a value the store could not fill falls back to its default.
fn section<T: DeserializeOwned + Default>(document: &Value, name: &'static str) -> Result<T, ConfigError> {
    match document.get(name) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(prune_empty(value))
            .map_err(|source| ConfigError::InvalidSection { section: name, source }),
    }
}

fn is_empty_leaf(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn prune_empty(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !is_empty_leaf(v))
                .map(|(k, v)| (k.clone(), prune_empty(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(prune_empty).collect()),
        other => other.clone(),
    }
}

/// Numeric settings may arrive as strings: secret stores only hold text.
mod lenient {
    use serde::{de, Deserialize, Deserializer};
    use std::fmt::Display;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    fn convert<T, E>(raw: Raw) -> Result<T, E>
    where
        T: TryFrom<u64>,
        T::Error: Display,
        E: de::Error,
    {
        let number = match raw {
            Raw::Number(n) => n,
            Raw::Text(text) => text
                .trim()
                .parse::<u64>()
                .map_err(|_| E::custom(format!("expected a non-negative integer, got {text:?}")))?,
        };
        T::try_from(number).map_err(E::custom)
    }

    pub fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64>,
        T::Error: Display,
    {
        convert(Raw::deserialize(deserializer)?)
    }

    pub fn optional_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<u64>,
        T::Error: Display,
    {
        Option::<Raw>::deserialize(deserializer)?
            .map(convert)
            .transpose()
    }
}

pub(crate) fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.as_object()?.get(segment))
}

/// Set a dotted path, creating intermediate objects. Non-object
/// intermediates are replaced.
pub(crate) fn set_path(document: &mut Value, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = document;

    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let map = match current {
            Value::Object(map) => map,
            _ => return,
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

const SENSITIVE_KEYS: &[&str] = &["secret", "token", "password", "connectionstring", "key", "credential"];

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|marker| key.contains(marker))
}

fn redact(value: &Value, key: Option<&str>) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact(v, Some(k))))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact(v, key)).collect()),
        Value::String(s) if !s.is_empty() && key.is_some_and(is_sensitive) => {
            Value::String("********".to_string())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sections_default_when_absent() {
        let config = AppConfig::from_document("test", json!({})).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.auth.expires_in, 3600);
        assert!(config.auth.secret.is_empty());
        assert_eq!(config.diagnostics.timeout_secs, 5);
    }

    #[test]
    fn typed_views_follow_document() {
        let config = AppConfig::from_document(
            "test",
            json!({
                "server": { "port": 8080 },
                "auth": { "secret": "abc", "expiresIn": 60, "issuer": "tenanthub" },
                "storage": { "azure": { "connectionString": "conn" } },
            }),
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.secret, "abc");
        assert_eq!(config.auth.issuer.as_deref(), Some("tenanthub"));
        assert_eq!(config.get_str("storage.azure.connectionString"), Some("conn"));
        assert!(config.get("storage.missing").is_none());
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert!(matches!(
            AppConfig::from_document("test", json!([1, 2])),
            Err(ConfigError::NotAnObject)
        ));
    }

    #[test]
    fn malformed_section_is_reported() {
        let err = AppConfig::from_document("test", json!({ "server": { "port": "{{port}}" } })).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSection { section: "server", .. }));
    }

    #[test]
    fn empty_leaves_fall_back_to_defaults() {
        let config = AppConfig::from_document(
            "test",
            json!({
                "server": { "host": null, "port": "" },
                "auth": { "secret": null, "expiresIn": null, "issuer": "" },
                "diagnostics": { "timeoutSecs": null, "probes": [{ "name": "cdn", "url": "" }] },
            }),
        )
        .unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert!(config.auth.secret.is_empty());
        assert_eq!(config.auth.expires_in, 3600);
        assert_eq!(config.auth.issuer, None);
        assert_eq!(config.diagnostics.timeout_secs, 5);
        assert!(config.diagnostics.probes[0].url.is_empty());
        // the document itself keeps what was written
        assert_eq!(config.get("auth.secret"), Some(&Value::Null));
    }

    #[test]
    fn numeric_settings_accept_strings() {
        let config = AppConfig::from_document(
            "test",
            json!({
                "server": { "port": "8081" },
                "auth": { "expiresIn": " 900 " },
                "diagnostics": { "timeoutSecs": "2", "probes": [{ "name": "cdn", "url": "http://cdn", "timeoutSecs": "1" }] },
            }),
        )
        .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.auth.expires_in, 900);
        assert_eq!(config.diagnostics.timeout_secs, 2);
        assert_eq!(config.diagnostics.probes[0].timeout_secs, Some(1));
    }

    #[test]
    fn out_of_range_port_is_reported() {
        let err = AppConfig::from_document("test", json!({ "server": { "port": "70000" } })).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSection { section: "server", .. }));
    }

    #[test]
    fn set_path_creates_intermediates() {
        let mut doc = json!({ "storage": "flat" });
        set_path(&mut doc, "storage.azure.connectionString", json!("c"));
        set_path(&mut doc, "auth.secret", json!("s"));
        assert_eq!(doc, json!({
            "storage": { "azure": { "connectionString": "c" } },
            "auth": { "secret": "s" },
        }));
    }

    #[test]
    fn redaction_masks_sensitive_keys_only() {
        let config = AppConfig::from_document(
            "test",
            json!({ "auth": { "secret": "abc", "issuer": "me" }, "googleApis": { "apiKey": "" } }),
        )
        .unwrap();
        let redacted = config.redacted_document();
        assert_eq!(redacted["auth"]["secret"], "********");
        assert_eq!(redacted["auth"]["issuer"], "me");
        assert_eq!(redacted["googleApis"]["apiKey"], "");
    }

    #[test]
    fn env_flags_and_empty_values() {
        let env = EnvVars::from_pairs([("A", "TRUE"), ("B", "0"), ("C", "")]);
        assert!(env.flag("A"));
        assert!(!env.flag("B"));
        assert!(!env.flag("missing"));
        assert_eq!(env.get("C"), Some(""));
        assert_eq!(env.non_empty("C"), None);
    }

    #[test]
    fn auth_debug_never_prints_secret() {
        let auth = AuthSettings {
            secret: "super-secret".into(),
            ..AuthSettings::default()
        };
        assert!(!format!("{auth:?}").contains("super-secret"));
    }
}
