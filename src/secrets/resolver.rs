use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::SecretStore;

/// Joins configuration path segments into a secret name (`a.b.c` -> `a--b--c`)
pub const PATH_DELIMITER: &str = "--";

/// Well-formed `{{name}}` tokens only: no braces or whitespace inside
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}\s]+)\}\}").expect("placeholder pattern is valid"));

/// True when the string still carries at least one `{{name}}` token
pub fn contains_placeholder(value: &str) -> bool {
    PLACEHOLDER.is_match(value)
}

/// Secret name derived from a dotted configuration path
pub fn secret_name_for_path(segments: &[String]) -> String {
    segments.join(PATH_DELIMITER)
}

/// Connection state of the secret store after startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StoreState {
    Connected { store: String },
    #[default]
    NotConfigured,
    Disabled { reason: String },
}

/// Dotted configuration paths whose subtrees are excluded from resolution
#[derive(Debug, Clone, Default)]
pub struct PinnedPaths {
    paths: BTreeSet<String>,
}

impl PinnedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>) {
        self.paths.insert(path.into());
    }

    pub fn is_pinned(&self, path: &str) -> bool {
        self.paths.iter().any(|pinned| {
            path == pinned
                || (path.starts_with(pinned.as_str())
                    && path[pinned.len()..].starts_with('.'))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.paths.iter()
    }
}

/// Outcome of the resolution passes, kept for diagnostics and the CLI
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionReport {
    /// Number of store lookups issued
    pub lookups: usize,
    pub placeholders_resolved: BTreeSet<String>,
    pub placeholders_unresolved: BTreeSet<String>,
    pub empty_resolved: BTreeSet<String>,
    pub empty_unresolved: BTreeSet<String>,
}

impl ResolutionReport {
    pub fn is_complete(&self) -> bool {
        self.placeholders_unresolved.is_empty() && self.empty_unresolved.is_empty()
    }
}

/// Resolves placeholders and empty fields of a configuration document
/// against an optional secret store. Resolution is best-effort: a missing
/// secret leaves that one value untouched and never fails the pass.
#[derive(Clone)]
pub struct SecretResolver {
    store: Option<Arc<dyn SecretStore>>,
    state: StoreState,
}

impl SecretResolver {
    /// Resolver with no backing store; every lookup yields `None`
    pub fn disabled() -> Self {
        Self {
            store: None,
            state: StoreState::NotConfigured,
        }
    }

    /// Probe the store once. A failed probe disables resolution instead of
    /// failing startup.
    pub async fn initialize(store: Option<Arc<dyn SecretStore>>) -> Self {
        let Some(store) = store else {
            info!("Secret store not configured; secret resolution disabled");
            return Self::disabled();
        };

        match store.check().await {
            Ok(()) => {
                info!(store = store.name(), "Secret store connected");
                let state = StoreState::Connected {
                    store: store.name().to_string(),
                };
                Self {
                    store: Some(store),
                    state,
                }
            }
            Err(e) => {
                warn!(
                    store = store.name(),
                    error = %e,
                    "Secret store initialization failed; secret resolution disabled"
                );
                Self {
                    store: None,
                    state: StoreState::Disabled {
                        reason: e.to_string(),
                    },
                }
            }
        }
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn store(&self) -> Option<&Arc<dyn SecretStore>> {
        self.store.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Single-secret lookup. Disabled store, missing secret, fetch error and
    /// empty value all yield `None`; only the logs tell them apart.
    pub async fn get_secret(&self, name: &str) -> Option<String> {
        let Some(store) = &self.store else {
            debug!(secret = name, "Secret store disabled; skipping lookup");
            return None;
        };

        match store.fetch(name).await {
            Ok(Some(value)) if !value.is_empty() => {
                debug!(secret = name, "Secret resolved");
                Some(value)
            }
            Ok(Some(_)) => {
                warn!(secret = name, "Secret exists but has an empty value");
                None
            }
            Ok(None) => {
                debug!(secret = name, "Secret not found");
                None
            }
            Err(e) => {
                warn!(secret = name, error = %e, "Secret lookup failed");
                None
            }
        }
    }

    /// Replace every `{{name}}` token in string values. Each unique name is
    /// looked up once; failed names stay verbatim.
    pub async fn resolve_placeholders(
        &self,
        mut document: Value,
        pinned: &PinnedPaths,
        report: &mut ResolutionReport,
    ) -> Value {
        let mut names = Vec::new();
        collect_placeholders(&document, &mut Vec::new(), pinned, &mut names, &mut HashSet::new());

        if names.is_empty() {
            return document;
        }

        if !self.is_enabled() {
            warn!(
                count = names.len(),
                names = ?names,
                "Secret store unavailable; placeholders left unresolved"
            );
            report.placeholders_unresolved.extend(names);
            return document;
        }

        let mut resolved = HashMap::new();
        for name in names {
            report.lookups += 1;
            match self.get_secret(&name).await {
                Some(value) => {
                    report.placeholders_resolved.insert(name.clone());
                    resolved.insert(name, value);
                }
                None => {
                    warn!(placeholder = %name, "Placeholder could not be resolved; leaving it in place");
                    report.placeholders_unresolved.insert(name);
                }
            }
        }

        if !resolved.is_empty() {
            substitute(&mut document, &mut Vec::new(), pinned, &resolved);
        }
        document
    }

    /// Fill `null` and `""` leaves from secrets named after their path.
    /// `prefix` is the dotted path of `document` within the full configuration.
    pub async fn resolve_empty_values(
        &self,
        mut document: Value,
        prefix: &str,
        pinned: &PinnedPaths,
        report: &mut ResolutionReport,
    ) -> Value {
        let mut path: Vec<String> = prefix
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        let depth = path.len();

        let mut empty = Vec::new();
        collect_empty(&document, &mut path, pinned, &mut empty);

        for segments in empty {
            let dotted = segments.join(".");
            if !self.is_enabled() {
                report.empty_unresolved.insert(dotted);
                continue;
            }

            let name = secret_name_for_path(&segments);
            report.lookups += 1;
            match self.get_secret(&name).await {
                Some(value) => {
                    if let Some(slot) = slot_mut(&mut document, &segments[depth..]) {
                        *slot = Value::String(value);
                        debug!(path = %dotted, secret = %name, "Empty configuration value resolved");
                        report.empty_resolved.insert(dotted);
                    }
                }
                None => {
                    debug!(path = %dotted, secret = %name, "Empty configuration value left unresolved");
                    report.empty_unresolved.insert(dotted);
                }
            }
        }

        document
    }
}

fn collect_placeholders(
    value: &Value,
    path: &mut Vec<String>,
    pinned: &PinnedPaths,
    names: &mut Vec<String>,
    seen: &mut HashSet<String>,
) {
    if !path.is_empty() && pinned.is_pinned(&path.join(".")) {
        return;
    }

    match value {
        Value::String(text) => {
            for caps in PLACEHOLDER.captures_iter(text) {
                let name = caps[1].to_string();
                if seen.insert(name.clone()) {
                    names.push(name);
                }
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                collect_placeholders(child, path, pinned, names, seen);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                collect_placeholders(child, path, pinned, names, seen);
                path.pop();
            }
        }
        _ => {}
    }
}

fn substitute(
    value: &mut Value,
    path: &mut Vec<String>,
    pinned: &PinnedPaths,
    resolved: &HashMap<String, String>,
) {
    if !path.is_empty() && pinned.is_pinned(&path.join(".")) {
        return;
    }

    match value {
        Value::String(text) => {
            if !PLACEHOLDER.is_match(text) {
                return;
            }
            let replaced = PLACEHOLDER.replace_all(text, |caps: &Captures| {
                resolved
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            });
            *text = replaced.into_owned();
        }
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                path.push(key.clone());
                substitute(child, path, pinned, resolved);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter_mut().enumerate() {
                path.push(index.to_string());
                substitute(child, path, pinned, resolved);
                path.pop();
            }
        }
        _ => {}
    }
}

fn collect_empty(
    value: &Value,
    path: &mut Vec<String>,
    pinned: &PinnedPaths,
    out: &mut Vec<Vec<String>>,
) {
    let Value::Object(map) = value else {
        return;
    };

    for (key, child) in map {
        path.push(key.clone());
        if !pinned.is_pinned(&path.join(".")) {
            match child {
                Value::Null => out.push(path.clone()),
                Value::String(s) if s.is_empty() => out.push(path.clone()),
                Value::Object(_) => collect_empty(child, path, pinned, out),
                // arrays and non-empty scalars pass through
                _ => {}
            }
        }
        path.pop();
    }
}

fn slot_mut<'a>(value: &'a mut Value, segments: &[String]) -> Option<&'a mut Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| current.as_object_mut()?.get_mut(segment))
}
