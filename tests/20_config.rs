mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use tenanthub_api::app::{self, AppState};
use tenanthub_api::config::{ConfigError, ConfigLoader, EnvVars};
use tenanthub_api::secrets::{MemorySecretStore, StoreState};

/// Write `<dir>/<profile>.json` and return the environment pointing at it
fn config_dir(profile: &str, document: &Value) -> Result<TempDir> {
    let dir = tempfile::tempdir()?;
    std::fs::write(
        dir.path().join(format!("{profile}.json")),
        serde_json::to_vec_pretty(document)?,
    )?;
    Ok(dir)
}

fn env_for(dir: &Path, profile: &str, extra: &[(&str, &str)]) -> EnvVars {
    let mut pairs = vec![
        ("CONFIG_DIR".to_string(), dir.display().to_string()),
        ("APP_ENV".to_string(), profile.to_string()),
    ];
    pairs.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    EnvVars::from_pairs(pairs)
}

#[tokio::test]
async fn env_override_supplies_auth_secret_without_store_calls() -> Result<()> {
    let dir = config_dir("staging", &json!({ "auth": { "secret": "" } }))?;
    let store = Arc::new(MemorySecretStore::new().with_secret("auth--secret", "from-store"));

    let loaded = ConfigLoader::new(env_for(dir.path(), "staging", &[("JWT_SECRET", "abc123")]))
        .with_secret_store(store.clone())
        .load()
        .await?;

    assert_eq!(loaded.config.get_str("auth.secret"), Some("abc123"));
    assert_eq!(loaded.config.auth.secret, "abc123");
    assert_eq!(store.lookup_count(), 0);
    assert_eq!(loaded.report.overrides, vec!["JWT_SECRET".to_string()]);
    Ok(())
}

#[tokio::test]
async fn override_wins_even_when_store_is_unreachable() -> Result<()> {
    let dir = config_dir(
        "staging",
        &json!({ "storage": { "azure": { "connectionString": "{{storage-conn}}" } } }),
    )?;
    let store = Arc::new(MemorySecretStore::new().unreachable());

    let loaded = ConfigLoader::new(env_for(
        dir.path(),
        "staging",
        &[("AZURE_STORAGE_CONNECTION_STRING", "UseDevelopmentStorage=true")],
    ))
    .with_secret_store(store.clone())
    .load()
    .await?;

    assert_eq!(
        loaded.config.get_str("storage.azure.connectionString"),
        Some("UseDevelopmentStorage=true")
    );
    assert_eq!(store.lookup_count(), 0);
    assert!(matches!(loaded.report.store, StoreState::Disabled { .. }));
    Ok(())
}

#[tokio::test]
async fn placeholder_is_resolved_from_store() -> Result<()> {
    let dir = config_dir(
        "production",
        &json!({ "storage": { "azure": { "connectionString": "{{storage-conn}}" } } }),
    )?;
    let store = Arc::new(MemorySecretStore::new().with_secret("storage-conn", "conn-xyz"));

    let loaded = ConfigLoader::new(env_for(dir.path(), "production", &[]))
        .with_secret_store(store.clone())
        .load()
        .await?;

    assert_eq!(
        loaded.config.get_str("storage.azure.connectionString"),
        Some("conn-xyz")
    );
    assert_eq!(store.lookups(), vec!["storage-conn".to_string()]);
    assert!(loaded.report.resolution.is_complete());
    Ok(())
}

#[tokio::test]
async fn unresolved_required_value_fails_the_load() -> Result<()> {
    let dir = config_dir(
        "production",
        &json!({ "storage": { "azure": { "connectionString": "{{storage-conn}}" } } }),
    )?;

    let result = ConfigLoader::new(env_for(dir.path(), "production", &[]))
        .with_secret_store(Arc::new(MemorySecretStore::new()))
        .load()
        .await;

    match result {
        Err(ConfigError::Unresolved { path }) => assert_eq!(path, "storage.azure.connectionString"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("load should fail while a required value is unresolved"),
    }
    Ok(())
}

#[tokio::test]
async fn missing_profile_file_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let result = ConfigLoader::new(env_for(dir.path(), "nowhere", &[]))
        .without_secret_store()
        .load()
        .await;

    assert!(matches!(result, Err(ConfigError::MissingFile(_))));
    Ok(())
}

#[tokio::test]
async fn loaded_config_drives_health_and_auth() -> Result<()> {
    let dir = config_dir(
        "development",
        &json!({
            "auth": { "secret": "{{jwt-secret}}", "expiresIn": 900 },
            "features": { "banner": "{{banner-text}}" },
        }),
    )?;
    let store = Arc::new(MemorySecretStore::new().with_secret("jwt-secret", "s3cr3t"));

    let loaded = ConfigLoader::new(env_for(dir.path(), "development", &[]))
        .with_secret_store(store)
        .load()
        .await?;
    let state = AppState::bootstrap(loaded).await;
    assert_eq!(state.config.auth.expires_in, 900);

    let (status, body) = common::send(app::router(state.clone()), common::get("/health")).await?;
    assert_eq!(status, StatusCode::OK);
    // banner placeholder stays unresolved, so the store reports degraded
    assert_eq!(body["data"]["status"], "degraded");

    let (status, body) = common::send(app::router(state.clone()), common::get("/health/secrets")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "degraded");
    assert_eq!(body["data"]["details"]["unresolved"], json!(["{{banner-text}}"]));

    let (status, body) = common::send(app::router(state.clone()), common::get("/health/auth")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ready");
    assert_eq!(body["data"]["details"]["tokenTtlSecs"], 900);

    let issued = state.issuer.issue("user-7", Default::default())?;
    assert_eq!(issued.expires_in, 900);
    let (status, _) = common::send(
        app::router(state.clone()),
        common::with_auth("GET", "/api/auth/whoami", &format!("Bearer {}", issued.token)),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn offline_mode_skips_store_and_reports_degraded() -> Result<()> {
    let dir = config_dir(
        "development",
        &json!({ "auth": { "secret": "local-only" }, "features": { "banner": "{{banner-text}}" } }),
    )?;
    let store = Arc::new(MemorySecretStore::new().with_secret("banner-text", "hello"));

    let loaded = ConfigLoader::new(env_for(dir.path(), "development", &[("OFFLINE_MODE", "true")]))
        .with_secret_store(store.clone())
        .load()
        .await?;
    assert!(loaded.report.offline);
    assert_eq!(loaded.config.get_str("features.banner"), Some("{{banner-text}}"));
    assert_eq!(store.lookup_count(), 0);

    let state = AppState::bootstrap(loaded).await;
    let (status, body) = common::send(app::router(state), common::get("/health/secrets")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "degraded");
    Ok(())
}

#[tokio::test]
async fn unknown_diagnostic_name_is_not_found() -> Result<()> {
    let state = common::test_state();

    let (status, body) = common::send(common::test_app(&state), common::get("/health/nope")).await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    Ok(())
}
