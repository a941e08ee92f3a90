// Composition root: wires the loaded configuration into the issuer, guard
// and diagnostics registry, and builds the router.

use axum::{
    middleware::from_fn_with_state,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::auth::{TokenGuard, TokenIssuer};
use crate::config::{AppConfig, LoadedConfig};
use crate::diagnostics::{DiagnosticsRegistry, HttpProbe, SecretStoreProvider, TokenAuthProvider};
use crate::handlers::{protected, public};
use crate::middleware::require_auth;

/// Shared, read-only state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub issuer: Arc<TokenIssuer>,
    pub guard: Arc<TokenGuard>,
    pub diagnostics: Arc<DiagnosticsRegistry>,
}

impl AppState {
    /// State with an empty diagnostics registry
    pub fn new(config: AppConfig) -> Self {
        let timeout = Duration::from_secs(config.diagnostics.timeout_secs);
        Self {
            issuer: Arc::new(TokenIssuer::new(&config.auth)),
            guard: Arc::new(TokenGuard::new(&config.auth)),
            diagnostics: Arc::new(DiagnosticsRegistry::new(timeout)),
            config: Arc::new(config),
        }
    }

    /// Build state from a completed load and register the built-in providers
    pub async fn bootstrap(loaded: LoadedConfig) -> Self {
        let LoadedConfig {
            config,
            report,
            resolver,
        } = loaded;
        let state = Self::new(config);

        state
            .diagnostics
            .register("secrets", Arc::new(SecretStoreProvider::new(resolver, &report)))
            .await;
        state
            .diagnostics
            .register(
                "auth",
                Arc::new(TokenAuthProvider::new(&state.guard, state.issuer.default_ttl())),
            )
            .await;

        for probe in &state.config.diagnostics.probes {
            let timeout = probe
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| state.diagnostics.timeout());
            match HttpProbe::new(&probe.url, timeout) {
                Ok(provider) => {
                    state
                        .diagnostics
                        .register(probe.name.clone(), Arc::new(provider))
                        .await;
                }
                Err(e) => {
                    warn!(probe = %probe.name, error = %format!("{e:#}"), "Skipping misconfigured diagnostic probe");
                }
            }
        }

        state
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(public::health_report))
        .route("/health/:name", get(public::service_health))
        // Protected
        .merge(protected_routes(&state))
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/auth/whoami", get(protected::session_whoami))
        .route("/api/auth/refresh", post(protected::session_refresh))
        .route_layer(from_fn_with_state(state.guard.clone(), require_auth))
}

async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "TenantHub API",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "home": "/ (public)",
                "health": "/health, /health/:name (public)",
                "auth": "/api/auth/whoami, /api/auth/refresh (protected)",
            }
        }
    }))
}
