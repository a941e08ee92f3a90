use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::USER_AGENT, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::auth::{now_millis, Claims, Rejection, TokenGuard};
use crate::error::ApiError;

/// Authenticated caller, attached to request extensions by `require_auth`
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub claims: Claims,
}

impl AuthUser {
    pub fn subject(&self) -> &str {
        &self.claims.sub
    }
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self { claims }
    }
}

/// JWT gate in front of protected routes. Missing, invalid and expired
/// tokens all get the same 401; only the log line differs.
pub async fn require_auth(
    State(guard): State<Arc<TokenGuard>>,
    mut request: Request,
    next: Next,
) -> Response {
    match guard.authorize(request.headers(), now_millis()) {
        Ok(claims) => {
            request.extensions_mut().insert(AuthUser::from(claims));
            next.run(request).await
        }
        Err(rejection) => {
            log_rejection(&rejection, &request);
            ApiError::unauthorized("Unauthorized").into_response()
        }
    }
}

fn log_rejection(rejection: &Rejection, request: &Request) {
    let ip = client_ip(request);
    let user_agent = user_agent(request.headers());
    let path = request.uri().path();

    match rejection {
        Rejection::Missing => {
            warn!(%ip, %user_agent, %path, "Rejected request: missing bearer token");
        }
        Rejection::Invalid { preview } => {
            warn!(%ip, %user_agent, %path, token = %preview, "Rejected request: invalid token");
        }
        Rejection::Expired {
            subject,
            expired_at,
        } => {
            let expired_at = chrono::DateTime::from_timestamp(*expired_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| expired_at.to_string());
            warn!(%ip, %user_agent, %path, %subject, %expired_at, "Rejected request: token expired");
        }
    }
}

/// First `x-forwarded-for` hop, else the socket peer, else `unknown`
fn client_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}
