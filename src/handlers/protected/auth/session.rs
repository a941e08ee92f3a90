use axum::{extract::State, Extension};
use tracing::info;

use crate::app::AppState;
use crate::auth::{Claims, IssuedToken};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};

/// GET /api/auth/whoami - Claims of the token presented with this request
///
/// ```json
/// { "success": true, "data": { "sub": "user-1", "iat": 1700000000, "exp": 1700003600, "roles": ["admin"] } }
/// ```
pub async fn whoami(Extension(user): Extension<AuthUser>) -> ApiResult<Claims> {
    Ok(ApiResponse::success(user.claims))
}

/// POST /api/auth/refresh - Renew the presented token
///
/// The new token keeps subject, audience, roles, permissions and custom
/// claims; `iat`, `exp` and `jti` are fresh. Expired tokens never reach this
/// handler, so renewal has to happen before expiry.
///
/// ```json
/// { "success": true, "data": { "token": "eyJhbGciOi...", "expiresAt": 1700007200, "expiresIn": 3600 } }
/// ```
pub async fn refresh(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<IssuedToken> {
    let issued = state.issuer.reissue(&user.claims)?;
    info!(subject = %user.subject(), expires_at = issued.expires_at, "Token renewed");
    Ok(ApiResponse::success(issued))
}
