use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::config::AuthSettings;

/// Claim names owned by the token format itself
const RESERVED_CLAIMS: &[&str] = &[
    "sub", "iat", "exp", "nbf", "iss", "aud", "jti", "roles", "permissions",
];

/// JWT claim set carried by bearer tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    /// Any further claims (tenant, email, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Current time in milliseconds since the epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// True once `exp` (seconds) is at or before `now_ms`. No leeway.
pub fn is_expired(claims: &Claims, now_ms: i64) -> bool {
    claims.exp.saturating_mul(1000) <= now_ms
}

/// Token from `Authorization: Bearer <token>`; any other shape is `None`
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    if token.trim().is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// First and last few characters of a token, for logs
pub fn token_preview(token: &str) -> String {
    const HEAD: usize = 10;
    const TAIL: usize = 4;

    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= HEAD + TAIL {
        return "[redacted]".to_string();
    }
    let head: String = chars[..HEAD].iter().collect();
    let tail: String = chars[chars.len() - TAIL..].iter().collect();
    format!("{head}...{tail}")
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("JWT secret not configured")]
    MissingSecret,

    #[error("Token subject cannot be empty")]
    EmptySubject,

    #[error("JWT generation error: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
}

/// Per-token issuance options
#[derive(Debug, Clone, Default)]
pub struct TokenOptions {
    /// Lifetime override in seconds
    pub ttl_secs: Option<u64>,
    pub audience: Option<String>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub extra: Map<String, Value>,
}

impl TokenOptions {
    /// Options carrying over everything but timing from an existing claim set
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            ttl_secs: None,
            audience: claims.aud.clone(),
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
            extra: claims.extra.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
    pub expires_in: u64,
    #[serde(skip)]
    pub claims: Claims,
}

/// Signs HS256 tokens with the configured shared secret
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: Option<EncodingKey>,
    ttl_secs: u64,
    issuer: Option<String>,
}

impl TokenIssuer {
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            encoding_key: (!settings.secret.is_empty())
                .then(|| EncodingKey::from_secret(settings.secret.as_bytes())),
            ttl_secs: settings.expires_in,
            issuer: settings.issuer().map(str::to_string),
        }
    }

    pub fn default_ttl(&self) -> u64 {
        self.ttl_secs
    }

    pub fn issue(&self, subject: &str, options: TokenOptions) -> Result<IssuedToken, TokenError> {
        self.issue_at(subject, options, Utc::now().timestamp())
    }

    /// Issue with an explicit `iat` (seconds since epoch)
    pub fn issue_at(
        &self,
        subject: &str,
        mut options: TokenOptions,
        issued_at: i64,
    ) -> Result<IssuedToken, TokenError> {
        let encoding_key = self.encoding_key.as_ref().ok_or(TokenError::MissingSecret)?;
        if subject.trim().is_empty() {
            return Err(TokenError::EmptySubject);
        }

        options.extra.retain(|key, _| {
            let reserved = RESERVED_CLAIMS.contains(&key.as_str());
            if reserved {
                warn!(claim = %key, "Dropping extra claim that shadows a registered claim");
            }
            !reserved
        });

        let ttl = options.ttl_secs.unwrap_or(self.ttl_secs);
        let exp = issued_at.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX));

        let claims = Claims {
            sub: subject.to_string(),
            iat: issued_at,
            exp,
            iss: self.issuer.clone(),
            aud: options.audience,
            jti: Some(Uuid::new_v4().to_string()),
            roles: options.roles,
            permissions: options.permissions,
            extra: options.extra,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, encoding_key)?;
        Ok(IssuedToken {
            token,
            expires_at: exp,
            expires_in: ttl,
            claims,
        })
    }

    /// Fresh token for the same subject and claims (renewal)
    pub fn reissue(&self, claims: &Claims) -> Result<IssuedToken, TokenError> {
        self.issue(&claims.sub, TokenOptions::from_claims(claims))
    }
}

/// Why a request was refused. Callers see one uniform rejection; the
/// variants only drive log detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Missing,
    Invalid { preview: String },
    Expired { subject: String, expired_at: i64 },
}

/// Validates bearer tokens against the shared secret
#[derive(Clone)]
pub struct TokenGuard {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
}

impl TokenGuard {
    pub fn new(settings: &AuthSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked by `is_expired` with exact-boundary semantics
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["sub".to_string(), "exp".to_string()]);
        if let Some(issuer) = settings.issuer() {
            validation.set_issuer(&[issuer]);
        }

        Self {
            decoding_key: (!settings.secret.is_empty())
                .then(|| DecodingKey::from_secret(settings.secret.as_bytes())),
            validation,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.decoding_key.is_some()
    }

    /// Signature and shape check only; expiry is left to `is_expired`
    pub fn validate_token(&self, token: &str) -> Option<Claims> {
        let key = self.decoding_key.as_ref()?;
        decode::<Claims>(token, key, &self.validation)
            .map(|data| data.claims)
            .ok()
    }

    /// Gate decision for one request at `now_ms`
    pub fn authorize(&self, headers: &HeaderMap, now_ms: i64) -> Result<Claims, Rejection> {
        let token = extract_token(headers).ok_or(Rejection::Missing)?;

        let claims = self.validate_token(&token).ok_or_else(|| Rejection::Invalid {
            preview: token_preview(&token),
        })?;

        if is_expired(&claims, now_ms) {
            return Err(Rejection::Expired {
                subject: claims.sub,
                expired_at: claims.exp,
            });
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn settings(secret: &str) -> AuthSettings {
        AuthSettings {
            secret: secret.to_string(),
            ..AuthSettings::default()
        }
    }

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn claims_expiring_at(exp: i64) -> Claims {
        Claims {
            sub: "user-1".into(),
            iat: exp - 10,
            exp,
            iss: None,
            aud: None,
            jti: None,
            roles: vec![],
            permissions: vec![],
            extra: Map::new(),
        }
    }

    #[test]
    fn expiry_boundary_counts_as_expired() {
        let claims = claims_expiring_at(1_700_000_000);
        assert!(!is_expired(&claims, 1_700_000_000 * 1000 - 1));
        assert!(is_expired(&claims, 1_700_000_000 * 1000));
        assert!(is_expired(&claims, 1_700_000_000 * 1000 + 1));
    }

    #[test]
    fn extract_requires_exact_bearer_form() {
        assert_eq!(extract_token(&bearer("Bearer abc.def")), Some("abc.def".to_string()));
        assert_eq!(extract_token(&bearer("bearer abc")), None);
        assert_eq!(extract_token(&bearer("Basic abc")), None);
        assert_eq!(extract_token(&bearer("Bearer ")), None);
        assert_eq!(extract_token(&bearer("Bearer    ")), None);
        assert_eq!(extract_token(&bearer("abc")), None);
        assert_eq!(extract_token(&HeaderMap::new()), None);
    }

    #[test]
    fn issued_token_round_trips_through_guard() {
        let issuer = TokenIssuer::new(&settings("abc123"));
        let guard = TokenGuard::new(&settings("abc123"));

        let mut extra = Map::new();
        extra.insert("tenant".into(), json!("acme"));
        let issued = issuer
            .issue(
                "user-1",
                TokenOptions {
                    roles: vec!["admin".into()],
                    audience: Some("web".into()),
                    extra,
                    ..TokenOptions::default()
                },
            )
            .unwrap();

        let claims = guard
            .authorize(&bearer(&format!("Bearer {}", issued.token)), now_millis())
            .unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.has_role("admin"));
        assert_eq!(claims.aud.as_deref(), Some("web"));
        assert_eq!(claims.extra.get("tenant"), Some(&json!("acme")));
        assert_eq!(claims.exp - claims.iat, 3600);
        assert!(claims.jti.is_some());
    }

    #[test]
    fn wrong_secret_is_invalid_with_preview_only() {
        let issued = TokenIssuer::new(&settings("one"))
            .issue("user-1", TokenOptions::default())
            .unwrap();
        let guard = TokenGuard::new(&settings("two"));

        match guard.authorize(&bearer(&format!("Bearer {}", issued.token)), now_millis()) {
            Err(Rejection::Invalid { preview }) => {
                assert!(preview.contains("..."));
                assert!(preview.len() < issued.token.len());
            }
            other => panic!("expected invalid rejection, got {other:?}"),
        }
    }

    #[test]
    fn garbage_and_missing_tokens_are_rejected() {
        let guard = TokenGuard::new(&settings("abc123"));
        assert_eq!(guard.authorize(&HeaderMap::new(), now_millis()), Err(Rejection::Missing));
        assert!(matches!(
            guard.authorize(&bearer("Bearer not-a-jwt"), now_millis()),
            Err(Rejection::Invalid { .. })
        ));
    }

    #[test]
    fn expired_token_reports_subject_and_expiry() {
        let issuer = TokenIssuer::new(&settings("abc123"));
        let guard = TokenGuard::new(&settings("abc123"));
        let issued_at = Utc::now().timestamp();
        let issued = issuer
            .issue_at("user-9", TokenOptions::default(), issued_at)
            .unwrap();

        let later = (issued_at + 3601) * 1000;
        assert_eq!(
            guard.authorize(&bearer(&format!("Bearer {}", issued.token)), later),
            Err(Rejection::Expired {
                subject: "user-9".into(),
                expired_at: issued_at + 3600,
            })
        );
    }

    #[test]
    fn empty_secret_disables_issue_and_validation() {
        let issuer = TokenIssuer::new(&settings(""));
        assert!(matches!(
            issuer.issue("user-1", TokenOptions::default()),
            Err(TokenError::MissingSecret)
        ));

        let signed = TokenIssuer::new(&settings("x"))
            .issue("user-1", TokenOptions::default())
            .unwrap();
        let guard = TokenGuard::new(&settings(""));
        assert!(!guard.is_configured());
        assert!(guard.validate_token(&signed.token).is_none());
    }

    #[test]
    fn reserved_extra_claims_cannot_shadow_registered_ones() {
        let issuer = TokenIssuer::new(&settings("abc123"));
        let mut extra = Map::new();
        extra.insert("sub".into(), json!("someone-else"));
        extra.insert("exp".into(), json!(i64::MAX));
        let issued = issuer
            .issue("user-1", TokenOptions { extra, ..TokenOptions::default() })
            .unwrap();

        let claims = TokenGuard::new(&settings("abc123"))
            .validate_token(&issued.token)
            .unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.extra.is_empty());
    }

    #[test]
    fn issuer_mismatch_is_invalid() {
        let mut with_issuer = settings("abc123");
        with_issuer.issuer = Some("tenanthub".into());
        let issued = TokenIssuer::new(&settings("abc123"))
            .issue("user-1", TokenOptions::default())
            .unwrap();

        assert!(TokenGuard::new(&with_issuer).validate_token(&issued.token).is_none());

        let issued = TokenIssuer::new(&with_issuer)
            .issue("user-1", TokenOptions::default())
            .unwrap();
        assert!(TokenGuard::new(&with_issuer).validate_token(&issued.token).is_some());
    }

    #[test]
    fn blank_issuer_is_treated_as_unset() {
        let mut blank = settings("abc123");
        blank.issuer = Some("  ".into());

        let issued = TokenIssuer::new(&blank)
            .issue("user-1", TokenOptions::default())
            .unwrap();
        assert_eq!(issued.claims.iss, None);

        let plain = TokenIssuer::new(&settings("abc123"))
            .issue("user-1", TokenOptions::default())
            .unwrap();
        assert!(TokenGuard::new(&blank).validate_token(&plain.token).is_some());
        assert!(TokenGuard::new(&blank).validate_token(&issued.token).is_some());
    }

    #[test]
    fn reissue_keeps_claims_and_refreshes_timing() {
        let issuer = TokenIssuer::new(&settings("abc123"));
        let first = issuer
            .issue_at(
                "user-1",
                TokenOptions { roles: vec!["viewer".into()], ..TokenOptions::default() },
                Utc::now().timestamp() - 100,
            )
            .unwrap();
        let second = issuer.reissue(&first.claims).unwrap();

        assert_eq!(second.claims.sub, "user-1");
        assert_eq!(second.claims.roles, vec!["viewer".to_string()]);
        assert!(second.claims.iat > first.claims.iat);
        assert_ne!(second.claims.jti, first.claims.jti);
    }

    #[test]
    fn short_tokens_are_fully_redacted() {
        assert_eq!(token_preview("abc"), "[redacted]");
        assert_eq!(token_preview("abcdefghijklmnopqrstuvwxyz"), "abcdefghij...wxyz");
    }
}
