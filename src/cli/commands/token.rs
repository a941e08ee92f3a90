use anyhow::Context;
use clap::Subcommand;
use serde_json::{json, Map, Value};

use crate::auth::{is_expired, now_millis, TokenGuard, TokenIssuer, TokenOptions};
use crate::cli::utils::{load_config, output_error, output_success};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Sign a token with the configured auth secret")]
    Issue {
        #[arg(help = "Subject (user id)")]
        subject: String,
        #[arg(long = "role", help = "Role claim (repeatable)")]
        roles: Vec<String>,
        #[arg(long = "permission", help = "Permission claim (repeatable)")]
        permissions: Vec<String>,
        #[arg(long, help = "Audience claim")]
        audience: Option<String>,
        #[arg(long, help = "Lifetime in seconds (defaults to auth.expiresIn)")]
        ttl: Option<u64>,
        #[arg(long = "claim", value_name = "KEY=VALUE", help = "Extra claim; JSON values are parsed (repeatable)")]
        claims: Vec<String>,
    },

    #[command(about = "Check a token's signature and expiry")]
    Verify {
        #[arg(help = "Token to verify")]
        token: String,
    },
}

pub async fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let config = load_config().await?.config;

    match cmd {
        TokenCommands::Issue {
            subject,
            roles,
            permissions,
            audience,
            ttl,
            claims,
        } => {
            let options = TokenOptions {
                ttl_secs: ttl,
                audience,
                roles,
                permissions,
                extra: parse_claims(&claims)?,
            };
            let issued = TokenIssuer::new(&config.auth)
                .issue(&subject, options)
                .context("failed to issue token")?;

            output_success(
                output_format,
                "Token issued",
                Some(json!({
                    "token": issued.token,
                    "expiresAt": issued.expires_at,
                    "expiresIn": issued.expires_in,
                })),
            )
        }
        TokenCommands::Verify { token } => {
            let guard = TokenGuard::new(&config.auth);
            let Some(claims) = guard.validate_token(&token) else {
                output_error(output_format, "Token signature or format is invalid", Some("INVALID_TOKEN"))?;
                anyhow::bail!("invalid token");
            };

            let expired = is_expired(&claims, now_millis());
            let message = if expired { "Token is valid but expired" } else { "Token is valid" };
            output_success(
                output_format,
                message,
                Some(json!({ "expired": expired, "claims": claims })),
            )
        }
    }
}

/// `key=value` pairs; values that parse as JSON keep their type
fn parse_claims(pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    pairs
        .iter()
        .map(|pair| -> anyhow::Result<(String, Value)> {
            let (key, raw) = pair
                .split_once('=')
                .with_context(|| format!("claim {pair:?} must look like key=value"))?;
            let key = key.trim();
            anyhow::ensure!(!key.is_empty(), "claim {pair:?} has an empty key");
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_parse_json_or_fall_back_to_strings() {
        let parsed = parse_claims(&[
            "tenant=acme".to_string(),
            "level=3".to_string(),
            "flags=[\"a\"]".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed["tenant"], json!("acme"));
        assert_eq!(parsed["level"], json!(3));
        assert_eq!(parsed["flags"], json!(["a"]));
    }

    #[test]
    fn malformed_claims_are_rejected() {
        assert!(parse_claims(&["novalue".to_string()]).is_err());
        assert!(parse_claims(&["=x".to_string()]).is_err());
    }
}
