// handlers/mod.rs - Two-tier handler layout
//
// Public (no auth) -> Protected (bearer token checked by `require_auth`)
pub mod protected; // JWT authentication required (/api/*)
pub mod public; // No authentication required (/, /health)
