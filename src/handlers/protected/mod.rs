// handlers/protected/mod.rs - Protected handlers (JWT authentication required)
//
// Every route here sits behind `middleware::require_auth`, which places an
// `AuthUser` in the request extensions before the handler runs.
pub mod auth;

pub use auth::{session_refresh, session_whoami};
