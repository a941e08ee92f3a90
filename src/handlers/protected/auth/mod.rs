pub mod session;

// Re-export handler functions for use in routing
pub use session::refresh as session_refresh;
pub use session::whoami as session_whoami;
