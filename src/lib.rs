pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod secrets;
