//! Session lifecycle, login throttling and security audit over a SQL store.
//!
//! The three security components live in [`auth`]:
//!
//! - [`auth::SessionManager`] creates, validates, lists and revokes sessions.
//! - [`auth::RateLimiter`] counts attempts per (identifier, action type) and
//!   blocks once the ceiling is reached.
//! - [`auth::AuditLog`] records security events to the store and a text file.
//!
//! [`App`] wires them behind an axum router.

pub mod app;
pub mod auth;
pub mod config;
pub mod controllers;
pub mod db;
pub mod error;
pub mod extractors;
pub mod logging;
pub mod migrations;
pub mod models;
pub mod openapi;
pub mod response;
pub mod routing;
pub mod testing;

pub use app::App;
pub use config::Config;
pub use controllers::AppState;
pub use error::{Outcome, WardenError};
