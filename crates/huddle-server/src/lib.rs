//! # huddle-server
//!
//! WebSocket and REST front end for the Huddle chat hub, backed by SQLite.

pub mod api;
pub mod config;
pub mod db;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use db::SqliteStore;
pub use handlers::{app, run_server, AppState};
