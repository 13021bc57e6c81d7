//! # waypost-server
//!
//! HTTP front of the waypost relay: reporters POST position batches,
//! observers read snapshots or hold a Server-Sent Events stream open.

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::{Config, ConfigError};
pub use handlers::{router, run_server, serve, AppState};
