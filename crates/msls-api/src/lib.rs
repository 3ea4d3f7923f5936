//! Tenant-isolated HTTP API for the MSLS school ERP

pub mod auth;
pub mod config;
mod error;
pub mod observability;
pub mod routes;
pub mod schema;
pub mod server;
mod state;

#[cfg(test)]
mod scenarios;

pub use config::{Config, ConfigBuilder, TelemetryConfig};
pub use error::{ApiError, Result};
pub use schema::{Student, StudentStatus, build_engine};
pub use server::{build_app, run_http};
pub use state::AppState;
