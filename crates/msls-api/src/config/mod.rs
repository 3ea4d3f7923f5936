//! Configuration management
//!
//! Supports configuration loading with precedence: env > file > CLI > defaults

mod builder;
mod env;
mod file;

use std::path::Path;

pub use builder::{Config, ConfigBuilder, HttpConfig, TelemetryConfig, TenancyConfig};

use crate::error::Result;

/// Load configuration on top of `base`, which carries CLI arguments
///
/// An explicit `path` must exist; otherwise the standard locations are
/// searched and a missing file is not an error.
pub fn load_config(path: Option<&Path>, base: ConfigBuilder) -> Result<ConfigBuilder> {
    let mut builder = base;

    let file = path.map(Path::to_path_buf).or_else(file::find_config_file);
    if let Some(path) = file {
        tracing::info!("Loading configuration from {}", path.display());
        builder = file::load_from_file(&path, builder)?;
    }

    // Override with environment variables
    builder = env::load_from_env(builder)?;

    Ok(builder)
}
