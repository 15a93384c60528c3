//! CLI command implementations

pub mod generate;
pub mod health;
pub mod styles;

use anyhow::{Context, Result};
use easel_gen::EaselConfig;
use std::path::Path;

/// Resolve configuration from `--config` or the layered defaults
pub fn load_config(path: Option<&str>) -> Result<EaselConfig> {
    match path {
        Some(path) => EaselConfig::load_from_file(Path::new(path))
            .with_context(|| format!("Failed to load config from {}", path)),
        None => EaselConfig::load().context("Failed to load configuration"),
    }
}
