//! Command implementations for the Stylegrow CLI.

pub mod runs;
pub mod schedule;
pub mod train;
pub mod validate;

use anyhow::{Context, Result};
use std::path::Path;
use stylegrow_training::TrainingConfig;

/// Load a configuration file, or the defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<TrainingConfig> {
    match path {
        Some(path) => TrainingConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(TrainingConfig::default()),
    }
}
