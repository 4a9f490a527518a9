//! Checks run before the pipeline is used, and first-time directory setup.

use anyhow::{Context, Result};
use std::fmt;
use tracing::debug;

use crate::config::Config;
use crate::paths::create_dir_with_mode;
use crate::sandbox::detect_engine;

/// Exit code when a critical requirement is not met.
pub const EXIT_REQUIREMENTS: i32 = 1;

/// Exit code when initialization fails.
pub const EXIT_INITIALIZE: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupIssue {
    pub message: String,
    /// Critical issues stop the program before any work is done.
    pub critical: bool,
}

impl fmt::Display for StartupIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Report everything that keeps the pipeline from working.
pub fn check_requirements(config: &Config) -> Vec<StartupIssue> {
    let mut issues = Vec::new();

    let engine = detect_engine(&config.engine.command, &config.tools_dir());
    if !engine.is_available() {
        issues.push(StartupIssue {
            message: format!(
                "Isolation engine `{}` was not found; configurations can still be generated \
                 but not launched",
                config.engine.command
            ),
            critical: false,
        });
    }

    let catalog = config.catalog_path();
    if !catalog.is_file() {
        issues.push(StartupIssue {
            message: format!(
                "Service catalog not found at {} (set catalog.path)",
                catalog.display()
            ),
            critical: true,
        });
    }

    issues
}

/// Create every directory the pipeline writes to or reads packages from.
pub fn initialize(config: &Config) -> Result<()> {
    config
        .paths
        .ensure_dirs()
        .context("Failed to create certbox directories")?;

    for dir in [config.tools_dir(), config.output_dir()] {
        create_dir_with_mode(&dir)?;
        debug!("Ensured directory {}", dir.display());
    }

    Ok(())
}
