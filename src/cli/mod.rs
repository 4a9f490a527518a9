pub mod certs;
pub mod config;
pub mod create;
pub mod paths;
pub mod presenter;
pub mod services;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "certbox")]
#[command(
    author,
    version,
    about = "Prepare sandboxes for web services that need personal certificates"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "CERTBOX_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List services in the catalog
    Services(services::ServicesArgs),

    /// Find personal certificates and their private keys
    Certs(certs::CertsArgs),

    /// Render a sandbox configuration for a service
    Create(create::CreateArgs),

    /// Show engine availability and startup checks
    Status,

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}

impl Commands {
    /// Whether the command runs the pipeline and needs the startup checks.
    pub fn needs_startup(&self) -> bool {
        matches!(
            self,
            Commands::Services(_) | Commands::Certs(_) | Commands::Create(_)
        )
    }
}

/// Token cancelled when the user presses Ctrl+C.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}
