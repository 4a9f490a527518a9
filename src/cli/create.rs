use anyhow::Result;
use clap::Args;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use super::cancel_on_ctrl_c;
use super::presenter::ConsolePresenter;
use crate::config::Config;
use crate::sandbox::{self, ResultPresenter, SandboxBuilder};
use crate::spec::UserSelections;

#[derive(Args)]
pub struct CreateArgs {
    /// Service id from the catalog
    pub service: String,

    /// Certificate to expose: fingerprint prefix or certificate path (repeatable)
    #[arg(long, value_name = "SELECTOR")]
    pub cert: Vec<String>,

    /// Optional companion tool to stage (repeatable)
    #[arg(long, value_name = "ID")]
    pub with: Vec<String>,

    /// Search these directories instead of scan.roots
    #[arg(short, long = "root", value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Start the isolation engine after writing the configuration
    #[arg(long)]
    pub launch: bool,

    /// Never prompt; fail when a certificate choice is needed
    #[arg(long)]
    pub no_prompt: bool,
}

pub async fn run(args: CreateArgs, config: &Config) -> Result<()> {
    let roots = if args.roots.is_empty() {
        config.scan_roots()
    } else {
        args.roots
    };
    let interactive = !args.no_prompt && std::io::stdin().is_terminal();
    let presenter = Arc::new(ConsolePresenter::new(interactive));

    let builder = SandboxBuilder::new(config).with_presenter(presenter.clone());
    let catalog = builder.load_catalog(&config.catalog_path()).await?;

    let selections = UserSelections {
        certificates: args.cert,
        companions: args.with,
    };
    let outcome = builder
        .create_sandbox(
            &catalog,
            &args.service,
            &roots,
            selections,
            cancel_on_ctrl_c(),
        )
        .await?;

    presenter.show_warnings(&outcome.warnings);

    println!("Sandbox:  {}", outcome.spec.name);
    for (i, pair) in outcome.spec.certificates.iter().enumerate() {
        println!("  certificate {}: {} ({})", i + 1, pair.subject, pair.confidence);
    }
    for tool in &outcome.spec.companions {
        println!("  companion:     {}", tool.name);
    }
    println!("Config:   {}", outcome.config_path.display());
    println!("Launch:   {}", outcome.descriptor);

    if args.launch {
        let pid = sandbox::launch(&outcome.descriptor)?;
        println!("Started engine (pid {})", pid);
    }

    Ok(())
}
