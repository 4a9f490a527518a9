use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use super::cancel_on_ctrl_c;
use super::presenter::{ConsolePresenter, format_pair};
use crate::config::Config;
use crate::sandbox::{ResultPresenter, SandboxBuilder};

#[derive(Args)]
pub struct CertsArgs {
    /// Search these directories instead of scan.roots
    #[arg(short, long = "root", value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Print pairs as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: CertsArgs, config: &Config) -> Result<()> {
    let roots = if args.roots.is_empty() {
        config.scan_roots()
    } else {
        args.roots
    };

    let builder = SandboxBuilder::new(config);
    let report = builder.scan(&roots, cancel_on_ctrl_c()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.pairs)?);
    } else if report.pairs.is_empty() {
        println!("No certificate pairs found.");
    } else {
        for (i, pair) in report.pairs.iter().enumerate() {
            println!("{}", format_pair(i + 1, pair));
        }
    }

    ConsolePresenter::new(false).show_warnings(&report.warnings);
    Ok(())
}
