use anyhow::Result;
use clap::Args;

use crate::catalog::{self, CatalogDocument};
use crate::config::Config;
use crate::sandbox::SandboxBuilder;

#[derive(Args)]
pub struct ServicesArgs {
    /// Only list services in this category
    #[arg(short = 'C', long)]
    pub category: Option<String>,

    /// Show companion tools for each service
    #[arg(short, long)]
    pub long: bool,

    /// Print the catalog in the current schema instead of a listing
    #[arg(long)]
    pub export: bool,
}

pub async fn run(args: ServicesArgs, config: &Config) -> Result<()> {
    let builder = SandboxBuilder::new(config);
    let catalog = builder.load_catalog(&config.catalog_path()).await?;

    if args.export {
        print!("{}", catalog::to_document_string(&catalog)?);
        return Ok(());
    }

    print!("{}", render_listing(&catalog, args.category.as_deref(), args.long));
    Ok(())
}

fn render_listing(catalog: &CatalogDocument, category: Option<&str>, long: bool) -> String {
    let mut out = String::new();
    let mut shown = 0;

    for service in &catalog.services {
        if let Some(wanted) = category
            && service.category.as_deref() != Some(wanted)
        {
            continue;
        }
        shown += 1;

        let cert = if service.requires_certificate {
            "cert"
        } else {
            "    "
        };
        out.push_str(&format!(
            "{:<16} {} {:<32} {}\n",
            service.id,
            cert,
            service.display_name,
            service.primary_url()
        ));

        if long {
            for tool in &service.companions {
                let mut flags = Vec::new();
                if tool.optional {
                    flags.push("optional");
                }
                if tool.run_on_start {
                    flags.push("runs on start");
                }
                out.push_str(&format!(
                    "    - {} ({}) {}\n",
                    tool.name,
                    tool.package,
                    flags.join(", ")
                ));
            }
            if let Some(notes) = &service.notes {
                out.push_str(&format!("    {}\n", notes));
            }
        }
    }

    if shown == 0 {
        out.push_str("No services.\n");
    }
    out
}
