use anyhow::Result;

use crate::config::Config;
use crate::sandbox::{SandboxBuilder, detect_engine};
use crate::startup::check_requirements;

pub async fn run(config: &Config) -> Result<()> {
    let engine = detect_engine(&config.engine.command, &config.tools_dir());

    println!("Engine:");
    for line in engine.status_lines() {
        println!("{}", line);
    }
    println!();

    println!("Configuration:");
    println!("  Catalog:     {}", config.catalog_path().display());
    match SandboxBuilder::new(config)
        .load_catalog(&config.catalog_path())
        .await
    {
        Ok(catalog) => println!(
            "               {} services (schema v{})",
            catalog.services.len(),
            catalog.schema_version
        ),
        Err(e) => println!("               unusable: {}", e),
    }
    for root in config.scan_roots() {
        let mark = if root.exists() { "ok" } else { "--" };
        println!("  Scan root:   {} {}", root.display(), mark);
    }
    println!("  Tie-break:   {}", config.scan.tie_break);
    match config.scan_timeout() {
        Some(limit) => println!("  Timeout:     {}s", limit.as_secs()),
        None => println!("  Timeout:     none"),
    }
    println!("  Tools dir:   {}", config.tools_dir().display());
    println!("  Output dir:  {}", config.output_dir().display());

    let issues = check_requirements(config);
    if !issues.is_empty() {
        println!();
        println!("Issues:");
        for issue in issues {
            let level = if issue.critical { "critical" } else { "warning" };
            println!("  [{}] {}", level, issue);
        }
    }

    Ok(())
}
