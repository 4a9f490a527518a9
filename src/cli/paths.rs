//! CLI subcommand: `certbox paths`
//!
//! Prints all resolved XDG-compliant paths for debugging and scripting.

use anyhow::Result;

use crate::paths::Paths;

pub fn run() -> Result<()> {
    let paths = Paths::resolve()?;

    println!("certbox Paths (XDG Base Directory)");
    println!("==================================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    println!("Data:       {}", paths.data_dir.display());
    println!("  catalog:        {}", paths.catalog_file().display());
    println!("  tools:          {}", paths.tools_dir().display());
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!("  sandboxes:      {}", paths.sandboxes_dir().display());
    println!();
    println!("Cache:      {}", paths.cache_dir.display());

    Ok(())
}
