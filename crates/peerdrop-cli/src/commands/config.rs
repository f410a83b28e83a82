//! Config command implementation.

use anyhow::{Context, Result};

use peerdrop_core::config::Config;

use super::ConfigArgs;

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    if args.path {
        println!("{}", Config::config_path().display());
        return Ok(());
    }

    let config = super::load_config()?;
    let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;

    println!("# {}", Config::config_path().display());
    println!();
    print!("{content}");
    println!();
    println!("# Session store: {}", config.storage_path().display());
    Ok(())
}
